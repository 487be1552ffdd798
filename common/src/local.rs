//! Local filesystem backend

use async_trait::async_trait;
use md5::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Error, IoContext, Result};
use crate::storage::{
    self, Backend, BackendKind, Directory, File, Locator, Node, ReadStream, Timestamp, WriteSink,
};

/// Number of attempts made to remove an entry before giving up.
pub const DELETE_ATTEMPTS: usize = 3;
const DELETE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

fn title_of(path: &std::path::Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => std::fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    }
}

fn to_filetime(time: Timestamp) -> filetime::FileTime {
    filetime::FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos())
}

async fn set_times(path: &std::path::Path, mtime: Timestamp) -> Result<()> {
    let dst = path.to_owned();
    tokio::task::spawn_blocking(move || {
        let time = to_filetime(mtime);
        filetime::set_file_times(&dst, time, time)
            .io_context(|| format!("failed setting timestamps for {:?}", &dst))
    })
    .await
    .map_err(|err| Error::io("timestamp task failed", std::io::Error::other(err)))?
}

#[instrument]
async fn remove_with_retry(path: &std::path::Path, is_dir: bool) -> Result<()> {
    retry_removal(path, || async move {
        if is_dir {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    })
    .await
}

/// Run `remove` up to [`DELETE_ATTEMPTS`] times; an entry that is already gone counts as removed.
async fn retry_removal<F, Fut>(path: &std::path::Path, mut remove: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    let mut last_error = None;
    for attempt in 1..=DELETE_ATTEMPTS {
        match remove().await {
            Ok(()) => return Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => {
                tracing::warn!(
                    "attempt {}/{} to remove {:?} failed: {}",
                    attempt,
                    DELETE_ATTEMPTS,
                    path,
                    &error
                );
                last_error = Some(error);
            }
        }
        if !tokio::fs::try_exists(path).await.unwrap_or(true) {
            return Ok(());
        }
        if attempt < DELETE_ATTEMPTS {
            tokio::time::sleep(DELETE_RETRY_DELAY).await;
        }
    }
    Err(Error::TransientIo {
        path: path.to_string_lossy().into_owned(),
        attempts: DELETE_ATTEMPTS,
        source: last_error.unwrap_or_else(|| std::io::Error::other("entry still present")),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl LocalBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument]
    async fn find(&self, path: &str) -> Result<Option<Node>> {
        let fs_path = std::path::Path::new(path);
        let metadata = match tokio::fs::metadata(fs_path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(Error::io(
                    format!("failed reading metadata from {path:?}"),
                    error,
                ));
            }
        };
        let title = title_of(fs_path);
        if metadata.is_dir() {
            Ok(Some(Node::Directory(Box::new(LocalDirectory {
                path: path.to_owned(),
                title,
            }))))
        } else {
            Ok(Some(Node::File(Box::new(LocalFile::from_metadata(
                path.to_owned(),
                title,
                &metadata,
            )))))
        }
    }
}

/// A local file with the metadata captured when the handle was created.
#[derive(Debug)]
pub struct LocalFile {
    path: String,
    title: String,
    size: u64,
    mtime: Timestamp,
    birthtime: Timestamp,
    hash: tokio::sync::OnceCell<String>,
}

impl LocalFile {
    fn from_metadata(path: String, title: String, metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(|t| storage::normalize_time(t.into()))
            .unwrap_or_else(|_| storage::now());
        // not every filesystem records creation time
        let birthtime = metadata
            .created()
            .map(|t| storage::normalize_time(t.into()))
            .unwrap_or(mtime);
        Self {
            path,
            title,
            size: metadata.len(),
            mtime,
            birthtime,
            hash: tokio::sync::OnceCell::new(),
        }
    }

    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .io_context(|| format!("failed reading metadata from {path:?}"))?;
        Ok(Self::from_metadata(
            path.to_string_lossy().into_owned(),
            title_of(path),
            &metadata,
        ))
    }

    fn fs_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.path)
    }

    async fn compute_hash(&self) -> Result<String> {
        tracing::debug!("computing checksum of {:?}", &self.path);
        let mut reader = tokio::fs::File::open(self.fs_path())
            .await
            .io_context(|| format!("cannot open {:?} for reading", &self.path))?;
        let mut hasher = md5::Md5::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .io_context(|| format!("failed reading {:?}", &self.path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl File for LocalFile {
    fn title(&self) -> &str {
        &self.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn mtime(&self) -> Result<Timestamp> {
        Ok(self.mtime)
    }

    fn birthtime(&self) -> Result<Timestamp> {
        Ok(self.birthtime)
    }

    async fn content_hash(&self) -> Result<String> {
        self.hash
            .get_or_try_init(|| self.compute_hash())
            .await
            .cloned()
    }

    async fn open_read(&self) -> Result<ReadStream> {
        let reader = tokio::fs::File::open(self.fs_path())
            .await
            .io_context(|| format!("cannot open {:?} for reading", &self.path))?;
        Ok(Box::new(reader))
    }

    async fn write_to(&self, sink: &mut WriteSink) -> Result<u64> {
        let mut reader = self.open_read().await?;
        let written = tokio::io::copy(&mut reader, sink)
            .await
            .io_context(|| format!("failed copying data out of {:?}", &self.path))?;
        sink.flush()
            .await
            .io_context(|| format!("failed flushing data from {:?}", &self.path))?;
        Ok(written)
    }

    #[instrument(skip(dest), fields(dest = dest.path()))]
    async fn copy_to(
        &self,
        dest: &dyn Directory,
        mtime: Timestamp,
        _birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let Locator::Local(dir) = dest.locator() else {
            return Err(Error::not_supported(
                dest.backend(),
                "copies from the local backend",
            ));
        };
        let target = dir.join(&self.title);
        tokio::fs::copy(self.fs_path(), &target)
            .await
            .io_context(|| format!("failed copying {:?} to {:?}", &self.path, &target))?;
        set_times(&target, mtime).await?;
        Ok(Box::new(LocalFile::open(&target).await?))
    }

    async fn update_from_stream(
        &self,
        mut source: ReadStream,
        mtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let mut writer = tokio::fs::File::create(self.fs_path())
            .await
            .io_context(|| format!("cannot open {:?} for writing", &self.path))?;
        tokio::io::copy(&mut source, &mut writer)
            .await
            .io_context(|| format!("failed writing {:?}", &self.path))?;
        writer
            .flush()
            .await
            .io_context(|| format!("failed flushing {:?}", &self.path))?;
        drop(writer);
        set_times(self.fs_path(), mtime).await?;
        Ok(Box::new(LocalFile::open(self.fs_path()).await?))
    }

    async fn set_modified(&self, mtime: Timestamp) -> Result<Box<dyn File>> {
        set_times(self.fs_path(), mtime).await?;
        Ok(Box::new(LocalFile::open(self.fs_path()).await?))
    }

    async fn delete(&self) -> Result<()> {
        remove_with_retry(self.fs_path(), false).await
    }
}

#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: String,
    title: String,
}

impl LocalDirectory {
    fn fs_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.path)
    }

    fn child(&self, title: &str) -> std::path::PathBuf {
        self.fs_path().join(title)
    }
}

#[async_trait]
impl Directory for LocalDirectory {
    fn title(&self) -> &str {
        &self.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn locator(&self) -> Locator {
        Locator::Local(self.fs_path().to_owned())
    }

    fn child_path(&self, title: &str) -> String {
        self.child(title).to_string_lossy().into_owned()
    }

    #[instrument]
    async fn list(&self) -> Result<Vec<Node>> {
        let mut entries = tokio::fs::read_dir(self.fs_path())
            .await
            .io_context(|| format!("cannot open directory {:?} for reading", &self.path))?;
        let mut nodes = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .io_context(|| format!("failed traversing directory {:?}", &self.path))?
        {
            let entry_path = entry.path();
            let title = entry.file_name().to_string_lossy().into_owned();
            let path = entry_path.to_string_lossy().into_owned();
            // follow symlinks, the same way the entry is read when transferred
            let metadata = match tokio::fs::metadata(&entry_path).await {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!("skipping {:?}: {}", &entry_path, &error);
                    continue;
                }
            };
            if metadata.is_dir() {
                nodes.push(Node::Directory(Box::new(LocalDirectory { path, title })));
            } else if metadata.is_file() {
                nodes.push(Node::File(Box::new(LocalFile::from_metadata(
                    path, title, &metadata,
                ))));
            } else {
                tracing::debug!("skipping special file {:?}", &entry_path);
            }
        }
        storage::sort_listing(&mut nodes);
        Ok(nodes)
    }

    async fn create_directory(&self, title: &str) -> Result<Box<dyn Directory>> {
        let path = self.child(title);
        tokio::fs::create_dir(&path)
            .await
            .io_context(|| format!("cannot create directory {:?}", &path))?;
        Ok(Box::new(LocalDirectory {
            path: path.to_string_lossy().into_owned(),
            title: title.to_owned(),
        }))
    }

    async fn create_file_from_stream(
        &self,
        title: &str,
        mut source: ReadStream,
        mtime: Timestamp,
        _birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let path = self.child(title);
        let mut writer = tokio::fs::File::create(&path)
            .await
            .io_context(|| format!("cannot open {:?} for writing", &path))?;
        tokio::io::copy(&mut source, &mut writer)
            .await
            .io_context(|| format!("failed writing {:?}", &path))?;
        writer
            .flush()
            .await
            .io_context(|| format!("failed flushing {:?}", &path))?;
        drop(writer);
        set_times(&path, mtime).await?;
        Ok(Box::new(LocalFile::open(&path).await?))
    }

    async fn open_write_sink(&self, title: &str) -> Result<(Box<dyn File>, WriteSink)> {
        let path = self.child(title);
        let writer = tokio::fs::File::create(&path)
            .await
            .io_context(|| format!("cannot open {:?} for writing", &path))?;
        let file = LocalFile::open(&path).await?;
        Ok((Box::new(file), Box::new(writer)))
    }

    async fn delete(&self) -> Result<()> {
        remove_with_retry(self.fs_path(), true).await
    }
}
