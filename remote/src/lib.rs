//! Cloud drive backend for gsync
//!
//! Paths look like `googledrive://folder/sub/file`; the bare `googledrive://` is the top-level
//! folder. The drive never hands out streams: files are created and updated with whole-object
//! uploads, copied server-side and downloaded into a sink provided by the other backend.
//!
//! The HTTP client for the hosted drive is plugged in through [`session::Connect`], which turns
//! the persisted [`session::Session`] into an [`store::ObjectStore`]. [`memory::MemoryStore`] is
//! a complete in-process store.

use std::sync::Arc;

use async_trait::async_trait;
use common::error::{Error, Result};
use common::storage::{
    self, Backend, BackendKind, Directory, File, Locator, Node, ReadStream, Timestamp, WriteSink,
};
use tracing::instrument;

pub mod memory;
pub mod session;
pub mod store;

use store::{ObjectMeta, ObjectStore, Upload};

pub const SCHEME: &str = "googledrive://";

#[derive(Clone)]
pub struct RemoteBackend {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RemoteBackend").finish_non_exhaustive()
    }
}

impl RemoteBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn node(&self, meta: ObjectMeta, path: String) -> Node {
        if meta.folder {
            Node::Directory(Box::new(RemoteDirectory::new(self.store.clone(), meta, path)))
        } else {
            Node::File(Box::new(RemoteFile::new(self.store.clone(), meta, path)))
        }
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    /// Walks the path one title at a time. Each segment resolves to a folder first; only the last
    /// segment may fall back to a file. Any missing or trashed segment means "not found".
    #[instrument]
    async fn find(&self, path: &str) -> Result<Option<Node>> {
        let Some(rest) = path.strip_prefix(SCHEME) else {
            return Ok(None);
        };
        let lookup_error =
            |error: anyhow::Error| Error::remote(format!("failed resolving {path:?}"), error);
        let mut folder = self.store.root().await.map_err(lookup_error)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = SCHEME.to_owned();
        for (idx, segment) in segments.iter().enumerate() {
            current = storage::join_path(&current, segment);
            let child = self
                .store
                .find_child(&folder.id, segment, true)
                .await
                .map_err(lookup_error)?;
            let is_last = idx + 1 == segments.len();
            match child {
                Some(dir) if is_last => return Ok(Some(self.node(dir, current))),
                Some(dir) => folder = dir,
                None if is_last => {
                    let file = self
                        .store
                        .find_child(&folder.id, segment, false)
                        .await
                        .map_err(lookup_error)?;
                    return Ok(file.map(|file| self.node(file, current)));
                }
                None => return Ok(None),
            }
        }
        Ok(Some(self.node(folder, SCHEME.to_owned())))
    }
}

pub struct RemoteFile {
    store: Arc<dyn ObjectStore>,
    meta: ObjectMeta,
    path: String,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("id", &self.meta.id)
            .finish_non_exhaustive()
    }
}

impl RemoteFile {
    fn new(store: Arc<dyn ObjectStore>, mut meta: ObjectMeta, path: String) -> Self {
        meta.modified = storage::normalize_time(meta.modified);
        meta.created = storage::normalize_time(meta.created);
        Self { store, meta, path }
    }

    fn wrap(&self, meta: ObjectMeta, path: String) -> Box<dyn File> {
        Box::new(RemoteFile::new(self.store.clone(), meta, path))
    }
}

#[async_trait]
impl File for RemoteFile {
    fn title(&self) -> &str {
        &self.meta.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn size(&self) -> Result<u64> {
        self.meta
            .size
            .ok_or_else(|| Error::not_supported(BackendKind::Remote, "sizes of native documents"))
    }

    fn mtime(&self) -> Result<Timestamp> {
        Ok(self.meta.modified)
    }

    fn birthtime(&self) -> Result<Timestamp> {
        Ok(self.meta.created)
    }

    async fn content_hash(&self) -> Result<String> {
        self.meta.md5.clone().ok_or_else(|| {
            Error::not_supported(BackendKind::Remote, "checksums of native documents")
        })
    }

    async fn open_read(&self) -> Result<ReadStream> {
        Err(Error::not_supported(BackendKind::Remote, "streaming reads"))
    }

    async fn write_to(&self, sink: &mut WriteSink) -> Result<u64> {
        self.store
            .download(&self.meta.id, sink)
            .await
            .map_err(|error| Error::remote(format!("failed downloading {:?}", &self.path), error))
    }

    #[instrument(skip(dest), fields(dest = dest.path()))]
    async fn copy_to(
        &self,
        dest: &dyn Directory,
        mtime: Timestamp,
        birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let Locator::Remote(folder_id) = dest.locator() else {
            return Err(Error::not_supported(
                dest.backend(),
                "copies from the remote backend",
            ));
        };
        let meta = self
            .store
            .copy(
                &self.meta.id,
                Upload {
                    parent: folder_id,
                    title: self.meta.title.clone(),
                    modified: mtime,
                    created: birthtime,
                },
            )
            .await
            .map_err(|error| {
                Error::remote(
                    format!("failed copying {:?} into {:?}", &self.path, dest.path()),
                    error,
                )
            })?;
        Ok(self.wrap(meta, dest.child_path(&self.meta.title)))
    }

    async fn update_from_stream(
        &self,
        source: ReadStream,
        mtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let meta = self
            .store
            .update_content(&self.meta.id, source, mtime)
            .await
            .map_err(|error| Error::remote(format!("failed updating {:?}", &self.path), error))?;
        Ok(self.wrap(meta, self.path.clone()))
    }

    async fn set_modified(&self, mtime: Timestamp) -> Result<Box<dyn File>> {
        let meta = self
            .store
            .set_modified(&self.meta.id, mtime)
            .await
            .map_err(|error| {
                Error::remote(
                    format!("failed setting modification time of {:?}", &self.path),
                    error,
                )
            })?;
        Ok(self.wrap(meta, self.path.clone()))
    }

    async fn delete(&self) -> Result<()> {
        self.store
            .trash(&self.meta.id)
            .await
            .map_err(|error| Error::remote(format!("failed trashing {:?}", &self.path), error))
    }
}

pub struct RemoteDirectory {
    store: Arc<dyn ObjectStore>,
    meta: ObjectMeta,
    path: String,
}

impl std::fmt::Debug for RemoteDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RemoteDirectory")
            .field("path", &self.path)
            .field("id", &self.meta.id)
            .finish_non_exhaustive()
    }
}

impl RemoteDirectory {
    fn new(store: Arc<dyn ObjectStore>, meta: ObjectMeta, path: String) -> Self {
        Self { store, meta, path }
    }
}

#[async_trait]
impl Directory for RemoteDirectory {
    fn title(&self) -> &str {
        &self.meta.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn locator(&self) -> Locator {
        Locator::Remote(self.meta.id.clone())
    }

    fn child_path(&self, title: &str) -> String {
        storage::join_path(&self.path, title)
    }

    #[instrument]
    async fn list(&self) -> Result<Vec<Node>> {
        let children = self
            .store
            .children(&self.meta.id)
            .await
            .map_err(|error| Error::remote(format!("failed listing {:?}", &self.path), error))?;
        let mut nodes: Vec<Node> = children
            .into_iter()
            .filter(|meta| !meta.trashed)
            .map(|meta| {
                let path = self.child_path(&meta.title);
                if meta.folder {
                    Node::Directory(Box::new(RemoteDirectory::new(
                        self.store.clone(),
                        meta,
                        path,
                    )))
                } else {
                    Node::File(Box::new(RemoteFile::new(self.store.clone(), meta, path)))
                }
            })
            .collect();
        storage::sort_listing(&mut nodes);
        Ok(nodes)
    }

    async fn create_directory(&self, title: &str) -> Result<Box<dyn Directory>> {
        let path = self.child_path(title);
        let meta = self
            .store
            .create_folder(&self.meta.id, title)
            .await
            .map_err(|error| Error::remote(format!("failed creating folder {path:?}"), error))?;
        Ok(Box::new(RemoteDirectory::new(self.store.clone(), meta, path)))
    }

    async fn create_file_from_stream(
        &self,
        title: &str,
        source: ReadStream,
        mtime: Timestamp,
        birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        let path = self.child_path(title);
        let meta = self
            .store
            .upload(
                Upload {
                    parent: self.meta.id.clone(),
                    title: title.to_owned(),
                    modified: mtime,
                    created: birthtime,
                },
                source,
            )
            .await
            .map_err(|error| Error::remote(format!("failed uploading {path:?}"), error))?;
        Ok(Box::new(RemoteFile::new(self.store.clone(), meta, path)))
    }

    async fn open_write_sink(&self, _title: &str) -> Result<(Box<dyn File>, WriteSink)> {
        Err(Error::not_supported(BackendKind::Remote, "streaming writes"))
    }

    async fn delete(&self) -> Result<()> {
        self.store
            .trash(&self.meta.id)
            .await
            .map_err(|error| Error::remote(format!("failed trashing {:?}", &self.path), error))
    }
}
