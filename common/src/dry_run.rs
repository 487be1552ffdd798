//! Backend that fabricates the results of mutations instead of performing them
//!
//! Used as the destination of every mutation in dry-run mode, so the reconciler can walk the
//! exact same code path and report the same actions without touching any storage.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::storage::{
    self, Backend, BackendKind, Directory, File, Locator, Node, ReadStream, Timestamp, WriteSink,
};

/// md5 of the empty string, the content hash of every fabricated file.
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn title_from(path: &str) -> String {
    storage::split_path(path)
        .map(|(_, title)| title.to_owned())
        .unwrap_or_else(|| path.to_owned())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBackend;

impl DryRunBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// A fabricated, empty file at `path`, modified now.
    #[must_use]
    pub fn file(&self, path: &str) -> Box<dyn File> {
        Box::new(DryRunFile::new(path, storage::now()))
    }

    #[must_use]
    pub fn directory(&self, path: &str) -> Box<dyn Directory> {
        Box::new(DryRunDirectory {
            path: path.to_owned(),
            title: title_from(path),
        })
    }
}

#[async_trait]
impl Backend for DryRunBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DryRun
    }

    async fn find(&self, _path: &str) -> Result<Option<Node>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct DryRunFile {
    path: String,
    title: String,
    mtime: Timestamp,
}

impl DryRunFile {
    fn new(path: &str, mtime: Timestamp) -> Self {
        Self {
            path: path.to_owned(),
            title: title_from(path),
            mtime,
        }
    }
}

#[async_trait]
impl File for DryRunFile {
    fn title(&self) -> &str {
        &self.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::DryRun
    }

    fn size(&self) -> Result<u64> {
        Ok(0)
    }

    fn mtime(&self) -> Result<Timestamp> {
        Ok(self.mtime)
    }

    fn birthtime(&self) -> Result<Timestamp> {
        Ok(self.mtime)
    }

    async fn content_hash(&self) -> Result<String> {
        Ok(EMPTY_MD5.to_owned())
    }

    async fn open_read(&self) -> Result<ReadStream> {
        Err(Error::not_supported(BackendKind::DryRun, "streaming reads"))
    }

    async fn write_to(&self, _sink: &mut WriteSink) -> Result<u64> {
        Ok(0)
    }

    async fn copy_to(
        &self,
        dest: &dyn Directory,
        mtime: Timestamp,
        _birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        Ok(Box::new(DryRunFile::new(
            &dest.child_path(&self.title),
            mtime,
        )))
    }

    async fn update_from_stream(
        &self,
        _source: ReadStream,
        mtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        Ok(Box::new(DryRunFile::new(&self.path, mtime)))
    }

    async fn set_modified(&self, mtime: Timestamp) -> Result<Box<dyn File>> {
        Ok(Box::new(DryRunFile::new(&self.path, mtime)))
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DryRunDirectory {
    path: String,
    title: String,
}

#[async_trait]
impl Directory for DryRunDirectory {
    fn title(&self) -> &str {
        &self.title
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn backend(&self) -> BackendKind {
        BackendKind::DryRun
    }

    fn locator(&self) -> Locator {
        Locator::DryRun
    }

    fn child_path(&self, title: &str) -> String {
        storage::join_path(&self.path, title)
    }

    async fn list(&self) -> Result<Vec<Node>> {
        Ok(vec![])
    }

    async fn create_directory(&self, title: &str) -> Result<Box<dyn Directory>> {
        Ok(Box::new(DryRunDirectory {
            path: self.child_path(title),
            title: title.to_owned(),
        }))
    }

    async fn create_file_from_stream(
        &self,
        title: &str,
        _source: ReadStream,
        mtime: Timestamp,
        _birthtime: Timestamp,
    ) -> Result<Box<dyn File>> {
        Ok(Box::new(DryRunFile::new(&self.child_path(title), mtime)))
    }

    async fn open_write_sink(&self, _title: &str) -> Result<(Box<dyn File>, WriteSink)> {
        Err(Error::not_supported(BackendKind::DryRun, "streaming writes"))
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}
