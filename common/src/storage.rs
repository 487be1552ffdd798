//! Storage abstraction shared by all backends
//!
//! A backend exposes its contents as [`Node`]s: either a [`File`] or a [`Directory`] handle.
//! Every operation is present on every backend; a backend that cannot perform one returns
//! [`Error::NotSupported`] instead of silently doing nothing. The only exception is the dry-run
//! backend, whose mutations are simulated by design.
//!
//! Backend identity is a tag comparison over the closed set of [`BackendKind`]s, and the
//! streaming capabilities of each kind are fixed:
//!
//! | kind    | streaming read | streaming write |
//! |---------|----------------|-----------------|
//! | local   | yes            | yes             |
//! | remote  | no             | no              |
//! | dry-run | no             | no              |

use async_trait::async_trait;
use chrono::SubsecRound;

use crate::error::{Error, Result};

/// Timestamps are UTC and always normalized with [`normalize_time`] before comparison.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Truncate to millisecond resolution, the finest resolution every backend can store.
#[must_use]
pub fn normalize_time(time: Timestamp) -> Timestamp {
    time.trunc_subsecs(3)
}

#[must_use]
pub fn now() -> Timestamp {
    normalize_time(chrono::Utc::now())
}

pub type ReadStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;
pub type WriteSink = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BackendKind {
    Local,
    Remote,
    DryRun,
}

impl BackendKind {
    #[must_use]
    pub fn supports_streaming_read(self) -> bool {
        matches!(self, BackendKind::Local)
    }

    #[must_use]
    pub fn supports_streaming_write(self) -> bool {
        matches!(self, BackendKind::Local)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
            BackendKind::DryRun => "dry-run",
        };
        write!(f, "{name}")
    }
}

/// Backend-specific address of a directory, used by same-backend copies to name the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    Local(std::path::PathBuf),
    Remote(String),
    DryRun,
}

#[async_trait]
pub trait File: Send + Sync + std::fmt::Debug {
    fn title(&self) -> &str;
    fn path(&self) -> &str;
    fn backend(&self) -> BackendKind;
    fn size(&self) -> Result<u64>;
    fn mtime(&self) -> Result<Timestamp>;
    fn birthtime(&self) -> Result<Timestamp>;
    async fn content_hash(&self) -> Result<String>;
    /// Open a stream over the file contents (requires streaming reads).
    async fn open_read(&self) -> Result<ReadStream>;
    /// Write the whole file contents into `sink`, returning the number of bytes written.
    async fn write_to(&self, sink: &mut WriteSink) -> Result<u64>;
    /// Copy this file into `dest` on the same backend.
    async fn copy_to(
        &self,
        dest: &dyn Directory,
        mtime: Timestamp,
        birthtime: Timestamp,
    ) -> Result<Box<dyn File>>;
    /// Replace the contents of this file with everything read from `source`.
    async fn update_from_stream(&self, source: ReadStream, mtime: Timestamp)
    -> Result<Box<dyn File>>;
    async fn set_modified(&self, mtime: Timestamp) -> Result<Box<dyn File>>;
    async fn delete(&self) -> Result<()>;
}

#[async_trait]
pub trait Directory: Send + Sync + std::fmt::Debug {
    fn title(&self) -> &str;
    fn path(&self) -> &str;
    fn backend(&self) -> BackendKind;
    fn locator(&self) -> Locator;
    /// Path of a (possibly not yet existing) entry named `title` inside this directory.
    fn child_path(&self, title: &str) -> String;
    /// Fresh listing of this directory, sorted with [`sort_listing`], trashed entries excluded.
    async fn list(&self) -> Result<Vec<Node>>;
    async fn create_directory(&self, title: &str) -> Result<Box<dyn Directory>>;
    async fn create_file_from_stream(
        &self,
        title: &str,
        source: ReadStream,
        mtime: Timestamp,
        birthtime: Timestamp,
    ) -> Result<Box<dyn File>>;
    /// Create (or truncate) `title` and return it along with a sink for its contents.
    async fn open_write_sink(&self, title: &str) -> Result<(Box<dyn File>, WriteSink)>;
    /// Delete this directory and everything below it.
    async fn delete(&self) -> Result<()>;
}

#[derive(Debug)]
pub enum Node {
    File(Box<dyn File>),
    Directory(Box<dyn Directory>),
}

impl Node {
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Node::File(file) => file.title(),
            Node::Directory(dir) => dir.title(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Node::File(file) => file.path(),
            Node::Directory(dir) => dir.path(),
        }
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        match self {
            Node::File(file) => file.backend(),
            Node::Directory(dir) => dir.backend(),
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }
}

#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn supports_streaming_read(&self) -> bool {
        self.kind().supports_streaming_read()
    }

    fn supports_streaming_write(&self) -> bool {
        self.kind().supports_streaming_write()
    }

    /// Resolve `path` to a node, `None` if nothing (or only a trashed entry) lives there.
    async fn find(&self, path: &str) -> Result<Option<Node>>;

    async fn list(&self, dir: &dyn Directory) -> Result<Vec<Node>> {
        if dir.backend() != self.kind() {
            return Err(Error::FatalPath(format!(
                "{:?} belongs to the {} backend, not {}",
                dir.path(),
                dir.backend(),
                self.kind()
            )));
        }
        dir.list().await
    }
}

/// Directories first, then files; each group ordered by title.
pub fn sort_listing(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| a.title().cmp(b.title()))
    });
}

/// Join a directory path and an entry title with a single `/`.
#[must_use]
pub fn join_path(dir: &str, title: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{title}")
    } else {
        format!("{dir}/{title}")
    }
}

/// Split a path into its parent and last segment, keeping a `scheme://` or `/` root intact.
///
/// Trailing slashes are ignored; a bare relative name has `.` as its parent.
#[must_use]
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with(':') {
        return None;
    }
    match trimmed.rfind('/') {
        None => Some((".", trimmed)),
        Some(idx) => {
            let title = &trimmed[idx + 1..];
            let parent = &trimmed[..idx];
            if parent.is_empty() || parent.ends_with(":/") {
                Some((&trimmed[..=idx], title))
            } else {
                Some((parent, title))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_by_kind() {
        assert!(BackendKind::Local.supports_streaming_read());
        assert!(BackendKind::Local.supports_streaming_write());
        assert!(!BackendKind::Remote.supports_streaming_read());
        assert!(!BackendKind::Remote.supports_streaming_write());
        assert!(!BackendKind::DryRun.supports_streaming_read());
        assert!(!BackendKind::DryRun.supports_streaming_write());
    }

    #[test]
    fn split_keeps_roots() {
        assert_eq!(split_path("/tmp/x"), Some(("/tmp", "x")));
        assert_eq!(split_path("/tmp/x/"), Some(("/tmp", "x")));
        assert_eq!(split_path("/x"), Some(("/", "x")));
        assert_eq!(split_path("x"), Some((".", "x")));
        assert_eq!(split_path("googledrive://a"), Some(("googledrive://", "a")));
        assert_eq!(split_path("googledrive://a/b"), Some(("googledrive://a", "b")));
        assert_eq!(split_path("googledrive://"), None);
        assert_eq!(split_path("/"), None);
    }

    #[test]
    fn join_adds_single_separator() {
        assert_eq!(join_path("googledrive://", "a"), "googledrive://a");
        assert_eq!(join_path("googledrive://a", "b"), "googledrive://a/b");
        assert_eq!(join_path("dir/", "b"), "dir/b");
    }

    #[test]
    fn normalization_drops_sub_millisecond_precision() {
        let time = chrono::DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let normalized = normalize_time(time);
        assert_eq!(normalized.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(normalize_time(normalized), normalized);
    }
}
