//! Object store interface of a cloud drive
//!
//! Objects are addressed by opaque ids and arranged in folders. Deleting only moves an object to
//! the trash; trashed objects keep showing up in [`ObjectStore::children`] with `trashed` set.

use async_trait::async_trait;
use common::storage::{ReadStream, Timestamp, WriteSink};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectMeta {
    pub id: String,
    pub title: String,
    pub folder: bool,
    /// Not reported for provider-native documents.
    pub size: Option<u64>,
    /// Not reported for provider-native documents.
    pub md5: Option<String>,
    pub modified: Timestamp,
    pub created: Timestamp,
    pub trashed: bool,
}

/// Placement and timestamps of a new object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub parent: String,
    pub title: String,
    pub modified: Timestamp,
    pub created: Timestamp,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// The top-level folder.
    async fn root(&self) -> anyhow::Result<ObjectMeta>;

    async fn children(&self, folder_id: &str) -> anyhow::Result<Vec<ObjectMeta>>;

    /// First non-trashed child of `folder_id` named `title` that is (or is not) a folder.
    async fn find_child(
        &self,
        folder_id: &str,
        title: &str,
        folder: bool,
    ) -> anyhow::Result<Option<ObjectMeta>> {
        Ok(self
            .children(folder_id)
            .await?
            .into_iter()
            .find(|meta| meta.title == title && meta.folder == folder && !meta.trashed))
    }

    async fn create_folder(&self, parent_id: &str, title: &str) -> anyhow::Result<ObjectMeta>;

    async fn upload(&self, upload: Upload, source: ReadStream) -> anyhow::Result<ObjectMeta>;

    async fn update_content(
        &self,
        id: &str,
        source: ReadStream,
        modified: Timestamp,
    ) -> anyhow::Result<ObjectMeta>;

    /// Server-side copy of `id` into a new object.
    async fn copy(&self, id: &str, target: Upload) -> anyhow::Result<ObjectMeta>;

    async fn download(&self, id: &str, sink: &mut WriteSink) -> anyhow::Result<u64>;

    async fn set_modified(&self, id: &str, modified: Timestamp) -> anyhow::Result<ObjectMeta>;

    async fn trash(&self, id: &str) -> anyhow::Result<()>;
}
