//! In-process [`ObjectStore`] with the same observable behavior as the hosted drive

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use common::storage::{self, ReadStream, Timestamp, WriteSink};
use md5::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::store::{ObjectMeta, ObjectStore, Upload};

pub const ROOT_ID: &str = "root";

#[derive(Debug)]
struct Object {
    meta: ObjectMeta,
    parent: Option<String>,
    content: Vec<u8>,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    objects: BTreeMap<String, Object>,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: std::sync::Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn md5_hex(content: &[u8]) -> String {
    hex::encode(md5::Md5::digest(content))
}

async fn read_all(mut source: ReadStream) -> anyhow::Result<Vec<u8>> {
    let mut content = vec![];
    source
        .read_to_end(&mut content)
        .await
        .context("failed reading upload source")?;
    Ok(content)
}

impl State {
    fn object(&self, id: &str) -> anyhow::Result<&Object> {
        self.objects
            .get(id)
            .ok_or_else(|| anyhow!("object {id:?} not found"))
    }

    fn object_mut(&mut self, id: &str) -> anyhow::Result<&mut Object> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| anyhow!("object {id:?} not found"))
    }

    fn folder(&self, id: &str) -> anyhow::Result<&Object> {
        let object = self.object(id)?;
        if !object.meta.folder {
            return Err(anyhow!("object {id:?} is not a folder"));
        }
        Ok(object)
    }

    fn insert(&mut self, parent: &str, mut meta: ObjectMeta, content: Vec<u8>) -> ObjectMeta {
        self.next_id += 1;
        meta.id = format!("obj{}", self.next_id);
        meta.modified = storage::normalize_time(meta.modified);
        meta.created = storage::normalize_time(meta.created);
        self.objects.insert(
            meta.id.clone(),
            Object {
                meta: meta.clone(),
                parent: Some(parent.to_owned()),
                content,
            },
        );
        meta
    }

    fn insert_file(&mut self, upload: Upload, content: Vec<u8>) -> anyhow::Result<ObjectMeta> {
        self.folder(&upload.parent)?;
        let meta = ObjectMeta {
            id: String::new(),
            title: upload.title,
            folder: false,
            size: Some(content.len() as u64),
            md5: Some(md5_hex(&content)),
            modified: upload.modified,
            created: upload.created,
            trashed: false,
        };
        Ok(self.insert(&upload.parent, meta, content))
    }

    fn trash(&mut self, id: &str) {
        let children: Vec<String> = self
            .objects
            .values()
            .filter(|object| object.parent.as_deref() == Some(id))
            .map(|object| object.meta.id.clone())
            .collect();
        if let Some(object) = self.objects.get_mut(id) {
            object.meta.trashed = true;
        }
        for child in children {
            self.trash(&child);
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let now = storage::now();
        let root = Object {
            meta: ObjectMeta {
                id: ROOT_ID.to_owned(),
                title: String::new(),
                folder: true,
                size: None,
                md5: None,
                modified: now,
                created: now,
                trashed: false,
            },
            parent: None,
            content: vec![],
        };
        Self {
            state: std::sync::Mutex::new(State {
                next_id: 0,
                objects: BTreeMap::from([(ROOT_ID.to_owned(), root)]),
            }),
        }
    }

    fn state(&self) -> anyhow::Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Add a folder directly, bypassing the async interface.
    pub fn insert_folder(&self, parent: &str, title: &str) -> anyhow::Result<ObjectMeta> {
        let mut state = self.state()?;
        state.folder(parent)?;
        let now = storage::now();
        let meta = ObjectMeta {
            id: String::new(),
            title: title.to_owned(),
            folder: true,
            size: None,
            md5: None,
            modified: now,
            created: now,
            trashed: false,
        };
        Ok(state.insert(parent, meta, vec![]))
    }

    /// Add a file directly, bypassing the async interface.
    pub fn insert_file(
        &self,
        parent: &str,
        title: &str,
        content: &[u8],
        modified: Timestamp,
    ) -> anyhow::Result<ObjectMeta> {
        self.state()?.insert_file(
            Upload {
                parent: parent.to_owned(),
                title: title.to_owned(),
                modified,
                created: modified,
            },
            content.to_vec(),
        )
    }

    /// Add a provider-native document, which reports neither a size nor a checksum.
    pub fn insert_document(&self, parent: &str, title: &str) -> anyhow::Result<ObjectMeta> {
        let mut state = self.state()?;
        state.folder(parent)?;
        let now = storage::now();
        let meta = ObjectMeta {
            id: String::new(),
            title: title.to_owned(),
            folder: false,
            size: None,
            md5: None,
            modified: now,
            created: now,
            trashed: false,
        };
        Ok(state.insert(parent, meta, vec![]))
    }

    pub fn contents(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.state()?.object(id)?.content.clone())
    }

    pub fn meta(&self, id: &str) -> anyhow::Result<ObjectMeta> {
        Ok(self.state()?.object(id)?.meta.clone())
    }

    /// Resolve a `/`-separated path of titles from the root, ignoring trashed objects.
    pub fn lookup(&self, path: &str) -> anyhow::Result<Option<ObjectMeta>> {
        let state = self.state()?;
        let mut current = state.object(ROOT_ID)?.meta.clone();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let next = state.objects.values().find(|object| {
                object.parent.as_deref() == Some(current.id.as_str())
                    && object.meta.title == segment
                    && !object.meta.trashed
            });
            match next {
                Some(object) => current = object.meta.clone(),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn root(&self) -> anyhow::Result<ObjectMeta> {
        self.meta(ROOT_ID)
    }

    async fn children(&self, folder_id: &str) -> anyhow::Result<Vec<ObjectMeta>> {
        let state = self.state()?;
        state.folder(folder_id)?;
        Ok(state
            .objects
            .values()
            .filter(|object| object.parent.as_deref() == Some(folder_id))
            .map(|object| object.meta.clone())
            .collect())
    }

    async fn create_folder(&self, parent_id: &str, title: &str) -> anyhow::Result<ObjectMeta> {
        self.insert_folder(parent_id, title)
    }

    async fn upload(&self, upload: Upload, source: ReadStream) -> anyhow::Result<ObjectMeta> {
        let content = read_all(source).await?;
        self.state()?.insert_file(upload, content)
    }

    async fn update_content(
        &self,
        id: &str,
        source: ReadStream,
        modified: Timestamp,
    ) -> anyhow::Result<ObjectMeta> {
        let content = read_all(source).await?;
        let mut state = self.state()?;
        let object = state.object_mut(id)?;
        if object.meta.folder {
            return Err(anyhow!("cannot upload content into folder {id:?}"));
        }
        object.meta.size = Some(content.len() as u64);
        object.meta.md5 = Some(md5_hex(&content));
        object.meta.modified = storage::normalize_time(modified);
        object.content = content;
        Ok(object.meta.clone())
    }

    async fn copy(&self, id: &str, target: Upload) -> anyhow::Result<ObjectMeta> {
        let mut state = self.state()?;
        let source = state.object(id)?;
        if source.meta.folder {
            return Err(anyhow!("cannot copy folder {id:?}"));
        }
        let content = source.content.clone();
        state.insert_file(target, content)
    }

    async fn download(&self, id: &str, sink: &mut WriteSink) -> anyhow::Result<u64> {
        let content = self.contents(id)?;
        sink.write_all(&content)
            .await
            .with_context(|| format!("failed downloading {id:?}"))?;
        sink.flush().await?;
        Ok(content.len() as u64)
    }

    async fn set_modified(&self, id: &str, modified: Timestamp) -> anyhow::Result<ObjectMeta> {
        let mut state = self.state()?;
        let object = state.object_mut(id)?;
        object.meta.modified = storage::normalize_time(modified);
        Ok(object.meta.clone())
    }

    async fn trash(&self, id: &str) -> anyhow::Result<()> {
        let mut state = self.state()?;
        state.object(id)?;
        if id == ROOT_ID {
            return Err(anyhow!("the root folder cannot be trashed"));
        }
        state.trash(id);
        Ok(())
    }
}
