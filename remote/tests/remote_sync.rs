use std::sync::Arc;

use common::storage::{Backend, Node};
use common::{Action, Backends, Error, Reconciler, Report, SyncFlags, SyncOptions};
use remote::memory::{MemoryStore, ROOT_ID};
use remote::session::{Preconnected, RemoteFactory, Session};
use remote::store::{ObjectMeta, ObjectStore, Upload};
use tracing_test::traced_test;

struct Harness {
    store: Arc<MemoryStore>,
    backends: Backends,
    tmp: tempfile::TempDir,
}

async fn harness() -> anyhow::Result<Harness> {
    let tmp = tempfile::tempdir()?;
    let session_path = tmp.path().join("config.json");
    Session {
        client_id: "id".to_owned(),
        client_secret: "secret".to_owned(),
        ..Default::default()
    }
    .save(&session_path)
    .await?;
    let store = Arc::new(MemoryStore::new());
    let backends = Backends::new().with_factory(Box::new(RemoteFactory::new(
        session_path,
        Box::new(Preconnected(store.clone())),
    )));
    Ok(Harness {
        store,
        backends,
        tmp,
    })
}

impl Harness {
    async fn sync(
        &self,
        flags: SyncFlags,
        sources: &[&str],
        dest: &str,
    ) -> common::Result<Report> {
        let options = SyncOptions::new(&flags)?;
        let sources: Vec<String> = sources.iter().map(|s| (*s).to_owned()).collect();
        Reconciler::new(&self.backends, &options)
            .run(&sources, dest)
            .await
    }

    fn local(&self, name: &str) -> std::path::PathBuf {
        self.tmp.path().join(name)
    }

    fn contents(&self, path: &str) -> Vec<u8> {
        let meta = self.store.lookup(path).unwrap().unwrap();
        self.store.contents(&meta.id).unwrap()
    }
}

fn at(secs: i64) -> common::storage::Timestamp {
    chrono::DateTime::from_timestamp(secs, 0).unwrap()
}

fn archive() -> SyncFlags {
    SyncFlags {
        archive: true,
        ..Default::default()
    }
}

fn write_local(path: &std::path::Path, contents: &str, secs: i64) {
    std::fs::write(path, contents).unwrap();
    let time = filetime::FileTime::from_unix_time(secs, 0);
    filetime::set_file_times(path, time, time).unwrap();
}

fn contents_of(path: &std::path::Path) -> String {
    format!("{}/", path.display())
}

#[tokio::test]
#[traced_test]
async fn local_tree_uploads_to_drive() -> anyhow::Result<()> {
    let h = harness().await?;
    let src = h.local("src");
    std::fs::create_dir_all(src.join("sub"))?;
    write_local(&src.join("a.txt"), "a", 1_600_000_000);
    write_local(&src.join("sub").join("b.txt"), "bb", 1_600_000_100);
    let report = h
        .sync(archive(), &[&contents_of(&src)], "googledrive://backup")
        .await?;
    assert_eq!(
        report.short_actions(),
        vec![
            "backup (created)",
            "sub (created)",
            "b.txt (created)",
            "a.txt (created)"
        ]
    );
    assert_eq!(h.contents("backup/sub/b.txt"), b"bb");
    let uploaded = h.store.lookup("backup/a.txt")?.unwrap();
    assert_eq!(uploaded.modified, at(1_600_000_000));
    assert_eq!(uploaded.size, Some(1));
    // nothing changed, so nothing is transferred again
    let second = h
        .sync(archive(), &[&contents_of(&src)], "googledrive://backup")
        .await?;
    assert_eq!(second.short_actions(), vec!["b.txt (skipped)", "a.txt (skipped)"]);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn changed_local_file_updates_drive_object_in_place() -> anyhow::Result<()> {
    let h = harness().await?;
    let src = h.local("src");
    std::fs::create_dir(&src)?;
    write_local(&src.join("a.txt"), "a", 1_600_000_000);
    h.sync(archive(), &[&contents_of(&src)], "googledrive://backup")
        .await?;
    let before = h.store.lookup("backup/a.txt")?.unwrap();
    write_local(&src.join("a.txt"), "changed", 1_600_000_500);
    let report = h
        .sync(archive(), &[&contents_of(&src)], "googledrive://backup")
        .await?;
    assert_eq!(report.short_actions(), vec!["a.txt (updated)"]);
    let after = h.store.lookup("backup/a.txt")?.unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.modified, at(1_600_000_500));
    assert_eq!(h.contents("backup/a.txt"), b"changed");
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn drive_folder_downloads_to_local() -> anyhow::Result<()> {
    let h = harness().await?;
    let docs = h.store.insert_folder(ROOT_ID, "docs")?;
    h.store
        .insert_file(&docs.id, "x.txt", b"xyz", at(1_650_000_000))?;
    let dest = h.local("out");
    let report = h
        .sync(archive(), &["googledrive://docs/"], &dest.to_string_lossy())
        .await?;
    assert_eq!(
        report.short_actions(),
        vec!["out (created)", "x.txt (created)"]
    );
    assert_eq!(std::fs::read_to_string(dest.join("x.txt"))?, "xyz");
    let metadata = std::fs::metadata(dest.join("x.txt"))?;
    assert_eq!(
        filetime::FileTime::from_last_modification_time(&metadata).unix_seconds(),
        1_650_000_000
    );
    assert_eq!(report.summary.bytes_transferred, 3);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn drive_to_drive_uses_server_side_copies() -> anyhow::Result<()> {
    let h = harness().await?;
    let docs = h.store.insert_folder(ROOT_ID, "docs")?;
    let original = h
        .store
        .insert_file(&docs.id, "x.txt", b"xyz", at(1_650_000_000))?;
    let report = h
        .sync(archive(), &["googledrive://docs"], "googledrive://mirror")
        .await?;
    assert_eq!(
        report.short_actions(),
        vec!["mirror (created)", "docs (created)", "x.txt (created)"]
    );
    assert_eq!(h.contents("mirror/docs/x.txt"), b"xyz");
    // a newer source replaces the copy: the stale object is trashed, a new one copied in
    let stale = h.store.lookup("mirror/docs/x.txt")?.unwrap();
    h.store
        .update_content(
            &original.id,
            Box::new(std::io::Cursor::new(b"newer".to_vec())),
            at(1_660_000_000),
        )
        .await?;
    let report = h
        .sync(archive(), &["googledrive://docs"], "googledrive://mirror")
        .await?;
    assert_eq!(report.short_actions(), vec!["x.txt (updated)"]);
    assert!(h.store.meta(&stale.id)?.trashed);
    assert_eq!(h.contents("mirror/docs/x.txt"), b"newer");
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn extraneous_drive_objects_are_trashed_with_delete() -> anyhow::Result<()> {
    let h = harness().await?;
    let src = h.local("src");
    std::fs::create_dir(&src)?;
    write_local(&src.join("a.txt"), "a", 1_600_000_000);
    let backup = h.store.insert_folder(ROOT_ID, "backup")?;
    let stray = h
        .store
        .insert_file(&backup.id, "stray.txt", b"s", at(1_600_000_000))?;
    let kept = h
        .sync(archive(), &[&contents_of(&src)], "googledrive://backup")
        .await?;
    assert_eq!(
        kept.short_actions(),
        vec!["a.txt (created)", "stray.txt (extraneous)"]
    );
    assert!(!h.store.meta(&stray.id)?.trashed);
    let report = h
        .sync(
            SyncFlags {
                delete: true,
                ..archive()
            },
            &[&contents_of(&src)],
            "googledrive://backup",
        )
        .await?;
    assert_eq!(
        report.short_actions(),
        vec!["a.txt (skipped)", "stray.txt (deleted)"]
    );
    assert!(h.store.meta(&stray.id)?.trashed);
    assert!(h.store.lookup("backup/stray.txt")?.is_none());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn trashed_folder_in_source_path_is_not_found() -> anyhow::Result<()> {
    let h = harness().await?;
    let docs = h.store.insert_folder(ROOT_ID, "docs")?;
    h.store.insert_file(&docs.id, "x.txt", b"x", at(1))?;
    h.store.trash(&docs.id).await?;
    let result = h
        .sync(
            archive(),
            &["googledrive://docs/x.txt"],
            &h.local("out").to_string_lossy(),
        )
        .await;
    assert!(matches!(result, Err(Error::FatalPath(_))));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn no_common_transfer_path_is_a_contained_error() -> anyhow::Result<()> {
    let h = harness().await?;
    let docs = h.store.insert_folder(ROOT_ID, "docs")?;
    h.store.insert_file(&docs.id, "x.txt", b"x", at(1))?;
    h.store.insert_file(&docs.id, "y.txt", b"y", at(1))?;
    let backend = remote::RemoteBackend::new(h.store.clone());
    let Some(Node::Directory(src)) = backend.find("googledrive://docs").await? else {
        panic!("docs should resolve to a directory");
    };
    // a destination that can neither be copied into natively nor stream writes
    let dest = common::dry_run::DryRunBackend::new().directory("elsewhere");
    let options = SyncOptions::new(&SyncFlags {
        recursive: true,
        ..Default::default()
    })?;
    let report = Reconciler::new(&h.backends, &options)
        .sync_directory(src.as_ref(), dest.as_ref())
        .await;
    assert!(report.actions.is_empty());
    assert_eq!(report.errors.len(), 2);
    assert!(
        report
            .errors
            .iter()
            .all(|item| matches!(item.error, Error::NotSupported { .. }))
    );
    let paths: Vec<_> = report.errors.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(paths, vec!["elsewhere/x.txt", "elsewhere/y.txt"]);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn native_documents_fail_alone_in_checksum_mode() -> anyhow::Result<()> {
    let h = harness().await?;
    let docs = h.store.insert_folder(ROOT_ID, "docs")?;
    h.store.insert_document(&docs.id, "notes")?;
    h.store.insert_file(&docs.id, "x.txt", b"x", at(1))?;
    let dest = h.local("out");
    let report = h
        .sync(
            SyncFlags {
                checksum: true,
                ..archive()
            },
            &["googledrive://docs/"],
            &dest.to_string_lossy(),
        )
        .await?;
    assert_eq!(
        report.short_actions(),
        vec!["out (created)", "x.txt (created)"]
    );
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "googledrive://docs/notes");
    assert!(std::fs::exists(dest.join("x.txt"))?);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn missing_session_fails_only_drive_paths() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let backends = Backends::new().with_factory(Box::new(RemoteFactory::new(
        tmp.path().join("config.json"),
        Box::new(Preconnected(Arc::new(MemoryStore::new()))),
    )));
    let options = SyncOptions::new(&archive())?;
    let reconciler = Reconciler::new(&backends, &options);
    let result = reconciler
        .run(&["googledrive://docs/".to_owned()], &tmp.path().to_string_lossy())
        .await;
    assert!(matches!(result, Err(Error::FatalPath(_))));
    let src = tmp.path().join("src");
    std::fs::create_dir(&src)?;
    write_local(&src.join("a.txt"), "a", 1_600_000_000);
    let report = reconciler
        .run(&[contents_of(&src)], &tmp.path().join("dest").to_string_lossy())
        .await?;
    assert_eq!(report.summary.created, 2);
    assert!(report.actions.iter().any(|r| r.action == Action::Created));
    Ok(())
}

/// Drive whose server-side copies always fail.
struct RejectingCopies(Arc<MemoryStore>);

#[async_trait::async_trait]
impl ObjectStore for RejectingCopies {
    async fn root(&self) -> anyhow::Result<ObjectMeta> {
        self.0.root().await
    }

    async fn children(&self, folder_id: &str) -> anyhow::Result<Vec<ObjectMeta>> {
        self.0.children(folder_id).await
    }

    async fn create_folder(&self, parent_id: &str, title: &str) -> anyhow::Result<ObjectMeta> {
        self.0.create_folder(parent_id, title).await
    }

    async fn upload(
        &self,
        upload: Upload,
        source: common::storage::ReadStream,
    ) -> anyhow::Result<ObjectMeta> {
        self.0.upload(upload, source).await
    }

    async fn update_content(
        &self,
        id: &str,
        source: common::storage::ReadStream,
        modified: common::storage::Timestamp,
    ) -> anyhow::Result<ObjectMeta> {
        self.0.update_content(id, source, modified).await
    }

    async fn copy(&self, _id: &str, _target: Upload) -> anyhow::Result<ObjectMeta> {
        Err(anyhow::anyhow!("rate limit exceeded"))
    }

    async fn download(
        &self,
        id: &str,
        sink: &mut common::storage::WriteSink,
    ) -> anyhow::Result<u64> {
        self.0.download(id, sink).await
    }

    async fn set_modified(
        &self,
        id: &str,
        modified: common::storage::Timestamp,
    ) -> anyhow::Result<ObjectMeta> {
        self.0.set_modified(id, modified).await
    }

    async fn trash(&self, id: &str) -> anyhow::Result<()> {
        self.0.trash(id).await
    }
}

#[tokio::test]
#[traced_test]
async fn failed_server_side_copy_keeps_stale_destination() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let session_path = tmp.path().join("config.json");
    Session::default().save(&session_path).await?;
    let store = Arc::new(MemoryStore::new());
    let docs = store.insert_folder(ROOT_ID, "docs")?;
    store.insert_file(&docs.id, "x.txt", b"newer", at(1_660_000_000))?;
    let mirror = store.insert_folder(ROOT_ID, "mirror")?;
    let stale = store.insert_file(&mirror.id, "x.txt", b"old", at(1_650_000_000))?;
    let backends = Backends::new().with_factory(Box::new(RemoteFactory::new(
        session_path,
        Box::new(Preconnected(Arc::new(RejectingCopies(store.clone())))),
    )));
    let options = SyncOptions::new(&SyncFlags {
        recursive: true,
        ..Default::default()
    })?;
    let report = Reconciler::new(&backends, &options)
        .run(&["googledrive://docs/".to_owned()], "googledrive://mirror")
        .await?;
    assert!(report.actions.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0].error, Error::Remote { .. }));
    let kept = store.lookup("mirror/x.txt")?.unwrap();
    assert_eq!(kept.id, stale.id);
    assert!(!kept.trashed);
    assert_eq!(store.contents(&kept.id)?, b"old");
    Ok(())
}
