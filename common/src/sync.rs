//! The reconciler: walks a source tree and brings a destination tree in line with it
//!
//! Traversal is sequential and depth-first. At every directory level the destination listing is
//! taken before any mutation, source entries claim their same-titled destination counterparts,
//! and whatever is left on the destination side is extraneous.

use std::collections::BTreeMap;

use async_recursion::async_recursion;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::backends::Backends;
use crate::dry_run::DryRunBackend;
use crate::error::{Error, IoContext, Result};
use crate::options::{Decision, FileFacts, SyncOptions};
use crate::report::{Action, ActionRecord, Report};
use crate::storage::{self, Directory, File, Node};

pub struct Reconciler<'a> {
    backends: &'a Backends,
    options: &'a SyncOptions,
    dry_run: DryRunBackend,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(backends: &'a Backends, options: &'a SyncOptions) -> Self {
        Self {
            backends,
            options,
            dry_run: DryRunBackend::new(),
        }
    }

    /// Reconcile every source root, in order, into `dest`.
    ///
    /// A source ending in `/` means "the contents of" that directory; without it the directory
    /// itself is placed under `dest`. Fatal errors (missing source, unusable destination) abort
    /// the run, everything else is collected in the returned [`Report`].
    #[instrument(skip(self))]
    pub async fn run(&self, sources: &[String], dest: &str) -> Result<Report> {
        let mut report = Report::default();
        for source in sources {
            self.sync_root(source, dest, &mut report).await?;
        }
        Ok(report)
    }

    /// Reconcile the contents of `src` into `dest`.
    pub async fn sync_directory(&self, src: &dyn Directory, dest: &dyn Directory) -> Report {
        let mut report = Report::default();
        self.reconcile_contents(src, dest, &mut report).await;
        report
    }

    fn record(&self, report: &mut Report, record: ActionRecord) {
        self.options.log_action(&record);
        report.record(record);
    }

    fn fail(&self, report: &mut Report, path: &str, error: Error) {
        self.options.report_error(path, &error);
        report.error(path, error);
    }

    async fn sync_root(&self, source: &str, dest: &str, report: &mut Report) -> Result<()> {
        let backend = self.backends.resolve(source).await?;
        let node = backend
            .find(source)
            .await?
            .ok_or_else(|| Error::FatalPath(format!("file or directory {source:?} not found")))?;
        match node {
            Node::Directory(src) => {
                if !self.options.descends() {
                    self.record(
                        report,
                        ActionRecord::new(src.path(), src.title(), true, Action::Skipped),
                    );
                    return Ok(());
                }
                let Some(dest_root) = self.destination_root(dest, report).await? else {
                    tracing::debug!("destination {:?} is missing, nothing to update", dest);
                    return Ok(());
                };
                let contents_only = source.ends_with('/');
                if contents_only {
                    self.reconcile_contents(src.as_ref(), dest_root.as_ref(), report)
                        .await;
                    return Ok(());
                }
                let Some(target) = self
                    .nested_directory(src.title(), dest_root.as_ref(), report)
                    .await?
                else {
                    return Ok(());
                };
                // directory-only mode stops at the directory itself
                if !self.options.dirs() {
                    self.reconcile_contents(src.as_ref(), target.as_ref(), report)
                        .await;
                }
                Ok(())
            }
            Node::File(src) => {
                let Some(dest_dir) = self.destination_root(dest, report).await? else {
                    tracing::debug!("destination {:?} is missing, nothing to update", dest);
                    return Ok(());
                };
                let existing = match self.find_child(dest_dir.as_ref(), src.title()).await? {
                    Some(Node::File(file)) => Some(file),
                    Some(Node::Directory(dir)) => {
                        return Err(Error::FatalPath(format!(
                            "cannot overwrite directory {:?} with a file",
                            dir.path()
                        )));
                    }
                    None => None,
                };
                let outcome = self
                    .transfer_file(src.as_ref(), dest_dir.as_ref(), existing, report)
                    .await;
                self.remove_source(src.as_ref(), outcome, report).await;
                Ok(())
            }
        }
    }

    async fn find_child(&self, dir: &dyn Directory, title: &str) -> Result<Option<Node>> {
        if dir.backend() == storage::BackendKind::DryRun {
            return Ok(None);
        }
        let path = dir.child_path(title);
        self.backends.resolve(&path).await?.find(&path).await
    }

    /// Resolve the destination root, creating it under its parent when missing.
    ///
    /// Returns `None` only in existing-only mode, where a missing destination is left alone.
    async fn destination_root(
        &self,
        dest: &str,
        report: &mut Report,
    ) -> Result<Option<Box<dyn Directory>>> {
        let backend = self.backends.resolve(dest).await?;
        match backend.find(dest).await? {
            Some(Node::Directory(dir)) => return Ok(Some(dir)),
            Some(Node::File(_)) => {
                return Err(Error::FatalPath(format!(
                    "destination {dest:?} is not a directory"
                )));
            }
            None if self.options.existing() => return Ok(None),
            None => {}
        }
        let cannot_find = || Error::FatalPath(format!("cannot find destination directory {dest:?}"));
        let (parent, title) = storage::split_path(dest).ok_or_else(cannot_find)?;
        let parent_dir = match backend.find(parent).await? {
            Some(Node::Directory(dir)) => dir,
            _ => return Err(cannot_find()),
        };
        let created = if self.options.dry_run() {
            self.dry_run.directory(&parent_dir.child_path(title))
        } else {
            parent_dir.create_directory(title).await.map_err(|error| {
                Error::FatalPath(format!(
                    "cannot create destination directory {dest:?}: {error}"
                ))
            })?
        };
        self.record(
            report,
            ActionRecord::new(created.path(), created.title(), true, Action::Created),
        );
        Ok(Some(created))
    }

    /// The directory named `title` under the destination root, created unless existing-only.
    async fn nested_directory(
        &self,
        title: &str,
        dest_root: &dyn Directory,
        report: &mut Report,
    ) -> Result<Option<Box<dyn Directory>>> {
        match self.find_child(dest_root, title).await? {
            Some(Node::Directory(dir)) => Ok(Some(dir)),
            Some(Node::File(file)) => Err(Error::FatalPath(format!(
                "cannot create directory {:?}: a file is in the way",
                file.path()
            ))),
            None if self.options.existing() => Ok(None),
            None => self
                .create_directory(dest_root, title, report)
                .await
                .map(Some)
                .map_err(|error| {
                    Error::FatalPath(format!(
                        "cannot create directory {:?}: {}",
                        dest_root.child_path(title),
                        error
                    ))
                }),
        }
    }

    async fn create_directory(
        &self,
        parent: &dyn Directory,
        title: &str,
        report: &mut Report,
    ) -> Result<Box<dyn Directory>> {
        let created = if self.options.dry_run() {
            self.dry_run.directory(&parent.child_path(title))
        } else {
            parent.create_directory(title).await?
        };
        self.record(
            report,
            ActionRecord::new(created.path(), created.title(), true, Action::Created),
        );
        Ok(created)
    }

    #[instrument(skip_all, fields(src = src.path(), dest = dest.path()))]
    #[async_recursion]
    async fn reconcile_contents(
        &self,
        src: &dyn Directory,
        dest: &dyn Directory,
        report: &mut Report,
    ) {
        let dest_entries = match dest.list().await {
            Ok(entries) => entries,
            Err(error) => {
                self.fail(report, dest.path(), error);
                return;
            }
        };
        let mut dest_dirs: BTreeMap<String, Vec<Box<dyn Directory>>> = BTreeMap::new();
        let mut dest_files: BTreeMap<String, Vec<Box<dyn File>>> = BTreeMap::new();
        for entry in dest_entries {
            match entry {
                Node::Directory(dir) => dest_dirs
                    .entry(dir.title().to_owned())
                    .or_default()
                    .push(dir),
                Node::File(file) => dest_files
                    .entry(file.title().to_owned())
                    .or_default()
                    .push(file),
            }
        }
        let src_entries = match src.list().await {
            Ok(entries) => entries,
            Err(error) => {
                self.fail(report, src.path(), error);
                return;
            }
        };
        for entry in src_entries {
            match entry {
                Node::Directory(src_dir) => {
                    let existing = dest_dirs
                        .remove(src_dir.title())
                        .and_then(|dirs| dirs.into_iter().next());
                    let target = match existing {
                        Some(dir) => dir,
                        None if self.options.existing() => continue,
                        None => {
                            let in_the_way = dest_files
                                .remove(src_dir.title())
                                .into_iter()
                                .flatten()
                                .map(Node::File)
                                .collect();
                            if !self.clear_conflicts(in_the_way, true, report).await {
                                continue;
                            }
                            match self.create_directory(dest, src_dir.title(), report).await {
                                Ok(dir) => dir,
                                Err(error) => {
                                    self.fail(report, &dest.child_path(src_dir.title()), error);
                                    continue;
                                }
                            }
                        }
                    };
                    if !self.options.dirs() {
                        self.reconcile_contents(src_dir.as_ref(), target.as_ref(), report)
                            .await;
                    }
                }
                Node::File(src_file) => {
                    let existing = dest_files
                        .remove(src_file.title())
                        .and_then(|files| files.into_iter().next());
                    if existing.is_none() && !self.options.existing() {
                        let in_the_way = dest_dirs
                            .remove(src_file.title())
                            .into_iter()
                            .flatten()
                            .map(Node::Directory)
                            .collect();
                        if !self.clear_conflicts(in_the_way, false, report).await {
                            continue;
                        }
                    }
                    let outcome = self
                        .transfer_file(src_file.as_ref(), dest, existing, report)
                        .await;
                    self.remove_source(src_file.as_ref(), outcome, report).await;
                }
            }
        }
        let action = self.options.extraneous_action();
        let mutate = action == Action::Deleted && !self.options.dry_run();
        for dir in dest_dirs.into_values().flatten() {
            let deleted = if mutate { dir.delete().await } else { Ok(()) };
            if let Err(error) = deleted {
                self.fail(report, dir.path(), error);
                continue;
            }
            self.record(report, ActionRecord::new(dir.path(), dir.title(), true, action));
        }
        for file in dest_files.into_values().flatten() {
            let deleted = if mutate { file.delete().await } else { Ok(()) };
            if let Err(error) = deleted {
                self.fail(report, file.path(), error);
                continue;
            }
            self.record(
                report,
                ActionRecord::new(file.path(), file.title(), false, action),
            );
        }
    }

    /// Remove destination entries of the other kind that hold the title a source entry needs.
    ///
    /// Without delete the source entry fails instead; returns whether it may proceed.
    async fn clear_conflicts(
        &self,
        in_the_way: Vec<Node>,
        replacement_is_dir: bool,
        report: &mut Report,
    ) -> bool {
        for node in in_the_way {
            if !self.options.delete() {
                let kind = if replacement_is_dir { "directory" } else { "file" };
                let error = Error::io(
                    format!("cannot replace {:?} with a {kind}", node.path()),
                    std::io::Error::from(std::io::ErrorKind::AlreadyExists),
                );
                self.fail(report, node.path(), error);
                return false;
            }
            let deleted = match &node {
                _ if self.options.dry_run() => Ok(()),
                Node::File(file) => file.delete().await,
                Node::Directory(dir) => dir.delete().await,
            };
            if let Err(error) = deleted {
                self.fail(report, node.path(), error);
                return false;
            }
            self.record(
                report,
                ActionRecord::new(node.path(), node.title(), node.is_dir(), Action::Deleted),
            );
        }
        true
    }

    /// Size and times of `file`, plus its content hash when checksums are compared.
    async fn facts(&self, file: &dyn File, compared: bool) -> Result<FileFacts> {
        let hash = if compared && self.options.needs_checksum() {
            Some(file.content_hash().await?)
        } else {
            None
        };
        Ok(FileFacts {
            size: file.size()?,
            mtime: file.mtime()?,
            hash,
        })
    }

    /// Apply the per-file decision; returns the action taken when the file was written.
    #[instrument(skip_all, fields(src = src.path(), dest = dest_dir.path()))]
    async fn transfer_file(
        &self,
        src: &dyn File,
        dest_dir: &dyn Directory,
        existing: Option<Box<dyn File>>,
        report: &mut Report,
    ) -> Option<Action> {
        let target_path = match &existing {
            Some(file) => file.path().to_owned(),
            None => dest_dir.child_path(src.title()),
        };
        let src_facts = match self.facts(src, existing.is_some()).await {
            Ok(facts) => facts,
            Err(error) => {
                self.fail(report, src.path(), error);
                return None;
            }
        };
        let dest_facts = match &existing {
            Some(file) if self.options.within_size_limits(src_facts.size) => {
                match self.facts(file.as_ref(), true).await {
                    Ok(facts) => Some(facts),
                    Err(error) => {
                        self.fail(report, file.path(), error);
                        return None;
                    }
                }
            }
            _ => None,
        };
        let decision = self.options.decide(&src_facts, dest_facts.as_ref());
        let result = match (decision, existing) {
            (Decision::Skip(reason), _) => {
                tracing::debug!("skipping {:?}: {:?}", src.path(), reason);
                self.record(
                    report,
                    ActionRecord::new(target_path, src.title(), false, Action::Skipped),
                );
                return None;
            }
            (Decision::Create, _) | (Decision::Update, None) => self
                .create_file(src, dest_dir)
                .await
                .map(|file| (file, Action::Created)),
            (Decision::Update, Some(existing)) => self
                .update_file(src, dest_dir, existing.as_ref())
                .await
                .map(|file| (file, Action::Updated)),
        };
        match result {
            Ok((file, action)) => {
                if !self.options.dry_run() {
                    report.add_bytes(src_facts.size);
                }
                self.record(
                    report,
                    ActionRecord::new(file.path(), file.title(), false, action),
                );
                Some(action)
            }
            Err(error) => {
                self.fail(report, &target_path, error);
                None
            }
        }
    }

    fn timestamps(&self, src: &dyn File) -> Result<(storage::Timestamp, storage::Timestamp)> {
        if self.options.preserve_times() {
            Ok((src.mtime()?, src.birthtime()?))
        } else {
            let now = storage::now();
            Ok((now, now))
        }
    }

    async fn create_file(&self, src: &dyn File, dest_dir: &dyn Directory) -> Result<Box<dyn File>> {
        if self.options.dry_run() {
            return Ok(self.dry_run.file(&dest_dir.child_path(src.title())));
        }
        let (mtime, birthtime) = self.timestamps(src)?;
        if src.backend() == dest_dir.backend() {
            return src.copy_to(dest_dir, mtime, birthtime).await;
        }
        if src.backend().supports_streaming_read() {
            let stream = src.open_read().await?;
            return dest_dir
                .create_file_from_stream(src.title(), stream, mtime, birthtime)
                .await;
        }
        if dest_dir.backend().supports_streaming_write() {
            let (created, mut sink) = dest_dir.open_write_sink(src.title()).await?;
            src.write_to(&mut sink).await?;
            sink.shutdown()
                .await
                .io_context(|| format!("failed closing {:?}", created.path()))?;
            drop(sink);
            return created.set_modified(mtime).await;
        }
        Err(Error::not_supported(dest_dir.backend(), "streaming writes"))
    }

    async fn update_file(
        &self,
        src: &dyn File,
        dest_dir: &dyn Directory,
        existing: &dyn File,
    ) -> Result<Box<dyn File>> {
        if self.options.dry_run() {
            return Ok(self.dry_run.file(existing.path()));
        }
        let (mtime, birthtime) = self.timestamps(src)?;
        if src.backend().supports_streaming_read() {
            let stream = src.open_read().await?;
            return existing.update_from_stream(stream, mtime).await;
        }
        if src.backend() == dest_dir.backend() {
            // copies on non-streaming backends land in a new object next to the stale one
            let copied = src.copy_to(dest_dir, mtime, birthtime).await?;
            existing.delete().await?;
            return Ok(copied);
        }
        if dest_dir.backend().supports_streaming_write() {
            let (updated, mut sink) = dest_dir.open_write_sink(src.title()).await?;
            src.write_to(&mut sink).await?;
            sink.shutdown()
                .await
                .io_context(|| format!("failed closing {:?}", updated.path()))?;
            drop(sink);
            return updated.set_modified(mtime).await;
        }
        Err(Error::not_supported(dest_dir.backend(), "streaming writes"))
    }

    async fn remove_source(&self, src: &dyn File, outcome: Option<Action>, report: &mut Report) {
        if !self.options.remove_source_files() || outcome.is_none() {
            return;
        }
        let deleted = if self.options.dry_run() {
            Ok(())
        } else {
            src.delete().await
        };
        if let Err(error) = deleted {
            self.fail(report, src.path(), error);
            return;
        }
        self.record(
            report,
            ActionRecord::new(src.path(), src.title(), false, Action::Deleted),
        );
    }
}
