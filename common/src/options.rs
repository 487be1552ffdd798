//! Validated sync options and the pure per-item decision functions

use crate::error::{Error, Result};
use crate::report::{Action, ActionRecord};
use crate::storage::Timestamp;

/// Raw flag values as given on the command line, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncFlags {
    pub verbose: bool,
    pub checksum: bool,
    pub size_only: bool,
    pub ignore_times: bool,
    pub update: bool,
    pub recursive: bool,
    pub dirs: bool,
    pub times: bool,
    pub existing: bool,
    pub ignore_existing: bool,
    pub delete: bool,
    pub dry_run: bool,
    pub remove_source_files: bool,
    /// Same as `recursive` plus `times`.
    pub archive: bool,
    pub min_size: Option<String>,
    pub max_size: Option<String>,
}

/// One immutable, validated set of options with every flag interaction already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    verbose: bool,
    checksum: bool,
    size_only: bool,
    ignore_times: bool,
    update: bool,
    recursive: bool,
    dirs: bool,
    preserve_times: bool,
    existing: bool,
    ignore_existing: bool,
    delete: bool,
    dry_run: bool,
    remove_source_files: bool,
    min_size: u64,
    max_size: u64,
}

/// Metadata of one side of a file comparison; `hash` is only gathered in checksum mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileFacts {
    pub size: u64,
    pub mtime: Timestamp,
    pub hash: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    OutsideSizeLimits,
    ExistingOnly,
    IgnoreExisting,
    UpToDate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Create,
    Update,
    Skip(SkipReason),
}

impl SyncOptions {
    pub fn new(flags: &SyncFlags) -> Result<Self> {
        let recursive = flags.recursive || flags.archive;
        let preserve_times = flags.times || flags.archive;
        // recursion already covers everything directory-only mode would do
        let dirs = flags.dirs && !recursive;
        if flags.delete && !(recursive || dirs) {
            return Err(Error::Validation(
                "--delete does not work without --recursive or --dirs".to_string(),
            ));
        }
        let min_size = match &flags.min_size {
            Some(text) => crate::size::parse_size(text)?,
            None => 0,
        };
        let max_size = match &flags.max_size {
            Some(text) => crate::size::parse_size(text)?,
            None => u64::MAX,
        };
        Ok(Self {
            verbose: flags.verbose,
            checksum: flags.checksum,
            size_only: flags.size_only,
            ignore_times: flags.ignore_times,
            update: flags.update,
            recursive,
            dirs,
            preserve_times,
            existing: flags.existing,
            ignore_existing: flags.ignore_existing,
            delete: flags.delete,
            dry_run: flags.dry_run,
            remove_source_files: flags.remove_source_files,
            min_size,
            max_size,
        })
    }

    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    #[must_use]
    pub fn recursive(&self) -> bool {
        self.recursive
    }

    /// Directory-only mode; always off when recursing.
    #[must_use]
    pub fn dirs(&self) -> bool {
        self.dirs
    }

    #[must_use]
    pub fn preserve_times(&self) -> bool {
        self.preserve_times
    }

    #[must_use]
    pub fn existing(&self) -> bool {
        self.existing
    }

    #[must_use]
    pub fn ignore_existing(&self) -> bool {
        self.ignore_existing
    }

    #[must_use]
    pub fn delete(&self) -> bool {
        self.delete
    }

    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    #[must_use]
    pub fn remove_source_files(&self) -> bool {
        self.remove_source_files
    }

    #[must_use]
    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Whether comparisons need content hashes.
    #[must_use]
    pub fn needs_checksum(&self) -> bool {
        self.checksum
    }

    /// Whether directories are descended into at all.
    #[must_use]
    pub fn descends(&self) -> bool {
        self.recursive || self.dirs
    }

    /// Whether a file of `size` bytes lies within `[min_size, max_size]`.
    #[must_use]
    pub fn within_size_limits(&self, size: u64) -> bool {
        size >= self.min_size && size <= self.max_size
    }

    /// Decide whether an existing destination file must be rewritten from `src`.
    #[must_use]
    pub fn should_update(&self, src: &FileFacts, dest: &FileFacts) -> bool {
        if self.update && dest.mtime > src.mtime {
            return false;
        }
        if self.checksum {
            // a side without a hash cannot be proven equal
            match (&src.hash, &dest.hash) {
                (Some(src_hash), Some(dest_hash)) => src_hash != dest_hash,
                _ => true,
            }
        } else if self.size_only {
            src.size != dest.size
        } else if self.ignore_times {
            true
        } else {
            src.size != dest.size || dest.mtime < src.mtime
        }
    }

    /// What to do with a source file given the matching destination file, if any.
    #[must_use]
    pub fn decide(&self, src: &FileFacts, dest: Option<&FileFacts>) -> Decision {
        if !self.within_size_limits(src.size) {
            return Decision::Skip(SkipReason::OutsideSizeLimits);
        }
        match dest {
            None if self.existing => Decision::Skip(SkipReason::ExistingOnly),
            None => Decision::Create,
            Some(_) if self.ignore_existing => Decision::Skip(SkipReason::IgnoreExisting),
            Some(dest) if self.should_update(src, dest) => Decision::Update,
            Some(_) => Decision::Skip(SkipReason::UpToDate),
        }
    }

    /// Action taken for a destination entry with no source counterpart.
    #[must_use]
    pub fn extraneous_action(&self) -> Action {
        if self.delete {
            Action::Deleted
        } else {
            Action::Extraneous
        }
    }

    /// Log hook for every reconciled item.
    pub fn log_action(&self, record: &ActionRecord) {
        if self.verbose {
            tracing::info!("{}", record);
        } else {
            tracing::debug!("{}", record);
        }
    }

    /// Error hook for failures contained to a single item.
    pub fn report_error(&self, path: &str, error: &Error) {
        tracing::error!("[{}] {}: {}", error.kind(), path, error);
    }
}
