use crate::error::Error;

/// Outcome of reconciling one item.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Action {
    Created,
    Updated,
    Deleted,
    Skipped,
    Extraneous,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
            Action::Skipped => "skipped",
            Action::Extraneous => "extraneous",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionRecord {
    pub path: String,
    pub title: String,
    pub is_dir: bool,
    pub action: Action,
}

impl ActionRecord {
    pub fn new(
        path: impl Into<String>,
        title: impl Into<String>,
        is_dir: bool,
        action: Action,
    ) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            is_dir,
            action,
        }
    }

    /// `"<title> (<action>)"`, the short form used when comparing runs.
    #[must_use]
    pub fn short(&self) -> String {
        format!("{} ({})", self.title, self.action)
    }
}

impl std::fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{} ({})",
            self.path,
            if self.is_dir { "/" } else { "" },
            self.action
        )
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub extraneous: usize,
    pub errors: usize,
}

impl Summary {
    fn count(&mut self, action: Action) {
        match action {
            Action::Created => self.created += 1,
            Action::Updated => self.updated += 1,
            Action::Deleted => self.deleted += 1,
            Action::Skipped => self.skipped += 1,
            Action::Extraneous => self.extraneous += 1,
        }
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            created: self.created + other.created,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            skipped: self.skipped + other.skipped,
            extraneous: self.extraneous + other.extraneous,
            errors: self.errors + other.errors,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes transferred: {}\n\
            created: {}\n\
            updated: {}\n\
            deleted: {}\n\
            skipped: {}\n\
            extraneous: {}\n\
            errors: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.created,
            self.updated,
            self.deleted,
            self.skipped,
            self.extraneous,
            self.errors,
        )
    }
}

/// A contained failure: the item at `path` was not reconciled.
#[derive(Debug)]
pub struct ItemError {
    pub path: String,
    pub error: Error,
}

/// Everything one run did, in the order it happened.
#[derive(Debug, Default)]
pub struct Report {
    pub actions: Vec<ActionRecord>,
    pub errors: Vec<ItemError>,
    pub summary: Summary,
}

impl Report {
    pub fn record(&mut self, record: ActionRecord) {
        self.summary.count(record.action);
        self.actions.push(record);
    }

    pub fn error(&mut self, path: impl Into<String>, error: Error) {
        self.summary.errors += 1;
        self.errors.push(ItemError {
            path: path.into(),
            error,
        });
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.summary.bytes_transferred += bytes;
    }

    /// Append everything from `other`, keeping order.
    pub fn merge(&mut self, other: Report) {
        self.actions.extend(other.actions);
        self.errors.extend(other.errors);
        self.summary = self.summary + other.summary;
    }

    /// Actions in their short `"<title> (<action>)"` form.
    #[must_use]
    pub fn short_actions(&self) -> Vec<String> {
        self.actions.iter().map(ActionRecord::short).collect()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_display() {
        let file = ActionRecord::new("dest/a.txt", "a.txt", false, Action::Created);
        assert_eq!(file.to_string(), "dest/a.txt (created)");
        assert_eq!(file.short(), "a.txt (created)");
        let dir = ActionRecord::new("dest/sub", "sub", true, Action::Extraneous);
        assert_eq!(dir.to_string(), "dest/sub/ (extraneous)");
    }

    #[test]
    fn summary_counts_and_merges() {
        let mut first = Report::default();
        first.record(ActionRecord::new("a", "a", false, Action::Created));
        first.add_bytes(10);
        let mut second = Report::default();
        second.record(ActionRecord::new("b", "b", false, Action::Skipped));
        second.error("c", Error::FatalPath("gone".into()));
        first.merge(second);
        assert_eq!(first.short_actions(), vec!["a (created)", "b (skipped)"]);
        assert_eq!(first.summary.created, 1);
        assert_eq!(first.summary.skipped, 1);
        assert_eq!(first.summary.errors, 1);
        assert_eq!(first.summary.bytes_transferred, 10);
        assert!(first.has_errors());
    }
}
