//! Validated, time-ordered view of one project's history.
//!
//! Every analyzer consumes the same [`Snapshot`]. Building it is where
//! malformed records are dropped, so the analyzers themselves never see a
//! commit without a hash or a change without a path.

use std::collections::{HashMap, HashSet};

use changepulse_core::{
    Budget, CommitRecord, EventBatch, EventSource, FileChange, Metrics, ProjectId, PulseError,
};
use chrono::DateTime;
use serde::Serialize;
use tracing::debug;

/// A commit together with the files it touched.
///
/// # Examples
///
/// ```
/// use changepulse_patterns::snapshot::Commit;
///
/// let commit = Commit {
///     sha: "abc123".into(),
///     author: "alice".into(),
///     timestamp: 1_700_000_000,
///     parent_sha: None,
///     changes: vec![],
/// };
/// assert!(commit.files().next().is_none());
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Commit hash.
    pub sha: String,
    /// Author identity.
    pub author: String,
    /// Unix timestamp (seconds, UTC).
    pub timestamp: i64,
    /// First parent, if any.
    pub parent_sha: Option<String>,
    /// Files touched, sorted by path, one entry per path.
    pub changes: Vec<FileChange>,
}

impl Commit {
    /// Paths touched by this commit, in lexical order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.file_path.as_str())
    }
}

/// Immutable input shared by all analyzers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Project the records belong to.
    pub project: ProjectId,
    /// Valid commits ordered by `(timestamp, sha)`.
    pub commits: Vec<Commit>,
    /// Commit and file-change records rejected as malformed.
    pub records_skipped: usize,
}

impl Snapshot {
    /// A snapshot with no history.
    pub fn empty(project: ProjectId) -> Self {
        Self {
            project,
            commits: Vec::new(),
            records_skipped: 0,
        }
    }

    /// Fetch `project` from `source` and validate it.
    ///
    /// # Errors
    ///
    /// Propagates the source's error if the fetch fails.
    pub fn load(source: &dyn EventSource, project: &ProjectId) -> Result<Self, PulseError> {
        let batch = source.fetch(project)?;
        Ok(Self::from_batch(project.clone(), batch))
    }

    /// Validate raw records into a snapshot.
    ///
    /// Skips (and counts) commits with an empty hash or author, a
    /// duplicated hash or a timestamp outside the representable calendar
    /// range, and file changes with an empty commit hash or path,
    /// an unknown commit, or a duplicated `(commit, path)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use changepulse_core::{ChangeType, CommitRecord, EventBatch, FileChange, ProjectId};
    /// use changepulse_patterns::snapshot::Snapshot;
    ///
    /// let batch = EventBatch {
    ///     commits: vec![
    ///         CommitRecord { sha: "c1".into(), author: "alice".into(), timestamp: 10, parent_sha: None },
    ///         CommitRecord { sha: "".into(), author: "bob".into(), timestamp: 20, parent_sha: None },
    ///     ],
    ///     file_changes: vec![FileChange {
    ///         commit_sha: "c1".into(),
    ///         file_path: "a.rs".into(),
    ///         change_type: ChangeType::Added,
    ///         lines_added: 3,
    ///         lines_removed: 0,
    ///     }],
    /// };
    /// let snapshot = Snapshot::from_batch(ProjectId::from("demo"), batch);
    /// assert_eq!(snapshot.commits.len(), 1);
    /// assert_eq!(snapshot.records_skipped, 1);
    /// ```
    pub fn from_batch(project: ProjectId, batch: EventBatch) -> Self {
        let mut skipped = 0usize;
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut commits: Vec<Commit> = Vec::with_capacity(batch.commits.len());

        for record in batch.commits {
            if let Err(reason) = validate_commit(&record, &index) {
                debug!(project = %project, %reason, "skipping commit record");
                skipped += 1;
                continue;
            }
            index.insert(record.sha.clone(), commits.len());
            commits.push(Commit {
                sha: record.sha,
                author: record.author,
                timestamp: record.timestamp,
                parent_sha: record.parent_sha,
                changes: Vec::new(),
            });
        }

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for change in batch.file_changes {
            let slot = match validate_change(&change, &index, &seen) {
                Ok(slot) => slot,
                Err(reason) => {
                    debug!(project = %project, %reason, "skipping file-change record");
                    skipped += 1;
                    continue;
                }
            };
            seen.insert((change.commit_sha.clone(), change.file_path.clone()));
            commits[slot].changes.push(change);
        }

        for commit in &mut commits {
            commit
                .changes
                .sort_by(|a, b| a.file_path.cmp(&b.file_path));
        }
        commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));

        debug!(
            project = %project,
            commits = commits.len(),
            skipped,
            "snapshot built"
        );

        Self {
            project,
            commits,
            records_skipped: skipped,
        }
    }

    /// Number of valid commits.
    pub fn total_commits(&self) -> usize {
        self.commits.len()
    }

    /// Number of valid file changes across all commits.
    pub fn total_changes(&self) -> usize {
        self.commits.iter().map(|c| c.changes.len()).sum()
    }

    /// Metrics seeded with this snapshot's record counts.
    pub fn base_metrics(&self) -> Metrics {
        Metrics::new(self.commits.len(), self.records_skipped)
    }
}

fn validate_commit(record: &CommitRecord, index: &HashMap<String, usize>) -> Result<(), PulseError> {
    if record.sha.trim().is_empty() {
        return Err(PulseError::MalformedRecord("commit without sha".into()));
    }
    if record.author.trim().is_empty() {
        return Err(PulseError::MalformedRecord(format!(
            "commit {} without author",
            record.sha
        )));
    }
    if index.contains_key(&record.sha) {
        return Err(PulseError::MalformedRecord(format!(
            "duplicate commit {}",
            record.sha
        )));
    }
    if DateTime::from_timestamp(record.timestamp, 0).is_none() {
        return Err(PulseError::MalformedRecord(format!(
            "commit {} has out-of-range timestamp {}",
            record.sha, record.timestamp
        )));
    }
    Ok(())
}

fn validate_change(
    change: &FileChange,
    index: &HashMap<String, usize>,
    seen: &HashSet<(String, String)>,
) -> Result<usize, PulseError> {
    if change.commit_sha.trim().is_empty() {
        return Err(PulseError::MalformedRecord(format!(
            "change to {} without commit sha",
            change.file_path
        )));
    }
    if change.file_path.trim().is_empty() {
        return Err(PulseError::MalformedRecord(format!(
            "change in {} without file path",
            change.commit_sha
        )));
    }
    let Some(&slot) = index.get(&change.commit_sha) else {
        return Err(PulseError::MalformedRecord(format!(
            "change to {} references unknown commit {}",
            change.file_path, change.commit_sha
        )));
    };
    if seen.contains(&(change.commit_sha.clone(), change.file_path.clone())) {
        return Err(PulseError::MalformedRecord(format!(
            "duplicate change to {} in {}",
            change.file_path, change.commit_sha
        )));
    }
    Ok(slot)
}

/// Record on `metrics` that `analyzer` ran out of budget.
pub(crate) fn mark_timed_out(metrics: &mut Metrics, analyzer: &'static str, budget: &Budget) {
    let err = PulseError::Timeout {
        analyzer,
        elapsed_ms: budget.elapsed_ms(),
    };
    debug!(analyzer, "budget exhausted, returning partial results");
    metrics.mark_incomplete(err);
}
