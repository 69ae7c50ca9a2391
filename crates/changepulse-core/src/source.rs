//! Data-access boundary between the engine and whatever stores commit history.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::PulseError;
use crate::types::{EventBatch, ProjectId};

/// Supplies commit and file-change records for a project.
///
/// Analyzers receive an implementation by reference instead of reaching
/// for a shared database handle.
pub trait EventSource: Send + Sync {
    /// Fetch every commit and file change recorded for `project`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Source`] if the records cannot be retrieved.
    fn fetch(&self, project: &ProjectId) -> Result<EventBatch, PulseError>;
}

/// In-process [`EventSource`] keyed by project.
///
/// Unknown projects yield an empty batch, which every analyzer treats as
/// "no history" rather than a failure.
///
/// # Examples
///
/// ```
/// use changepulse_core::{CommitRecord, EventBatch, EventSource, MemoryEventSource, ProjectId};
///
/// let source = MemoryEventSource::new();
/// source.insert(
///     ProjectId::from("demo"),
///     EventBatch {
///         commits: vec![CommitRecord {
///             sha: "c1".into(),
///             author: "alice".into(),
///             timestamp: 1_700_000_000,
///             parent_sha: None,
///         }],
///         file_changes: vec![],
///     },
/// );
/// let batch = source.fetch(&ProjectId::from("demo")).unwrap();
/// assert_eq!(batch.commits.len(), 1);
/// assert!(source.fetch(&ProjectId::from("other")).unwrap().commits.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    projects: RwLock<HashMap<ProjectId, EventBatch>>,
}

impl MemoryEventSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the records of `project`.
    pub fn insert(&self, project: ProjectId, batch: EventBatch) {
        let mut projects = match self.projects.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        projects.insert(project, batch);
    }

    /// Parse a JSON-encoded [`EventBatch`] and store it under `project`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Serialization`] if `json` is not a valid batch.
    pub fn insert_json(&self, project: ProjectId, json: &str) -> Result<(), PulseError> {
        let batch: EventBatch = serde_json::from_str(json)?;
        self.insert(project, batch);
        Ok(())
    }
}

impl EventSource for MemoryEventSource {
    fn fetch(&self, project: &ProjectId) -> Result<EventBatch, PulseError> {
        let projects = self
            .projects
            .read()
            .map_err(|e| PulseError::Source(format!("project store poisoned: {e}")))?;
        match projects.get(project) {
            Some(batch) => Ok(batch.clone()),
            None => {
                debug!(project = %project, "no records stored for project");
                Ok(EventBatch::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_previous_batch() {
        let source = MemoryEventSource::new();
        let id = ProjectId::from("p");
        source
            .insert_json(id.clone(), r#"{"commits":[{"sha":"a","author":"x","timestamp":1}]}"#)
            .unwrap();
        source.insert(id.clone(), EventBatch::default());
        assert!(source.fetch(&id).unwrap().commits.is_empty());
    }

    #[test]
    fn insert_json_parses_file_changes() {
        let source = MemoryEventSource::new();
        let id = ProjectId::from("p");
        source
            .insert_json(
                id.clone(),
                r#"{
                    "commits": [{"sha": "a", "author": "x", "timestamp": 1}],
                    "fileChanges": [{"commitSha": "a", "filePath": "f.rs", "changeType": "added", "linesAdded": 4}]
                }"#,
            )
            .unwrap();
        let batch = source.fetch(&id).unwrap();
        assert_eq!(batch.file_changes.len(), 1);
        assert_eq!(batch.file_changes[0].lines_added, 4);
        assert_eq!(batch.file_changes[0].lines_removed, 0);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let source = MemoryEventSource::new();
        let result = source.insert_json(ProjectId::from("p"), "{not json");
        assert!(matches!(result, Err(PulseError::Serialization(_))));
    }
}
