//! State types for tracking provisioned resources.
//!
//! These types represent the recorded outcome of previous passes, used to
//! skip unchanged resources, prune orphans and report drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::driver::Outputs;
use crate::error::StateError;
use crate::resource::ResourceSpec;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept in state.
pub const MAX_HISTORY: usize = 100;

/// The complete recorded state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraState {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied graph.
    pub graph_hash: String,
    /// Recorded resources, keyed by name.
    pub resources: BTreeMap<String, RecordedResource>,
    /// Resolved stack exports.
    #[serde(default)]
    pub exports: BTreeMap<String, serde_json::Value>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Pass history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// The persisted outcome of a successful apply of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResource {
    /// Spec as it was applied.
    pub spec: ResourceSpec,
    /// Hash of the applied spec.
    pub spec_hash: String,
    /// Fingerprint of the resolved inputs the driver received.
    pub inputs_fingerprint: String,
    /// Outputs reported by the driver.
    pub outputs: Outputs,
    /// When the resource was last created or updated.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the pass history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the pass ran.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Graph hash at time of the pass.
    pub graph_hash: String,
    /// Resources the pass changed.
    pub resources: Vec<String>,
    /// Whether the pass succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Apply pass.
    Apply,
    /// Teardown of resources no longer declared.
    Prune,
    /// Destroy pass.
    Destroy,
}

impl InfraState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            environment: environment.to_string(),
            graph_hash: String::new(),
            resources: BTreeMap::new(),
            exports: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a recorded resource by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RecordedResource> {
        self.resources.get(name)
    }

    /// Records a resource.
    pub fn record(&mut self, name: &str, resource: RecordedResource) {
        self.resources.insert(name.to_string(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a recorded resource.
    pub fn forget(&mut self, name: &str) -> Option<RecordedResource> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all recorded resource names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Rejects state written by an incompatible format version.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` if the major version differs.
    pub fn ensure_compatible(&self) -> Result<(), StateError> {
        let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
        if major(&self.version) == major(STATE_VERSION) {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }
}

impl HistoryEntry {
    /// Creates a new successful history entry.
    #[must_use]
    pub fn new(operation: Operation, graph_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            graph_hash: graph_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: Operation,
        graph_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, graph_hash, resources)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Prune => "prune",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_capped() {
        let mut state = InfraState::new("demo", "dev");
        for i in 0..=MAX_HISTORY {
            state.add_history(HistoryEntry::new(Operation::Apply, &i.to_string(), vec![]));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].graph_hash, "1");
    }

    #[test]
    fn test_failed_history_entry() {
        let entry = HistoryEntry::failed(Operation::Destroy, "abc", vec![], "boom");
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("boom"));
        assert_eq!(entry.operation.to_string(), "destroy");
    }

    #[test]
    fn test_version_compatibility() {
        let mut state = InfraState::new("demo", "dev");
        assert!(state.ensure_compatible().is_ok());

        state.version = String::from("1.3");
        assert!(state.ensure_compatible().is_ok());

        state.version = String::from("2.0");
        assert!(matches!(
            state.ensure_compatible(),
            Err(StateError::VersionMismatch { .. })
        ));
    }
}
