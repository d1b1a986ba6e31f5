//! Change preview between the declared graph and recorded state.
//!
//! This module compares spec hashes only. It never calls a driver, so it is
//! safe to run for `plan` and `drift` without touching the provider.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::SpecHasher;
use crate::graph::ResourceGraph;
use crate::resource::{InputValue, ResourceKind, ResourceSpec};
use crate::state::InfraState;

/// Engine for computing change sets.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: SpecHasher,
}

/// Type of change for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Declared but not recorded.
    Create,
    /// Recorded with a different spec hash.
    Update,
    /// Recorded with the same spec hash.
    NoChange,
    /// Recorded but no longer declared.
    Delete,
}

/// Change for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceChange {
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of change.
    pub change: ChangeType,
    /// Input fields that differ (updates only).
    pub details: Vec<ChangeDetail>,
    /// Recorded hash (if any).
    pub old_hash: Option<String>,
    /// Declared hash (if any).
    pub new_hash: Option<String>,
}

/// A single differing input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDetail {
    /// Field name.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<String>,
    /// Declared value.
    pub new_value: Option<String>,
}

/// Complete change preview.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// All changes, declared resources first, then orphans, each by name.
    pub changes: Vec<ResourceChange>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    /// Computes the change set between the graph and recorded state.
    #[must_use]
    pub fn compute(&self, graph: &ResourceGraph, state: Option<&InfraState>) -> ChangeSet {
        let mut changes = Vec::new();

        for spec in graph.specs() {
            let new_hash = self.hasher.hash_spec(spec);
            let recorded = state.and_then(|s| s.get(spec.name()));

            let change = match recorded {
                None => {
                    debug!("{} needs to be created", spec.name());
                    ResourceChange {
                        name: spec.name().to_string(),
                        kind: spec.kind(),
                        change: ChangeType::Create,
                        details: Vec::new(),
                        old_hash: None,
                        new_hash: Some(new_hash),
                    }
                }
                Some(record) if SpecHasher::hashes_match(&record.spec_hash, &new_hash) => {
                    ResourceChange {
                        name: spec.name().to_string(),
                        kind: spec.kind(),
                        change: ChangeType::NoChange,
                        details: Vec::new(),
                        old_hash: Some(record.spec_hash.clone()),
                        new_hash: Some(new_hash),
                    }
                }
                Some(record) => {
                    debug!("{} needs update", spec.name());
                    ResourceChange {
                        name: spec.name().to_string(),
                        kind: spec.kind(),
                        change: ChangeType::Update,
                        details: detailed_diff(&record.spec, spec),
                        old_hash: Some(record.spec_hash.clone()),
                        new_hash: Some(new_hash),
                    }
                }
            };
            changes.push(change);
        }

        if let Some(state) = state {
            for (name, record) in &state.resources {
                if graph.contains(name) {
                    continue;
                }
                debug!("Found orphaned resource: {name}");
                changes.push(ResourceChange {
                    name: name.clone(),
                    kind: record.spec.kind(),
                    change: ChangeType::Delete,
                    details: Vec::new(),
                    old_hash: Some(record.spec_hash.clone()),
                    new_hash: None,
                });
            }
        }

        let count = |ty: ChangeType| changes.iter().filter(|c| c.change == ty).count();
        let creates = count(ChangeType::Create);
        let updates = count(ChangeType::Update);
        let deletes = count(ChangeType::Delete);
        let unchanged = count(ChangeType::NoChange);

        ChangeSet {
            changes,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }
}

/// Lists input fields whose values differ between two specs.
fn detailed_diff(old: &ResourceSpec, new: &ResourceSpec) -> Vec<ChangeDetail> {
    let fields: BTreeSet<&String> = old.inputs().keys().chain(new.inputs().keys()).collect();

    let mut details: Vec<ChangeDetail> = fields
        .into_iter()
        .filter_map(|field| {
            let before = old.input(field);
            let after = new.input(field);
            (before != after).then(|| ChangeDetail {
                field: field.clone(),
                old_value: before.map(render),
                new_value: after.map(render),
            })
        })
        .collect();

    if old.tags() != new.tags() {
        details.push(ChangeDetail {
            field: String::from("tags"),
            old_value: None,
            new_value: None,
        });
    }
    if old.outputs() != new.outputs() {
        details.push(ChangeDetail {
            field: String::from("outputs"),
            old_value: None,
            new_value: None,
        });
    }

    details
}

fn render(value: &InputValue) -> String {
    match value {
        InputValue::Ref(reference) => format!("ref({reference})"),
        InputValue::Literal(literal) => literal.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| String::from("?")),
    }
}

impl ChangeSet {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Filters to changes that require action.
    #[must_use]
    pub fn actionable(&self) -> Vec<&ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.change != ChangeType::NoChange)
            .collect()
    }

    /// Names of recorded resources no longer declared.
    #[must_use]
    pub fn orphans(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.change == ChangeType::Delete)
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.change)?;
        if !self.details.is_empty() {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, ProviderContext};
    use crate::resource::Inputs;
    use crate::state::RecordedResource;

    fn network(name: &str, cidr: &str) -> ResourceSpec {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("cidr"), InputValue::literal(cidr));
        ResourceSpec::new(ResourceKind::Network, name, inputs)
    }

    fn record(spec: &ResourceSpec) -> RecordedResource {
        RecordedResource {
            spec: spec.clone(),
            spec_hash: SpecHasher::new().hash_spec(spec),
            inputs_fingerprint: String::new(),
            outputs: crate::driver::Outputs::new(),
            applied_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_change_set_classifies_every_resource() {
        let graph = GraphBuilder::new(ProviderContext::default())
            .build(vec![
                network("same", "10.0.0.0/16"),
                network("changed", "10.2.0.0/16"),
                network("new", "10.3.0.0/16"),
            ])
            .unwrap();

        let mut state = InfraState::new("demo", "dev");
        state.record("same", record(&network("same", "10.0.0.0/16")));
        state.record("changed", record(&network("changed", "10.1.0.0/16")));
        state.record("gone", record(&network("gone", "10.9.0.0/16")));

        let changes = DiffEngine::new().compute(&graph, Some(&state));

        assert_eq!(changes.creates, 1);
        assert_eq!(changes.updates, 1);
        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.deletes, 1);
        assert_eq!(changes.orphans(), vec!["gone"]);

        let update = changes.changes.iter().find(|c| c.name == "changed").unwrap();
        assert_eq!(
            update.details,
            vec![ChangeDetail {
                field: String::from("cidr"),
                old_value: Some(String::from("\"10.1.0.0/16\"")),
                new_value: Some(String::from("\"10.2.0.0/16\"")),
            }]
        );
        assert_eq!(update.to_string(), "changed: update (cidr)");
    }

    #[test]
    fn test_no_state_means_everything_is_created() {
        let graph = GraphBuilder::new(ProviderContext::default())
            .build(vec![network("a", "10.0.0.0/16")])
            .unwrap();

        let changes = DiffEngine::new().compute(&graph, None);

        assert!(changes.has_changes());
        assert_eq!(changes.total_changes(), 1);
        assert_eq!(changes.actionable().len(), 1);
    }
}
