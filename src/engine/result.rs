//! Outcome of an apply or destroy pass.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::status::{ResourceAction, ResourceState, ResourceStatus};
use crate::error::{ApplyError, ResourceError};
use crate::planner::PlanMode;
use crate::state::RecordedResource;

/// Final state of every resource a pass touched.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    /// Pass direction.
    pub mode: PlanMode,
    /// Runtime state per planned resource.
    pub states: BTreeMap<String, ResourceState>,
    /// Records for resources applied in this pass (apply mode only).
    pub records: BTreeMap<String, RecordedResource>,
    /// Resolved stack exports (apply mode only).
    pub exports: BTreeMap<String, serde_json::Value>,
    /// Whether cancellation stopped dispatch.
    pub cancelled: bool,
    /// Level whose failures stopped the pass.
    pub halted_at_level: Option<usize>,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
}

impl ApplyResult {
    /// Number of resources in `status`.
    #[must_use]
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.states.values().filter(|s| s.status() == status).count()
    }

    /// Number of resources that ended with `action`.
    #[must_use]
    pub fn count_action(&self, action: ResourceAction) -> usize {
        self.states
            .values()
            .filter(|s| s.action() == Some(action))
            .count()
    }

    /// Failed resources with their errors, by name.
    #[must_use]
    pub fn failures(&self) -> Vec<(&str, &ResourceError)> {
        self.states
            .values()
            .filter_map(|s| s.last_error().map(|e| (s.name(), e)))
            .collect()
    }

    /// Resources never dispatched.
    #[must_use]
    pub fn pending(&self) -> Vec<&str> {
        self.states
            .values()
            .filter(|s| s.status() == ResourceStatus::Pending)
            .map(ResourceState::name)
            .collect()
    }

    /// Resources the pass created, updated or destroyed.
    #[must_use]
    pub fn changed(&self) -> Vec<String> {
        self.states
            .values()
            .filter(|s| {
                matches!(
                    s.action(),
                    Some(ResourceAction::Created | ResourceAction::Updated | ResourceAction::Destroyed)
                )
            })
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Looks up one resource.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&ResourceState> {
        self.states.get(name)
    }

    /// Returns true if every resource reached its target status.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        let target = match self.mode {
            PlanMode::Apply => ResourceStatus::Applied,
            PlanMode::Destroy => ResourceStatus::Destroyed,
        };
        self.states.values().all(|s| s.status() == target)
    }

    /// Error summarizing why the pass did not succeed, if it did not.
    ///
    /// Failures take precedence over cancellation.
    #[must_use]
    pub fn error(&self) -> Option<ApplyError> {
        let failures = self.failures();
        if !failures.is_empty() {
            return Some(ApplyError::ResourcesFailed {
                failures: failures
                    .into_iter()
                    .map(|(name, err)| (name.to_string(), err.to_string()))
                    .collect(),
            });
        }

        let pending = self.pending();
        if self.cancelled && !pending.is_empty() {
            return Some(ApplyError::Cancelled {
                pending: pending.into_iter().map(str::to_string).collect(),
            });
        }
        None
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            PlanMode::Apply => write!(
                f,
                "Apply finished in {:.1}s: {} created, {} updated, {} unchanged, {} failed, {} pending",
                self.elapsed.as_secs_f64(),
                self.count_action(ResourceAction::Created),
                self.count_action(ResourceAction::Updated),
                self.count_action(ResourceAction::Unchanged),
                self.count(ResourceStatus::Failed),
                self.count(ResourceStatus::Pending),
            ),
            PlanMode::Destroy => write!(
                f,
                "Destroy finished in {:.1}s: {} destroyed, {} absent, {} failed, {} pending",
                self.elapsed.as_secs_f64(),
                self.count_action(ResourceAction::Destroyed),
                self.count_action(ResourceAction::Absent),
                self.count(ResourceStatus::Failed),
                self.count(ResourceStatus::Pending),
            ),
        }
    }
}
