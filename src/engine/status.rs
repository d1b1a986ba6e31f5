//! Per-resource runtime status.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

use crate::driver::Outputs;
use crate::error::{InfraError, ResourceError};

/// Lifecycle status of a resource within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceStatus {
    /// Not dispatched yet.
    Pending,
    /// Create or update in flight.
    Applying,
    /// Created, updated or confirmed unchanged.
    Applied,
    /// The pass failed for this resource.
    Failed,
    /// Destroy in flight.
    Destroying,
    /// Gone.
    Destroyed,
}

/// What a pass did to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    /// Created from scratch.
    Created,
    /// Recreated or updated over an existing record.
    Updated,
    /// Driver reported no change.
    Unchanged,
    /// Torn down.
    Destroyed,
    /// Nothing recorded, so nothing to destroy.
    Absent,
}

impl ResourceStatus {
    /// Returns true if `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applying | Self::Destroying | Self::Destroyed)
                | (Self::Applying, Self::Applied | Self::Failed)
                | (Self::Destroying, Self::Destroyed | Self::Failed)
        )
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Destroyed)
    }
}

/// Runtime record of one resource during a pass.
#[derive(Debug, Clone)]
pub struct ResourceState {
    name: String,
    status: ResourceStatus,
    action: Option<ResourceAction>,
    outputs: Outputs,
    last_error: Option<ResourceError>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

impl ResourceState {
    /// Creates a pending state.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ResourceStatus::Pending,
            action: None,
            outputs: Outputs::new(),
            last_error: None,
            started_at: None,
            started: None,
            elapsed: None,
        }
    }

    /// Moves to `next`, enforcing the lifecycle.
    ///
    /// Leaving `Pending` starts the clock and reaching a terminal status
    /// stops it.
    ///
    /// # Errors
    ///
    /// Returns an internal error on an illegal transition.
    pub fn transition(&mut self, next: ResourceStatus) -> Result<(), InfraError> {
        if !self.status.can_transition_to(next) {
            return Err(InfraError::internal(format!(
                "illegal status transition for '{}': {} -> {next}",
                self.name, self.status
            )));
        }

        if self.status == ResourceStatus::Pending {
            self.started_at = Some(Utc::now());
            self.started = Some(Instant::now());
        }
        if next.is_terminal() {
            self.elapsed = self.started.map(|s| s.elapsed());
        }
        self.status = next;
        Ok(())
    }

    /// Marks the resource applied with its outputs.
    ///
    /// # Errors
    ///
    /// Returns an internal error unless the resource is applying.
    pub fn applied(&mut self, action: ResourceAction, outputs: Outputs) -> Result<(), InfraError> {
        self.transition(ResourceStatus::Applied)?;
        self.action = Some(action);
        self.outputs = outputs;
        Ok(())
    }

    /// Marks the resource destroyed.
    ///
    /// # Errors
    ///
    /// Returns an internal error unless the resource is pending or destroying.
    pub fn destroyed(&mut self, action: ResourceAction) -> Result<(), InfraError> {
        self.transition(ResourceStatus::Destroyed)?;
        self.action = Some(action);
        Ok(())
    }

    /// Marks the resource failed.
    ///
    /// # Errors
    ///
    /// Returns an internal error unless the resource is in flight.
    pub fn failed(&mut self, error: ResourceError) -> Result<(), InfraError> {
        self.transition(ResourceStatus::Failed)?;
        self.last_error = Some(error);
        Ok(())
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Action taken, once terminal.
    #[must_use]
    pub const fn action(&self) -> Option<ResourceAction> {
        self.action
    }

    /// Outputs, populated once applied.
    #[must_use]
    pub const fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Error, if failed.
    #[must_use]
    pub const fn last_error(&self) -> Option<&ResourceError> {
        self.last_error.as_ref()
    }

    /// Wall-clock time the resource left `Pending`.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time from leaving `Pending` to reaching a terminal status.
    #[must_use]
    pub const fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Destroyed => "destroyed",
            Self::Absent => "absent",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;

    #[test]
    fn test_apply_lifecycle() {
        let mut state = ResourceState::pending("vpc");
        state.transition(ResourceStatus::Applying).unwrap();
        state.applied(ResourceAction::Created, Outputs::new()).unwrap();

        assert_eq!(state.status(), ResourceStatus::Applied);
        assert_eq!(state.action(), Some(ResourceAction::Created));
        assert!(state.started_at().is_some());
        assert!(state.elapsed().is_some());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut state = ResourceState::pending("vpc");
        assert!(state.transition(ResourceStatus::Applied).is_err());

        state.transition(ResourceStatus::Applying).unwrap();
        state.failed(DriverError::rejected("quota").into()).unwrap();

        assert!(state.transition(ResourceStatus::Applying).is_err());
        assert!(state.transition(ResourceStatus::Pending).is_err());
        assert_eq!(state.status(), ResourceStatus::Failed);
        assert!(state.last_error().is_some());
    }

    #[test]
    fn test_pending_can_be_destroyed_directly() {
        let mut state = ResourceState::pending("never-created");
        state.destroyed(ResourceAction::Absent).unwrap();

        assert_eq!(state.status(), ResourceStatus::Destroyed);
        assert!(!ResourceStatus::Pending.can_transition_to(ResourceStatus::Failed));
    }
}
