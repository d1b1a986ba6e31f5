//! Provider drivers.
//!
//! A driver turns a resource spec plus its resolved inputs into provider
//! API calls and reports the resulting outputs. Drivers own their own
//! polling and timeouts; the apply engine only sees the final outcome.

mod simulated;

pub use simulated::SimulatedDriver;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::DriverError;
use crate::resource::ResourceSpec;
use crate::state::RecordedResource;

/// Outputs reported by a driver, keyed by output field.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Inputs with every reference replaced by its resolved value.
pub type ResolvedInputs = BTreeMap<String, serde_json::Value>;

/// Result of asking a driver whether a recorded resource needs work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// The provider side matches the spec.
    NoChange,
    /// The resource must be created or updated.
    Changed,
}

/// A provider driver.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    /// Creates or updates the resource and waits until it is usable.
    async fn create(
        &self,
        spec: &ResourceSpec,
        inputs: &ResolvedInputs,
    ) -> Result<Outputs, DriverError>;

    /// Deletes the resource identified by its recorded outputs.
    ///
    /// `NotFound` means the resource is already gone.
    async fn destroy(&self, spec: &ResourceSpec, outputs: &Outputs) -> Result<(), DriverError>;

    /// Compares a recorded resource against the spec.
    async fn diff(
        &self,
        spec: &ResourceSpec,
        recorded: &RecordedResource,
    ) -> Result<DiffOutcome, DriverError>;
}
