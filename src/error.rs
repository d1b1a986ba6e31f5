//! Error types for the infragraph provisioning system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, planning, driver calls, apply
//! passes and state management.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for user-input problems (configuration, graph, plan).
pub const EXIT_INPUT: u8 = 2;

/// Exit code for reference cycles.
pub const EXIT_CYCLE: u8 = 3;

/// Exit code for provisioning failures.
pub const EXIT_PROVISIONING: u8 = 4;

/// Exit code for everything else.
pub const EXIT_OTHER: u8 = 1;

/// The main error type for infragraph.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Driver errors surfaced outside of a resource pass.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Apply or destroy pass errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while defining resources or building the graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two resources share a name.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A reference points at a resource that is not defined.
    #[error("Resource '{resource}' references undefined resource '{missing}'")]
    DanglingReference {
        /// The referencing resource (or `exports.<name>`).
        resource: String,
        /// The missing resource name.
        missing: String,
    },

    /// A resource references one of its own outputs.
    #[error("Resource '{resource}' references itself")]
    SelfReference {
        /// The offending resource.
        resource: String,
    },

    /// A reference names an output the target does not declare.
    #[error("Resource '{resource}' references unknown output '{output}' of '{target}'")]
    UnknownOutput {
        /// The referencing resource.
        resource: String,
        /// The referenced resource.
        target: String,
        /// The undeclared output field.
        output: String,
    },
}

/// Planning errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The graph contains a reference cycle.
    #[error("Reference cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Names of the resources forming the cycle.
        cycle: Vec<String>,
    },

    /// A plan was handed to the wrong engine operation.
    #[error("Plan mode mismatch: expected {expected} plan, got {found} plan")]
    ModeMismatch {
        /// Mode the operation requires.
        expected: String,
        /// Mode of the plan provided.
        found: String,
    },
}

/// Errors reported by a driver for a single resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The provider rejected the request.
    #[error("Request rejected: {message}")]
    Rejected {
        /// Provider message.
        message: String,
    },

    /// The resource does not exist on the provider side.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource name.
        resource: String,
    },

    /// The driver gave up waiting for the provider.
    #[error("Timed out after {secs}s waiting for {resource}")]
    Timeout {
        /// Resource name.
        resource: String,
        /// Seconds waited.
        secs: u64,
    },

    /// The provider could not be reached.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

/// Failure attached to a single resource during a pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The driver call failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A reference could not be resolved to an applied output.
    #[error("Unresolved reference to '{target}.{output}'")]
    UnresolvedReference {
        /// Referenced resource.
        target: String,
        /// Referenced output field.
        output: String,
    },

    /// The worker running the driver call panicked.
    #[error("Worker panicked: {message}")]
    Panicked {
        /// Panic description.
        message: String,
    },
}

/// Apply or destroy pass errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// One or more resources failed.
    #[error("{} resource(s) failed: {}", failures.len(), describe_failures(failures))]
    ResourcesFailed {
        /// `(resource, error)` pairs.
        failures: Vec<(String, String)>,
    },

    /// The pass was cancelled before every resource was dispatched.
    #[error("Cancelled with {} resource(s) not started", pending.len())]
    Cancelled {
        /// Resources left pending.
        pending: Vec<String>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Local state storage failed.
    #[error("Local state backend error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for infragraph operations.
pub type Result<T> = std::result::Result<T, InfraError>;

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, error)| format!("{name}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl InfraError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Maps the error onto the CLI exit code.
    ///
    /// Input problems, cycles and provisioning failures get distinct codes
    /// so scripts can tell a bad declaration from a failed environment.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Plan(PlanError::CycleDetected { .. }) => EXIT_CYCLE,
            Self::Config(_) | Self::Graph(_) | Self::Plan(_) => EXIT_INPUT,
            Self::Driver(_) | Self::Apply(_) => EXIT_PROVISIONING,
            Self::State(_) | Self::Io(_) | Self::Internal(_) => EXIT_OTHER,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl DriverError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_categories() {
        let cycle = InfraError::Plan(PlanError::CycleDetected {
            cycle: vec![String::from("a"), String::from("b")],
        });
        let dangling = InfraError::Graph(GraphError::DanglingReference {
            resource: String::from("a"),
            missing: String::from("b"),
        });
        let failed = InfraError::Apply(ApplyError::ResourcesFailed {
            failures: vec![(String::from("a"), String::from("boom"))],
        });

        assert_eq!(cycle.exit_code(), EXIT_CYCLE);
        assert_eq!(dangling.exit_code(), EXIT_INPUT);
        assert_eq!(failed.exit_code(), EXIT_PROVISIONING);
        assert_eq!(InfraError::internal("x").exit_code(), EXIT_OTHER);
    }

    #[test]
    fn test_cycle_message_names_every_member() {
        let err = PlanError::CycleDetected {
            cycle: vec![String::from("a"), String::from("b")],
        };
        assert_eq!(err.to_string(), "Reference cycle detected: a -> b");
    }

    #[test]
    fn test_failure_summary() {
        let err = ApplyError::ResourcesFailed {
            failures: vec![
                (String::from("vpc"), String::from("quota")),
                (String::from("sg"), String::from("denied")),
            ],
        };
        assert_eq!(err.to_string(), "2 resource(s) failed: vpc: quota; sg: denied");
    }
}
