// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # infragraph
//!
//! A declarative resource graph planner and dependency-ordered apply engine
//! for VPC and EKS style infrastructure.
//!
//! ## Overview
//!
//! A stack is a set of named resources whose inputs are literals or
//! references to outputs of other resources. infragraph:
//!
//! - Builds a dependency graph from the references and rejects dangling or
//!   cyclic ones before anything runs
//! - Groups resources into levels so that everything a resource depends on
//!   is applied in an earlier level
//! - Applies each level with a bounded worker pool, feeding resolved
//!   outputs forward
//! - Tears stacks down in the reverse order
//! - Records what was applied so repeat runs are idempotent
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and spec hashing
//! - [`resource`]: Resource kinds, input values and declared specs
//! - [`graph`]: Dependency graph construction
//! - [`planner`]: Level planning and change computation
//! - [`driver`]: Provider driver trait and the simulated provider
//! - [`engine`]: Level-by-level apply and destroy
//! - [`state`]: Recorded state and locking (local, S3)
//! - [`reconciler`]: Lock, prune, apply and persist
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: eks-infra
//!
//! provider:
//!   account: "123456789012"
//!   region: us-east-1
//!
//! resources:
//!   vpc:
//!     kind: network
//!     inputs:
//!       availability_zones: [us-east-1a, us-east-1b]
//!   isolated_a:
//!     kind: subnet
//!     inputs:
//!       network: { ref: vpc, output: network_id }
//!       availability_zone: us-east-1a
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, InfraConfig, SpecHasher};
pub use driver::{Driver, SimulatedDriver};
pub use engine::{ApplyEngine, ApplyResult, CancelSignal, ResourceStatus};
pub use error::{InfraError, Result};
pub use graph::{GraphBuilder, ProviderContext, ResourceGraph};
pub use planner::{DiffEngine, ExecutionPlan, PlanMode, Planner};
pub use reconciler::{DriftReport, Preview, ReconciliationResult, Reconciler};
pub use resource::{InputValue, Reference, ResourceKind, ResourceSpec};
pub use state::{InfraState, LocalStateStore, S3StateStore, StateStore};
