//! Planning module.
//!
//! This module orders a resource graph into execution levels and previews
//! the changes an apply would make against recorded state.

mod diff;
mod levels;
mod plan;

pub use diff::{ChangeDetail, ChangeSet, ChangeType, DiffEngine, ResourceChange};
pub use levels::{Planner, apply_levels};
pub use plan::{ExecutionPlan, PlanLevel, PlanMode};
