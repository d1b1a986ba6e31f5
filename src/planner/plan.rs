//! Execution plan types.
//!
//! A plan is an ordered list of levels. Every resource in a level only
//! depends on resources in earlier levels, so a level can be dispatched
//! concurrently once the previous one has finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Create or update resources, dependencies first.
    Apply,
    /// Tear resources down, dependents first.
    Destroy,
}

/// A set of resources that can run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLevel {
    /// Position of the level in the plan.
    pub index: usize,
    /// Resource names, sorted lexicographically.
    pub resources: Vec<String>,
}

/// An ordered execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan direction.
    pub mode: PlanMode,
    /// Levels in execution order.
    pub levels: Vec<PlanLevel>,
    /// Hash of the graph this plan was computed from.
    pub graph_hash: String,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Creates a plan from ordered levels of names.
    #[must_use]
    pub fn new(mode: PlanMode, levels: Vec<Vec<String>>, graph_hash: impl Into<String>) -> Self {
        let levels = levels
            .into_iter()
            .enumerate()
            .map(|(index, resources)| PlanLevel { index, resources })
            .collect();

        Self {
            mode,
            levels,
            graph_hash: graph_hash.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if the plan has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|l| l.resources.is_empty())
    }

    /// Number of levels.
    #[must_use]
    pub const fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Total number of resources across levels.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.levels.iter().map(|l| l.resources.len()).sum()
    }

    /// All resource names in execution order.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.levels
            .iter()
            .flat_map(|l| l.resources.iter().map(String::as_str))
    }

    /// Level names as plain vectors, mostly for assertions and JSON output.
    #[must_use]
    pub fn level_names(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|l| l.resources.iter().map(String::as_str).collect())
            .collect()
    }

    /// Returns the index of the level containing `name`.
    #[must_use]
    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.levels
            .iter()
            .find(|l| l.resources.iter().any(|r| r == name))
            .map(|l| l.index)
    }
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}: {}", self.index, self.resources.join(", "))
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Empty {} plan", self.mode);
        }

        writeln!(
            f,
            "{} plan ({} resources in {} levels):",
            self.mode,
            self.resource_count(),
            self.level_count()
        )?;
        for level in &self.levels {
            writeln!(f, "  {level}")?;
        }
        Ok(())
    }
}
