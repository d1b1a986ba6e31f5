//! The apply engine.
//!
//! Runs a plan level by level. Each level is a barrier: nothing from the
//! next level starts until every dispatched resource of the current one has
//! finished. Within a level a `JoinSet` keeps at most `max_parallel`
//! driver calls in flight.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::cancel::CancelSignal;
use super::resolve::{resolve_exports, resolve_inputs};
use super::result::ApplyResult;
use super::status::{ResourceAction, ResourceState, ResourceStatus};
use crate::config::SpecHasher;
use crate::driver::{DiffOutcome, Driver, Outputs, ResolvedInputs};
use crate::error::{DriverError, InfraError, PlanError, ResourceError, Result};
use crate::graph::ResourceGraph;
use crate::planner::{ExecutionPlan, PlanMode};
use crate::resource::ResourceSpec;
use crate::state::RecordedResource;

/// Default number of resources in flight per level.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Drives execution plans against a driver.
#[derive(Clone)]
pub struct ApplyEngine {
    driver: Arc<dyn Driver>,
    max_parallel: usize,
    cancel: CancelSignal,
    hasher: SpecHasher,
}

/// Work handed to a worker task. Everything is owned.
enum Job {
    Apply {
        spec: Arc<ResourceSpec>,
        inputs: ResolvedInputs,
        prior: Option<RecordedResource>,
    },
    Destroy {
        spec: Arc<ResourceSpec>,
        outputs: Outputs,
    },
}

/// What a worker reports back.
struct Completion {
    action: ResourceAction,
    outputs: Outputs,
    record: Option<RecordedResource>,
}

type WorkerResult = std::result::Result<Completion, ResourceError>;

/// Mutable bookkeeping for one pass. Only the engine loop touches it.
struct Pass {
    states: BTreeMap<String, ResourceState>,
    records: BTreeMap<String, RecordedResource>,
    failed_in_level: bool,
}

impl ApplyEngine {
    /// Creates an engine with the default parallelism.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            max_parallel: DEFAULT_MAX_PARALLEL,
            cancel: CancelSignal::new(),
            hasher: SpecHasher::new(),
        }
    }

    /// Sets the maximum number of in-flight resources per level.
    ///
    /// Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Uses `signal` for cancellation.
    #[must_use]
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Configured parallelism.
    #[must_use]
    pub const fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Applies an apply-mode plan.
    ///
    /// `prior` holds the records of a previous pass. A resource whose
    /// resolved inputs match its record is only diffed, not recreated.
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` for a destroy plan, or an internal error if the
    /// plan names a resource missing from the graph. Resource failures are
    /// reported in the result, not as an error.
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
        prior: &BTreeMap<String, RecordedResource>,
    ) -> Result<ApplyResult> {
        self.run(graph, plan, prior, PlanMode::Apply).await
    }

    /// Applies a destroy-mode plan.
    ///
    /// Resources without a record are marked destroyed without a driver
    /// call.
    ///
    /// # Errors
    ///
    /// Returns `ModeMismatch` for an apply plan, or an internal error if the
    /// plan names a resource missing from the graph.
    pub async fn destroy(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
        prior: &BTreeMap<String, RecordedResource>,
    ) -> Result<ApplyResult> {
        self.run(graph, plan, prior, PlanMode::Destroy).await
    }

    async fn run(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
        prior: &BTreeMap<String, RecordedResource>,
        mode: PlanMode,
    ) -> Result<ApplyResult> {
        if plan.mode != mode {
            return Err(PlanError::ModeMismatch {
                expected: mode.to_string(),
                found: plan.mode.to_string(),
            }
            .into());
        }
        if let Some(unknown) = plan.resources().find(|name| !graph.contains(name)) {
            return Err(InfraError::internal(format!(
                "plan names '{unknown}' which is not in the graph"
            )));
        }

        let started = Instant::now();
        let mut pass = Pass {
            states: plan
                .resources()
                .map(|name| (name.to_string(), ResourceState::pending(name)))
                .collect(),
            records: BTreeMap::new(),
            failed_in_level: false,
        };
        let mut cancelled = false;
        let mut halted_at_level = None;

        info!(
            "Starting {mode} of {} resources in {} levels (driver: {}, max parallel: {})",
            plan.resource_count(),
            plan.level_count(),
            self.driver.name(),
            self.max_parallel
        );

        for level in &plan.levels {
            debug!("Dispatching level {}: {}", level.index, level.resources.join(", "));
            let mut workers: JoinSet<(String, std::result::Result<WorkerResult, JoinError>)> =
                JoinSet::new();

            for name in &level.resources {
                while let Some(joined) = workers.try_join_next() {
                    self.complete(&mut pass, joined)?;
                }
                while workers.len() >= self.max_parallel && !pass.failed_in_level {
                    if let Some(joined) = workers.join_next().await {
                        self.complete(&mut pass, joined)?;
                    }
                }
                if pass.failed_in_level {
                    break;
                }
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let Some(job) = self.prepare(graph, prior, &mut pass, name, mode)? else {
                    continue;
                };

                let driver = Arc::clone(&self.driver);
                let hasher = self.hasher;
                let worker_name = name.clone();
                workers.spawn(async move {
                    // The inner task isolates driver panics from the loop.
                    let outcome = tokio::spawn(run_job(driver, hasher, job)).await;
                    (worker_name, outcome)
                });
            }

            while let Some(joined) = workers.join_next().await {
                self.complete(&mut pass, joined)?;
            }

            if pass.failed_in_level {
                warn!("Level {} had failures; later levels will not run", level.index);
                halted_at_level = Some(level.index);
                break;
            }
            if cancelled {
                warn!("Cancelled during level {}", level.index);
                break;
            }
        }

        let exports = if mode == PlanMode::Apply {
            resolve_exports(graph.exports(), &pass.states)
        } else {
            BTreeMap::new()
        };

        let result = ApplyResult {
            mode,
            states: pass.states,
            records: pass.records,
            exports,
            cancelled,
            halted_at_level,
            elapsed: started.elapsed(),
        };
        info!("{result}");
        Ok(result)
    }

    /// Moves a resource out of `Pending` and builds its job.
    ///
    /// Returns `None` when there is nothing to dispatch: a destroy target
    /// with no record, or an apply target whose references failed to
    /// resolve.
    fn prepare(
        &self,
        graph: &ResourceGraph,
        prior: &BTreeMap<String, RecordedResource>,
        pass: &mut Pass,
        name: &str,
        mode: PlanMode,
    ) -> Result<Option<Job>> {
        let spec = graph
            .get(name)
            .cloned()
            .ok_or_else(|| InfraError::internal(format!("'{name}' is not in the graph")))?;

        match mode {
            PlanMode::Apply => {
                let resolved = resolve_inputs(&spec, &pass.states, graph.provider());
                let state = state_mut(&mut pass.states, name)?;
                state.transition(ResourceStatus::Applying)?;

                match resolved {
                    Ok(inputs) => Ok(Some(Job::Apply {
                        spec,
                        inputs,
                        prior: prior.get(name).cloned(),
                    })),
                    Err(err) => {
                        warn!("{name} failed before dispatch: {err}");
                        state.failed(err)?;
                        pass.failed_in_level = true;
                        Ok(None)
                    }
                }
            }
            PlanMode::Destroy => {
                let state = state_mut(&mut pass.states, name)?;
                let Some(record) = prior.get(name) else {
                    debug!("{name} has no record, nothing to destroy");
                    state.destroyed(ResourceAction::Absent)?;
                    return Ok(None);
                };

                state.transition(ResourceStatus::Destroying)?;
                Ok(Some(Job::Destroy {
                    spec: Arc::new(record.spec.clone()),
                    outputs: record.outputs.clone(),
                }))
            }
        }
    }

    /// Folds one finished worker into the pass.
    fn complete(
        &self,
        pass: &mut Pass,
        joined: std::result::Result<(String, std::result::Result<WorkerResult, JoinError>), JoinError>,
    ) -> Result<()> {
        // The outer task only awaits the inner one, so it cannot panic.
        let (name, outcome) =
            joined.map_err(|e| InfraError::internal(format!("worker task failed: {e}")))?;

        let result = outcome.unwrap_or_else(|e| {
            Err(ResourceError::Panicked {
                message: e.to_string(),
            })
        });

        let state = state_mut(&mut pass.states, &name)?;
        match result {
            Ok(done) => {
                if done.action == ResourceAction::Destroyed {
                    state.destroyed(done.action)?;
                } else {
                    state.applied(done.action, done.outputs)?;
                }
                info!("{name}: {}", done.action);
                if let Some(record) = done.record {
                    pass.records.insert(name, record);
                }
            }
            Err(err) => {
                warn!("{name} failed: {err}");
                state.failed(err)?;
                pass.failed_in_level = true;
            }
        }
        Ok(())
    }
}

fn state_mut<'a>(
    states: &'a mut BTreeMap<String, ResourceState>,
    name: &str,
) -> Result<&'a mut ResourceState> {
    states
        .get_mut(name)
        .ok_or_else(|| InfraError::internal(format!("no runtime state for '{name}'")))
}

async fn run_job(driver: Arc<dyn Driver>, hasher: SpecHasher, job: Job) -> WorkerResult {
    match job {
        Job::Apply {
            spec,
            inputs,
            prior,
        } => {
            let fingerprint = hasher.fingerprint(&inputs);

            if let Some(record) = prior.as_ref() {
                if SpecHasher::hashes_match(&record.inputs_fingerprint, &fingerprint)
                    && driver.diff(&spec, record).await? == DiffOutcome::NoChange
                {
                    return Ok(Completion {
                        action: ResourceAction::Unchanged,
                        outputs: record.outputs.clone(),
                        record: Some(record.clone()),
                    });
                }
            }

            let outputs = driver.create(&spec, &inputs).await?;
            let action = if prior.is_some() {
                ResourceAction::Updated
            } else {
                ResourceAction::Created
            };

            Ok(Completion {
                action,
                record: Some(RecordedResource {
                    spec: (*spec).clone(),
                    spec_hash: hasher.hash_spec(&spec),
                    inputs_fingerprint: fingerprint,
                    outputs: outputs.clone(),
                    applied_at: Utc::now(),
                }),
                outputs,
            })
        }
        Job::Destroy { spec, outputs } => {
            match driver.destroy(&spec, &outputs).await {
                Ok(()) => {}
                Err(DriverError::NotFound { .. }) => {
                    debug!("{} was already gone", spec.name());
                }
                Err(err) => return Err(err.into()),
            }
            Ok(Completion {
                action: ResourceAction::Destroyed,
                outputs: Outputs::new(),
                record: None,
            })
        }
    }
}

impl std::fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("driver", &self.driver.name())
            .field("max_parallel", &self.max_parallel)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
