//! Reconciler for converging recorded state with the declared stack.
//!
//! The reconciler owns the outer flow of a run: build the graph from
//! configuration, take the state lock, prune resources that are no longer
//! declared, run the apply engine and persist whatever the pass achieved.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::InfraConfig;
use crate::driver::Driver;
use crate::engine::{ApplyEngine, ApplyResult, CancelSignal, ResourceStatus};
use crate::error::{ApplyError, Result};
use crate::graph::{GraphBuilder, ProviderContext, ResourceGraph};
use crate::planner::{ChangeSet, ChangeType, DiffEngine, ExecutionPlan, PlanMode, Planner};
use crate::resource::ResourceSet;
use crate::state::{HistoryEntry, InfraState, Operation, StateStore, generate_holder_id};

/// Reconciler for a single stack.
pub struct Reconciler<'a, S: StateStore> {
    /// Configuration.
    config: &'a InfraConfig,
    /// State store.
    state_store: &'a S,
    /// Provider driver.
    driver: Arc<dyn Driver>,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Level planner.
    planner: Planner,
    /// Maximum in-flight resources per level.
    max_parallel: usize,
    /// Whether orphans are destroyed before apply.
    prune: bool,
    /// Cancellation shared with the engine.
    cancel: CancelSignal,
    /// Lock holder identifier.
    holder: String,
}

/// Plan and change preview for the declared stack.
#[derive(Debug)]
pub struct Preview {
    /// The graph the plan was computed from.
    pub graph: ResourceGraph,
    /// Level plan.
    pub plan: ExecutionPlan,
    /// Changes against recorded state.
    pub changes: ChangeSet,
}

/// Result of a reconciliation run.
#[derive(Debug)]
pub struct ReconciliationResult {
    /// Orphan teardown, if one ran.
    pub pruned: Option<ApplyResult>,
    /// The main pass.
    pub pass: ApplyResult,
    /// State as saved after the run.
    pub final_state: InfraState,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(config: &'a InfraConfig, state_store: &'a S, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            state_store,
            driver,
            diff_engine: DiffEngine::new(),
            planner: Planner::new(),
            max_parallel: config.engine.max_parallel,
            prune: true,
            cancel: CancelSignal::new(),
            holder: generate_holder_id(),
        }
    }

    /// Overrides the configured parallelism.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Enables or disables orphan pruning.
    #[must_use]
    pub const fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Uses `signal` for cancellation.
    #[must_use]
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Uses a fixed lock holder identifier.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Builds the resource graph from configuration.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate names or bad references.
    pub fn build_graph(&self) -> Result<ResourceGraph> {
        let specs = ResourceSet::from_config(self.config)?.into_specs();
        let graph = GraphBuilder::new(ProviderContext::from_config(self.config))
            .with_exports(self.config.exports.clone())
            .build(specs)?;
        Ok(graph)
    }

    /// Computes the plan and the change preview without touching the
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, contains a cycle or state
    /// cannot be loaded.
    pub async fn preview(&self, mode: PlanMode) -> Result<Preview> {
        let graph = self.build_graph()?;
        let plan = self.planner.plan(&graph, mode)?;
        let state = self.load_state().await?;
        let changes = self.diff_engine.compute(&graph, state.as_ref());

        Ok(Preview {
            graph,
            plan,
            changes,
        })
    }

    /// Applies the declared stack.
    ///
    /// # Errors
    ///
    /// Returns planning and state errors before anything runs. Resource
    /// failures and cancellation are returned as `ApplyError` after state
    /// has been saved.
    pub async fn apply(&self) -> Result<ReconciliationResult> {
        let graph = self.build_graph()?;
        let plan = self.planner.plan(&graph, PlanMode::Apply)?;

        info!(
            "Applying {} ({} resources, {} levels)",
            self.config.qualified_name(),
            plan.resource_count(),
            plan.level_count()
        );

        let lock = self.state_store.acquire_lock(&self.holder, "apply").await?;
        let outcome = self.apply_locked(&graph, &plan).await;
        self.release(&lock.lock_id).await;

        let result = outcome?;
        if let Some(err) = failure(&result) {
            return Err(err.into());
        }
        Ok(result)
    }

    async fn apply_locked(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
    ) -> Result<ReconciliationResult> {
        let mut state = self.load_or_new().await?;

        let pruned = if self.prune {
            self.prune_orphans(graph, &mut state).await?
        } else {
            None
        };

        if let Some(prune) = pruned.as_ref().filter(|p| p.error().is_some()) {
            warn!("Orphan teardown failed, skipping apply");
            self.state_store.save(&state).await?;
            return Ok(ReconciliationResult {
                pruned: None,
                pass: prune.clone(),
                final_state: state,
            });
        }

        let pass = self
            .engine()
            .apply(graph, plan, &state.resources)
            .await?;

        for (name, record) in &pass.records {
            state.record(name, record.clone());
        }

        let changed = pass.changed();
        match pass.error() {
            None => {
                state.graph_hash.clone_from(&plan.graph_hash);
                state.exports.clone_from(&pass.exports);
                state.add_history(HistoryEntry::new(Operation::Apply, &plan.graph_hash, changed));
            }
            Some(err) => {
                state.exports.extend(pass.exports.clone());
                state.add_history(HistoryEntry::failed(
                    Operation::Apply,
                    &plan.graph_hash,
                    changed,
                    &err.to_string(),
                ));
            }
        }

        self.state_store.save(&state).await?;

        Ok(ReconciliationResult {
            pruned,
            pass,
            final_state: state,
        })
    }

    /// Destroys every recorded resource, dependents first.
    ///
    /// Recorded resources that are no longer declared go first, then the
    /// declared graph in reverse level order.
    ///
    /// # Errors
    ///
    /// Returns planning and state errors before anything runs, and
    /// `ApplyError` after state has been saved if any teardown failed.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        let graph = self.build_graph()?;
        let plan = self.planner.plan(&graph, PlanMode::Destroy)?;

        info!("Destroying {}", self.config.qualified_name());

        let lock = self.state_store.acquire_lock(&self.holder, "destroy").await?;
        let outcome = self.destroy_locked(&graph, &plan).await;
        self.release(&lock.lock_id).await;

        let result = outcome?;
        if let Some(err) = failure(&result) {
            return Err(err.into());
        }
        Ok(result)
    }

    async fn destroy_locked(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
    ) -> Result<ReconciliationResult> {
        let mut state = self.load_or_new().await?;

        let pruned = self.prune_orphans(graph, &mut state).await?;
        if let Some(prune) = pruned.as_ref().filter(|p| p.error().is_some()) {
            self.state_store.save(&state).await?;
            return Ok(ReconciliationResult {
                pruned: None,
                pass: prune.clone(),
                final_state: state,
            });
        }

        let pass = self
            .engine()
            .destroy(graph, plan, &state.resources)
            .await?;

        for (name, resource) in &pass.states {
            if resource.status() == ResourceStatus::Destroyed {
                state.forget(name);
            }
        }
        state.exports.clear();

        let entry = match pass.error() {
            None => {
                state.graph_hash.clear();
                HistoryEntry::new(Operation::Destroy, &plan.graph_hash, pass.changed())
            }
            Some(err) => HistoryEntry::failed(
                Operation::Destroy,
                &plan.graph_hash,
                pass.changed(),
                &err.to_string(),
            ),
        };
        state.add_history(entry);
        self.state_store.save(&state).await?;

        Ok(ReconciliationResult {
            pruned,
            pass,
            final_state: state,
        })
    }

    /// Destroys recorded resources missing from `graph`.
    ///
    /// Returns `None` when there is nothing to prune.
    async fn prune_orphans(
        &self,
        graph: &ResourceGraph,
        state: &mut InfraState,
    ) -> Result<Option<ApplyResult>> {
        let orphans: Vec<_> = state
            .resources
            .iter()
            .filter(|(name, _)| !graph.contains(name))
            .map(|(_, record)| record.spec.clone())
            .collect();

        if orphans.is_empty() {
            debug!("No orphaned resources");
            return Ok(None);
        }

        info!("Pruning {} orphaned resource(s)", orphans.len());
        let orphan_graph = ResourceGraph::from_recorded(graph.provider().clone(), orphans);
        let plan = self.planner.plan(&orphan_graph, PlanMode::Destroy)?;
        let result = self
            .engine()
            .destroy(&orphan_graph, &plan, &state.resources)
            .await?;

        for (name, resource) in &result.states {
            if resource.status() == ResourceStatus::Destroyed {
                state.forget(name);
            }
        }

        let entry = match result.error() {
            None => HistoryEntry::new(Operation::Prune, &plan.graph_hash, result.changed()),
            Some(err) => HistoryEntry::failed(
                Operation::Prune,
                &plan.graph_hash,
                result.changed(),
                &err.to_string(),
            ),
        };
        state.add_history(entry);

        Ok(Some(result))
    }

    /// Checks for drift between the declared stack and recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or state cannot be loaded.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in {}", self.config.qualified_name());

        let graph = self.build_graph()?;
        let state = self.load_state().await?;
        let changes = self.diff_engine.compute(&graph, state.as_ref());

        let drifted_resources = changes
            .actionable()
            .into_iter()
            .map(|c| (c.name.clone(), c.change))
            .collect();

        Ok(DriftReport {
            has_drift: changes.has_changes(),
            drifted_resources,
            total_resources: graph.len(),
            recorded_count: state.as_ref().map_or(0, |s| s.resources.len()),
        })
    }

    fn engine(&self) -> ApplyEngine {
        ApplyEngine::new(Arc::clone(&self.driver))
            .with_max_parallel(self.max_parallel)
            .with_cancel_signal(self.cancel.clone())
    }

    async fn load_state(&self) -> Result<Option<InfraState>> {
        let state = self.state_store.load().await?;
        if let Some(state) = state.as_ref() {
            state.ensure_compatible()?;
        }
        Ok(state)
    }

    async fn load_or_new(&self) -> Result<InfraState> {
        Ok(self.load_state().await?.unwrap_or_else(|| {
            InfraState::new(&self.config.stack.name, &self.config.stack.environment)
        }))
    }

    async fn release(&self, lock_id: &str) {
        if let Err(e) = self.state_store.release_lock(lock_id).await {
            warn!("Failed to release state lock {lock_id}: {e}");
        }
    }
}

fn failure(result: &ReconciliationResult) -> Option<ApplyError> {
    result
        .pruned
        .as_ref()
        .and_then(ApplyResult::error)
        .or_else(|| result.pass.error())
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that would change, with the change they need.
    #[serde(serialize_with = "serialize_changes")]
    pub drifted_resources: Vec<(String, ChangeType)>,
    /// Total number of declared resources.
    pub total_resources: usize,
    /// Number of recorded resources.
    pub recorded_count: usize,
}

fn serialize_changes<Ser: serde::Serializer>(
    changes: &[(String, ChangeType)],
    serializer: Ser,
) -> std::result::Result<Ser::Ok, Ser::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(changes.len()))?;
    for (name, change) in changes {
        map.serialize_entry(name, &change.to_string())?;
    }
    map.end()
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for (resource, change) in &self.drifted_resources {
                writeln!(f, "  - {resource} ({change})")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pruned) = &self.pruned {
            writeln!(f, "Pruned orphans: {pruned}")?;
        }
        write!(f, "{}", self.pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::driver::SimulatedDriver;
    use crate::engine::ResourceAction;
    use crate::error::{InfraError, StateError};
    use crate::resource::InputValue;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    const STACK: &str = r"
stack:
  name: demo
provider:
  account: '123456789012'
  region: eu-west-1
resources:
  vpc:
    kind: network
    inputs:
      availability_zones: [eu-west-1a, eu-west-1b]
  private_a:
    kind: subnet
    inputs:
      network: { ref: vpc, output: network_id }
      availability_zone: eu-west-1a
  cluster_sg:
    kind: security_group_rule
    inputs:
      network: { ref: vpc, output: network_id }
      port: 443
      peer_cidr: { ref: vpc, output: cidr_block }
  cluster:
    kind: managed_cluster
    inputs:
      subnets: [{ ref: private_a, output: subnet_id }]
      security_groups: [{ ref: cluster_sg, output: security_group_id }]
exports:
  cluster_name: { ref: cluster, output: cluster_name }
";

    fn config(yaml: &str) -> InfraConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    fn setup() -> (TempDir, LocalStateStore, Arc<SimulatedDriver>) {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let config = config(STACK);
        let driver = Arc::new(SimulatedDriver::new(ProviderContext::from_config(&config)));
        (dir, store, driver)
    }

    #[tokio::test]
    async fn test_apply_records_state_and_is_idempotent() {
        let (_dir, store, driver) = setup();
        let config = config(STACK);

        let first = Reconciler::new(&config, &store, driver.clone())
            .apply()
            .await
            .unwrap();
        assert_eq!(first.pass.count_action(ResourceAction::Created), 4);
        assert_eq!(
            first.final_state.exports["cluster_name"],
            serde_json::json!("cluster")
        );

        let second = Reconciler::new(&config, &store, driver.clone())
            .apply()
            .await
            .unwrap();
        assert_eq!(second.pass.count_action(ResourceAction::Unchanged), 4);
        assert_eq!(driver.create_count(), 4);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.resources.len(), 4);
        assert_eq!(saved.history.len(), 2);
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_literal_lists_are_not_references() {
        let (_dir, store, driver) = setup();
        let config = config(&STACK.replace(
            "availability_zones: [eu-west-1a, eu-west-1b]",
            "availability_zones: [eu-west-1a, eu-west-1b, eu-west-1c]",
        ));
        let reconciler = Reconciler::new(&config, &store, driver);

        let graph = reconciler.build_graph().unwrap();
        assert_eq!(
            graph.edges(),
            vec![
                ("cluster_sg", "cluster"),
                ("private_a", "cluster"),
                ("vpc", "cluster_sg"),
                ("vpc", "private_a"),
            ]
        );

        let result = reconciler.apply().await.unwrap();
        assert_eq!(result.pass.count_action(ResourceAction::Created), 4);
        assert_eq!(
            result.final_state.resources["vpc"].spec.input("availability_zones"),
            Some(&InputValue::list([
                InputValue::literal("eu-west-1a"),
                InputValue::literal("eu-west-1b"),
                InputValue::literal("eu-west-1c"),
            ]))
        );
    }

    #[tokio::test]
    async fn test_removed_resources_are_pruned() {
        let (_dir, store, driver) = setup();
        Reconciler::new(&config(STACK), &store, driver.clone())
            .apply()
            .await
            .unwrap();

        let mut smaller = config(STACK);
        smaller.resources.remove("cluster");
        smaller.exports.clear();

        let result = Reconciler::new(&smaller, &store, driver.clone())
            .apply()
            .await
            .unwrap();

        let pruned = result.pruned.unwrap();
        assert_eq!(pruned.count_action(ResourceAction::Destroyed), 1);
        assert_eq!(driver.destroy_count(), 1);
        assert!(result.final_state.get("cluster").is_none());
        assert_eq!(
            result.final_state.history.last().map(|h| h.operation),
            Some(Operation::Apply)
        );
    }

    #[tokio::test]
    async fn test_no_prune_keeps_orphans() {
        let (_dir, store, driver) = setup();
        Reconciler::new(&config(STACK), &store, driver.clone())
            .apply()
            .await
            .unwrap();

        let mut smaller = config(STACK);
        smaller.resources.remove("cluster");
        smaller.exports.clear();

        let result = Reconciler::new(&smaller, &store, driver.clone())
            .with_prune(false)
            .apply()
            .await
            .unwrap();

        assert!(result.pruned.is_none());
        assert_eq!(driver.destroy_count(), 0);
        assert!(result.final_state.get("cluster").is_some());
    }

    #[tokio::test]
    async fn test_failed_apply_saves_partial_state() {
        let (_dir, store, _) = setup();
        let config = config(STACK);
        let driver = Arc::new(
            SimulatedDriver::new(ProviderContext::from_config(&config)).fail_on("cluster_sg"),
        );

        let err = Reconciler::new(&config, &store, driver)
            .with_max_parallel(1)
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, InfraError::Apply(ApplyError::ResourcesFailed { .. })));
        assert_eq!(err.exit_code(), crate::error::EXIT_PROVISIONING);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.resource_names(), vec!["vpc"]);
        assert!(saved.graph_hash.is_empty());
        let last = saved.history.last().unwrap();
        assert!(!last.success);
        assert!(last.error.as_deref().unwrap_or_default().contains("cluster_sg"));
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_clears_state() {
        let (_dir, store, driver) = setup();
        let config = config(STACK);
        Reconciler::new(&config, &store, driver.clone())
            .apply()
            .await
            .unwrap();

        let result = Reconciler::new(&config, &store, driver.clone())
            .destroy()
            .await
            .unwrap();

        assert!(result.pass.succeeded());
        assert!(result.final_state.is_empty());
        assert!(result.final_state.exports.is_empty());
        let order: Vec<String> = driver
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("destroy:"))
            .collect();
        assert_eq!(order.first().map(String::as_str), Some("destroy:cluster"));
        assert_eq!(order.last().map(String::as_str), Some("destroy:vpc"));
    }

    #[tokio::test]
    async fn test_drift_and_preview() {
        let (_dir, store, driver) = setup();
        Reconciler::new(&config(STACK), &store, driver.clone())
            .apply()
            .await
            .unwrap();

        let clean = Reconciler::new(&config(STACK), &store, driver.clone())
            .check_drift()
            .await
            .unwrap();
        assert!(clean.is_converged());

        let changed = config(&STACK.replace("port: 443", "port: 8443"));
        let reconciler = Reconciler::new(&changed, &store, driver.clone());
        let drift = reconciler.check_drift().await.unwrap();
        assert!(drift.has_drift);
        assert_eq!(
            drift.drifted_resources,
            vec![(String::from("cluster_sg"), ChangeType::Update)]
        );

        let preview = reconciler.preview(PlanMode::Apply).await.unwrap();
        assert_eq!(preview.changes.updates, 1);
        assert_eq!(preview.changes.unchanged, 3);
        assert_eq!(preview.plan.level_count(), 3);
        assert_eq!(driver.diff_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_blocks_apply() {
        let (_dir, store, driver) = setup();
        store.acquire_lock("someone-else", "apply").await.unwrap();

        let err = Reconciler::new(&config(STACK), &store, driver.clone())
            .with_holder("ci-runner")
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InfraError::State(StateError::LockedByOther { ref holder, .. }) if holder == "someone-else"
        ));
        assert_eq!(driver.create_count(), 0);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_locking() {
        let (_dir, store, driver) = setup();
        let cyclic = config(&STACK.replace(
            "availability_zones: [eu-west-1a, eu-west-1b]",
            "availability_zones: [{ ref: cluster, output: cluster_name }]",
        ));

        let err = Reconciler::new(&cyclic, &store, driver)
            .apply()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), crate::error::EXIT_CYCLE);
        assert!(!store.is_locked().await.unwrap());
    }
}
