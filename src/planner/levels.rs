//! Level planning over the resource graph.
//!
//! Kahn's algorithm, run one frontier at a time: every resource whose
//! dependencies have all been placed forms the next level.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::plan::{ExecutionPlan, PlanMode};
use crate::config::SpecHasher;
use crate::error::PlanError;
use crate::graph::ResourceGraph;

/// Computes execution plans for resource graphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner {
    hasher: SpecHasher,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    /// Plans the graph in the given mode.
    ///
    /// Destroy levels are the apply levels in reverse order.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` if the graph contains a reference cycle.
    pub fn plan(&self, graph: &ResourceGraph, mode: PlanMode) -> Result<ExecutionPlan, PlanError> {
        let mut levels = apply_levels(graph)?;
        if mode == PlanMode::Destroy {
            levels.reverse();
        }

        debug!(
            "Planned {} resources in {} levels ({mode})",
            graph.len(),
            levels.len()
        );

        Ok(ExecutionPlan::new(mode, levels, self.hasher.hash_graph(graph)))
    }
}

/// Computes apply levels, dependencies first.
///
/// # Errors
///
/// Returns `CycleDetected` naming the members of one cycle.
pub fn apply_levels(graph: &ResourceGraph) -> Result<Vec<Vec<String>>, PlanError> {
    let mut in_degree: BTreeMap<&str, usize> = graph
        .names()
        .map(|name| (name, graph.dependencies_of(name).map_or(0, BTreeSet::len)))
        .collect();

    let mut frontier: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut levels = Vec::new();
    let mut placed = 0;

    while !frontier.is_empty() {
        let mut next = BTreeSet::new();

        for name in &frontier {
            in_degree.remove(name);
            let Some(dependents) = graph.dependents_of(name) else {
                continue;
            };
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(dependent.as_str());
                    }
                }
            }
        }

        placed += frontier.len();
        levels.push(frontier.iter().map(|name| (*name).to_string()).collect());
        frontier = next;
    }

    if placed < graph.len() {
        let remaining: BTreeSet<&str> = in_degree.keys().copied().collect();
        return Err(PlanError::CycleDetected {
            cycle: extract_cycle(graph, &remaining),
        });
    }

    Ok(levels)
}

/// Walks dependency edges among unplaced resources until a name repeats.
///
/// Every unplaced resource still has an unplaced dependency, so the walk
/// always closes. The smallest dependency is taken at each step and the
/// cycle is rotated to start at its smallest member.
fn extract_cycle(graph: &ResourceGraph, remaining: &BTreeSet<&str>) -> Vec<String> {
    let Some(start) = remaining.iter().next().copied() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut position: BTreeMap<&str, usize> = BTreeMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(current) {
            let mut cycle: Vec<String> = path[at..].iter().map(|n| (*n).to_string()).collect();
            if let Some(min_at) = cycle
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cmp(b.1))
                .map(|(i, _)| i)
            {
                cycle.rotate_left(min_at);
            }
            return cycle;
        }

        position.insert(current, path.len());
        path.push(current);

        let next = graph
            .dependencies_of(current)
            .and_then(|deps| deps.iter().map(String::as_str).find(|d| remaining.contains(d)));

        match next {
            Some(dep) => current = dep,
            None => return path.iter().map(|n| (*n).to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, ProviderContext};
    use crate::resource::{InputValue, Inputs, ResourceKind, ResourceSpec};

    fn network(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Network, name, Inputs::new())
    }

    /// A network whose cidr is taken from another network.
    fn network_from(name: &str, source: &str) -> ResourceSpec {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("cidr"), InputValue::reference(source, "cidr_block"));
        ResourceSpec::new(ResourceKind::Network, name, inputs)
    }

    fn rule(name: &str, network: &str) -> ResourceSpec {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("network"), InputValue::reference(network, "network_id"));
        inputs.insert(String::from("port"), InputValue::literal(443));
        inputs.insert(String::from("peer_cidr"), InputValue::literal("10.0.0.0/16"));
        ResourceSpec::new(ResourceKind::SecurityGroupRule, name, inputs)
    }

    fn cluster(name: &str, sg: &str) -> ResourceSpec {
        let mut inputs = Inputs::new();
        inputs.insert(
            String::from("subnets"),
            InputValue::list([InputValue::literal("subnet-1")]),
        );
        inputs.insert(
            String::from("security_groups"),
            InputValue::list([InputValue::reference(sg, "security_group_id")]),
        );
        ResourceSpec::new(ResourceKind::ManagedCluster, name, inputs)
    }

    fn build(specs: Vec<ResourceSpec>) -> ResourceGraph {
        GraphBuilder::new(ProviderContext::new("123456789012", "eu-west-1", "demo-dev"))
            .build(specs)
            .unwrap()
    }

    fn layered() -> Vec<ResourceSpec> {
        vec![
            cluster("cluster", "sg-https"),
            rule("sg-https", "vpc"),
            rule("sg-ssh", "vpc"),
            network("vpc"),
            network("other"),
            network_from("peer", "other"),
        ]
    }

    #[test]
    fn test_network_rule_cluster_example() {
        let graph = build(vec![network("network"), rule("sg", "network"), cluster("cluster", "sg")]);
        let planner = Planner::new();

        let apply = planner.plan(&graph, PlanMode::Apply).unwrap();
        assert_eq!(
            apply.level_names(),
            vec![vec!["network"], vec!["sg"], vec!["cluster"]]
        );

        let destroy = planner.plan(&graph, PlanMode::Destroy).unwrap();
        assert_eq!(
            destroy.level_names(),
            vec![vec!["cluster"], vec!["sg"], vec!["network"]]
        );
    }

    #[test]
    fn test_two_node_cycle_is_reported_from_smallest_name() {
        let graph = build(vec![network_from("b", "a"), network_from("a", "b")]);

        let err = Planner::new().plan(&graph, PlanMode::Apply).unwrap_err();
        assert_eq!(
            err,
            PlanError::CycleDetected {
                cycle: vec![String::from("a"), String::from("b")],
            }
        );
    }

    #[test]
    fn test_longer_cycle_names_every_member() {
        // ok is placed, tail hangs off the cycle but is not part of it
        let graph = build(vec![
            network("ok"),
            network_from("x", "z"),
            network_from("y", "x"),
            network_from("z", "y"),
            network_from("tail", "x"),
        ]);

        let Err(PlanError::CycleDetected { cycle }) = apply_levels(&graph) else {
            panic!("expected a cycle");
        };
        // x refs z, z refs y, y refs x
        assert_eq!(cycle, vec!["x", "z", "y"]);
    }

    #[test]
    fn test_every_resource_follows_its_dependencies() {
        let graph = build(layered());
        let plan = Planner::new().plan(&graph, PlanMode::Apply).unwrap();

        for (from, to) in graph.edges() {
            assert!(
                plan.level_of(from).unwrap() < plan.level_of(to).unwrap(),
                "{from} must precede {to}"
            );
        }
        assert_eq!(plan.resource_count(), graph.len());
    }

    #[test]
    fn test_levels_are_sorted() {
        let graph = build(layered());
        let plan = Planner::new().plan(&graph, PlanMode::Apply).unwrap();

        assert_eq!(
            plan.level_names(),
            vec![
                vec!["other", "vpc"],
                vec!["peer", "sg-https", "sg-ssh"],
                vec!["cluster"],
            ]
        );
    }

    #[test]
    fn test_destroy_is_exact_reverse_of_apply() {
        let graph = build(layered());
        let planner = Planner::new();

        let apply = planner.plan(&graph, PlanMode::Apply).unwrap();
        let destroy = planner.plan(&graph, PlanMode::Destroy).unwrap();

        let mut reversed = apply.level_names();
        reversed.reverse();

        assert_eq!(reversed, destroy.level_names());
        assert_eq!(apply.graph_hash, destroy.graph_hash);
    }

    #[test]
    fn test_plan_ignores_input_order() {
        let mut reversed = layered();
        reversed.reverse();

        let planner = Planner::new();
        let a = planner.plan(&build(layered()), PlanMode::Apply).unwrap();
        let b = planner.plan(&build(reversed), PlanMode::Apply).unwrap();

        assert_eq!(a.level_names(), b.level_names());
        assert_eq!(a.graph_hash, b.graph_hash);
    }

    #[test]
    fn test_empty_graph_plans_to_nothing() {
        let plan = Planner::new().plan(&build(vec![]), PlanMode::Apply).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.level_count(), 0);
    }
}
