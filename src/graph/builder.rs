//! Graph construction and reference validation.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{ProviderContext, ResourceGraph};
use crate::error::GraphError;
use crate::resource::{Reference, ResourceSpec};

/// Builds a [`ResourceGraph`] from resource specs.
///
/// The builder is pure: the same specs produce the same graph regardless of
/// the order they are given in.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    provider: ProviderContext,
    exports: BTreeMap<String, Reference>,
}

impl GraphBuilder {
    /// Creates a builder for the given provider context.
    #[must_use]
    pub fn new(provider: ProviderContext) -> Self {
        Self {
            provider,
            exports: BTreeMap::new(),
        }
    }

    /// Attaches stack exports, validated like resource references.
    #[must_use]
    pub fn with_exports(mut self, exports: BTreeMap<String, Reference>) -> Self {
        self.exports = exports;
        self
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if two specs share a name, a spec references itself,
    /// a reference points at an undefined resource, or a reference names an
    /// output the target does not declare.
    pub fn build(self, specs: Vec<ResourceSpec>) -> Result<ResourceGraph, GraphError> {
        let mut graph = ResourceGraph::empty(self.provider);

        let mut sorted = specs;
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        for spec in sorted {
            if graph.contains(spec.name()) {
                return Err(GraphError::DuplicateName {
                    name: spec.name().to_string(),
                });
            }
            graph.insert_node(spec);
        }

        let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
        for spec in graph.specs() {
            for reference in spec.references() {
                check_reference(&graph, spec.name(), reference)?;
                edges.insert((reference.resource.clone(), spec.name().to_string()));
            }
        }

        for (name, reference) in &self.exports {
            check_reference(&graph, &format!("exports.{name}"), reference)?;
        }

        for (from, to) in &edges {
            graph.add_edge(from, to);
        }
        graph.set_exports(self.exports);

        debug!(
            "Built graph with {} resources and {} edges",
            graph.len(),
            edges.len()
        );

        Ok(graph)
    }
}

fn check_reference(
    graph: &ResourceGraph,
    from: &str,
    reference: &Reference,
) -> Result<(), GraphError> {
    if reference.resource == from {
        return Err(GraphError::SelfReference {
            resource: from.to_string(),
        });
    }

    let Some(target) = graph.get(&reference.resource) else {
        return Err(GraphError::DanglingReference {
            resource: from.to_string(),
            missing: reference.resource.clone(),
        });
    };

    if !target.declares_output(&reference.output) {
        return Err(GraphError::UnknownOutput {
            resource: from.to_string(),
            target: reference.resource.clone(),
            output: reference.output.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{InputValue, Inputs, ResourceKind};

    fn network(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Network, name, Inputs::new())
    }

    fn rule(name: &str, network: &str, output: &str) -> ResourceSpec {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("network"), InputValue::reference(network, output));
        inputs.insert(String::from("port"), InputValue::literal(443));
        inputs.insert(String::from("peer_cidr"), InputValue::literal("10.0.0.0/16"));
        ResourceSpec::new(ResourceKind::SecurityGroupRule, name, inputs)
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(ProviderContext::new("123456789012", "eu-west-1", "demo-dev"))
    }

    #[test]
    fn test_edges_point_from_referenced_to_referencing() {
        let graph = builder()
            .build(vec![rule("sg", "net", "network_id"), network("net")])
            .unwrap();

        assert_eq!(graph.edges(), vec![("net", "sg")]);
        assert!(graph.dependencies_of("sg").unwrap().contains("net"));
        assert!(graph.dependents_of("net").unwrap().contains("sg"));
    }

    #[test]
    fn test_dangling_reference_names_missing_resource() {
        let err = builder()
            .build(vec![rule("sg", "missing-net", "network_id")])
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::DanglingReference {
                resource: String::from("sg"),
                missing: String::from("missing-net"),
            }
        );
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("cidr"), InputValue::reference("net", "cidr_block"));
        let spec = ResourceSpec::new(ResourceKind::Network, "net", inputs);

        let err = builder().build(vec![spec]).unwrap_err();
        assert_eq!(err, GraphError::SelfReference { resource: String::from("net") });
    }

    #[test]
    fn test_unknown_output_is_rejected() {
        let err = builder()
            .build(vec![network("net"), rule("sg", "net", "vpc_arn")])
            .unwrap_err();

        assert!(matches!(err, GraphError::UnknownOutput { output, .. } if output == "vpc_arn"));
    }

    #[test]
    fn test_duplicate_names_in_input_vector() {
        let err = builder().build(vec![network("net"), network("net")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName { name: String::from("net") });
    }

    #[test]
    fn test_exports_are_validated() {
        let mut exports = BTreeMap::new();
        exports.insert(String::from("vpc_id"), Reference::new("gone", "network_id"));

        let err = builder()
            .with_exports(exports)
            .build(vec![network("net")])
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::DanglingReference {
                resource: String::from("exports.vpc_id"),
                missing: String::from("gone"),
            }
        );
    }
}
