//! Resource graph.
//!
//! Nodes are resource specs keyed by name. Edges are derived from input
//! references and point from the referenced resource to the referencing
//! one. Everything lives in ordered maps and sets so the graph, and any
//! plan derived from it, does not depend on declaration order.

mod builder;

pub use builder::GraphBuilder;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::InfraConfig;
use crate::resource::{Reference, ResourceSpec};

/// Account, region and stack name the graph is provisioned into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
    /// Provider account identifier.
    pub account: String,
    /// Provider region.
    pub region: String,
    /// Qualified stack name.
    pub stack: String,
}

impl ProviderContext {
    /// Creates a provider context.
    #[must_use]
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            stack: stack.into(),
        }
    }

    /// Builds the context from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &InfraConfig) -> Self {
        Self::new(
            config.provider.account.clone(),
            config.provider.region.clone(),
            config.qualified_name(),
        )
    }
}

/// A validated dependency graph of resources.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    provider: ProviderContext,
    nodes: BTreeMap<String, Arc<ResourceSpec>>,
    /// name -> resources it references
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// name -> resources referencing it
    dependents: BTreeMap<String, BTreeSet<String>>,
    exports: BTreeMap<String, Reference>,
}

impl ResourceGraph {
    /// Rebuilds a graph from recorded specs.
    ///
    /// References to resources outside `specs` are dropped instead of
    /// rejected. Used to order the teardown of resources that are recorded
    /// but no longer declared.
    #[must_use]
    pub fn from_recorded(provider: ProviderContext, specs: Vec<ResourceSpec>) -> Self {
        let mut graph = Self::empty(provider);
        for spec in specs {
            graph.insert_node(spec);
        }

        let names: Vec<String> = graph.nodes.keys().cloned().collect();
        for name in names {
            let deps: Vec<String> = graph.nodes[&name]
                .dependency_names()
                .into_iter()
                .filter(|dep| *dep != name && graph.nodes.contains_key(*dep))
                .map(str::to_string)
                .collect();
            for dep in deps {
                graph.add_edge(&dep, &name);
            }
        }

        graph
    }

    pub(crate) fn empty(provider: ProviderContext) -> Self {
        Self {
            provider,
            nodes: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            dependents: BTreeMap::new(),
            exports: BTreeMap::new(),
        }
    }

    pub(crate) fn insert_node(&mut self, spec: ResourceSpec) {
        let name = spec.name().to_string();
        self.dependencies.entry(name.clone()).or_default();
        self.dependents.entry(name.clone()).or_default();
        self.nodes.insert(name, Arc::new(spec));
    }

    /// Records that `to` references `from`.
    pub(crate) fn add_edge(&mut self, from: &str, to: &str) {
        self.dependencies
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
        self.dependents
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub(crate) fn set_exports(&mut self, exports: BTreeMap<String, Reference>) {
        self.exports = exports;
    }

    /// Provider context.
    #[must_use]
    pub const fn provider(&self) -> &ProviderContext {
        &self.provider
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ResourceSpec>> {
        self.nodes.get(name)
    }

    /// Returns true if the graph contains the named resource.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Nodes in name order.
    pub fn specs(&self) -> impl Iterator<Item = &Arc<ResourceSpec>> {
        self.nodes.values()
    }

    /// Resources referenced by `name`.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(name)
    }

    /// Resources referencing `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(name)
    }

    /// All `(referenced, referencing)` edges in sorted order.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.dependents
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.as_str(), to.as_str())))
            .collect()
    }

    /// Stack exports.
    #[must_use]
    pub const fn exports(&self) -> &BTreeMap<String, Reference> {
        &self.exports
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
