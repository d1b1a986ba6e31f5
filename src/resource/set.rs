//! Named collection of resource specs.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use super::kind::ResourceKind;
use super::spec::{Inputs, ResourceSpec};
use crate::config::InfraConfig;
use crate::error::GraphError;

/// A set of resource specs with unique names.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    specs: BTreeMap<String, ResourceSpec>,
}

impl ResourceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a resource, applying the kind defaults.
    ///
    /// References in `inputs` are recorded as-is.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if `name` is already defined in this set.
    pub fn define(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        inputs: Inputs,
    ) -> Result<&ResourceSpec, GraphError> {
        let name = name.into();
        let spec = ResourceSpec::new(kind, name.clone(), inputs);
        self.insert(spec)?;
        self.specs
            .get(&name)
            .ok_or(GraphError::DuplicateName { name })
    }

    /// Inserts a fully built spec.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if the spec's name is already defined.
    pub fn insert(&mut self, spec: ResourceSpec) -> Result<(), GraphError> {
        match self.specs.entry(spec.name().to_string()) {
            Entry::Occupied(entry) => Err(GraphError::DuplicateName {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(spec);
                Ok(())
            }
        }
    }

    /// Builds the set declared by a configuration.
    ///
    /// Stack tags are applied first and resource tags override them.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if two declarations share a name.
    pub fn from_config(config: &InfraConfig) -> Result<Self, GraphError> {
        let mut set = Self::new();

        for (name, decl) in &config.resources {
            let mut tags = config.tags.clone();
            tags.extend(decl.tags.clone());

            let spec = ResourceSpec::new(decl.kind, name.clone(), decl.inputs.clone())
                .with_outputs(decl.outputs.clone())
                .with_tags(tags);
            set.insert(spec)?;
        }

        Ok(set)
    }

    /// Looks up a spec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceSpec> {
        self.specs.get(name)
    }

    /// Number of specs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Iterates over specs in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.values()
    }

    /// Consumes the set, returning specs in name order.
    #[must_use]
    pub fn into_specs(self) -> Vec<ResourceSpec> {
        self.specs.into_values().collect()
    }
}
