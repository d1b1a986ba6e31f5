//! Resource descriptors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::kind::{OutputType, ResourceKind};
use super::value::{InputValue, Reference};

/// Input fields of a resource, keyed by field name.
pub type Inputs = BTreeMap<String, InputValue>;

/// Declared outputs of a resource, keyed by field name.
pub type OutputDecls = BTreeMap<String, OutputType>;

/// An immutable resource descriptor.
///
/// Built once per invocation and shared read-only afterwards. Optional
/// inputs the kind schema knows about are filled with their defaults on
/// construction, and the kind's outputs are always declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    kind: ResourceKind,
    name: String,
    inputs: Inputs,
    outputs: OutputDecls,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl ResourceSpec {
    /// Creates a resource spec, applying kind defaults.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>, mut inputs: Inputs) -> Self {
        let schema = kind.schema();

        for field in schema.inputs {
            if inputs.contains_key(field.name) {
                continue;
            }
            if let Some(default) = field.default.to_input() {
                inputs.insert(field.name.to_string(), default);
            }
        }

        let outputs = schema
            .outputs
            .iter()
            .map(|(field, ty)| ((*field).to_string(), *ty))
            .collect();

        Self {
            kind,
            name: name.into(),
            inputs,
            outputs,
            tags: BTreeMap::new(),
        }
    }

    /// Declares additional outputs on top of the kind defaults.
    #[must_use]
    pub fn with_outputs(mut self, outputs: OutputDecls) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Sets the tags applied to the resource.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resource name, unique within a graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs, including applied defaults.
    #[must_use]
    pub const fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Looks up a single input.
    #[must_use]
    pub fn input(&self, field: &str) -> Option<&InputValue> {
        self.inputs.get(field)
    }

    /// Declared outputs.
    #[must_use]
    pub const fn outputs(&self) -> &OutputDecls {
        &self.outputs
    }

    /// Returns true if the resource declares the given output.
    #[must_use]
    pub fn declares_output(&self, field: &str) -> bool {
        self.outputs.contains_key(field)
    }

    /// Tags applied to the resource.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// All references in the inputs, in field order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        self.inputs.values().flat_map(InputValue::references).collect()
    }

    /// Names of the resources this spec depends on.
    #[must_use]
    pub fn dependency_names(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.resource.as_str())
            .collect()
    }
}
