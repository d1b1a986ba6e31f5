//! Configuration types for infragraph.
//!
//! This module defines all the structs that map to the `infragraph.yaml` file.
//! These types are declarative and fully describe the desired stack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::{Inputs, OutputDecls, Reference, ResourceKind};

/// The root configuration structure for an infragraph stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfraConfig {
    /// Stack-level configuration.
    pub stack: StackConfig,
    /// Provider context.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Apply engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Tags applied to every resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Declared resources, keyed by name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDecl>,
    /// Named stack outputs.
    #[serde(default)]
    pub exports: BTreeMap<String, Reference>,
}

/// Stack-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Unique name for the stack.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Account and region the stack is provisioned into.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider account identifier.
    #[serde(default)]
    pub account: String,
    /// Provider region.
    #[serde(default)]
    pub region: String,
}

/// Apply engine tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of resources in flight within a level.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses the provider region if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Input fields.
    #[serde(default)]
    pub inputs: Inputs,
    /// Outputs declared on top of the kind defaults.
    #[serde(default)]
    pub outputs: OutputDecls,
    /// Resource tags, merged over the stack tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

const fn default_max_parallel() -> usize {
    4
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

impl InfraConfig {
    /// Returns the fully qualified stack name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.stack.name, self.stack.environment)
    }

    /// Returns resource names in sorted order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the number of declared resources of a kind.
    #[must_use]
    pub fn count_kind(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InputValue;

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = r"
stack:
  name: demo
";
        let config: InfraConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stack.environment, "dev");
        assert_eq!(config.engine.max_parallel, 4);
        assert_eq!(config.state.backend, StateBackend::Local);
        assert!(config.resources.is_empty());
        assert_eq!(config.qualified_name(), "demo-dev");
    }

    #[test]
    fn test_resource_declaration_with_reference() {
        let yaml = r"
stack:
  name: demo
resources:
  vpc:
    kind: network
    inputs:
      availability_zones: [eu-west-1a, eu-west-1b]
  sg:
    kind: security_group_rule
    inputs:
      network: { ref: vpc, output: network_id }
      port: 443
      peer_cidr: 10.0.0.0/16
exports:
  vpc_id: { ref: vpc, output: network_id }
";
        let config: InfraConfig = serde_yaml::from_str(yaml).unwrap();

        let sg = &config.resources["sg"];
        assert_eq!(sg.kind, ResourceKind::SecurityGroupRule);
        assert_eq!(sg.inputs["network"], InputValue::reference("vpc", "network_id"));
        assert_eq!(config.exports["vpc_id"], Reference::new("vpc", "network_id"));
        assert_eq!(config.count_kind(ResourceKind::Network), 1);
        assert_eq!(config.resource_names(), vec!["sg", "vpc"]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = r"
stack:
  name: demo
resources:
  db:
    kind: database
";
        assert!(serde_yaml::from_str::<InfraConfig>(yaml).is_err());
    }
}
