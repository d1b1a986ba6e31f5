//! Configuration validation for stack files.
//!
//! Checks everything that can be checked without building the graph: names,
//! provider settings, the state backend, required inputs and literal
//! shapes. Permissive cloud settings are accepted but reported as warnings.

use crate::error::{ConfigError, InfraError, Result};
use tracing::debug;

use super::spec::{InfraConfig, ResourceDecl, StateBackend};
use crate::resource::{InputValue, ResourceKind};

/// CIDR that opens a rule to the whole internet.
const ANY_CIDR: &str = "0.0.0.0/0";

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &InfraConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(InfraError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!(
            "Configuration validation passed with {} warning(s)",
            result.warnings.len()
        );
        Ok(result)
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, config: &InfraConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(config, &mut result);
        Self::validate_provider(config, &mut result);
        Self::validate_state(config, &mut result);

        if config.engine.max_parallel == 0 {
            result.error("engine.max_parallel", "max_parallel must be at least 1");
        }

        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
        }

        for (name, decl) in &config.resources {
            Self::validate_resource(name, decl, &mut result);
        }

        result
    }

    fn validate_stack(config: &InfraConfig, result: &mut ValidationResult) {
        let name = &config.stack.name;
        if name.is_empty() {
            result.error("stack.name", "Stack name cannot be empty");
        } else if !is_valid_stack_name(name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{name}' is invalid. Must be lowercase alphanumeric with hyphens."
                ),
            );
        }

        if config.stack.environment.is_empty() {
            result.error("stack.environment", "Environment cannot be empty");
        }
    }

    fn validate_provider(config: &InfraConfig, result: &mut ValidationResult) {
        if config.provider.region.is_empty() {
            result.error(
                "provider.region",
                "Provider region is required (set provider.region, INFRAGRAPH_REGION or CDK_DEFAULT_REGION)",
            );
        }

        if config.provider.account.is_empty() {
            result.warnings.push(String::from(
                "provider.account: No account set, ARNs will carry an empty account",
            ));
        } else if !config.provider.account.chars().all(|c| c.is_ascii_digit()) {
            result.error(
                "provider.account",
                format!("Account '{}' must be numeric", config.provider.account),
            );
        }
    }

    fn validate_state(config: &InfraConfig, result: &mut ValidationResult) {
        match config.state.backend {
            StateBackend::S3 => {
                if config.state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    fn validate_resource(name: &str, decl: &ResourceDecl, result: &mut ValidationResult) {
        let prefix = format!("resources.{name}");

        if !is_valid_resource_name(name) {
            result.error(
                &prefix,
                format!(
                    "Resource name '{name}' is invalid. Must start with a lowercase letter and contain only lowercase letters, digits, '-' or '_'."
                ),
            );
        }

        let schema = decl.kind.schema();

        for required in schema.required_inputs() {
            if !decl.inputs.contains_key(required) {
                result.error(
                    format!("{prefix}.inputs.{required}"),
                    format!("{} '{name}' requires input '{required}'", decl.kind),
                );
            }
        }

        for (field, value) in &decl.inputs {
            match schema.field(field) {
                Some(spec) if !value.matches_shape(spec.shape) => result.error(
                    format!("{prefix}.inputs.{field}"),
                    format!("Input '{field}' of '{name}' must be a {}", spec.shape),
                ),
                Some(_) => {}
                None => result.warnings.push(format!(
                    "{prefix}.inputs.{field}: Unknown input for {}, it will be passed through",
                    decl.kind
                )),
            }
        }

        Self::check_policy(name, decl, &prefix, result);
    }

    /// Reports settings that are valid but widen exposure.
    fn check_policy(name: &str, decl: &ResourceDecl, prefix: &str, result: &mut ValidationResult) {
        let literal = |field: &str| decl.inputs.get(field).and_then(InputValue::as_str);

        match decl.kind {
            ResourceKind::SecurityGroupRule => {
                let ingress = literal("direction").is_none_or(|d| d == "ingress");
                if ingress && literal("peer_cidr") == Some(ANY_CIDR) {
                    result.warnings.push(format!(
                        "{prefix}.inputs.peer_cidr: '{name}' allows ingress from {ANY_CIDR}"
                    ));
                }
            }
            ResourceKind::ManagedCluster => {
                if literal("endpoint_access").is_some_and(|a| a.contains("public")) {
                    result.warnings.push(format!(
                        "{prefix}.inputs.endpoint_access: '{name}' exposes a public API endpoint"
                    ));
                }
                if decl
                    .inputs
                    .get("fargate_selectors")
                    .is_some_and(has_wildcard)
                {
                    result.warnings.push(format!(
                        "{prefix}.inputs.fargate_selectors: '{name}' schedules every namespace on Fargate"
                    ));
                }
                if decl
                    .inputs
                    .get("secrets_encryption")
                    .is_some_and(|v| *v == InputValue::literal(false))
                {
                    result.warnings.push(format!(
                        "{prefix}.inputs.secrets_encryption: '{name}' stores secrets unencrypted"
                    ));
                }
            }
            _ => {}
        }
    }
}

fn has_wildcard(value: &InputValue) -> bool {
    match value {
        InputValue::Literal(serde_json::Value::String(s)) => s == "*",
        InputValue::List(items) => items.iter().any(has_wildcard),
        InputValue::Map(entries) => entries.values().any(has_wildcard),
        InputValue::Literal(_) | InputValue::Ref(_) => false,
    }
}

/// Checks if a stack name is valid (lowercase alphanumeric with hyphens).
fn is_valid_stack_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') && !name.ends_with('-')
}

fn is_valid_resource_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> InfraConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const BASE: &str = r"
stack:
  name: demo
provider:
  account: '123456789012'
  region: eu-west-1
";

    #[test]
    fn test_valid_names() {
        assert!(is_valid_stack_name("eks-infra"));
        assert!(is_valid_stack_name("a1"));
        assert!(!is_valid_stack_name("EksInfra"));
        assert!(!is_valid_stack_name("1-stack"));
        assert!(!is_valid_stack_name("stack-"));
        assert!(is_valid_resource_name("private_a"));
        assert!(!is_valid_resource_name("_private"));
    }

    #[test]
    fn test_bundled_template_is_valid() {
        let config = parse(include_str!("../../templates/infragraph.yaml"));
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_missing_required_input() {
        let config = parse(&format!(
            "{BASE}
resources:
  vpc:
    kind: network
"
        ));
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "resources.vpc.inputs.availability_zones");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_literal_shape_mismatch() {
        let config = parse(&format!(
            "{BASE}
resources:
  vpc:
    kind: network
    inputs:
      availability_zones: eu-west-1a
      nat_gateways: one
"
        ));
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "resources.vpc.inputs.availability_zones",
                "resources.vpc.inputs.nat_gateways"
            ]
        );
    }

    #[test]
    fn test_policy_warnings() {
        let config = parse(&format!(
            "{BASE}
resources:
  vpc:
    kind: network
    inputs:
      availability_zones: [eu-west-1a]
  open:
    kind: security_group_rule
    inputs:
      network: {{ ref: vpc, output: network_id }}
      port: 22
      peer_cidr: 0.0.0.0/0
  cluster:
    kind: managed_cluster
    inputs:
      subnets: [subnet-1]
      endpoint_access: public_and_private
      fargate_selectors:
        - namespace: '*'
"
        ));
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings.iter().any(|w| w.contains("0.0.0.0/0")));
        assert!(result.warnings.iter().any(|w| w.contains("every namespace")));
    }

    #[test]
    fn test_provider_and_state_checks() {
        let config = parse(
            r"
stack:
  name: demo
engine:
  max_parallel: 0
state:
  backend: s3
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["provider.region", "state.bucket", "engine.max_parallel"]
        );
        assert!(result.warnings.iter().any(|w| w.starts_with("provider.account")));
    }

    #[test]
    fn test_unknown_input_is_a_warning() {
        let config = parse(&format!(
            "{BASE}
resources:
  vpc:
    kind: network
    inputs:
      availability_zones: [eu-west-1a]
      flow_logs: true
"
        ));
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("flow_logs"));
    }
}
