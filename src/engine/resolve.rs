//! Reference resolution.
//!
//! Turns declared inputs into plain JSON values just before dispatch. A
//! reference only resolves against a resource that reached `Applied` in
//! the current pass.

use std::collections::BTreeMap;

use super::status::{ResourceState, ResourceStatus};
use crate::driver::ResolvedInputs;
use crate::error::ResourceError;
use crate::graph::ProviderContext;
use crate::resource::{InputValue, Reference, ResourceSpec};

/// Resolves every input of `spec`.
///
/// # Errors
///
/// Returns `UnresolvedReference` for the first reference whose target is not
/// applied or did not report the output.
pub fn resolve_inputs(
    spec: &ResourceSpec,
    states: &BTreeMap<String, ResourceState>,
    provider: &ProviderContext,
) -> Result<ResolvedInputs, ResourceError> {
    spec.inputs()
        .iter()
        .map(|(field, value)| Ok((field.clone(), resolve_value(value, states, provider)?)))
        .collect()
}

/// Resolves stack exports, skipping those whose target is not applied.
#[must_use]
pub fn resolve_exports(
    exports: &BTreeMap<String, Reference>,
    states: &BTreeMap<String, ResourceState>,
) -> BTreeMap<String, serde_json::Value> {
    exports
        .iter()
        .filter_map(|(name, reference)| {
            lookup(reference, states)
                .ok()
                .map(|value| (name.clone(), value))
        })
        .collect()
}

fn resolve_value(
    value: &InputValue,
    states: &BTreeMap<String, ResourceState>,
    provider: &ProviderContext,
) -> Result<serde_json::Value, ResourceError> {
    match value {
        InputValue::Ref(reference) => lookup(reference, states),
        InputValue::List(items) => items
            .iter()
            .map(|item| resolve_value(item, states, provider))
            .collect::<Result<Vec<_>, ResourceError>>()
            .map(serde_json::Value::Array),
        InputValue::Map(entries) => entries
            .iter()
            .map(|(key, item)| Ok((key.clone(), resolve_value(item, states, provider)?)))
            .collect::<Result<serde_json::Map<_, _>, ResourceError>>()
            .map(serde_json::Value::Object),
        InputValue::Literal(serde_json::Value::String(s)) => {
            Ok(serde_json::Value::String(interpolate(s, provider)))
        }
        InputValue::Literal(literal) => Ok(literal.clone()),
    }
}

fn lookup(
    reference: &Reference,
    states: &BTreeMap<String, ResourceState>,
) -> Result<serde_json::Value, ResourceError> {
    states
        .get(&reference.resource)
        .filter(|state| state.status() == ResourceStatus::Applied)
        .and_then(|state| state.outputs().get(&reference.output))
        .cloned()
        .ok_or_else(|| ResourceError::UnresolvedReference {
            target: reference.resource.clone(),
            output: reference.output.clone(),
        })
}

/// Substitutes `${region}`, `${account}` and `${stack}`.
///
/// Other `${...}` sequences are left untouched.
#[must_use]
pub fn interpolate(template: &str, provider: &ProviderContext) -> String {
    if !template.contains("${") {
        return template.to_string();
    }

    template
        .replace("${region}", &provider.region)
        .replace("${account}", &provider.account)
        .replace("${stack}", &provider.stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Outputs;
    use crate::engine::ResourceAction;
    use crate::resource::{Inputs, ResourceKind};

    fn provider() -> ProviderContext {
        ProviderContext::new("123456789012", "eu-west-1", "demo-dev")
    }

    fn applied(name: &str, outputs: &[(&str, &str)]) -> ResourceState {
        let mut state = ResourceState::pending(name);
        state.transition(ResourceStatus::Applying).unwrap();
        let outputs: Outputs = outputs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
            .collect();
        state.applied(ResourceAction::Created, outputs).unwrap();
        state
    }

    fn states(list: Vec<ResourceState>) -> BTreeMap<String, ResourceState> {
        list.into_iter().map(|s| (s.name().to_string(), s)).collect()
    }

    #[test]
    fn test_nested_references_resolve() {
        let mut inputs = Inputs::new();
        inputs.insert(
            String::from("subnets"),
            InputValue::list([
                InputValue::reference("a", "subnet_id"),
                InputValue::reference("b", "subnet_id"),
            ]),
        );
        let spec = ResourceSpec::new(ResourceKind::ManagedCluster, "cluster", inputs);
        let states = states(vec![
            applied("a", &[("subnet_id", "subnet-1")]),
            applied("b", &[("subnet_id", "subnet-2")]),
        ]);

        let resolved = resolve_inputs(&spec, &states, &provider()).unwrap();

        assert_eq!(resolved["subnets"], serde_json::json!(["subnet-1", "subnet-2"]));
        assert_eq!(resolved["version"], serde_json::json!("1.21"));
    }

    #[test]
    fn test_reference_to_unapplied_resource_fails() {
        let mut inputs = Inputs::new();
        inputs.insert(String::from("network"), InputValue::reference("vpc", "network_id"));
        let spec = ResourceSpec::new(ResourceKind::Subnet, "subnet", inputs);

        let states = states(vec![ResourceState::pending("vpc")]);
        let err = resolve_inputs(&spec, &states, &provider()).unwrap_err();

        assert_eq!(
            err,
            ResourceError::UnresolvedReference {
                target: String::from("vpc"),
                output: String::from("network_id"),
            }
        );
    }

    #[test]
    fn test_interpolation() {
        let text = interpolate("arn:aws:eks:${region}:${account}:fargateprofile/${stack}/*", &provider());
        assert_eq!(text, "arn:aws:eks:eu-west-1:123456789012:fargateprofile/demo-dev/*");
        assert_eq!(interpolate("${unknown}", &provider()), "${unknown}");
    }

    #[test]
    fn test_exports_skip_unapplied_targets() {
        let mut exports = BTreeMap::new();
        exports.insert(String::from("vpc_id"), Reference::new("vpc", "network_id"));
        exports.insert(String::from("cluster"), Reference::new("cluster", "cluster_name"));

        let states = states(vec![applied("vpc", &[("network_id", "vpc-1")])]);
        let resolved = resolve_exports(&exports, &states);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["vpc_id"], serde_json::json!("vpc-1"));
    }
}
