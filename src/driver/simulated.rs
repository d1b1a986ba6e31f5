//! Deterministic in-process driver.
//!
//! Produces provider-shaped identifiers without calling any API. Used for
//! dry runs, demos and tests. Identifiers only depend on the stack, the
//! resource name and the output field, so repeated runs report the same
//! outputs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{DiffOutcome, Driver, Outputs, ResolvedInputs};
use crate::config::SpecHasher;
use crate::error::DriverError;
use crate::graph::ProviderContext;
use crate::resource::{OutputType, ResourceSpec};
use crate::state::RecordedResource;

/// A driver that simulates provisioning.
#[derive(Debug)]
pub struct SimulatedDriver {
    provider: ProviderContext,
    latency: Option<Duration>,
    timeout: Option<Duration>,
    fail_on: BTreeSet<String>,
    hasher: SpecHasher,
    creates: AtomicUsize,
    destroys: AtomicUsize,
    diffs: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl SimulatedDriver {
    /// Creates a simulated driver for the given provider context.
    #[must_use]
    pub fn new(provider: ProviderContext) -> Self {
        Self {
            provider,
            latency: None,
            timeout: None,
            fail_on: BTreeSet::new(),
            hasher: SpecHasher::new(),
            creates: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            diffs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delays every create and destroy call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fails calls that would take longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Rejects create and destroy calls for the named resource.
    #[must_use]
    pub fn fail_on(mut self, name: impl Into<String>) -> Self {
        self.fail_on.insert(name.into());
        self
    }

    /// Number of create calls made.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of destroy calls made.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Number of diff calls made.
    #[must_use]
    pub fn diff_count(&self) -> usize {
        self.diffs.load(Ordering::SeqCst)
    }

    /// Highest number of create or destroy calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Calls made so far, as `create:<name>` or `destroy:<name>`, in start
    /// order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn begin(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn wait(&self, spec: &ResourceSpec) -> Result<(), DriverError> {
        let Some(latency) = self.latency else {
            return Ok(());
        };

        match self.timeout {
            Some(timeout) if latency > timeout => {
                tokio::time::sleep(timeout).await;
                Err(DriverError::Timeout {
                    resource: spec.name().to_string(),
                    secs: timeout.as_secs(),
                })
            }
            _ => {
                tokio::time::sleep(latency).await;
                Ok(())
            }
        }
    }

    fn check_failure(&self, spec: &ResourceSpec) -> Result<(), DriverError> {
        if self.fail_on.contains(spec.name()) {
            return Err(DriverError::rejected(format!(
                "simulated failure for {} '{}'",
                spec.kind(),
                spec.name()
            )));
        }
        Ok(())
    }

    fn digest(&self, spec: &ResourceSpec, field: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.stack.as_bytes());
        hasher.update(b"/");
        hasher.update(spec.name().as_bytes());
        hasher.update(b"/");
        hasher.update(field.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn arn(&self, spec: &ResourceSpec, field: &str) -> String {
        let resource_type = field.trim_end_matches("_arn");
        // IAM is a global service, ARNs carry no region
        let region = if spec.kind().service() == "iam" {
            ""
        } else {
            self.provider.region.as_str()
        };
        format!(
            "arn:aws:{}:{region}:{}:{resource_type}/{}",
            spec.kind().service(),
            self.provider.account,
            spec.name()
        )
    }

    fn output_value(
        &self,
        spec: &ResourceSpec,
        inputs: &ResolvedInputs,
        field: &str,
        ty: OutputType,
    ) -> serde_json::Value {
        if let Some(value) = inputs.get(field) {
            return value.clone();
        }

        let digest = self.digest(spec, field);
        match (field, ty) {
            ("cidr_block", _) => inputs
                .get("cidr")
                .cloned()
                .unwrap_or_else(|| serde_json::json!("10.0.0.0/16")),
            ("cluster_name" | "role_name", _) => serde_json::json!(spec.name()),
            ("endpoint", _) => serde_json::json!(format!(
                "https://{}.gr7.{}.eks.amazonaws.com",
                &digest[..32],
                self.provider.region
            )),
            ("private_ip", _) => {
                let octets = hex::decode(&digest[..4]).unwrap_or_default();
                let third = octets.first().copied().unwrap_or(0);
                let fourth = octets.get(1).copied().unwrap_or(0).max(4);
                serde_json::json!(format!("10.0.{third}.{fourth}"))
            }
            (f, _) if f.ends_with("_arn") => serde_json::json!(self.arn(spec, f)),
            (f, OutputType::String) if f.ends_with("_id") => {
                serde_json::json!(format!("{}-{}", id_prefix_for(spec, f), &digest[..17]))
            }
            (_, OutputType::String) => serde_json::json!(&digest[..12]),
            (_, OutputType::StringList) => serde_json::json!([&digest[..12]]),
            (_, OutputType::Number) => serde_json::json!(0),
            (_, OutputType::Bool) => serde_json::json!(true),
        }
    }
}

/// Identifier prefix for an `_id` output, following provider conventions.
fn id_prefix_for(spec: &ResourceSpec, field: &str) -> &'static str {
    match field {
        "internet_gateway_id" => "igw",
        "route_table_id" => "rtb",
        "security_group_id" | "cluster_security_group_id" => "sg",
        "rule_id" => "sgr",
        _ => spec.kind().id_prefix(),
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create(
        &self,
        spec: &ResourceSpec,
        inputs: &ResolvedInputs,
    ) -> Result<Outputs, DriverError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.begin(format!("create:{}", spec.name()));
        debug!("Simulating create of {} '{}'", spec.kind(), spec.name());

        let waited = self.wait(spec).await;
        self.end();
        waited?;
        self.check_failure(spec)?;

        let outputs: Outputs = spec
            .outputs()
            .iter()
            .map(|(field, ty)| (field.clone(), self.output_value(spec, inputs, field, *ty)))
            .collect();

        info!("Created {} '{}'", spec.kind(), spec.name());
        Ok(outputs)
    }

    async fn destroy(&self, spec: &ResourceSpec, _outputs: &Outputs) -> Result<(), DriverError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.begin(format!("destroy:{}", spec.name()));
        debug!("Simulating destroy of {} '{}'", spec.kind(), spec.name());

        let waited = self.wait(spec).await;
        self.end();
        waited?;
        self.check_failure(spec)?;

        info!("Destroyed {} '{}'", spec.kind(), spec.name());
        Ok(())
    }

    async fn diff(
        &self,
        spec: &ResourceSpec,
        recorded: &RecordedResource,
    ) -> Result<DiffOutcome, DriverError> {
        self.diffs.fetch_add(1, Ordering::SeqCst);

        let current = self.hasher.hash_spec(spec);
        if SpecHasher::hashes_match(&current, &recorded.spec_hash) {
            Ok(DiffOutcome::NoChange)
        } else {
            Ok(DiffOutcome::Changed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{InputValue, Inputs, ResourceKind};

    fn driver() -> SimulatedDriver {
        SimulatedDriver::new(ProviderContext::new("123456789012", "eu-west-1", "demo-dev"))
    }

    fn resolved(pairs: &[(&str, serde_json::Value)]) -> ResolvedInputs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_outputs_are_deterministic_and_provider_shaped() {
        let spec = ResourceSpec::new(ResourceKind::Network, "vpc", Inputs::new());
        let inputs = resolved(&[("cidr", serde_json::json!("10.4.0.0/16"))]);

        let first = driver().create(&spec, &inputs).await.unwrap();
        let second = driver().create(&spec, &inputs).await.unwrap();

        assert_eq!(first, second);
        assert!(first["network_id"].as_str().unwrap().starts_with("vpc-"));
        assert!(first["internet_gateway_id"].as_str().unwrap().starts_with("igw-"));
        assert_eq!(first["cidr_block"], serde_json::json!("10.4.0.0/16"));
    }

    #[tokio::test]
    async fn test_arns_carry_provider_context() {
        let spec = ResourceSpec::new(ResourceKind::ManagedCluster, "cluster", Inputs::new());
        let outputs = driver().create(&spec, &ResolvedInputs::new()).await.unwrap();

        assert_eq!(
            outputs["cluster_arn"],
            serde_json::json!("arn:aws:eks:eu-west-1:123456789012:cluster/cluster")
        );
        assert_eq!(outputs["cluster_name"], serde_json::json!("cluster"));

        let role = ResourceSpec::new(ResourceKind::Role, "pod-exec", Inputs::new());
        let outputs = driver().create(&role, &ResolvedInputs::new()).await.unwrap();
        assert_eq!(
            outputs["role_arn"],
            serde_json::json!("arn:aws:iam::123456789012:role/pod-exec")
        );
    }

    #[tokio::test]
    async fn test_fail_on_rejects_named_resource() {
        let driver = driver().fail_on("bad");
        let spec = ResourceSpec::new(ResourceKind::Network, "bad", Inputs::new());

        let err = driver.create(&spec, &ResolvedInputs::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::Rejected { .. }));
        assert_eq!(driver.create_count(), 1);
        assert_eq!(driver.calls(), vec!["create:bad"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_timeout_times_out() {
        let driver = driver()
            .with_latency(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(5));
        let spec = ResourceSpec::new(ResourceKind::Network, "slow", Inputs::new());

        let err = driver.create(&spec, &ResolvedInputs::new()).await.unwrap_err();
        assert_eq!(
            err,
            DriverError::Timeout {
                resource: String::from("slow"),
                secs: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_diff_compares_spec_hash() {
        let driver = driver();
        let mut inputs = Inputs::new();
        inputs.insert(String::from("cidr"), InputValue::literal("10.0.0.0/16"));
        let spec = ResourceSpec::new(ResourceKind::Network, "vpc", inputs);

        let mut recorded = RecordedResource {
            spec: spec.clone(),
            spec_hash: SpecHasher::new().hash_spec(&spec),
            inputs_fingerprint: String::new(),
            outputs: Outputs::new(),
            applied_at: chrono::Utc::now(),
        };
        assert_eq!(driver.diff(&spec, &recorded).await.unwrap(), DiffOutcome::NoChange);

        recorded.spec_hash = String::from("stale");
        assert_eq!(driver.diff(&spec, &recorded).await.unwrap(), DiffOutcome::Changed);
        assert_eq!(driver.diff_count(), 2);
    }
}
