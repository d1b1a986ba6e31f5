//! S3-based state storage backend.
//!
//! State for a stack lives at `s3://<bucket>/<prefix><stack>/state.json`
//! with the lock record beside it, so one bucket can hold many stacks.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{InfraError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::StateStore;
use super::types::InfraState;

const STATE_KEY: &str = "state.json";
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    /// Normalized prefix including the stack directory, ends with `/`.
    prefix: String,
}

impl S3StateStore {
    /// Creates a store for `stack`, loading AWS configuration from the
    /// environment.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>, stack: &str) -> Self {
        let loader = aws_config::defaults(BehaviorVersion::latest());
        let config = match region {
            Some(region) => loader.region(Region::new(region.to_string())).load().await,
            None => loader.load().await,
        };

        Self::with_client(Client::new(&config), bucket, prefix, stack)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>, stack: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: stack_prefix(prefix, stack),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    InfraError::State(StateError::s3(format!("Failed to read S3 object: {e}")))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    InfraError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(InfraError::State(StateError::s3(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| InfraError::State(StateError::s3(format!("S3 put error: {e}"))))?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| InfraError::State(StateError::s3(format!("S3 delete error: {e}"))))?;

        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };

        let lock = serde_json::from_str(&content).map_err(|e| {
            InfraError::State(StateError::Corrupted {
                message: format!("Failed to parse lock: {e}"),
            })
        })?;
        Ok(Some(lock))
    }
}

/// Builds `<prefix>/<stack>/` with redundant slashes removed.
fn stack_prefix(prefix: Option<&str>, stack: &str) -> String {
    [prefix.unwrap_or_default(), stack]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .map(|part| format!("{part}/"))
        .collect()
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<InfraState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from {}", self.url(&key));

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let state: InfraState = serde_json::from_str(&json).map_err(|e| {
            InfraError::State(StateError::Corrupted {
                message: format!("Failed to parse state: {e}"),
            })
        })?;
        state.ensure_compatible()?;

        info!("Loaded state for stack: {}/{}", state.stack, state.environment);
        Ok(Some(state))
    }

    async fn save(&self, state: &InfraState) -> Result<()> {
        let key = self.key(STATE_KEY);
        info!("Saving state to {}", self.url(&key));

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            InfraError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;
        self.put_object(&key, content).await
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state at {}", self.url(&state_key));

        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(STATE_KEY))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(InfraError::State(StateError::s3(format!(
                        "S3 head error: {service_err}"
                    ))))
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(existing.conflict().into());
            }
            warn!("Taking over expired lock held by {}", existing.holder);
        }

        let lock_info = LockInfo::new(&holder_or_generated(holder), operation);
        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            InfraError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;
        self.put_object(&self.key(LOCK_KEY), content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        let key = self.key(LOCK_KEY);
        warn!("Force-removing state lock at {}", self.url(&key));
        self.delete_object(&key).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_stack_prefix_normalization() {
        assert_eq!(stack_prefix(None, "demo-dev"), "demo-dev/");
        assert_eq!(stack_prefix(Some("/infra/state/"), "demo-dev"), "infra/state/demo-dev/");
        assert_eq!(stack_prefix(Some(""), "demo-dev"), "demo-dev/");
    }

    #[test]
    fn test_keys_are_scoped_to_stack() {
        let store = S3StateStore::with_client(offline_client(), "bucket", Some("tf"), "demo-prod");

        assert_eq!(store.key(STATE_KEY), "tf/demo-prod/state.json");
        assert_eq!(
            store.url(&store.key(LOCK_KEY)),
            "s3://bucket/tf/demo-prod/state.lock"
        );
        assert_eq!(store.backend_type(), "s3");
    }
}
