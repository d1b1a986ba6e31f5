//! Configuration parser for loading stack files.
//!
//! Loads `infragraph.yaml` from disk, applies `INFRAGRAPH_*` environment
//! overrides and fills in the provider context from the CDK-style
//! `CDK_DEFAULT_*` variables when the file leaves it empty.

use crate::error::{ConfigError, InfraError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::InfraConfig;

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["infragraph.yaml", "infragraph.yml"];

/// Configuration parser for loading stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<InfraConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(InfraError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<InfraConfig> {
        debug!("Parsing YAML configuration");

        let config: InfraConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source
                .map(|p| p.display().to_string())
                .or_else(|| e.location().map(|l| format!("line {}, column {}", l.line(), l.column())));
            InfraError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack {} with {} resources",
            config.stack.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Overrides use the form `INFRAGRAPH_<KEY>`, for example
    /// `INFRAGRAPH_STACK_NAME` or `INFRAGRAPH_REGION`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<InfraConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `INFRAGRAPH_MAX_PARALLEL` is not a
    /// number.
    pub fn apply_env_overrides(
        config: &mut InfraConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(name) = lookup("INFRAGRAPH_STACK_NAME") {
            debug!("Overriding stack.name from environment");
            config.stack.name = name;
        }

        if let Some(env) = lookup("INFRAGRAPH_ENVIRONMENT") {
            debug!("Overriding stack.environment from environment");
            config.stack.environment = env;
        }

        if let Some(region) = lookup("INFRAGRAPH_REGION") {
            debug!("Overriding provider.region from environment");
            config.provider.region = region;
        } else if config.provider.region.is_empty() {
            if let Some(region) = lookup("CDK_DEFAULT_REGION") {
                debug!("Using CDK_DEFAULT_REGION for provider.region");
                config.provider.region = region;
            }
        }

        if let Some(account) = lookup("INFRAGRAPH_ACCOUNT") {
            debug!("Overriding provider.account from environment");
            config.provider.account = account;
        } else if config.provider.account.is_empty() {
            if let Some(account) = lookup("CDK_DEFAULT_ACCOUNT") {
                debug!("Using CDK_DEFAULT_ACCOUNT for provider.account");
                config.provider.account = account;
            }
        }

        if let Some(bucket) = lookup("INFRAGRAPH_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("INFRAGRAPH_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(raw) = lookup("INFRAGRAPH_MAX_PARALLEL") {
            debug!("Overriding engine.max_parallel from environment");
            config.engine.max_parallel = raw.trim().parse().map_err(|_| {
                ConfigError::validation(
                    format!("INFRAGRAPH_MAX_PARALLEL must be a positive integer, got '{raw}'"),
                    "engine.max_parallel",
                )
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                InfraError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds the configuration file in the start directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(InfraError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, ProviderContext};
    use crate::planner::{PlanMode, Planner};
    use crate::resource::{ResourceKind, ResourceSet};
    use std::collections::HashMap;

    const TEMPLATE: &str = include_str!("../../templates/infragraph.yaml");

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
stack:
  name: test-stack
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.stack.name, "test-stack");
        assert_eq!(config.stack.environment, "dev");
        assert!(config.provider.region.is_empty());
    }

    #[test]
    fn test_parse_error_reports_location() {
        let err = ConfigParser::new()
            .parse_yaml("stack: [unterminated", None)
            .unwrap_err();
        assert!(matches!(
            err,
            InfraError::Config(ConfigError::ParseError { location: Some(_), .. })
        ));
    }

    #[test]
    fn test_bundled_template_plans() {
        let config = ConfigParser::new().parse_yaml(TEMPLATE, None).unwrap();
        assert_eq!(config.count_kind(ResourceKind::Network), 1);
        assert_eq!(config.count_kind(ResourceKind::ManagedCluster), 1);

        let specs = ResourceSet::from_config(&config).unwrap().into_specs();
        let graph = GraphBuilder::new(ProviderContext::from_config(&config))
            .with_exports(config.exports.clone())
            .build(specs)
            .unwrap();
        let plan = Planner::new().plan(&graph, PlanMode::Apply).unwrap();

        assert_eq!(plan.resource_count(), config.resources.len());
        assert_eq!(plan.levels[0].resources, vec!["fargate_role", "vpc"]);
        assert!(plan.level_of("cluster").unwrap() > plan.level_of("cluster_sg").unwrap());
        assert!(plan.level_of("bastion").unwrap() > plan.level_of("public_a").unwrap());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(TEMPLATE, None).unwrap();
        ConfigParser::apply_env_overrides(
            &mut config,
            env(&[
                ("INFRAGRAPH_ENVIRONMENT", "prod"),
                ("INFRAGRAPH_REGION", "eu-west-1"),
                ("INFRAGRAPH_MAX_PARALLEL", "8"),
                ("INFRAGRAPH_STATE_BUCKET", "state-bucket"),
            ]),
        )
        .unwrap();

        assert_eq!(config.stack.environment, "prod");
        assert_eq!(config.provider.region, "eu-west-1");
        assert_eq!(config.engine.max_parallel, 8);
        assert_eq!(config.state.bucket.as_deref(), Some("state-bucket"));
    }

    #[test]
    fn test_cdk_defaults_fill_empty_provider() {
        let mut config = ConfigParser::new()
            .parse_yaml("stack:\n  name: demo\n", None)
            .unwrap();
        ConfigParser::apply_env_overrides(
            &mut config,
            env(&[
                ("CDK_DEFAULT_REGION", "eu-central-1"),
                ("CDK_DEFAULT_ACCOUNT", "210987654321"),
            ]),
        )
        .unwrap();

        assert_eq!(config.provider.region, "eu-central-1");
        assert_eq!(config.provider.account, "210987654321");
    }

    #[test]
    fn test_invalid_max_parallel_override() {
        let mut config = ConfigParser::new()
            .parse_yaml("stack:\n  name: demo\n", None)
            .unwrap();
        let result = ConfigParser::apply_env_overrides(
            &mut config,
            env(&[("INFRAGRAPH_MAX_PARALLEL", "many")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("infragraph.yaml"), "stack:\n  name: demo\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("infragraph.yaml"));

        let config = ConfigParser::new().load_file(&found).unwrap();
        assert_eq!(config.stack.name, "demo");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigParser::new()
            .load_file(dir.path().join("nope.yaml"))
            .unwrap_err();
        assert!(matches!(err, InfraError::Config(ConfigError::FileNotFound { .. })));
    }
}
