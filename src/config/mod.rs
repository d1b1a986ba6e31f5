//! Configuration module for infragraph.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `infragraph.yaml`
//! - Validation of configuration values
//! - Computing spec and graph hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::SpecHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    EngineConfig, InfraConfig, ProviderConfig, ResourceDecl, StackConfig, StateBackend,
    StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
