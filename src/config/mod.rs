//! Configuration module for the compare engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `promotion.compare.yaml`
//! - Environment variable overrides and `.env` loading
//! - Validation of engine settings, environments and pipelines

mod spec;
mod parser;
mod validator;

pub use spec::{
    EngineConfig, EngineSettings, EnvironmentConfig, MatcherConfig, NodeKindConfig,
    NormalizerConfig, PipelineConfig, ProviderConfig, StageConfig,
};
pub use parser::{ConfigParser, CONFIG_ENV_VAR, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
