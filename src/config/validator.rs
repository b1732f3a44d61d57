//! Configuration validation for the compare engine.
//!
//! This module validates engine settings, environments and pipelines,
//! collecting every problem before reporting the first one as an error.

use crate::error::{CompareError, ConfigError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    EngineConfig, EngineSettings, EnvironmentConfig, MatcherConfig, PipelineConfig, ProviderConfig,
};

/// Upper bound on fetch attempts.
const MAX_FETCH_ATTEMPTS: u32 = 5;

/// Validator for engine configurations.
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

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(CompareError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Runs all checks and returns every error and warning.
    #[must_use]
    pub fn check(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_engine(&config.engine, &mut result);
        Self::validate_matcher(&config.matcher, &mut result);
        Self::validate_environments(&config.environments, &mut result);
        Self::validate_pipelines(config, &mut result);

        result
    }

    /// Validates engine settings.
    fn validate_engine(engine: &EngineSettings, result: &mut ValidationResult) {
        if engine.concurrency == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.concurrency"),
                message: String::from("Concurrency must be at least 1"),
            });
        } else if engine.concurrency > 64 {
            result.warnings.push(format!(
                "engine.concurrency: {} parallel fetches may overload the remote engine",
                engine.concurrency
            ));
        }

        if engine.fetch_attempts == 0 || engine.fetch_attempts > MAX_FETCH_ATTEMPTS {
            result.errors.push(ValidationError {
                field: String::from("engine.fetch_attempts"),
                message: format!("Fetch attempts must be between 1 and {MAX_FETCH_ATTEMPTS}"),
            });
        }

        if engine.cache_capacity == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.cache_capacity"),
                message: String::from("Cache capacity must be at least 1"),
            });
        }

        if engine.request_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.request_timeout_secs"),
                message: String::from("Request timeout must be positive"),
            });
        }
    }

    /// Validates matcher tuning.
    fn validate_matcher(matcher: &MatcherConfig, result: &mut ValidationResult) {
        if !(0.0..=1.0).contains(&matcher.similarity_threshold) {
            result.errors.push(ValidationError {
                field: String::from("matcher.similarity_threshold"),
                message: format!(
                    "Similarity threshold {} must be within [0, 1]",
                    matcher.similarity_threshold
                ),
            });
        }

        if matcher.edge_weight < 0.0 || matcher.parameter_weight < 0.0 {
            result.errors.push(ValidationError {
                field: String::from("matcher"),
                message: String::from("Matcher weights cannot be negative"),
            });
        } else if matcher.edge_weight + matcher.parameter_weight <= 0.0 {
            result.errors.push(ValidationError {
                field: String::from("matcher"),
                message: String::from("At least one matcher weight must be positive"),
            });
        }
    }

    /// Validates environment definitions.
    fn validate_environments(environments: &[EnvironmentConfig], result: &mut ValidationResult) {
        if environments.is_empty() {
            result
                .warnings
                .push(String::from("No environments defined in configuration"));
            return;
        }

        let mut seen_ids = HashSet::new();

        for (i, env) in environments.iter().enumerate() {
            let prefix = format!("environments[{i}]");

            if env.id.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: String::from("Environment id cannot be empty"),
                });
            } else if !seen_ids.insert(env.id.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate environment id: {}", env.id),
                });
            }

            match &env.provider {
                ProviderConfig::N8n {
                    base_url,
                    api_key_env,
                } => {
                    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                        result.errors.push(ValidationError {
                            field: format!("{prefix}.provider.base_url"),
                            message: format!("Base URL must be http(s): {base_url}"),
                        });
                    } else if base_url.starts_with("http://") {
                        result.warnings.push(format!(
                            "{prefix}.provider.base_url: API key would be sent over plain HTTP"
                        ));
                    }

                    if api_key_env.trim().is_empty() {
                        result.errors.push(ValidationError {
                            field: format!("{prefix}.provider.api_key_env"),
                            message: String::from("API key variable name cannot be empty"),
                        });
                    }
                }
                ProviderConfig::Snapshot { path } => {
                    if path.trim().is_empty() {
                        result.errors.push(ValidationError {
                            field: format!("{prefix}.provider.path"),
                            message: String::from("Snapshot path cannot be empty"),
                        });
                    }
                }
            }
        }
    }

    /// Validates pipelines and their stage references.
    fn validate_pipelines(config: &EngineConfig, result: &mut ValidationResult) {
        let mut seen_ids = HashSet::new();

        for (i, pipeline) in config.pipelines.iter().enumerate() {
            let prefix = format!("pipelines[{i}]");

            if !seen_ids.insert(pipeline.id.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate pipeline id: {}", pipeline.id),
                });
            }

            if pipeline.stages.is_empty() {
                result
                    .warnings
                    .push(format!("{prefix}: Pipeline '{}' has no stages", pipeline.id));
            }

            Self::validate_stages(config, pipeline, &prefix, result);
        }
    }

    /// Validates the stages of one pipeline.
    fn validate_stages(
        config: &EngineConfig,
        pipeline: &PipelineConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let mut seen_stage_ids = HashSet::new();

        for (j, stage) in pipeline.stages.iter().enumerate() {
            let stage_prefix = format!("{prefix}.stages[{j}]");

            if !seen_stage_ids.insert(stage.id.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{stage_prefix}.id"),
                    message: format!("Duplicate stage id: {}", stage.id),
                });
            }

            for (field, env_id) in [("source_env", &stage.source_env), ("target_env", &stage.target_env)] {
                if config.environment(env_id).is_none() {
                    result.errors.push(ValidationError {
                        field: format!("{stage_prefix}.{field}"),
                        message: format!("Unknown environment: {env_id}"),
                    });
                }
            }

            if stage.source_env == stage.target_env {
                result.errors.push(ValidationError {
                    field: format!("{stage_prefix}.target_env"),
                    message: String::from("Source and target environments must differ"),
                });
            }

            let mut seen_workflows = HashSet::new();
            for workflow_id in &stage.workflows {
                if !seen_workflows.insert(workflow_id.as_str()) {
                    result.warnings.push(format!(
                        "{stage_prefix}.workflows: '{workflow_id}' listed more than once"
                    ));
                }
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
