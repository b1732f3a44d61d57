//! Error types for the promotion compare engine.
//!
//! This module provides the error hierarchy for every stage of a compare
//! call: configuration, fetching from the automation engine, normalization,
//! and call-level planning failures.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the promotion compare engine.
#[derive(Debug, Error)]
pub enum CompareError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fetch errors from a provider adapter.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Normalization errors for a single workflow graph.
    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizationError),

    /// Call-level planning errors.
    #[error("Compare error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} id: {id}")]
    DuplicateId {
        /// Type of resource (environment, pipeline, stage).
        resource_type: String,
        /// The duplicated id.
        id: String,
    },
}

/// Errors raised while fetching a workflow from an environment.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote automation engine could not be reached.
    #[error("Environment '{env_id}' unreachable: {message}")]
    Unreachable {
        /// Environment that failed.
        env_id: String,
        /// Description of the connectivity failure.
        message: String,
    },

    /// Authentication against the remote engine failed.
    #[error("Authentication failed for environment '{env_id}'")]
    AuthenticationFailed {
        /// Environment that rejected the credentials.
        env_id: String,
    },

    /// The remote API answered with an unexpected status.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error body or message.
        message: String,
    },

    /// The remote API rate limited the request.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The response body could not be decoded.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// No provider is configured for the environment.
    #[error("No provider configured for environment '{env_id}'")]
    UnknownEnvironment {
        /// The environment id.
        env_id: String,
    },

    /// Local snapshot could not be read.
    #[error("Snapshot read failed for {path}: {message}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Errors raised while normalizing a raw workflow graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// A required field is absent.
    #[error("Missing required field at {path}")]
    MissingField {
        /// Dotted path of the missing field.
        path: String,
    },

    /// A field has an unusable value.
    #[error("Invalid field at {path}: {message}")]
    InvalidField {
        /// Dotted path of the offending field.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// The document is not a workflow graph at all.
    #[error("Malformed workflow graph: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

/// Call-level errors. These abort a compare call and never yield a partial result.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The pipeline does not exist.
    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound {
        /// Requested pipeline id.
        pipeline_id: String,
    },

    /// The stage does not exist within the pipeline.
    #[error("Stage '{stage_id}' not found in pipeline '{pipeline_id}'")]
    StageNotFound {
        /// Pipeline that was searched.
        pipeline_id: String,
        /// Requested stage id.
        stage_id: String,
    },

    /// Neither environment answered a single request.
    #[error("Both environments unreachable: source '{source_env}', target '{target_env}'")]
    EnvironmentsUnreachable {
        /// Source environment id.
        source_env: String,
        /// Target environment id.
        target_env: String,
    },

    /// The workflow set could not be resolved.
    #[error("Failed to list workflows in environment '{env_id}': {reason}")]
    WorkflowListingFailed {
        /// Environment that was listed.
        env_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// The compare call was cancelled.
    #[error("Compare cancelled")]
    Cancelled,

    /// Details were requested for a workflow outside the plan.
    #[error("Workflow '{workflow_id}' is not part of this plan")]
    WorkflowNotInPlan {
        /// Requested workflow id.
        workflow_id: String,
    },

    /// Details cannot be produced because the workflow could not be evaluated.
    #[error("Details unavailable for workflow '{workflow_id}': {reason}")]
    DetailsUnavailable {
        /// Requested workflow id.
        workflow_id: String,
        /// Why the workflow has no details.
        reason: String,
    },
}

/// Result type alias for compare engine operations.
pub type Result<T> = std::result::Result<T, CompareError>;

impl CompareError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error aborted the whole call because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Plan(PlanError::Cancelled))
    }
}

impl FetchError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates an unreachable error.
    #[must_use]
    pub fn unreachable(env_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            env_id: env_id.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error is transient and the fetch may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::RateLimited { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the error means the environment could not be contacted.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl NormalizationError {
    /// Creates a missing field error.
    #[must_use]
    pub fn missing(path: impl Into<String>) -> Self {
        Self::MissingField { path: path.into() }
    }

    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.into(),
            message: message.into(),
        }
    }
}
