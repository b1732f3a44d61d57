//! Configuration parser for loading the engine configuration.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{CompareError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::EngineConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "PROMOTE_COMPARE_CONFIG";

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative snapshot paths are resolved against the base path, or against
    /// the directory of the file when no base path was set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(CompareError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CompareError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;

        let base = self
            .base_path
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf));
        if let Some(base) = base {
            Self::resolve_snapshot_paths(&mut config, &base);
        }

        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            CompareError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration with {} environments and {} pipelines",
            config.environments.len(),
            config.pipelines.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables: `PROMOTE_COMPARE_CONCURRENCY`,
    /// `PROMOTE_COMPARE_FETCH_ATTEMPTS`, `PROMOTE_COMPARE_CACHE_CAPACITY`,
    /// `PROMOTE_COMPARE_SIMILARITY_THRESHOLD`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is not a valid number.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut EngineConfig) -> Result<()> {
        if let Some(value) = env_override("PROMOTE_COMPARE_CONCURRENCY")? {
            debug!("Overriding engine.concurrency from environment");
            config.engine.concurrency = value;
        }

        if let Some(value) = env_override("PROMOTE_COMPARE_FETCH_ATTEMPTS")? {
            debug!("Overriding engine.fetch_attempts from environment");
            config.engine.fetch_attempts = value;
        }

        if let Some(value) = env_override("PROMOTE_COMPARE_CACHE_CAPACITY")? {
            debug!("Overriding engine.cache_capacity from environment");
            config.engine.cache_capacity = value;
        }

        if let Some(value) = env_override("PROMOTE_COMPARE_SIMILARITY_THRESHOLD")? {
            debug!("Overriding matcher.similarity_threshold from environment");
            config.matcher.similarity_threshold = value;
        }

        Ok(())
    }

    /// Makes relative snapshot directories relative to `base`.
    fn resolve_snapshot_paths(config: &mut EngineConfig, base: &Path) {
        for env in &mut config.environments {
            if let super::spec::ProviderConfig::Snapshot { path } = &mut env.provider {
                let candidate = PathBuf::from(path.as_str());
                if candidate.is_relative() {
                    *path = base.join(candidate).display().to_string();
                }
            }
        }
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
                CompareError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads an API key from the named environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set.
    pub fn api_key(var: &str) -> Result<String> {
        std::env::var(var).map_err(|_| {
            CompareError::Config(ConfigError::MissingEnvVar {
                name: var.to_string(),
            })
        })
    }
}

/// Parses an optional numeric override from the environment.
fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            CompareError::Config(ConfigError::validation(
                format!("'{raw}' is not a valid value"),
                name,
            ))
        }),
        Err(_) => Ok(None),
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "promotion.compare.yaml",
    "promotion.compare.yml",
    "compare.yaml",
];

/// Finds the configuration file in the given directory or its parents,
/// falling back to the user configuration directory.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = std::fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());

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

    if let Some(user_dir) = dirs::config_dir() {
        let config_path = user_dir.join("promote-compare").join(DEFAULT_CONFIG_FILES[0]);
        if config_path.exists() {
            info!("Using user configuration file: {}", config_path.display());
            return Ok(config_path);
        }
    }

    Err(CompareError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
