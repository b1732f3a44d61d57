//! Per-environment provider routing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigParser, EngineConfig, ProviderConfig};
use crate::error::{CompareError, ConfigError, FetchError, Result};
use crate::graph::WorkflowGraph;

use super::adapter::ProviderAdapter;
use super::n8n::N8nClient;
use super::snapshot::SnapshotProvider;

/// Dispatches fetches to the provider registered for each environment.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut envs: Vec<_> = self.providers.keys().collect();
        envs.sort();
        f.debug_struct("ProviderRouter").field("environments", &envs).finish()
    }
}

impl ProviderRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one provider per configured environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment is declared twice, an API key
    /// variable is unset, or an HTTP client cannot be created.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::build(config, |_| true)
    }

    /// Builds providers only for the given environments, so credentials of
    /// unrelated environments need not be set.
    ///
    /// # Errors
    ///
    /// Same as [`ProviderRouter::from_config`], limited to `env_ids`.
    pub fn for_environments(config: &EngineConfig, env_ids: &[&str]) -> Result<Self> {
        Self::build(config, |id| env_ids.contains(&id))
    }

    fn build(config: &EngineConfig, wanted: impl Fn(&str) -> bool) -> Result<Self> {
        let mut router = Self::new();

        for env in config.environments.iter().filter(|env| wanted(&env.id)) {
            let provider: Arc<dyn ProviderAdapter> = match &env.provider {
                ProviderConfig::N8n { base_url, api_key_env } => {
                    let api_key = ConfigParser::api_key(api_key_env)?;
                    Arc::new(N8nClient::new(
                        base_url,
                        &api_key,
                        config.engine.request_timeout_secs,
                    )?)
                }
                ProviderConfig::Snapshot { path } => Arc::new(SnapshotProvider::new(path)),
            };

            router.register(&env.id, provider)?;
        }

        info!("Configured providers for {} environments", router.providers.len());
        Ok(router)
    }

    /// Registers the provider for an environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment already has a provider.
    pub fn register(&mut self, env_id: &str, provider: Arc<dyn ProviderAdapter>) -> Result<()> {
        if self.providers.contains_key(env_id) {
            return Err(CompareError::Config(ConfigError::DuplicateId {
                resource_type: String::from("environment"),
                id: env_id.to_string(),
            }));
        }

        debug!("Registered {} provider for {env_id}", provider.provider_type());
        self.providers.insert(env_id.to_string(), provider);
        Ok(())
    }

    /// Returns the provider for an environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is registered for the environment.
    pub fn provider(&self, env_id: &str) -> std::result::Result<&Arc<dyn ProviderAdapter>, FetchError> {
        self.providers
            .get(env_id)
            .ok_or_else(|| FetchError::UnknownEnvironment {
                env_id: env_id.to_string(),
            })
    }

    /// Returns true if a provider is registered for the environment.
    #[must_use]
    pub fn contains(&self, env_id: &str) -> bool {
        self.providers.contains_key(env_id)
    }
}

#[async_trait]
impl ProviderAdapter for ProviderRouter {
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> std::result::Result<Option<WorkflowGraph>, FetchError> {
        self.provider(env_id)?.fetch_workflow(env_id, workflow_id).await
    }

    async fn list_workflows(&self, env_id: &str) -> std::result::Result<Vec<String>, FetchError> {
        self.provider(env_id)?.list_workflows(env_id).await
    }

    fn provider_type(&self) -> &'static str {
        "router"
    }
}
