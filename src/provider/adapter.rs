//! Provider adapter trait definition.
//!
//! This module defines the interface through which workflow definitions are
//! fetched from an environment.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::FetchError;
use crate::graph::WorkflowGraph;

/// Trait for workflow definition sources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Fetches one workflow definition.
    ///
    /// Returns `None` if the workflow does not exist in the environment.
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> Result<Option<WorkflowGraph>, FetchError>;

    /// Lists the ids of every workflow in the environment.
    async fn list_workflows(&self, env_id: &str) -> Result<Vec<String>, FetchError>;

    /// Gets the provider type name.
    fn provider_type(&self) -> &'static str;
}

#[async_trait]
impl ProviderAdapter for Box<dyn ProviderAdapter> {
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> Result<Option<WorkflowGraph>, FetchError> {
        (**self).fetch_workflow(env_id, workflow_id).await
    }

    async fn list_workflows(&self, env_id: &str) -> Result<Vec<String>, FetchError> {
        (**self).list_workflows(env_id).await
    }

    fn provider_type(&self) -> &'static str {
        (**self).provider_type()
    }
}

#[async_trait]
impl ProviderAdapter for Arc<dyn ProviderAdapter> {
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> Result<Option<WorkflowGraph>, FetchError> {
        (**self).fetch_workflow(env_id, workflow_id).await
    }

    async fn list_workflows(&self, env_id: &str) -> Result<Vec<String>, FetchError> {
        (**self).list_workflows(env_id).await
    }

    fn provider_type(&self) -> &'static str {
        (**self).provider_type()
    }
}
