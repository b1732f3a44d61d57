//! Compare orchestrator.
//!
//! This module fans a compare call out across every workflow of a stage:
//! - Resolves the pipeline stage and its workflow set
//! - Fetches both versions of each workflow through a bounded worker pool
//! - Retries transient fetch failures and demotes persistent ones to `unknown`
//! - Consults the plan cache and aggregates the final result

mod phase;

pub use phase::{PhaseTracker, WorkflowPhase};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::PlanCache;
use crate::config::{EngineConfig, StageConfig};
use crate::error::{CompareError, FetchError, PlanError, Result};
use crate::graph::{CacheKey, ContentHash, WorkflowGraph};
use crate::planner::{
    DiffStatus, PreparedWorkflow, PromotionPlanCompareResult, WorkflowComparer, WorkflowDiffResult,
};
use crate::provider::{ProviderAdapter, ProviderRouter};

/// A compare request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareRequest {
    /// Pipeline identifier.
    pub pipeline_id: String,
    /// Stage identifier, which implies the source and target environments.
    pub stage_id: String,
    /// Explicit workflow selection.
    #[serde(default)]
    pub workflows: Option<Vec<String>>,
}

impl CompareRequest {
    /// Creates a request for every workflow of a stage.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage_id: stage_id.into(),
            workflows: None,
        }
    }

    /// Restricts the request to the given workflows.
    #[must_use]
    pub fn with_workflows<I, S>(mut self, workflows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workflows = Some(workflows.into_iter().map(Into::into).collect());
        self
    }

    /// Returns a stable identifier for the request, independent of
    /// selection order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let selection = self.workflows.as_ref().map(|ids| {
            let mut ids: Vec<_> = ids.iter().collect();
            ids.sort();
            ids.dedup();
            ids
        });

        serde_json::json!([self.pipeline_id, self.stage_id, selection]).to_string()
    }
}

/// Fetch and normalization outcome for one workflow.
struct WorkflowOutcome {
    workflow_id: String,
    tracker: PhaseTracker,
    /// The source environment answered (possibly with an error status).
    source_responded: bool,
    target_responded: bool,
    prepared: std::result::Result<(Option<PreparedWorkflow>, Option<PreparedWorkflow>), String>,
}

/// Runs compare calls against the configured environments.
pub struct CompareOrchestrator<P: ProviderAdapter> {
    /// Workflow source.
    provider: P,
    /// Engine configuration.
    config: Arc<EngineConfig>,
    /// Shared plan cache.
    cache: Arc<PlanCache>,
    /// Pure per-workflow compare steps.
    comparer: WorkflowComparer,
}

impl CompareOrchestrator<ProviderRouter> {
    /// Creates an orchestrator with one provider per configured environment
    /// and a fresh cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider cannot be built.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let router = ProviderRouter::from_config(&config)?;
        let cache = Arc::new(PlanCache::new(config.engine.cache_capacity));
        Ok(Self::new(router, Arc::new(config), cache))
    }

    /// Creates an orchestrator with providers only for the environments of
    /// the request's stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline or stage does not exist, or a
    /// provider for its environments cannot be built.
    pub fn for_request(config: EngineConfig, request: &CompareRequest) -> Result<Self> {
        let stage = find_stage(&config, request)?;
        let router = ProviderRouter::for_environments(&config, &[stage.source_env.as_str(), stage.target_env.as_str()])?;
        let cache = Arc::new(PlanCache::new(config.engine.cache_capacity));
        Ok(Self::new(router, Arc::new(config), cache))
    }
}

impl<P: ProviderAdapter> CompareOrchestrator<P> {
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(provider: P, config: Arc<EngineConfig>, cache: Arc<PlanCache>) -> Self {
        let comparer = WorkflowComparer::new(&config);
        Self {
            provider,
            config,
            cache,
            comparer,
        }
    }

    /// Returns the plan cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compares every selected workflow of a stage.
    ///
    /// Per-workflow failures become `unknown` entries. The call fails as a
    /// whole only if the pipeline or stage does not exist, the workflow set
    /// cannot be listed, both environments are unreachable, or `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns a call-level error as described above.
    pub async fn compare(
        &self,
        request: &CompareRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<PromotionPlanCompareResult>> {
        let compare_id = Uuid::new_v4();
        let span = info_span!(
            "compare",
            %compare_id,
            pipeline = %request.pipeline_id,
            stage = %request.stage_id
        );

        async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Compare cancelled");
                    Err(CompareError::Plan(PlanError::Cancelled))
                }
                result = self.run(request) => result,
            }
        }
        .instrument(span)
        .await
    }

    /// Returns one workflow's node, flow and settings changes.
    ///
    /// Served from the latest cached plan for the same request; otherwise a
    /// compare restricted to that workflow is run first.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not part of the plan, could not
    /// be evaluated, or the underlying compare fails.
    pub async fn workflow_details(
        &self,
        request: &CompareRequest,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkflowDiffResult> {
        let plan = if let Some(plan) = self.cache.latest(&request.fingerprint()) {
            debug!("Serving details for {workflow_id} from cached plan");
            plan
        } else {
            let stage = self.resolve_stage(request)?;
            let selection = selection(request, stage);
            if !selection.is_empty() && !selection.iter().any(|id| id == workflow_id) {
                return Err(not_in_plan(workflow_id));
            }

            let restricted = request.clone().with_workflows([workflow_id]);
            self.compare(&restricted, cancel).await?
        };

        let workflow = plan.workflow(workflow_id).ok_or_else(|| not_in_plan(workflow_id))?;

        if !workflow.details_available {
            return Err(CompareError::Plan(PlanError::DetailsUnavailable {
                workflow_id: workflow_id.to_string(),
                reason: workflow
                    .error
                    .clone()
                    .unwrap_or_else(|| String::from("workflow could not be evaluated")),
            }));
        }

        Ok(workflow.clone())
    }

    async fn run(&self, request: &CompareRequest) -> Result<Arc<PromotionPlanCompareResult>> {
        let stage = self.resolve_stage(request)?;
        info!("Comparing {} -> {}", stage.source_env, stage.target_env);

        let workflow_ids = self.resolve_workflows(request, stage).await?;
        debug!("Resolved {} workflows", workflow_ids.len());

        let concurrency = self.config.engine.concurrency.max(1);
        let outcomes: Vec<WorkflowOutcome> = stream::iter(workflow_ids)
            .map(|workflow_id| self.fetch_and_prepare(stage, workflow_id))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        if !outcomes.is_empty()
            && outcomes
                .iter()
                .all(|o| !o.source_responded && !o.target_responded)
        {
            error!("Neither environment answered any request");
            return Err(CompareError::Plan(PlanError::EnvironmentsUnreachable {
                source_env: stage.source_env.clone(),
                target_env: stage.target_env.clone(),
            }));
        }

        let fingerprint = request.fingerprint();
        let key = self.cache_key(request, stage, &outcomes);

        if let Some(key) = &key
            && let Some(plan) = self.cache.get(key)
        {
            info!("Serving cached plan {key}");
            self.cache.remember_request(fingerprint, key.clone());
            return Ok(plan);
        }

        let workflows = outcomes
            .into_iter()
            .map(|outcome| self.classify(outcome))
            .collect();

        let plan = Arc::new(PromotionPlanCompareResult::new(
            &request.pipeline_id,
            &stage.id,
            &stage.source_env,
            &stage.target_env,
            workflows,
        ));

        info!(
            "Compare finished: {} workflows, {} changed, {} unknown",
            plan.summary.total,
            plan.change_count(),
            plan.summary.unknown
        );

        if let Some(key) = key {
            let plan = self.cache.insert(key.clone(), plan);
            self.cache.remember_request(fingerprint, key);
            Ok(plan)
        } else {
            // Plans with unknown entries are not cached
            self.cache.forget_request(&fingerprint);
            Ok(plan)
        }
    }

    fn resolve_stage(&self, request: &CompareRequest) -> Result<&StageConfig> {
        find_stage(&self.config, request)
    }

    /// Resolves the workflow set: explicit selection, then the stage's
    /// configured list, then the source listing (plus the target listing
    /// when the stage asks for target-only workflows).
    async fn resolve_workflows(
        &self,
        request: &CompareRequest,
        stage: &StageConfig,
    ) -> Result<Vec<String>> {
        let selected = selection(request, stage);
        if !selected.is_empty() {
            return Ok(dedup(selected.iter().cloned()));
        }

        let mut ids = self.list(&stage.source_env).await?;
        if stage.include_target_only {
            ids.extend(self.list(&stage.target_env).await?);
        }

        Ok(dedup(ids))
    }

    async fn list(&self, env_id: &str) -> Result<Vec<String>> {
        self.provider.list_workflows(env_id).await.map_err(|e| {
            CompareError::Plan(PlanError::WorkflowListingFailed {
                env_id: env_id.to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn fetch_and_prepare(&self, stage: &StageConfig, workflow_id: String) -> WorkflowOutcome {
        let mut tracker = PhaseTracker::new(&workflow_id);
        tracker.advance(WorkflowPhase::Fetching);

        let (source, target) = tokio::join!(
            self.fetch_with_retry(&stage.source_env, &workflow_id),
            self.fetch_with_retry(&stage.target_env, &workflow_id),
        );

        let source_responded = responded(&source);
        let target_responded = responded(&target);

        let prepared = match (source, target) {
            (Ok(source), Ok(target)) => {
                tracker.advance(WorkflowPhase::Fetched);
                match self.prepare_pair(source.as_ref(), target.as_ref()) {
                    Ok(pair) => {
                        tracker.advance(WorkflowPhase::Normalized);
                        Ok(pair)
                    }
                    Err(reason) => {
                        warn!(%workflow_id, "{reason}");
                        tracker.advance(WorkflowPhase::NormalizeFailed);
                        Err(reason)
                    }
                }
            }
            (source, target) => {
                let reason = [("source", source.err()), ("target", target.err())]
                    .into_iter()
                    .filter_map(|(side, err)| err.map(|e| format!("{side} fetch failed: {e}")))
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(%workflow_id, "{reason}");
                tracker.advance(WorkflowPhase::FetchFailed);
                Err(reason)
            }
        };

        WorkflowOutcome {
            workflow_id,
            tracker,
            source_responded,
            target_responded,
            prepared,
        }
    }

    /// Fetches with up to `fetch_attempts` attempts for transient failures.
    async fn fetch_with_retry(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> std::result::Result<Option<WorkflowGraph>, FetchError> {
        let attempts = self.config.engine.fetch_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.provider.fetch_workflow(env_id, workflow_id).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        workflow_id,
                        env_id, "Fetch attempt {attempt}/{attempts} failed: {e}"
                    );
                    tokio::time::sleep(self.retry_delay(&e, attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Linear backoff, stretched to the server's `Retry-After` when rate
    /// limited.
    fn retry_delay(&self, error: &FetchError, attempt: u32) -> Duration {
        let backoff = Duration::from_millis(
            self.config
                .engine
                .retry_delay_ms
                .saturating_mul(u64::from(attempt)),
        );

        match error {
            FetchError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }

    fn prepare_pair(
        &self,
        source: Option<&WorkflowGraph>,
        target: Option<&WorkflowGraph>,
    ) -> std::result::Result<(Option<PreparedWorkflow>, Option<PreparedWorkflow>), String> {
        let prepare = |graph: Option<&WorkflowGraph>, side: &str| {
            graph
                .map(|g| {
                    self.comparer
                        .prepare(g)
                        .map_err(|e| format!("{side} normalization failed: {e}"))
                })
                .transpose()
        };

        Ok((prepare(source, "source")?, prepare(target, "target")?))
    }

    /// Builds the cache key, or `None` when any workflow will end up `unknown`.
    fn cache_key(
        &self,
        request: &CompareRequest,
        stage: &StageConfig,
        outcomes: &[WorkflowOutcome],
    ) -> Option<CacheKey> {
        let mut source_hashes = Vec::with_capacity(outcomes.len());
        let mut target_hashes = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            let (source, target) = outcome.prepared.as_ref().ok()?;
            if source.is_none() && target.is_none() {
                // Missing on both sides classifies as unknown
                return None;
            }
            source_hashes.push(key_entry(&outcome.workflow_id, source.as_ref()));
            target_hashes.push(key_entry(&outcome.workflow_id, target.as_ref()));
        }

        Some(self.comparer.hasher().plan_cache_key(
            &request.pipeline_id,
            &stage.id,
            &stage.source_env,
            &stage.target_env,
            &source_hashes,
            &target_hashes,
        ))
    }

    fn classify(&self, outcome: WorkflowOutcome) -> WorkflowDiffResult {
        let WorkflowOutcome {
            workflow_id,
            mut tracker,
            prepared,
            ..
        } = outcome;

        match prepared {
            Ok((source, target)) => {
                let result = self
                    .comparer
                    .compare(&workflow_id, source.as_ref(), target.as_ref());
                if result.diff_status == DiffStatus::Unknown {
                    tracker.advance(WorkflowPhase::Unknown);
                } else {
                    tracker.advance(WorkflowPhase::Diffed);
                    tracker.advance(WorkflowPhase::Classified);
                }
                result
            }
            Err(reason) => {
                tracker.advance(WorkflowPhase::Unknown);
                WorkflowDiffResult::unknown(workflow_id.clone(), workflow_id, reason)
            }
        }
    }
}

/// Looks up the stage a request refers to.
fn find_stage<'a>(config: &'a EngineConfig, request: &CompareRequest) -> Result<&'a StageConfig> {
    let pipeline = config.pipeline(&request.pipeline_id).ok_or_else(|| {
        CompareError::Plan(PlanError::PipelineNotFound {
            pipeline_id: request.pipeline_id.clone(),
        })
    })?;

    pipeline.stage(&request.stage_id).ok_or_else(|| {
        CompareError::Plan(PlanError::StageNotFound {
            pipeline_id: request.pipeline_id.clone(),
            stage_id: request.stage_id.clone(),
        })
    })
}

/// Explicit selection of a request, falling back to the stage's list.
fn selection<'a>(request: &'a CompareRequest, stage: &'a StageConfig) -> &'a [String] {
    request
        .workflows
        .as_deref()
        .filter(|ids| !ids.is_empty())
        .unwrap_or(&stage.workflows)
}

fn dedup(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// True unless the environment could not be contacted at all.
fn responded(result: &std::result::Result<Option<WorkflowGraph>, FetchError>) -> bool {
    !matches!(result, Err(e) if e.is_unreachable())
}

/// Cache key entry for one side of a workflow.
///
/// The content hash ignores the workflow name and update timestamp, yet
/// the plan reports the name and the timestamp decides `target_hotfix`, so
/// both are part of the entry.
fn key_entry(workflow_id: &str, prepared: Option<&PreparedWorkflow>) -> (String, Option<ContentHash>) {
    let updated_at = prepared
        .and_then(|p| p.normalized.updated_at)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    let name = prepared.map_or("", |p| p.normalized.name.as_str());

    (
        format!("{workflow_id}\u{0}{updated_at}\u{0}{name}"),
        prepared.map(|p| p.hash.clone()),
    )
}

fn not_in_plan(workflow_id: &str) -> CompareError {
    CompareError::Plan(PlanError::WorkflowNotInPlan {
        workflow_id: workflow_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ChangeCategory, RiskLevel};
    use crate::provider::MockProviderAdapter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONFIG: &str = r"
engine:
  retry_delay_ms: 0
  concurrency: 2
environments:
  - id: dev
    provider: {type: snapshot, path: /unused/dev}
  - id: prod
    provider: {type: snapshot, path: /unused/prod}
pipelines:
  - id: main
    stages:
      - id: release
        source_env: dev
        target_env: prod
      - id: mirror
        source_env: dev
        target_env: prod
        include_target_only: true
";

    fn config() -> Arc<EngineConfig> {
        Arc::new(serde_yaml::from_str(CONFIG).unwrap())
    }

    fn workflow(id: &str, url: &str, updated_at: &str) -> WorkflowGraph {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Flow {id}"),
            "updatedAt": updated_at,
            "nodes": [
                {"id": "t", "name": "Hook", "type": "n8n-nodes-base.webhook", "parameters": {"path": id}},
                {"id": "h", "name": "Call", "type": "n8n-nodes-base.httpRequest", "parameters": {"url": url}}
            ],
            "connections": [{"from": "Hook", "to": "Call"}]
        }))
        .unwrap()
    }

    #[derive(Default)]
    struct FakeProvider {
        graphs: HashMap<(String, String), WorkflowGraph>,
        down: HashSet<(String, String)>,
        hang: bool,
        delay_ms: u64,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeProvider {
        fn with(mut self, env: &str, graph: WorkflowGraph) -> Self {
            let id = graph.id.clone().unwrap_or_default();
            self.graphs.insert((env.to_string(), id), graph);
            self
        }

        /// `id` of `*` takes the whole environment down.
        fn down(mut self, env: &str, id: &str) -> Self {
            self.down.insert((env.to_string(), id.to_string()));
            self
        }

        fn is_down(&self, env: &str, id: &str) -> bool {
            self.down.contains(&(env.to_string(), id.to_string()))
                || self.down.contains(&(env.to_string(), String::from("*")))
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        async fn fetch_workflow(
            &self,
            env_id: &str,
            workflow_id: &str,
        ) -> std::result::Result<Option<WorkflowGraph>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.is_down(env_id, workflow_id) {
                return Err(FetchError::unreachable(env_id, "connection refused"));
            }
            Ok(self.graphs.get(&(env_id.to_string(), workflow_id.to_string())).cloned())
        }

        async fn list_workflows(&self, env_id: &str) -> std::result::Result<Vec<String>, FetchError> {
            if self.is_down(env_id, "*") {
                return Err(FetchError::unreachable(env_id, "connection refused"));
            }
            let mut ids: Vec<String> = self
                .graphs
                .keys()
                .filter(|(env, _)| env == env_id)
                .map(|(_, id)| id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        }

        fn provider_type(&self) -> &'static str {
            "fake"
        }
    }

    fn orchestrator(provider: &Arc<FakeProvider>) -> CompareOrchestrator<Arc<dyn ProviderAdapter>> {
        let provider: Arc<dyn ProviderAdapter> = Arc::clone(provider) as Arc<dyn ProviderAdapter>;
        CompareOrchestrator::new(provider, config(), Arc::new(PlanCache::new(8)))
    }

    fn stable_provider() -> FakeProvider {
        FakeProvider::default()
            .with("dev", workflow("wf-1", "https://api.foo/v1", "2026-01-01T00:00:00Z"))
            .with("prod", workflow("wf-1", "https://api.bar/v2", "2025-12-01T00:00:00Z"))
            .with("dev", workflow("wf-2", "https://same", "2026-01-01T00:00:00Z"))
            .with("prod", workflow("wf-2", "https://same", "2026-01-01T00:00:00Z"))
    }

    #[tokio::test]
    async fn test_compare_lists_source_and_classifies() {
        let provider = Arc::new(stable_provider());
        let plan = orchestrator(&provider)
            .compare(&CompareRequest::new("main", "release"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.source_env_id, "dev");
        assert_eq!(plan.target_env_id, "prod");
        assert_eq!(plan.summary.total, 2);
        assert_eq!(plan.summary.modified, 1);
        assert_eq!(plan.summary.unchanged, 1);

        let modified = plan.workflow("wf-1").unwrap();
        assert_eq!(modified.change_categories.iter().collect::<Vec<_>>(), vec![&ChangeCategory::HttpChanged]);
        assert_eq!(modified.risk_level, RiskLevel::High);
        // Ordered by status priority
        assert_eq!(plan.workflows[0].workflow_id, "wf-1");
    }

    #[tokio::test]
    async fn test_idempotent_across_fresh_caches() {
        let provider = Arc::new(stable_provider());
        let request = CompareRequest::new("main", "release");
        let cancel = CancellationToken::new();

        let first = orchestrator(&provider).compare(&request, &cancel).await.unwrap();
        let second = orchestrator(&provider).compare(&request, &cancel).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        for (a, b) in first.workflows.iter().zip(&second.workflows) {
            assert_eq!(a.diff_hash, b.diff_hash);
            assert_eq!(a.diff_status, b.diff_status);
        }
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_instance() {
        let provider = Arc::new(stable_provider());
        let orchestrator = orchestrator(&provider);
        let request = CompareRequest::new("main", "release");
        let cancel = CancellationToken::new();

        let first = orchestrator.compare(&request, &cancel).await.unwrap();
        let second = orchestrator.compare(&request, &cancel).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(orchestrator.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_timestamps_participate_in_cache_key() {
        let cache = Arc::new(PlanCache::new(8));
        let request = CompareRequest::new("main", "release").with_workflows(["wf-1"]);
        let cancel = CancellationToken::new();

        let older_target: Arc<dyn ProviderAdapter> = Arc::new(
            FakeProvider::default()
                .with("dev", workflow("wf-1", "https://a", "2026-01-01T00:00:00Z"))
                .with("prod", workflow("wf-1", "https://b", "2025-01-01T00:00:00Z")),
        );
        let newer_target: Arc<dyn ProviderAdapter> = Arc::new(
            FakeProvider::default()
                .with("dev", workflow("wf-1", "https://a", "2026-01-01T00:00:00Z"))
                .with("prod", workflow("wf-1", "https://b", "2026-02-01T00:00:00Z")),
        );

        let first = CompareOrchestrator::new(older_target, config(), Arc::clone(&cache))
            .compare(&request, &cancel)
            .await
            .unwrap();
        let second = CompareOrchestrator::new(newer_target, config(), Arc::clone(&cache))
            .compare(&request, &cancel)
            .await
            .unwrap();

        assert_eq!(first.workflows[0].diff_status, DiffStatus::Modified);
        assert_eq!(second.workflows[0].diff_status, DiffStatus::TargetHotfix);
    }

    #[tokio::test]
    async fn test_workflow_name_participates_in_cache_key() {
        let cache = Arc::new(PlanCache::new(8));
        let request = CompareRequest::new("main", "release").with_workflows(["wf-1"]);
        let cancel = CancellationToken::new();

        let named = |name: &str| -> Arc<dyn ProviderAdapter> {
            let mut source = workflow("wf-1", "https://a", "2026-01-01T00:00:00Z");
            source.name = Some(name.to_string());
            Arc::new(
                FakeProvider::default()
                    .with("dev", source)
                    .with("prod", workflow("wf-1", "https://a", "2026-01-01T00:00:00Z")),
            )
        };

        let first = CompareOrchestrator::new(named("Old name"), config(), Arc::clone(&cache))
            .compare(&request, &cancel)
            .await
            .unwrap();
        let second = CompareOrchestrator::new(named("New name"), config(), Arc::clone(&cache))
            .compare(&request, &cancel)
            .await
            .unwrap();

        assert_eq!(first.workflows[0].name, "Old name");
        assert_eq!(second.workflows[0].name, "New name");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_isolated() {
        let provider = Arc::new(
            stable_provider()
                .with("dev", workflow("wf-3", "https://x", "2026-01-01T00:00:00Z"))
                .down("dev", "wf-3"),
        );
        let orchestrator = orchestrator(&provider);
        let request = CompareRequest::new("main", "release").with_workflows(["wf-1", "wf-2", "wf-3"]);

        let plan = orchestrator.compare(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(plan.summary.total, 3);
        assert_eq!(plan.summary.unknown, 1);
        assert_eq!(plan.summary.modified, 1);
        assert_eq!(plan.summary.unchanged, 1);

        let unknown = &plan.workflows[0];
        assert_eq!(unknown.workflow_id, "wf-3");
        assert_eq!(unknown.diff_status, DiffStatus::Unknown);
        assert!(unknown.error.as_deref().unwrap().contains("source fetch failed"));
        assert!(!unknown.details_available);

        // Partial plans are not cached
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_unknown_and_not_cached() {
        let provider = Arc::new(stable_provider());
        let orchestrator = orchestrator(&provider);
        let request = CompareRequest::new("main", "release").with_workflows(["wf-1", "ghost"]);

        let plan = orchestrator.compare(&request, &CancellationToken::new()).await.unwrap();

        let ghost = plan.workflow("ghost").unwrap();
        assert_eq!(ghost.diff_status, DiffStatus::Unknown);
        assert_eq!(plan.summary.unknown, 1);
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_both_environments_unreachable() {
        let provider = Arc::new(stable_provider().down("dev", "*").down("prod", "*"));
        let request = CompareRequest::new("main", "release").with_workflows(["wf-1", "wf-2"]);

        let err = orchestrator(&provider)
            .compare(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CompareError::Plan(PlanError::EnvironmentsUnreachable { .. })));
    }

    #[tokio::test]
    async fn test_listing_failure_is_call_level() {
        let provider = Arc::new(stable_provider().down("dev", "*"));
        let err = orchestrator(&provider)
            .compare(&CompareRequest::new("main", "release"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CompareError::Plan(PlanError::WorkflowListingFailed { ref env_id, .. }) if env_id == "dev"
        ));
    }

    #[tokio::test]
    async fn test_unknown_pipeline_and_stage() {
        let provider = Arc::new(stable_provider());
        let orchestrator = orchestrator(&provider);
        let cancel = CancellationToken::new();

        let err = orchestrator
            .compare(&CompareRequest::new("nope", "release"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CompareError::Plan(PlanError::PipelineNotFound { .. })));

        let err = orchestrator
            .compare(&CompareRequest::new("main", "nope"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CompareError::Plan(PlanError::StageNotFound { .. })));
    }

    #[test]
    fn test_for_request_builds_only_stage_environments() {
        let mut settings = (*config()).clone();
        settings.environments.push(serde_yaml::from_str(
            "{id: remote, provider: {type: n8n, base_url: 'https://n8n.example.com', api_key_env: PROMOTE_COMPARE_TEST_UNSET_KEY}}",
        ).unwrap());

        assert!(CompareOrchestrator::from_config(settings.clone()).is_err());

        let orchestrator = CompareOrchestrator::for_request(settings.clone(), &CompareRequest::new("main", "release"))
            .unwrap();
        assert!(orchestrator.provider.contains("dev"));
        assert!(!orchestrator.provider.contains("remote"));

        let err = CompareOrchestrator::for_request(settings, &CompareRequest::new("main", "nope"))
            .err()
            .unwrap();
        assert!(matches!(err, CompareError::Plan(PlanError::StageNotFound { .. })));
    }

    #[tokio::test]
    async fn test_source_only_is_added() {
        let provider = Arc::new(
            FakeProvider::default().with("dev", workflow("wf-new", "https://x", "2026-01-01T00:00:00Z")),
        );
        let plan = orchestrator(&provider)
            .compare(&CompareRequest::new("main", "release"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.summary.added, 1);
        assert_eq!(plan.summary.deleted, 0);
        assert_eq!(plan.summary.unchanged, 0);
    }

    #[tokio::test]
    async fn test_include_target_only_lists_target() {
        let provider = Arc::new(
            stable_provider().with("prod", workflow("wf-old", "https://x", "2026-01-01T00:00:00Z")),
        );
        let orchestrator = orchestrator(&provider);
        let cancel = CancellationToken::new();

        let release = orchestrator
            .compare(&CompareRequest::new("main", "release"), &cancel)
            .await
            .unwrap();
        assert!(release.workflow("wf-old").is_none());

        let mirror = orchestrator
            .compare(&CompareRequest::new("main", "mirror"), &cancel)
            .await
            .unwrap();
        assert_eq!(mirror.workflow("wf-old").unwrap().diff_status, DiffStatus::Deleted);
        assert_eq!(mirror.summary.deleted, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let provider = Arc::new(stable_provider());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(&provider)
            .compare(&CompareRequest::new("main", "release"), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let provider = Arc::new(FakeProvider {
            hang: true,
            ..stable_provider()
        });
        let orchestrator = orchestrator(&provider);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator
            .compare(&CompareRequest::new("main", "release").with_workflows(["wf-1"]), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut provider = FakeProvider {
            delay_ms: 10,
            ..FakeProvider::default()
        };
        for i in 0..6 {
            provider = provider.with("dev", workflow(&format!("wf-{i}"), "https://x", "2026-01-01T00:00:00Z"));
        }
        let provider = Arc::new(provider);

        let plan = orchestrator(&provider)
            .compare(&CompareRequest::new("main", "release"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.summary.added, 6);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 12);
        // Two workflows in flight, each fetching both sides
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_transient_fetch_retried_then_unknown() {
        let graph = workflow("wf-1", "https://x", "2026-01-01T00:00:00Z");
        let mut mock = MockProviderAdapter::new();
        mock.expect_fetch_workflow()
            .withf(|env, _| env == "dev")
            .times(2)
            .returning(|env, _| Err(FetchError::unreachable(env, "timeout")));
        mock.expect_fetch_workflow()
            .withf(|env, _| env == "prod")
            .times(1)
            .returning(move |_, _| Ok(Some(graph.clone())));

        let orchestrator = CompareOrchestrator::new(mock, config(), Arc::new(PlanCache::new(4)));
        let plan = orchestrator
            .compare(
                &CompareRequest::new("main", "release").with_workflows(["wf-1"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(plan.summary.unknown, 1);
    }

    #[test]
    fn test_retry_delay_honours_retry_after() {
        let mut settings = (*config()).clone();
        settings.engine.retry_delay_ms = 250;
        let orchestrator =
            CompareOrchestrator::new(MockProviderAdapter::new(), Arc::new(settings), Arc::new(PlanCache::new(4)));

        let unreachable = FetchError::unreachable("dev", "timeout");
        assert_eq!(orchestrator.retry_delay(&unreachable, 2), Duration::from_millis(500));

        let limited = FetchError::RateLimited { retry_after_secs: 3 };
        assert_eq!(orchestrator.retry_delay(&limited, 1), Duration::from_secs(3));

        let short = FetchError::RateLimited { retry_after_secs: 0 };
        assert_eq!(orchestrator.retry_delay(&short, 1), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let mut mock = MockProviderAdapter::new();
        mock.expect_fetch_workflow()
            .withf(|env, _| env == "dev")
            .times(1)
            .returning(|env, _| {
                Err(FetchError::AuthenticationFailed {
                    env_id: env.to_string(),
                })
            });
        mock.expect_fetch_workflow()
            .withf(|env, _| env == "prod")
            .times(1)
            .returning(|_, _| Ok(None));

        let orchestrator = CompareOrchestrator::new(mock, config(), Arc::new(PlanCache::new(4)));
        let plan = orchestrator
            .compare(
                &CompareRequest::new("main", "release").with_workflows(["wf-1"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let entry = plan.workflow("wf-1").unwrap();
        assert_eq!(entry.diff_status, DiffStatus::Unknown);
        assert!(entry.error.as_deref().unwrap().contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_details_served_from_cached_plan() {
        let provider = Arc::new(stable_provider());
        let orchestrator = orchestrator(&provider);
        let request = CompareRequest::new("main", "release");
        let cancel = CancellationToken::new();

        orchestrator.compare(&request, &cancel).await.unwrap();
        let fetches = provider.fetches.load(Ordering::SeqCst);

        let details = orchestrator.workflow_details(&request, "wf-1", &cancel).await.unwrap();
        assert_eq!(details.diff_status, DiffStatus::Modified);
        assert_eq!(details.node_changes.len(), 1);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test]
    async fn test_details_without_plan_runs_restricted_compare() {
        let provider = Arc::new(stable_provider());
        let orchestrator = orchestrator(&provider);

        let details = orchestrator
            .workflow_details(&CompareRequest::new("main", "release"), "wf-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(details.workflow_id, "wf-1");
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_details_errors() {
        let provider = Arc::new(stable_provider().down("dev", "wf-2"));
        let orchestrator = orchestrator(&provider);
        let cancel = CancellationToken::new();

        let selected = CompareRequest::new("main", "release").with_workflows(["wf-1"]);
        orchestrator.compare(&selected, &cancel).await.unwrap();
        let err = orchestrator.workflow_details(&selected, "wf-9", &cancel).await.unwrap_err();
        assert!(matches!(err, CompareError::Plan(PlanError::WorkflowNotInPlan { .. })));

        let failing = CompareRequest::new("main", "release").with_workflows(["wf-2"]);
        let err = orchestrator.workflow_details(&failing, "wf-2", &cancel).await.unwrap_err();
        assert!(matches!(err, CompareError::Plan(PlanError::DetailsUnavailable { .. })));
    }

    #[test]
    fn test_request_fingerprint_ignores_selection_order() {
        let a = CompareRequest::new("p", "s").with_workflows(["b", "a"]);
        let b = CompareRequest::new("p", "s").with_workflows(["a", "b", "a"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), CompareRequest::new("p", "s").fingerprint());
    }
}
