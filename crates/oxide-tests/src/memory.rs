//! In-memory implementation of every admission port.
//!
//! `InMemoryCi` behaves like the PostgreSQL adapters: drops are monotonic,
//! cancellation is idempotent and the pipeline only moves to `canceled` once
//! none of its builds are cancelable.

use async_trait::async_trait;
use oxide_admission::{
    AdmissionConfig, AdmissionOrchestrator, RedundantPipelineCanceller, RunnerAvailabilityGate,
};
use oxide_core::build::{Build, FailureReason};
use oxide_core::ids::{BuildId, PipelineId, ProjectId};
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::{
    BuildDropper, BuildStore, CancelRequest, CancelResult, CancellationExecutor, ComputeQuota,
    FeatureToggles, PipelineProcessor, PipelineStore, ProjectRepository, RunnerCatalog,
};
use oxide_core::runner::{RunnerMatcher, RunnerMatchers};
use oxide_core::status::CiStatus;
use oxide_core::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    pipelines: BTreeMap<PipelineId, Pipeline>,
    builds: BTreeMap<BuildId, Build>,
    pipeline_canceled_by: HashMap<PipelineId, PipelineId>,
    build_canceled_by: HashMap<BuildId, PipelineId>,
    auto_cancel_disabled: HashSet<ProjectId>,
    ref_heads: HashMap<(ProjectId, String), String>,
    runners: Vec<RunnerMatcher>,
    quota_exhausted: HashSet<ProjectId>,
    catalog_unavailable: bool,
    cancel_requests: Vec<(PipelineId, CancelRequest)>,
    effective_cancellations: usize,
    quota_lookups: usize,
    processed: Vec<PipelineId>,
}

/// Shared in-memory CI state.
#[derive(Default)]
pub struct InMemoryCi {
    state: Mutex<State>,
}

impl InMemoryCi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only happens after a panicking test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        self.state().pipelines.insert(pipeline.id, pipeline);
    }

    pub fn insert_build(&self, build: Build) {
        self.state().builds.insert(build.id, build);
    }

    pub fn add_runner(&self, runner: RunnerMatcher) {
        self.state().runners.push(runner);
    }

    pub fn set_ref_head(&self, project_id: ProjectId, git_ref: &str, sha: &str) {
        self.state()
            .ref_heads
            .insert((project_id, git_ref.to_string()), sha.to_string());
    }

    pub fn disable_auto_cancel(&self, project_id: ProjectId) {
        self.state().auto_cancel_disabled.insert(project_id);
    }

    pub fn exhaust_quota(&self, project_id: ProjectId) {
        self.state().quota_exhausted.insert(project_id);
    }

    /// Make every catalog query fail.
    pub fn set_catalog_unavailable(&self, unavailable: bool) {
        self.state().catalog_unavailable = unavailable;
    }

    pub fn pipeline(&self, id: i64) -> Option<Pipeline> {
        self.state().pipelines.get(&PipelineId::new(id)).cloned()
    }

    pub fn build(&self, id: i64) -> Option<Build> {
        self.state().builds.get(&BuildId::new(id)).cloned()
    }

    pub fn pipeline_canceled_by(&self, id: i64) -> Option<PipelineId> {
        self.state()
            .pipeline_canceled_by
            .get(&PipelineId::new(id))
            .copied()
    }

    pub fn build_canceled_by(&self, id: i64) -> Option<PipelineId> {
        self.state().build_canceled_by.get(&BuildId::new(id)).copied()
    }

    /// Every cancel call made, in order.
    pub fn cancel_requests(&self) -> Vec<(PipelineId, CancelRequest)> {
        self.state().cancel_requests.clone()
    }

    /// Cancel calls that changed any state.
    pub fn effective_cancellations(&self) -> usize {
        self.state().effective_cancellations
    }

    pub fn quota_lookups(&self) -> usize {
        self.state().quota_lookups
    }

    pub fn processed(&self) -> Vec<PipelineId> {
        self.state().processed.clone()
    }

    /// Canceller wired to this store.
    pub fn canceller(
        self: &Arc<Self>,
        toggles: Arc<dyn FeatureToggles>,
        config: &AdmissionConfig,
    ) -> RedundantPipelineCanceller {
        RedundantPipelineCanceller::new(
            self.clone(),
            self.clone(),
            self.clone(),
            toggles,
            config,
        )
    }

    /// Runner availability gate wired to this store.
    pub fn gate(self: &Arc<Self>, toggles: Arc<dyn FeatureToggles>) -> RunnerAvailabilityGate {
        RunnerAvailabilityGate::new(
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            toggles,
        )
    }

    /// Orchestrator wired to this store, using it as the pipeline processor.
    pub fn orchestrator(self: &Arc<Self>, toggles: Arc<dyn FeatureToggles>) -> AdmissionOrchestrator {
        AdmissionOrchestrator::new(self.gate(toggles), self.clone())
    }
}

#[async_trait]
impl PipelineStore for InMemoryCi {
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.state().pipelines.get(&id).cloned())
    }

    async fn ref_pipeline_ids(
        &self,
        project_id: ProjectId,
        git_ref: &str,
        exclude: PipelineId,
        statuses: &[CiStatus],
        limit: usize,
    ) -> Result<Vec<PipelineId>> {
        Ok(self
            .state()
            .pipelines
            .values()
            .rev()
            .filter(|p| {
                p.project_id == project_id
                    && p.git_ref == git_ref
                    && p.id != exclude
                    && statuses.contains(&p.status)
            })
            .map(|p| p.id)
            .take(limit)
            .collect())
    }

    async fn find_batch(&self, ids: &[PipelineId]) -> Result<Vec<Pipeline>> {
        let state = self.state();
        let mut rows: Vec<Pipeline> = ids
            .iter()
            .filter_map(|id| state.pipelines.get(id).cloned())
            .collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }

    async fn conservative_interruptible(&self, ids: &[PipelineId]) -> Result<HashSet<PipelineId>> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter(|id| {
                !state.builds.values().any(|b| {
                    b.pipeline_id == **id
                        && CiStatus::STARTED.contains(&b.status)
                        && !b.is_interruptible()
                })
            })
            .copied()
            .collect())
    }
}

#[async_trait]
impl BuildStore for InMemoryCi {
    async fn unscheduled_builds(&self, pipeline_id: PipelineId) -> Result<Vec<Build>> {
        Ok(self
            .state()
            .builds
            .values()
            .filter(|b| b.pipeline_id == pipeline_id && b.status == CiStatus::Created)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BuildDropper for InMemoryCi {
    async fn drop_builds(
        &self,
        build_ids: &[BuildId],
        reason: FailureReason,
        skip_pipeline_processing: bool,
    ) -> Result<usize> {
        let mut touched = Vec::new();
        {
            let mut state = self.state();
            for id in build_ids {
                if let Some(build) = state.builds.get_mut(id) {
                    if build.status == CiStatus::Created {
                        build.status = CiStatus::Failed;
                        build.failure_reason = Some(reason);
                        touched.push(build.pipeline_id);
                    }
                }
            }
        }

        let dropped = touched.len();
        if !skip_pipeline_processing {
            touched.sort();
            touched.dedup();
            for pipeline_id in touched {
                self.process(pipeline_id).await?;
            }
        }
        Ok(dropped)
    }
}

#[async_trait]
impl RunnerCatalog for InMemoryCi {
    async fn active_matchers(&self, _project_id: ProjectId) -> Result<RunnerMatchers> {
        let state = self.state();
        if state.catalog_unavailable {
            return Err(Error::RunnerCatalog("runner catalog unavailable".into()));
        }
        Ok(RunnerMatchers::partition(state.runners.clone()))
    }
}

#[async_trait]
impl ComputeQuota for InMemoryCi {
    async fn minutes_exhausted(&self, project_id: ProjectId) -> Result<bool> {
        let mut state = self.state();
        state.quota_lookups += 1;
        Ok(state.quota_exhausted.contains(&project_id))
    }
}

#[async_trait]
impl CancellationExecutor for InMemoryCi {
    async fn cancel(&self, pipeline: &Pipeline, request: CancelRequest) -> Result<CancelResult> {
        let mut state = self.state();
        state.cancel_requests.push((pipeline.id, request));

        let current = state
            .pipelines
            .get(&pipeline.id)
            .map(|p| p.status)
            .ok_or(Error::PipelineNotFound(pipeline.id))?;
        if !current.is_cancelable() {
            return Ok(CancelResult::default());
        }

        let mut canceled = Vec::new();
        for build in state.builds.values_mut() {
            if build.pipeline_id == pipeline.id
                && build.status.is_cancelable()
                && (!request.safe_cancellation || build.is_interruptible())
            {
                build.status = CiStatus::Canceled;
                canceled.push(build.id);
            }
        }
        for id in &canceled {
            state.build_canceled_by.insert(*id, request.auto_canceled_by);
        }

        let remaining = state
            .builds
            .values()
            .any(|b| b.pipeline_id == pipeline.id && b.status.is_cancelable());
        let pipeline_canceled = !remaining;
        if pipeline_canceled {
            if let Some(p) = state.pipelines.get_mut(&pipeline.id) {
                p.status = CiStatus::Canceled;
            }
            state
                .pipeline_canceled_by
                .insert(pipeline.id, request.auto_canceled_by);
        }

        let result = CancelResult {
            builds_canceled: canceled.len(),
            pipeline_canceled,
        };
        if !result.is_noop() {
            state.effective_cancellations += 1;
        }
        Ok(result)
    }
}

#[async_trait]
impl ProjectRepository for InMemoryCi {
    async fn auto_cancel_pending_pipelines(&self, project_id: ProjectId) -> Result<bool> {
        Ok(!self.state().auto_cancel_disabled.contains(&project_id))
    }

    async fn ref_head_sha(&self, project_id: ProjectId, git_ref: &str) -> Result<Option<String>> {
        Ok(self
            .state()
            .ref_heads
            .get(&(project_id, git_ref.to_string()))
            .cloned())
    }
}

/// Minimal status recomputation: a pipeline whose builds are all finished
/// takes a terminal status, a created pipeline with work left becomes pending.
#[async_trait]
impl PipelineProcessor for InMemoryCi {
    async fn process(&self, pipeline_id: PipelineId) -> Result<()> {
        let mut state = self.state();
        state.processed.push(pipeline_id);

        let statuses: Vec<CiStatus> = state
            .builds
            .values()
            .filter(|b| b.pipeline_id == pipeline_id)
            .map(|b| b.status)
            .collect();

        let Some(pipeline) = state.pipelines.get_mut(&pipeline_id) else {
            return Err(Error::PipelineNotFound(pipeline_id));
        };

        if !statuses.is_empty() && statuses.iter().all(CiStatus::is_terminal) {
            pipeline.status = if statuses.contains(&CiStatus::Failed) {
                CiStatus::Failed
            } else if statuses.iter().all(|s| *s == CiStatus::Canceled) {
                CiStatus::Canceled
            } else {
                CiStatus::Success
            };
        } else if pipeline.status == CiStatus::Created {
            pipeline.status = CiStatus::Pending;
        }
        Ok(())
    }
}
