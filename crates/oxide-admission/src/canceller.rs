//! Cancellation of pipelines made redundant by a newer commit.

use crate::config::AdmissionConfig;
use crate::dispatcher::{CancellationOutcome, CancellationPolicyDispatcher};
use crate::selector::RedundancyCandidateSelector;
use crate::telemetry;
use chrono::{DateTime, Utc};
use oxide_core::Result;
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::{
    CancellationExecutor, FeatureFlag, FeatureToggles, PipelineStore, ProjectRepository,
};
use std::sync::Arc;
use tracing::debug;

/// Cancels older pipelines on the same ref when a new pipeline is created.
///
/// Runs are stateless and may overlap; every run recomputes its candidates
/// and relies on the executor being idempotent.
pub struct RedundantPipelineCanceller {
    selector: RedundancyCandidateSelector,
    dispatcher: CancellationPolicyDispatcher,
    projects: Arc<dyn ProjectRepository>,
    toggles: Arc<dyn FeatureToggles>,
}

impl RedundantPipelineCanceller {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        executor: Arc<dyn CancellationExecutor>,
        projects: Arc<dyn ProjectRepository>,
        toggles: Arc<dyn FeatureToggles>,
        config: &AdmissionConfig,
    ) -> Self {
        Self {
            selector: RedundancyCandidateSelector::new(store, config),
            dispatcher: CancellationPolicyDispatcher::new(executor),
            projects,
            toggles,
        }
    }

    /// Cancel pipelines made redundant by `trigger`.
    ///
    /// Returns `None` when the run was a deliberate no-op.
    pub async fn execute(&self, trigger: &Pipeline) -> Result<Option<CancellationOutcome>> {
        self.execute_at(trigger, Utc::now()).await
    }

    /// Like [`Self::execute`], with an explicit clock for the age cutoff.
    #[tracing::instrument(
        name = "cancel_redundant_pipelines",
        skip_all,
        fields(pipeline_id = %trigger.id, project_id = %trigger.project_id)
    )]
    pub async fn execute_at(
        &self,
        trigger: &Pipeline,
        now: DateTime<Utc>,
    ) -> Result<Option<CancellationOutcome>> {
        if self
            .toggles
            .is_enabled(FeatureFlag::DisableCancelRedundantPipelines, trigger.project_id)
            .await?
        {
            debug!("Redundant pipeline cancellation disabled");
            return Ok(None);
        }

        if trigger.is_child() {
            debug!("Child pipelines never cancel other pipelines");
            return Ok(None);
        }

        if !self
            .projects
            .auto_cancel_pending_pipelines(trigger.project_id)
            .await?
        {
            debug!("Project has auto-cancel disabled");
            return Ok(None);
        }

        let ref_head_sha = self
            .projects
            .ref_head_sha(trigger.project_id, &trigger.git_ref)
            .await?;

        let candidates = self
            .selector
            .select(trigger, ref_head_sha.as_deref(), now)
            .await?;
        let outcome = self.dispatcher.dispatch(trigger, candidates).await?;

        telemetry::log_summary(trigger, &outcome);
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticFeatureToggles;
    use async_trait::async_trait;
    use oxide_core::Error;
    use oxide_core::ids::{PipelineId, ProjectId};
    use oxide_core::pipeline::{AutoCancelOnNewCommit, PipelineSource};
    use oxide_core::ports::{CancelRequest, CancelResult};
    use oxide_core::status::CiStatus;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Lists one candidate whose stored policy cannot be decoded.
    struct UndecodableStore;

    #[async_trait]
    impl PipelineStore for UndecodableStore {
        async fn find(&self, _id: PipelineId) -> Result<Option<Pipeline>> {
            Ok(None)
        }

        async fn ref_pipeline_ids(
            &self,
            _project_id: ProjectId,
            _git_ref: &str,
            _exclude: PipelineId,
            _statuses: &[CiStatus],
            _limit: usize,
        ) -> Result<Vec<PipelineId>> {
            Ok(vec![PipelineId::new(1)])
        }

        async fn find_batch(&self, _ids: &[PipelineId]) -> Result<Vec<Pipeline>> {
            Err(Error::UnknownCancellationPolicy("sometimes".to_string()))
        }

        async fn conservative_interruptible(
            &self,
            _ids: &[PipelineId],
        ) -> Result<HashSet<PipelineId>> {
            Ok(HashSet::new())
        }
    }

    #[derive(Default)]
    struct MockExecutor {
        calls: Mutex<Vec<PipelineId>>,
    }

    #[async_trait]
    impl CancellationExecutor for MockExecutor {
        async fn cancel(&self, pipeline: &Pipeline, _request: CancelRequest) -> Result<CancelResult> {
            self.calls.lock().unwrap().push(pipeline.id);
            Ok(CancelResult::default())
        }
    }

    struct OptedIn;

    #[async_trait]
    impl ProjectRepository for OptedIn {
        async fn auto_cancel_pending_pipelines(&self, _project_id: ProjectId) -> Result<bool> {
            Ok(true)
        }

        async fn ref_head_sha(
            &self,
            _project_id: ProjectId,
            _git_ref: &str,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn trigger() -> Pipeline {
        Pipeline {
            id: PipelineId::new(2),
            project_id: ProjectId::new(1),
            git_ref: "main".to_string(),
            sha: "sha-2".to_string(),
            source: PipelineSource::Push,
            status: CiStatus::Created,
            auto_cancel_on_new_commit: AutoCancelOnNewCommit::Conservative,
            parent_pipeline_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unknown_policy_aborts_run_before_any_cancel() {
        let executor = Arc::new(MockExecutor::default());
        let canceller = RedundantPipelineCanceller::new(
            Arc::new(UndecodableStore),
            executor.clone(),
            Arc::new(OptedIn),
            Arc::new(StaticFeatureToggles::default()),
            &AdmissionConfig::default(),
        );

        let err = canceller
            .execute_at(&trigger(), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownCancellationPolicy(_)));
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
