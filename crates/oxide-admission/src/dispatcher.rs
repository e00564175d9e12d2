//! Routes each candidate to the cancellation its policy asks for.

use crate::selector::Candidates;
use crate::telemetry;
use oxide_core::Result;
use oxide_core::pipeline::{AutoCancelOnNewCommit, Pipeline};
use oxide_core::ports::{CancelRequest, CancelResult, CancellationExecutor};
use serde::Serialize;
use std::sync::Arc;

/// Counters for one cancellation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CancellationOutcome {
    pub skipped_for_old_age: usize,
    /// Filtered for any reason other than age.
    pub skipped: usize,
    /// Policy `none`.
    pub configured_to_not_cancel: usize,
    /// Policy `conservative`, but uninterruptible work has started.
    pub left_alone: usize,
    pub conservatively_cancelled: usize,
    pub aggressively_cancelled: usize,
    /// Dispatched, but the executor had nothing left to cancel.
    pub already_canceled: usize,
}

impl CancellationOutcome {
    /// Candidates whose state changed during the run.
    pub fn cancellations(&self) -> usize {
        self.conservatively_cancelled + self.aggressively_cancelled
    }
}

#[derive(Debug, Default)]
struct Counters {
    configured_to_not_cancel: usize,
    left_alone: usize,
    conservatively_cancelled: usize,
    aggressively_cancelled: usize,
    already_canceled: usize,
}

/// Dispatches survivors of the skip policy to the cancellation executor.
pub struct CancellationPolicyDispatcher {
    executor: Arc<dyn CancellationExecutor>,
}

impl CancellationPolicyDispatcher {
    pub fn new(executor: Arc<dyn CancellationExecutor>) -> Self {
        Self { executor }
    }

    /// Drain `candidates`, cancelling each eligible one exactly once.
    pub async fn dispatch(
        &self,
        trigger: &Pipeline,
        mut candidates: Candidates<'_>,
    ) -> Result<CancellationOutcome> {
        let mut counters = Counters::default();

        while let Some(batch) = candidates.next_batch().await? {
            for candidate in &batch.pipelines {
                match candidate.auto_cancel_on_new_commit {
                    AutoCancelOnNewCommit::None => {
                        counters.configured_to_not_cancel += 1;
                    }
                    AutoCancelOnNewCommit::Conservative => {
                        if !batch.conservative_interruptible.contains(&candidate.id) {
                            counters.left_alone += 1;
                            continue;
                        }
                        if self.cancel(trigger, candidate, false).await?.is_noop() {
                            counters.already_canceled += 1;
                        } else {
                            counters.conservatively_cancelled += 1;
                        }
                    }
                    AutoCancelOnNewCommit::Interruptible => {
                        if self.cancel(trigger, candidate, true).await?.is_noop() {
                            counters.already_canceled += 1;
                        } else {
                            counters.aggressively_cancelled += 1;
                        }
                    }
                }
            }
        }

        let tally = candidates.tally();
        Ok(CancellationOutcome {
            skipped_for_old_age: tally.old_age,
            skipped: tally.other,
            configured_to_not_cancel: counters.configured_to_not_cancel,
            left_alone: counters.left_alone,
            conservatively_cancelled: counters.conservatively_cancelled,
            aggressively_cancelled: counters.aggressively_cancelled,
            already_canceled: counters.already_canceled,
        })
    }

    async fn cancel(
        &self,
        trigger: &Pipeline,
        candidate: &Pipeline,
        safe_cancellation: bool,
    ) -> Result<CancelResult> {
        let result = self
            .executor
            .cancel(
                candidate,
                CancelRequest {
                    auto_canceled_by: trigger.id,
                    safe_cancellation,
                },
            )
            .await?;

        telemetry::log_cancellation(trigger, candidate, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::selector::RedundancyCandidateSelector;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use oxide_core::ids::{PipelineId, ProjectId};
    use oxide_core::pipeline::PipelineSource;
    use oxide_core::ports::PipelineStore;
    use oxide_core::status::CiStatus;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MockPipelineStore {
        pipelines: Vec<Pipeline>,
        conservative_interruptible: HashSet<PipelineId>,
    }

    #[async_trait]
    impl PipelineStore for MockPipelineStore {
        async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>> {
            Ok(self.pipelines.iter().find(|p| p.id == id).cloned())
        }

        async fn ref_pipeline_ids(
            &self,
            _project_id: ProjectId,
            _git_ref: &str,
            exclude: PipelineId,
            _statuses: &[CiStatus],
            _limit: usize,
        ) -> Result<Vec<PipelineId>> {
            let mut ids: Vec<PipelineId> = self
                .pipelines
                .iter()
                .map(|p| p.id)
                .filter(|id| *id != exclude)
                .collect();
            ids.sort_by(|a, b| b.cmp(a));
            Ok(ids)
        }

        async fn find_batch(&self, ids: &[PipelineId]) -> Result<Vec<Pipeline>> {
            Ok(self
                .pipelines
                .iter()
                .filter(|p| ids.contains(&p.id))
                .cloned()
                .collect())
        }

        async fn conservative_interruptible(
            &self,
            ids: &[PipelineId],
        ) -> Result<HashSet<PipelineId>> {
            Ok(ids
                .iter()
                .filter(|id| self.conservative_interruptible.contains(id))
                .copied()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockExecutor {
        calls: Mutex<Vec<(PipelineId, CancelRequest)>>,
        already_canceled: HashSet<PipelineId>,
    }

    #[async_trait]
    impl CancellationExecutor for MockExecutor {
        async fn cancel(&self, pipeline: &Pipeline, request: CancelRequest) -> Result<CancelResult> {
            self.calls.lock().unwrap().push((pipeline.id, request));
            if self.already_canceled.contains(&pipeline.id) {
                return Ok(CancelResult::default());
            }
            Ok(CancelResult {
                builds_canceled: 1,
                pipeline_canceled: true,
            })
        }
    }

    fn pipeline(id: i64, policy: AutoCancelOnNewCommit) -> Pipeline {
        Pipeline {
            id: PipelineId::new(id),
            project_id: ProjectId::new(1),
            git_ref: "main".to_string(),
            sha: format!("sha-{id}"),
            source: PipelineSource::Push,
            status: CiStatus::Running,
            auto_cancel_on_new_commit: policy,
            parent_pipeline_id: None,
            created_at: Utc::now() - Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_each_policy_is_routed() {
        let mut trigger = pipeline(100, AutoCancelOnNewCommit::Conservative);
        trigger.created_at = Utc::now();

        let store = Arc::new(MockPipelineStore {
            pipelines: vec![
                pipeline(1, AutoCancelOnNewCommit::None),
                pipeline(2, AutoCancelOnNewCommit::Conservative),
                pipeline(3, AutoCancelOnNewCommit::Conservative),
                pipeline(4, AutoCancelOnNewCommit::Interruptible),
            ],
            conservative_interruptible: HashSet::from([PipelineId::new(2)]),
        });
        let executor = Arc::new(MockExecutor::default());

        let selector = RedundancyCandidateSelector::new(store, &AdmissionConfig::default());
        let dispatcher = CancellationPolicyDispatcher::new(executor.clone());
        let candidates = selector.select(&trigger, None, Utc::now()).await.unwrap();
        let outcome = dispatcher.dispatch(&trigger, candidates).await.unwrap();

        assert_eq!(
            outcome,
            CancellationOutcome {
                configured_to_not_cancel: 1,
                left_alone: 1,
                conservatively_cancelled: 1,
                aggressively_cancelled: 1,
                ..Default::default()
            }
        );
        assert_eq!(outcome.cancellations(), 2);

        let calls = executor.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                (
                    PipelineId::new(2),
                    CancelRequest {
                        auto_canceled_by: trigger.id,
                        safe_cancellation: false,
                    }
                ),
                (
                    PipelineId::new(4),
                    CancelRequest {
                        auto_canceled_by: trigger.id,
                        safe_cancellation: true,
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_candidates_no_cancellations() {
        let trigger = pipeline(100, AutoCancelOnNewCommit::Conservative);
        let store = Arc::new(MockPipelineStore {
            pipelines: vec![],
            conservative_interruptible: HashSet::new(),
        });
        let executor = Arc::new(MockExecutor::default());

        let selector = RedundancyCandidateSelector::new(store, &AdmissionConfig::default());
        let dispatcher = CancellationPolicyDispatcher::new(executor.clone());
        let candidates = selector.select(&trigger, None, Utc::now()).await.unwrap();
        let outcome = dispatcher.dispatch(&trigger, candidates).await.unwrap();

        assert_eq!(outcome, CancellationOutcome::default());
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_noop_cancellations_are_not_counted_as_cancelled() {
        let mut trigger = pipeline(100, AutoCancelOnNewCommit::Conservative);
        trigger.created_at = Utc::now();

        let store = Arc::new(MockPipelineStore {
            pipelines: vec![
                pipeline(1, AutoCancelOnNewCommit::Conservative),
                pipeline(2, AutoCancelOnNewCommit::Interruptible),
                pipeline(3, AutoCancelOnNewCommit::Interruptible),
            ],
            conservative_interruptible: HashSet::from([PipelineId::new(1)]),
        });
        let executor = Arc::new(MockExecutor {
            already_canceled: HashSet::from([PipelineId::new(1), PipelineId::new(2)]),
            ..Default::default()
        });

        let selector = RedundancyCandidateSelector::new(store, &AdmissionConfig::default());
        let dispatcher = CancellationPolicyDispatcher::new(executor.clone());
        let candidates = selector.select(&trigger, None, Utc::now()).await.unwrap();
        let outcome = dispatcher.dispatch(&trigger, candidates).await.unwrap();

        assert_eq!(
            outcome,
            CancellationOutcome {
                aggressively_cancelled: 1,
                already_canceled: 2,
                ..Default::default()
            }
        );
        assert_eq!(outcome.cancellations(), 1);
        assert_eq!(executor.calls.lock().unwrap().len(), 3);
    }
}
