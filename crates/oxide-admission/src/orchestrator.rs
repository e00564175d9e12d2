//! Admission hook run right after a pipeline is created.

use crate::gate::{GateOutcome, RunnerAvailabilityGate};
use oxide_core::Result;
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::PipelineProcessor;
use std::sync::Arc;
use tracing::info;

/// Runs the runner availability gate, then hands the pipeline to the
/// generic processor so its status reflects the dropped builds.
///
/// Redundant pipeline cancellation is scheduled separately and is not
/// invoked from here.
pub struct AdmissionOrchestrator {
    gate: RunnerAvailabilityGate,
    processor: Arc<dyn PipelineProcessor>,
}

impl AdmissionOrchestrator {
    pub fn new(gate: RunnerAvailabilityGate, processor: Arc<dyn PipelineProcessor>) -> Self {
        Self { gate, processor }
    }

    /// Admit a freshly created pipeline.
    ///
    /// If the gate fails the processor is not invoked and the error is
    /// returned unchanged.
    pub async fn admit(&self, pipeline: &Pipeline) -> Result<GateOutcome> {
        let outcome = self.gate.execute(pipeline).await?;

        if !outcome.drops.is_empty() {
            info!(
                pipeline_id = %pipeline.id,
                groups = outcome.drops.len(),
                builds_dropped = outcome.builds_dropped(),
                "Dropped not runnable builds"
            );
        }

        self.processor.process(pipeline.id).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticFeatureToggles;
    use async_trait::async_trait;
    use oxide_core::Error;
    use oxide_core::build::{Build, FailureReason, RequirementSignature};
    use oxide_core::ids::{BuildId, PipelineId, ProjectId};
    use oxide_core::pipeline::{AutoCancelOnNewCommit, PipelineSource};
    use oxide_core::ports::{BuildDropper, BuildStore, ComputeQuota, RunnerCatalog};
    use oxide_core::runner::RunnerMatchers;
    use oxide_core::status::CiStatus;
    use std::sync::Mutex;

    struct OneBuild;

    #[async_trait]
    impl BuildStore for OneBuild {
        async fn unscheduled_builds(&self, pipeline_id: PipelineId) -> Result<Vec<Build>> {
            Ok(vec![Build {
                id: BuildId::new(1),
                pipeline_id,
                project_id: ProjectId::new(1),
                name: "rspec".to_string(),
                status: CiStatus::Created,
                interruptible: None,
                requirement: RequirementSignature::new(["gpu"], false),
                failure_reason: None,
            }])
        }
    }

    #[derive(Default)]
    struct RecordingDropper {
        dropped: Mutex<Vec<BuildId>>,
    }

    #[async_trait]
    impl BuildDropper for RecordingDropper {
        async fn drop_builds(
            &self,
            build_ids: &[BuildId],
            _reason: FailureReason,
            _skip_pipeline_processing: bool,
        ) -> Result<usize> {
            self.dropped.lock().unwrap().extend_from_slice(build_ids);
            Ok(build_ids.len())
        }
    }

    struct Catalog {
        fail: bool,
    }

    #[async_trait]
    impl RunnerCatalog for Catalog {
        async fn active_matchers(&self, _project_id: ProjectId) -> Result<RunnerMatchers> {
            if self.fail {
                return Err(Error::RunnerCatalog("timeout".into()));
            }
            Ok(RunnerMatchers::default())
        }
    }

    struct NoQuota;

    #[async_trait]
    impl ComputeQuota for NoQuota {
        async fn minutes_exhausted(&self, _project_id: ProjectId) -> Result<bool> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct RecordingProcessor {
        processed: Mutex<Vec<PipelineId>>,
    }

    #[async_trait]
    impl PipelineProcessor for RecordingProcessor {
        async fn process(&self, pipeline_id: PipelineId) -> Result<()> {
            self.processed.lock().unwrap().push(pipeline_id);
            Ok(())
        }
    }

    fn created_pipeline() -> Pipeline {
        Pipeline {
            id: PipelineId::new(7),
            project_id: ProjectId::new(1),
            git_ref: "main".to_string(),
            sha: "abc".to_string(),
            source: PipelineSource::Push,
            status: CiStatus::Created,
            auto_cancel_on_new_commit: AutoCancelOnNewCommit::Conservative,
            parent_pipeline_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn orchestrator(
        fail_catalog: bool,
    ) -> (AdmissionOrchestrator, Arc<RecordingDropper>, Arc<RecordingProcessor>) {
        let dropper = Arc::new(RecordingDropper::default());
        let processor = Arc::new(RecordingProcessor::default());
        let gate = RunnerAvailabilityGate::new(
            Arc::new(OneBuild),
            dropper.clone(),
            Arc::new(Catalog { fail: fail_catalog }),
            Arc::new(NoQuota),
            Arc::new(StaticFeatureToggles::default()),
        );
        (
            AdmissionOrchestrator::new(gate, processor.clone()),
            dropper,
            processor,
        )
    }

    #[tokio::test]
    async fn test_admit_drops_then_processes() {
        let (orchestrator, dropper, processor) = orchestrator(false);

        let outcome = orchestrator.admit(&created_pipeline()).await.unwrap();

        assert_eq!(outcome.builds_dropped(), 1);
        assert_eq!(*dropper.dropped.lock().unwrap(), vec![BuildId::new(1)]);
        assert_eq!(*processor.processed.lock().unwrap(), vec![PipelineId::new(7)]);
    }

    #[tokio::test]
    async fn test_gate_failure_skips_processing() {
        let (orchestrator, dropper, processor) = orchestrator(true);

        let err = orchestrator.admit(&created_pipeline()).await.unwrap_err();

        assert!(matches!(err, Error::RunnerCatalog(_)));
        assert!(dropper.dropped.lock().unwrap().is_empty());
        assert!(processor.processed.lock().unwrap().is_empty());
    }
}
