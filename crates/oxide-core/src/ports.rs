//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the admission layer and the
//! systems it collaborates with: pipeline storage, the runner catalog, the
//! cancellation executor and the generic pipeline processor.

use crate::build::{Build, FailureReason};
use crate::ids::*;
use crate::pipeline::Pipeline;
use crate::runner::RunnerMatchers;
use crate::status::CiStatus;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;

/// Read access to stored pipelines.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Get a pipeline by ID.
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    /// Ids of pipelines on the same project and ref, excluding `exclude`,
    /// whose status is in `statuses`. Ordered by id descending, at most
    /// `limit` entries.
    async fn ref_pipeline_ids(
        &self,
        project_id: ProjectId,
        git_ref: &str,
        exclude: PipelineId,
        statuses: &[CiStatus],
        limit: usize,
    ) -> Result<Vec<PipelineId>>;

    /// Fetch a batch of pipelines by primary key, ordered by id ascending.
    async fn find_batch(&self, ids: &[PipelineId]) -> Result<Vec<Pipeline>>;

    /// The subset of `ids` whose started builds are all interruptible.
    async fn conservative_interruptible(&self, ids: &[PipelineId]) -> Result<HashSet<PipelineId>>;

    /// Root of the parent-child chain `pipeline` belongs to.
    ///
    /// Stores with a cached root accessor should override this. The default
    /// walks parent references one query at a time and fails on cycles or
    /// chains deeper than `max_depth`.
    async fn root_ancestor(&self, pipeline: &Pipeline, max_depth: usize) -> Result<Pipeline> {
        let mut current = pipeline.clone();
        let mut visited = HashSet::from([current.id]);

        while current.is_child() {
            let Some(parent_id) = current.parent_pipeline_id else {
                break;
            };

            if !visited.insert(parent_id) {
                return Err(Error::CorruptAncestry {
                    pipeline: pipeline.id,
                    reason: format!("cycle through pipeline {parent_id}"),
                });
            }
            if visited.len() > max_depth {
                return Err(Error::CorruptAncestry {
                    pipeline: pipeline.id,
                    reason: format!("deeper than {max_depth} levels"),
                });
            }

            match self.find(parent_id).await? {
                Some(parent) => current = parent,
                // Dangling reference: the oldest reachable pipeline is the root.
                None => break,
            }
        }

        Ok(current)
    }
}

/// Read access to the builds of a pipeline.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Builds of the pipeline that have not started yet.
    async fn unscheduled_builds(&self, pipeline_id: PipelineId) -> Result<Vec<Build>>;
}

/// Moves builds to a failed state.
#[async_trait]
pub trait BuildDropper: Send + Sync {
    /// Drop the given builds with `reason`. Builds that are no longer
    /// runnable are left alone. Returns how many builds changed state.
    ///
    /// With `skip_pipeline_processing` the pipeline status is not recomputed.
    async fn drop_builds(
        &self,
        build_ids: &[BuildId],
        reason: FailureReason,
        skip_pipeline_processing: bool,
    ) -> Result<usize>;
}

/// Active, reachable runners.
#[async_trait]
pub trait RunnerCatalog: Send + Sync {
    /// Matchers of the runners a project can use, partitioned by scope.
    async fn active_matchers(&self, project_id: ProjectId) -> Result<RunnerMatchers>;
}

/// Compute-minute quota for instance runners.
#[async_trait]
pub trait ComputeQuota: Send + Sync {
    async fn minutes_exhausted(&self, project_id: ProjectId) -> Result<bool>;
}

/// Request to cancel one pipeline on behalf of a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub auto_canceled_by: PipelineId,
    /// Cancel only interruptible builds and leave the rest running.
    pub safe_cancellation: bool,
}

/// Effect of a cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelResult {
    pub builds_canceled: usize,
    pub pipeline_canceled: bool,
}

impl CancelResult {
    pub fn is_noop(&self) -> bool {
        self.builds_canceled == 0 && !self.pipeline_canceled
    }
}

/// Performs the cancel state transition.
///
/// Implementations must be idempotent: cancelling a pipeline that is
/// already canceled returns a no-op result. Cancellation never cascades to
/// child pipelines.
#[async_trait]
pub trait CancellationExecutor: Send + Sync {
    async fn cancel(&self, pipeline: &Pipeline, request: CancelRequest) -> Result<CancelResult>;
}

/// Project-level settings and repository state.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Whether the project opted in to auto-cancelling redundant pipelines.
    async fn auto_cancel_pending_pipelines(&self, project_id: ProjectId) -> Result<bool>;

    /// Current head commit of a ref, if the ref exists.
    async fn ref_head_sha(&self, project_id: ProjectId, git_ref: &str) -> Result<Option<String>>;
}

/// Named boolean toggles read once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    /// Kill switch for redundant pipeline cancellation.
    DisableCancelRedundantPipelines,
    /// Enables dropping builds no runner can pick up.
    DropNotRunnableBuilds,
}

impl FeatureFlag {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureFlag::DisableCancelRedundantPipelines => "disable_cancel_redundant_pipelines",
            FeatureFlag::DropNotRunnableBuilds => "ci_drop_not_runnable_builds",
        }
    }

    /// Value used when nothing is configured for the flag.
    pub fn default_enabled(&self) -> bool {
        match self {
            FeatureFlag::DisableCancelRedundantPipelines => false,
            FeatureFlag::DropNotRunnableBuilds => true,
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait FeatureToggles: Send + Sync {
    async fn is_enabled(&self, flag: FeatureFlag, project_id: ProjectId) -> Result<bool>;
}

/// Entry point of the generic pipeline state machine.
#[async_trait]
pub trait PipelineProcessor: Send + Sync {
    async fn process(&self, pipeline_id: PipelineId) -> Result<()>;
}
