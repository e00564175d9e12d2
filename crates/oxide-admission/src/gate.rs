//! Dropping builds that no runner can ever pick up.
//!
//! Runs once, while the pipeline is still `created`. Private runners are
//! consulted first with an exact match; instance runners are consulted next
//! and also have to pass the compute-quota policy. The gate only ever moves
//! builds from runnable to failed, so running it again is harmless.

use crate::grouper::{BuildRequirementGrouper, RequirementGroup};
use crate::telemetry;
use oxide_core::Result;
use oxide_core::build::{FailureReason, RequirementSignature};
use oxide_core::ids::{BuildId, ProjectId};
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::{
    BuildDropper, BuildStore, ComputeQuota, FeatureFlag, FeatureToggles, RunnerCatalog,
};
use oxide_core::runner::{RunnerMatcher, RunnerMatchers};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Builds of one requirement group that were dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDrop {
    pub signature: RequirementSignature,
    pub reason: FailureReason,
    pub build_ids: Vec<BuildId>,
    /// Builds that actually changed state.
    pub dropped: usize,
}

/// Result of one gate run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateOutcome {
    /// False when the pipeline was not eligible for checking.
    pub checked: bool,
    pub groups_checked: usize,
    pub drops: Vec<GroupDrop>,
}

impl GateOutcome {
    pub fn builds_dropped(&self) -> usize {
        self.drops.iter().map(|d| d.dropped).sum()
    }
}

/// Lazily-read compute quota; at most one lookup per run.
struct QuotaCheck<'a> {
    quota: &'a dyn ComputeQuota,
    project_id: ProjectId,
    exhausted: Option<bool>,
}

impl QuotaCheck<'_> {
    async fn minutes_exhausted(&mut self) -> Result<bool> {
        if let Some(exhausted) = self.exhausted {
            return Ok(exhausted);
        }
        let exhausted = self.quota.minutes_exhausted(self.project_id).await?;
        self.exhausted = Some(exhausted);
        Ok(exhausted)
    }
}

/// Fails builds that have no eligible runner.
pub struct RunnerAvailabilityGate {
    builds: Arc<dyn BuildStore>,
    dropper: Arc<dyn BuildDropper>,
    catalog: Arc<dyn RunnerCatalog>,
    quota: Arc<dyn ComputeQuota>,
    toggles: Arc<dyn FeatureToggles>,
    grouper: BuildRequirementGrouper,
}

impl RunnerAvailabilityGate {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        dropper: Arc<dyn BuildDropper>,
        catalog: Arc<dyn RunnerCatalog>,
        quota: Arc<dyn ComputeQuota>,
        toggles: Arc<dyn FeatureToggles>,
    ) -> Self {
        Self {
            builds,
            dropper,
            catalog,
            quota,
            toggles,
            grouper: BuildRequirementGrouper::new(),
        }
    }

    /// Drop every build of `pipeline` that no active runner accepts.
    ///
    /// A catalog failure aborts before anything is dropped, leaving the
    /// pipeline `created` for a later retry.
    #[tracing::instrument(
        name = "drop_not_runnable_builds",
        skip_all,
        fields(pipeline_id = %pipeline.id, project_id = %pipeline.project_id)
    )]
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<GateOutcome> {
        if !pipeline.is_created() {
            debug!(status = %pipeline.status, "Pipeline already processed");
            return Ok(GateOutcome::default());
        }

        if !self
            .toggles
            .is_enabled(FeatureFlag::DropNotRunnableBuilds, pipeline.project_id)
            .await?
        {
            debug!("Runner availability gate disabled");
            return Ok(GateOutcome::default());
        }

        let matchers = self.catalog.active_matchers(pipeline.project_id).await?;
        let builds = self.builds.unscheduled_builds(pipeline.id).await?;
        let groups = self.grouper.group(&builds);

        let mut quota = QuotaCheck {
            quota: self.quota.as_ref(),
            project_id: pipeline.project_id,
            exhausted: None,
        };
        let mut drops = Vec::new();

        for group in &groups {
            let Some(reason) = Self::failure_reason(&group.signature, &matchers, &mut quota).await?
            else {
                continue;
            };

            let drop = self.drop_group(group, reason).await?;
            telemetry::log_group_drop(pipeline, &drop);
            drops.push(drop);
        }

        Ok(GateOutcome {
            checked: true,
            groups_checked: groups.len(),
            drops,
        })
    }

    async fn failure_reason(
        signature: &RequirementSignature,
        matchers: &RunnerMatchers,
        quota: &mut QuotaCheck<'_>,
    ) -> Result<Option<FailureReason>> {
        if matchers.private.iter().any(|m| m.matches(signature)) {
            return Ok(None);
        }

        let instance: Vec<&RunnerMatcher> = matchers
            .instance
            .iter()
            .filter(|m| m.matches(signature))
            .collect();

        if instance.is_empty() {
            return Ok(Some(FailureReason::NoMatchingRunner));
        }
        if instance.iter().any(|m| m.is_free()) {
            return Ok(None);
        }
        if quota.minutes_exhausted().await? {
            return Ok(Some(FailureReason::CiQuotaExceeded));
        }

        Ok(None)
    }

    async fn drop_group(&self, group: &RequirementGroup, reason: FailureReason) -> Result<GroupDrop> {
        // Status is recomputed once by the caller, after every group is handled.
        let dropped = self
            .dropper
            .drop_builds(&group.build_ids, reason, true)
            .await?;

        Ok(GroupDrop {
            signature: group.signature.clone(),
            reason,
            build_ids: group.build_ids.clone(),
            dropped,
        })
    }
}
