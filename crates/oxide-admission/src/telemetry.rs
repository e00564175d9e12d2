//! Structured log entries emitted by admission runs.

use crate::dispatcher::CancellationOutcome;
use crate::gate::GroupDrop;
use crate::skip::SkipReason;
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::CancelResult;
use tracing::{debug, info, warn};

/// One entry per cancellation decision, with what it changed.
pub fn log_cancellation(trigger: &Pipeline, canceled: &Pipeline, result: &CancelResult) {
    if result.is_noop() {
        debug!(
            canceled_pipeline_id = %canceled.id,
            canceled_by_pipeline_id = %trigger.id,
            policy = %canceled.auto_cancel_on_new_commit,
            "Pipeline #{} found nothing left to cancel in pipeline #{}",
            trigger.id,
            canceled.id
        );
        return;
    }

    info!(
        canceled_pipeline_id = %canceled.id,
        canceled_by_pipeline_id = %trigger.id,
        canceled_by_pipeline_source = %trigger.source,
        project_id = %trigger.project_id,
        policy = %canceled.auto_cancel_on_new_commit,
        builds_canceled = result.builds_canceled,
        pipeline_canceled = result.pipeline_canceled,
        "Pipeline #{} auto-canceling pipeline #{}",
        trigger.id,
        canceled.id
    );
}

/// One summary entry per cancellation run.
pub fn log_summary(trigger: &Pipeline, outcome: &CancellationOutcome) {
    info!(
        pipeline_id = %trigger.id,
        project_id = %trigger.project_id,
        git_ref = %trigger.git_ref,
        skipped_for_old_age = outcome.skipped_for_old_age,
        skipped = outcome.skipped,
        configured_to_not_cancel = outcome.configured_to_not_cancel,
        left_alone = outcome.left_alone,
        conservatively_cancelled = outcome.conservatively_cancelled,
        aggressively_cancelled = outcome.aggressively_cancelled,
        already_canceled = outcome.already_canceled,
        "Canceling redundant pipelines"
    );
}

pub fn log_skip(trigger: &Pipeline, candidate: &Pipeline, reason: SkipReason) {
    debug!(
        pipeline_id = %trigger.id,
        candidate_id = %candidate.id,
        reason = %reason,
        "Skipping redundant pipeline candidate"
    );
}

pub fn log_unresolvable_ancestry(candidate: &Pipeline, error: &oxide_core::Error) {
    warn!(
        candidate_id = %candidate.id,
        error = %error,
        "Leaving pipeline with unresolvable ancestry alone"
    );
}

/// One entry per requirement group whose builds were dropped.
pub fn log_group_drop(pipeline: &Pipeline, drop: &GroupDrop) {
    info!(
        pipeline_id = %pipeline.id,
        project_id = %pipeline.project_id,
        failure_reason = %drop.reason,
        requirement = %drop.signature,
        builds = drop.build_ids.len(),
        dropped = drop.dropped,
        "Dropping builds without an eligible runner"
    );
}
