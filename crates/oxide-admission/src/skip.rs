//! Candidates that must never be cancelled.

use chrono::{DateTime, Duration, Utc};
use oxide_core::pipeline::{Pipeline, PipelineSource};
use std::fmt;

/// Why a candidate was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The candidate is the triggering pipeline.
    Trigger,
    /// Status changed to something not cancelable since it was listed.
    NotCancelable,
    /// Created at the same time as, or after, the trigger.
    NotOlderThanTrigger,
    /// Child pipeline whose root was created at or after the trigger.
    RootNotOlderThanTrigger,
    /// Source does not take part in ref CI status.
    NonParticipatingSource,
    /// Runs the same commit as the trigger.
    SameSha,
    /// Runs the current head of the ref.
    RefHead,
    /// Parent-child chain could not be resolved.
    UnresolvableAncestry,
    /// Created before the lookback window.
    OldAge,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Trigger => "trigger",
            SkipReason::NotCancelable => "not_cancelable",
            SkipReason::NotOlderThanTrigger => "not_older_than_trigger",
            SkipReason::RootNotOlderThanTrigger => "root_not_older_than_trigger",
            SkipReason::NonParticipatingSource => "non_participating_source",
            SkipReason::SameSha => "same_sha",
            SkipReason::RefHead => "ref_head",
            SkipReason::UnresolvableAncestry => "unresolvable_ancestry",
            SkipReason::OldAge => "old_age",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure per-candidate predicate for one triggering pipeline.
///
/// "Not older" is inclusive: a candidate created at exactly the trigger's
/// timestamp is skipped. The age cutoff is exclusive: a candidate created at
/// exactly `now - lookback` is still eligible.
#[derive(Debug, Clone, Copy)]
pub struct SkipPolicy<'a> {
    trigger: &'a Pipeline,
    ref_head_sha: Option<&'a str>,
    cutoff: DateTime<Utc>,
}

impl<'a> SkipPolicy<'a> {
    pub fn new(
        trigger: &'a Pipeline,
        ref_head_sha: Option<&'a str>,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Self {
        Self {
            trigger,
            ref_head_sha,
            cutoff: now - lookback,
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Child pipelines are judged by the age of their root ancestor.
    pub fn judges_by_root(&self, candidate: &Pipeline) -> bool {
        candidate.source == PipelineSource::ParentPipeline
    }

    /// `root` must be supplied when [`Self::judges_by_root`] holds; the
    /// candidate itself is used otherwise.
    pub fn evaluate(&self, candidate: &Pipeline, root: Option<&Pipeline>) -> Option<SkipReason> {
        if candidate.id == self.trigger.id {
            return Some(SkipReason::Trigger);
        }
        if !candidate.status.is_cancelable() {
            return Some(SkipReason::NotCancelable);
        }

        if candidate.source.is_ci_source() {
            if candidate.created_at >= self.trigger.created_at {
                return Some(SkipReason::NotOlderThanTrigger);
            }
        } else if self.judges_by_root(candidate) {
            let root = root.unwrap_or(candidate);
            if root.created_at >= self.trigger.created_at {
                return Some(SkipReason::RootNotOlderThanTrigger);
            }
        } else {
            return Some(SkipReason::NonParticipatingSource);
        }

        if candidate.sha == self.trigger.sha {
            return Some(SkipReason::SameSha);
        }
        if self.ref_head_sha == Some(candidate.sha.as_str()) {
            return Some(SkipReason::RefHead);
        }

        if candidate.created_at < self.cutoff {
            return Some(SkipReason::OldAge);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::ids::{PipelineId, ProjectId};
    use oxide_core::pipeline::AutoCancelOnNewCommit;
    use oxide_core::status::CiStatus;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn pipeline(id: i64, sha: &str, source: PipelineSource, created_at: DateTime<Utc>) -> Pipeline {
        Pipeline {
            id: PipelineId::new(id),
            project_id: ProjectId::new(1),
            git_ref: "main".to_string(),
            sha: sha.to_string(),
            source,
            status: CiStatus::Running,
            auto_cancel_on_new_commit: AutoCancelOnNewCommit::Interruptible,
            parent_pipeline_id: None,
            created_at,
        }
    }

    fn trigger() -> Pipeline {
        pipeline(100, "new-sha", PipelineSource::Push, now())
    }

    #[test]
    fn test_older_push_pipeline_is_eligible() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, Some("new-sha"), now(), Duration::days(7));
        let candidate = pipeline(1, "old-sha", PipelineSource::Push, now() - Duration::hours(1));

        assert_eq!(policy.evaluate(&candidate, None), None);
    }

    #[test]
    fn test_same_timestamp_is_not_older() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, None, now(), Duration::days(7));
        let candidate = pipeline(1, "old-sha", PipelineSource::Push, now());

        assert_eq!(
            policy.evaluate(&candidate, None),
            Some(SkipReason::NotOlderThanTrigger)
        );
    }

    #[test]
    fn test_age_cutoff_boundary() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, None, now(), Duration::days(7));

        let at_cutoff = pipeline(1, "a", PipelineSource::Push, now() - Duration::days(7));
        assert_eq!(policy.evaluate(&at_cutoff, None), None);

        let past_cutoff = pipeline(
            2,
            "b",
            PipelineSource::Push,
            now() - Duration::days(7) - Duration::seconds(1),
        );
        assert_eq!(policy.evaluate(&past_cutoff, None), Some(SkipReason::OldAge));
    }

    #[test]
    fn test_sha_matches_are_skipped_regardless_of_age() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, Some("head-sha"), now(), Duration::days(7));

        let same_sha = pipeline(1, "new-sha", PipelineSource::Push, now() - Duration::hours(1));
        assert_eq!(policy.evaluate(&same_sha, None), Some(SkipReason::SameSha));

        let head = pipeline(2, "head-sha", PipelineSource::Push, now() - Duration::days(30));
        assert_eq!(policy.evaluate(&head, None), Some(SkipReason::RefHead));
    }

    #[test]
    fn test_child_judged_by_root_age() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, None, now(), Duration::days(7));

        let mut child = pipeline(
            5,
            "old-sha",
            PipelineSource::ParentPipeline,
            now() - Duration::hours(2),
        );
        child.parent_pipeline_id = Some(PipelineId::new(4));
        assert!(policy.judges_by_root(&child));

        let old_root = pipeline(4, "old-sha", PipelineSource::Push, now() - Duration::hours(3));
        assert_eq!(policy.evaluate(&child, Some(&old_root)), None);

        let new_root = pipeline(4, "old-sha", PipelineSource::Push, now() + Duration::minutes(1));
        assert_eq!(
            policy.evaluate(&child, Some(&new_root)),
            Some(SkipReason::RootNotOlderThanTrigger)
        );
    }

    #[test]
    fn test_dangling_sources_are_skipped() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, None, now(), Duration::days(7));
        let candidate = pipeline(1, "old", PipelineSource::Webide, now() - Duration::hours(1));

        assert_eq!(
            policy.evaluate(&candidate, None),
            Some(SkipReason::NonParticipatingSource)
        );
    }

    #[test]
    fn test_trigger_and_finished_pipelines_are_skipped() {
        let trigger = trigger();
        let policy = SkipPolicy::new(&trigger, None, now(), Duration::days(7));
        assert_eq!(policy.evaluate(&trigger, None), Some(SkipReason::Trigger));

        let mut finished = pipeline(1, "old", PipelineSource::Push, now() - Duration::hours(1));
        finished.status = CiStatus::Canceled;
        assert_eq!(
            policy.evaluate(&finished, None),
            Some(SkipReason::NotCancelable)
        );
    }
}
