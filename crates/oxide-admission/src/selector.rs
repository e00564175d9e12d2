//! Redundant pipeline candidate selection.
//!
//! Candidates are the most recent cancelable pipelines on the trigger's
//! ref, visited oldest first so that ancestors are resolved before their
//! descendants. Rows are loaded lazily in primary-key batches.

use crate::config::AdmissionConfig;
use crate::skip::{SkipPolicy, SkipReason};
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use oxide_core::ids::PipelineId;
use oxide_core::pipeline::{AutoCancelOnNewCommit, Pipeline};
use oxide_core::ports::PipelineStore;
use oxide_core::status::CiStatus;
use oxide_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Queries prior same-ref pipelines that are still cancelable.
pub struct RedundancyCandidateSelector {
    store: Arc<dyn PipelineStore>,
    batch_size: usize,
    max_candidates: usize,
    lookback: Duration,
    max_ancestor_depth: usize,
}

impl RedundancyCandidateSelector {
    pub fn new(store: Arc<dyn PipelineStore>, config: &AdmissionConfig) -> Self {
        Self {
            store,
            batch_size: config.cancellation.batch_size.max(1),
            max_candidates: config.cancellation.max_cancellations,
            lookback: config.cancellation.lookback(),
            max_ancestor_depth: config.ancestry.max_depth,
        }
    }

    /// Start a candidate run for `trigger`.
    ///
    /// Only the id query runs here; pipeline rows are fetched as the
    /// returned cursor is advanced.
    pub async fn select<'a>(
        &'a self,
        trigger: &'a Pipeline,
        ref_head_sha: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> Result<Candidates<'a>> {
        let mut ids = self
            .store
            .ref_pipeline_ids(
                trigger.project_id,
                &trigger.git_ref,
                trigger.id,
                &CiStatus::CANCELABLE,
                self.max_candidates,
            )
            .await?;
        ids.truncate(self.max_candidates);
        ids.reverse();

        let batches: Vec<Vec<PipelineId>> = ids
            .chunks(self.batch_size)
            .map(<[PipelineId]>::to_vec)
            .collect();

        Ok(Candidates {
            store: self.store.as_ref(),
            trigger,
            policy: SkipPolicy::new(trigger, ref_head_sha, now, self.lookback),
            batches: batches.into_iter(),
            max_ancestor_depth: self.max_ancestor_depth,
            roots: HashMap::new(),
            tally: SkipTally::default(),
        })
    }
}

/// Candidates that survived the skip policy, one primary-key batch at a time.
#[derive(Debug, Default)]
pub struct CandidateBatch {
    /// Ordered by id ascending.
    pub pipelines: Vec<Pipeline>,
    /// Ids in this batch whose started builds are all interruptible.
    pub conservative_interruptible: HashSet<PipelineId>,
}

/// Counts of filtered candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipTally {
    pub old_age: usize,
    pub other: usize,
}

impl SkipTally {
    fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::OldAge => self.old_age += 1,
            _ => self.other += 1,
        }
    }
}

/// Finite, non-restartable cursor over candidate batches.
pub struct Candidates<'a> {
    store: &'a dyn PipelineStore,
    trigger: &'a Pipeline,
    policy: SkipPolicy<'a>,
    batches: std::vec::IntoIter<Vec<PipelineId>>,
    max_ancestor_depth: usize,
    /// Resolved roots keyed by parent id; `None` marks corrupt ancestry.
    roots: HashMap<PipelineId, Option<Pipeline>>,
    tally: SkipTally,
}

impl Candidates<'_> {
    /// Load and screen the next batch. Returns `None` once exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<CandidateBatch>> {
        let Some(ids) = self.batches.next() else {
            return Ok(None);
        };

        let rows = self.store.find_batch(&ids).await?;
        let mut pipelines = Vec::with_capacity(rows.len());

        for candidate in rows {
            match self.screen(&candidate).await? {
                Some(reason) => {
                    telemetry::log_skip(self.trigger, &candidate, reason);
                    self.tally.record(reason);
                }
                None => pipelines.push(candidate),
            }
        }

        let needs_conservative = pipelines
            .iter()
            .any(|p| p.auto_cancel_on_new_commit == AutoCancelOnNewCommit::Conservative);
        let conservative_interruptible = if needs_conservative {
            self.store.conservative_interruptible(&ids).await?
        } else {
            HashSet::new()
        };

        Ok(Some(CandidateBatch {
            pipelines,
            conservative_interruptible,
        }))
    }

    /// Skips recorded so far.
    pub fn tally(&self) -> SkipTally {
        self.tally
    }

    async fn screen(&mut self, candidate: &Pipeline) -> Result<Option<SkipReason>> {
        let parent_id = match candidate.parent_pipeline_id {
            Some(parent_id) if self.policy.judges_by_root(candidate) => parent_id,
            _ => return Ok(self.policy.evaluate(candidate, None)),
        };

        // Siblings share their parent's root.
        if let Some(cached) = self.roots.get(&parent_id) {
            return Ok(match cached {
                Some(root) => self.policy.evaluate(candidate, Some(root)),
                None => Some(SkipReason::UnresolvableAncestry),
            });
        }

        match self
            .store
            .root_ancestor(candidate, self.max_ancestor_depth)
            .await
        {
            Ok(root) => {
                let reason = self.policy.evaluate(candidate, Some(&root));
                self.roots.insert(parent_id, Some(root));
                Ok(reason)
            }
            Err(err @ Error::CorruptAncestry { .. }) => {
                telemetry::log_unresolvable_ancestry(candidate, &err);
                self.roots.insert(parent_id, None);
                Ok(Some(SkipReason::UnresolvableAncestry))
            }
            Err(err) => Err(err),
        }
    }
}
