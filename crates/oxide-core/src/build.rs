//! Build (job) types.

use crate::ids::{BuildId, PipelineId, ProjectId};
use crate::status::CiStatus;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Build {
    pub id: BuildId,
    pub pipeline_id: PipelineId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: CiStatus,
    /// `None` when the configuration did not say.
    #[serde(default)]
    pub interruptible: Option<bool>,
    pub requirement: RequirementSignature,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
}

impl Build {
    pub fn is_interruptible(&self) -> bool {
        self.interruptible == Some(true)
    }
}

/// What a build needs from a runner. Builds with equal signatures are
/// eligible for exactly the same runners.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct RequirementSignature {
    pub tags: BTreeSet<String>,
    /// Build runs for a protected ref.
    #[serde(default)]
    pub protected: bool,
}

impl RequirementSignature {
    pub fn new<I, S>(tags: I, protected: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            protected,
        }
    }

    pub fn untagged() -> Self {
        Self::default()
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }
}

impl fmt::Display for RequirementSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        write!(f, "tags=[{}] protected={}", tags.join(","), self.protected)
    }
}

/// Why a build was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoMatchingRunner,
    CiQuotaExceeded,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoMatchingRunner => "no_matching_runner",
            FailureReason::CiQuotaExceeded => "ci_quota_exceeded",
        }
    }

    /// Text shown to users on the dropped build.
    pub fn description(&self) -> &'static str {
        match self {
            FailureReason::NoMatchingRunner => "No matching runner available",
            FailureReason::CiQuotaExceeded => "No more compute minutes available",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_tag_order_and_duplicates() {
        let a = RequirementSignature::new(["gpu", "linux", "gpu"], false);
        let b = RequirementSignature::new(["linux", "gpu"], false);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "tags=[gpu,linux] protected=false");
    }

    #[test]
    fn test_protected_flag_distinguishes_signatures() {
        let a = RequirementSignature::new(["gpu"], true);
        let b = RequirementSignature::new(["gpu"], false);
        assert_ne!(a, b);
    }
}
