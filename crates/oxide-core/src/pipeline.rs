//! Pipeline types.
//!
//! A pipeline is one run of a CI configuration against a specific commit.
//! Pipelines are created by configuration parsing; the admission layer only
//! reads them, drops their builds, or cancels them.

use crate::ids::{PipelineId, ProjectId};
use crate::status::CiStatus;
use crate::Error;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub id: PipelineId,
    pub project_id: ProjectId,
    pub git_ref: String,
    pub sha: String,
    pub source: PipelineSource,
    pub status: CiStatus,
    pub auto_cancel_on_new_commit: AutoCancelOnNewCommit,
    /// Weak back-reference to the pipeline that triggered this one.
    #[serde(default)]
    pub parent_pipeline_id: Option<PipelineId>,
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    /// A child pipeline was spawned by a bridge job of a parent pipeline
    /// in the same project.
    pub fn is_child(&self) -> bool {
        self.source == PipelineSource::ParentPipeline && self.parent_pipeline_id.is_some()
    }

    pub fn is_created(&self) -> bool {
        self.status == CiStatus::Created
    }
}

/// What caused a pipeline to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    Unknown,
    Push,
    Web,
    Trigger,
    Schedule,
    Api,
    External,
    /// Cross-project downstream pipeline.
    Pipeline,
    Chat,
    Webide,
    MergeRequestEvent,
    ExternalPullRequestEvent,
    ParentPipeline,
    OndemandDastScan,
    OndemandDastValidation,
    SecurityOrchestrationPolicy,
    ContainerRegistryPush,
    DuoWorkflow,
    PipelineExecutionPolicySchedule,
}

impl PipelineSource {
    /// Sources whose pipelines never affect the CI status of a ref.
    pub fn is_dangling(&self) -> bool {
        matches!(
            self,
            PipelineSource::Webide
                | PipelineSource::OndemandDastScan
                | PipelineSource::OndemandDastValidation
                | PipelineSource::SecurityOrchestrationPolicy
                | PipelineSource::ContainerRegistryPush
                | PipelineSource::DuoWorkflow
                | PipelineSource::PipelineExecutionPolicySchedule
        )
    }

    /// Sources that participate in the CI status of a ref, child pipelines
    /// excluded.
    pub fn is_ci_source(&self) -> bool {
        !self.is_dangling() && *self != PipelineSource::ParentPipeline
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineSource::Unknown => "unknown",
            PipelineSource::Push => "push",
            PipelineSource::Web => "web",
            PipelineSource::Trigger => "trigger",
            PipelineSource::Schedule => "schedule",
            PipelineSource::Api => "api",
            PipelineSource::External => "external",
            PipelineSource::Pipeline => "pipeline",
            PipelineSource::Chat => "chat",
            PipelineSource::Webide => "webide",
            PipelineSource::MergeRequestEvent => "merge_request_event",
            PipelineSource::ExternalPullRequestEvent => "external_pull_request_event",
            PipelineSource::ParentPipeline => "parent_pipeline",
            PipelineSource::OndemandDastScan => "ondemand_dast_scan",
            PipelineSource::OndemandDastValidation => "ondemand_dast_validation",
            PipelineSource::SecurityOrchestrationPolicy => "security_orchestration_policy",
            PipelineSource::ContainerRegistryPush => "container_registry_push",
            PipelineSource::DuoWorkflow => "duo_workflow",
            PipelineSource::PipelineExecutionPolicySchedule => {
                "pipeline_execution_policy_schedule"
            }
        }
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unknown" => PipelineSource::Unknown,
            "push" => PipelineSource::Push,
            "web" => PipelineSource::Web,
            "trigger" => PipelineSource::Trigger,
            "schedule" => PipelineSource::Schedule,
            "api" => PipelineSource::Api,
            "external" => PipelineSource::External,
            "pipeline" => PipelineSource::Pipeline,
            "chat" => PipelineSource::Chat,
            "webide" => PipelineSource::Webide,
            "merge_request_event" => PipelineSource::MergeRequestEvent,
            "external_pull_request_event" => PipelineSource::ExternalPullRequestEvent,
            "parent_pipeline" => PipelineSource::ParentPipeline,
            "ondemand_dast_scan" => PipelineSource::OndemandDastScan,
            "ondemand_dast_validation" => PipelineSource::OndemandDastValidation,
            "security_orchestration_policy" => PipelineSource::SecurityOrchestrationPolicy,
            "container_registry_push" => PipelineSource::ContainerRegistryPush,
            "duo_workflow" => PipelineSource::DuoWorkflow,
            "pipeline_execution_policy_schedule" => {
                PipelineSource::PipelineExecutionPolicySchedule
            }
            other => return Err(Error::UnknownPipelineSource(other.to_string())),
        })
    }
}

/// Per-pipeline policy applied when a newer commit lands on the same ref.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AutoCancelOnNewCommit {
    /// Never auto-cancel.
    None,
    /// Cancel only when every started build is interruptible.
    #[default]
    Conservative,
    /// Always cancel the interruptible builds.
    Interruptible,
}

impl AutoCancelOnNewCommit {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoCancelOnNewCommit::None => "none",
            AutoCancelOnNewCommit::Conservative => "conservative",
            AutoCancelOnNewCommit::Interruptible => "interruptible",
        }
    }
}

impl fmt::Display for AutoCancelOnNewCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoCancelOnNewCommit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AutoCancelOnNewCommit::None),
            "conservative" => Ok(AutoCancelOnNewCommit::Conservative),
            "interruptible" => Ok(AutoCancelOnNewCommit::Interruptible),
            other => Err(Error::UnknownCancellationPolicy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_sources_exclude_children_and_dangling() {
        assert!(PipelineSource::Push.is_ci_source());
        assert!(PipelineSource::MergeRequestEvent.is_ci_source());
        assert!(PipelineSource::Pipeline.is_ci_source());
        assert!(!PipelineSource::ParentPipeline.is_ci_source());
        assert!(!PipelineSource::Webide.is_ci_source());
        assert!(PipelineSource::Webide.is_dangling());
        assert!(!PipelineSource::ParentPipeline.is_dangling());
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        let err = "aggressive".parse::<AutoCancelOnNewCommit>().unwrap_err();
        assert!(matches!(err, Error::UnknownCancellationPolicy(ref v) if v == "aggressive"));
    }
}
