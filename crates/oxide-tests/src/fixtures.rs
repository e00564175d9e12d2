//! Test fixtures for creating sample data.
//!
//! Fixture timestamps are derived from ids, so a higher id is always a
//! younger pipeline unless a test says otherwise.

use chrono::{DateTime, Duration, TimeZone, Utc};
use oxide_core::build::{Build, RequirementSignature};
use oxide_core::ids::{BuildId, PipelineId, ProjectId, RunnerId};
use oxide_core::pipeline::{AutoCancelOnNewCommit, Pipeline, PipelineSource};
use oxide_core::runner::{RunnerAccessLevel, RunnerMatcher, RunnerType};
use oxide_core::status::CiStatus;

/// Project used by fixtures unless overridden.
pub const PROJECT: ProjectId = ProjectId::new(1);

/// Ref used by fixtures unless overridden.
pub const DEFAULT_REF: &str = "main";

/// Fixed reference clock for fixtures.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Factory for creating test pipelines.
#[derive(Debug, Clone)]
pub struct PipelineFixture {
    pipeline: Pipeline,
}

impl PipelineFixture {
    /// A running push pipeline on `main`, created `id` minutes after [`base_time`].
    pub fn new(id: i64) -> Self {
        Self {
            pipeline: Pipeline {
                id: PipelineId::new(id),
                project_id: PROJECT,
                git_ref: DEFAULT_REF.to_string(),
                sha: format!("sha-{id}"),
                source: PipelineSource::Push,
                status: CiStatus::Running,
                auto_cancel_on_new_commit: AutoCancelOnNewCommit::Conservative,
                parent_pipeline_id: None,
                created_at: base_time() + Duration::minutes(id),
            },
        }
    }

    /// A freshly created pipeline, as seen by admission.
    pub fn trigger(id: i64) -> Self {
        Self::new(id).status(CiStatus::Created)
    }

    pub fn project(mut self, project_id: ProjectId) -> Self {
        self.pipeline.project_id = project_id;
        self
    }

    pub fn on_ref(mut self, git_ref: &str) -> Self {
        self.pipeline.git_ref = git_ref.to_string();
        self
    }

    pub fn sha(mut self, sha: &str) -> Self {
        self.pipeline.sha = sha.to_string();
        self
    }

    pub fn source(mut self, source: PipelineSource) -> Self {
        self.pipeline.source = source;
        self
    }

    pub fn status(mut self, status: CiStatus) -> Self {
        self.pipeline.status = status;
        self
    }

    pub fn policy(mut self, policy: AutoCancelOnNewCommit) -> Self {
        self.pipeline.auto_cancel_on_new_commit = policy;
        self
    }

    /// Make this a child pipeline triggered by `parent`.
    pub fn child_of(mut self, parent: i64) -> Self {
        self.pipeline.source = PipelineSource::ParentPipeline;
        self.pipeline.parent_pipeline_id = Some(PipelineId::new(parent));
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.pipeline.created_at = created_at;
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

/// Factory for creating test builds.
#[derive(Debug, Clone)]
pub struct BuildFixture {
    build: Build,
    tags: Vec<String>,
    protected: bool,
}

impl BuildFixture {
    /// An untagged, not yet scheduled build.
    pub fn new(id: i64, pipeline_id: i64) -> Self {
        Self {
            build: Build {
                id: BuildId::new(id),
                pipeline_id: PipelineId::new(pipeline_id),
                project_id: PROJECT,
                name: format!("job-{id}"),
                status: CiStatus::Created,
                interruptible: None,
                requirement: RequirementSignature::untagged(),
                failure_reason: None,
            },
            tags: vec![],
            protected: false,
        }
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn status(mut self, status: CiStatus) -> Self {
        self.build.status = status;
        self
    }

    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.build.interruptible = Some(interruptible);
        self
    }

    pub fn project(mut self, project_id: ProjectId) -> Self {
        self.build.project_id = project_id;
        self
    }

    pub fn build(mut self) -> Build {
        self.build.requirement = RequirementSignature::new(self.tags, self.protected);
        self.build
    }
}

/// Factory for creating runner matchers.
#[derive(Debug, Clone)]
pub struct RunnerFixture {
    matcher: RunnerMatcher,
}

impl RunnerFixture {
    fn new(id: i64, runner_type: RunnerType) -> Self {
        Self {
            matcher: RunnerMatcher {
                runner_ids: vec![RunnerId::new(id)],
                runner_type,
                run_untagged: true,
                access_level: RunnerAccessLevel::NotProtected,
                tags: Default::default(),
                cost_factor: 0.0,
            },
        }
    }

    /// A free shared runner that also takes untagged jobs.
    pub fn instance(id: i64) -> Self {
        Self::new(id, RunnerType::InstanceType)
    }

    pub fn group(id: i64) -> Self {
        Self::new(id, RunnerType::GroupType)
    }

    pub fn project(id: i64) -> Self {
        Self::new(id, RunnerType::ProjectType)
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.matcher.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Only accept jobs that have tags.
    pub fn tagged_only(mut self) -> Self {
        self.matcher.run_untagged = false;
        self
    }

    pub fn ref_protected(mut self) -> Self {
        self.matcher.access_level = RunnerAccessLevel::RefProtected;
        self
    }

    pub fn cost_factor(mut self, cost_factor: f64) -> Self {
        self.matcher.cost_factor = cost_factor;
        self
    }

    pub fn build(self) -> RunnerMatcher {
        self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_ids_are_younger() {
        let older = PipelineFixture::new(1).build();
        let younger = PipelineFixture::new(2).build();
        assert!(older.created_at < younger.created_at);
    }

    #[test]
    fn test_build_fixture_applies_signature() {
        let build = BuildFixture::new(1, 1).tags(&["gpu", "linux"]).protected().build();
        assert_eq!(
            build.requirement,
            RequirementSignature::new(["gpu", "linux"], true)
        );
    }
}
