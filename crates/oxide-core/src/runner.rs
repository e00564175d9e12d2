//! Runner capability snapshots.

use crate::build::RequirementSignature;
use crate::ids::RunnerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerType {
    InstanceType,
    GroupType,
    ProjectType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerAccessLevel {
    #[default]
    NotProtected,
    /// Only picks up builds for protected refs.
    RefProtected,
}

/// Immutable capability descriptor shared by one or more runners with
/// identical configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerMatcher {
    pub runner_ids: Vec<RunnerId>,
    pub runner_type: RunnerType,
    pub run_untagged: bool,
    pub access_level: RunnerAccessLevel,
    pub tags: BTreeSet<String>,
    /// Compute-minute cost factor. Zero means the runner is free to use.
    #[serde(default)]
    pub cost_factor: f64,
}

impl RunnerMatcher {
    pub fn is_instance_type(&self) -> bool {
        self.runner_type == RunnerType::InstanceType
    }

    pub fn is_ref_protected(&self) -> bool {
        self.access_level == RunnerAccessLevel::RefProtected
    }

    pub fn is_free(&self) -> bool {
        self.cost_factor <= 0.0
    }

    /// Exact capability match against a build requirement.
    pub fn matches(&self, requirement: &RequirementSignature) -> bool {
        if self.is_ref_protected() && !requirement.protected {
            return false;
        }

        self.accepts_tags(requirement)
    }

    fn accepts_tags(&self, requirement: &RequirementSignature) -> bool {
        (self.run_untagged || requirement.has_tags()) && requirement.tags.is_subset(&self.tags)
    }
}

/// Active runners visible to a project, split by scope.
#[derive(Debug, Clone, Default)]
pub struct RunnerMatchers {
    /// Project and group runners.
    pub private: Vec<RunnerMatcher>,
    pub instance: Vec<RunnerMatcher>,
}

impl RunnerMatchers {
    pub fn partition(matchers: impl IntoIterator<Item = RunnerMatcher>) -> Self {
        let (instance, private) = matchers
            .into_iter()
            .partition(RunnerMatcher::is_instance_type);
        Self { private, instance }
    }

    pub fn is_empty(&self) -> bool {
        self.private.is_empty() && self.instance.is_empty()
    }
}
