//! Grouping of builds by runner requirement.

use oxide_core::build::{Build, RequirementSignature};
use oxide_core::ids::BuildId;
use oxide_core::status::CiStatus;
use std::collections::BTreeMap;

/// Builds sharing one requirement signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementGroup {
    pub signature: RequirementSignature,
    pub build_ids: Vec<BuildId>,
}

/// Groups not-yet-run builds so eligibility is computed once per signature.
pub struct BuildRequirementGrouper;

impl BuildRequirementGrouper {
    pub fn new() -> Self {
        Self
    }

    /// Groups in signature order; build ids ascending within a group.
    pub fn group(&self, builds: &[Build]) -> Vec<RequirementGroup> {
        let mut groups: BTreeMap<&RequirementSignature, Vec<BuildId>> = BTreeMap::new();

        for build in builds.iter().filter(|b| b.status == CiStatus::Created) {
            groups.entry(&build.requirement).or_default().push(build.id);
        }

        groups
            .into_iter()
            .map(|(signature, mut build_ids)| {
                build_ids.sort();
                RequirementGroup {
                    signature: signature.clone(),
                    build_ids,
                }
            })
            .collect()
    }
}

impl Default for BuildRequirementGrouper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::ids::{PipelineId, ProjectId};

    fn build(id: i64, tags: &[&str], status: CiStatus) -> Build {
        Build {
            id: BuildId::new(id),
            pipeline_id: PipelineId::new(1),
            project_id: ProjectId::new(1),
            name: format!("job-{id}"),
            status,
            interruptible: None,
            requirement: RequirementSignature::new(tags.iter().copied(), false),
            failure_reason: None,
        }
    }

    #[test]
    fn test_groups_identical_signatures() {
        let builds = vec![
            build(3, &["gpu"], CiStatus::Created),
            build(1, &[], CiStatus::Created),
            build(2, &["gpu"], CiStatus::Created),
            build(4, &["gpu", "linux"], CiStatus::Created),
        ];

        let groups = BuildRequirementGrouper::new().group(&builds);

        assert_eq!(groups.len(), 3);
        let gpu = groups
            .iter()
            .find(|g| g.signature == RequirementSignature::new(["gpu"], false))
            .unwrap();
        assert_eq!(gpu.build_ids, vec![BuildId::new(2), BuildId::new(3)]);
    }

    #[test]
    fn test_started_builds_are_not_grouped() {
        let builds = vec![
            build(1, &["gpu"], CiStatus::Failed),
            build(2, &["gpu"], CiStatus::Running),
            build(3, &[], CiStatus::Created),
        ];

        let groups = BuildRequirementGrouper::new().group(&builds);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].build_ids, vec![BuildId::new(3)]);
    }
}
