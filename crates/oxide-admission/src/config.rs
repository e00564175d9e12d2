//! Admission configuration.

use async_trait::async_trait;
use oxide_core::ids::ProjectId;
use oxide_core::ports::{FeatureFlag, FeatureToggles};
use oxide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Admission configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Redundant pipeline cancellation.
    #[serde(default)]
    pub cancellation: CancellationConfig,
    /// Parent-child chain traversal.
    #[serde(default)]
    pub ancestry: AncestryConfig,
    /// Feature flags by name.
    #[serde(default)]
    pub feature_flags: HashMap<String, FlagSetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationConfig {
    /// Primary keys fetched per query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Most recent cancelable pipelines considered per run.
    #[serde(default = "default_max_cancellations")]
    pub max_cancellations: usize,
    /// Pipelines created longer ago than this are left alone.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_cancellations() -> usize {
    3000
}

fn default_lookback_days() -> u32 {
    7
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_cancellations: default_max_cancellations(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl CancellationConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lookback_days))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncestryConfig {
    /// Deepest parent-child chain walked before the chain is treated as corrupt.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    1000
}

impl Default for AncestryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// State of one feature flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagSetting {
    /// Enabled for every project.
    #[serde(default)]
    pub enabled: bool,
    /// Enabled for these projects only.
    #[serde(default)]
    pub projects: Vec<ProjectId>,
}

impl AdmissionConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cancellation.batch_size == 0 {
            return Err(Error::Config("cancellation.batch_size must be positive".into()));
        }
        if self.ancestry.max_depth == 0 {
            return Err(Error::Config("ancestry.max_depth must be positive".into()));
        }
        Ok(())
    }

    /// Set the primary-key batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.cancellation.batch_size = batch_size;
        self
    }

    /// Set the per-run candidate ceiling.
    pub fn with_max_cancellations(mut self, max: usize) -> Self {
        self.cancellation.max_cancellations = max;
        self
    }

    /// Set the lookback window in days.
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.cancellation.lookback_days = days;
        self
    }

    /// Turn a flag on or off for every project.
    pub fn with_flag(mut self, flag: FeatureFlag, enabled: bool) -> Self {
        self.feature_flags.entry(flag.name().to_string()).or_default().enabled = enabled;
        self
    }

    /// Turn a flag on for one project.
    pub fn with_project_flag(mut self, flag: FeatureFlag, project_id: ProjectId) -> Self {
        self.feature_flags
            .entry(flag.name().to_string())
            .or_default()
            .projects
            .push(project_id);
        self
    }

    /// Feature toggles backed by this configuration.
    pub fn feature_toggles(&self) -> StaticFeatureToggles {
        StaticFeatureToggles::new(self.feature_flags.clone())
    }
}

/// In-process feature toggles.
///
/// Unconfigured flags fall back to [`FeatureFlag::default_enabled`].
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureToggles {
    flags: HashMap<String, FlagSetting>,
}

impl StaticFeatureToggles {
    pub fn new(flags: HashMap<String, FlagSetting>) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl FeatureToggles for StaticFeatureToggles {
    async fn is_enabled(&self, flag: FeatureFlag, project_id: ProjectId) -> Result<bool> {
        Ok(match self.flags.get(flag.name()) {
            Some(setting) => setting.enabled || setting.projects.contains(&project_id),
            None => flag.default_enabled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdmissionConfig::default();
        assert_eq!(config.cancellation.batch_size, 1000);
        assert_eq!(config.cancellation.max_cancellations, 3000);
        assert_eq!(config.cancellation.lookback(), chrono::Duration::days(7));
        assert_eq!(config.ancestry.max_depth, 1000);
    }

    #[test]
    fn test_from_yaml_fills_defaults() {
        let config = AdmissionConfig::from_yaml(
            r#"
cancellation:
  batch_size: 250
feature_flags:
  disable_cancel_redundant_pipelines:
    projects: [42]
"#,
        )
        .unwrap();

        assert_eq!(config.cancellation.batch_size, 250);
        assert_eq!(config.cancellation.max_cancellations, 3000);
        assert_eq!(config.cancellation.lookback_days, 7);
        assert_eq!(
            config.feature_flags["disable_cancel_redundant_pipelines"].projects,
            vec![ProjectId::new(42)]
        );
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let err = AdmissionConfig::from_yaml("cancellation:\n  batch_size: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_static_toggles() {
        let toggles = AdmissionConfig::default()
            .with_project_flag(FeatureFlag::DisableCancelRedundantPipelines, ProjectId::new(1))
            .feature_toggles();

        let flag = FeatureFlag::DisableCancelRedundantPipelines;
        assert!(toggles.is_enabled(flag, ProjectId::new(1)).await.unwrap());
        assert!(!toggles.is_enabled(flag, ProjectId::new(2)).await.unwrap());

        // Unconfigured flags use their default.
        let gate = FeatureFlag::DropNotRunnableBuilds;
        assert!(toggles.is_enabled(gate, ProjectId::new(2)).await.unwrap());

        let toggles = AdmissionConfig::default().with_flag(gate, false).feature_toggles();
        assert!(!toggles.is_enabled(gate, ProjectId::new(2)).await.unwrap());
    }
}
