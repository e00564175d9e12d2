//! PostgreSQL implementations of RunnerCatalog and ComputeQuota.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oxide_core::ids::{ProjectId, RunnerId};
use oxide_core::ports::{ComputeQuota, RunnerCatalog};
use oxide_core::runner::{RunnerAccessLevel, RunnerMatcher, RunnerMatchers, RunnerType};
use oxide_core::{Error, Result};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};

/// Runners that have not contacted the server within this window are
/// considered offline.
const DEFAULT_CONTACT_TIMEOUT_HOURS: i64 = 2;

/// Runner catalog backed by the `runners` table.
///
/// Runners with identical configuration are folded into one matcher.
#[derive(Clone)]
pub struct PgRunnerCatalog {
    pool: PgPool,
    contact_timeout: Duration,
}

/// Runners sharing this key accept exactly the same builds.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct MatcherKey {
    runner_type: String,
    run_untagged: bool,
    access_level: String,
    tags: BTreeSet<String>,
    cost_factor_bits: u64,
}

impl PgRunnerCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            contact_timeout: Duration::hours(DEFAULT_CONTACT_TIMEOUT_HOURS),
        }
    }

    pub fn with_contact_timeout(mut self, timeout: Duration) -> Self {
        self.contact_timeout = timeout;
        self
    }

    fn str_to_runner_type(s: &str) -> Result<RunnerType> {
        match s {
            "instance_type" => Ok(RunnerType::InstanceType),
            "group_type" => Ok(RunnerType::GroupType),
            "project_type" => Ok(RunnerType::ProjectType),
            other => Err(Error::RunnerCatalog(format!("unknown runner type: {other}"))),
        }
    }

    fn str_to_access_level(s: &str) -> RunnerAccessLevel {
        match s {
            "ref_protected" => RunnerAccessLevel::RefProtected,
            _ => RunnerAccessLevel::NotProtected,
        }
    }
}

#[async_trait]
impl RunnerCatalog for PgRunnerCatalog {
    async fn active_matchers(&self, project_id: ProjectId) -> Result<RunnerMatchers> {
        let online_since = Utc::now() - self.contact_timeout;

        let rows = sqlx::query(
            "SELECT r.id, r.runner_type, r.run_untagged, r.access_level, r.tags, r.cost_factor \
             FROM runners r \
             WHERE r.active AND r.contacted_at >= $2 \
               AND (r.runner_type = 'instance_type' \
                    OR EXISTS (SELECT 1 FROM project_runners pr \
                               WHERE pr.runner_id = r.id AND pr.project_id = $1)) \
             ORDER BY r.id",
        )
        .bind(project_id.value())
        .bind(online_since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::RunnerCatalog(e.to_string()))?;

        let mut grouped: BTreeMap<MatcherKey, Vec<RunnerId>> = BTreeMap::new();
        for r in &rows {
            let tags: Vec<String> = r.get("tags");
            let cost_factor: f64 = r.get("cost_factor");
            let key = MatcherKey {
                runner_type: r.get("runner_type"),
                run_untagged: r.get("run_untagged"),
                access_level: r.get("access_level"),
                tags: tags.into_iter().collect(),
                cost_factor_bits: cost_factor.to_bits(),
            };
            grouped
                .entry(key)
                .or_default()
                .push(RunnerId::new(r.get("id")));
        }

        let matchers = grouped
            .into_iter()
            .map(|(key, runner_ids)| {
                Ok(RunnerMatcher {
                    runner_ids,
                    runner_type: Self::str_to_runner_type(&key.runner_type)?,
                    run_untagged: key.run_untagged,
                    access_level: Self::str_to_access_level(&key.access_level),
                    tags: key.tags,
                    cost_factor: f64::from_bits(key.cost_factor_bits),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RunnerMatchers::partition(matchers))
    }
}

/// Compute-minute quota of the project's namespace.
#[derive(Clone)]
pub struct PgComputeQuota {
    pool: PgPool,
}

impl PgComputeQuota {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComputeQuota for PgComputeQuota {
    async fn minutes_exhausted(&self, project_id: ProjectId) -> Result<bool> {
        let exhausted: Option<bool> = sqlx::query_scalar(
            "SELECT q.minutes_limit IS NOT NULL AND q.minutes_used >= q.minutes_limit \
             FROM projects p JOIN namespace_quotas q ON q.namespace_id = p.namespace_id \
             WHERE p.id = $1",
        )
        .bind(project_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        // No quota row means no limit.
        Ok(exhausted.unwrap_or(false))
    }
}
