//! Lifecycle status shared by pipelines and builds.

use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Created,
    WaitingForResource,
    Preparing,
    WaitingForCallback,
    Pending,
    Running,
    Scheduled,
    Manual,
    Success,
    Failed,
    Canceling,
    Canceled,
    Skipped,
}

impl CiStatus {
    /// Statuses from which a pipeline or build can still be canceled.
    pub const CANCELABLE: [CiStatus; 7] = [
        CiStatus::Created,
        CiStatus::WaitingForResource,
        CiStatus::Preparing,
        CiStatus::WaitingForCallback,
        CiStatus::Pending,
        CiStatus::Running,
        CiStatus::Scheduled,
    ];

    /// Statuses of builds that have started (or finished) doing work.
    pub const STARTED: [CiStatus; 3] = [CiStatus::Running, CiStatus::Success, CiStatus::Failed];

    pub fn is_cancelable(&self) -> bool {
        Self::CANCELABLE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CiStatus::Success | CiStatus::Failed | CiStatus::Canceled | CiStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Created => "created",
            CiStatus::WaitingForResource => "waiting_for_resource",
            CiStatus::Preparing => "preparing",
            CiStatus::WaitingForCallback => "waiting_for_callback",
            CiStatus::Pending => "pending",
            CiStatus::Running => "running",
            CiStatus::Scheduled => "scheduled",
            CiStatus::Manual => "manual",
            CiStatus::Success => "success",
            CiStatus::Failed => "failed",
            CiStatus::Canceling => "canceling",
            CiStatus::Canceled => "canceled",
            CiStatus::Skipped => "skipped",
        }
    }

    /// String form of a set of statuses, for binding into `= ANY($n)` queries.
    pub fn names(statuses: &[CiStatus]) -> Vec<&'static str> {
        statuses.iter().map(CiStatus::as_str).collect()
    }
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CiStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => CiStatus::Created,
            "waiting_for_resource" => CiStatus::WaitingForResource,
            "preparing" => CiStatus::Preparing,
            "waiting_for_callback" => CiStatus::WaitingForCallback,
            "pending" => CiStatus::Pending,
            "running" => CiStatus::Running,
            "scheduled" => CiStatus::Scheduled,
            "manual" => CiStatus::Manual,
            "success" => CiStatus::Success,
            "failed" => CiStatus::Failed,
            "canceling" => CiStatus::Canceling,
            "canceled" => CiStatus::Canceled,
            "skipped" => CiStatus::Skipped,
            other => return Err(Error::UnknownStatus(other.to_string())),
        })
    }
}
