//! Pipeline admission control for Oxide CI.
//!
//! Two policies run when a pipeline is created:
//!
//! - [`RedundantPipelineCanceller`] cancels older pipelines on the same ref
//!   that a newer commit made redundant.
//! - [`RunnerAvailabilityGate`] drops builds that no active runner can pick up,
//!   before the pipeline is first processed.

pub mod canceller;
pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod grouper;
pub mod orchestrator;
pub mod selector;
pub mod skip;
mod telemetry;

pub use canceller::RedundantPipelineCanceller;
pub use config::{AdmissionConfig, StaticFeatureToggles};
pub use dispatcher::{CancellationOutcome, CancellationPolicyDispatcher};
pub use gate::{GateOutcome, GroupDrop, RunnerAvailabilityGate};
pub use grouper::{BuildRequirementGrouper, RequirementGroup};
pub use orchestrator::AdmissionOrchestrator;
pub use selector::{CandidateBatch, Candidates, RedundancyCandidateSelector, SkipTally};
pub use skip::{SkipPolicy, SkipReason};
