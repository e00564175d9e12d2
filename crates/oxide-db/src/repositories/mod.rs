//! Repository implementations for PostgreSQL.

mod build;
mod cancellation;
mod pipeline;
mod project;
mod runner;

pub use build::PgBuildStore;
pub use cancellation::PgCancellationExecutor;
pub use pipeline::PgPipelineStore;
pub use project::PgProjectRepository;
pub use runner::{PgComputeQuota, PgRunnerCatalog};
