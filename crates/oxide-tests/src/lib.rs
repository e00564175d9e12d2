//! Test infrastructure for Oxide CI pipeline admission.
//!
//! Scenario tests run against [`memory::InMemoryCi`]. Database tests start a
//! PostgreSQL testcontainer and are gated behind the `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use oxide_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::postgres_only().await.unwrap();
//!     let store = ctx.pipelines();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod memory;

pub use context::TestContext;
pub use fixtures::*;
pub use memory::InMemoryCi;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,oxide_admission=debug,oxide_db=debug,oxide_tests=debug")
        }))
        .with_test_writer()
        .try_init();
}
