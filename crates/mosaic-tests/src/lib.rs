//! Test infrastructure for Mosaic.
//!
//! Fixtures for common work graph shapes, scripted collaborators that record
//! what the engine did to them, and a NATS testcontainer for the relay.
//!
//! # Usage
//!
//! ```ignore
//! use mosaic_tests::{GraphFixture, Harness, ScriptedExecutor};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = Harness::new(Arc::new(ScriptedExecutor::new()), SchedulingPolicy::Wave);
//!     let outcome = harness.run(GraphFixture::fan_in(), "bld_1").await.unwrap();
//!     assert!(outcome.success);
//! }
//! ```

pub mod containers;
pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,mosaic_tests=debug,mosaic_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
