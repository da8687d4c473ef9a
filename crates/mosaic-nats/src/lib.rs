//! NATS JetStream relay for Mosaic progress events.
//!
//! Events are published on `build.<build id>.progress` into a single
//! JetStream stream, so an observer that connects after a build started can
//! still replay it from the beginning.

mod bus;
pub mod config;
pub mod health;
pub mod metrics;

pub use bus::{NatsEventBus, StreamInfo};
pub use config::NatsConfig;
pub use health::{HealthCheck, HealthStatus};
pub use metrics::{MetricsSnapshot, NatsMetrics};
