//! Tracing and OpenTelemetry integration for Mosaic.
//!
//! Installs the process-wide subscriber (env-filtered fmt output, optional
//! OTLP export) and provides span helpers for builds, waves and nodes.

pub mod spans;
pub mod tracer;

pub use spans::{BuildAttributes, build_span, node_span, task_attempt_span, wave_span};
pub use tracer::{OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
