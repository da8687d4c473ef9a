//! Mosaic Core
//!
//! Core domain types, traits, and error handling for the Mosaic build
//! orchestrator. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates: the work graph a build executes,
//! the task boundary it dispatches across, and the progress events it emits.

pub mod build;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod ports;
pub mod task;

pub use error::{Error, GraphError, Result};
pub use ids::*;
