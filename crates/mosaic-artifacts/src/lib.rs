//! Artifact side effects for Mosaic builds.
//!
//! Generated files are persisted under a local root for audit
//! ([`FilesystemStore`]) and delivered to the running development
//! environment through the dev-flow manager ([`DevFlowClient`]).

pub mod devflow;
pub mod path;
pub mod store;

pub use devflow::{DevFlowClient, Environment, UploadReceipt};
pub use path::normalize_relative;
pub use store::FilesystemStore;
