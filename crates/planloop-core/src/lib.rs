//! # Planloop Core
//!
//! Shared foundation for the Planloop workspace: the unified error type
//! and the host configuration system. Kept dependency-light so every
//! other crate can sit on top of it.

pub mod config;
pub mod error;

pub use config::{PlanloopConfig, WorkerConfig};
pub use error::{PlanError, Result};
