//! # Ensemble Library
//!
//! This library exposes the application modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod save;

pub use error::{AppError, AppResult};

// Re-export ensemble_core for convenience
pub use ensemble_core;
