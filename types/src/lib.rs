//! Core domain types for Pacer.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Invalid throttle windows and queue limits are rejected at construction, so the
//! runtime crates only ever see values they can act on.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
mod queue;
mod throttle;

pub use ids::TaskId;
pub use queue::{Concurrency, QueueOptions, QueueStats};
pub use throttle::{EdgePolicy, ThrottleOptions, WaitWindow};

use thiserror::Error;

/// Error when trying to construct invalid options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("throttle wait window must be greater than zero")]
    ZeroWait,
    #[error("queue concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("task timeout must be greater than zero")]
    ZeroTimeout,
}

/// Returned when a runtime-backed utility is constructed outside a tokio runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{component} must be created from within a tokio runtime")]
pub struct RuntimeError {
    pub component: &'static str,
}
