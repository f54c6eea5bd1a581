//! Error types at the scheduler's edges.
//!
//! Validation and lifecycle problems come back synchronously as
//! [`SchedulerError`]; failures inside user commands travel out-of-band as
//! [`CommandError`] values on the scheduler's error stream.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Synchronous rejections from the scheduler surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("a task named '{0}' already exists")]
    DuplicateName(String),

    #[error("no task named '{0}'")]
    UnknownName(String),

    #[error("max_wait {max_wait:?} is smaller than min_wait {min_wait:?}")]
    InvalidWindow {
        min_wait: Duration,
        max_wait: Duration,
    },
}

/// A command failure reported on the error stream.
#[derive(Debug, Error)]
#[error("command '{task}' failed: {error}")]
pub struct CommandError {
    /// Name of the task whose command failed.
    pub task: Arc<str>,
    /// The error the command returned.
    pub error: anyhow::Error,
}
