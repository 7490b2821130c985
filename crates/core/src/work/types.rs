//! Shared types for the work queues.

use serde::Serialize;
use std::any::Any;
use thiserror::Error;

/// Why an ordered task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure<E> {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(E),

    /// The handler panicked; carries the panic message.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl<E> TaskFailure<E> {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Result delivered to an ordered sink for one submitted item.
pub type TaskResult<R, E> = Result<R, TaskFailure<E>>;

/// Errors raised when constructing a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A capacity or concurrency limit was zero.
    #[error("{name} must be at least 1, got {value}")]
    InvalidLimit { name: &'static str, value: usize },
}

impl QueueError {
    pub(crate) fn check(name: &'static str, value: usize) -> Result<usize, Self> {
        if value == 0 {
            Err(Self::InvalidLimit { name, value })
        } else {
            Ok(value)
        }
    }
}

/// Counters describing a serial work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialStatus {
    pub pending: usize,
    pub busy: bool,
    pub closed: bool,
    pub processed: u64,
    pub discarded: u64,
}

/// Counters describing an ordered parallel queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderedStatus {
    pub limit: usize,
    /// Items launched but not yet emitted.
    pub in_flight: usize,
    /// Items accepted but not yet launched.
    pub queued: usize,
    /// Completed results parked in the reorder buffer.
    pub buffered: usize,
    pub emitted: u64,
    pub closed: bool,
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Ok(message) = payload.downcast::<String>() {
        *message
    } else {
        "unknown panic".to_string()
    }
}
