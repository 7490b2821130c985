//! Work queues for sub-item processing.
//!
//! This module provides two runners:
//! - [`SerialWorkQueue`]: one item at a time, FIFO, with cooperative early stop
//! - [`OrderedParallelQueue`]: up to `limit` items at a time, results delivered
//!   in submission order through a reorder buffer
//!
//! Both are explicitly constructed and owned by their caller; there is no
//! process-wide pool.
//!
//! # Example
//!
//! ```ignore
//! use intake_core::work::{ordered_map, OrderedParallelQueue};
//!
//! // OCR every embedded image, keeping document order.
//! let texts = ordered_map(images, 4, |image| async move { ocr(image).await }).await?;
//! ```

mod ordered;
mod serial;
mod types;

pub use ordered::{ordered_map, OrderedParallelQueue};
pub use serial::SerialWorkQueue;
pub use types::{OrderedStatus, QueueError, SerialStatus, TaskFailure, TaskResult};
