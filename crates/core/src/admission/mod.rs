//! Ticket-based admission control.
//!
//! An [`AdmissionQueue`] hands out tickets in arrival order and lets the
//! first `window` of them proceed. Everybody else waits on their ticket
//! until an earlier ticket is dequeued.
//!
//! # Example
//!
//! ```ignore
//! use intake_core::admission::AdmissionQueue;
//!
//! let queue = AdmissionQueue::new(2)?;
//! let ticket = queue.enqueue(Some(session_id));
//! if queue.wait(&ticket).await {
//!     // do the work
//! }
//! queue.dequeue(ticket.id());
//! ```

mod queue;
mod types;

pub use queue::AdmissionQueue;
pub use types::{Admission, AdmissionError, AdmissionSnapshot, Ticket, TicketId};
