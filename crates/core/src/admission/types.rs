//! Types for the admission module.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

/// Unique identifier of a ticket within one queue.
///
/// Identifiers are allocated from a monotonic counter and never reused, so
/// comparing two ids also compares arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TicketId(pub(crate) u64);

impl TicketId {
    /// Returns the raw arrival sequence of this ticket.
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

/// Admission state of a ticket as seen by its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Still queued behind the active window.
    Waiting,
    /// Entered the active window.
    Admitted,
    /// Removed before it was ever admitted.
    Rejected,
}

/// Handle returned by [`AdmissionQueue::enqueue`](super::AdmissionQueue::enqueue).
///
/// The handle carries its own view of the admission outcome, so the outcome
/// stays readable after the ticket has left the queue.
#[derive(Debug, Clone)]
pub struct Ticket {
    id: TicketId,
    key: Option<String>,
    status: watch::Receiver<Admission>,
}

impl Ticket {
    pub(crate) fn new(id: TicketId, key: Option<String>, status: watch::Receiver<Admission>) -> Self {
        Self { id, key, status }
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    /// External correlation key given at enqueue time.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Current admission state without waiting.
    pub fn admission(&self) -> Admission {
        *self.status.borrow()
    }

    /// Waits until the ticket is either admitted or rejected.
    ///
    /// Returns `true` when admitted. Once resolved the outcome is memoized and
    /// later calls return immediately.
    pub async fn admitted(&self) -> bool {
        let mut status = self.status.clone();
        let resolved = match status.wait_for(|s| *s != Admission::Waiting).await {
            Ok(state) => Some(*state == Admission::Admitted),
            // The queue was dropped while this ticket was still waiting.
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| *status.borrow() == Admission::Admitted)
    }
}

/// Point-in-time view of an admission queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    /// Configured size of the active window.
    pub window: usize,
    /// Tickets currently inside the window.
    pub active: usize,
    /// Tickets queued behind the window.
    pub waiting: usize,
    /// Ids in arrival order.
    pub order: Vec<TicketId>,
}

/// Errors raised by the admission queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The active window must admit at least one ticket.
    #[error("admission window must be at least 1, got {0}")]
    InvalidWindow(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_id_display() {
        assert_eq!(TicketId(7).to_string(), "ticket-7");
        assert_eq!(TicketId(7).sequence(), 7);
    }

    #[test]
    fn test_ticket_id_orders_by_arrival() {
        assert!(TicketId(1) < TicketId(2));
    }

    #[tokio::test]
    async fn test_admitted_after_sender_dropped() {
        let (tx, rx) = watch::channel(Admission::Waiting);
        let ticket = Ticket::new(TicketId(0), None, rx);
        drop(tx);
        assert!(!ticket.admitted().await);
    }

    #[tokio::test]
    async fn test_admitted_is_memoized() {
        let (tx, rx) = watch::channel(Admission::Waiting);
        let ticket = Ticket::new(TicketId(0), Some("session".to_string()), rx);
        tx.send_replace(Admission::Admitted);
        drop(tx);
        assert!(ticket.admitted().await);
        assert!(ticket.admitted().await);
        assert_eq!(ticket.key(), Some("session"));
    }

    #[test]
    fn test_admitted_pending_until_resolved() {
        let (tx, rx) = watch::channel(Admission::Waiting);
        let ticket = Ticket::new(TicketId(3), None, rx);

        let mut admitted = tokio_test::task::spawn(ticket.admitted());
        tokio_test::assert_pending!(admitted.poll());

        tx.send_replace(Admission::Rejected);
        assert!(admitted.is_woken());
        assert!(!tokio_test::assert_ready!(admitted.poll()));
    }
}
