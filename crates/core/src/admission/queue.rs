//! FIFO admission queue with a fixed active window.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::metrics;

use super::types::{Admission, AdmissionError, AdmissionSnapshot, Ticket, TicketId};

/// A queued ticket together with the sender side of its admission state.
struct Entry {
    id: TicketId,
    key: Option<String>,
    status: watch::Sender<Admission>,
}

struct AdmissionState {
    next_id: u64,
    entries: VecDeque<Entry>,
}

/// Admits the `window` earliest-arrived tickets and parks everyone else.
///
/// Activeness is a pure function of position: after every mutation the first
/// `min(window, len)` entries are promoted, and promotion of an entry that is
/// already admitted is a no-op.
pub struct AdmissionQueue {
    window: usize,
    state: Mutex<AdmissionState>,
}

impl AdmissionQueue {
    /// Creates a queue admitting at most `window` tickets at once.
    pub fn new(window: usize) -> Result<Self, AdmissionError> {
        if window == 0 {
            return Err(AdmissionError::InvalidWindow(window));
        }
        Ok(Self {
            window,
            state: Mutex::new(AdmissionState {
                next_id: 0,
                entries: VecDeque::new(),
            }),
        })
    }

    /// Size of the active window.
    pub fn window(&self) -> usize {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a new ticket at the tail of the queue.
    ///
    /// Never blocks. The ticket is admitted immediately if the window has room.
    pub fn enqueue(&self, key: Option<String>) -> Ticket {
        let mut state = self.lock();
        let id = TicketId(state.next_id);
        state.next_id += 1;

        let (tx, rx) = watch::channel(Admission::Waiting);
        state.entries.push_back(Entry {
            id,
            key: key.clone(),
            status: tx,
        });
        debug!(ticket = %id, position = state.entries.len() - 1, "Ticket enqueued");

        self.promote(&state);
        Ticket::new(id, key, rx)
    }

    /// Removes a ticket from any position.
    ///
    /// A holder still waiting on the ticket is released with a "not admitted"
    /// outcome. Returns whether the ticket was found.
    pub fn dequeue(&self, id: TicketId) -> bool {
        let mut state = self.lock();
        let Some(index) = state.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        if let Some(entry) = state.entries.remove(index) {
            Self::retire(&entry);
        }
        self.promote(&state);
        true
    }

    /// Removes the first ticket carrying the given correlation key.
    pub fn dequeue_key(&self, key: &str) -> Option<TicketId> {
        let id = self.find(key)?;
        self.dequeue(id).then_some(id)
    }

    /// Waits until the ticket is admitted (`true`) or dequeued first (`false`).
    pub async fn wait(&self, ticket: &Ticket) -> bool {
        ticket.admitted().await
    }

    /// Whether the ticket is currently inside the active window.
    pub fn is_active(&self, id: TicketId) -> bool {
        self.position(id).is_some_and(|p| p < self.window)
    }

    /// Zero-based position of the ticket in arrival order, `None` if absent.
    pub fn position(&self, id: TicketId) -> Option<usize> {
        self.lock().entries.iter().position(|e| e.id == id)
    }

    /// One-based place in line behind the active window.
    ///
    /// `None` when the ticket is absent or already inside the window.
    pub fn waiting_position(&self, id: TicketId) -> Option<usize> {
        self.position(id)
            .and_then(|p| p.checked_sub(self.window))
            .map(|behind| behind + 1)
    }

    /// Finds the earliest ticket enqueued with the given correlation key.
    pub fn find(&self, key: &str) -> Option<TicketId> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.key.as_deref() == Some(key))
            .map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns the current ordering and window occupancy.
    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.lock();
        let len = state.entries.len();
        let active = len.min(self.window);
        AdmissionSnapshot {
            window: self.window,
            active,
            waiting: len - active,
            order: state.entries.iter().map(|e| e.id).collect(),
        }
    }

    /// Admits every not-yet-admitted ticket inside the window.
    fn promote(&self, state: &AdmissionState) {
        for entry in state.entries.iter().take(self.window) {
            let promoted = entry.status.send_if_modified(|s| {
                if *s == Admission::Waiting {
                    *s = Admission::Admitted;
                    true
                } else {
                    false
                }
            });
            if promoted {
                debug!(ticket = %entry.id, "Ticket admitted");
                metrics::TICKETS_RESOLVED
                    .with_label_values(&["admitted"])
                    .inc();
            }
        }
    }

    /// Settles a removed entry; only a still-waiting holder observes a change.
    fn retire(entry: &Entry) {
        let rejected = entry.status.send_if_modified(|s| {
            if *s == Admission::Waiting {
                *s = Admission::Rejected;
                true
            } else {
                false
            }
        });
        if rejected {
            debug!(ticket = %entry.id, "Ticket removed before admission");
            metrics::TICKETS_RESOLVED
                .with_label_values(&["rejected"])
                .inc();
        } else {
            debug!(ticket = %entry.id, "Ticket released");
        }
    }
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("window", &self.window)
            .field("len", &self.len())
            .finish()
    }
}
