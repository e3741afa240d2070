//! Event broadcaster — fan-out of desk events to live observers.
//!
//! Each observer owns a bounded channel. `publish` never waits: an observer
//! whose channel is closed or full is dropped from the registry on the spot,
//! and everyone else still gets the event. There is no replay; a client that
//! reconnects re-reads state from the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::store::Message;
use crate::transport::TransportStatus;

/// Per-observer buffer before the observer is considered stalled.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 256;

/// What changed on a ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketChange {
    HumanMode { enabled: bool },
    Closed,
    Tag { tag: Option<String> },
}

/// Named events pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    /// Transport status changed.
    Wa { status: TransportStatus },
    /// A message was appended.
    #[serde(rename_all = "camelCase")]
    Message {
        conversation_id: String,
        message: Message,
    },
    /// Human mode, close state, or tag changed.
    #[serde(rename_all = "camelCase")]
    Ticket {
        conversation_id: String,
        change: TicketChange,
    },
    /// A queued send failed after the caller was told it was accepted.
    #[serde(rename_all = "camelCase")]
    DeliveryFailed {
        conversation_id: String,
        error: String,
    },
}

impl DeskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wa { .. } => "wa",
            Self::Message { .. } => "message",
            Self::Ticket { .. } => "ticket",
            Self::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

/// Opaque subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// Registry of live observer channels.
pub struct EventBroadcaster {
    observers: Mutex<HashMap<u64, mpsc::Sender<DeskEvent>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OBSERVER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<DeskEvent>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> (ObserverHandle, mpsc::Receiver<DeskEvent>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers().insert(id, tx);
        debug!(observer = id, "Observer subscribed");
        (ObserverHandle(id), rx)
    }

    /// Remove an observer. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: ObserverHandle) {
        if self.observers().remove(&handle.0).is_some() {
            debug!(observer = handle.0, "Observer unsubscribed");
        }
    }

    /// Push `event` to every current observer. Returns how many received it.
    pub fn publish(&self, event: DeskEvent) -> usize {
        let mut observers = self.observers();
        let mut delivered = 0;
        observers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(observer = *id, event = event.name(), "Observer stalled, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(observer = *id, "Observer gone, dropping");
                false
            }
        });
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
