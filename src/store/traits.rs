//! The `ConversationStore` trait, the single source of truth for conversation state.
//!
//! Every mutator is one serialized read-modify-write against the backing
//! storage. Accessors never hold the serialization lock across an external
//! send, so callers may freely interleave store calls with transport I/O.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    Contact, ContactUpdate, Message, NewMessage, Ticket, TicketUpdate, TriageState,
};

/// Backend-agnostic conversation store.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ── Tickets ─────────────────────────────────────────────────────

    /// Create the ticket on first call (open, unread 0), otherwise bump
    /// `updated_at` and optionally the display name.
    async fn upsert_ticket(&self, id: &str, update: TicketUpdate) -> Result<Ticket, DatabaseError>;

    /// Get a single ticket.
    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, DatabaseError>;

    /// List tickets, most recently active first. With `tenant`, only
    /// conversations assigned to that tenant are returned.
    async fn list_tickets(&self, tenant: Option<&str>) -> Result<Vec<Ticket>, DatabaseError>;

    /// Reset the unread counter. No-op when the ticket does not exist.
    async fn mark_read(&self, id: &str) -> Result<(), DatabaseError>;

    /// Close a ticket. Idempotent; returns `true` if the ticket exists.
    async fn close_ticket(&self, id: &str) -> Result<bool, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message, implicitly upserting the ticket. Inbound messages
    /// increment the unread counter.
    async fn append_message(&self, id: &str, message: NewMessage)
    -> Result<Message, DatabaseError>;

    /// Full message log in arrival order.
    async fn get_messages(&self, id: &str) -> Result<Vec<Message>, DatabaseError>;

    /// Full message log, resetting the unread counter in the same step.
    /// Messages appended afterwards stay unread.
    async fn read_messages(&self, id: &str) -> Result<Vec<Message>, DatabaseError>;

    // ── Human override ──────────────────────────────────────────────

    async fn set_human_mode(&self, id: &str, enabled: bool) -> Result<bool, DatabaseError>;

    async fn is_human_mode(&self, id: &str) -> Result<bool, DatabaseError>;

    // ── Triage ──────────────────────────────────────────────────────

    /// Operator write: set the tag unconditionally.
    async fn set_tag(&self, id: &str, tag: &str) -> Result<(), DatabaseError>;

    /// Automatic write: tag the conversation only if it is untagged.
    /// Returns the state after the call, which is the pre-existing tag when
    /// one was already present.
    async fn assign_tag_once(&self, id: &str, tag: &str) -> Result<TriageState, DatabaseError>;

    /// Operator write: return the conversation to `Untagged`.
    async fn clear_tag(&self, id: &str) -> Result<(), DatabaseError>;

    async fn get_tag(&self, id: &str) -> Result<TriageState, DatabaseError>;

    // ── Tenants & contacts ──────────────────────────────────────────

    /// Assign the conversation to `tenant` unless it already belongs to one.
    /// Returns the owning tenant, which never changes once set.
    async fn assign_tenant_once(&self, id: &str, tenant: &str) -> Result<String, DatabaseError>;

    async fn get_tenant(&self, id: &str) -> Result<Option<String>, DatabaseError>;

    /// Refresh cached profile metadata.
    async fn upsert_contact(&self, id: &str, update: ContactUpdate) -> Result<Contact, DatabaseError>;

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError>;
}
