//! Durable conversation state: tickets, messages, human-mode flags, tags,
//! tenant assignments, and contact metadata.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    Contact, ContactUpdate, Direction, Message, NewMessage, Ticket, TicketStatus, TicketUpdate,
    TriageState,
};
pub use traits::ConversationStore;
