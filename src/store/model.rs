//! Conversation records: tickets, messages, contacts, and triage state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a ticket. Only `Open -> Closed` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown ticket status: {other}")),
        }
    }
}

/// Operator-facing summary of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Conversation identifier (remote address).
    pub id: String,
    pub tenant: Option<String>,
    pub display_name: String,
    pub status: TicketStatus,
    pub last_message_text: String,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional fields applied by `upsert_ticket`.
#[derive(Debug, Clone, Default)]
pub struct TicketUpdate {
    pub display_name: Option<String>,
}

impl TicketUpdate {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: Some(display_name.into()),
        }
    }
}

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "out" => Self::Out,
            _ => Self::In,
        }
    }
}

/// An immutable, stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_label: Option<String>,
}

/// A message about to be appended. `id` and `timestamp` are assigned by the
/// store when absent.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub text: String,
    pub author_label: Option<String>,
}

impl NewMessage {
    /// A message received from the remote correspondent.
    pub fn inbound(text: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            direction: Direction::In,
            text: text.into(),
            author_label: None,
        }
    }

    /// A message sent by an operator or the bot.
    pub fn outbound(text: impl Into<String>, author_label: Option<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            direction: Direction::Out,
            text: text.into(),
            author_label,
        }
    }

    /// Fill in server-assigned fields.
    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        Message {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: self.timestamp.unwrap_or(now),
            direction: self.direction,
            text: self.text,
            author_label: self.author_label,
        }
    }
}

/// Triage lifecycle of a conversation: `Untagged -> Tagged(tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "tag", rename_all = "lowercase")]
pub enum TriageState {
    #[default]
    Untagged,
    Tagged(String),
}

impl TriageState {
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Untagged => None,
            Self::Tagged(tag) => Some(tag),
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged(_))
    }
}

impl From<Option<String>> for TriageState {
    fn from(tag: Option<String>) -> Self {
        match tag {
            Some(t) if !t.is_empty() => Self::Tagged(t),
            _ => Self::Untagged,
        }
    }
}

/// Cached profile metadata for a correspondent. Never required for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub conversation_id: String,
    pub phone: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub tenant: Option<String>,
    pub tag: TriageState,
}

/// Fields refreshed on a contact. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub phone: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}
