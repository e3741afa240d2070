//! Messaging transport abstraction.
//!
//! The desk treats the transport as a black box: it can `send` text to a
//! conversation and it yields a stream of inbound messages and status
//! changes.

pub mod bridge;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use bridge::BridgeTransport;

/// Connection lifecycle of the transport account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Starting,
    Pairing,
    Online,
    Offline,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Pairing => "pairing",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text message received from a remote correspondent.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
    pub sender_display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl InboundMessage {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            sender_display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.sender_display_name = Some(name.into());
        self
    }
}

/// Everything a running transport reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Inbound(InboundMessage),
    Status(TransportStatus),
}

pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// A messaging transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Current connection status.
    fn status(&self) -> TransportStatus;

    /// Deliver `text` to a conversation.
    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError>;

    /// Connect and start yielding events. Called once per process.
    async fn start(&self) -> Result<EventStream, TransportError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransportStatus::Pairing).unwrap(),
            "\"pairing\""
        );
        assert_eq!(TransportStatus::Offline.to_string(), "offline");
        assert!(TransportStatus::Online.is_online());
        assert!(!TransportStatus::Starting.is_online());
    }
}
