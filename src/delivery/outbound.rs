//! Outbound send path shared by operator sends and automated replies.
//!
//! Validation and the readiness check run synchronously, so a rejected send
//! never reaches the queue. Once a job is accepted its outcome is only
//! visible through the event broadcaster: a delivered message is appended
//! to the conversation log and published as `message`, a failed one is
//! published as `delivery_failed`.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::queue::DeliveryQueue;
use crate::error::SendError;
use crate::events::{DeskEvent, EventBroadcaster};
use crate::store::{ConversationStore, NewMessage};
use crate::transport::Transport;

/// Suffix of one-to-one WhatsApp addresses.
pub const PERSONAL_SUFFIX: &str = "@s.whatsapp.net";

/// Author label for operator sends that do not name one.
pub const DEFAULT_OPERATOR_LABEL: &str = "operator";

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z._:\-]+@[a-z.]+$").expect("valid address regex")
});

/// Turn operator input (`5527999990000`, `+55 27 99999-0000`, or a full
/// address) into a conversation id, enforcing the send allowlist.
///
/// The allowlist holds bare digit strings; an empty list allows everyone.
pub fn normalize_recipient(raw: &str, allowlist: &[String]) -> Result<String, SendError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SendError::MissingRecipient);
    }

    let address = if raw.contains('@') {
        if !ADDRESS_RE.is_match(raw) {
            return Err(SendError::InvalidRecipient(raw.to_string()));
        }
        raw.to_string()
    } else {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(SendError::InvalidRecipient(raw.to_string()));
        }
        format!("{digits}{PERSONAL_SUFFIX}")
    };

    if !allowlist.is_empty() {
        let user = address
            .split(['@', ':'])
            .next()
            .unwrap_or_default();
        if !allowlist.iter().any(|allowed| allowed == user) {
            return Err(SendError::NotAllowed(user.to_string()));
        }
    }

    Ok(address)
}

/// Where a delivered message is recorded.
#[derive(Debug, Clone)]
enum Trail {
    /// Append to the conversation log under this author label.
    Conversation { author: String },
    /// Side-channel notice (supervisor alerts); nothing is stored.
    Unrecorded,
}

/// Validating front door to the delivery queue.
pub struct Outbound {
    queue: Arc<DeliveryQueue>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ConversationStore>,
    events: Arc<EventBroadcaster>,
    allowlist: Vec<String>,
    bot_name: String,
}

impl Outbound {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ConversationStore>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            queue,
            transport,
            store,
            events,
            allowlist: Vec::new(),
            bot_name: "Bot".into(),
        }
    }

    pub fn with_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = bot_name.into();
        self
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// Operator send. Returns the resolved conversation id once queued.
    pub fn send(&self, to: &str, text: &str, author: Option<&str>) -> Result<String, SendError> {
        let conversation_id = normalize_recipient(to, &self.allowlist)?;
        let author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_OPERATOR_LABEL);
        self.dispatch(
            conversation_id.clone(),
            text,
            Trail::Conversation {
                author: author.to_string(),
            },
        )?;
        Ok(conversation_id)
    }

    /// Automated reply into an existing conversation, labelled with the bot name.
    pub fn reply(&self, conversation_id: &str, text: &str) -> Result<(), SendError> {
        if conversation_id.trim().is_empty() {
            return Err(SendError::MissingRecipient);
        }
        self.dispatch(
            conversation_id.to_string(),
            text,
            Trail::Conversation {
                author: self.bot_name.clone(),
            },
        )
    }

    /// Unrecorded notice, e.g. a hand-off alert to the supervisor.
    pub fn notify(&self, to: &str, text: &str) -> Result<(), SendError> {
        let address = normalize_recipient(to, &[])?;
        self.dispatch(address, text, Trail::Unrecorded)
    }

    fn dispatch(&self, conversation_id: String, text: &str, trail: Trail) -> Result<(), SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyText);
        }

        let status = self.transport.status();
        if !status.is_online() {
            debug!(conversation_id = %conversation_id, %status, "Rejecting send, transport not ready");
            return Err(SendError::NotReady {
                status: status.to_string(),
            });
        }

        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let text = text.to_string();

        info!(conversation_id = %conversation_id, "Queueing outbound message");
        self.queue.enqueue(move || async move {
            if let Err(e) = transport.send(&conversation_id, &text).await {
                events.publish(DeskEvent::DeliveryFailed {
                    conversation_id,
                    error: e.to_string(),
                });
                return Err(e.to_string());
            }

            if let Trail::Conversation { author } = trail {
                let stored = store
                    .append_message(&conversation_id, NewMessage::outbound(text, Some(author)))
                    .await
                    .map_err(|e| {
                        warn!(conversation_id = %conversation_id, error = %e, "Sent but not recorded");
                        e.to_string()
                    })?;
                events.publish(DeskEvent::Message {
                    conversation_id,
                    message: stored,
                });
            }
            Ok(())
        });

        Ok(())
    }
}
