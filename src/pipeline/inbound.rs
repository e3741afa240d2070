//! Inbound processor — what happens when a correspondent writes in.
//!
//! Flow, per message:
//! 1. Validate, then fix the owning tenant (first contact only)
//! 2. Persist ticket, contact, and the message; publish `message`
//! 3. Hand-off keyword → acknowledge, flip human mode, alert the supervisor
//! 4. Human mode → stop; nothing automated is sent
//! 5. Triage → tag once, then scripted reply or the welcome menu
//!
//! Replies go through the shared outbound queue. A rejected reply (transport
//! offline) is logged and reflected in the outcome, never raised.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::delivery::Outbound;
use crate::error::PipelineError;
use crate::events::{DeskEvent, EventBroadcaster, TicketChange};
use crate::store::{ContactUpdate, ConversationStore, NewMessage, TicketUpdate};
use crate::transport::InboundMessage;
use crate::triage::{TriageDecision, TriageEngine};

/// Acknowledgement sent when a correspondent asks for a human.
pub const DEFAULT_HANDOFF_TEXT: &str = "Vou te encaminhar para um atendente.";

/// Hand-off behaviour.
#[derive(Debug, Clone)]
pub struct HandoffSettings {
    /// Address alerted on every hand-off request.
    pub supervisor: Option<String>,
    pub ack_text: String,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            supervisor: None,
            ack_text: DEFAULT_HANDOFF_TEXT.into(),
        }
    }
}

/// What the processor did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Hand-off keyword seen. `acknowledged` is false when the conversation
    /// was already in human mode.
    HandedOff {
        tenant: String,
        acknowledged: bool,
        supervisor_notified: bool,
    },
    /// Human mode is on; persisted and broadcast only.
    HumanMode { tenant: String },
    /// Tagged by this message.
    Tagged {
        tenant: String,
        tag: String,
        replied: bool,
    },
    /// Already tagged earlier.
    Continued {
        tenant: String,
        tag: String,
        replied: bool,
    },
    /// No rule matched; welcome menu sent (again).
    Welcomed { tenant: String, replied: bool },
}

impl InboundOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::HandedOff { .. } => "handed_off",
            Self::HumanMode { .. } => "human_mode",
            Self::Tagged { .. } => "tagged",
            Self::Continued { .. } => "continued",
            Self::Welcomed { .. } => "welcomed",
        }
    }
}

pub struct InboundProcessor {
    store: Arc<dyn ConversationStore>,
    triage: Arc<TriageEngine>,
    outbound: Arc<Outbound>,
    events: Arc<EventBroadcaster>,
    handoff: HandoffSettings,
}

impl InboundProcessor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        triage: Arc<TriageEngine>,
        outbound: Arc<Outbound>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            store,
            triage,
            outbound,
            events,
            handoff: HandoffSettings::default(),
        }
    }

    pub fn with_handoff(mut self, handoff: HandoffSettings) -> Self {
        self.handoff = handoff;
        self
    }

    pub async fn process(&self, message: InboundMessage) -> Result<InboundOutcome, PipelineError> {
        let id = message.conversation_id.trim();
        if id.is_empty() {
            return Err(PipelineError::InvalidMessage("conversation id required".into()));
        }
        let text = message.text.as_str();
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("text required".into()));
        }

        let tenant = self
            .store
            .assign_tenant_once(id, self.triage.decide_tenant(text))
            .await?;

        info!(conversation_id = %id, tenant = %tenant, "Inbound message");

        self.store
            .upsert_ticket(
                id,
                TicketUpdate {
                    display_name: message.sender_display_name.clone(),
                },
            )
            .await?;

        // Profile refresh is opportunistic.
        if let Err(e) = self
            .store
            .upsert_contact(
                id,
                ContactUpdate {
                    phone: None,
                    display_name: message.sender_display_name.clone(),
                    avatar_url: message.avatar_url.clone(),
                },
            )
            .await
        {
            warn!(conversation_id = %id, error = %e, "Contact refresh failed");
        }

        let stored = self
            .store
            .append_message(id, NewMessage::inbound(text))
            .await?;
        self.events.publish(DeskEvent::Message {
            conversation_id: id.to_string(),
            message: stored,
        });

        if self.triage.is_handoff(text) {
            return self.hand_off(id, text, tenant).await;
        }

        if self.store.is_human_mode(id).await? {
            debug!(conversation_id = %id, "Human mode on, no automated reply");
            return Ok(InboundOutcome::HumanMode { tenant });
        }

        let state = self.store.get_tag(id).await?;
        let outcome = match self.triage.evaluate(&tenant, &state, text) {
            TriageDecision::Tagged { tag: matched, .. } => {
                let settled = self.store.assign_tag_once(id, &matched).await?;
                let tag = settled.tag().unwrap_or(&matched).to_string();
                if tag == matched {
                    self.events.publish(DeskEvent::Ticket {
                        conversation_id: id.to_string(),
                        change: TicketChange::Tag {
                            tag: Some(tag.clone()),
                        },
                    });
                }
                let replied = self.reply(id, self.triage.script_for(&tenant, &tag).as_deref());
                InboundOutcome::Tagged {
                    tenant,
                    tag,
                    replied,
                }
            }
            TriageDecision::Continue { tag, reply } => {
                let replied = self.reply(id, reply.as_deref());
                InboundOutcome::Continued {
                    tenant,
                    tag,
                    replied,
                }
            }
            TriageDecision::Welcome { prompt } => {
                let replied = self.reply(id, Some(&prompt));
                InboundOutcome::Welcomed { tenant, replied }
            }
        };

        debug!(conversation_id = %id, outcome = outcome.label(), "Inbound processed");
        Ok(outcome)
    }

    async fn hand_off(
        &self,
        id: &str,
        text: &str,
        tenant: String,
    ) -> Result<InboundOutcome, PipelineError> {
        let already_human = self.store.is_human_mode(id).await?;

        let acknowledged = if already_human {
            false
        } else {
            let acked = self.reply(id, Some(&self.handoff.ack_text));
            self.store.set_human_mode(id, true).await?;
            self.events.publish(DeskEvent::Ticket {
                conversation_id: id.to_string(),
                change: TicketChange::HumanMode { enabled: true },
            });
            acked
        };

        let supervisor_notified = match self.handoff.supervisor.as_deref() {
            Some(supervisor) => {
                let alert = format!("📩 *Novo atendimento*\nCliente: {id}\nMensagem: {text}");
                match self.outbound.notify(supervisor, &alert) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(conversation_id = %id, error = %e, "Supervisor alert not queued");
                        false
                    }
                }
            }
            None => false,
        };

        info!(
            conversation_id = %id,
            acknowledged,
            supervisor_notified,
            "Hand-off requested"
        );

        Ok(InboundOutcome::HandedOff {
            tenant,
            acknowledged,
            supervisor_notified,
        })
    }

    fn reply(&self, id: &str, text: Option<&str>) -> bool {
        let Some(text) = text else {
            return false;
        };
        match self.outbound.reply(id, text) {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Automated reply not queued");
                false
            }
        }
    }
}
