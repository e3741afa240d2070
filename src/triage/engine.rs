//! Triage engine — pure decisions over message text and a rule book.
//!
//! The engine never touches storage. The inbound pipeline reads the current
//! `TriageState`, asks for a decision, and persists the outcome.

use tracing::debug;

use crate::store::TriageState;
use crate::triage::rules::{RuleBook, TagRule, TenantProfile, normalize};

/// What the automated path should do with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageDecision {
    /// First match on an untagged conversation. `reply` is the tag's script.
    Tagged { tag: String, reply: Option<String> },
    /// The conversation already carries `tag`; the automatic path leaves it alone.
    Continue { tag: String, reply: Option<String> },
    /// Nothing matched; re-send the tenant's welcome menu.
    Welcome { prompt: String },
}

impl TriageDecision {
    /// Text to send back, if any.
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Tagged { reply, .. } | Self::Continue { reply, .. } => reply.as_deref(),
            Self::Welcome { prompt } => Some(prompt),
        }
    }
}

/// First-match-wins rule evaluation.
pub struct TriageEngine {
    book: RuleBook,
}

impl TriageEngine {
    pub fn new(book: RuleBook) -> Self {
        Self { book }
    }

    pub fn book(&self) -> &RuleBook {
        &self.book
    }

    /// Tenant profile by id, falling back to the configured default.
    pub fn tenant(&self, id: &str) -> &TenantProfile {
        self.book
            .tenant(id)
            .or_else(|| self.book.tenant(&self.book.fallback_tenant))
            .unwrap_or(&self.book.tenants[0])
    }

    /// Pick the owning tenant for a first-contact message.
    pub fn decide_tenant(&self, text: &str) -> &str {
        let normalized = normalize(text);
        self.book
            .routes
            .iter()
            .find(|route| {
                route
                    .keywords
                    .iter()
                    .any(|kw| !kw.is_empty() && normalized.contains(kw.as_str()))
            })
            .map(|route| route.tenant.as_str())
            .unwrap_or(&self.book.fallback_tenant)
    }

    /// First rule of the tenant's table that matches `text`.
    pub fn classify(&self, tenant: &str, text: &str) -> Option<&TagRule> {
        let normalized = normalize(text);
        self.tenant(tenant)
            .rules
            .iter()
            .find(|rule| rule.matches(&normalized))
    }

    /// Whether the message asks for a human operator.
    pub fn is_handoff(&self, text: &str) -> bool {
        let normalized = normalize(text);
        self.book
            .handoff
            .keywords
            .iter()
            .any(|kw| !kw.is_empty() && normalized.contains(kw.as_str()))
    }

    /// Scripted reply for a tag, or the tenant's fallback.
    pub fn script_for(&self, tenant: &str, tag: &str) -> Option<String> {
        let profile = self.tenant(tenant);
        profile
            .rules
            .iter()
            .find(|rule| rule.tag == tag)
            .and_then(|rule| rule.reply.clone())
            .or_else(|| profile.fallback_reply.clone())
    }

    /// Decide the automated response for an inbound message.
    pub fn evaluate(&self, tenant: &str, state: &TriageState, text: &str) -> TriageDecision {
        match state {
            TriageState::Tagged(tag) => TriageDecision::Continue {
                tag: tag.clone(),
                reply: self.script_for(tenant, tag),
            },
            TriageState::Untagged => match self.classify(tenant, text) {
                Some(rule) => {
                    debug!(tenant, tag = %rule.tag, "Triage rule matched");
                    TriageDecision::Tagged {
                        tag: rule.tag.clone(),
                        reply: self.script_for(tenant, &rule.tag),
                    }
                }
                None => TriageDecision::Welcome {
                    prompt: self.tenant(tenant).welcome.clone(),
                },
            },
        }
    }
}
