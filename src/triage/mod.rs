//! Triage — tenant routing and first-contact topic tagging.

pub mod engine;
pub mod rules;

pub use engine::{TriageDecision, TriageEngine};
pub use rules::{RuleBook, TagRule, TenantProfile, normalize};
