//! Inbound message pipeline.
//!
//! Every transport message flows through `InboundProcessor::process()`:
//! tenant routing, persistence, broadcast, hand-off, then triage.

pub mod inbound;

pub use inbound::{DEFAULT_HANDOFF_TEXT, HandoffSettings, InboundOutcome, InboundProcessor};
