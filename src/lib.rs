//! wadesk — WhatsApp help desk core.

pub mod api;
pub mod config;
pub mod delivery;
pub mod desk;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod store;
pub mod transport;
pub mod triage;
