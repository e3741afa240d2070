//! The throttled outbound path.

pub mod outbound;
pub mod queue;

pub use outbound::{Outbound, normalize_recipient};
pub use queue::{DeliveryConfig, DeliveryQueue};
