//! Core types and trait definitions for paywire.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it: the canonical confirmation record, the
//! per-gateway status taxonomy, gateway webhook payloads, and the traits a
//! durable backend must implement.

pub mod confirmation;
pub mod error;
pub mod status;
pub mod store;
pub mod webhook;
pub mod wire;

pub use confirmation::{Amount, Applied, PaymentConfirmation, apply_update};
pub use error::{Error, Result};
pub use status::{CanonicalStatus, Gateway, canonicalize};
pub use store::{ChangeEvent, ChangeFeed, ConfirmationArchive, LookupKey};
pub use webhook::GatewayWebhook;
pub use wire::{StatusReply, StreamEvent};
