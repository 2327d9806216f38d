//! The in-process half of paywire: the two-tier confirmation store, the
//! notification dispatcher, and the bridge that carries durable writes from
//! other instances into this one.
//!
//! Generic over any [`paywire_core::ConfirmationArchive`]; the server wires
//! it to SQLite.

mod bridge;
mod cache;
mod dispatch;
pub mod error;
mod hub;
mod persist;
mod store;

pub use bridge::FeedBridge;
pub use dispatch::{ChannelHandle, ChannelState, Delivery, Dispatcher, Subscription};
pub use error::{Error, Result};
pub use hub::{Hub, HubConfig};
pub use persist::RetryPolicy;
pub use store::ConfirmationStore;
