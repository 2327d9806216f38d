//! SQLite durable tier for paywire.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Implements both
//! [`ConfirmationArchive`](paywire_core::ConfirmationArchive) and
//! [`ChangeFeed`](paywire_core::ChangeFeed).

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteArchive;

#[cfg(test)]
mod tests;
