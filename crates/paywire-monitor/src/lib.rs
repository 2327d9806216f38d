//! Client-side payment monitoring for paywire.
//!
//! [`Monitor`] resolves a correlation id to its terminal confirmation through
//! a push stream with bounded polling behind it, and fires exactly one
//! [`TerminalHandler`] callback. Sources: [`HttpSource`] talks to a paywire
//! server; [`FeedSource`] reads a durable backend directly.

pub mod error;
pub mod feed;
pub mod http;
pub mod monitor;
pub mod source;

pub use error::{MonitorError, Result, SourceError};
pub use feed::FeedSource;
pub use http::HttpSource;
pub use monitor::{Monitor, MonitorConfig, MonitorState, Strategy, TerminalHandler};
pub use source::{Chain, NoPush, PushEvent, PushSource, PushStream, StatusSource};
