//! # Link Protocol
//!
//! Types shared by every part of the device link.
//!
//! This crate has no async runtime dependency. Its only I/O is in
//! [`load_config`], which reads the optional TOML file and the
//! `DEVICE_LINK_*` environment variables.
//!
//! ## Contents
//!
//! - **Command**: outbound tokens (`CONF:<n>`, `BUSY`, `READY`)
//! - **InboundMessage**: decoded device lines (`STYLE:<n>`, `CONFIRM`)
//! - **LinkEvent**: notifications from the link to its subscriber
//! - **ConnectionState**: the Disconnected/Connecting/Connected FSM
//! - **LinkConfig**: settings plus the TOML/environment loader
//! - **constants**: documented defaults for every `LinkConfig` field
//!
//! ## Wire Protocol
//!
//! ```text
//! host ──► device   CONF:0..100\n | BUSY\n | READY\n
//! host ◄── device   STYLE:<index>\n | CONFIRM\n
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod config;
pub mod constants;
pub mod errors;
pub mod messages;
pub mod state;

pub use config::{load_config, LinkConfig};
pub use errors::LinkError;
pub use messages::{Command, InboundMessage, LinkEvent, MAX_CONFIDENCE};
pub use state::ConnectionState;
