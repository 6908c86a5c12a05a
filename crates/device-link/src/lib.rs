//! # Device Link
//!
//! Background serial communication with the classifier's companion board.
//!
//! The host drives two LEDs (a confidence bar and a busy/ready status light)
//! and listens for the board's style selector and confirm button.
//!
//! ## Components
//!
//! - **DeviceLink** (connection manager): opens the port with retries,
//!   owns the session and the shared state
//! - **Writer loop**: sends queued commands in FIFO order, drops a command
//!   that cannot be sent within its timeout
//! - **Receiver loop**: frames device output into lines and emits events
//! - **Health monitor**: reconnects a dropped link
//! - **LinkGuard**: connect-for-a-scope
//! - **MockConnector**: in-memory port for tests and `--mock` runs
//!
//! ## Architecture
//!
//! ```text
//!  set_confidence / set_status
//!            │ CommandQueue (bounded)
//!            ▼
//!        ┌────────┐  write   ┌───────────┐  read   ┌──────────┐
//!        │ writer │────────► │ transport │ ──────► │ receiver │──► LinkEvent
//!        └────────┘          └───────────┘         └──────────┘
//!                                  ▲
//!                      connect()   │  every monitor_interval
//!                        ┌─────────┴┐
//!                        │ monitor  │
//!                        └──────────┘
//! ```
//!
//! All three loops are tokio tasks sharing an atomic connection state and a
//! per-session shutdown token.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod guard;
pub mod link;
pub mod mock;
mod monitor;
mod receiver;
mod writer;

pub use guard::LinkGuard;
pub use link::DeviceLink;
pub use mock::{MockConnector, MockTransport};

pub use link_protocol::{
    load_config, Command, ConnectionState, LinkConfig, LinkError, LinkEvent,
};
