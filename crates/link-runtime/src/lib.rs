//! # Link Runtime
//!
//! Runtime infrastructure shared by the device link loops.
//!
//! This crate defines:
//! - **Logging macros**: `link_debug!` .. `link_error!` on top of `log`
//! - **Cancellation**: a cooperative shutdown token and cancellable sleeps
//! - **Channels**: the bounded command queue and the replaceable event sink
//! - **Supervision**: spawning named loops and joining them with a deadline
//!
//! ## Architecture
//!
//! - **Message passing**: commands and events travel over bounded channels
//! - **Cooperative shutdown**: loops poll a shared token, nothing is killed
//!   unless it misses the join deadline
//! - **Failure isolation**: a loop error is logged, never propagated

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod cancellation;
pub mod channels;
pub mod logging;
pub mod supervision;

#[doc(hidden)]
pub use log as __log;

pub use cancellation::{race_with_cancellation, sleep_or_shutdown, ShutdownToken};
pub use channels::{CommandQueue, EventSink};
pub use supervision::{LoopSet, DEFAULT_JOIN_TIMEOUT};
