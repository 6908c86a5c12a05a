//! Error Handling Guidelines
//!
//! Error messages say what failed, why (when known), and what the operator
//! can do about it:
//! - ✅ "Port /dev/ttyUSB0 unavailable after 3 attempts: No such file or directory"
//! - ❌ "open failed"
//!
//! None of these errors is fatal to the process. The link degrades to
//! "disconnected, retrying" instead.

use core_types::TransportError;
use thiserror::Error;

use crate::messages::Command;

/// Unified error type for device link operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Opening the port failed on every attempt
    #[error("Port {port} unavailable after {attempts} attempts: {reason}")]
    PortUnavailable {
        port: String,
        attempts: u32,
        reason: String,
    },

    /// Read or write failed during an established session
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A queued command could not be written before its deadline
    #[error("Command {command} not sent within {timeout_ms} ms, dropped")]
    CommandTimeout { command: Command, timeout_ms: u64 },

    /// Inbound line that does not match the device grammar
    #[error("Malformed frame from device: {0:?}")]
    MalformedFrame(String),

    /// Operation requires a started link session
    #[error("Link is not connected - call connect() first")]
    NotConnected,

    /// Command queue is at capacity
    #[error("Command queue full ({capacity} pending) - device is not keeping up")]
    QueueFull { capacity: usize },

    /// Another connect() is already opening the port
    #[error("Connect already in progress")]
    ConnectInProgress,

    /// connect() was abandoned because disconnect() ran meanwhile
    #[error("Connect cancelled by disconnect")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::PortUnavailable {
            port: "/dev/ttyUSB0".into(),
            attempts: 3,
            reason: "No such file or directory".into(),
        };
        assert_eq!(
            err.to_string(),
            "Port /dev/ttyUSB0 unavailable after 3 attempts: No such file or directory"
        );
    }

    #[test]
    fn test_error_from_transport() {
        let err: LinkError = TransportError::NotConnected.into();
        match err {
            LinkError::Transport(TransportError::NotConnected) => {}
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_command_timeout_message() {
        let err = LinkError::CommandTimeout {
            command: Command::Busy,
            timeout_ms: 2000,
        };
        assert!(err.to_string().contains("BUSY not sent within 2000 ms"));
    }
}
