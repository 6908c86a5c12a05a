use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::LinkError;

/// Highest value accepted by the confidence LED bar.
pub const MAX_CONFIDENCE: u8 = 100;

/// Outbound instruction for the microcontroller.
///
/// `Display` renders the bare token (`CONF:42`, `BUSY`, `READY`); the wire
/// form adds the `\n` terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Confidence LED level, always within 0..=100
    Confidence(u8),
    /// Status LED: classification running
    Busy,
    /// Status LED: idle
    Ready,
}

impl Command {
    /// Build a confidence command, clamping to [0, 100].
    ///
    /// Fractional values truncate toward zero and NaN maps to 0.
    pub fn confidence(value: f64) -> Self {
        let clamped = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, f64::from(MAX_CONFIDENCE))
        };
        Command::Confidence(clamped as u8)
    }

    pub fn status(busy: bool) -> Self {
        if busy {
            Command::Busy
        } else {
            Command::Ready
        }
    }

    /// Bytes as written to the serial line, newline included.
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{}\n", self).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Confidence(value) => write!(f, "CONF:{}", value),
            Command::Busy => f.write_str("BUSY"),
            Command::Ready => f.write_str("READY"),
        }
    }
}

/// A line received from the device, after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMessage {
    /// `STYLE:<index>` - the user turned the style selector
    Style(u8),
    /// `CONFIRM` - the confirm button was pressed
    Confirm,
}

impl InboundMessage {
    /// Decode one line of device output.
    ///
    /// Surrounding whitespace and the line terminator are ignored. Blank
    /// lines yield `Ok(None)`; anything outside the grammar is a
    /// `MalformedFrame`.
    pub fn parse(line: &str) -> Result<Option<Self>, LinkError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if line == "CONFIRM" {
            return Ok(Some(InboundMessage::Confirm));
        }

        if let Some(index) = line.strip_prefix("STYLE:") {
            return index
                .trim()
                .parse::<u8>()
                .map(|i| Some(InboundMessage::Style(i)))
                .map_err(|_| LinkError::MalformedFrame(line.to_string()));
        }

        Err(LinkError::MalformedFrame(line.to_string()))
    }

    /// Same as [`InboundMessage::parse`] for raw bytes; non UTF-8 input is
    /// malformed.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Option<Self>, LinkError> {
        match std::str::from_utf8(bytes) {
            Ok(line) => Self::parse(line),
            Err(_) => Err(LinkError::MalformedFrame(
                String::from_utf8_lossy(bytes).trim().to_string(),
            )),
        }
    }
}

impl From<InboundMessage> for LinkEvent {
    fn from(msg: InboundMessage) -> Self {
        match msg {
            InboundMessage::Style(index) => LinkEvent::StyleChanged { index },
            InboundMessage::Confirm => LinkEvent::ConfirmPressed,
        }
    }
}

/// Events from the link to its subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEvent {
    /// Style selector moved on the device
    StyleChanged { index: u8 },

    /// Confirm button pressed on the device
    ConfirmPressed,

    /// Port opened (`true`) or lost/closed (`false`)
    ConnectionChanged { connected: bool },

    /// A queued command was dropped after its send timeout
    CommandTimedOut { command: Command },
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
    fn test_confidence_clamps_out_of_range() {
        assert_eq!(Command::confidence(-5.0).to_string(), "CONF:0");
        assert_eq!(Command::confidence(142.0).to_string(), "CONF:100");
        assert_eq!(Command::confidence(f64::INFINITY), Command::Confidence(100));
        assert_eq!(Command::confidence(f64::NEG_INFINITY), Command::Confidence(0));
    }

    #[test]
    fn test_confidence_truncates_and_handles_nan() {
        assert_eq!(Command::confidence(42.9), Command::Confidence(42));
        assert_eq!(Command::confidence(100.0), Command::Confidence(100));
        assert_eq!(Command::confidence(f64::NAN), Command::Confidence(0));
    }

    #[test]
    fn test_wire_tokens() {
        assert_eq!(Command::Confidence(73).to_wire(), b"CONF:73\n");
        assert_eq!(Command::status(true).to_wire(), b"BUSY\n");
        assert_eq!(Command::status(false).to_wire(), b"READY\n");
    }

    #[test]
    fn test_parse_style_and_confirm() {
        assert_eq!(
            InboundMessage::parse("STYLE:3\r\n").unwrap(),
            Some(InboundMessage::Style(3))
        );
        assert_eq!(
            InboundMessage::parse("  CONFIRM ").unwrap(),
            Some(InboundMessage::Confirm)
        );
        assert_eq!(InboundMessage::parse("\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_unknown_and_bad_index() {
        for line in ["HELLO", "STYLE:", "STYLE:-1", "STYLE:300", "confirm"] {
            match InboundMessage::parse(line) {
                Err(LinkError::MalformedFrame(raw)) => assert_eq!(raw, line.trim()),
                other => panic!("{line:?} parsed as {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        let result = InboundMessage::parse_bytes(&[0xC3, 0x28, b'\n']);
        assert!(matches!(result, Err(LinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_inbound_to_event() {
        assert_eq!(
            LinkEvent::from(InboundMessage::Style(1)),
            LinkEvent::StyleChanged { index: 1 }
        );
        assert_eq!(LinkEvent::from(InboundMessage::Confirm), LinkEvent::ConfirmPressed);
    }

    #[test]
    fn test_link_event_serialization() {
        let event = LinkEvent::CommandTimedOut {
            command: Command::Confidence(12),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: LinkEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
