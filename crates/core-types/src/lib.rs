use serde::{Deserialize, Serialize};

pub mod transport;
pub use transport::{Connector, Transport, TransportError};

/// A raw chunk of logical data (one line from the device, one command token).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    /// The raw bytes comprising this frame.
    pub bytes: Vec<u8>,
    /// Timestamp in microseconds, relative to the start of the link session.
    pub timestamp_us: u64,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, timestamp_us: u64) -> Self {
        Self {
            bytes,
            timestamp_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::new(b"STYLE:2\n".to_vec(), 1000);
        let json = serde_json::to_string(&frame).unwrap();
        let deserialized: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, deserialized);
    }
}
