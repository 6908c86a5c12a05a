use std::future::Future;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Other: {0}")]
    Other(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// A byte-oriented duplex link to a device (serial port, in-memory mock).
///
/// Methods take `&self` so one handle can be shared between the receiver
/// and writer tasks; implementations synchronize internally. The returned
/// futures are `Send` so generic callers can move them onto a multi-threaded
/// runtime.
pub trait Transport: Send + Sync {
    /// Read whatever bytes are currently available.
    ///
    /// Returns an empty vector when nothing is pending. An error means the
    /// link is broken and should be treated as a disconnection.
    fn read_chunk(&self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Write all bytes to the transport and flush them.
    fn write(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Further reads and writes fail with `NotConnected`.
    fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports by port name.
///
/// The connection manager owns one connector for its lifetime and calls
/// `open` on every (re)connect attempt.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "cable pulled");
        let err: TransportError = io.into();
        assert_eq!(err, TransportError::Io("cable pulled".into()));
        assert_eq!(err.to_string(), "IO Error: cable pulled");
    }
}
