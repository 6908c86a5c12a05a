//! In-memory connector for tests and dry runs
//!
//! Every transport opened by a [`MockConnector`] shares the connector's
//! script: queued inbound chunks and read errors, open and write failures,
//! and a record of everything written.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use core_types::{Connector, Transport, TransportError};

use crate::link::lock;

#[derive(Debug, Default)]
struct Script {
    failing_opens: u32,
    fail_all_opens: bool,
    open_delay: Duration,
    opens: u32,
    closes: u32,
    inbound: VecDeque<Result<Vec<u8>, TransportError>>,
    fail_writes: bool,
    written: Vec<Vec<u8>>,
}

/// Scriptable stand-in for a serial port.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` opens fail
    pub fn fail_next_opens(&self, n: u32) {
        lock(&self.script).failing_opens = n;
    }

    /// Make every open fail until switched off
    pub fn fail_all_opens(&self, fail: bool) {
        lock(&self.script).fail_all_opens = fail;
    }

    /// Make every open take `delay` before it succeeds or fails
    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.script).open_delay = delay;
    }

    /// Open attempts so far, failed ones included
    pub fn open_count(&self) -> u32 {
        lock(&self.script).opens
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.script).closes
    }

    /// Queue bytes for the next read
    pub fn push_inbound(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.script)
            .inbound
            .push_back(Ok(bytes.as_ref().to_vec()));
    }

    /// Queue a read failure, as if the cable was pulled
    pub fn push_read_error(&self, error: TransportError) {
        lock(&self.script).inbound.push_back(Err(error));
    }

    pub fn set_write_failure(&self, fail: bool) {
        lock(&self.script).fail_writes = fail;
    }

    /// Every successful write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.script).written.clone()
    }

    /// Successful writes as text, terminators stripped
    pub fn written_lines(&self) -> Vec<String> {
        lock(&self.script)
            .written
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end().to_string())
            .collect()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self, port: &str, _baud_rate: u32) -> Result<MockTransport, TransportError> {
        let delay = lock(&self.script).open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = lock(&self.script);
        script.opens += 1;

        if script.fail_all_opens || script.failing_opens > 0 {
            script.failing_opens = script.failing_opens.saturating_sub(1);
            return Err(TransportError::ConnectionFailed(format!(
                "{}: no such device",
                port
            )));
        }

        Ok(MockTransport {
            script: Arc::clone(&self.script),
            closed: AtomicBool::new(false),
        })
    }
}

/// Transport handed out by [`MockConnector`].
#[derive(Debug)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    async fn read_chunk(&self) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        lock(&self.script)
            .inbound
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut script = lock(&self.script);
        if script.fail_writes {
            return Err(TransportError::Io("write failed: device not responding".into()));
        }
        script.written.push(data.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            lock(&self.script).closes += 1;
        }
        Ok(())
    }
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

    #[tokio::test]
    async fn test_scripted_open_failures() {
        let mock = MockConnector::new();
        mock.fail_next_opens(2);

        assert!(mock.open("mock0", 9600).await.is_err());
        assert!(mock.open("mock0", 9600).await.is_err());
        assert!(mock.open("mock0", 9600).await.is_ok());
        assert_eq!(mock.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_delay() {
        let mock = MockConnector::new();
        mock.set_open_delay(Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        assert!(mock.open("mock0", 9600).await.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reads_follow_script() {
        let mock = MockConnector::new();
        let port = mock.open("mock0", 9600).await.unwrap();
        mock.push_inbound("CONFIRM\n");
        mock.push_read_error(TransportError::Io("unplugged".into()));

        assert_eq!(port.read_chunk().await.unwrap(), b"CONFIRM\n");
        assert!(port.read_chunk().await.is_err());
        assert!(port.read_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_io() {
        let mock = MockConnector::new();
        let port = mock.open("mock0", 9600).await.unwrap();

        port.write(b"BUSY\n").await.unwrap();
        port.close().unwrap();
        port.close().unwrap();

        assert_eq!(port.write(b"READY\n").await, Err(TransportError::NotConnected));
        assert_eq!(mock.written_lines(), vec!["BUSY"]);
        assert_eq!(mock.close_count(), 1);
    }
}
