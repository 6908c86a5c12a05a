//! Native serial port transport built on the `serialport` crate.
//!
//! The port is opened 8N1 without flow control and with a short read
//! timeout. Reader and writer get separate handles (`try_clone`) so a
//! pending read never holds up a write. All blocking calls run on tokio's
//! blocking pool.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use core_types::{Connector, Transport, TransportError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Read timeout used when none is configured
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// One OS handle; `None` once the transport is closed
type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Opens [`SerialTransport`]s by port name.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    read_timeout: Duration,
}

impl SerialConnector {
    pub fn new() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SerialConnector {
    type Transport = SerialTransport;

    async fn open(&self, port: &str, baud_rate: u32) -> Result<SerialTransport, TransportError> {
        let port = port.to_string();
        let timeout = self.read_timeout;

        tokio::task::spawn_blocking(move || SerialTransport::open_blocking(&port, baud_rate, timeout))
            .await
            .map_err(|e| TransportError::Other(format!("open task failed: {}", e)))?
    }
}

/// An open serial port.
///
/// [`Transport::close`] drops both OS handles, so the device node can be
/// reopened right away. A handle busy in a blocking call is dropped by that
/// call when it returns.
pub struct SerialTransport {
    name: String,
    reader: SharedPort,
    writer: SharedPort,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    fn open_blocking(
        name: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(name, baud_rate)
            .timeout(timeout)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", name, e)))?;

        let writer = port
            .try_clone()
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: clone failed: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            reader: Arc::new(Mutex::new(Some(port))),
            writer: Arc::new(Mutex::new(Some(writer))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

/// Run `op` on the handle in `slot` from the blocking pool, releasing the
/// handle afterwards if the transport was closed meanwhile.
async fn with_port<T, F>(
    slot: &SharedPort,
    closed: &Arc<AtomicBool>,
    what: &'static str,
    op: F,
) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn SerialPort>) -> Result<T, TransportError> + Send + 'static,
{
    let slot = Arc::clone(slot);
    let closed = Arc::clone(closed);

    tokio::task::spawn_blocking(move || {
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match guard.as_mut() {
            Some(port) => op(port),
            None => Err(TransportError::NotConnected),
        };
        if closed.load(Ordering::Acquire) {
            guard.take();
        }
        result
    })
    .await
    .map_err(|e| TransportError::Other(format!("{} task failed: {}", what, e)))?
}

fn release(slot: &SharedPort) {
    match slot.try_lock() {
        Ok(mut guard) => drop(guard.take()),
        Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
        // The blocking call holding it drops the handle on return
        Err(TryLockError::WouldBlock) => {}
    }
}

impl Transport for SerialTransport {
    async fn read_chunk(&self) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;

        with_port(&self.reader, &self.closed, "read", |port| {
            let pending = port
                .bytes_to_read()
                .map_err(|e| TransportError::Io(e.to_string()))?;
            if pending == 0 {
                return Ok(Vec::new());
            }

            let mut buf = vec![0u8; pending as usize];
            match port.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let data = data.to_vec();

        with_port(&self.writer, &self.closed, "write", move |port| {
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        release(&self.reader);
        release(&self.writer);
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Names of the serial ports present on this machine
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| TransportError::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let connector = SerialConnector::new();
        let result = connector.open("/dev/device-link-does-not-exist", 9600).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn test_default_read_timeout() {
        let connector = SerialConnector::default();
        assert_eq!(connector.read_timeout, DEFAULT_READ_TIMEOUT);
    }
}
