//! Connection manager
//!
//! [`DeviceLink`] owns the configured port for its lifetime. Every successful
//! `connect()` from a disconnected, session-less link starts a *session*: a
//! shutdown token, a command queue and the monitor/receiver/writer loops.
//! Reconnects performed inside a session (by the health monitor or by the
//! caller) reuse the running loops. `disconnect()` ends the session.
//!
//! ## Shared state
//!
//! ```text
//!             ┌──────────── LinkCore ────────────┐
//!  caller ───►│ state: AtomicU8                  │◄─── monitor
//!             │ port:  Mutex<Option<Arc<T>>>     │◄─── receiver
//!             │ session: token + queue + loops   │◄─── writer
//!             │ events: EventSink                │───► subscriber
//!             └──────────────────────────────────┘
//! ```
//!
//! Locks are held only for slot swaps and never across an `.await`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use core_types::{Connector, Transport, TransportError};
use link_protocol::{Command, ConnectionState, LinkConfig, LinkError, LinkEvent};
use link_runtime::{
    link_error, link_info, link_warn, CommandQueue, EventSink, LoopSet, ShutdownToken,
    DEFAULT_JOIN_TIMEOUT,
};

use crate::guard::LinkGuard;
use crate::{monitor, receiver, writer};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One connect..disconnect lifetime of the background loops
struct Session {
    token: ShutdownToken,
    queue: CommandQueue,
    loops: LoopSet,
}

pub(crate) struct LinkCore<C: Connector> {
    pub(crate) config: LinkConfig,
    connector: C,
    state: AtomicU8,
    port: Mutex<Option<Arc<C::Transport>>>,
    session: Mutex<Option<Session>>,
    /// Loops of ended sessions, waiting to be joined by `shutdown()`
    retired: Mutex<LoopSet>,
    pub(crate) events: EventSink,
}

impl<C: Connector> LinkCore<C> {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The open port, if the link is currently connected
    pub(crate) fn connected_port(&self) -> Option<Arc<C::Transport>> {
        if !self.state().is_connected() {
            return None;
        }
        lock(&self.port).clone()
    }

    /// Open the port, retrying up to `max_retries` times.
    ///
    /// `owner` is the session token of the loop calling this (the health
    /// monitor). Once it fires the attempt is abandoned, so a torn-down
    /// session can never start a new one.
    pub(crate) async fn connect(
        self: &Arc<Self>,
        owner: Option<&ShutdownToken>,
    ) -> Result<(), LinkError> {
        if let Err(current) = self.state.compare_exchange(
            ConnectionState::Disconnected.to_u8(),
            ConnectionState::Connecting.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match ConnectionState::from_u8(current) {
                Some(ConnectionState::Connected) => Ok(()),
                _ => Err(LinkError::ConnectInProgress),
            };
        }

        let port = &self.config.port;
        let attempts = self.config.max_retries;
        let mut last_error = TransportError::NotConnected;

        for attempt in 1..=attempts {
            if self.abandoned(owner) {
                return Err(LinkError::Cancelled);
            }

            match self.connector.open(port, self.config.baud_rate).await {
                Ok(transport) => return self.finish_connect(transport, owner),
                Err(e) => {
                    link_error!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        port,
                        e
                    );
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        if self.abandoned(owner)
            || !self.transition(ConnectionState::Connecting, ConnectionState::Disconnected)
        {
            return Err(LinkError::Cancelled);
        }

        let err = LinkError::PortUnavailable {
            port: port.clone(),
            attempts,
            reason: last_error.to_string(),
        };
        link_error!("{}", err);
        self.events.emit(LinkEvent::ConnectionChanged { connected: false });
        Err(err)
    }

    /// True if `disconnect()` ran during a connect, or the owning session
    /// ended. Leaves the state Disconnected in the latter case.
    fn abandoned(&self, owner: Option<&ShutdownToken>) -> bool {
        if self.state() != ConnectionState::Connecting {
            return true;
        }
        if owner.is_some_and(ShutdownToken::is_triggered) {
            self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
            return true;
        }
        false
    }

    fn finish_connect(
        self: &Arc<Self>,
        transport: C::Transport,
        owner: Option<&ShutdownToken>,
    ) -> Result<(), LinkError> {
        let transport = Arc::new(transport);

        // Held until the session is settled; disconnect() takes it first.
        let mut session = lock(&self.session);

        if owner.is_some_and(ShutdownToken::is_triggered) {
            self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
            return Err(self.abandon_port(&transport));
        }

        // The slot is filled before the state flips so loops never see
        // Connected with a stale port.
        if let Some(stale) = lock(&self.port).replace(Arc::clone(&transport)) {
            let _ = stale.close();
        }

        if !self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            let mut slot = lock(&self.port);
            if slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, &transport)) {
                slot.take();
            }
            drop(slot);
            return Err(self.abandon_port(&transport));
        }

        link_info!(
            "Connected to {} at {} baud",
            self.config.port,
            self.config.baud_rate
        );
        self.events.emit(LinkEvent::ConnectionChanged { connected: true });

        if session.is_none() {
            *session = Some(self.start_session());
        }
        Ok(())
    }

    fn abandon_port(&self, transport: &C::Transport) -> LinkError {
        if let Err(e) = transport.close() {
            link_warn!("Failed to close abandoned port {}: {}", self.config.port, e);
        }
        LinkError::Cancelled
    }

    fn start_session(self: &Arc<Self>) -> Session {
        let token = ShutdownToken::new();
        let (queue, commands) = CommandQueue::channel(self.config.command_queue_capacity);
        let started = tokio::time::Instant::now();

        let mut loops = LoopSet::new();
        loops.spawn(
            "receiver",
            receiver::run(Arc::clone(self), token.clone(), started),
        );
        loops.spawn(
            "writer",
            writer::run(Arc::clone(self), commands, token.clone(), started),
        );
        loops.spawn("monitor", monitor::run(Arc::clone(self), token.clone()));

        Session {
            token,
            queue,
            loops,
        }
    }

    /// Record a mid-session I/O failure on `port`.
    ///
    /// Only the Connected -> Disconnected edge is reported, and only while
    /// `port` is still the current one; errors from a replaced port are
    /// ignored. The failed port is closed at once so the device can be
    /// reopened by the monitor.
    pub(crate) fn mark_disconnected(&self, port: &Arc<C::Transport>, error: &TransportError) {
        let failed = {
            let mut slot = lock(&self.port);
            let current = slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, port));
            if !current
                || !self.transition(ConnectionState::Connected, ConnectionState::Disconnected)
            {
                return;
            }
            slot.take()
        };

        link_warn!(
            "Lost connection to {}: {}",
            self.config.port,
            LinkError::from(error.clone())
        );
        if let Some(failed) = failed {
            if let Err(e) = failed.close() {
                link_warn!("Error closing {}: {}", self.config.port, e);
            }
        }
        self.events.emit(LinkEvent::ConnectionChanged { connected: false });
    }

    pub(crate) fn disconnect(&self) {
        // Abandons any connect() in flight
        let previous = self.set_disconnected();

        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.token.trigger();
            session.queue.close();
            lock(&self.retired).absorb(session.loops);
        }

        let port = lock(&self.port).take();
        if let Some(port) = port {
            if let Err(e) = port.close() {
                link_warn!("Error closing {}: {}", self.config.port, e);
            }
        }

        // A monitor connect that won the race above is undone here
        let undone = self.set_disconnected();
        if previous != ConnectionState::Disconnected || undone != ConnectionState::Disconnected {
            link_info!("Disconnected from {}", self.config.port);
        }
        self.events.emit(LinkEvent::ConnectionChanged { connected: false });
    }

    fn set_disconnected(&self) -> ConnectionState {
        let previous = self
            .state
            .swap(ConnectionState::Disconnected.to_u8(), Ordering::AcqRel);
        ConnectionState::from_u8(previous).unwrap_or(ConnectionState::Disconnected)
    }

    fn is_active(&self) -> bool {
        self.state() != ConnectionState::Disconnected || lock(&self.session).is_some()
    }

    fn enqueue(&self, command: Command) -> Result<(), LinkError> {
        let session = lock(&self.session);
        let Some(session) = session.as_ref() else {
            link_warn!("Cannot send {}: link is not connected", command);
            return Err(LinkError::NotConnected);
        };

        session.queue.enqueue(command).map_err(|e| {
            link_warn!("Cannot send {}: {}", command, e);
            e
        })
    }
}

/// Serial link to the companion microcontroller.
///
/// Dropping the link disconnects it.
///
/// # Example
/// ```ignore
/// let link = DeviceLink::new(LinkConfig::new("/dev/ttyUSB0", 9600), SerialConnector::new());
/// let mut events = link.subscribe();
/// link.connect().await?;
///
/// link.set_status(true)?;
/// link.set_confidence(83.0)?;
/// link.set_status(false)?;
/// ```
pub struct DeviceLink<C: Connector> {
    core: Arc<LinkCore<C>>,
}

impl<C: Connector> DeviceLink<C> {
    /// Create a disconnected link. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: LinkConfig, connector: C) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self {
            core: Arc::new(LinkCore {
                config,
                connector,
                state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
                port: Mutex::new(None),
                session: Mutex::new(None),
                retired: Mutex::new(LoopSet::new()),
                events,
            }),
        }
    }

    /// Open the port and start the session loops.
    ///
    /// Returns immediately if already connected. On failure a single
    /// `ConnectionChanged { connected: false }` is emitted; the link stays
    /// usable and `connect()` may be called again.
    ///
    /// # Errors
    ///
    /// - `PortUnavailable` when every attempt failed
    /// - `ConnectInProgress` when another `connect()` is running
    /// - `Cancelled` when `disconnect()` interrupted the attempt
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.core.connect(None).await
    }

    /// Connect and return a guard that disconnects when dropped.
    pub async fn connect_scoped(&self) -> Result<LinkGuard<'_, C>, LinkError> {
        LinkGuard::connect(self).await
    }

    /// Stop the session loops and close the port.
    ///
    /// Idempotent: always ends in Disconnected and always emits
    /// `ConnectionChanged { connected: false }`. Loops stop on their own
    /// within one poll interval; use [`shutdown`](Self::shutdown) to wait
    /// for them.
    pub fn disconnect(&self) {
        self.core.disconnect();
    }

    /// `disconnect()`, then wait for the loops of every ended session.
    pub async fn shutdown(&self) {
        self.core.disconnect();

        let loops = std::mem::take(&mut *lock(&self.core.retired));
        let aborted = loops.join(DEFAULT_JOIN_TIMEOUT).await;
        if aborted > 0 {
            link_warn!("{} loop(s) had to be aborted during shutdown", aborted);
        }
    }

    /// Queue a confidence level (0-100, clamped) for the LED bar.
    pub fn set_confidence(&self, value: f64) -> Result<(), LinkError> {
        self.core.enqueue(Command::confidence(value))
    }

    /// Queue `BUSY` (`true`) or `READY` (`false`) for the status LED.
    pub fn set_status(&self, busy: bool) -> Result<(), LinkError> {
        self.core.enqueue(Command::status(busy))
    }

    /// Receive link events. Replaces any previous subscriber.
    pub fn subscribe(&self) -> futures_channel::mpsc::Receiver<LinkEvent> {
        self.core.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn is_connected(&self) -> bool {
        self.core.state().is_connected()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.core.config
    }
}

impl<C: Connector> Drop for DeviceLink<C> {
    fn drop(&mut self) {
        if self.core.is_active() {
            self.core.disconnect();
        }
    }
}

impl<C: Connector> std::fmt::Debug for DeviceLink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.core.config.port)
            .field("state", &self.core.state())
            .field("events", &self.core.events)
            .finish()
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
    use crate::mock::MockConnector;

    fn test_link(mock: &MockConnector) -> DeviceLink<MockConnector> {
        DeviceLink::new(LinkConfig::new("mock0", 9600), mock.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_sets_state_and_starts_loops() {
        let mock = MockConnector::new();
        let link = test_link(&mock);
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.connect().await.unwrap();

        assert!(link.is_connected());
        assert_eq!(lock(&link.core.session).as_ref().map(|s| s.loops.len()), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_connected_is_noop() {
        let mock = MockConnector::new();
        let link = test_link(&mock);

        link.connect().await.unwrap();
        link.connect().await.unwrap();

        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_is_rejected() {
        let mock = MockConnector::new();
        let link = test_link(&mock);
        link.core.state.store(ConnectionState::Connecting.to_u8(), Ordering::Release);

        assert_eq!(link.connect().await, Err(LinkError::ConnectInProgress));
        assert_eq!(mock.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggered_owner_abandons_connect() {
        let mock = MockConnector::new();
        let link = test_link(&mock);
        let token = ShutdownToken::new();
        token.trigger();

        assert_eq!(link.core.connect(Some(&token)).await, Err(LinkError::Cancelled));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(lock(&link.core.session).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_retires_session() {
        let mock = MockConnector::new();
        let link = test_link(&mock);
        link.connect().await.unwrap();

        link.disconnect();

        assert!(lock(&link.core.session).is_none());
        assert!(lock(&link.core.port).is_none());
        assert_eq!(lock(&link.core.retired).len(), 3);
        assert_eq!(mock.close_count(), 1);

        link.shutdown().await;
        assert!(lock(&link.core.retired).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_requires_session() {
        let mock = MockConnector::new();
        let link = test_link(&mock);

        assert_eq!(link.set_status(true), Err(LinkError::NotConnected));

        link.connect().await.unwrap();
        assert_eq!(link.set_status(true), Ok(()));

        link.disconnect();
        assert_eq!(link.set_confidence(10.0), Err(LinkError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_disconnects() {
        let mock = MockConnector::new();
        let link = test_link(&mock);
        link.connect().await.unwrap();

        drop(link);

        assert_eq!(mock.close_count(), 1);
    }
}
