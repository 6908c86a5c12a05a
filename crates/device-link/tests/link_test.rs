//! End-to-end tests for the device link
//!
//! Every test drives a real `DeviceLink` (all three loops running) against
//! the in-memory `MockConnector`, on paused tokio time so retry delays and
//! timeouts elapse instantly but in order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use core_types::TransportError;
use device_link::{
    Command, ConnectionState, DeviceLink, LinkConfig, LinkError, LinkEvent, MockConnector,
};
use futures::stream::StreamExt;
use futures_channel::mpsc::Receiver;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(60);

fn config() -> LinkConfig {
    LinkConfig::new("mock0", 9600)
}

fn manual_config() -> LinkConfig {
    LinkConfig {
        auto_reconnect: false,
        ..config()
    }
}

async fn next_event(events: &mut Receiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(WAIT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Events already delivered, without waiting
fn drain(events: &mut Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = events.try_next() {
        out.push(event);
    }
    out
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn connected(connected: bool) -> LinkEvent {
    LinkEvent::ConnectionChanged { connected }
}

#[tokio::test(start_paused = true)]
async fn test_commands_are_sent_in_fifo_order() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    link.connect().await.unwrap();

    link.set_status(true).unwrap();
    link.set_confidence(83.0).unwrap();
    link.set_confidence(142.0).unwrap();
    link.set_confidence(-5.0).unwrap();
    link.set_status(false).unwrap();

    wait_until(|| mock.written().len() == 5).await;
    assert_eq!(
        mock.written_lines(),
        vec!["BUSY", "CONF:83", "CONF:100", "CONF:0", "READY"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_pair_on_the_wire() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    link.connect().await.unwrap();

    link.set_status(true).unwrap();
    link.set_status(false).unwrap();

    wait_until(|| mock.written().len() == 2).await;
    assert_eq!(mock.written(), vec![b"BUSY\n".to_vec(), b"READY\n".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_send_before_connect_is_rejected() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());

    assert_eq!(link.set_confidence(50.0), Err(LinkError::NotConnected));
    assert_eq!(link.set_status(true), Err(LinkError::NotConnected));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(mock.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_emits_single_disconnect() {
    let mock = MockConnector::new();
    mock.fail_all_opens(true);
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();

    let start = Instant::now();
    let result = link.connect().await;

    match result {
        Err(LinkError::PortUnavailable { port, attempts, .. }) => {
            assert_eq!(port, "mock0");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected PortUnavailable, got {:?}", other),
    }
    assert_eq!(mock.open_count(), 3);
    // Delay between attempts only, none after the last one
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
    assert_eq!(drain(&mut events), vec![connected(false)]);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    // The link stays usable
    mock.fail_all_opens(false);
    link.connect().await.unwrap();
    assert!(link.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connect_recovers_after_transient_failures() {
    let mock = MockConnector::new();
    mock.fail_next_opens(2);
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();

    link.connect().await.unwrap();

    assert_eq!(mock.open_count(), 3);
    assert_eq!(drain(&mut events), vec![connected(true)]);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_reconnects_after_read_error() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    let start = Instant::now();
    mock.push_read_error(TransportError::Io("device reports not connected".into()));

    assert_eq!(next_event(&mut events).await, connected(false));
    assert_eq!(next_event(&mut events).await, connected(true));

    let config = link.config();
    assert!(start.elapsed() <= config.monitor_interval() + config.reconnect_interval());
    assert!(link.is_connected());
    assert_eq!(mock.open_count(), 2);
    assert_eq!(mock.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_backs_off_after_failed_reconnect() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    mock.fail_next_opens(3);
    mock.push_read_error(TransportError::Io("unplugged".into()));

    // Lost, one exhausted reconnect round, then back
    assert_eq!(next_event(&mut events).await, connected(false));
    assert_eq!(next_event(&mut events).await, connected(false));
    let failed_at = Instant::now();
    assert_eq!(next_event(&mut events).await, connected(true));

    assert!(failed_at.elapsed() >= link.config().reconnect_interval());
    assert_eq!(mock.open_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_port_is_released_while_reconnecting() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    mock.fail_all_opens(true);
    mock.push_read_error(TransportError::Io("device reports not connected".into()));
    assert_eq!(next_event(&mut events).await, connected(false));

    // Closed before the monitor's first reopen, not after a later success
    assert_eq!(mock.close_count(), 1);
    assert_eq!(mock.open_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(mock.open_count() > 1);
    assert_eq!(mock.close_count(), 1);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_connect_between_attempts() {
    let mock = MockConnector::new();
    mock.fail_next_opens(1);
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();

    let (result, ()) = tokio::join!(link.connect(), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        link.disconnect();
    });

    assert_eq!(result, Err(LinkError::Cancelled));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(mock.open_count(), 1);
    assert_eq!(mock.close_count(), 0);
    assert_eq!(link.set_status(true), Err(LinkError::NotConnected));
    assert_eq!(drain(&mut events), vec![connected(false)]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_port_opened_after_it() {
    let mock = MockConnector::new();
    mock.set_open_delay(Duration::from_secs(1));
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();

    let (result, ()) = tokio::join!(link.connect(), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        link.disconnect();
    });

    assert_eq!(result, Err(LinkError::Cancelled));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(mock.open_count(), 1);
    assert_eq!(mock.close_count(), 1);
    assert_eq!(link.set_status(true), Err(LinkError::NotConnected));
    assert_eq!(drain(&mut events), vec![connected(false)]);

    // Nothing left running that could reopen it
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_timeout_drops_only_that_command() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(manual_config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    mock.push_read_error(TransportError::Io("unplugged".into()));
    assert_eq!(next_event(&mut events).await, connected(false));

    let start = Instant::now();
    link.set_confidence(50.0).unwrap();
    link.set_confidence(60.0).unwrap();

    assert_eq!(
        next_event(&mut events).await,
        LinkEvent::CommandTimedOut {
            command: Command::Confidence(50)
        }
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2200));
    assert!(mock.written().is_empty());

    // The second command has its own window and goes out once the port is back
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));
    wait_until(|| !mock.written().is_empty()).await;
    assert_eq!(mock.written_lines(), vec!["CONF:60"]);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_drops_command_and_disconnects() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(manual_config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    mock.set_write_failure(true);
    link.set_status(true).unwrap();

    assert_eq!(next_event(&mut events).await, connected(false));
    assert_eq!(link.state(), ConnectionState::Disconnected);

    mock.set_write_failure(false);
    link.connect().await.unwrap();
    link.set_status(false).unwrap();

    wait_until(|| !mock.written().is_empty()).await;
    assert_eq!(mock.written_lines(), vec!["READY"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();

    link.disconnect();
    link.disconnect();

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(drain(&mut events), vec![connected(false), connected(false)]);
    assert_eq!(mock.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_session() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    link.connect().await.unwrap();

    link.shutdown().await;

    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(link.set_status(true), Err(LinkError::NotConnected));
    assert_eq!(mock.close_count(), 1);

    // No monitor left to revive it
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.open_count(), 1);
    assert!(!link.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_lines_become_events() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());
    let mut events = link.subscribe();
    link.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, connected(true));

    mock.push_inbound("STY");
    mock.push_inbound("LE:2\r\nHELLO\n\nCONFIRM\n");

    assert_eq!(
        next_event(&mut events).await,
        LinkEvent::StyleChanged { index: 2 }
    );
    assert_eq!(next_event(&mut events).await, LinkEvent::ConfirmPressed);
    assert!(link.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_replaces_previous_subscriber() {
    let mock = MockConnector::new();
    let link = DeviceLink::new(config(), mock.clone());

    let mut first = link.subscribe();
    let mut second = link.subscribe();

    assert_eq!(first.next().await, None);

    link.connect().await.unwrap();
    assert_eq!(next_event(&mut second).await, connected(true));
}
