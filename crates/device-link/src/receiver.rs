//! Receiver loop: device output to events
//!
//! Polls the port while connected, splits the byte stream into lines and
//! turns each recognised line into a [`LinkEvent`]. A read error reports the
//! link as lost; reconnecting is left to the health monitor.

use std::sync::Arc;

use core_types::{Connector, Frame, Transport};
use framing::{Framer, LineFramer};
use link_protocol::{InboundMessage, LinkEvent};
use link_runtime::{link_debug, link_warn, race_with_cancellation, sleep_or_shutdown, ShutdownToken};
use tokio::time::Instant;

use crate::link::LinkCore;

/// Microseconds since `started`, saturating
pub(crate) fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

pub(crate) async fn run<C: Connector>(
    core: Arc<LinkCore<C>>,
    token: ShutdownToken,
    started: Instant,
) {
    let config = &core.config;
    let mut framer = LineFramer::with_max_len(config.max_frame_len);

    while !token.is_triggered() {
        let Some(port) = core.connected_port() else {
            // A partial line from a previous connection is meaningless now
            framer.reset();
            if !sleep_or_shutdown(config.read_idle(), &token).await {
                break;
            }
            continue;
        };

        let pause = match race_with_cancellation(port.read_chunk(), token.clone()).await {
            None => break,
            Some(Ok(bytes)) if bytes.is_empty() => config.read_idle(),
            Some(Ok(bytes)) => {
                for frame in framer.push(&bytes, elapsed_us(started)) {
                    dispatch(&core, &frame);
                }
                let discarded = framer.take_discarded();
                if discarded > 0 {
                    link_warn!(
                        "Malformed frame from device: discarded {} bytes of an overlong line",
                        discarded
                    );
                }
                continue;
            }
            Some(Err(e)) => {
                core.mark_disconnected(&port, &e);
                framer.reset();
                config.error_backoff()
            }
        };

        if !sleep_or_shutdown(pause, &token).await {
            break;
        }
    }
}

fn dispatch<C: Connector>(core: &LinkCore<C>, frame: &Frame) {
    match InboundMessage::parse_bytes(&frame.bytes) {
        Ok(Some(message)) => {
            link_debug!("Received {:?} at {} us", message, frame.timestamp_us);
            core.events.emit(LinkEvent::from(message));
        }
        Ok(None) => {}
        Err(e) => link_warn!("{}", e),
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
    use crate::DeviceLink;
    use futures::StreamExt;
    use link_protocol::LinkConfig;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_overlong_line_is_skipped() {
        let mock = MockConnector::new();
        let mut config = LinkConfig::new("mock0", 9600);
        config.max_frame_len = 16;
        let link = DeviceLink::new(config, mock.clone());
        let mut events = link.subscribe();
        link.connect().await.unwrap();
        assert_eq!(
            events.next().await,
            Some(LinkEvent::ConnectionChanged { connected: true })
        );

        mock.push_inbound("STYLE:1STYLE:1STYLE:1STYLE:1\nSTYLE:4\n");

        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap();
        assert_eq!(event, Some(LinkEvent::StyleChanged { index: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_us_advances_with_clock() {
        let started = Instant::now();
        tokio::time::advance(Duration::from_millis(3)).await;
        assert_eq!(elapsed_us(started), 3_000);
    }
}
