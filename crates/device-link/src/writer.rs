//! Writer loop: queued commands to the wire
//!
//! Commands leave in the order they were queued. While the port is down the
//! writer keeps retrying the head command every `send_poll_interval`; a
//! command still unsent after `command_timeout` is dropped with one warning
//! and one [`LinkEvent::CommandTimedOut`].

use std::sync::Arc;

use core_types::{Connector, Frame, Transport};
use futures::StreamExt;
use futures_channel::mpsc;
use link_protocol::{Command, LinkError, LinkEvent};
use link_runtime::{
    link_debug, link_error, link_warn, race_with_cancellation, sleep_or_shutdown, ShutdownToken,
};
use tokio::time::Instant;

use crate::link::LinkCore;
use crate::receiver::elapsed_us;

pub(crate) async fn run<C: Connector>(
    core: Arc<LinkCore<C>>,
    mut commands: mpsc::Receiver<Command>,
    token: ShutdownToken,
    started: Instant,
) {
    loop {
        let next = race_with_cancellation(
            tokio::time::timeout(core.config.queue_poll(), commands.next()),
            token.clone(),
        )
        .await;

        let command = match next {
            None => break,
            // Idle poll, look at the token again
            Some(Err(_)) => continue,
            Some(Ok(None)) => break,
            Some(Ok(Some(command))) => command,
        };

        if !deliver(&core, command, &token, started).await {
            break;
        }
    }
}

/// Send one command, waiting for the port up to the command timeout.
///
/// Returns `false` if the session ended meanwhile.
async fn deliver<C: Connector>(
    core: &LinkCore<C>,
    command: Command,
    token: &ShutdownToken,
    started: Instant,
) -> bool {
    let timeout = core.config.command_timeout();
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(port) = core.connected_port() {
            let frame = Frame::new(command.to_wire(), elapsed_us(started));
            return match race_with_cancellation(port.write(&frame.bytes), token.clone()).await {
                None => false,
                Some(Ok(())) => {
                    link_debug!("Sent {} at {} us", command, frame.timestamp_us);
                    true
                }
                Some(Err(e)) => {
                    link_error!("Failed to send {}, dropped: {}", command, e);
                    core.mark_disconnected(&port, &e);
                    true
                }
            };
        }

        let now = Instant::now();
        if now >= deadline {
            link_warn!(
                "{}",
                LinkError::CommandTimeout {
                    command,
                    timeout_ms: core.config.command_timeout_ms,
                }
            );
            core.events.emit(LinkEvent::CommandTimedOut { command });
            return true;
        }

        let pause = core.config.send_poll_interval().min(deadline - now);
        if !sleep_or_shutdown(pause, token).await {
            return false;
        }
    }
}
