//! Health monitor
//!
//! Wakes every `monitor_interval`; if the link dropped and auto-reconnect is
//! on, it runs `connect()`. A failed reconnect backs off for
//! `reconnect_interval` before the next poll.

use std::sync::Arc;

use core_types::Connector;
use link_protocol::{ConnectionState, LinkError};
use link_runtime::{link_debug, link_error, link_info, sleep_or_shutdown, ShutdownToken};

use crate::link::LinkCore;

pub(crate) async fn run<C: Connector>(core: Arc<LinkCore<C>>, token: ShutdownToken) {
    let config = &core.config;

    while !token.is_triggered() {
        if config.auto_reconnect && core.state() == ConnectionState::Disconnected {
            link_info!("Attempting to reconnect to {}", config.port);

            match core.connect(Some(&token)).await {
                Ok(()) => link_info!("Reconnected to {}", config.port),
                Err(LinkError::Cancelled) => break,
                Err(LinkError::ConnectInProgress) => {
                    link_debug!("Reconnect skipped, connect() already running");
                }
                Err(e) => {
                    link_error!(
                        "Reconnect failed, next attempt in {:?}: {}",
                        config.reconnect_interval(),
                        e
                    );
                    if !sleep_or_shutdown(config.reconnect_interval(), &token).await {
                        break;
                    }
                }
            }
        }

        if !sleep_or_shutdown(config.monitor_interval(), &token).await {
            break;
        }
    }
}
