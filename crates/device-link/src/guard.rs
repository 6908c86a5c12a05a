//! Scoped connection
//!
//! A [`LinkGuard`] connects on creation and disconnects when it goes out of
//! scope, including on early return and unwinding.

use std::ops::Deref;

use core_types::Connector;
use link_protocol::LinkError;

use crate::link::DeviceLink;

/// Keeps a [`DeviceLink`] connected for the guard's lifetime.
///
/// ```ignore
/// {
///     let link = link.connect_scoped().await?;
///     link.set_confidence(91.0)?;
/// } // disconnected here
/// ```
#[must_use = "the link disconnects as soon as the guard is dropped"]
pub struct LinkGuard<'a, C: Connector> {
    link: &'a DeviceLink<C>,
    released: bool,
}

impl<'a, C: Connector> LinkGuard<'a, C> {
    /// Connect `link` and guard the connection.
    pub async fn connect(link: &'a DeviceLink<C>) -> Result<Self, LinkError> {
        link.connect().await?;
        Ok(Self {
            link,
            released: false,
        })
    }

    /// Disconnect and wait for the session loops to finish.
    pub async fn release(mut self) {
        self.released = true;
        self.link.shutdown().await;
    }
}

impl<C: Connector> Deref for LinkGuard<'_, C> {
    type Target = DeviceLink<C>;

    fn deref(&self) -> &DeviceLink<C> {
        self.link
    }
}

impl<C: Connector> Drop for LinkGuard<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            self.link.disconnect();
        }
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
    use link_protocol::{ConnectionState, LinkConfig, LinkEvent};

    #[tokio::test(start_paused = true)]
    async fn test_guard_disconnects_on_drop() {
        let mock = MockConnector::new();
        let link = DeviceLink::new(LinkConfig::new("mock0", 9600), mock.clone());
        let mut events = link.subscribe();

        {
            let guard = link.connect_scoped().await.unwrap();
            assert!(guard.is_connected());
            guard.set_status(true).unwrap();
        }

        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(mock.close_count(), 1);
        assert_eq!(
            events.try_next().unwrap(),
            Some(LinkEvent::ConnectionChanged { connected: true })
        );
        assert_eq!(
            events.try_next().unwrap(),
            Some(LinkEvent::ConnectionChanged { connected: false })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_disconnects_once() {
        let mock = MockConnector::new();
        let link = DeviceLink::new(LinkConfig::new("mock0", 9600), mock.clone());

        let guard = LinkGuard::connect(&link).await.unwrap();
        let mut events = link.subscribe();
        guard.release().await;

        assert_eq!(
            events.try_next().unwrap(),
            Some(LinkEvent::ConnectionChanged { connected: false })
        );
        assert!(events.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_yields_no_guard() {
        let mock = MockConnector::new();
        mock.fail_all_opens(true);
        let link = DeviceLink::new(LinkConfig::new("mock0", 9600), mock.clone());

        let result = link.connect_scoped().await;

        assert!(matches!(result, Err(LinkError::PortUnavailable { .. })));
        assert_eq!(mock.open_count(), 3);
    }
}
