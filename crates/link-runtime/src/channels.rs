use std::sync::Mutex;

use futures_channel::mpsc;
use link_protocol::{Command, LinkError, LinkEvent};

use crate::{link_debug, link_warn};

/// Producer side of a session's command queue
///
/// Bounded so a stalled device cannot grow memory without limit. Enqueueing
/// never blocks: a full queue is reported to the caller instead.
///
/// One sender is kept and reused. Cloning a `futures_channel` sender per send
/// would hand every clone its own guaranteed slot and defeat the bound.
pub struct CommandQueue {
    tx: Mutex<mpsc::Sender<Command>>,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue and the receiver the writer loop drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(tx),
                capacity,
            },
            rx,
        )
    }

    /// Enqueue without waiting
    ///
    /// A closed channel means the writer is gone (session ended), which is
    /// reported as `NotConnected`.
    pub fn enqueue(&self, command: Command) -> Result<(), LinkError> {
        let mut tx = self.tx.lock().map_err(|_| LinkError::NotConnected)?;
        tx.try_send(command).map_err(|e| {
            if e.is_disconnected() {
                LinkError::NotConnected
            } else {
                LinkError::QueueFull {
                    capacity: self.capacity,
                }
            }
        })
    }

    /// Stop accepting commands; the writer drains what is left and then sees
    /// the end of the stream.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.close_channel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|tx| tx.is_closed()).unwrap_or(true)
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Single-subscriber event outlet
///
/// `subscribe()` replaces the previous subscriber, whose stream then ends.
/// Emitting never blocks: with no subscriber the event is discarded, with a
/// full channel it is dropped and logged.
pub struct EventSink {
    tx: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    capacity: usize,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: Mutex::new(None),
            capacity,
        }
    }

    /// Register a new subscriber, dropping the previous one
    pub fn subscribe(&self) -> mpsc::Receiver<LinkEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut slot) = self.tx.lock() {
            *slot = Some(tx);
        }
        rx
    }

    pub fn has_subscriber(&self) -> bool {
        self.tx
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Deliver an event to the current subscriber, if any
    pub fn emit(&self, event: LinkEvent) {
        let Ok(mut slot) = self.tx.lock() else {
            return;
        };
        let Some(tx) = slot.as_mut() else {
            link_debug!("No subscriber, event discarded: {:?}", event);
            return;
        };

        if let Err(e) = tx.try_send(event) {
            if e.is_disconnected() {
                link_debug!("Subscriber went away, event discarded: {:?}", e.into_inner());
                *slot = None;
            } else {
                link_warn!("Event channel full, event dropped: {:?}", e.into_inner());
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("capacity", &self.capacity)
            .field("subscribed", &self.has_subscriber())
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
    use futures::stream::StreamExt;

    #[tokio::test]
    async fn test_command_queue_preserves_order() {
        let (queue, rx) = CommandQueue::channel(8);
        queue.enqueue(Command::Busy).unwrap();
        queue.enqueue(Command::Confidence(40)).unwrap();
        queue.enqueue(Command::Ready).unwrap();
        queue.close();

        let received: Vec<_> = rx.collect().await;
        assert_eq!(
            received,
            vec![Command::Busy, Command::Confidence(40), Command::Ready]
        );
    }

    #[test]
    fn test_command_queue_reports_closed_writer() {
        let (queue, rx) = CommandQueue::channel(8);
        drop(rx);
        assert_eq!(queue.enqueue(Command::Ready), Err(LinkError::NotConnected));
    }

    #[test]
    fn test_command_queue_reports_full() {
        let (queue, _rx) = CommandQueue::channel(1);
        let mut result = Ok(());
        for _ in 0..16 {
            result = queue.enqueue(Command::Busy);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(LinkError::QueueFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn test_event_sink_delivers_to_subscriber() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        assert!(sink.has_subscriber());

        sink.emit(LinkEvent::ConfirmPressed);
        assert_eq!(rx.next().await, Some(LinkEvent::ConfirmPressed));
    }

    #[tokio::test]
    async fn test_event_sink_replaces_subscriber() {
        let sink = EventSink::new(8);
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.emit(LinkEvent::StyleChanged { index: 2 });

        // Old subscriber's stream ends, new one gets the event
        assert_eq!(first.next().await, None);
        assert_eq!(second.next().await, Some(LinkEvent::StyleChanged { index: 2 }));
    }

    #[test]
    fn test_event_sink_without_subscriber_discards() {
        let sink = EventSink::new(8);
        sink.emit(LinkEvent::ConnectionChanged { connected: false });
        assert!(!sink.has_subscriber());
    }

    #[test]
    fn test_event_sink_forgets_dropped_subscriber() {
        let sink = EventSink::new(8);
        drop(sink.subscribe());
        sink.emit(LinkEvent::ConfirmPressed);
        assert!(!sink.has_subscriber());
    }
}
