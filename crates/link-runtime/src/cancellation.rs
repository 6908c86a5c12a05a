//! Cancellation utilities for interruptible link loops
//!
//! Every loop of a link session shares one [`ShutdownToken`]. Tripping the
//! token is cooperative: loops check it between steps, and their sleeps are
//! raced against it so they wake up within one poll interval.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default poll interval for cancellation checks (50ms)
const DEFAULT_CANCEL_POLL_MS: u64 = 50;

/// Shared shutdown flag for one link session
///
/// Clones observe the same flag. Once triggered it stays triggered; a new
/// session gets a new token.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop holding this token to stop
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Creates a future that completes when the token is triggered
///
/// Polls the flag every 50ms by default for responsive cancellation.
async fn create_cancel_future(token: ShutdownToken) {
    create_cancel_future_with_interval(token, DEFAULT_CANCEL_POLL_MS).await
}

/// Creates a cancel future with custom poll interval
async fn create_cancel_future_with_interval(token: ShutdownToken, poll_interval_ms: u64) {
    loop {
        if token.is_triggered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
    }
}

/// Races a future against cancellation, returns None if cancelled
///
/// # Example
/// ```ignore
/// match race_with_cancellation(transport.read_chunk(), token.clone()).await {
///     Some(Ok(bytes)) => framer.push(&bytes, now),
///     Some(Err(e)) => handle_error(e),
///     None => return, // session ended
/// }
/// ```
pub async fn race_with_cancellation<T, F>(fut: F, token: ShutdownToken) -> Option<T>
where
    F: Future<Output = T>,
{
    use futures::future::{select, Either};

    if token.is_triggered() {
        return None;
    }

    let cancel_fut = create_cancel_future(token);

    match select(Box::pin(fut), Box::pin(cancel_fut)).await {
        Either::Left((result, _)) => Some(result),
        Either::Right(_) => None,
    }
}

/// Sleep for `duration` unless the token fires first
///
/// Returns `true` if the full duration elapsed, `false` if cancelled.
pub async fn sleep_or_shutdown(duration: Duration, token: &ShutdownToken) -> bool {
    race_with_cancellation(tokio::time::sleep(duration), token.clone())
        .await
        .is_some()
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
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_future_completes_when_flag_set() {
        let token = ShutdownToken::new();
        let waiter = tokio::spawn(create_cancel_future_with_interval(token.clone(), 10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        token.trigger();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("cancel future should finish after trigger")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_returns_none_when_cancelled() {
        let token = ShutdownToken::new();
        token.trigger();

        let result = race_with_cancellation(
            async { tokio::time::sleep(Duration::from_secs(10)).await },
            token,
        )
        .await;

        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_returns_value_when_not_cancelled() {
        let result = race_with_cancellation(async { 7 }, ShutdownToken::new()).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown_wakes_early() {
        let token = ShutdownToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let completed = sleep_or_shutdown(Duration::from_secs(5), &token).await;

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown_full_duration() {
        let completed = sleep_or_shutdown(Duration::from_millis(300), &ShutdownToken::new()).await;
        assert!(completed);
    }
}
