/// Supervision utilities for link loops
///
/// Loops are spawned as named tokio tasks and stop cooperatively when their
/// session's shutdown token fires. `LoopSet::join` waits for them with a
/// deadline and aborts any loop that overstays it, so teardown can never hang.
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{link_debug, link_warn};

/// Default deadline for all loops of a session to wind down
///
/// Loops poll their token at least once per configured poll interval
/// (1 s by default), so 3 s leaves headroom for an in-flight write.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Named background loops belonging to one link session
#[derive(Default)]
pub struct LoopSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl LoopSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` on the current tokio runtime as loop `name`
    ///
    /// Must be called from within a runtime.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            link_debug!("{} started", name);
            fut.await;
            link_debug!("{} stopped", name);
        });
        self.handles.push((name, handle));
    }

    /// Move every loop of `other` into this set. Loops that already
    /// finished, here or in `other`, are dropped.
    pub fn absorb(&mut self, other: LoopSet) {
        self.handles.extend(other.handles);
        self.handles.retain(|(_, handle)| !handle.is_finished());
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Loops that have not finished yet
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Wait for every loop to finish, aborting those still running at the
    /// deadline. Returns how many had to be aborted.
    pub async fn join(self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => link_warn!("{} ended abnormally: {}", name, e),
                Err(_) => {
                    link_warn!("{} did not stop within {:?}, aborting", name, timeout);
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        aborted
    }
}

impl std::fmt::Debug for LoopSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handles.iter().map(|(name, _)| name))
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
    use crate::cancellation::{sleep_or_shutdown, ShutdownToken};

    #[tokio::test(start_paused = true)]
    async fn test_join_waits_for_cooperative_loops() {
        let token = ShutdownToken::new();
        let mut loops = LoopSet::new();

        for name in ["monitor", "receiver"] {
            let token = token.clone();
            loops.spawn(name, async move {
                while !token.is_triggered() {
                    sleep_or_shutdown(Duration::from_millis(100), &token).await;
                }
            });
        }
        assert_eq!(loops.len(), 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(loops.running(), 2);

        token.trigger();
        assert_eq!(loops.join(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_aborts_stuck_loop() {
        let mut loops = LoopSet::new();
        loops.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert_eq!(loops.join(Duration::from_millis(500)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absorb_merges_sets() {
        let token = ShutdownToken::new();
        let mut first = LoopSet::new();
        let mut second = LoopSet::new();
        for (set, name) in [(&mut first, "a"), (&mut second, "b")] {
            let token = token.clone();
            set.spawn(name, async move {
                while !token.is_triggered() {
                    sleep_or_shutdown(Duration::from_millis(100), &token).await;
                }
            });
        }

        first.absorb(second);
        assert_eq!(first.len(), 2);
        assert!(!first.is_empty());

        token.trigger();
        assert_eq!(first.join(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absorb_drops_finished_loops() {
        let mut retired = LoopSet::new();
        for _ in 0..10 {
            let mut session = LoopSet::new();
            session.spawn("writer", async {});
            session.spawn("receiver", async {});
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(session.running(), 0);

            retired.absorb(session);
        }

        assert!(retired.is_empty());

        let mut stuck = LoopSet::new();
        stuck.spawn("monitor", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        retired.absorb(stuck);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired.join(Duration::from_millis(100)).await, 1);
    }
}
