//! Stop signal and session tracking for a running server.
//!
//! Sessions are spawned by the upgrade handler rather than by us, so each
//! one is wrapped with [`Shutdown::track`] to let [`Shutdown::drain`] wait
//! for their cleanup before presence is swept.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// True once a drain has begun; new upgrades are refused from then on.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so [`Shutdown::drain`] waits for it.
    pub fn track<F: Future>(&self, session: F) -> impl Future<Output = F::Output> {
        self.sessions.track_future(session)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel everything, then wait up to `timeout` for the accept loop and
    /// every tracked session to finish. Returns false on timeout.
    pub async fn drain(&self, accept_loop: JoinHandle<()>, timeout: Duration) -> bool {
        self.token.cancel();
        self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining connections"
        );

        let all = async {
            let _ = accept_loop.await;
            self.sessions.wait().await;
        };
        match tokio::time::timeout(timeout, all).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.sessions.len(),
                    "drain timed out, sweeping presence anyway"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_loop(token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { token.cancelled().await })
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_sessions() {
        let shutdown = Shutdown::new();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let token = shutdown.token();
        tokio::spawn(shutdown.track(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = done_tx.send(());
        }));
        assert_eq!(shutdown.active_sessions(), 1);

        let accept = idle_loop(shutdown.token());
        assert!(shutdown.drain(accept, Duration::from_secs(5)).await);
        assert!(shutdown.is_draining());
        assert_eq!(shutdown.active_sessions(), 0);
        assert!(done_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_sessions() {
        let shutdown = Shutdown::new();
        tokio::spawn(shutdown.track(tokio::time::sleep(Duration::from_secs(300))));

        let accept = idle_loop(shutdown.token());
        assert!(!shutdown.drain(accept, Duration::from_millis(100)).await);
        assert_eq!(shutdown.active_sessions(), 1);
    }
}
