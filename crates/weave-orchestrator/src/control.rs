use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Cooperative abort/pause signals shared by the coordinator and one executor.
/// Neither signal interrupts an agent call already in flight.
#[derive(Clone, Default)]
pub struct RunControl {
    cancel_token: CancellationToken,
    pause_signal: Arc<RwLock<bool>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub async fn aborted(&self) {
        self.cancel_token.cancelled().await
    }

    pub async fn pause(&self) {
        *self.pause_signal.write().await = true;
    }

    pub async fn resume(&self) {
        *self.pause_signal.write().await = false;
    }

    pub async fn is_paused(&self) -> bool {
        *self.pause_signal.read().await
    }

    /// Block at a loop boundary while paused. Returns `false` once aborted.
    pub async fn wait_while_paused(&self, poll_interval: Duration) -> bool {
        loop {
            if self.is_aborted() {
                return false;
            }
            if !self.is_paused().await {
                return true;
            }
            tokio::select! {
                _ = self.aborted() => return false,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Sleep for `delay` unless aborted first. Returns `false` on abort.
    pub async fn sleep_unless_aborted(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_aborted();
        }
        tokio::select! {
            _ = self.aborted() => false,
            _ = tokio::time::sleep(delay) => !self.is_aborted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unpaused_control_passes_immediately() {
        let control = RunControl::new();
        assert!(control.wait_while_paused(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn paused_control_waits_for_resume() {
        let control = RunControl::new();
        control.pause().await;

        let resumer = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            resumer.resume().await;
        });

        let started = tokio::time::Instant::now();
        assert!(control.wait_while_paused(Duration::from_millis(5)).await);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn abort_releases_a_paused_wait() {
        let control = RunControl::new();
        control.pause().await;

        let aborter = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.abort();
        });

        assert!(!control.wait_while_paused(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn abort_cuts_retry_delay_short() {
        let control = RunControl::new();
        control.abort();
        assert!(!control.sleep_unless_aborted(Duration::from_secs(60)).await);
    }
}
