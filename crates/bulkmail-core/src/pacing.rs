//! Randomized pause between sends

use bulkmail_common::config::DispatchConfig;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Picks a uniform delay in `[min, max]` and sleeps it
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    min_ms: u64,
    max_ms: u64,
}

impl Pacer {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.pacing_min_ms, config.pacing_max_ms)
    }

    /// No delay at all
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Next delay
    pub fn next_delay(&self) -> Duration {
        let ms = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Sleep for the next delay. Returns false if `cancel` fired first.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delay_within_window() {
        let pacer = Pacer::new(2000, 5000);
        for _ in 0..100 {
            let delay = pacer.next_delay();
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_inverted_window_is_normalized() {
        let pacer = Pacer::new(50, 10);
        let delay = pacer.next_delay();
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(50));
        assert_eq!(Pacer::disabled().next_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_wakes_on_cancel() {
        let pacer = Pacer::new(60_000, 60_000);
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(async move { pacer.pause(&child).await });
        cancel.cancel();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_completes() {
        let pacer = Pacer::new(1000, 1000);
        assert!(pacer.pause(&CancellationToken::new()).await);
    }
}
