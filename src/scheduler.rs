//! Periodic execution of the control cycle
//!
//! Cycles never overlap: the next tick is only awaited once the previous
//! cycle has returned, and missed ticks are delayed rather than bunched up.
//! The interval is re-read from the configuration after every tick.

use crate::config::{ConfigProvider, ControllerConfig, MAX_READ_INTERVAL_S};
use crate::error::{BoilerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unit of work run once per tick
#[async_trait]
pub trait CycleTask: Send + 'static {
    async fn tick(&mut self);
}

/// Drives a [`CycleTask`] at the configured read interval
pub struct Scheduler {
    provider: Arc<dyn ConfigProvider>,
}

impl Scheduler {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
        Self { provider }
    }

    /// Start the loop; the first cycle runs immediately
    pub fn spawn<T: CycleTask>(self, task: T) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(Self::run(self.provider, task, cancel.clone()));
        SchedulerHandle { cancel, join }
    }

    async fn run<T: CycleTask>(
        provider: Arc<dyn ConfigProvider>,
        mut task: T,
        cancel: CancellationToken,
    ) {
        let mut period = Self::period(&*provider.snapshot().await);
        let mut ticker = Self::ticker(period);
        info!(interval_s = period.as_secs(), "Control loop started");

        task.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let configured = Self::period(&*provider.snapshot().await);
            if configured != period {
                info!(
                    from_s = period.as_secs(),
                    to_s = configured.as_secs(),
                    "Read interval changed"
                );
                period = configured;
                ticker = Self::ticker(period);
            }

            debug!("Running control cycle");
            task.tick().await;
        }

        info!("Control loop stopped");
    }

    /// Read interval clamped to what `validate` accepts
    fn period(config: &ControllerConfig) -> Duration {
        let configured = config.read_interval();
        let period = configured.clamp(
            Duration::from_secs(1),
            Duration::from_secs(MAX_READ_INTERVAL_S),
        );
        if period != configured {
            warn!(
                configured_s = configured.as_secs(),
                used_s = period.as_secs(),
                "Read interval out of range, clamped"
            );
        }
        period
    }

    fn ticker(period: Duration) -> Interval {
        let now = Instant::now();
        let start = now.checked_add(period).unwrap_or(now);
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Token cancelling the loop; an in-flight cycle still completes
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for the current cycle to finish
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|e| BoilerError::internal(format!("Control loop task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, SharedConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl CycleTask for Counter {
        async fn tick(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn shared(read_interval_s: u64) -> Arc<SharedConfig> {
        Arc::new(SharedConfig::new(ControllerConfig {
            read_interval_s,
            ..Default::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_is_immediate_then_periodic() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Scheduler::new(shared(2)).spawn(Counter(count.clone()));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.stop().await.unwrap();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_after_next_tick() {
        let config = shared(2);
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Scheduler::new(config.clone()).spawn(Counter(count.clone()));

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        config.update(|c| c.read_interval_s = 5).await.unwrap();

        // Tick at 4s picks up the change, the next one follows 5s later.
        sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_interval_is_clamped() {
        // SharedConfig::new does not validate
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Scheduler::new(shared(u64::MAX)).spawn(Counter(count.clone()));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.stop().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let handle = Scheduler::new(shared(0)).spawn(Counter(count.clone()));

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.stop().await.unwrap();
    }
}
