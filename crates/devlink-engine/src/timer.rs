/*!
 * Shared sampling timers.
 *
 * One service backs every periodic operation. Each operation owns at most
 * one timer, keyed by its id; rescheduling aborts and replaces it. A
 * semaphore bounds how many ticks run at once across all operations.
 */
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use devlink_core::config::TimerConfig;
use devlink_core::types::Id;
use devlink_core::utils::current_handle;

use crate::error::Result;

/// Bounded pool of periodic timers
#[derive(Debug)]
pub struct TimerService {
    handle: Handle,
    timers: Mutex<HashMap<Id, JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    min_period: Duration,
}

impl TimerService {
    /// Create a service on the current runtime
    pub fn new(config: &TimerConfig) -> Result<Arc<Self>> {
        Ok(Self::with_handle(current_handle()?, config))
    }

    /// Create a service whose timers run on `handle`
    pub fn with_handle(handle: Handle, config: &TimerConfig) -> Arc<Self> {
        Arc::new(Self {
            handle,
            timers: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
            min_period: Duration::from_millis(config.min_period_ms),
        })
    }

    /// Run `tick` every `period` under `key`, replacing any timer already there
    pub fn schedule<F, Fut>(&self, key: Id, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(self.min_period).max(Duration::from_millis(1));
        let permits = self.permits.clone();
        let timer_key = key.clone();

        let timer = self.handle.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                trace!(timer = %timer_key, "tick");
                tick().await;
            }
        });

        if let Some(previous) = self.timers.lock().insert(key.clone(), timer) {
            previous.abort();
        }
        debug!(timer = %key, period_ms = period.as_millis() as u64, "timer scheduled");
    }

    /// Cancel and remove the timer under `key`
    pub fn cancel(&self, key: &Id) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.abort();
                debug!(timer = %key, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a timer is registered under `key`
    pub fn is_scheduled(&self, key: &Id) -> bool {
        self.timers.lock().contains_key(key)
    }

    /// Number of registered timers
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_tick(counter: &Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_reschedule_replaces_timer() {
        let timers = TimerService::new(&TimerConfig::default()).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timers.schedule(Id::from("op"), Duration::from_millis(10), counter_tick(&first));
        timers.schedule(Id::from("op"), Duration::from_millis(10), counter_tick(&second));
        assert_eq!(timers.active_timers(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(second.load(Ordering::SeqCst) > 0);

        assert!(timers.cancel(&Id::from("op")));
        assert!(!timers.cancel(&Id::from("op")));
        assert_eq!(timers.active_timers(), 0);

        let settled = second.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(second.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_cancelled_key_can_be_rescheduled() {
        let timers = TimerService::new(&TimerConfig::default()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Id::from("op"), Duration::from_millis(10), counter_tick(&counter));
        assert!(timers.cancel(&Id::from("op")));
        assert_eq!(timers.active_timers(), 0);

        timers.schedule(Id::from("op"), Duration::from_millis(10), counter_tick(&counter));
        assert_eq!(timers.active_timers(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert_eq!(timers.active_timers(), 1);
    }
}
