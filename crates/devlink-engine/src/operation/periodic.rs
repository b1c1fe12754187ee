/*!
 * Periodic operations.
 *
 * A periodic operation keeps one sampling period for all of its tasks. The
 * most recent request sets it. A period of zero halts sampling without
 * stopping the operation.
 */
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, Instrument};

use devlink_core::attribute::AttributeSet;
use devlink_core::logging::operation_span;
use devlink_core::types::Id;

use crate::error::{Error, Result};
use crate::operation::{check_period, Operation, OperationSpec, ScheduleRequest, StopCallback};
use crate::script::{Parameters, Script, ScriptExecutor};
use crate::task::{LiveTasks, OperationTask, TaskOwner};
use crate::timer::TimerService;

/// An operation that delivers records at a shared, adjustable rate
pub trait PeriodicOperation: Operation {
    /// Change the sampling period. Zero halts sampling; negative is rejected.
    fn set_period(&self, period_ms: i64) -> Result<()>;

    /// Current sampling period in milliseconds
    fn period_ms(&self) -> i64;
}

#[derive(Default)]
struct SamplingState {
    period_ms: i64,
    armed_ms: Option<i64>,
    parameters: Parameters,
}

/// Polls the device by re-running its script on every tick
pub struct SimulatedPeriodicOperation {
    spec: OperationSpec,
    script: Script,
    executor: Arc<dyn ScriptExecutor>,
    timers: Arc<TimerService>,
    live: LiveTasks,
    state: Mutex<SamplingState>,
    this: Weak<SimulatedPeriodicOperation>,
}

impl SimulatedPeriodicOperation {
    /// Create an operation sampling through `timers`
    pub fn new(
        spec: OperationSpec,
        script: Script,
        executor: Arc<dyn ScriptExecutor>,
        timers: Arc<TimerService>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            spec,
            script,
            executor,
            timers,
            live: LiveTasks::new(),
            state: Mutex::new(SamplingState::default()),
            this: this.clone(),
        })
    }

    /// Number of attached tasks
    pub fn task_count(&self) -> usize {
        self.live.len()
    }

    /// Bring the timer in line with the period and the attached tasks
    fn rearm(&self) {
        let mut state = self.state.lock();
        let wanted = (state.period_ms > 0 && self.live.len() > 0 && !self.live.is_stopped())
            .then_some(state.period_ms);
        if wanted == state.armed_ms {
            return;
        }
        state.armed_ms = wanted;

        match wanted {
            Some(period_ms) => {
                let this = self.this.clone();
                self.timers
                    .schedule(self.spec.id.clone(), Duration::from_millis(period_ms as u64), move || {
                        let this = this.clone();
                        async move {
                            if let Some(op) = this.upgrade() {
                                op.sample().await;
                            }
                        }
                    });
            }
            None => {
                self.timers.cancel(&self.spec.id);
            }
        }
    }

    async fn sample(&self) {
        let tasks = self.live.snapshot();
        if tasks.is_empty() {
            return;
        }
        let parameters = self.state.lock().parameters.clone();

        let span = operation_span("periodic", self.spec.id.as_str());
        match self.executor.execute(&self.script, &parameters).instrument(span).await {
            Ok(records) => {
                for task in &tasks {
                    for record in &records {
                        task.new_record(record);
                    }
                }
            }
            Err(e) => {
                debug!(operation = %self.spec.id, "sample failed: {}", e);
                let message = e.to_string();
                for task in &tasks {
                    task.notify_error(Error::script(&message), false);
                }
            }
        }
    }
}

impl TaskOwner for SimulatedPeriodicOperation {
    fn release(&self, task_id: &Id) {
        if self.live.remove(task_id) == 0 {
            self.rearm();
        }
    }
}

impl Operation for SimulatedPeriodicOperation {
    fn id(&self) -> &Id {
        &self.spec.id
    }

    fn attributes(&self) -> &AttributeSet {
        &self.spec.attributes
    }

    fn is_schedulable(&self) -> bool {
        !self.live.is_stopped()
    }

    fn schedule(&self, request: ScheduleRequest) -> Result<Arc<OperationTask>> {
        check_period(&self.spec.id, request.period_ms())?;
        let attributes = self.spec.validate(&request)?;
        let period_ms = request.period_ms();

        let owner: Weak<dyn TaskOwner> = self.this.clone();
        let (task, parameters) = request.into_task(&self.spec, attributes, owner);
        self.live.insert(task.clone(), &self.spec.id)?;

        {
            let mut state = self.state.lock();
            if let Some(period_ms) = period_ms {
                state.period_ms = period_ms;
            }
            state.parameters = parameters;
        }
        self.rearm();
        Ok(task)
    }

    fn stop(&self, on_stopped: StopCallback) {
        debug!(operation = %self.spec.id, "stopping periodic operation");
        for task in self.live.stop(on_stopped) {
            task.stop();
        }
        self.rearm();
    }
}

impl PeriodicOperation for SimulatedPeriodicOperation {
    fn set_period(&self, period_ms: i64) -> Result<()> {
        check_period(&self.spec.id, Some(period_ms))?;
        self.state.lock().period_ms = period_ms;
        self.rearm();
        Ok(())
    }

    fn period_ms(&self) -> i64 {
        self.state.lock().period_ms
    }
}

impl std::fmt::Debug for SimulatedPeriodicOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPeriodicOperation")
            .field("spec", &self.spec)
            .field("script", &self.script)
            .field("period_ms", &self.period_ms())
            .field("tasks", &self.task_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::FnExecutor;
    use crate::task::testing::{next_event, ChannelHandler, Event};
    use devlink_core::attribute::{Attribute, AttributeType};
    use devlink_core::config::TimerConfig;
    use devlink_core::record::Record;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counter_attr() -> Attribute {
        Attribute::new("periodic.count", AttributeType::Integer)
    }

    fn counting_operation() -> (Arc<SimulatedPeriodicOperation>, Arc<AtomicUsize>, Arc<TimerService>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let executor = FnExecutor::new(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
            async move { Ok(vec![Record::builder().set(counter_attr(), n).build()]) }.boxed()
        })
        .shared();
        let timers = TimerService::new(&TimerConfig::default()).unwrap();
        let spec = OperationSpec::new("periodic.counter", AttributeSet::from([counter_attr()]));
        let op = SimulatedPeriodicOperation::new(spec, Script::new("count", "COUNT"), executor, timers.clone());
        (op, runs, timers)
    }

    #[tokio::test]
    async fn test_ticks_fan_out_to_all_tasks() {
        let (op, _runs, timers) = counting_operation();
        let (h1, mut rx1) = ChannelHandler::new();
        let (h2, mut rx2) = ChannelHandler::new();

        op.schedule(ScheduleRequest::new(h1).with_period_ms(10)).unwrap();
        op.schedule(ScheduleRequest::new(h2)).unwrap();
        assert_eq!(timers.active_timers(), 1);

        assert!(matches!(next_event(&mut rx1).await, Event::Record(_)));
        assert!(matches!(next_event(&mut rx2).await, Event::Record(_)));
    }

    #[tokio::test]
    async fn test_period_zero_halts_delivery() {
        let (op, runs, timers) = counting_operation();
        let (handler, mut rx) = ChannelHandler::new();
        op.schedule(ScheduleRequest::new(handler).with_period_ms(100)).unwrap();
        assert_eq!(op.period_ms(), 100);

        assert!(matches!(next_event(&mut rx).await, Event::Record(_)));
        op.set_period(0).unwrap();
        assert_eq!(timers.active_timers(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_negative_period_rejected_without_side_effect() {
        let (op, _runs, timers) = counting_operation();
        let (handler, _rx) = ChannelHandler::new();

        let err = op.schedule(ScheduleRequest::new(handler.clone()).with_period_ms(-5)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(op.set_period(-1).is_err());
        assert_eq!(op.task_count(), 0);
        assert_eq!(op.period_ms(), 0);
        assert_eq!(timers.active_timers(), 0);
    }

    #[tokio::test]
    async fn test_last_task_stop_cancels_timer_and_stop_drains() {
        let (op, _runs, timers) = counting_operation();
        let (handler, _rx) = ChannelHandler::new();
        let task = op.schedule(ScheduleRequest::new(handler.clone()).with_period_ms(10)).unwrap();
        assert_eq!(timers.active_timers(), 1);

        assert!(task.stop());
        assert_eq!(timers.active_timers(), 0);

        op.schedule(ScheduleRequest::new(handler.clone()).with_period_ms(10)).unwrap();
        op.schedule(ScheduleRequest::new(handler)).unwrap();
        assert_eq!(timers.active_timers(), 1);

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        op.stop(Box::new(move || flag.store(true, Ordering::SeqCst)));

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(op.task_count(), 0);
        assert_eq!(timers.active_timers(), 0);
        assert!(!op.is_schedulable());
    }

    struct CountingHandler(AtomicUsize);

    impl crate::task::TaskHandler for CountingHandler {
        fn on_record(&self, _record: Record) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: Error, _fatal: bool) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_task_stops_during_ticks() {
        let executor = FnExecutor::new(|_, _| {
            async { Ok(vec![Record::builder().set(counter_attr(), 1i64).build()]) }.boxed()
        })
        .shared();
        let timers = TimerService::new(&TimerConfig {
            pool_size: 4,
            min_period_ms: 1,
        })
        .unwrap();
        let spec = OperationSpec::new("periodic.race", AttributeSet::from([counter_attr()]));
        let op = SimulatedPeriodicOperation::new(spec, Script::new("race", "COUNT"), executor, timers.clone());

        let mut scheduled = Vec::new();
        for _ in 0..8 {
            let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
            let task = op.schedule(ScheduleRequest::new(handler.clone()).with_period_ms(1)).unwrap();
            scheduled.push((task, handler));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduled.iter().any(|(_, h)| h.0.load(Ordering::SeqCst) == 0) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        // Stop half while more tasks join, then stop everything
        let mut joins = Vec::new();
        for (task, _) in scheduled.iter().take(4) {
            let task = task.clone();
            joins.push(tokio::spawn(async move { task.stop() }));
        }
        for _ in 0..4 {
            let op = op.clone();
            joins.push(tokio::spawn(async move {
                let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
                let task = op.schedule(ScheduleRequest::new(handler).with_period_ms(1)).unwrap();
                tokio::task::yield_now().await;
                task.stop()
            }));
        }
        for (task, _) in scheduled.iter().skip(4) {
            let task = task.clone();
            joins.push(tokio::spawn(async move { task.stop() }));
        }
        for join in joins {
            assert!(join.await.unwrap());
        }

        assert_eq!(op.task_count(), 0);
        assert_eq!(timers.active_timers(), 0);
        assert!(op.is_schedulable());

        let at_stop: Vec<usize> = scheduled.iter().map(|(_, h)| h.0.load(Ordering::SeqCst)).collect();
        tokio::time::sleep(Duration::from_millis(30)).await;
        for ((_, handler), before) in scheduled.iter().zip(at_stop) {
            let after = handler.0.load(Ordering::SeqCst);
            assert!(after <= before + 1, "{} deliveries after stop", after - before);
        }
    }
}
