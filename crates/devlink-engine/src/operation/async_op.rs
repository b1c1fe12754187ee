/*!
 * Push-driven operations.
 *
 * The start script runs once; afterwards every record comes from a pushed
 * message. The same live feed can answer a single "get" through
 * [`AsyncOneoffView`] or a standing subscription through
 * [`AsyncPeriodicView`].
 */
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, Instrument};

use devlink_core::attribute::AttributeSet;
use devlink_core::logging::operation_span;
use devlink_core::types::Id;
use devlink_core::utils::{current_handle, spawn_and_log};
use devlink_devices::{AsyncIoHandler, Payload};

use crate::error::{Error, Result};
use crate::message::MessageHandler;
use crate::operation::periodic::PeriodicOperation;
use crate::operation::{check_period, Operation, OperationSpec, ScheduleRequest, StopCallback};
use crate::script::{Parameters, Script, ScriptExecutor};
use crate::task::{LiveTasks, OperationTask, TaskOwner};

/// Operation fed entirely by unsolicited messages
pub struct AsyncOperation {
    spec: OperationSpec,
    start_script: Script,
    executor: Arc<dyn ScriptExecutor>,
    message_handler: Arc<dyn MessageHandler>,
    handle: Handle,
    live: LiveTasks,
    single_shot: Mutex<HashSet<Id>>,
    started: AtomicBool,
    period_ms: AtomicI64,
    this: Weak<AsyncOperation>,
}

impl AsyncOperation {
    /// Create an operation on the current runtime
    pub fn new(
        spec: OperationSpec,
        start_script: Script,
        executor: Arc<dyn ScriptExecutor>,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<Self>> {
        Ok(Self::with_handle(current_handle()?, spec, start_script, executor, message_handler))
    }

    /// Create an operation whose start script runs on `handle`
    pub fn with_handle(
        handle: Handle,
        spec: OperationSpec,
        start_script: Script,
        executor: Arc<dyn ScriptExecutor>,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            spec,
            start_script,
            executor,
            message_handler,
            handle,
            live: LiveTasks::new(),
            single_shot: Mutex::new(HashSet::new()),
            started: AtomicBool::new(false),
            period_ms: AtomicI64::new(0),
            this: this.clone(),
        })
    }

    /// This operation seen as a one-shot "get"
    pub fn oneoff_view(self: &Arc<Self>) -> AsyncOneoffView {
        AsyncOneoffView(self.clone())
    }

    /// This operation seen as a standing periodic subscription
    pub fn periodic_view(self: &Arc<Self>) -> AsyncPeriodicView {
        AsyncPeriodicView(self.clone())
    }

    /// Whether the start script has been issued
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of attached tasks
    pub fn task_count(&self) -> usize {
        self.live.len()
    }

    fn schedule_with(&self, request: ScheduleRequest, single_shot: bool) -> Result<Arc<OperationTask>> {
        check_period(&self.spec.id, request.period_ms())?;
        let attributes = self.spec.validate(&request)?;
        if let Some(period_ms) = request.period_ms() {
            self.period_ms.store(period_ms, Ordering::Release);
        }

        let owner: Weak<dyn TaskOwner> = self.this.clone();
        let (task, parameters) = request.into_task(&self.spec, attributes, owner);
        if single_shot {
            self.single_shot.lock().insert(task.id().clone());
        }
        if let Err(e) = self.live.insert(task.clone(), &self.spec.id) {
            self.single_shot.lock().remove(task.id());
            return Err(e);
        }

        self.ensure_started(parameters);
        Ok(task)
    }

    fn ensure_started(&self, parameters: Parameters) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let this = self.this.clone();
        let span = operation_span("async", self.spec.id.as_str());
        spawn_and_log(
            &self.handle,
            "async start script",
            async move {
                let op = match this.upgrade() {
                    Some(op) => op,
                    None => return Ok(()),
                };
                debug!(operation = %op.spec.id, "running start script");
                if let Err(e) = op.executor.execute(&op.start_script, &parameters).await {
                    op.started.store(false, Ordering::Release);
                    let message = e.to_string();
                    for task in op.live.snapshot() {
                        task.notify_error(Error::script(&message), false);
                    }
                    return Err(message);
                }
                Ok(())
            }
            .instrument(span),
        );
    }
}

impl AsyncIoHandler for AsyncOperation {
    fn on_message(&self, payload: Payload) {
        if !self.message_handler.accepts(&payload) {
            return;
        }
        let tasks = self.live.snapshot();
        if tasks.is_empty() {
            trace!(operation = %self.spec.id, "push ignored, no subscribers");
            return;
        }

        match self.message_handler.decode(&payload) {
            Ok(record) => {
                for task in tasks {
                    task.new_record(&record);
                    let single_shot = self.single_shot.lock().contains(task.id());
                    if single_shot {
                        task.complete();
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                for task in tasks {
                    task.notify_error(Error::message(&message), false);
                }
            }
        }
    }
}

impl TaskOwner for AsyncOperation {
    fn release(&self, task_id: &Id) {
        self.single_shot.lock().remove(task_id);
        self.live.remove(task_id);
    }
}

impl Operation for AsyncOperation {
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
        self.schedule_with(request, false)
    }

    fn stop(&self, on_stopped: StopCallback) {
        debug!(operation = %self.spec.id, "stopping async operation");
        for task in self.live.stop(on_stopped) {
            task.stop();
        }
    }
}

impl std::fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("spec", &self.spec)
            .field("message_handler", &self.message_handler)
            .field("started", &self.is_started())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// An [`AsyncOperation`] whose tasks complete after their first record
#[derive(Debug, Clone)]
pub struct AsyncOneoffView(Arc<AsyncOperation>);

impl Operation for AsyncOneoffView {
    fn id(&self) -> &Id {
        self.0.id()
    }

    fn attributes(&self) -> &AttributeSet {
        self.0.attributes()
    }

    fn is_schedulable(&self) -> bool {
        self.0.is_schedulable()
    }

    fn schedule(&self, request: ScheduleRequest) -> Result<Arc<OperationTask>> {
        self.0.schedule_with(request, true)
    }

    fn stop(&self, on_stopped: StopCallback) {
        self.0.stop(on_stopped)
    }
}

/// An [`AsyncOperation`] as a standing subscription
///
/// The device decides the rate; the period is recorded but only validated.
#[derive(Debug, Clone)]
pub struct AsyncPeriodicView(Arc<AsyncOperation>);

impl Operation for AsyncPeriodicView {
    fn id(&self) -> &Id {
        self.0.id()
    }

    fn attributes(&self) -> &AttributeSet {
        self.0.attributes()
    }

    fn is_schedulable(&self) -> bool {
        self.0.is_schedulable()
    }

    fn schedule(&self, request: ScheduleRequest) -> Result<Arc<OperationTask>> {
        self.0.schedule_with(request, false)
    }

    fn stop(&self, on_stopped: StopCallback) {
        self.0.stop(on_stopped)
    }
}

impl PeriodicOperation for AsyncPeriodicView {
    fn set_period(&self, period_ms: i64) -> Result<()> {
        check_period(&self.0.spec.id, Some(period_ms))?;
        self.0.period_ms.store(period_ms, Ordering::Release);
        Ok(())
    }

    fn period_ms(&self) -> i64 {
        self.0.period_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JsonMessageHandler;
    use crate::script::FnExecutor;
    use crate::task::testing::{next_event, ChannelHandler, Event};
    use devlink_core::attribute::{Attribute, AttributeType};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn level() -> Attribute {
        Attribute::new("async.level", AttributeType::Integer)
    }

    fn operation() -> (Arc<AsyncOperation>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let executor = FnExecutor::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Vec::new()) }.boxed()
        })
        .shared();
        let op = AsyncOperation::new(
            OperationSpec::new("async.level", AttributeSet::from([level()])),
            Script::new("subscribe", "SUB level"),
            executor,
            Arc::new(JsonMessageHandler::new("level", [level()])),
        )
        .unwrap();
        (op, starts)
    }

    fn push(op: &AsyncOperation, n: i64) {
        op.on_message(Payload::from_string(format!(r#"{{"type":"level","async.level":{}}}"#, n)));
    }

    #[tokio::test]
    async fn test_oneoff_view_completes_after_first_record() {
        let (op, starts) = operation();
        let (once, mut once_rx) = ChannelHandler::new();
        let (standing, mut standing_rx) = ChannelHandler::new();

        let single = op.oneoff_view().schedule(ScheduleRequest::new(once)).unwrap();
        let periodic = op.periodic_view();
        periodic.schedule(ScheduleRequest::new(standing).with_period_ms(1000)).unwrap();
        assert_eq!(periodic.period_ms(), 1000);

        push(&op, 1);
        push(&op, 2);

        assert!(matches!(next_event(&mut once_rx).await, Event::Record(_)));
        assert!(matches!(next_event(&mut once_rx).await, Event::Complete));
        assert!(once_rx.try_recv().is_err());
        assert!(!single.is_running());

        assert!(matches!(next_event(&mut standing_rx).await, Event::Record(_)));
        assert!(matches!(next_event(&mut standing_rx).await, Event::Record(_)));
        assert_eq!(op.task_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(op.is_started());
    }

    #[tokio::test]
    async fn test_repeated_stop_is_idempotent() {
        let (op, _) = operation();
        let (handler, _rx) = ChannelHandler::new();
        op.schedule(ScheduleRequest::new(handler.clone())).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let fired = fired.clone();
            op.stop(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!op.is_schedulable());
        assert!(matches!(
            op.schedule(ScheduleRequest::new(handler)),
            Err(Error::InvalidState(_))
        ));
        assert!(op.periodic_view().set_period(-1).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_script_is_retried_by_next_schedule() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let executor = FnExecutor::new(move |_, _| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(Error::script("subscription refused"))
                } else {
                    Ok(Vec::new())
                }
            }
            .boxed()
        })
        .shared();
        let op = AsyncOperation::new(
            OperationSpec::new("async.flaky", AttributeSet::from([level()])),
            Script::new("subscribe", "SUB level"),
            executor,
            Arc::new(JsonMessageHandler::new("level", [level()])),
        )
        .unwrap();

        let (first, mut first_rx) = ChannelHandler::new();
        let task = op.schedule(ScheduleRequest::new(first)).unwrap();
        match next_event(&mut first_rx).await {
            Event::Error(message, fatal) => {
                assert!(message.contains("subscription refused"));
                assert!(!fatal);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(task.is_running());
        assert!(!op.is_started());

        let (second, _rx) = ChannelHandler::new();
        op.schedule(ScheduleRequest::new(second)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(op.is_started());
    }
}
