/*!
 * Natively periodic operations.
 *
 * The device streams samples on its own once a start script has run; a stop
 * script ends the stream. Pushed messages are decoded by per-type handlers.
 * With several handlers, partial records accumulate until the sync handler's
 * message closes the sample.
 *
 * Stopping reports completion only after the stop script has run, so the
 * device's channel is still open when the stream is switched off.
 */
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn, Instrument};

use devlink_core::attribute::AttributeSet;
use devlink_core::logging::operation_span;
use devlink_core::record::{Record, RecordBuilder};
use devlink_core::types::{Id, Value};
use devlink_core::utils::current_handle;
use devlink_devices::{AsyncIoHandler, Payload};

use crate::error::{Error, Result};
use crate::message::{validate_handlers, MessageHandler};
use crate::operation::periodic::PeriodicOperation;
use crate::operation::{check_period, Operation, OperationSpec, ScheduleRequest, StopCallback};
use crate::script::{Parameters, Script, ScriptExecutor};
use crate::task::{LiveTasks, OperationTask, TaskOwner};

/// Parameter carrying the requested period to the start script
pub const PERIOD_PARAMETER: &str = "period_ms";

enum Command {
    Start(Parameters),
    Stop(Parameters),
    Notify(StopCallback),
}

#[derive(Default)]
struct StreamState {
    period_ms: i64,
    armed_ms: Option<i64>,
    halted: bool,
    parameters: Parameters,
    pending: RecordBuilder,
}

/// Periodic operation fed by the device's own push stream
pub struct NativePeriodicOperation {
    spec: OperationSpec,
    start_script: Script,
    stop_script: Script,
    executor: Arc<dyn ScriptExecutor>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    live: LiveTasks,
    state: Mutex<StreamState>,
    commands: mpsc::UnboundedSender<Command>,
    this: Weak<NativePeriodicOperation>,
}

impl NativePeriodicOperation {
    /// Create an operation on the current runtime.
    ///
    /// Fails with [`Error::Configuration`] unless there is one handler, or
    /// exactly one sync handler among several.
    pub fn new(
        spec: OperationSpec,
        start_script: Script,
        stop_script: Script,
        executor: Arc<dyn ScriptExecutor>,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> Result<Arc<Self>> {
        let handle = current_handle()?;
        Self::with_handle(&handle, spec, start_script, stop_script, executor, handlers)
    }

    /// Create an operation whose scripts run on `handle`
    pub fn with_handle(
        handle: &Handle,
        spec: OperationSpec,
        start_script: Script,
        stop_script: Script,
        executor: Arc<dyn ScriptExecutor>,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> Result<Arc<Self>> {
        validate_handlers(&handlers)?;

        let (commands, rx) = mpsc::unbounded_channel();
        let op = Arc::new_cyclic(|this| Self {
            spec,
            start_script,
            stop_script,
            executor,
            handlers,
            live: LiveTasks::new(),
            state: Mutex::new(StreamState::default()),
            commands,
            this: this.clone(),
        });

        let runner = ScriptRunner {
            id: op.spec.id.clone(),
            executor: op.executor.clone(),
            start_script: op.start_script.clone(),
            stop_script: op.stop_script.clone(),
            op: Arc::downgrade(&op),
        };
        let span = operation_span("native", op.spec.id.as_str());
        handle.spawn(runner.run(rx).instrument(span));
        Ok(op)
    }

    /// Number of attached tasks
    pub fn task_count(&self) -> usize {
        self.live.len()
    }

    /// Whether the device stream is currently running
    pub fn is_streaming(&self) -> bool {
        self.state.lock().armed_ms.is_some()
    }

    /// Start, restart or stop the device stream to match period and tasks
    fn sync_stream(&self) {
        let mut state = self.state.lock();
        let wanted = (state.period_ms > 0 && !state.halted && self.live.len() > 0 && !self.live.is_stopped())
            .then_some(state.period_ms);
        if wanted == state.armed_ms {
            return;
        }

        let mut parameters = state.parameters.clone();
        let command = match wanted {
            Some(period_ms) => {
                parameters.insert(PERIOD_PARAMETER.to_string(), Value::Integer(period_ms));
                Command::Start(parameters)
            }
            None => {
                state.pending = RecordBuilder::new();
                Command::Stop(parameters)
            }
        };
        state.armed_ms = wanted;

        if self.commands.send(command).is_err() {
            warn!(operation = %self.spec.id, "script runner is gone");
        }
    }

    fn emit(&self, record: Record) {
        for task in self.live.snapshot() {
            task.new_record(&record);
        }
    }

    fn notify_all(&self, message: &str) {
        for task in self.live.snapshot() {
            task.notify_error(Error::script(message), false);
        }
    }
}

/// Runs stream scripts in submission order.
///
/// Holds its own executor and scripts so a queued stop script still runs
/// after the operation itself has been dropped.
struct ScriptRunner {
    id: Id,
    executor: Arc<dyn ScriptExecutor>,
    start_script: Script,
    stop_script: Script,
    op: Weak<NativePeriodicOperation>,
}

impl ScriptRunner {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            let (script, parameters) = match command {
                Command::Start(parameters) => (&self.start_script, parameters),
                Command::Stop(parameters) => (&self.stop_script, parameters),
                Command::Notify(on_stopped) => {
                    on_stopped();
                    continue;
                }
            };
            debug!(operation = %self.id, script = %script.id(), "running stream script");
            match self.executor.execute(script, &parameters).await {
                Ok(records) if !records.is_empty() => {
                    trace!(records = records.len(), "stream script output ignored");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(operation = %self.id, script = %script.id(), "stream script failed: {}", e);
                    if let Some(op) = self.op.upgrade() {
                        op.notify_all(&e.to_string());
                    }
                }
            }
        }
        trace!(operation = %self.id, "script runner finished");
    }
}

impl AsyncIoHandler for NativePeriodicOperation {
    fn on_message(&self, payload: Payload) {
        if !self.is_streaming() {
            trace!(operation = %self.spec.id, "push ignored, not streaming");
            return;
        }
        let handler = match self.handlers.iter().find(|h| h.accepts(&payload)) {
            Some(handler) => handler,
            None => {
                trace!(operation = %self.spec.id, "push not recognised");
                return;
            }
        };

        let partial = match handler.decode(&payload) {
            Ok(record) => record,
            Err(e) => {
                self.notify_all(&e.to_string());
                return;
            }
        };

        if self.handlers.len() == 1 {
            self.emit(partial);
            return;
        }

        let complete = {
            let mut state = self.state.lock();
            let mut pending = std::mem::take(&mut state.pending);
            for (attribute, value) in partial.iter() {
                pending = pending.set(attribute.clone(), value.clone());
            }
            if handler.is_sync() {
                Some(pending.build())
            } else {
                state.pending = pending;
                None
            }
        };
        if let Some(record) = complete {
            self.emit(record);
        }
    }
}

impl TaskOwner for NativePeriodicOperation {
    fn release(&self, task_id: &Id) {
        if self.live.remove(task_id) == 0 {
            self.sync_stream();
        }
    }
}

impl Operation for NativePeriodicOperation {
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
        self.sync_stream();
        Ok(task)
    }

    fn stop(&self, on_stopped: StopCallback) {
        debug!(operation = %self.spec.id, "stopping native periodic operation");
        self.state.lock().halted = true;
        // Queues the stop script ahead of the notification below
        self.sync_stream();

        let commands = self.commands.clone();
        let after_scripts: StopCallback = Box::new(move || {
            if let Err(mpsc::error::SendError(Command::Notify(on_stopped))) =
                commands.send(Command::Notify(on_stopped))
            {
                on_stopped();
            }
        });
        for task in self.live.stop(after_scripts) {
            task.stop();
        }
    }
}

impl PeriodicOperation for NativePeriodicOperation {
    fn set_period(&self, period_ms: i64) -> Result<()> {
        check_period(&self.spec.id, Some(period_ms))?;
        self.state.lock().period_ms = period_ms;
        self.sync_stream();
        Ok(())
    }

    fn period_ms(&self) -> i64 {
        self.state.lock().period_ms
    }
}

impl Drop for NativePeriodicOperation {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.armed_ms.take().is_some() {
            let _ = self.commands.send(Command::Stop(state.parameters.clone()));
        }
    }
}

impl std::fmt::Debug for NativePeriodicOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePeriodicOperation")
            .field("spec", &self.spec)
            .field("handlers", &self.handlers)
            .field("period_ms", &self.period_ms())
            .field("tasks", &self.task_count())
            .finish()
    }
}
