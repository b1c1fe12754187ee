/*!
 * Operation-level tasks.
 *
 * An [`OperationTask`] is one caller's subscription to an operation. It is
 * `Running` until it is stopped by the caller, completed by the operation, or
 * hit by a fatal error; `Stopped` is terminal.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use devlink_core::attribute::AttributeSet;
use devlink_core::record::Record;
use devlink_core::types::Id;

use crate::error::{Error, Result};
use crate::operation::StopCallback;
use crate::pipeline::RecordPipeline;

/// Receives what a task produces
pub trait TaskHandler: Send + Sync {
    /// A record passed through the task's pipeline
    fn on_record(&self, record: Record);

    /// The operation reported an error; a fatal error also stopped the task
    fn on_error(&self, error: Error, fatal: bool);

    /// The operation finished the task normally
    fn on_complete(&self) {}
}

/// Whatever keeps track of a task's liveness
pub trait TaskOwner: Send + Sync {
    /// The task stopped and must no longer receive records
    fn release(&self, task_id: &Id);
}

struct Detached;

impl TaskOwner for Detached {
    fn release(&self, _task_id: &Id) {}
}

/// A live subscription to an operation
pub struct OperationTask {
    id: Id,
    operation_id: Id,
    attributes: AttributeSet,
    handler: Arc<dyn TaskHandler>,
    pipeline: RecordPipeline,
    running: AtomicBool,
    owner: Weak<dyn TaskOwner>,
}

impl OperationTask {
    /// Create a running task owned by `owner`
    pub fn new(
        operation_id: Id,
        attributes: AttributeSet,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipeline,
        owner: Weak<dyn TaskOwner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Id::new(),
            operation_id,
            attributes,
            handler,
            pipeline,
            running: AtomicBool::new(true),
            owner,
        })
    }

    /// Create a running task no operation tracks
    pub fn detached(
        operation_id: Id,
        attributes: AttributeSet,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipeline,
    ) -> Arc<Self> {
        let owner: Weak<dyn TaskOwner> = Weak::<Detached>::new();
        Self::new(operation_id, attributes, handler, pipeline, owner)
    }

    /// Task identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Identifier of the owning operation
    pub fn operation_id(&self) -> &Id {
        &self.operation_id
    }

    /// Attributes the caller asked for
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Whether the task still receives records
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the task and deregister it from its operation.
    ///
    /// Returns `true` for the call that stopped it. One delivery already in
    /// flight may still arrive afterwards.
    pub fn stop(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!(task = %self.id, operation = %self.operation_id, "task stopped");
        if let Some(owner) = self.owner.upgrade() {
            owner.release(&self.id);
        }
        true
    }

    /// Deliver a record through the pipeline. Ignored once stopped.
    pub fn new_record(&self, record: &Record) -> bool {
        if !self.is_running() {
            trace!(task = %self.id, "record dropped, task stopped");
            return false;
        }
        self.handler.on_record(self.pipeline.run(record));
        true
    }

    /// Report an error. A fatal error stops the task first.
    pub fn notify_error(&self, error: Error, fatal: bool) {
        if fatal {
            if !self.stop() {
                return;
            }
        } else if !self.is_running() {
            return;
        }
        self.handler.on_error(error, fatal);
    }

    /// Finish the task normally
    pub fn complete(&self) -> bool {
        if !self.stop() {
            return false;
        }
        self.handler.on_complete();
        true
    }
}

impl fmt::Debug for OperationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTask")
            .field("id", &self.id)
            .field("operation", &self.operation_id)
            .field("attributes", &self.attributes)
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Default)]
struct LiveState {
    stopped: bool,
    tasks: Vec<Arc<OperationTask>>,
    waiters: Vec<StopCallback>,
}

/// The live tasks of one operation, and who is waiting for them to drain
///
/// The lock here is the per-operation guard between fan-out and stop.
#[derive(Default)]
pub(crate) struct LiveTasks {
    state: Mutex<LiveState>,
}

impl LiveTasks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Track a new task; fails once the operation has stopped
    pub(crate) fn insert(&self, task: Arc<OperationTask>, operation: &Id) -> Result<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(Error::invalid_state(format!("operation {} is stopped", operation)));
        }
        state.tasks.push(task);
        Ok(())
    }

    /// Forget a task. Returns how many remain.
    pub(crate) fn remove(&self, task_id: &Id) -> usize {
        let (remaining, drained) = {
            let mut state = self.state.lock();
            state.tasks.retain(|t| t.id() != task_id);
            let drained = if state.stopped && state.tasks.is_empty() {
                std::mem::take(&mut state.waiters)
            } else {
                Vec::new()
            };
            (state.tasks.len(), drained)
        };
        for waiter in drained {
            waiter();
        }
        remaining
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<OperationTask>> {
        self.state.lock().tasks.clone()
    }

    /// Mark stopped and register `waiter` to run once every task is gone.
    ///
    /// Returns the tasks the caller must stop: all of them on the first call,
    /// none afterwards.
    pub(crate) fn stop(&self, waiter: StopCallback) -> Vec<Arc<OperationTask>> {
        let (tasks, fire) = {
            let mut state = self.state.lock();
            let first = !state.stopped;
            state.stopped = true;
            if state.tasks.is_empty() {
                (Vec::new(), Some(waiter))
            } else {
                state.waiters.push(waiter);
                let tasks = if first { state.tasks.clone() } else { Vec::new() };
                (tasks, None)
            }
        };
        if let Some(waiter) = fire {
            waiter();
        }
        tasks
    }

    /// Mark stopped and run `waiter` now, leaving live tasks to finish
    pub(crate) fn stop_now(&self, waiter: StopCallback) {
        self.state.lock().stopped = true;
        waiter();
    }
}
