/*!
 * One-shot operations: one script run per scheduled task.
 */
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tracing::{debug, Instrument};

use devlink_core::attribute::AttributeSet;
use devlink_core::logging::operation_span;
use devlink_core::types::Id;
use devlink_core::utils::{current_handle, spawn_and_log};

use crate::error::Result;
use crate::operation::{Operation, OperationSpec, ScheduleRequest, StopCallback};
use crate::script::{Script, ScriptExecutor};
use crate::task::{LiveTasks, OperationTask, TaskOwner};

/// Runs its script once for each scheduled task, then completes the task
pub struct OneoffOperation {
    spec: OperationSpec,
    script: Script,
    executor: Arc<dyn ScriptExecutor>,
    handle: Handle,
    live: LiveTasks,
    this: Weak<OneoffOperation>,
}

impl OneoffOperation {
    /// Create an operation on the current runtime
    pub fn new(spec: OperationSpec, script: Script, executor: Arc<dyn ScriptExecutor>) -> Result<Arc<Self>> {
        Ok(Self::with_handle(current_handle()?, spec, script, executor))
    }

    /// Create an operation whose scripts run on `handle`
    pub fn with_handle(
        handle: Handle,
        spec: OperationSpec,
        script: Script,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            spec,
            script,
            executor,
            handle,
            live: LiveTasks::new(),
            this: this.clone(),
        })
    }

    /// Number of tasks whose script has not finished
    pub fn in_flight(&self) -> usize {
        self.live.len()
    }
}

impl TaskOwner for OneoffOperation {
    fn release(&self, task_id: &Id) {
        self.live.remove(task_id);
    }
}

impl Operation for OneoffOperation {
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
        let attributes = self.spec.validate(&request)?;
        let owner: Weak<dyn TaskOwner> = self.this.clone();
        let (task, parameters) = request.into_task(&self.spec, attributes, owner);
        self.live.insert(task.clone(), &self.spec.id)?;

        let executor = self.executor.clone();
        let script = self.script.clone();
        let running = task.clone();
        let span = operation_span("oneoff", self.spec.id.as_str());
        spawn_and_log(
            &self.handle,
            "oneoff script",
            async move {
                match executor.execute(&script, &parameters).await {
                    Ok(records) => {
                        debug!(task = %running.id(), records = records.len(), "script finished");
                        for record in &records {
                            running.new_record(record);
                        }
                        running.complete();
                        Ok(())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        running.notify_error(e, true);
                        Err(message)
                    }
                }
            }
            .instrument(span),
        );
        Ok(task)
    }

    fn stop(&self, on_stopped: StopCallback) {
        debug!(operation = %self.spec.id, "stopping oneoff operation");
        self.live.stop_now(on_stopped);
    }
}

impl std::fmt::Debug for OneoffOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneoffOperation")
            .field("spec", &self.spec)
            .field("script", &self.script)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::script::FnExecutor;
    use crate::task::testing::{next_event, ChannelHandler, Event};
    use devlink_core::attribute::{Attribute, AttributeType};
    use devlink_core::record::Record;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn level() -> Attribute {
        Attribute::new("oneoff.level", AttributeType::Integer)
    }

    fn executor() -> Arc<dyn ScriptExecutor> {
        FnExecutor::new(|script, params| {
            async move {
                if script.source() == "fail" {
                    return Err(Error::script("device said no"));
                }
                let base = params.get("base").and_then(|v| v.as_integer()).unwrap_or(0);
                Ok((0..2)
                    .map(|i| Record::builder().set(level(), base + i).build())
                    .collect())
            }
            .boxed()
        })
        .shared()
    }

    fn operation(source: &str) -> Arc<OneoffOperation> {
        let spec = OperationSpec::new("oneoff.level", AttributeSet::from([level()])).with_required_parameter("base");
        OneoffOperation::new(spec, Script::new("level", source), executor()).unwrap()
    }

    #[tokio::test]
    async fn test_records_then_complete() {
        let op = operation("read");
        let (handler, mut rx) = ChannelHandler::new();
        let task = op.schedule(ScheduleRequest::new(handler).with_parameter("base", 10)).unwrap();

        for expected in [10, 11] {
            match next_event(&mut rx).await {
                Event::Record(r) => assert_eq!(r.get("oneoff.level").unwrap().as_integer(), Some(expected)),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(next_event(&mut rx).await, Event::Complete));
        assert!(!task.is_running());
        assert_eq!(op.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_script_error_is_fatal_for_task() {
        let op = operation("fail");
        let (handler, mut rx) = ChannelHandler::new();
        let task = op.schedule(ScheduleRequest::new(handler).with_parameter("base", 1)).unwrap();

        assert!(matches!(next_event(&mut rx).await, Event::Error(_, true)));
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn test_missing_parameter_and_stop() {
        let op = operation("read");
        let (handler, _rx) = ChannelHandler::new();
        let err = op.schedule(ScheduleRequest::new(handler.clone())).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        op.stop(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!op.is_schedulable());

        let err = op.schedule(ScheduleRequest::new(handler).with_parameter("base", 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
