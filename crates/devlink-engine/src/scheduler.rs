/*!
 * Operation scheduling.
 *
 * The scheduler keeps one pool per operation kind, each sorted by attribute
 * count, and routes a request to the narrowest operation that covers it.
 * Every record it delivers carries exactly one timestamp.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use devlink_core::attribute::{Attribute, AttributeSet};
use devlink_devices::registry::{CapabilityRegistry, RegisteredCapability};

use crate::error::{Error, Result};
use crate::modifier::TimestampModifier;
use crate::operation::{Operation, ScheduleRequest, StopCallback};
use crate::pipeline::RecordPipelineBuilder;
use crate::script::Parameters;
use crate::task::{OperationTask, TaskHandler};

/// The pool an operation is registered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read once
    Get,
    /// Write once
    Set,
    /// Sample at a rate
    Periodic,
    /// Follow device pushes
    Async,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Get => "get",
            OperationKind::Set => "set",
            OperationKind::Periodic => "periodic",
            OperationKind::Async => "async",
        };
        f.write_str(name)
    }
}

/// Builder for [`OperationScheduler`]
#[derive(Debug, Default)]
pub struct OperationSchedulerBuilder {
    get: Vec<Arc<dyn Operation>>,
    set: Vec<Arc<dyn Operation>>,
    periodic: Vec<Arc<dyn Operation>>,
    async_ops: Vec<Arc<dyn Operation>>,
}

impl OperationSchedulerBuilder {
    /// Register a read operation
    pub fn get(mut self, operation: Arc<dyn Operation>) -> Self {
        self.get.push(operation);
        self
    }

    /// Register a write operation
    pub fn set(mut self, operation: Arc<dyn Operation>) -> Self {
        self.set.push(operation);
        self
    }

    /// Register a periodic operation
    pub fn periodic(mut self, operation: Arc<dyn Operation>) -> Self {
        self.periodic.push(operation);
        self
    }

    /// Register a push-driven operation
    pub fn async_op(mut self, operation: Arc<dyn Operation>) -> Self {
        self.async_ops.push(operation);
        self
    }

    /// Sort the pools and create the scheduler
    pub fn build(self) -> OperationScheduler {
        fn sorted(mut pool: Vec<Arc<dyn Operation>>) -> Vec<Arc<dyn Operation>> {
            pool.sort_by_key(|op| op.attributes().len());
            pool
        }

        let (drained, _) = watch::channel(false);
        OperationScheduler {
            get: sorted(self.get),
            set: sorted(self.set),
            periodic: sorted(self.periodic),
            async_ops: sorted(self.async_ops),
            stopped: AtomicBool::new(false),
            drained: Arc::new(drained),
        }
    }
}

/// Routes attribute requests to operations and stops them together
#[derive(Debug)]
pub struct OperationScheduler {
    get: Vec<Arc<dyn Operation>>,
    set: Vec<Arc<dyn Operation>>,
    periodic: Vec<Arc<dyn Operation>>,
    async_ops: Vec<Arc<dyn Operation>>,
    stopped: AtomicBool,
    drained: Arc<watch::Sender<bool>>,
}

impl OperationScheduler {
    /// Start building a scheduler
    pub fn builder() -> OperationSchedulerBuilder {
        OperationSchedulerBuilder::default()
    }

    fn pool(&self, kind: OperationKind) -> &[Arc<dyn Operation>] {
        match kind {
            OperationKind::Get => &self.get,
            OperationKind::Set => &self.set,
            OperationKind::Periodic => &self.periodic,
            OperationKind::Async => &self.async_ops,
        }
    }

    /// The narrowest schedulable operation of `kind` covering `attributes`.
    ///
    /// The timestamp attribute never disqualifies a candidate.
    pub fn find_best_fit(&self, kind: OperationKind, attributes: &AttributeSet) -> Option<Arc<dyn Operation>> {
        let timestamp = Attribute::timestamp();
        self.pool(kind)
            .iter()
            .find(|op| op.is_schedulable() && op.attributes().covers(attributes, &timestamp))
            .cloned()
    }

    /// Read `attributes` once
    pub fn schedule_get(
        &self,
        attributes: &AttributeSet,
        parameters: Parameters,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipelineBuilder,
    ) -> Result<Arc<OperationTask>> {
        self.schedule(OperationKind::Get, attributes, None, parameters, handler, pipeline)
    }

    /// Write `attributes` once
    pub fn schedule_set(
        &self,
        attributes: &AttributeSet,
        parameters: Parameters,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipelineBuilder,
    ) -> Result<Arc<OperationTask>> {
        self.schedule(OperationKind::Set, attributes, None, parameters, handler, pipeline)
    }

    /// Sample `attributes` every `period_ms` milliseconds
    pub fn schedule_periodic(
        &self,
        attributes: &AttributeSet,
        period_ms: i64,
        parameters: Parameters,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipelineBuilder,
    ) -> Result<Arc<OperationTask>> {
        self.schedule(OperationKind::Periodic, attributes, Some(period_ms), parameters, handler, pipeline)
    }

    /// Follow pushed updates of `attributes`
    pub fn schedule_async(
        &self,
        attributes: &AttributeSet,
        parameters: Parameters,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipelineBuilder,
    ) -> Result<Arc<OperationTask>> {
        self.schedule(OperationKind::Async, attributes, None, parameters, handler, pipeline)
    }

    fn schedule(
        &self,
        kind: OperationKind,
        attributes: &AttributeSet,
        period_ms: Option<i64>,
        parameters: Parameters,
        handler: Arc<dyn TaskHandler>,
        pipeline: RecordPipelineBuilder,
    ) -> Result<Arc<OperationTask>> {
        if self.is_stopped() {
            return Err(Error::invalid_state("scheduler is stopped"));
        }

        let operation = self.find_best_fit(kind, attributes).ok_or_else(|| {
            Error::no_operation_found(format!("no {} operation provides {:?}", kind, attributes))
        })?;
        debug!(kind = %kind, operation = %operation.id(), "selected operation");

        let pipeline = if operation.provides_timestamp() || pipeline.declares(&Attribute::timestamp()) {
            pipeline
        } else {
            pipeline.add(TimestampModifier::new())
        };

        let mut request = ScheduleRequest::new(handler)
            .with_attributes(attributes.clone())
            .with_parameters(parameters)
            .with_pipeline(pipeline.build()?);
        if let Some(period_ms) = period_ms {
            request = request.with_period_ms(period_ms);
        }
        operation.schedule(request)
    }

    /// Stop every operation in every pool.
    ///
    /// `on_stopped` runs once, after the last operation has stopped. Returns
    /// `false` if the scheduler was already stopped; `on_stopped` is then
    /// dropped without being called.
    pub fn stop(&self, on_stopped: StopCallback) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let operations: Vec<_> = [&self.get, &self.set, &self.periodic, &self.async_ops]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        info!(operations = operations.len(), "stopping scheduler");

        let drained = self.drained.clone();
        let finish: StopCallback = Box::new(move || {
            on_stopped();
            drained.send_replace(true);
            info!("scheduler stopped");
        });

        if operations.is_empty() {
            finish();
            return true;
        }

        let countdown = Arc::new(Mutex::new((operations.len(), Some(finish))));
        for operation in operations {
            let countdown = countdown.clone();
            operation.stop(Box::new(move || {
                let fire = {
                    let mut guard = countdown.lock();
                    guard.0 -= 1;
                    if guard.0 == 0 {
                        guard.1.take()
                    } else {
                        None
                    }
                };
                if let Some(finish) = fire {
                    finish();
                }
            }));
        }
        true
    }

    /// Stop everything and wait until every operation has stopped
    pub async fn shutdown(&self) {
        self.stop(Box::new(|| {}));
        let mut drained = self.drained.subscribe();
        let _ = drained.wait_for(|done| *done).await;
    }

    /// Whether [`OperationScheduler::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Every registered operation, pool by pool
    pub fn operations(&self) -> Vec<Arc<dyn Operation>> {
        let mut all: Vec<Arc<dyn Operation>> = Vec::new();
        for op in [&self.get, &self.set, &self.periodic, &self.async_ops].into_iter().flatten() {
            if !all.iter().any(|seen| Arc::ptr_eq(seen, op)) {
                all.push(op.clone());
            }
        }
        all
    }

    /// Publish every operation's attributes to `registry`.
    ///
    /// Operations whose id is already registered are skipped. Returns how
    /// many were added.
    pub fn publish(&self, registry: &dyn CapabilityRegistry) -> Result<usize> {
        let mut added = 0;
        for op in self.operations() {
            if registry.get(op.id()).is_some() {
                continue;
            }
            registry.add(RegisteredCapability::new(op.id().clone(), op.attributes().clone()))?;
            added += 1;
        }
        Ok(added)
    }
}
