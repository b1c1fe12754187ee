/*!
 * Operations.
 *
 * An operation is a named capability with a fixed attribute set. Callers
 * schedule it to get an [`OperationTask`]; stopping it is permanent and
 * completes asynchronously once its live tasks have drained.
 */
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use devlink_core::attribute::{Attribute, AttributeSet};
use devlink_core::types::{Id, Value};

use crate::error::{Error, Result};
use crate::pipeline::RecordPipeline;
use crate::script::Parameters;
use crate::task::{OperationTask, TaskHandler, TaskOwner};

pub mod async_op;
pub mod native;
pub mod oneoff;
pub mod periodic;

pub use async_op::{AsyncOneoffView, AsyncOperation, AsyncPeriodicView};
pub use native::NativePeriodicOperation;
pub use oneoff::OneoffOperation;
pub use periodic::{PeriodicOperation, SimulatedPeriodicOperation};

/// Called once an operation has fully stopped
pub type StopCallback = Box<dyn FnOnce() + Send>;

/// Identity and contract shared by every operation kind
#[derive(Debug, Clone)]
pub struct OperationSpec {
    /// Operation identifier
    pub id: Id,
    /// Attributes the operation produces
    pub attributes: AttributeSet,
    /// Parameters every schedule call must supply
    pub required_parameters: Vec<String>,
}

impl OperationSpec {
    /// Create a spec with no required parameters
    pub fn new<I: Into<Id>>(id: I, attributes: AttributeSet) -> Self {
        Self {
            id: id.into(),
            attributes,
            required_parameters: Vec::new(),
        }
    }

    /// Require a parameter on every schedule call
    pub fn with_required_parameter<S: Into<String>>(mut self, name: S) -> Self {
        self.required_parameters.push(name.into());
        self
    }

    /// Check a schedule request against this spec.
    ///
    /// Returns the attribute subset the task will declare.
    pub(crate) fn validate(&self, request: &ScheduleRequest) -> Result<AttributeSet> {
        if let Some(missing) = self
            .required_parameters
            .iter()
            .find(|name| !request.parameters.contains_key(name.as_str()))
        {
            return Err(Error::invalid_argument(format!(
                "operation {} requires parameter '{}'",
                self.id, missing
            )));
        }

        if request.attributes.is_empty() {
            return Ok(self.attributes.clone());
        }
        if !self.attributes.covers(&request.attributes, &Attribute::timestamp()) {
            return Err(Error::invalid_argument(format!(
                "operation {} does not provide all of {:?}",
                self.id, request.attributes
            )));
        }
        Ok(request.attributes.clone())
    }
}

/// Everything needed to schedule one task
pub struct ScheduleRequest {
    attributes: AttributeSet,
    parameters: Parameters,
    handler: Arc<dyn TaskHandler>,
    pipeline: RecordPipeline,
    period_ms: Option<i64>,
}

impl ScheduleRequest {
    /// Start a request delivering to `handler`
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            attributes: AttributeSet::new(),
            parameters: Parameters::new(),
            handler,
            pipeline: RecordPipeline::EMPTY,
            period_ms: None,
        }
    }

    /// Ask for a subset of the operation's attributes
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set one script parameter
    pub fn with_parameter<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Add several script parameters
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Post-process delivered records
    pub fn with_pipeline(mut self, pipeline: RecordPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Request a sampling period in milliseconds
    pub fn with_period_ms(mut self, period_ms: i64) -> Self {
        self.period_ms = Some(period_ms);
        self
    }

    /// Requested attributes
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Script parameters
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Requested period, if any
    pub fn period_ms(&self) -> Option<i64> {
        self.period_ms
    }

    pub(crate) fn into_task(
        self,
        spec: &OperationSpec,
        attributes: AttributeSet,
        owner: Weak<dyn TaskOwner>,
    ) -> (Arc<OperationTask>, Parameters) {
        let task = OperationTask::new(spec.id.clone(), attributes, self.handler, self.pipeline, owner);
        (task, self.parameters)
    }
}

impl std::fmt::Debug for ScheduleRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleRequest")
            .field("attributes", &self.attributes)
            .field("parameters", &self.parameters)
            .field("pipeline", &self.pipeline)
            .field("period_ms", &self.period_ms)
            .finish()
    }
}

/// A schedulable, fixed-attribute capability
pub trait Operation: Send + Sync + Debug {
    /// Operation identifier
    fn id(&self) -> &Id;

    /// Attributes the operation produces; fixed at construction
    fn attributes(&self) -> &AttributeSet;

    /// Whether `schedule` can still succeed
    fn is_schedulable(&self) -> bool;

    /// Create a task for `request`.
    ///
    /// Fails with [`Error::InvalidArgument`] when a required parameter is
    /// missing and with [`Error::InvalidState`] after [`Operation::stop`].
    fn schedule(&self, request: ScheduleRequest) -> Result<Arc<OperationTask>>;

    /// Stop permanently; `on_stopped` runs once every live task has drained
    fn stop(&self, on_stopped: StopCallback);

    /// Whether records already carry [`Attribute::timestamp`]
    fn provides_timestamp(&self) -> bool {
        self.attributes().contains(&Attribute::timestamp())
    }
}

/// Reject a negative period before anything changes
pub(crate) fn check_period(operation: &Id, period_ms: Option<i64>) -> Result<()> {
    match period_ms {
        Some(ms) if ms < 0 => Err(Error::invalid_argument(format!(
            "operation {}: period must not be negative, got {}",
            operation, ms
        ))),
        _ => Ok(()),
    }
}
