/*!
 * devlink Engine
 *
 * This crate turns device scripts and pushed messages into records: one-off,
 * periodic and push-driven operations, record pipelines, and the scheduler
 * that routes attribute requests to the best-fitting operation.
 */

#![warn(missing_docs)]

// Re-export core types
pub use devlink_core::prelude;

// Re-export types from devlink_core for convenience
pub use devlink_core::attribute::{Attribute, AttributeSet, AttributeType};
pub use devlink_core::record::Record;
pub use devlink_core::types::{Id, Value};

pub mod device;
pub mod error;
pub mod message;
pub mod modifier;
pub mod operation;
pub mod pipeline;
pub mod scheduler;
pub mod script;
pub mod task;
pub mod timer;

// Re-export main types for convenience
pub use device::DeviceBinding;
pub use error::{Error, Result};
pub use message::{JsonMessageHandler, MessageHandler};
pub use modifier::{RecordModifier, StaticFieldsModifier, TimestampModifier};
pub use operation::{
    AsyncOneoffView, AsyncOperation, AsyncPeriodicView, NativePeriodicOperation, OneoffOperation, Operation,
    OperationSpec, PeriodicOperation, ScheduleRequest, SimulatedPeriodicOperation, StopCallback,
};
pub use pipeline::{RecordPipeline, RecordPipelineBuilder};
pub use scheduler::{OperationKind, OperationScheduler, OperationSchedulerBuilder};
pub use script::{FnExecutor, Parameters, Script, ScriptExecutor};
pub use task::{OperationTask, TaskHandler};
pub use timer::TimerService;

/// devlink engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine and the device layer beneath it
pub fn init() -> Result<()> {
    devlink_devices::init()?;
    tracing::info!("devlink engine {} initialized", VERSION);
    Ok(())
}
