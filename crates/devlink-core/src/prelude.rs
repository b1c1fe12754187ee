/*!
 * Prelude module for devlink core.
 *
 * Re-exports the types most callers need in one import.
 */

pub use crate::error::{Error, Result};

pub use crate::attribute::{Attribute, AttributeSet, AttributeType};
pub use crate::record::{Record, RecordBuilder};
pub use crate::types::{Id, Value};

pub use crate::config::{Config, ConfigBuilder, SharedConfig};

pub use crate::utils::{current_handle, spawn_and_log, with_timeout};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
