/*!
 * Utility functions and helpers for devlink.
 */
use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with an optional timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration, or `None` to wait indefinitely
/// * `future` - The future to run
///
/// # Returns
///
/// The output of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    match duration {
        None => Ok(future.await),
        Some(duration) => timeout(duration, future)
            .await
            .map_err(|_| Error::timeout(format!("Operation timed out after {:?}", duration))),
    }
}

/// Handle to the tokio runtime the caller is running on
///
/// Components that spawn background work capture this at construction so
/// they can spawn later from threads that are not runtime workers.
pub fn current_handle() -> Result<Handle> {
    Handle::try_current()
        .map_err(|e| Error::runtime(format!("No tokio runtime available: {}", e)))
}

/// Spawn a future on `handle` and log its outcome
///
/// # Arguments
///
/// * `handle` - Runtime to spawn on
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(handle: &Handle, name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    handle.spawn(async move {
        match fut.await {
            Ok(_) => debug!("Task '{}' completed successfully", task_name),
            Err(e) => warn!("Task '{}' failed: {}", task_name, e),
        }
    })
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
