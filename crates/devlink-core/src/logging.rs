/*!
 * Logging functionality for devlink.
 *
 * Tracing setup plus the span helpers channels and operations run inside.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system from a [`LoggingConfig`]
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    init_with_filter(&config.level)
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence when set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "devlink_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span for a long-lived component such as a channel
///
/// # Arguments
///
/// * `name` - The kind of component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a span for work performed on behalf of an operation
///
/// # Arguments
///
/// * `name` - What is being done (e.g. "tick", "script")
/// * `operation` - The operation identifier
pub fn operation_span(name: &str, operation: &str) -> Span {
    tracing::info_span!("operation", name = %name, operation = %operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_reports_error() {
        let _ = init();
        assert!(init_with_filter("debug").is_err());
    }

    #[test]
    fn test_spans_construct() {
        let _ = component_span("channel", Some("modbus-1"));
        let _ = component_span("scheduler", None);
        let _ = operation_span("tick", "temperature-periodic");
    }
}
