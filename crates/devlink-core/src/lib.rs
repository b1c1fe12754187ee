/*!
 * devlink Core
 *
 * Shared vocabulary for the devlink middleware: interned attributes,
 * immutable records, configuration, logging and async helpers.
 */

#![warn(missing_docs)]

pub mod attribute;
pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod record;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use tokio;
    pub use tracing;
}

/// devlink core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("devlink core {} initialized", VERSION);
    Ok(())
}
