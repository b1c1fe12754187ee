/*!
 * A device as seen by applications: its channels plus the scheduler over
 * its operations.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use devlink_core::types::Id;
use devlink_devices::Channel;

use crate::scheduler::OperationScheduler;

/// Ties a device's channels to the scheduler that drives them
#[derive(Debug)]
pub struct DeviceBinding {
    id: Id,
    channels: Vec<Arc<dyn Channel>>,
    scheduler: Arc<OperationScheduler>,
    shut: AtomicBool,
}

impl DeviceBinding {
    /// Bind `scheduler` to the device `id`
    pub fn new<I: Into<Id>>(id: I, scheduler: Arc<OperationScheduler>) -> Self {
        Self {
            id: id.into(),
            channels: Vec::new(),
            scheduler,
            shut: AtomicBool::new(false),
        }
    }

    /// Add a channel to close on shutdown
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Device identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The device's scheduler
    pub fn scheduler(&self) -> &Arc<OperationScheduler> {
        &self.scheduler
    }

    /// The device's channels
    pub fn channels(&self) -> &[Arc<dyn Channel>] {
        &self.channels
    }

    /// Stop every operation, wait for them to drain, then close the channels.
    ///
    /// Returns `false` if the binding was already shut down.
    pub async fn shutdown(&self) -> bool {
        if self
            .shut
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!(device = %self.id, "shutting down device");
        self.scheduler.shutdown().await;
        for channel in &self.channels {
            channel.close();
        }
        info!(device = %self.id, channels = self.channels.len(), "device shut down");
        true
    }
}
