//! Optional link diagnostics.
//!
//! Observers are notified synchronously from the thread doing link I/O, so
//! implementations must be quick and must not block. They see the link's
//! activity but have no way to influence it.

use std::time::Duration;

use tracing::{debug, info, warn};

/// Something that happened on the hardware link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened { device: String },
    FrameWritten { seq: u16, bytes: usize },
    ResponseReceived { bytes: usize },
    ResponseTimedOut { timeout: Duration },
    Closed { device: String },
}

/// Receives link status notifications.
pub trait LinkObserver: Send + Sync {
    /// Called for every [`LinkEvent`].
    fn on_status(&self, event: &LinkEvent);

    /// Called when the clear-to-send line is first sampled and whenever it
    /// changes afterwards.
    fn on_clear_to_send(&self, _asserted: bool) {}
}

/// Logs link events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LinkObserver for TracingObserver {
    fn on_status(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Opened { device } => info!(device = %device, "link opened"),
            LinkEvent::FrameWritten { seq, bytes } => debug!(seq, bytes, "frame written"),
            LinkEvent::ResponseReceived { bytes } => debug!(bytes, "response received"),
            LinkEvent::ResponseTimedOut { timeout } => {
                debug!(timeout_ms = timeout.as_millis() as u64, "response timed out")
            }
            LinkEvent::Closed { device } => info!(device = %device, "link closed"),
        }
    }

    fn on_clear_to_send(&self, asserted: bool) {
        if asserted {
            debug!("clear-to-send asserted");
        } else {
            warn!("clear-to-send deasserted; accelerator is not accepting input");
        }
    }
}
