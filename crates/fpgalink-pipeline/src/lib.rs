//! Concurrent instruction pipeline for the FPGA accelerator.
//!
//! Three stages connected by bounded single-producer/single-consumer queues:
//!
//! ```text
//! ingestion ─▶ [instructions] ─▶ Packager ─▶ [frames] ─▶ PipelineDriver ◀─▶ HardwareLink
//!                                                             │
//!                                                             ▼
//!                                                        [results] ─▶ consumer
//! ```
//!
//! Every stage observes one `CancellationToken`. Order is preserved end to
//! end, and the driver publishes exactly one [`ResultRecord`] per frame it
//! wrote.
//!
//! [`ResultRecord`]: fpgalink_frame::ResultRecord

pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod observer;
pub mod packager;
pub mod pipeline;
pub mod queue;
pub mod sim;

pub use config::{
    DriverConfig, LinkConfig, PackagerConfig, PackagerStrategy, PipelineConfig,
    DEFAULT_DEVICE, DEFAULT_QUEUE_CAPACITY,
};
pub use driver::{DriverState, DriverStats, PipelineDriver};
pub use error::{PipelineError, Result};
pub use link::{HardwareLink, LinkSession, LINK_OPEN_EXIT_CODE};
pub use observer::{LinkEvent, LinkObserver, TracingObserver};
pub use packager::{Packager, PackagerStats};
pub use pipeline::{Pipeline, PipelineIo, PipelineSummary};
pub use queue::{bounded, QueueError, QueueReceiver, QueueSender};
pub use sim::{SimBehavior, SimulatedAccelerator};
