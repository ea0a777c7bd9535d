//! Wiring: instruction queue → packager → frame queue → driver → result queue.

use std::sync::Arc;

use fpgalink_frame::{FrameCodec, Instruction, ResultRecord};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::driver::{DriverStats, PipelineDriver};
use crate::error::{PipelineError, Result};
use crate::link::HardwareLink;
use crate::observer::LinkObserver;
use crate::packager::{Packager, PackagerStats};
use crate::queue::{bounded, QueueReceiver, QueueSender};

/// The pipeline's outer ends, handed to the caller on start.
#[derive(Debug)]
pub struct PipelineIo {
    /// Feed instructions here. Dropping it signals end of input.
    pub instructions: QueueSender<Instruction>,
    /// One record per frame written, in submission order.
    pub results: QueueReceiver<ResultRecord>,
}

/// Final counters from both stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub packager: PackagerStats,
    pub driver: DriverStats,
}

/// A running pipeline.
pub struct Pipeline {
    cancel: CancellationToken,
    link: Arc<Mutex<HardwareLink>>,
    packager: JoinHandle<PackagerStats>,
    driver: JoinHandle<Result<DriverStats>>,
}

impl Pipeline {
    /// Open the configured serial device and start the stages.
    ///
    /// The exit-on-fail policy in `config.link` applies to the open.
    pub async fn open(
        config: PipelineConfig,
        observers: Vec<Arc<dyn LinkObserver>>,
        cancel: CancellationToken,
    ) -> Result<(Self, PipelineIo)> {
        config.validate()?;
        let link_config = config.link.clone();
        let max_payload = config.codec.max_payload;
        let link = tokio::task::spawn_blocking(move || {
            HardwareLink::open_or_exit(&link_config, max_payload, observers)
        })
        .await
        .map_err(|err| PipelineError::task("open", err))??;

        Self::start(config, link, cancel)
    }

    /// Start the stages over an already-open link.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: PipelineConfig,
        link: HardwareLink,
        cancel: CancellationToken,
    ) -> Result<(Self, PipelineIo)> {
        config.validate()?;

        let (instructions_tx, instructions_rx) = bounded(config.queue_capacity);
        let (frames_tx, frames_rx) = bounded(config.queue_capacity);
        let (results_tx, results_rx) = bounded(config.queue_capacity);

        let codec = FrameCodec::new(config.codec.clone());
        let link = Arc::new(Mutex::new(link));
        let packager = Packager::from_config(&config.packager);

        info!(
            packager = packager.name(),
            queue_capacity = config.queue_capacity,
            "starting pipeline"
        );

        let packager = tokio::spawn(packager.run(
            codec.clone(),
            instructions_rx,
            frames_tx,
            cancel.clone(),
        ));
        let driver = PipelineDriver::new(
            Arc::clone(&link),
            codec,
            config.driver.clone(),
            cancel.clone(),
        );
        let driver = tokio::spawn(driver.run(frames_rx, results_tx));

        Ok((
            Self {
                cancel,
                link,
                packager,
                driver,
            },
            PipelineIo {
                instructions: instructions_tx,
                results: results_rx,
            },
        ))
    }

    /// The token observed by every stage.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for both stages to finish, then close the link.
    ///
    /// A driver fault cancels the token so the remaining stages and any
    /// caller-side tasks sharing it wind down too.
    pub async fn join(self) -> Result<PipelineSummary> {
        let driver = match self.driver.await {
            Ok(outcome) => outcome,
            Err(err) => Err(PipelineError::task("driver", err)),
        };
        if driver.is_err() {
            self.cancel.cancel();
        }

        let packager = self
            .packager
            .await
            .map_err(|err| PipelineError::task("packager", err));

        // The driver has stopped issuing writes; this is the only close.
        self.link.lock().await.close();

        let summary = PipelineSummary {
            driver: driver?,
            packager: packager?,
        };
        if summary.packager.dropped > 0 {
            warn!(dropped = summary.packager.dropped, "some instructions were dropped");
        }
        info!(
            instructions = summary.packager.instructions,
            frames = summary.driver.frames_written,
            results = summary.driver.results,
            "pipeline finished"
        );
        Ok(summary)
    }

    /// Cancel every stage and wait for them.
    pub async fn shutdown(self) -> Result<PipelineSummary> {
        self.cancel.cancel();
        self.join().await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
