/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The serial link could not be opened.
    #[error("link open failed: {0}")]
    LinkOpen(#[source] fpgalink_transport::TransportError),

    /// Writes kept failing; the session is considered broken.
    #[error("link wedged: frame seq {seq} not written after {attempts} attempt(s): {source}")]
    LinkWedged {
        seq: u16,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// The link session was already closed.
    #[error("link is closed")]
    LinkClosed,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fpgalink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] fpgalink_frame::FrameError),

    /// A stage task panicked or was aborted.
    #[error("{stage} task failed: {reason}")]
    Task { stage: &'static str, reason: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error outside the link (e.g. reading a config file).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn task(stage: &'static str, err: tokio::task::JoinError) -> Self {
        Self::Task {
            stage,
            reason: err.to_string(),
        }
    }

    /// True when a frame was only partly written before the link failed.
    pub fn is_partial_write(&self) -> bool {
        matches!(
            self,
            PipelineError::Frame(fpgalink_frame::FrameError::PartialWrite { .. })
        )
    }

    /// True for errors that mean the hardware session is unusable.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::LinkOpen(_)
                | PipelineError::LinkWedged { .. }
                | PipelineError::LinkClosed
                | PipelineError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
