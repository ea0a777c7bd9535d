use std::time::Duration;

use crate::instruction::InstructionId;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An instruction is missing parameters or has values out of range.
    #[error("malformed instruction {id}: {reason}")]
    MalformedInstruction { id: InstructionId, reason: String },

    /// A command frame read back from the wire is inconsistent.
    #[error("malformed command frame: {0}")]
    MalformedFrame(String),

    /// A hardware response has a bad length, sync byte or checksum.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// No complete response arrived in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link failed after part of a frame was already sent.
    #[error("partial write: {written} of {total} bytes sent: {source}")]
    PartialWrite {
        written: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },

    /// The link reported end-of-stream.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    pub(crate) fn malformed(id: InstructionId, reason: impl Into<String>) -> Self {
        Self::MalformedInstruction {
            id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
