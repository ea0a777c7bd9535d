//! Decoded hardware output.

use bytes::Bytes;
use serde::Serialize;

use crate::codec::CommandFrame;
use crate::instruction::{InstructionId, InstructionKind};

/// Status byte reported by the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    /// Still computing; more output may follow.
    Busy,
    /// The command was understood but refused.
    Rejected,
    /// An internal FIFO overflowed while handling the command.
    Overflow,
    /// A status code this host does not know.
    Unknown(u8),
}

impl ResponseStatus {
    pub const fn code(self) -> u8 {
        match self {
            ResponseStatus::Ok => 0x00,
            ResponseStatus::Busy => 0x01,
            ResponseStatus::Rejected => 0x02,
            ResponseStatus::Overflow => 0x03,
            ResponseStatus::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => ResponseStatus::Ok,
            0x01 => ResponseStatus::Busy,
            0x02 => ResponseStatus::Rejected,
            0x03 => ResponseStatus::Overflow,
            other => ResponseStatus::Unknown(other),
        }
    }
}

/// A structurally valid response as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ResponseStatus,
    pub seq: u16,
    pub payload: Bytes,
}

/// How a frame's round trip ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A well-formed response for this frame.
    Completed,
    /// Well-formed, but not what this frame should have produced.
    Unexpected { reason: String },
    /// The response bytes could not be decoded.
    DecodeError { reason: String },
    /// Nothing arrived within the response timeout.
    NoResponse,
}

/// The pipeline's output: one per frame written to the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub seq: u16,
    pub kind: InstructionKind,
    pub instruction_ids: Vec<InstructionId>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl ResultRecord {
    fn for_frame(frame: &CommandFrame, outcome: Outcome) -> Self {
        Self {
            seq: frame.seq,
            kind: frame.kind,
            instruction_ids: frame.instruction_ids.clone(),
            outcome,
            status: None,
            payload: Vec::new(),
        }
    }

    /// Correlate a decoded response with the frame that was written.
    pub fn from_response(frame: &CommandFrame, response: Response) -> Self {
        let outcome = if response.seq != frame.seq {
            Outcome::Unexpected {
                reason: format!(
                    "sequence mismatch (expected {}, got {})",
                    frame.seq, response.seq
                ),
            }
        } else if let ResponseStatus::Unknown(code) = response.status {
            Outcome::Unexpected {
                reason: format!("unknown status 0x{code:02X}"),
            }
        } else {
            Outcome::Completed
        };

        Self {
            status: Some(response.status),
            payload: response.payload.to_vec(),
            ..Self::for_frame(frame, outcome)
        }
    }

    /// Record for a frame whose response could not be decoded.
    pub fn decode_error(frame: &CommandFrame, reason: impl Into<String>) -> Self {
        Self::for_frame(
            frame,
            Outcome::DecodeError {
                reason: reason.into(),
            },
        )
    }

    /// Record for a frame that got no response in time.
    pub fn no_response(frame: &CommandFrame) -> Self {
        Self::for_frame(frame, Outcome::NoResponse)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
    }

    /// Short outcome label for logs and tables.
    pub fn outcome_name(&self) -> &'static str {
        match self.outcome {
            Outcome::Completed => "completed",
            Outcome::Unexpected { .. } => "unexpected",
            Outcome::DecodeError { .. } => "decode_error",
            Outcome::NoResponse => "no_response",
        }
    }
}
