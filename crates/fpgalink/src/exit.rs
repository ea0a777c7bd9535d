use std::fmt;
use std::io;

use fpgalink_frame::FrameError;
use fpgalink_pipeline::PipelineError;
use fpgalink_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// Same value the pipeline uses when it exits on a failed link open.
pub const TRANSPORT_ERROR: i32 = fpgalink_pipeline::LINK_OPEN_EXIT_CODE;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::MalformedInstruction { .. }
        | FrameError::MalformedFrame(_)
        | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::Io(_)
        | FrameError::PartialWrite { .. }
        | FrameError::ConnectionClosed
        | FrameError::MalformedResponse(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    match err {
        PipelineError::Frame(err) => frame_error(context, err),
        PipelineError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PipelineError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PipelineError::Io(source) => io_error(context, source),
        PipelineError::LinkOpen(source) | PipelineError::Transport(source) => {
            transport_error(context, source)
        }
        err if err.is_link_failure() => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
