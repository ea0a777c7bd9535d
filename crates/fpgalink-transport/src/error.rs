/// Errors that can occur on the serial transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open {device} at {baud} baud: {source}")]
    Open {
        device: String,
        baud: u32,
        source: serialport::Error,
    },

    /// The port rejected a configuration change or control-line query.
    #[error("serial port error on {device}: {source}")]
    Port {
        device: String,
        source: serialport::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
