//! Stream spiking-network instructions to an FPGA accelerator.
//!
//! Instructions are packaged into checksummed command frames, written over a
//! serial link one frame at a time, and each hardware response is decoded
//! into a result record.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial link abstraction and the `serialport` backend
//! - [`frame`]: instruction model, command/response wire codec, frame I/O
//! - [`pipeline`]: the concurrent packager/driver pipeline and a board simulator

/// Re-export transport types.
pub mod transport {
    pub use fpgalink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use fpgalink_frame::*;
}

/// Re-export pipeline types.
pub mod pipeline {
    pub use fpgalink_pipeline::*;
}
