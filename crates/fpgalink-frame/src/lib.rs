//! Command/response framing for the FPGA accelerator serial protocol.
//!
//! Every command the host sends is framed with:
//! - a sync byte (`0xA5`) for stream resynchronization
//! - the opcode of the instruction kind it carries
//! - flags (checksum present, batched)
//! - a 16-bit little-endian sequence number used to correlate the response
//! - a record count and a 16-bit little-endian payload length
//! - an optional trailing CRC-8
//!
//! Responses mirror that with sync byte `0x5A`, a status byte, the echoed
//! sequence number, a length-prefixed payload and a mandatory CRC-8.
//!
//! The codec is pure; [`FrameWriter`] and [`ResponseReader`] move whole
//! frames over a [`fpgalink_transport::LinkPort`].

pub mod codec;
pub mod error;
pub mod instruction;
pub mod reader;
pub mod result;
pub mod writer;

pub use codec::{
    crc8, decode_response, encode_command, encode_response, parse_command, response_len,
    CodecConfig, CommandFrame, FrameCodec, CHECKSUM_SIZE, COMMAND_HEADER_SIZE, COMMAND_SYNC,
    DEFAULT_MAX_PAYLOAD, RESPONSE_HEADER_SIZE, RESPONSE_SYNC,
};
pub use error::{FrameError, Result};
pub use instruction::{Instruction, InstructionId, InstructionKind};
pub use reader::ResponseReader;
pub use result::{Outcome, Response, ResponseStatus, ResultRecord};
pub use writer::FrameWriter;

pub(crate) fn transport_to_frame_error(err: fpgalink_transport::TransportError) -> FrameError {
    match err {
        fpgalink_transport::TransportError::Io(io) => FrameError::Io(io),
        fpgalink_transport::TransportError::Closed => FrameError::ConnectionClosed,
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
