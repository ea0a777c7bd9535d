use std::io::{ErrorKind, Write};
use std::time::Duration;

use bytes::BytesMut;
use fpgalink_transport::LinkPort;

use crate::codec::{encode_command, CommandFrame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete command frames to any `Write` stream.
///
/// A frame is encoded into one buffer and pushed with a single write loop
/// followed by a flush, so two frames' bytes can never interleave.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with the default payload limit.
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new frame writer with an explicit payload limit.
    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Write a complete frame (blocking). Returns the number of bytes sent.
    pub fn write_frame(&mut self, frame: &CommandFrame) -> Result<usize> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload,
            });
        }

        self.buf.clear();
        encode_command(frame, &mut self.buf)?;

        let total = self.buf.len();
        let mut offset = 0usize;
        while offset < total {
            let err = match self.inner.write(&self.buf[offset..]) {
                Ok(0) if offset == 0 => return Err(FrameError::ConnectionClosed),
                Ok(0) => std::io::Error::from(ErrorKind::WriteZero),
                Ok(n) => {
                    offset += n;
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => err,
            };
            // Once a prefix is on the wire a plain retry would desync the
            // receiver, so the caller has to know.
            return Err(if offset == 0 {
                FrameError::Io(err)
            } else {
                FrameError::PartialWrite {
                    written: offset,
                    total,
                    source: err,
                }
            });
        }

        self.flush()?;
        Ok(total)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: LinkPort> FrameWriter<T> {
    /// Create a frame writer for a link port and apply the write timeout.
    pub fn with_write_timeout(mut inner: T, max_payload: usize, timeout: Duration) -> Result<Self> {
        inner
            .set_timeout(timeout)
            .map_err(crate::transport_to_frame_error)?;
        Ok(Self::with_max_payload(inner, max_payload))
    }
}
