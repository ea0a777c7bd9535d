use std::io::ErrorKind;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use fpgalink_transport::LinkPort;
use tracing::{debug, warn};

use crate::codec::{response_len, DEFAULT_MAX_PAYLOAD, RESPONSE_SYNC};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete accelerator responses from a link port.
///
/// Handles partial reads and line noise internally: bytes before a sync byte
/// are dropped, and callers only ever see whole responses or a timeout.
/// Validation of checksum and content is left to the codec.
pub struct ResponseReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: LinkPort> ResponseReader<T> {
    /// Create a new response reader with the default payload limit.
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new response reader with an explicit payload limit.
    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Read the next complete response, waiting at most `timeout`.
    ///
    /// Returns `Err(FrameError::Timeout)` if no complete response arrived in
    /// time; any partial bytes are discarded so a late tail cannot be glued
    /// onto the next response. A header declaring an oversized payload yields
    /// `Err(FrameError::MalformedResponse)`.
    pub fn read_response(&mut self, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;

        loop {
            self.skip_to_sync();

            if !self.buf.is_empty() {
                match response_len(&self.buf, self.max_payload) {
                    Ok(Some(total)) if self.buf.len() >= total => {
                        return Ok(self.buf.split_to(total).freeze());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.buf.clear();
                        return Err(err);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let partial = self.discard_buffered();
                if partial > 0 {
                    debug!(partial, "discarding partial response after timeout");
                }
                return Err(FrameError::Timeout(timeout));
            }

            self.inner
                .set_timeout(deadline - now)
                .map_err(crate::transport_to_frame_error)?;

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drop everything buffered so far. Returns the number of bytes dropped.
    pub fn discard_buffered(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    /// Bytes received but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying port.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying port.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner port.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn skip_to_sync(&mut self) {
        match self.buf.iter().position(|&byte| byte == RESPONSE_SYNC) {
            Some(0) => {}
            Some(pos) => {
                warn!(skipped = pos, "skipping noise before response sync byte");
                self.buf.advance(pos);
            }
            None if !self.buf.is_empty() => {
                warn!(skipped = self.buf.len(), "no response sync byte in buffered input");
                self.buf.clear();
            }
            None => {}
        }
    }
}
