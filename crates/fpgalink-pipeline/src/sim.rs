//! In-process stand-in for the accelerator board.
//!
//! [`SimulatedAccelerator`] implements [`LinkPort`], parses the command
//! frames written to it the way the FPGA's UART front end does, and queues a
//! response per frame according to its [`SimBehavior`]. Clones share the same
//! device state, so a test can keep one handle for inspection while the
//! pipeline owns another.
//!
//! Only the framing is modelled. Outputs and status words are canned values.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use fpgalink_frame::{
    encode_response, parse_command, CommandFrame, InstructionKind, ResponseStatus,
    DEFAULT_MAX_PAYLOAD,
};
use fpgalink_transport::{LinkPort, Result as TransportResult};
use tracing::{debug, trace};

/// Canned temperature/status word returned for `read_status`.
pub const SIM_STATUS_WORD: u16 = 0x2A31;

/// How the simulated board answers a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimBehavior {
    /// Answer OK with the frame's sequence number.
    #[default]
    Respond,
    /// Never answer.
    Silent,
    /// Answer with a corrupted checksum.
    Corrupt,
    /// Answer BUSY, then OK.
    Busy,
    /// Answer REJECTED.
    Reject,
    /// Answer OK but with the wrong sequence number.
    WrongSeq,
    /// Answer OK, but only once the next frame arrives, ahead of that
    /// frame's own response.
    Late,
}

#[derive(Debug)]
struct SimState {
    inbound: BytesMut,
    outbound: VecDeque<u8>,
    default_behavior: SimBehavior,
    script: VecDeque<SimBehavior>,
    frames: Vec<CommandFrame>,
    failing_writes: u32,
    write_budget: Option<u64>,
    held: Vec<u8>,
    write_attempts: u64,
    bytes_received: u64,
    clear_to_send: bool,
}

impl SimState {
    fn next_behavior(&mut self) -> SimBehavior {
        self.script.pop_front().unwrap_or(self.default_behavior)
    }

    fn ingest(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
        self.bytes_received += data.len() as u64;

        loop {
            match parse_command(&mut self.inbound, DEFAULT_MAX_PAYLOAD) {
                Ok(Some(frame)) => self.answer(frame),
                Ok(None) => break,
                Err(err) => {
                    trace!(error = %err, "simulator resyncing");
                    self.inbound.advance(1);
                }
            }
        }
    }

    fn answer(&mut self, frame: CommandFrame) {
        let held = std::mem::take(&mut self.held);
        self.outbound.extend(held);

        let behavior = self.next_behavior();
        debug!(seq = frame.seq, kind = %frame.kind, count = frame.count, ?behavior, "simulator received frame");

        let payload = canned_payload(frame.kind);
        match behavior {
            SimBehavior::Respond => self.respond(ResponseStatus::Ok, frame.seq, &payload),
            SimBehavior::Silent => {}
            SimBehavior::Corrupt => {
                self.respond(ResponseStatus::Ok, frame.seq, &payload);
                if let Some(crc) = self.outbound.back_mut() {
                    *crc ^= 0xFF;
                }
            }
            SimBehavior::Busy => {
                self.respond(ResponseStatus::Busy, frame.seq, &[]);
                self.respond(ResponseStatus::Ok, frame.seq, &payload);
            }
            SimBehavior::Reject => self.respond(ResponseStatus::Rejected, frame.seq, &[]),
            SimBehavior::WrongSeq => {
                self.respond(ResponseStatus::Ok, frame.seq.wrapping_add(1), &payload)
            }
            SimBehavior::Late => {
                let mut buf = BytesMut::new();
                if encode_response(ResponseStatus::Ok, frame.seq, &payload, &mut buf).is_ok() {
                    self.held.extend_from_slice(&buf);
                }
            }
        }
        self.frames.push(frame);
    }

    fn respond(&mut self, status: ResponseStatus, seq: u16, payload: &[u8]) {
        let mut buf = BytesMut::new();
        if encode_response(status, seq, payload, &mut buf).is_ok() {
            self.outbound.extend(buf.iter().copied());
        }
    }
}

fn canned_payload(kind: InstructionKind) -> Vec<u8> {
    match kind {
        InstructionKind::ReadOutputs => vec![0b0000_0101, 0, 0, 0],
        InstructionKind::ReadStatus => SIM_STATUS_WORD.to_le_bytes().to_vec(),
        _ => Vec::new(),
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    readable: Condvar,
}

/// Simulated accelerator board.
#[derive(Debug, Clone)]
pub struct SimulatedAccelerator {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl Default for SimulatedAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAccelerator {
    /// A board that answers every frame OK.
    pub fn new() -> Self {
        Self::with_behavior(SimBehavior::Respond)
    }

    /// A board that answers every frame with `behavior`.
    pub fn with_behavior(behavior: SimBehavior) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    inbound: BytesMut::new(),
                    outbound: VecDeque::new(),
                    default_behavior: behavior,
                    script: VecDeque::new(),
                    frames: Vec::new(),
                    failing_writes: 0,
                    write_budget: None,
                    held: Vec::new(),
                    write_attempts: 0,
                    bytes_received: 0,
                    clear_to_send: true,
                }),
                readable: Condvar::new(),
            }),
            timeout: fpgalink_transport::DEFAULT_PORT_TIMEOUT,
        }
    }

    /// Use `behaviors` for the next frames, in order, before falling back to
    /// the default behavior.
    pub fn script(&self, behaviors: impl IntoIterator<Item = SimBehavior>) {
        self.lock().script.extend(behaviors);
    }

    /// Fail the next `count` write calls with a broken-pipe error.
    pub fn fail_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Accept `bytes` more bytes, then fail every write with a broken pipe.
    pub fn break_after(&self, bytes: u64) {
        self.lock().write_budget = Some(bytes);
    }

    /// Drive the clear-to-send line.
    pub fn set_clear_to_send(&self, asserted: bool) {
        self.lock().clear_to_send = asserted;
    }

    /// Frames received so far, in arrival order.
    pub fn frames(&self) -> Vec<CommandFrame> {
        self.lock().frames.clone()
    }

    /// Number of write calls, including failed ones.
    pub fn write_attempts(&self) -> u64 {
        self.lock().write_attempts
    }

    /// Total bytes accepted.
    pub fn bytes_received(&self) -> u64 {
        self.lock().bytes_received
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for SimulatedAccelerator {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();
        while state.outbound.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Err(std::io::Error::from(ErrorKind::TimedOut));
            }
            state = self
                .shared
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let n = buf.len().min(state.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedAccelerator {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        state.write_attempts += 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "simulated write failure",
            ));
        }

        let accepted = match state.write_budget {
            Some(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::BrokenPipe,
                    "simulated link break",
                ))
            }
            Some(budget) => {
                let n = buf.len().min(budget as usize);
                state.write_budget = Some(budget - n as u64);
                n
            }
            None => buf.len(),
        };

        state.ingest(&buf[..accepted]);
        if !state.outbound.is_empty() {
            self.shared.readable.notify_all();
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LinkPort for SimulatedAccelerator {
    fn name(&self) -> &str {
        "sim"
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_to_send(&mut self) -> TransportResult<bool> {
        Ok(self.lock().clear_to_send)
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.lock().outbound.clear();
        Ok(())
    }

    fn try_clone_port(&self) -> TransportResult<Box<dyn LinkPort>> {
        Ok(Box::new(self.clone()))
    }
}
