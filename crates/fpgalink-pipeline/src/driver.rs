//! Pipeline driver: frames in, result records out.
//!
//! Each cycle walks `WaitForFrame → Write → AwaitResponse → Decode → Publish`
//! and ends back at `WaitForFrame`. Blocking link calls run under
//! `spawn_blocking`, holding the link mutex only for the duration of the call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fpgalink_frame::{
    decode_response, CommandFrame, FrameCodec, FrameError, Outcome, ResponseStatus, ResultRecord,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::DriverConfig;
use crate::error::{PipelineError, Result};
use crate::link::HardwareLink;
use crate::queue::{QueueError, QueueReceiver, QueueSender};

/// Where the driver is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    WaitForFrame,
    Write,
    AwaitResponse,
    Decode,
    Publish,
    /// Cancelled, or the frame queue closed.
    Stopped,
    /// Write retries exhausted or the link failed.
    Faulted,
}

/// Counters reported when the driver exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub frames_written: u64,
    pub write_retries: u64,
    pub results: u64,
    pub completed: u64,
    pub no_response: u64,
    pub decode_errors: u64,
    pub unexpected: u64,
    /// Responses for earlier frames that arrived late and were dropped.
    pub stale_responses: u64,
}

impl DriverStats {
    fn count(&mut self, record: &ResultRecord) {
        self.results += 1;
        match record.outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::NoResponse => self.no_response += 1,
            Outcome::DecodeError { .. } => self.decode_errors += 1,
            Outcome::Unexpected { .. } => self.unexpected += 1,
        }
    }
}

/// What came back for one written frame.
enum Reply {
    Raw(Bytes),
    TimedOut,
    Malformed(String),
}

pub struct PipelineDriver {
    link: Arc<Mutex<HardwareLink>>,
    codec: FrameCodec,
    config: DriverConfig,
    cancel: CancellationToken,
    state: DriverState,
    stats: DriverStats,
}

impl PipelineDriver {
    pub fn new(
        link: Arc<Mutex<HardwareLink>>,
        codec: FrameCodec,
        config: DriverConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            codec,
            config,
            cancel,
            state: DriverState::WaitForFrame,
            stats: DriverStats::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Drive frames until cancelled, the frame queue closes, or the link fails.
    ///
    /// Publishes exactly one [`ResultRecord`] per frame written. A frame that
    /// could not be written yields no record; the driver faults instead.
    pub async fn run(
        mut self,
        mut frames: QueueReceiver<CommandFrame>,
        results: QueueSender<ResultRecord>,
    ) -> Result<DriverStats> {
        info!(
            response_timeout_ms = self.config.response_timeout.as_millis() as u64,
            write_attempts = self.config.write_attempts,
            await_busy = self.config.await_busy,
            "driver started"
        );

        let outcome = self.drive(&mut frames, &results).await;
        match &outcome {
            Ok(()) => {
                self.transition(DriverState::Stopped);
                info!(
                    frames = self.stats.frames_written,
                    results = self.stats.results,
                    no_response = self.stats.no_response,
                    decode_errors = self.stats.decode_errors,
                    stale_responses = self.stats.stale_responses,
                    "driver stopped"
                );
            }
            Err(err) => {
                self.transition(DriverState::Faulted);
                error!(error = %err, frames = self.stats.frames_written, "driver faulted");
            }
        }
        outcome.map(|()| self.stats)
    }

    async fn drive(
        &mut self,
        frames: &mut QueueReceiver<CommandFrame>,
        results: &QueueSender<ResultRecord>,
    ) -> Result<()> {
        loop {
            self.transition(DriverState::WaitForFrame);
            let frame = match frames.recv(&self.cancel).await {
                Ok(frame) => frame,
                Err(QueueError::Cancelled) | Err(QueueError::Closed) => return Ok(()),
            };

            self.transition(DriverState::Write);
            if !self.write_with_retry(&frame).await? {
                return Ok(());
            }

            self.transition(DriverState::AwaitResponse);
            let reply = match self.await_reply(&frame).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(()),
                Err(err) => {
                    // The frame went out, so it still gets its record.
                    let record = ResultRecord::no_response(&frame);
                    self.publish(record, results).await;
                    return Err(err);
                }
            };

            self.transition(DriverState::Decode);
            let record = self.decode(&frame, reply);

            if !self.publish(record, results).await {
                return Ok(());
            }
        }
    }

    /// Returns `false` once results can no longer be delivered.
    async fn publish(&mut self, record: ResultRecord, results: &QueueSender<ResultRecord>) -> bool {
        self.transition(DriverState::Publish);
        self.stats.count(&record);
        debug!(seq = record.seq, outcome = record.outcome_name(), "publishing result");
        match results.send(record, &self.cancel).await {
            Ok(()) => true,
            Err(QueueError::Cancelled) => false,
            Err(QueueError::Closed) => {
                warn!("result queue closed downstream; driver stopping");
                false
            }
        }
    }

    /// Returns `Ok(false)` if cancelled while backing off.
    async fn write_with_retry(&mut self, frame: &CommandFrame) -> Result<bool> {
        let attempts = self.config.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            let owned = frame.clone();
            let written = self.with_link(move |link| link.write_frame(&owned)).await?;

            match written {
                Ok(bytes) => {
                    trace!(seq = frame.seq, bytes, attempt, "frame written");
                    self.stats.frames_written += 1;
                    return Ok(true);
                }
                Err(err) if attempt < attempts && !err.is_partial_write() => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        seq = frame.seq,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "frame write failed; retrying"
                    );
                    self.stats.write_retries += 1;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(false),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    // Retries exhausted, or a torn frame is already on the wire.
                    return Err(PipelineError::LinkWedged {
                        seq: frame.seq,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// Returns `Ok(None)` if cancelled while waiting.
    ///
    /// Responses carrying the sequence number of an earlier frame are late
    /// answers to frames already published; they are dropped and the wait
    /// continues until the deadline.
    async fn await_reply(&mut self, frame: &CommandFrame) -> Result<Option<Reply>> {
        let deadline = Instant::now() + self.config.response_timeout;
        let max_payload = self.codec.config().max_payload;
        let mut busy: Option<Bytes> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match self.read_once(remaining).await? {
                Some(reply) => reply,
                None => return Ok(None),
            };

            let raw = match reply {
                Reply::Raw(raw) => raw,
                Reply::TimedOut => {
                    return Ok(Some(busy.map(Reply::Raw).unwrap_or(Reply::TimedOut)));
                }
                malformed => return Ok(Some(malformed)),
            };

            let Ok(response) = decode_response(&raw, max_payload) else {
                return Ok(Some(Reply::Raw(raw)));
            };
            if is_stale(frame.seq, response.seq) {
                warn!(expected = frame.seq, got = response.seq, "dropping stale response");
                self.stats.stale_responses += 1;
                continue;
            }
            if self.config.await_busy && response.status == ResponseStatus::Busy {
                trace!(seq = frame.seq, "accelerator busy; waiting for final status");
                busy = Some(raw);
                continue;
            }
            return Ok(Some(Reply::Raw(raw)));
        }
    }

    async fn read_once(&mut self, timeout: Duration) -> Result<Option<Reply>> {
        if timeout.is_zero() {
            return Ok(Some(Reply::TimedOut));
        }

        let handle = self.spawn_link(move |link| link.read_response(timeout));
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            joined = handle => joined.map_err(|err| PipelineError::task("link", err))?,
        };

        match joined {
            Ok(raw) => Ok(Some(Reply::Raw(raw))),
            Err(PipelineError::Frame(FrameError::Timeout(_))) => Ok(Some(Reply::TimedOut)),
            Err(PipelineError::Frame(FrameError::MalformedResponse(reason))) => {
                Ok(Some(Reply::Malformed(reason)))
            }
            Err(err) => Err(err),
        }
    }

    fn decode(&self, frame: &CommandFrame, reply: Reply) -> ResultRecord {
        match reply {
            Reply::Raw(raw) => match self.codec.decode(frame, &raw) {
                Ok(record) => {
                    if !record.is_completed() {
                        warn!(seq = frame.seq, outcome = record.outcome_name(), "unexpected response");
                    }
                    record
                }
                Err(err) => {
                    warn!(seq = frame.seq, error = %err, "undecodable response");
                    ResultRecord::decode_error(frame, err.to_string())
                }
            },
            Reply::Malformed(reason) => {
                warn!(seq = frame.seq, reason = %reason, "undecodable response");
                ResultRecord::decode_error(frame, reason)
            }
            Reply::TimedOut => {
                warn!(
                    seq = frame.seq,
                    timeout_ms = self.config.response_timeout.as_millis() as u64,
                    "no response"
                );
                ResultRecord::no_response(frame)
            }
        }
    }

    fn spawn_link<R, F>(&self, op: F) -> JoinHandle<Result<R>>
    where
        F: FnOnce(&mut HardwareLink) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let link = Arc::clone(&self.link);
        tokio::task::spawn_blocking(move || {
            let mut guard = link.blocking_lock();
            op(&mut guard)
        })
    }

    async fn with_link<R, F>(&self, op: F) -> Result<Result<R>>
    where
        F: FnOnce(&mut HardwareLink) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.spawn_link(op)
            .await
            .map_err(|err| PipelineError::task("link", err))
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "driver state");
            self.state = next;
        }
    }
}

/// True when `got` is behind `expected` in the wrapping sequence space.
///
/// Half the space counts as "behind", so a response that runs ahead of the
/// frame in flight is not dropped and still surfaces as unexpected.
fn is_stale(expected: u16, got: u16) -> bool {
    let behind = expected.wrapping_sub(got);
    behind != 0 && behind <= u16::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_sequence_numbers() {
        assert!(is_stale(5, 4));
        assert!(is_stale(5, 0));
        assert!(is_stale(0, u16::MAX));
        assert!(is_stale(2, 65530));

        assert!(!is_stale(5, 5));
        assert!(!is_stale(5, 6));
        assert!(!is_stale(u16::MAX, 0));
    }
}
