//! Hardware link: the single owner of the serial session.
//!
//! All calls block; the driver runs them on the blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fpgalink_frame::{CommandFrame, FrameError, FrameWriter, ResponseReader};
use fpgalink_transport::{LinkPort, SerialLink};
use tracing::{debug, error, info};

use crate::config::LinkConfig;
use crate::error::{PipelineError, Result};
use crate::observer::{LinkEvent, LinkObserver};

/// Exit status used when the link cannot be opened under exit-on-fail.
pub const LINK_OPEN_EXIT_CODE: i32 = 3;

/// An open connection: independent write and read handles to one device.
pub struct LinkSession {
    writer: FrameWriter<Box<dyn LinkPort>>,
    reader: ResponseReader<Box<dyn LinkPort>>,
}

impl LinkSession {
    fn new(port: Box<dyn LinkPort>, max_payload: usize, write_timeout: Duration) -> Result<Self> {
        let mut read_port = port.try_clone_port()?;
        read_port.discard_input()?;
        let writer = FrameWriter::with_write_timeout(port, max_payload, write_timeout)?;
        let reader = ResponseReader::with_max_payload(read_port, max_payload);
        Ok(Self { writer, reader })
    }
}

/// Owns the physical connection to the accelerator.
pub struct HardwareLink {
    device: String,
    session: Option<LinkSession>,
    observers: Vec<Arc<dyn LinkObserver>>,
    clear_to_send: Option<bool>,
}

impl HardwareLink {
    /// Open the serial device named in `config`.
    ///
    /// Failures are returned regardless of `exit_on_fail`; see
    /// [`HardwareLink::open_or_exit`] for the policy-applying variant.
    pub fn open(
        config: &LinkConfig,
        max_payload: usize,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Result<Self> {
        let port = SerialLink::open(&config.device, config.baud).map_err(PipelineError::LinkOpen)?;
        Self::from_port(
            Box::new(port),
            max_payload,
            config.write_timeout_for(max_payload),
            observers,
        )
    }

    /// Open the link, applying the exit-on-fail policy.
    ///
    /// With `exit_on_fail` set, an open failure is logged and the process
    /// exits with [`LINK_OPEN_EXIT_CODE`]. Otherwise the error is returned.
    pub fn open_or_exit(
        config: &LinkConfig,
        max_payload: usize,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Result<Self> {
        match Self::open(config, max_payload, observers) {
            Ok(link) => Ok(link),
            Err(err) if config.exit_on_fail => {
                error!(device = %config.device, baud = config.baud, error = %err, "cannot open hardware link");
                std::process::exit(LINK_OPEN_EXIT_CODE);
            }
            Err(err) => Err(err),
        }
    }

    /// Build a link over an already-open port (a real device or a simulator).
    pub fn from_port(
        port: Box<dyn LinkPort>,
        max_payload: usize,
        write_timeout: Duration,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Result<Self> {
        let device = port.name().to_string();
        let session = LinkSession::new(port, max_payload, write_timeout)?;
        let link = Self {
            device: device.clone(),
            session: Some(session),
            observers,
            clear_to_send: None,
        };
        link.notify(&LinkEvent::Opened { device });
        Ok(link)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Write one frame completely and flush it. Returns the bytes written.
    pub fn write_frame(&mut self, frame: &CommandFrame) -> Result<usize> {
        let session = self.session.as_mut().ok_or(PipelineError::LinkClosed)?;
        let written = session.writer.write_frame(frame)?;
        debug!(seq = frame.seq, kind = %frame.kind, count = frame.count, bytes = written, "wrote frame");

        let cts = if self.observers.is_empty() {
            None
        } else {
            match session.writer.get_mut().clear_to_send() {
                Ok(asserted) => Some(asserted),
                Err(err) => {
                    debug!(error = %err, "cannot sample clear-to-send");
                    None
                }
            }
        };

        self.notify(&LinkEvent::FrameWritten {
            seq: frame.seq,
            bytes: written,
        });
        if let Some(asserted) = cts {
            if self.clear_to_send != Some(asserted) {
                self.clear_to_send = Some(asserted);
                for observer in &self.observers {
                    observer.on_clear_to_send(asserted);
                }
            }
        }
        Ok(written)
    }

    /// Wait up to `timeout` for one complete response.
    ///
    /// A timeout surfaces as `PipelineError::Frame(FrameError::Timeout(_))`
    /// and leaves no partial bytes behind.
    pub fn read_response(&mut self, timeout: Duration) -> Result<Bytes> {
        let session = self.session.as_mut().ok_or(PipelineError::LinkClosed)?;
        match session.reader.read_response(timeout) {
            Ok(raw) => {
                self.notify(&LinkEvent::ResponseReceived { bytes: raw.len() });
                Ok(raw)
            }
            Err(FrameError::Timeout(timeout)) => {
                self.notify(&LinkEvent::ResponseTimedOut { timeout });
                Err(FrameError::Timeout(timeout).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Release the device. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            info!(device = %self.device, "closed hardware link");
            self.notify(&LinkEvent::Closed {
                device: self.device.clone(),
            });
        }
    }

    fn notify(&self, event: &LinkEvent) {
        for observer in &self.observers {
            observer.on_status(event);
        }
    }
}

impl Drop for HardwareLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for HardwareLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareLink")
            .field("device", &self.device)
            .field("open", &self.is_open())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use fpgalink_frame::{
        decode_response, FrameCodec, Instruction, InstructionKind, ResponseStatus,
        DEFAULT_MAX_PAYLOAD,
    };

    use super::*;
    use crate::sim::{SimBehavior, SimulatedAccelerator};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LinkEvent>>,
        cts: Mutex<Vec<bool>>,
    }

    impl LinkObserver for Recorder {
        fn on_status(&self, event: &LinkEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_clear_to_send(&self, asserted: bool) {
            self.cts.lock().unwrap().push(asserted);
        }
    }

    fn link_over(sim: &SimulatedAccelerator, observers: Vec<Arc<dyn LinkObserver>>) -> HardwareLink {
        HardwareLink::from_port(
            Box::new(sim.clone()),
            DEFAULT_MAX_PAYLOAD,
            Duration::from_millis(100),
            observers,
        )
        .unwrap()
    }

    fn status_frame(seq: u16) -> CommandFrame {
        FrameCodec::default()
            .encode(seq, &Instruction::new(1, InstructionKind::ReadStatus, vec![]))
            .unwrap()
    }

    #[test]
    fn write_then_read_response() {
        let sim = SimulatedAccelerator::new();
        let mut link = link_over(&sim, Vec::new());

        link.write_frame(&status_frame(11)).unwrap();
        let raw = link.read_response(Duration::from_millis(200)).unwrap();

        let response = decode_response(&raw, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(response.seq, 11);
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(sim.frames().len(), 1);
    }

    #[test]
    fn silent_device_times_out() {
        let sim = SimulatedAccelerator::with_behavior(SimBehavior::Silent);
        let mut link = link_over(&sim, Vec::new());

        link.write_frame(&status_frame(1)).unwrap();
        let err = link.read_response(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, PipelineError::Frame(FrameError::Timeout(_))));
    }

    #[test]
    fn close_is_idempotent_and_blocks_io() {
        let recorder = Arc::new(Recorder::default());
        let sim = SimulatedAccelerator::new();
        let mut link = link_over(&sim, vec![recorder.clone() as Arc<dyn LinkObserver>]);

        link.close();
        link.close();
        drop(link);

        let closed = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, LinkEvent::Closed { .. }))
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn io_after_close_fails() {
        let sim = SimulatedAccelerator::new();
        let mut link = link_over(&sim, Vec::new());
        link.close();

        assert!(!link.is_open());
        assert!(matches!(
            link.write_frame(&status_frame(0)),
            Err(PipelineError::LinkClosed)
        ));
        assert!(matches!(
            link.read_response(Duration::from_millis(5)),
            Err(PipelineError::LinkClosed)
        ));
    }

    #[test]
    fn observers_see_events_and_cts_changes() {
        let recorder = Arc::new(Recorder::default());
        let sim = SimulatedAccelerator::with_behavior(SimBehavior::Silent);
        let mut link = link_over(&sim, vec![recorder.clone() as Arc<dyn LinkObserver>]);

        link.write_frame(&status_frame(1)).unwrap();
        link.write_frame(&status_frame(2)).unwrap();
        sim.set_clear_to_send(false);
        link.write_frame(&status_frame(3)).unwrap();
        let _ = link.read_response(Duration::from_millis(10));
        link.close();

        let events = recorder.events.lock().unwrap().clone();
        assert!(matches!(events.first(), Some(LinkEvent::Opened { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, LinkEvent::FrameWritten { .. }))
                .count(),
            3
        );
        assert!(events
            .iter()
            .any(|event| matches!(event, LinkEvent::ResponseTimedOut { .. })));
        assert!(matches!(events.last(), Some(LinkEvent::Closed { .. })));
        assert_eq!(*recorder.cts.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn open_missing_device_without_exit_returns_error() {
        let config = LinkConfig {
            device: format!("/dev/fpgalink-missing-{}", std::process::id()),
            exit_on_fail: false,
            ..LinkConfig::default()
        };
        let err = HardwareLink::open_or_exit(&config, DEFAULT_MAX_PAYLOAD, Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::LinkOpen(_)));
        assert!(err.is_link_failure());
    }
}
