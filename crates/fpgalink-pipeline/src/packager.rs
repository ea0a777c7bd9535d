//! Command packager: instructions in, command frames out.

use std::time::Duration;

use fpgalink_frame::{CommandFrame, FrameCodec, Instruction};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PackagerConfig, PackagerStrategy};
use crate::queue::{QueueError, QueueReceiver, QueueSender};

/// Packaging strategy. Exactly one runs per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packager {
    /// One frame per instruction, emitted as soon as it arrives.
    Simple,
    /// Coalesce runs of same-kind batchable instructions, up to `window` per
    /// frame. Only instructions already queued (or arriving within `linger`)
    /// are packed together, and a change of kind closes the run.
    Batching { window: usize, linger: Duration },
}

/// Counters reported when the packager exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PackagerStats {
    pub instructions: u64,
    pub frames: u64,
    pub dropped: u64,
}

enum Flow {
    Continue,
    Stop,
}

impl Packager {
    pub fn from_config(config: &PackagerConfig) -> Self {
        match config.strategy {
            PackagerStrategy::Simple => Packager::Simple,
            PackagerStrategy::Batching => Packager::Batching {
                window: config.batch_window.max(1),
                linger: config.batch_linger,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packager::Simple => "simple",
            Packager::Batching { .. } => "batching",
        }
    }

    /// Run until cancelled, the instruction queue closes, or the frame queue
    /// is closed downstream.
    ///
    /// Frames get consecutive wrapping sequence numbers starting at zero.
    /// Malformed instructions are logged and dropped. Dropping `frames` on
    /// exit closes the frame queue so the driver drains and stops.
    pub async fn run(
        self,
        codec: FrameCodec,
        mut instructions: QueueReceiver<Instruction>,
        frames: QueueSender<CommandFrame>,
        cancel: CancellationToken,
    ) -> PackagerStats {
        let mut stage = Stage {
            codec,
            frames,
            cancel,
            next_seq: 0,
            stats: PackagerStats::default(),
        };
        info!(strategy = self.name(), "packager started");

        let mut carry: Option<Instruction> = None;
        loop {
            let first = match carry.take() {
                Some(instruction) => instruction,
                None => match instructions.recv(&stage.cancel).await {
                    Ok(instruction) => instruction,
                    Err(QueueError::Cancelled) => {
                        debug!("packager cancelled");
                        break;
                    }
                    Err(QueueError::Closed) => {
                        debug!("instruction queue closed");
                        break;
                    }
                },
            };

            let flow = match self {
                Packager::Simple => stage.emit_group(vec![first], 1).await,
                Packager::Batching { window, linger } => {
                    let limit = window.min(stage.codec.max_records(first.kind));
                    let gathered =
                        gather(first, &mut instructions, limit, linger, &stage.cancel).await;
                    carry = gathered.next;
                    match stage.emit_group(gathered.group, window).await {
                        Flow::Continue if !gathered.closed || carry.is_some() => Flow::Continue,
                        _ => Flow::Stop,
                    }
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        info!(
            instructions = stage.stats.instructions,
            frames = stage.stats.frames,
            dropped = stage.stats.dropped,
            "packager stopped"
        );
        stage.stats
    }
}

/// One run of same-kind instructions, ready to pack.
struct Gathered {
    group: Vec<Instruction>,
    /// The instruction that ended the run by changing kind. It opens the next one.
    next: Option<Instruction>,
    /// The instruction queue turned out to be closed.
    closed: bool,
}

/// Collect `first` plus whatever same-kind instructions are ready, up to
/// `limit` of them.
async fn gather(
    first: Instruction,
    instructions: &mut QueueReceiver<Instruction>,
    limit: usize,
    linger: Duration,
    cancel: &CancellationToken,
) -> Gathered {
    let kind = first.kind;
    let mut gathered = Gathered {
        group: vec![first],
        next: None,
        closed: false,
    };
    let deadline = Instant::now() + linger;

    while gathered.group.len() < limit {
        let next = match instructions.try_recv() {
            Some(next) => next,
            None => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match instructions.recv_within(remaining, cancel).await {
                    Ok(Some(next)) => next,
                    Ok(None) => break,
                    // The group is flushed either way; cancellation is seen at
                    // the next send or receive.
                    Err(QueueError::Cancelled) => break,
                    Err(QueueError::Closed) => {
                        gathered.closed = true;
                        break;
                    }
                }
            }
        };

        if next.kind != kind {
            gathered.next = Some(next);
            break;
        }
        gathered.group.push(next);
    }

    gathered
}

struct Stage {
    codec: FrameCodec,
    frames: QueueSender<CommandFrame>,
    cancel: CancellationToken,
    next_seq: u16,
    stats: PackagerStats,
}

impl Stage {
    async fn emit_group(&mut self, group: Vec<Instruction>, window: usize) -> Flow {
        self.stats.instructions += group.len() as u64;

        let valid: Vec<Instruction> = group
            .into_iter()
            .filter(|instruction| match self.codec.validate(instruction) {
                Ok(()) => true,
                Err(err) => {
                    warn!(id = %instruction.id, kind = %instruction.kind, error = %err, "dropping malformed instruction");
                    self.stats.dropped += 1;
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return Flow::Continue;
        }

        let encoded = match self.codec.encode_batch(self.next_seq, &valid, window) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, count = valid.len(), "dropping instructions that failed to encode");
                self.stats.dropped += valid.len() as u64;
                return Flow::Continue;
            }
        };

        for frame in encoded {
            self.next_seq = frame.seq.wrapping_add(1);
            debug!(seq = frame.seq, kind = %frame.kind, count = frame.count, "packaged frame");
            match self.frames.send(frame, &self.cancel).await {
                Ok(()) => self.stats.frames += 1,
                Err(QueueError::Cancelled) => return Flow::Stop,
                Err(QueueError::Closed) => {
                    warn!("frame queue closed downstream; packager stopping");
                    return Flow::Stop;
                }
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use fpgalink_frame::{InstructionId, InstructionKind};

    use super::*;
    use crate::queue::bounded;

    fn weight(id: u64, source: i32) -> Instruction {
        Instruction::new(id, InstructionKind::WriteWeight, vec![0, source, 1])
    }

    fn step(id: u64) -> Instruction {
        Instruction::new(id, InstructionKind::Step, vec![1])
    }

    async fn package(packager: Packager, input: Vec<Instruction>) -> (Vec<CommandFrame>, PackagerStats) {
        let cancel = CancellationToken::new();
        let (in_tx, in_rx) = bounded(input.len().max(1));
        let (out_tx, mut out_rx) = bounded(64);

        for instruction in input {
            in_tx.send(instruction, &cancel).await.unwrap();
        }
        drop(in_tx);

        let stats = packager
            .run(FrameCodec::default(), in_rx, out_tx, cancel.clone())
            .await;

        let mut frames = Vec::new();
        while let Ok(frame) = out_rx.recv(&cancel).await {
            frames.push(frame);
        }
        (frames, stats)
    }

    fn ids(frames: &[CommandFrame]) -> Vec<u64> {
        frames
            .iter()
            .flat_map(|frame| frame.instruction_ids.iter().map(|id| id.0))
            .collect()
    }

    #[test]
    fn from_config_selects_strategy() {
        let simple = PackagerConfig {
            strategy: PackagerStrategy::Simple,
            ..PackagerConfig::default()
        };
        assert_eq!(Packager::from_config(&simple), Packager::Simple);
        assert_eq!(
            Packager::from_config(&PackagerConfig::default()),
            Packager::Batching {
                window: 8,
                linger: Duration::ZERO
            }
        );
    }

    #[tokio::test]
    async fn simple_is_one_to_one() {
        let input = vec![weight(1, 0), weight(2, 1), step(3)];
        let (frames, stats) = package(Packager::Simple, input).await;

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.count == 1));
        assert_eq!(ids(&frames), vec![1, 2, 3]);
        let seqs: Vec<_> = frames.iter().map(|frame| frame.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(
            stats,
            PackagerStats {
                instructions: 3,
                frames: 3,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn batching_packs_queued_runs() {
        let input = vec![weight(1, 0), weight(2, 1), step(3)];
        let packager = Packager::Batching {
            window: 2,
            linger: Duration::ZERO,
        };
        let (frames, _) = package(packager, input).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].instruction_ids, vec![InstructionId(1), InstructionId(2)]);
        assert_eq!(frames[1].instruction_ids, vec![InstructionId(3)]);
        assert_eq!((frames[0].seq, frames[1].seq), (0, 1));
    }

    #[tokio::test]
    async fn kind_change_does_not_consume_window() {
        let input = vec![
            Instruction::new(1, InstructionKind::SetInput, vec![0, 10]),
            weight(2, 0),
            weight(3, 1),
        ];
        let packager = Packager::Batching {
            window: 2,
            linger: Duration::ZERO,
        };
        let (frames, stats) = package(packager, input).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].instruction_ids, vec![InstructionId(1)]);
        assert_eq!(frames[1].instruction_ids, vec![InstructionId(2), InstructionId(3)]);
        assert_eq!(stats.frames, 2);
    }

    #[tokio::test]
    async fn kind_change_opens_next_frame() {
        let input = vec![
            weight(1, 0),
            weight(2, 1),
            Instruction::new(3, InstructionKind::SetInput, vec![1, -5]),
        ];
        let packager = Packager::Batching {
            window: 8,
            linger: Duration::from_millis(20),
        };
        let (frames, stats) = package(packager, input).await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, InstructionKind::WriteWeight);
        assert_eq!(frames[0].instruction_ids, vec![InstructionId(1), InstructionId(2)]);
        assert_eq!(frames[1].kind, InstructionKind::SetInput);
        assert_eq!(frames[1].instruction_ids, vec![InstructionId(3)]);
        assert_eq!(stats.instructions, 3);
    }

    #[tokio::test]
    async fn non_batchable_kinds_are_not_held_back() {
        let (in_tx, in_rx) = bounded(4);
        let (out_tx, mut out_rx) = bounded(4);
        let cancel = CancellationToken::new();
        let packager = Packager::Batching {
            window: 8,
            linger: Duration::from_secs(30),
        };
        let task = tokio::spawn(packager.run(FrameCodec::default(), in_rx, out_tx, cancel.clone()));

        in_tx.send(step(1), &cancel).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), out_rx.recv(&cancel))
            .await
            .expect("step should not wait out the linger")
            .unwrap();
        assert_eq!(frame.instruction_ids, vec![InstructionId(1)]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_instruction_is_dropped() {
        let input = vec![
            weight(1, 0),
            Instruction::new(2, InstructionKind::WriteWeight, vec![0, 1, 999]),
            weight(3, 2),
        ];
        let (frames, stats) = package(Packager::Simple, input).await;

        assert_eq!(ids(&frames), vec![1, 3]);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.frames, 2);
    }

    #[tokio::test]
    async fn batching_preserves_order_across_kinds() {
        let input = vec![
            weight(1, 0),
            step(2),
            weight(3, 1),
            weight(4, 2),
            Instruction::new(5, InstructionKind::SetInput, vec![0, 10]),
            weight(6, 3),
        ];
        let packager = Packager::Batching {
            window: 8,
            linger: Duration::ZERO,
        };
        let (frames, stats) = package(packager, input).await;

        assert_eq!(ids(&frames), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(stats.instructions, 6);
        assert!(frames.iter().all(|frame| frame
            .instruction_ids
            .len()
            == frame.count as usize));
    }

    #[tokio::test]
    async fn cancellation_stops_packager() {
        let cancel = CancellationToken::new();
        let (_in_tx, in_rx) = bounded::<Instruction>(4);
        let (out_tx, _out_rx) = bounded(4);

        let task = tokio::spawn(Packager::Simple.run(
            FrameCodec::default(),
            in_rx,
            out_tx,
            cancel.clone(),
        ));
        cancel.cancel();

        let stats = task.await.unwrap();
        assert_eq!(stats, PackagerStats::default());
    }
}
