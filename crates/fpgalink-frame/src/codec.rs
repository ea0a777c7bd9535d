use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::instruction::{Instruction, InstructionId, InstructionKind, ParamRange};
use crate::result::{Response, ResponseStatus, ResultRecord};

/// First byte of every host → accelerator frame.
pub const COMMAND_SYNC: u8 = 0xA5;

/// First byte of every accelerator → host response.
pub const RESPONSE_SYNC: u8 = 0x5A;

/// Command header: sync (1) + opcode (1) + flags (1) + seq (2) + count (1) + length (2).
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Response header: sync (1) + status (1) + seq (2) + length (2).
pub const RESPONSE_HEADER_SIZE: usize = 6;

/// Trailing CRC-8.
pub const CHECKSUM_SIZE: usize = 1;

/// Default maximum payload size in either direction.
pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

/// The count field is a single byte.
pub const MAX_RECORDS_PER_FRAME: usize = u8::MAX as usize;

/// Frame carries a trailing CRC-8.
pub const FLAG_CHECKSUM: u8 = 0x01;

/// Frame packs more than one record.
pub const FLAG_BATCH: u8 = 0x02;

/// A wire-ready command for the accelerator.
///
/// `instruction_ids` never goes on the wire; it is the host-side record of
/// which instructions the payload carries, in payload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub seq: u16,
    pub kind: InstructionKind,
    pub count: u8,
    pub payload: Bytes,
    pub checksummed: bool,
    pub instruction_ids: Vec<InstructionId>,
}

impl CommandFrame {
    pub fn opcode(&self) -> u8 {
        self.kind.opcode()
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.checksummed {
            flags |= FLAG_CHECKSUM;
        }
        if self.is_batch() {
            flags |= FLAG_BATCH;
        }
        flags
    }

    /// True when more than one instruction shares this frame.
    pub fn is_batch(&self) -> bool {
        self.count > 1
    }

    /// The total wire size of this frame (header + payload + checksum).
    pub fn wire_size(&self) -> usize {
        COMMAND_HEADER_SIZE + self.payload.len() + if self.checksummed { CHECKSUM_SIZE } else { 0 }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_command(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// CRC-8 (polynomial 0x07, init 0x00, no reflection).
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Encode a command frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬────────┬───────┬──────────┬───────┬──────────┬──────────────┬────────┐
/// │ 0xA5 │ Opcode │ Flags │ Seq      │ Count │ Length   │ Payload      │ CRC-8  │
/// │ (1B) │ (1B)   │ (1B)  │ (2B LE)  │ (1B)  │ (2B LE)  │ (Length B)   │ (opt.) │
/// └──────┴────────┴───────┴──────────┴───────┴──────────┴──────────────┴────────┘
/// ```
pub fn encode_command(frame: &CommandFrame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: u16::MAX as usize,
        });
    }
    let start = dst.len();
    dst.reserve(frame.wire_size());
    dst.put_u8(COMMAND_SYNC);
    dst.put_u8(frame.opcode());
    dst.put_u8(frame.flags());
    dst.put_u16_le(frame.seq);
    dst.put_u8(frame.count);
    dst.put_u16_le(frame.payload.len() as u16);
    dst.put_slice(&frame.payload);
    if frame.checksummed {
        let crc = crc8(&dst[start..]);
        dst.put_u8(crc);
    }
    Ok(())
}

/// Parse a command frame from a buffer, the way the accelerator does.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. The returned frame
/// has no instruction ids; those never travel on the wire.
pub fn parse_command(src: &mut BytesMut, max_payload: usize) -> Result<Option<CommandFrame>> {
    if src.len() < COMMAND_HEADER_SIZE {
        return Ok(None);
    }
    if src[0] != COMMAND_SYNC {
        return Err(FrameError::MalformedFrame(format!(
            "bad sync byte 0x{:02X}",
            src[0]
        )));
    }

    let opcode = src[1];
    let flags = src[2];
    let seq = u16::from_le_bytes([src[3], src[4]]);
    let count = src[5];
    let payload_len = u16::from_le_bytes([src[6], src[7]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let checksummed = flags & FLAG_CHECKSUM != 0;
    let total = COMMAND_HEADER_SIZE + payload_len + if checksummed { CHECKSUM_SIZE } else { 0 };
    if src.len() < total {
        return Ok(None);
    }

    let kind = InstructionKind::from_opcode(opcode)
        .ok_or_else(|| FrameError::MalformedFrame(format!("unknown opcode 0x{opcode:02X}")))?;
    if count == 0 {
        return Err(FrameError::MalformedFrame("zero record count".to_string()));
    }
    if (flags & FLAG_BATCH != 0) != (count > 1) {
        return Err(FrameError::MalformedFrame(format!(
            "batch flag disagrees with count {count}"
        )));
    }
    if payload_len != count as usize * kind.record_size() {
        return Err(FrameError::MalformedFrame(format!(
            "{count} {kind} record(s) need {} bytes, got {payload_len}",
            count as usize * kind.record_size()
        )));
    }
    if checksummed {
        let expected = crc8(&src[..total - CHECKSUM_SIZE]);
        let actual = src[total - CHECKSUM_SIZE];
        if expected != actual {
            return Err(FrameError::MalformedFrame(format!(
                "checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})"
            )));
        }
    }

    src.advance(COMMAND_HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    if checksummed {
        src.advance(CHECKSUM_SIZE);
    }

    Ok(Some(CommandFrame {
        seq,
        kind,
        count,
        payload,
        checksummed,
        instruction_ids: Vec::new(),
    }))
}

/// Encode an accelerator response. The checksum is always present.
///
/// Wire format:
/// ```text
/// ┌──────┬────────┬──────────┬──────────┬──────────────┬───────┐
/// │ 0x5A │ Status │ Seq      │ Length   │ Payload      │ CRC-8 │
/// │ (1B) │ (1B)   │ (2B LE)  │ (2B LE)  │ (Length B)   │ (1B)  │
/// └──────┴────────┴──────────┴──────────┴──────────────┴───────┘
/// ```
pub fn encode_response(
    status: ResponseStatus,
    seq: u16,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        });
    }
    let start = dst.len();
    dst.reserve(RESPONSE_HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    dst.put_u8(RESPONSE_SYNC);
    dst.put_u8(status.code());
    dst.put_u16_le(seq);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    let crc = crc8(&dst[start..]);
    dst.put_u8(crc);
    Ok(())
}

/// Total wire length of the response at the front of `src`.
///
/// Returns `Ok(None)` until the header is complete. `src` must start with
/// [`RESPONSE_SYNC`].
pub fn response_len(src: &[u8], max_payload: usize) -> Result<Option<usize>> {
    if src.len() < RESPONSE_HEADER_SIZE {
        return Ok(None);
    }
    let payload_len = u16::from_le_bytes([src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(FrameError::MalformedResponse(format!(
            "declared payload of {payload_len} bytes exceeds max {max_payload}"
        )));
    }
    Ok(Some(RESPONSE_HEADER_SIZE + payload_len + CHECKSUM_SIZE))
}

/// Decode one complete response.
///
/// Fails with [`FrameError::MalformedResponse`] on a bad sync byte, a length
/// that disagrees with the header, or a checksum mismatch. Unknown status
/// codes decode fine; judging them is left to the caller.
pub fn decode_response(raw: &[u8], max_payload: usize) -> Result<Response> {
    let min = RESPONSE_HEADER_SIZE + CHECKSUM_SIZE;
    if raw.len() < min {
        return Err(FrameError::MalformedResponse(format!(
            "{} bytes is shorter than the {min}-byte minimum",
            raw.len()
        )));
    }
    if raw[0] != RESPONSE_SYNC {
        return Err(FrameError::MalformedResponse(format!(
            "bad sync byte 0x{:02X}",
            raw[0]
        )));
    }

    let expected_len = response_len(raw, max_payload)?.unwrap_or(min);
    if raw.len() != expected_len {
        return Err(FrameError::MalformedResponse(format!(
            "length mismatch (header declares {expected_len} bytes, got {})",
            raw.len()
        )));
    }

    let expected_crc = crc8(&raw[..raw.len() - CHECKSUM_SIZE]);
    let actual_crc = raw[raw.len() - CHECKSUM_SIZE];
    if expected_crc != actual_crc {
        return Err(FrameError::MalformedResponse(format!(
            "checksum mismatch (expected 0x{expected_crc:02X}, got 0x{actual_crc:02X})"
        )));
    }

    Ok(Response {
        status: ResponseStatus::from_code(raw[1]),
        seq: u16::from_le_bytes([raw[2], raw[3]]),
        payload: Bytes::copy_from_slice(&raw[RESPONSE_HEADER_SIZE..raw.len() - CHECKSUM_SIZE]),
    })
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Maximum payload size in bytes. Default: 4 KiB.
    pub max_payload: usize,
    /// Append a CRC-8 to command frames. Default: true.
    pub checksum: bool,
    /// Neuron table size. Default: 1024.
    pub max_neurons: u16,
    /// Number of input channels. Default: 256.
    pub max_inputs: u16,
    /// Longest run a single `step` may request. Default: 4096.
    pub max_periods: u16,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            checksum: true,
            max_neurons: 1024,
            max_inputs: 256,
            max_periods: 4096,
        }
    }
}

/// Encodes instructions into command frames and decodes responses.
///
/// Stateless apart from its limits; sequence numbers are supplied by the
/// caller.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: CodecConfig,
}

impl FrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Largest number of `kind` records one frame can hold.
    pub fn max_records(&self, kind: InstructionKind) -> usize {
        if !kind.is_batchable() {
            return 1;
        }
        (self.config.max_payload / kind.record_size().max(1))
            .clamp(1, MAX_RECORDS_PER_FRAME)
    }

    /// Check parameter count and ranges.
    pub fn validate(&self, instruction: &Instruction) -> Result<()> {
        let specs = instruction.kind.params();
        if instruction.params.len() != specs.len() {
            return Err(FrameError::malformed(
                instruction.id,
                format!(
                    "{} takes {} parameter(s), got {}",
                    instruction.kind,
                    specs.len(),
                    instruction.params.len()
                ),
            ));
        }

        for (spec, &value) in specs.iter().zip(&instruction.params) {
            let (min, max) = match spec.range {
                ParamRange::Neuron => (0, self.config.max_neurons as i32 - 1),
                ParamRange::Input => (0, self.config.max_inputs as i32 - 1),
                ParamRange::Periods => (1, self.config.max_periods as i32),
                ParamRange::Fixed(min, max) => (min, max),
            };
            if value < min || value > max {
                return Err(FrameError::malformed(
                    instruction.id,
                    format!("{} = {value} outside {min}..={max}", spec.name),
                ));
            }
        }
        Ok(())
    }

    /// Encode one instruction into its own frame.
    pub fn encode(&self, seq: u16, instruction: &Instruction) -> Result<CommandFrame> {
        self.pack(seq, std::slice::from_ref(instruction))
    }

    /// Encode a run of instructions, packing consecutive same-kind batchable
    /// instructions into frames of at most `window` records.
    ///
    /// Frames get consecutive sequence numbers starting at `first_seq`.
    /// Input order is preserved: flattening the frames' instruction ids gives
    /// back the input ids in order.
    pub fn encode_batch(
        &self,
        first_seq: u16,
        instructions: &[Instruction],
        window: usize,
    ) -> Result<Vec<CommandFrame>> {
        let mut frames = Vec::new();
        let mut seq = first_seq;
        let mut rest = instructions;

        while let Some(first) = rest.first() {
            let limit = window.max(1).min(self.max_records(first.kind));
            let run = rest
                .iter()
                .take(limit)
                .take_while(|instruction| instruction.kind == first.kind)
                .count();
            let (group, tail) = rest.split_at(run);
            frames.push(self.pack(seq, group)?);
            seq = seq.wrapping_add(1);
            rest = tail;
        }

        Ok(frames)
    }

    /// Pack a group of same-kind instructions into one frame.
    pub fn pack(&self, seq: u16, group: &[Instruction]) -> Result<CommandFrame> {
        let first = group
            .first()
            .ok_or_else(|| FrameError::MalformedFrame("empty instruction group".to_string()))?;
        let kind = first.kind;
        if group.len() > self.max_records(kind) {
            return Err(FrameError::MalformedFrame(format!(
                "{} {kind} records exceed the {} allowed per frame",
                group.len(),
                self.max_records(kind)
            )));
        }

        let mut payload = BytesMut::with_capacity(group.len() * kind.record_size());
        for instruction in group {
            if instruction.kind != kind {
                return Err(FrameError::malformed(
                    instruction.id,
                    format!("{} cannot share a frame with {kind}", instruction.kind),
                ));
            }
            self.validate(instruction)?;
            for (spec, &value) in kind.params().iter().zip(&instruction.params) {
                let raw = if spec.signed {
                    value as i16 as u16
                } else {
                    value as u16
                };
                payload.put_u16_le(raw);
            }
        }

        if payload.len() > self.config.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload,
            });
        }

        Ok(CommandFrame {
            seq,
            kind,
            count: group.len() as u8,
            payload: payload.freeze(),
            checksummed: self.config.checksum,
            instruction_ids: group.iter().map(|instruction| instruction.id).collect(),
        })
    }

    /// Parameter lists carried by a frame, in payload order.
    pub fn records(&self, frame: &CommandFrame) -> Result<Vec<Vec<i32>>> {
        let kind = frame.kind;
        let expected = frame.count as usize * kind.record_size();
        if frame.payload.len() != expected {
            return Err(FrameError::MalformedFrame(format!(
                "{} {kind} record(s) need {expected} bytes, got {}",
                frame.count,
                frame.payload.len()
            )));
        }

        let mut payload = frame.payload.clone();
        let records: Vec<Vec<i32>> = (0..frame.count)
            .map(|_| {
                kind.params()
                    .iter()
                    .map(|spec| {
                        let raw = payload.get_u16_le();
                        if spec.signed {
                            raw as i16 as i32
                        } else {
                            raw as i32
                        }
                    })
                    .collect::<Vec<i32>>()
            })
            .collect();
        Ok(records)
    }

    /// Re-expand a frame into the instructions it was built from.
    pub fn expand(&self, frame: &CommandFrame) -> Result<Vec<Instruction>> {
        let records = self.records(frame)?;
        if records.len() != frame.instruction_ids.len() {
            return Err(FrameError::MalformedFrame(format!(
                "{} record(s) but {} instruction id(s)",
                records.len(),
                frame.instruction_ids.len()
            )));
        }
        Ok(frame
            .instruction_ids
            .iter()
            .zip(records)
            .map(|(&id, params)| Instruction {
                id,
                kind: frame.kind,
                params,
            })
            .collect())
    }

    /// Decode a raw response and correlate it with the frame it answers.
    pub fn decode(&self, frame: &CommandFrame, raw: &[u8]) -> Result<ResultRecord> {
        let response = decode_response(raw, self.config.max_payload)?;
        Ok(ResultRecord::from_response(frame, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Outcome;

    fn weight(id: u64, target: i32, source: i32, value: i32) -> Instruction {
        Instruction::new(id, InstructionKind::WriteWeight, vec![target, source, value])
    }

    fn step(id: u64, periods: i32) -> Instruction {
        Instruction::new(id, InstructionKind::Step, vec![periods])
    }

    fn ids(frames: &[CommandFrame]) -> Vec<u64> {
        frames
            .iter()
            .flat_map(|frame| frame.instruction_ids.iter().map(|id| id.0))
            .collect()
    }

    #[test]
    fn crc8_check_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8(&[]), 0x00);
    }

    #[test]
    fn encode_single_weight_layout() {
        let codec = FrameCodec::default();
        let frame = codec.encode(0x0102, &weight(1, 3, 4, -1)).unwrap();
        let wire = frame.to_bytes().unwrap();

        assert_eq!(
            &wire[..COMMAND_HEADER_SIZE],
            &[COMMAND_SYNC, 0x03, FLAG_CHECKSUM, 0x02, 0x01, 1, 6, 0]
        );
        assert_eq!(
            &wire[COMMAND_HEADER_SIZE..COMMAND_HEADER_SIZE + 6],
            &[3, 0, 4, 0, 0xFF, 0xFF]
        );
        assert_eq!(wire.len(), frame.wire_size());
        assert_eq!(wire[wire.len() - 1], crc8(&wire[..wire.len() - 1]));
    }

    #[test]
    fn encode_without_checksum() {
        let codec = FrameCodec::new(CodecConfig {
            checksum: false,
            ..CodecConfig::default()
        });
        let frame = codec
            .encode(0, &Instruction::new(1, InstructionKind::Reset, vec![]))
            .unwrap();
        let wire = frame.to_bytes().unwrap();
        assert_eq!(wire.len(), COMMAND_HEADER_SIZE);
        assert_eq!(wire[2], 0);
    }

    #[test]
    fn parse_matches_encode() {
        let codec = FrameCodec::default();
        let frame = codec
            .pack(9, &[weight(1, 0, 1, 5), weight(2, 0, 2, -7)])
            .unwrap();
        let mut wire = BytesMut::from(frame.to_bytes().unwrap().as_ref());

        let parsed = parse_command(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert!(wire.is_empty());
        assert_eq!(parsed.seq, 9);
        assert_eq!(parsed.count, 2);
        assert!(parsed.is_batch());
        assert_eq!(codec.records(&parsed).unwrap(), vec![vec![0, 1, 5], vec![0, 2, -7]]);
    }

    #[test]
    fn parse_incomplete_frame() {
        let codec = FrameCodec::default();
        let frame = codec.encode(1, &step(1, 10)).unwrap();
        let wire = frame.to_bytes().unwrap();

        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(parse_command(&mut partial, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());

        let mut header_only = BytesMut::from(&wire[..3]);
        assert!(parse_command(&mut header_only, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
    }

    #[test]
    fn parse_rejects_corrupted_checksum() {
        let codec = FrameCodec::default();
        let frame = codec.encode(1, &step(1, 10)).unwrap();
        let mut wire = BytesMut::from(frame.to_bytes().unwrap().as_ref());
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let err = parse_command(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame(msg) if msg.contains("checksum")));
    }

    #[test]
    fn validate_rejects_wrong_arity() {
        let codec = FrameCodec::default();
        let err = codec
            .encode(0, &Instruction::new(5, InstructionKind::WriteWeight, vec![1, 2]))
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::MalformedInstruction { id, .. } if id == InstructionId(5)
        ));
    }

    #[test]
    fn validate_enforces_weight_width() {
        let codec = FrameCodec::default();
        assert!(codec.validate(&weight(1, 0, 0, 255)).is_ok());
        assert!(codec.validate(&weight(1, 0, 0, -256)).is_ok());
        assert!(codec.validate(&weight(1, 0, 0, 256)).is_err());
        assert!(codec.validate(&weight(1, 0, 0, -257)).is_err());
    }

    #[test]
    fn validate_uses_configured_limits() {
        let codec = FrameCodec::new(CodecConfig {
            max_neurons: 4,
            max_periods: 8,
            ..CodecConfig::default()
        });
        assert!(codec.validate(&weight(1, 3, 0, 0)).is_ok());
        assert!(codec.validate(&weight(1, 4, 0, 0)).is_err());
        assert!(codec.validate(&step(2, 8)).is_ok());
        assert!(codec.validate(&step(2, 0)).is_err());
        assert!(codec.validate(&step(2, 9)).is_err());
    }

    #[test]
    fn encode_batch_packs_same_kind_runs() {
        let codec = FrameCodec::default();
        let input = vec![weight(1, 0, 1, 1), weight(2, 0, 2, 2), step(3, 1)];

        let frames = codec.encode_batch(0, &input, 2).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].count, 2);
        assert_eq!(frames[0].kind, InstructionKind::WriteWeight);
        assert_eq!(frames[1].count, 1);
        assert_eq!(frames[1].kind, InstructionKind::Step);
        assert_eq!((frames[0].seq, frames[1].seq), (0, 1));
        assert_eq!(ids(&frames), vec![1, 2, 3]);
    }

    #[test]
    fn encode_batch_respects_window() {
        let codec = FrameCodec::default();
        let input: Vec<_> = (1..=5).map(|id| weight(id, 0, id as i32, 0)).collect();

        let frames = codec.encode_batch(10, &input, 2).unwrap();

        let counts: Vec<_> = frames.iter().map(|frame| frame.count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(ids(&frames), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn encode_batch_never_packs_non_batchable_kinds() {
        let codec = FrameCodec::default();
        let input = vec![step(1, 1), step(2, 1), step(3, 1)];
        let frames = codec.encode_batch(0, &input, 8).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| !frame.is_batch()));
    }

    #[test]
    fn encode_batch_seq_wraps() {
        let codec = FrameCodec::default();
        let input = vec![step(1, 1), step(2, 1)];
        let frames = codec.encode_batch(u16::MAX, &input, 1).unwrap();
        assert_eq!((frames[0].seq, frames[1].seq), (u16::MAX, 0));
    }

    #[test]
    fn expand_reverses_batching() {
        let codec = FrameCodec::default();
        let input = vec![
            weight(1, 0, 1, 10),
            weight(2, 0, 2, -10),
            Instruction::new(3, InstructionKind::SetInput, vec![7, -300]),
            weight(4, 1, 1, 0),
        ];

        let frames = codec.encode_batch(0, &input, 8).unwrap();
        let expanded: Vec<_> = frames
            .iter()
            .flat_map(|frame| codec.expand(frame).unwrap())
            .collect();

        assert_eq!(frames.len(), 3);
        assert_eq!(expanded, input);
    }

    #[test]
    fn pack_rejects_mixed_kinds() {
        let codec = FrameCodec::default();
        let err = codec.pack(0, &[weight(1, 0, 0, 0), step(2, 1)]).unwrap_err();
        assert!(matches!(err, FrameError::MalformedInstruction { .. }));
    }

    #[test]
    fn max_records_bounded_by_payload() {
        let codec = FrameCodec::new(CodecConfig {
            max_payload: 12,
            ..CodecConfig::default()
        });
        assert_eq!(codec.max_records(InstructionKind::WriteWeight), 2);
        assert_eq!(codec.max_records(InstructionKind::Step), 1);
        assert_eq!(
            FrameCodec::default().max_records(InstructionKind::SetInput),
            MAX_RECORDS_PER_FRAME
        );
    }

    #[test]
    fn decode_well_formed_response() {
        let codec = FrameCodec::default();
        let frame = codec
            .encode(4, &Instruction::new(8, InstructionKind::ReadOutputs, vec![]))
            .unwrap();
        let mut raw = BytesMut::new();
        encode_response(ResponseStatus::Ok, 4, &[0b1010_0001], &mut raw).unwrap();

        let record = codec.decode(&frame, &raw).unwrap();
        assert_eq!(record.outcome, Outcome::Completed);
        assert_eq!(record.status, Some(ResponseStatus::Ok));
        assert_eq!(record.payload, vec![0b1010_0001]);
        assert_eq!(record.instruction_ids, vec![InstructionId(8)]);
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let mut raw = BytesMut::new();
        encode_response(ResponseStatus::Ok, 1, b"abc", &mut raw).unwrap();
        let last = raw.len() - 1;
        raw[last] = raw[last].wrapping_add(1);

        let err = decode_response(&raw, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::MalformedResponse(msg) if msg.contains("checksum")));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut raw = BytesMut::new();
        encode_response(ResponseStatus::Ok, 1, b"abcd", &mut raw).unwrap();
        raw.truncate(raw.len() - 2);

        let err = decode_response(&raw, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::MalformedResponse(msg) if msg.contains("length")));
    }

    #[test]
    fn decode_rejects_short_and_unsynced_input() {
        assert!(matches!(
            decode_response(&[RESPONSE_SYNC, 0, 0], DEFAULT_MAX_PAYLOAD),
            Err(FrameError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_response(&[0x00; 7], DEFAULT_MAX_PAYLOAD),
            Err(FrameError::MalformedResponse(msg)) if msg.contains("sync")
        ));
    }

    #[test]
    fn decode_unknown_status_is_not_an_error() {
        let codec = FrameCodec::default();
        let frame = codec
            .encode(2, &Instruction::new(1, InstructionKind::ReadStatus, vec![]))
            .unwrap();
        let mut raw = BytesMut::new();
        encode_response(ResponseStatus::Unknown(0x42), 2, &[], &mut raw).unwrap();

        let record = codec.decode(&frame, &raw).unwrap();
        assert_eq!(record.outcome_name(), "unexpected");
    }

    #[test]
    fn response_len_waits_for_header() {
        assert_eq!(response_len(&[RESPONSE_SYNC, 0, 0], 16).unwrap(), None);
        assert_eq!(
            response_len(&[RESPONSE_SYNC, 0, 0, 0, 3, 0], 16).unwrap(),
            Some(RESPONSE_HEADER_SIZE + 3 + CHECKSUM_SIZE)
        );
        assert!(response_len(&[RESPONSE_SYNC, 0, 0, 0, 0xFF, 0xFF], 16).is_err());
    }
}
