//! Instruction model.
//!
//! Instructions are what the producer side hands to the pipeline: a
//! correlation id, an operation kind and a flat parameter list. Each kind
//! has a fixed parameter layout described by [`ParamSpec`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Producer-assigned correlation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionId(pub u64);

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operation understood by the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    /// Clear all neuron state and weights.
    Reset,
    /// Load a neuron's default counter value.
    ConfigureNeuron,
    /// Write one synapse weight (9-bit signed on the hardware).
    WriteWeight,
    /// Drive an input channel with a constant current.
    SetInput,
    /// Advance the network by a number of periods.
    Step,
    /// Request the output spike vector.
    ReadOutputs,
    /// Request the temperature/status word.
    ReadStatus,
}

/// Numeric limits a parameter is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRange {
    /// `0..max_neurons`
    Neuron,
    /// `0..max_inputs`
    Input,
    /// `1..=max_periods`
    Periods,
    /// Inclusive fixed bounds.
    Fixed(i32, i32),
}

/// Layout of one parameter on the wire (always two bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub range: ParamRange,
    /// Signed params are sent as two's complement `i16`.
    pub signed: bool,
}

const fn unsigned(name: &'static str, range: ParamRange) -> ParamSpec {
    ParamSpec {
        name,
        range,
        signed: false,
    }
}

const fn signed(name: &'static str, min: i32, max: i32) -> ParamSpec {
    ParamSpec {
        name,
        range: ParamRange::Fixed(min, max),
        signed: true,
    }
}

/// Synapse weights are 9 bits wide in the neuron tables.
pub const WEIGHT_MIN: i32 = -256;
pub const WEIGHT_MAX: i32 = 255;

const CONFIGURE_NEURON_PARAMS: &[ParamSpec] = &[
    unsigned("neuron", ParamRange::Neuron),
    unsigned("counter", ParamRange::Fixed(0, u16::MAX as i32)),
];
const WRITE_WEIGHT_PARAMS: &[ParamSpec] = &[
    unsigned("target", ParamRange::Neuron),
    unsigned("source", ParamRange::Neuron),
    signed("weight", WEIGHT_MIN, WEIGHT_MAX),
];
const SET_INPUT_PARAMS: &[ParamSpec] = &[
    unsigned("input", ParamRange::Input),
    signed("current", i16::MIN as i32, i16::MAX as i32),
];
const STEP_PARAMS: &[ParamSpec] = &[unsigned("periods", ParamRange::Periods)];

impl InstructionKind {
    /// All kinds, in opcode order.
    pub const ALL: [InstructionKind; 7] = [
        InstructionKind::Reset,
        InstructionKind::ConfigureNeuron,
        InstructionKind::WriteWeight,
        InstructionKind::SetInput,
        InstructionKind::Step,
        InstructionKind::ReadOutputs,
        InstructionKind::ReadStatus,
    ];

    /// Wire opcode.
    pub const fn opcode(self) -> u8 {
        match self {
            InstructionKind::Reset => 0x01,
            InstructionKind::ConfigureNeuron => 0x02,
            InstructionKind::WriteWeight => 0x03,
            InstructionKind::SetInput => 0x04,
            InstructionKind::Step => 0x05,
            InstructionKind::ReadOutputs => 0x06,
            InstructionKind::ReadStatus => 0x07,
        }
    }

    /// Reverse of [`InstructionKind::opcode`].
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.opcode() == opcode)
    }

    /// Parameter layout for this kind.
    pub const fn params(self) -> &'static [ParamSpec] {
        match self {
            InstructionKind::ConfigureNeuron => CONFIGURE_NEURON_PARAMS,
            InstructionKind::WriteWeight => WRITE_WEIGHT_PARAMS,
            InstructionKind::SetInput => SET_INPUT_PARAMS,
            InstructionKind::Step => STEP_PARAMS,
            InstructionKind::Reset | InstructionKind::ReadOutputs | InstructionKind::ReadStatus => {
                &[]
            }
        }
    }

    /// Number of parameters.
    pub const fn arity(self) -> usize {
        self.params().len()
    }

    /// Encoded size of one record of this kind.
    pub const fn record_size(self) -> usize {
        self.arity() * 2
    }

    /// Whether consecutive instructions of this kind may share a frame.
    ///
    /// Table loads are; anything that triggers computation or a readback is not.
    pub const fn is_batchable(self) -> bool {
        matches!(
            self,
            InstructionKind::ConfigureNeuron
                | InstructionKind::WriteWeight
                | InstructionKind::SetInput
        )
    }

    /// Stable lowercase name, matching the serde representation.
    pub fn name(self) -> &'static str {
        match self {
            InstructionKind::Reset => "reset",
            InstructionKind::ConfigureNeuron => "configure_neuron",
            InstructionKind::WriteWeight => "write_weight",
            InstructionKind::SetInput => "set_input",
            InstructionKind::Step => "step",
            InstructionKind::ReadOutputs => "read_outputs",
            InstructionKind::ReadStatus => "read_status",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single unit of work for the accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub kind: InstructionKind,
    #[serde(default)]
    pub params: Vec<i32>,
}

impl Instruction {
    /// Create a new instruction.
    pub fn new(id: u64, kind: InstructionKind, params: impl Into<Vec<i32>>) -> Self {
        Self {
            id: InstructionId(id),
            kind,
            params: params.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_roundtrip() {
        for kind in InstructionKind::ALL {
            assert_eq!(InstructionKind::from_opcode(kind.opcode()), Some(kind));
        }
        assert_eq!(InstructionKind::from_opcode(0x00), None);
        assert_eq!(InstructionKind::from_opcode(0xFF), None);
    }

    #[test]
    fn only_table_loads_batch() {
        let batchable: Vec<_> = InstructionKind::ALL
            .into_iter()
            .filter(|kind| kind.is_batchable())
            .collect();
        assert_eq!(
            batchable,
            vec![
                InstructionKind::ConfigureNeuron,
                InstructionKind::WriteWeight,
                InstructionKind::SetInput
            ]
        );
    }

    #[test]
    fn record_sizes() {
        assert_eq!(InstructionKind::Reset.record_size(), 0);
        assert_eq!(InstructionKind::WriteWeight.record_size(), 6);
        assert_eq!(InstructionKind::Step.record_size(), 2);
    }

    #[test]
    fn instruction_deserializes_from_json_line() {
        let line = r#"{"id": 7, "kind": "write_weight", "params": [1, 2, -3]}"#;
        let instruction: Instruction = serde_json::from_str(line).unwrap();
        assert_eq!(
            instruction,
            Instruction::new(7, InstructionKind::WriteWeight, vec![1, 2, -3])
        );
    }

    #[test]
    fn params_default_to_empty() {
        let instruction: Instruction = serde_json::from_str(r#"{"id": 1, "kind": "reset"}"#).unwrap();
        assert!(instruction.params.is_empty());
        assert_eq!(instruction.kind.to_string(), "reset");
    }
}
