use modular_bitfield::prelude::*;

use super::{EncodeError, Opcode, Operand, Shape};

/// A single fixed-width instruction word.
///
/// The low byte holds the opcode; the remaining 24 bits hold the operands,
/// split according to the [`Shape`] of the opcode.
#[bitfield(bits = 32)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    op_bits: B8,
    a_bits: B8,
    b_bits: B8,
    c_bits: B8,
}

static_assertions::assert_eq_size!(Instruction, u32);

impl Instruction {
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    pub fn raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// The opcode of this word, or `None` if the low byte is not a known opcode.
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_ordinal(self.op_bits())
    }

    /// Encode an instruction from its opcode and operand values.
    ///
    /// Each value is range-checked against the width and signedness of the
    /// field it is placed in.
    pub fn encode(op: Opcode, operands: &[i32]) -> Result<Instruction, EncodeError> {
        let shape = op.shape();
        if shape.arity() != operands.len() {
            return Err(EncodeError::OperandCount {
                op,
                expected: shape.arity(),
                got: operands.len(),
            });
        }

        let mut word = Instruction::new().with_op_bits(op.ordinal());
        for (idx, ((kind, bits), &value)) in shape.fields().zip(operands).enumerate() {
            let (min, max) = kind.range(bits);
            if (value as i64) < min || (value as i64) > max {
                return Err(EncodeError::OperandRange {
                    op,
                    index: idx,
                    value,
                });
            }
            let mask = (1u32 << bits) - 1;
            word = word.with_field(shape, idx, value as u32 & mask);
        }
        Ok(word)
    }

    /// Decode the operands of this word as signed values according to the
    /// opcode's shape. Unused trailing operands are zero.
    pub fn decode(self) -> Option<(Opcode, [i32; 3])> {
        let op = self.opcode()?;
        let shape = op.shape();
        let mut out = [0i32; 3];
        for (idx, (kind, bits)) in shape.fields().enumerate() {
            let raw = self.field(shape, idx);
            out[idx] = if kind.is_signed() {
                sign_extend(raw, bits)
            } else {
                raw as i32
            };
        }
        Some((op, out))
    }

    /// Decode this word into kind-tagged operands, for printing.
    pub fn operands(self) -> Option<(Opcode, Vec<Operand>)> {
        let (op, values) = self.decode()?;
        let ops = op
            .shape()
            .fields()
            .zip(values)
            .map(|((kind, _), value)| Operand { kind, value })
            .collect();
        Some((op, ops))
    }

    /// Read the raw, unsigned bits of the `idx`th operand field.
    pub fn field(self, shape: Shape, idx: usize) -> u32 {
        let (a, b, c) = (
            self.a_bits() as u32,
            self.b_bits() as u32,
            self.c_bits() as u32,
        );
        match (shape, idx) {
            (Shape::One(_), 0) => a | (b << 8) | (c << 16),
            (Shape::Two(..), 0) | (Shape::Three(..), 0) => a,
            (Shape::Two(..), 1) => b | (c << 8),
            (Shape::Three(..), 1) => b,
            (Shape::Three(..), 2) => c,
            _ => 0,
        }
    }

    /// Replace the raw bits of the `idx`th operand field. Bits beyond the
    /// field width are discarded.
    pub fn with_field(self, shape: Shape, idx: usize, v: u32) -> Instruction {
        match (shape, idx) {
            (Shape::One(_), 0) => self
                .with_a_bits(v as u8)
                .with_b_bits((v >> 8) as u8)
                .with_c_bits((v >> 16) as u8),
            (Shape::Two(..), 0) | (Shape::Three(..), 0) => self.with_a_bits(v as u8),
            (Shape::Two(..), 1) => self.with_b_bits(v as u8).with_c_bits((v >> 8) as u8),
            (Shape::Three(..), 1) => self.with_b_bits(v as u8),
            (Shape::Three(..), 2) => self.with_c_bits(v as u8),
            _ => self,
        }
    }

    /// First 8-bit field.
    #[inline]
    pub fn a(self) -> usize {
        self.a_bits() as usize
    }

    /// Second 8-bit field.
    #[inline]
    pub fn b(self) -> usize {
        self.b_bits() as usize
    }

    /// Third 8-bit field.
    #[inline]
    pub fn c(self) -> usize {
        self.c_bits() as usize
    }

    /// The 16-bit field of a two-operand word.
    #[inline]
    pub fn bc(self) -> usize {
        self.b() | (self.c() << 8)
    }

    /// The 24-bit field of a one-operand word.
    #[inline]
    pub fn abc(self) -> usize {
        self.a() | (self.bc() << 8)
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instruction({:#010x})", self.raw())
    }
}

fn sign_extend(raw: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((raw << shift) as i32) >> shift
}
