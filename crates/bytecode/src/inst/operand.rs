use std::fmt::Display;

/// The kind of a single instruction operand. The kind decides how the raw
/// bits of the operand field are interpreted and printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// A register in the current frame
    Slot,
    /// An index in the constant table
    Const,
    /// A jump target. Relative to the jumping instruction inside an artifact,
    /// absolute once the function has been loaded.
    Label,
    /// An index in the upvalue array of the running closure
    Env,
    /// An index in the nested definition table
    Def,
    /// A signed immediate
    Imm,
    /// An unsigned immediate, usually a count or length
    Count,
}

impl OperandKind {
    /// Whether the field holding this operand is sign-extended.
    pub fn is_signed(self) -> bool {
        matches!(self, OperandKind::Label | OperandKind::Imm)
    }

    /// The range of values a field of `bits` bits can hold for this kind.
    pub fn range(self, bits: u32) -> (i64, i64) {
        if self.is_signed() {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        }
    }
}

/// The operand layout of an instruction.
///
/// ```plaintext
/// One:    [ op:8 | x:24 ]
/// Two:    [ op:8 | a:8 | b:16 ]
/// Three:  [ op:8 | a:8 | b:8 | c:8 ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Zero,
    One(OperandKind),
    Two(OperandKind, OperandKind),
    Three(OperandKind, OperandKind, OperandKind),
}

impl Shape {
    pub fn arity(self) -> usize {
        match self {
            Shape::Zero => 0,
            Shape::One(..) => 1,
            Shape::Two(..) => 2,
            Shape::Three(..) => 3,
        }
    }

    /// Operand kinds paired with the width of the field each one occupies.
    pub fn fields(self) -> impl Iterator<Item = (OperandKind, u32)> {
        let fields: [Option<(OperandKind, u32)>; 3] = match self {
            Shape::Zero => [None, None, None],
            Shape::One(x) => [Some((x, 24)), None, None],
            Shape::Two(a, b) => [Some((a, 8)), Some((b, 16)), None],
            Shape::Three(a, b, c) => [Some((a, 8)), Some((b, 8)), Some((c, 8))],
        };
        fields.into_iter().flatten()
    }
}

/// A decoded operand, tagged with its kind for printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub value: i32,
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            OperandKind::Slot => write!(f, "r{}", self.value),
            OperandKind::Const => write!(f, "#{}", self.value),
            OperandKind::Label => write!(f, "@{}", self.value),
            OperandKind::Env => write!(f, "u{}", self.value),
            OperandKind::Def => write!(f, "f{}", self.value),
            OperandKind::Imm | OperandKind::Count => write!(f, "{}", self.value),
        }
    }
}
