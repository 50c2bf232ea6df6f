mod operand;
mod word;

use std::fmt::Display;

use enum_ordinalize::Ordinalize;

pub use operand::{Operand, OperandKind, Shape};
pub use word::Instruction;

macro_rules! define_inst {
    (@shape) => { Shape::Zero };
    (@shape $a:ident) => { Shape::One(OperandKind::$a) };
    (@shape $a:ident, $b:ident) => { Shape::Two(OperandKind::$a, OperandKind::$b) };
    (@shape $a:ident, $b:ident, $c:ident) => {
        Shape::Three(OperandKind::$a, OperandKind::$b, OperandKind::$c)
    };
    (
        $(#[$meta:meta])*
        // type names
        $ty_vis:vis $type:ident,
        // instruction variant definition
        $(
            // metadata for this variant. Will be put inside the final enum
            $(#[$variant_meta:meta])*
            // variant name
            $name:ident
            // operands
            $(( $($param_name:ident : $param:ident),+ ))?
        ),* $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Copy, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the operand layout of this instruction. This is the
            /// static decode table of the instruction set.
            pub fn shape(self) -> Shape {
                match self {$(
                    $type::$name => define_inst!(@shape $($($param),+)?),
                )*}
            }

            /// Returns the names of the operands of this instruction.
            pub fn operand_names(self) -> &'static [&'static str] {
                match self {$(
                    $type::$name => &[$($(stringify!($param_name)),+)?],
                )*}
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {$(
                    Self::$name => {
                        write!(f, stringify!($name))?;
                    }
                )*}
                Ok(())
            }
        }
    };
}

// instruction definition.
//
// Each line is an instruction and the kinds of its operands. The number of
// operands decides the shape of the instruction word.
define_inst! {
    /// The list of instructions. Each instruction has at most 3 operands, all of
    /// which fit in the 24 bits following the opcode byte.
    pub Opcode,

    /// Do nothing.
    Noop,
    /// Raise the value in `val` as an error.
    Error(val: Slot),
    /// Return from the current function with the given value.
    Return(val: Slot),
    /// Return `nil` from the current function.
    ReturnNil,

    // loads
    LoadNil(dst: Slot),
    LoadTrue(dst: Slot),
    LoadFalse(dst: Slot),
    /// Load a 16-bit signed integer.
    LoadInteger(dst: Slot, num: Imm),
    /// Load a value inside the constant table.
    LoadConstant(dst: Slot, idx: Const),
    /// Load the running closure itself.
    LoadSelf(dst: Slot),
    /// Load the specified upvalue of the running closure.
    LoadUpvalue(dst: Slot, env: Env),
    /// Store a value into the specified upvalue of the running closure.
    SetUpvalue(src: Slot, env: Env),
    /// Look up a name in the runtime namespace. The name is a symbol constant.
    LoadGlobal(dst: Slot, name: Const),
    /// Bind a name in the runtime namespace. The name is a symbol constant.
    SetGlobal(src: Slot, name: Const),
    /// Copy a value between registers. The source may be any 16-bit slot.
    Move(dst: Slot, src: Slot),

    // arithmetic
    Add(dst: Slot, lhs: Slot, rhs: Slot),
    Subtract(dst: Slot, lhs: Slot, rhs: Slot),
    Multiply(dst: Slot, lhs: Slot, rhs: Slot),
    Divide(dst: Slot, lhs: Slot, rhs: Slot),
    Modulo(dst: Slot, lhs: Slot, rhs: Slot),
    /// Integer-only add. Wraps on overflow.
    AddInteger(dst: Slot, lhs: Slot, rhs: Slot),
    SubtractInteger(dst: Slot, lhs: Slot, rhs: Slot),
    MultiplyInteger(dst: Slot, lhs: Slot, rhs: Slot),
    /// Real-only add.
    AddReal(dst: Slot, lhs: Slot, rhs: Slot),
    SubtractReal(dst: Slot, lhs: Slot, rhs: Slot),
    MultiplyReal(dst: Slot, lhs: Slot, rhs: Slot),
    DivideReal(dst: Slot, lhs: Slot, rhs: Slot),
    /// Add a signed 8-bit immediate to a number.
    AddImmediate(dst: Slot, lhs: Slot, num: Imm),
    BitAnd(dst: Slot, lhs: Slot, rhs: Slot),
    BitOr(dst: Slot, lhs: Slot, rhs: Slot),
    BitXor(dst: Slot, lhs: Slot, rhs: Slot),
    ShiftLeft(dst: Slot, lhs: Slot, rhs: Slot),
    ShiftRight(dst: Slot, lhs: Slot, rhs: Slot),
    Negate(dst: Slot, src: Slot),
    /// Logical not. Only `nil` and `false` are falsy.
    Not(dst: Slot, src: Slot),

    // comparison
    Equals(dst: Slot, lhs: Slot, rhs: Slot),
    NotEquals(dst: Slot, lhs: Slot, rhs: Slot),
    LessThan(dst: Slot, lhs: Slot, rhs: Slot),
    LessThanEqual(dst: Slot, lhs: Slot, rhs: Slot),
    GreaterThan(dst: Slot, lhs: Slot, rhs: Slot),
    GreaterThanEqual(dst: Slot, lhs: Slot, rhs: Slot),
    /// Three-way comparison in the total order of values. Yields -1, 0 or 1.
    Compare(dst: Slot, lhs: Slot, rhs: Slot),

    // control flow
    /// Jump to the label.
    Jump(label: Label),
    /// Jump to the label if `cond` is _truthy_.
    JumpIf(cond: Slot, label: Label),
    /// Jump to the label if `cond` is _falsy_.
    JumpIfNot(cond: Slot, label: Label),

    // functions
    /// Call the function in `callee` with the `n_args` registers directly above
    /// it as arguments, storing the result in `dst`.
    ///
    /// The register file before the call looks like this:
    ///
    /// ```plaintext
    /// ..., callee, arg0, arg1, ..., argN, ...
    ///      |<---- n_args + 1 ---------->|
    /// ```
    Call(dst: Slot, callee: Slot, n_args: Count),
    /// Return the result of calling `callee`, reusing the current frame. See
    /// [`Opcode::Call`] for the argument layout.
    TailCall(callee: Slot, n_args: Count),
    /// Create a closure from the given nested definition, capturing its
    /// upvalues from the current frame.
    Closure(dst: Slot, def: Def),

    // indexing
    Get(dst: Slot, ds: Slot, key: Slot),
    Put(ds: Slot, key: Slot, val: Slot),
    GetIndex(dst: Slot, ds: Slot, idx: Count),
    PutIndex(ds: Slot, val: Slot, idx: Count),
    Length(dst: Slot, ds: Slot),
    /// Get the key following `key` in the iteration order of `ds`, or `nil`
    /// when exhausted. A `nil` key starts the iteration.
    Next(dst: Slot, ds: Slot, key: Slot),

    // compound types
    /// Create an array from `len` registers starting at `start`.
    MakeArray(dst: Slot, start: Slot, len: Count),
    /// Create a tuple from `len` registers starting at `start`.
    MakeTuple(dst: Slot, start: Slot, len: Count),
    /// Create a table from `len` registers of alternating keys and values.
    MakeTable(dst: Slot, start: Slot, len: Count),
    /// Create a struct from `len` registers of alternating keys and values.
    MakeStruct(dst: Slot, start: Slot, len: Count),

    // fibers
    /// Suspend the running fiber, handing `val` to its resumer. The value of
    /// the next resume is stored in `dst`.
    Yield(dst: Slot, val: Slot),
    /// Resume the fiber in `fiber` with `val`, storing what it yields or
    /// returns in `dst`.
    Resume(dst: Slot, fiber: Slot, val: Slot),
}

impl Opcode {
    /// Whether this instruction never falls through to the next one.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::ReturnNil | Opcode::Jump | Opcode::Error | Opcode::TailCall
        )
    }

    /// Whether this instruction carries a label operand.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIf | Opcode::JumpIfNot)
    }

    /// Index of the label operand of a jump instruction.
    pub fn label_operand(self) -> Option<usize> {
        match self {
            Opcode::Jump => Some(0),
            Opcode::JumpIf | Opcode::JumpIfNot => Some(1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    OperandCount {
        op: Opcode,
        expected: usize,
        got: usize,
    },
    OperandRange {
        op: Opcode,
        index: usize,
        value: i32,
    },
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::OperandCount { op, expected, got } => write!(
                f,
                "{} takes {} operands, but {} were given",
                op, expected, got
            ),
            EncodeError::OperandRange { op, index, value } => write!(
                f,
                "operand {} of {} does not fit its field: {}",
                index, op, value
            ),
        }
    }
}

impl std::error::Error for EncodeError {}
