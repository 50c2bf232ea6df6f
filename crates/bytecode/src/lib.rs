use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;
use smol_str::SmolStr;

mod disasm;
pub mod image;
pub mod inst;

#[cfg(test)]
mod test;

pub use inst::{EncodeError, Instruction, Opcode, Operand, OperandKind, Shape};

bitflags! {
    /// Flags of a function definition
    pub struct FuncFlags: u8 {
        /// Arguments beyond `arity` are collected into a tuple stored in
        /// slot `arity`.
        const VARARG = 0b0000_0001;
    }
}

impl Default for FuncFlags {
    fn default() -> Self {
        FuncFlags::empty()
    }
}

/// A compiled function definition: the bytecode artifact a closure executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncDef {
    pub name: Option<SmolStr>,
    /// Number of required parameters, which occupy the first `arity` slots.
    pub arity: u8,
    pub flags: FuncFlags,
    /// Size of the register window of one activation. This is the high-water
    /// mark of the register allocator plus one.
    pub slot_count: u32,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// How each upvalue of a closure over this definition is captured from the
    /// enclosing frame.
    pub captures: Vec<Capture>,
    /// Definitions of closures created inside this function.
    pub defs: Vec<Arc<FuncDef>>,
}

impl FuncDef {
    pub fn is_vararg(&self) -> bool {
        self.flags.contains(FuncFlags::VARARG)
    }

    /// The number of slots the parameters of this function occupy.
    pub fn param_slots(&self) -> u32 {
        self.arity as u32 + self.is_vararg() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i32),
    /// A real number, stored by its bit pattern so constants can be hashed.
    Real(u64),
    String(Bytes),
    Symbol(SmolStr),
    Keyword(SmolStr),
}

impl Constant {
    pub fn real(v: f64) -> Constant {
        Constant::Real(v.to_bits())
    }

    pub fn string(s: impl AsRef<[u8]>) -> Constant {
        Constant::String(Bytes::copy_from_slice(s.as_ref()))
    }
}

/// Where a closure finds one of its upvalues when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capture {
    /// A register of the frame creating the closure
    Local(u32),
    /// An upvalue of the closure creating the closure
    Upvalue(u32),
}
