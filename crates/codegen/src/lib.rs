//! Building blocks of the bytecode compiler: the register allocator that
//! assigns VM slots, and the function builder that turns basic blocks into a
//! [`FuncDef`](quill_bytecode::FuncDef).

pub mod builder;
pub mod error;
pub mod regalloc;

#[cfg(test)]
mod test;

pub use builder::{Affinity, BlockId, ConstantTableBuilder, FunctionBuilder, Terminator};
pub use error::BuildError;
pub use regalloc::RegisterAllocator;
