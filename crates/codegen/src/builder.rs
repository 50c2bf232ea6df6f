use std::sync::Arc;

use fnv::FnvHashMap;
use itertools::Itertools;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::DfsPostOrder;
use quill_bytecode::{Capture, Constant, FuncDef, FuncFlags, Instruction, Opcode, OperandKind};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::BuildError;
use crate::regalloc::RegisterAllocator;

pub type BlockId = usize;

/// A block of code with no branch inside
#[derive(Debug, Default)]
struct BasicBlock {
    code: Vec<Instruction>,
    term: Terminator,
}

/// The instruction ending a basic block, not yet turned into bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Unknown,
    Jump(BlockId),
    Branch {
        cond: u32,
        on_true: BlockId,
        on_false: BlockId,
        affinity: Affinity,
    },
    Return(u32),
    ReturnNil,
    TailCall {
        callee: u32,
        nargs: u32,
    },
    Error(u32),
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Unknown
    }
}

impl Terminator {
    fn targets(self) -> impl Iterator<Item = BlockId> {
        let targets = match self {
            Terminator::Jump(t) => [Some(t), None],
            Terminator::Branch {
                on_true, on_false, ..
            } => [Some(on_true), Some(on_false)],
            _ => [None, None],
        };
        targets.into_iter().flatten()
    }
}

/// Decide which successor of a branch is placed right after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    DontCare,
    TrueBranch,
    FalseBranch,
}

impl Default for Affinity {
    fn default() -> Self {
        Affinity::DontCare
    }
}

/// Type used to build a constant table
#[derive(Debug, Default)]
pub struct ConstantTableBuilder {
    constants: Vec<Constant>,
    reverse_map: FnvHashMap<Constant, u32>,
}

impl ConstantTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a constant, returning the index of an equal constant if one is
    /// already in the table.
    pub fn insert(&mut self, v: Constant) -> u32 {
        if let Some(&id) = self.reverse_map.get(&v) {
            return id;
        }
        let id = self.constants.len() as u32;
        self.constants.push(v.clone());
        self.reverse_map.insert(v, id);
        id
    }

    pub fn insert_string(&mut self, s: impl AsRef<[u8]>) -> u32 {
        self.insert(Constant::string(s))
    }

    pub fn insert_symbol(&mut self, s: &str) -> u32 {
        self.insert(Constant::Symbol(s.into()))
    }

    pub fn insert_keyword(&mut self, s: &str) -> u32 {
        self.insert(Constant::Keyword(s.into()))
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

/// Builds one [`FuncDef`] out of basic blocks.
///
/// Code is appended to the current block with [`emit`](Self::emit); each
/// block is closed by exactly one terminator. On [`finish`](Self::finish)
/// the reachable blocks are laid out in reverse post-order, jumps to the
/// block placed next are dropped, and labels are resolved into offsets
/// relative to the jumping instruction.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: Option<SmolStr>,
    arity: u8,
    flags: FuncFlags,
    regs: RegisterAllocator,
    constants: ConstantTableBuilder,
    captures: Vec<Capture>,
    capture_map: FnvHashMap<Capture, u32>,
    defs: Vec<Arc<FuncDef>>,

    basic_blocks: Vec<BasicBlock>,
    curr_bb: BlockId,
    errors: Vec<BuildError>,
}

impl FunctionBuilder {
    /// Start a function. Parameters occupy registers `0..arity`, followed by
    /// the rest tuple if `vararg` is set; those registers are reserved.
    pub fn new(name: Option<SmolStr>, arity: u8, vararg: bool) -> FunctionBuilder {
        let flags = if vararg {
            FuncFlags::VARARG
        } else {
            FuncFlags::empty()
        };
        let mut regs = RegisterAllocator::new();
        for reg in 0..arity as u32 + vararg as u32 {
            regs.touch(reg);
        }
        FunctionBuilder {
            name,
            arity,
            flags,
            regs,
            constants: ConstantTableBuilder::new(),
            captures: vec![],
            capture_map: FnvHashMap::default(),
            defs: vec![],

            basic_blocks: vec![BasicBlock::default()],
            curr_bb: 0,
            errors: vec![],
        }
    }

    pub fn regs(&mut self) -> &mut RegisterAllocator {
        &mut self.regs
    }

    pub fn constants(&mut self) -> &mut ConstantTableBuilder {
        &mut self.constants
    }

    /// Register an upvalue of this function, returning its index. Capturing
    /// the same place twice yields the same index.
    pub fn capture(&mut self, capture: Capture) -> u32 {
        if let Some(&idx) = self.capture_map.get(&capture) {
            return idx;
        }
        let idx = self.captures.len() as u32;
        self.captures.push(capture);
        self.capture_map.insert(capture, idx);
        idx
    }

    /// Add a nested definition for use by `Closure`, returning its index.
    pub fn add_def(&mut self, def: impl Into<Arc<FuncDef>>) -> u32 {
        self.defs.push(def.into());
        (self.defs.len() - 1) as u32
    }

    pub fn new_block(&mut self) -> BlockId {
        self.basic_blocks.push(BasicBlock::default());
        self.basic_blocks.len() - 1
    }

    pub fn current_block(&self) -> BlockId {
        self.curr_bb
    }

    pub fn switch_to(&mut self, bb: BlockId) {
        assert!(bb < self.basic_blocks.len(), "no basic block {}", bb);
        self.curr_bb = bb;
    }

    pub fn is_terminated(&self) -> bool {
        self.basic_blocks[self.curr_bb].term != Terminator::Unknown
    }

    fn error(&mut self, id: &'static str, message: String) {
        let e = BuildError::new(id)
            .in_block(self.curr_bb)
            .with_message(message);
        self.errors.push(e);
    }

    /// Append an instruction to the current block.
    ///
    /// Control flow is expressed with terminators instead; passing a jump or
    /// a terminating opcode here is recorded as an error.
    pub fn emit(&mut self, op: Opcode, operands: &[i32]) -> &mut Self {
        if op.is_jump() || op.is_terminator() {
            self.error(
                "terminator-as-instruction",
                format!("{} must end a block", op),
            );
            return self;
        }
        if self.is_terminated() {
            self.error("emit-after-terminator", format!("{} is unreachable", op));
            return self;
        }
        match Instruction::encode(op, operands) {
            Ok(inst) => self.basic_blocks[self.curr_bb].code.push(inst),
            Err(e) => self.error("bad-operands", e.to_string()),
        }
        self
    }

    /// Load a constant into `dst`, using the immediate forms where they fit.
    pub fn emit_load(&mut self, dst: u32, value: Constant) -> &mut Self {
        let dst = dst as i32;
        let (min, max) = OperandKind::Imm.range(16);
        match value {
            Constant::Nil => self.emit(Opcode::LoadNil, &[dst]),
            Constant::Boolean(true) => self.emit(Opcode::LoadTrue, &[dst]),
            Constant::Boolean(false) => self.emit(Opcode::LoadFalse, &[dst]),
            Constant::Integer(i) if (min..=max).contains(&(i as i64)) => {
                self.emit(Opcode::LoadInteger, &[dst, i])
            }
            value => {
                let idx = self.constants.insert(value);
                self.emit(Opcode::LoadConstant, &[dst, idx as i32])
            }
        }
    }

    /// End the current block.
    pub fn terminate(&mut self, term: Terminator) {
        if self.is_terminated() {
            self.error("already-terminated", format!("{:?}", term));
            return;
        }
        if let Some(t) = term.targets().find(|t| *t >= self.basic_blocks.len()) {
            self.error("unknown-block", format!("jump to block {}", t));
            return;
        }
        self.basic_blocks[self.curr_bb].term = term;
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target))
    }

    /// Branch on the truthiness of `cond`. The true branch is laid out right
    /// after this block when possible.
    pub fn branch(&mut self, cond: u32, on_true: BlockId, on_false: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            on_true,
            on_false,
            affinity: Affinity::TrueBranch,
        })
    }

    pub fn ret(&mut self, slot: u32) {
        self.terminate(Terminator::Return(slot))
    }

    pub fn ret_nil(&mut self) {
        self.terminate(Terminator::ReturnNil)
    }

    pub fn tail_call(&mut self, callee: u32, nargs: u32) {
        self.terminate(Terminator::TailCall { callee, nargs })
    }

    pub fn raise(&mut self, slot: u32) {
        self.terminate(Terminator::Error(slot))
    }

    pub fn finish(self) -> Result<FuncDef, Vec<BuildError>> {
        let mut errors = self.errors;
        let order = bb_scheduling(&self.basic_blocks);

        let mut labels = vec![0usize; self.basic_blocks.len()];
        let mut fixups: Vec<Fixup> = vec![];
        let mut code: Vec<Instruction> = vec![];

        for (pos, &id) in order.iter().enumerate() {
            let next = order.get(pos + 1).copied();
            let bb = &self.basic_blocks[id];
            labels[id] = code.len();
            code.extend_from_slice(&bb.code);

            let mut jump = |code: &mut Vec<Instruction>, op, cond, target| {
                fixups.push(Fixup {
                    at: code.len(),
                    op,
                    cond,
                    target,
                    block: id,
                });
                code.push(Instruction::new());
            };

            let (op, operands): (Opcode, Vec<u32>) = match bb.term {
                Terminator::Unknown => {
                    errors.push(BuildError::new("unterminated-block").in_block(id));
                    continue;
                }
                Terminator::Jump(t) => {
                    if next != Some(t) {
                        jump(&mut code, Opcode::Jump, None, t);
                    }
                    continue;
                }
                Terminator::Branch {
                    cond,
                    on_true,
                    on_false,
                    ..
                } => {
                    if next == Some(on_true) {
                        jump(&mut code, Opcode::JumpIfNot, Some(cond), on_false);
                    } else {
                        jump(&mut code, Opcode::JumpIf, Some(cond), on_true);
                        if next != Some(on_false) {
                            jump(&mut code, Opcode::Jump, None, on_false);
                        }
                    }
                    continue;
                }
                Terminator::Return(slot) => (Opcode::Return, vec![slot]),
                Terminator::ReturnNil => (Opcode::ReturnNil, vec![]),
                Terminator::TailCall { callee, nargs } => (Opcode::TailCall, vec![callee, nargs]),
                Terminator::Error(slot) => (Opcode::Error, vec![slot]),
            };
            let operands = operands.into_iter().map(|x| x as i32).collect_vec();
            match Instruction::encode(op, &operands) {
                Ok(inst) => code.push(inst),
                Err(e) => errors.push(
                    BuildError::new("bad-operands")
                        .in_block(id)
                        .with_message(e.to_string()),
                ),
            }
        }

        for fixup in fixups {
            let offset = labels[fixup.target] as i32 - fixup.at as i32;
            let operands = match fixup.cond {
                Some(cond) => vec![cond as i32, offset],
                None => vec![offset],
            };
            match Instruction::encode(fixup.op, &operands) {
                Ok(inst) => code[fixup.at] = inst,
                Err(e) => errors.push(
                    BuildError::new("label-out-of-range")
                        .in_block(fixup.block)
                        .with_message(e.to_string()),
                ),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        debug!(
            name = ?self.name,
            slots = self.regs.frame_size(),
            insts = code.len(),
            "finished function"
        );

        Ok(FuncDef {
            name: self.name,
            arity: self.arity,
            flags: self.flags,
            slot_count: self.regs.frame_size(),
            code,
            constants: self.constants.constants,
            captures: self.captures,
            defs: self.defs,
        })
    }
}

/// A jump whose offset is filled in once every block has been placed
struct Fixup {
    at: usize,
    op: Opcode,
    cond: Option<u32>,
    target: BlockId,
    block: BlockId,
}

/// Lay out the blocks reachable from the entry block in reverse post-order.
/// Of the successors of a block, the one added to the graph first ends up
/// right after it.
fn bb_scheduling(bbs: &[BasicBlock]) -> Vec<BlockId> {
    let mut graph = DiGraphMap::<BlockId, ()>::new();
    graph.add_node(0);
    for (idx, bb) in bbs.iter().enumerate() {
        match bb.term {
            Terminator::Jump(t) => {
                graph.add_edge(idx, t, ());
            }
            Terminator::Branch {
                on_true,
                on_false,
                affinity,
                ..
            } => {
                let (first, second) = match affinity {
                    Affinity::FalseBranch => (on_false, on_true),
                    Affinity::TrueBranch | Affinity::DontCare => (on_true, on_false),
                };
                graph.add_edge(idx, first, ());
                graph.add_edge(idx, second, ());
            }
            _ => {}
        }
    }

    let mut visitor = DfsPostOrder::new(&graph, 0);
    let mut result = std::iter::from_fn(|| visitor.next(&graph)).collect_vec();
    result.reverse();
    result
}
