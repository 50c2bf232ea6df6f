//! Verification of function definitions before they can run.

use std::rc::Rc;

use quill_bytecode::{Capture, Constant, FuncDef, Opcode, OperandKind};
use tracing::debug;

use crate::error::LoadError;
use crate::value::{FuncProto, Value};

use super::Vm;

const MAX_NESTING: usize = 256;

impl Vm {
    /// Verify `def` and everything nested in it, and turn it into a runnable
    /// prototype.
    ///
    /// Every operand is checked against the decode table of its opcode, so
    /// dispatch never indexes out of a frame, constant table or upvalue
    /// list. Relative labels are rewritten to absolute instruction indices.
    pub fn load(&mut self, def: &FuncDef) -> Result<Rc<FuncProto>, LoadError> {
        if !def.captures.is_empty() {
            return Err(LoadError::TopLevelCaptures);
        }
        let proto = self.load_def(def, None, 0)?;
        debug!(
            name = proto.display_name(),
            slots = proto.slot_count,
            code = proto.code.len(),
            defs = proto.defs.len(),
            "loaded function"
        );
        Ok(proto)
    }

    fn load_def(
        &mut self,
        def: &FuncDef,
        parent: Option<&FuncDef>,
        depth: usize,
    ) -> Result<Rc<FuncProto>, LoadError> {
        if depth > MAX_NESTING {
            return Err(LoadError::TooDeep);
        }
        let slot_count = def.slot_count as usize;
        let needed = def.param_slots() as usize;
        if slot_count < needed {
            return Err(LoadError::SlotsBelowArity { slot_count, needed });
        }

        if let Some(parent) = parent {
            for (idx, capture) in def.captures.iter().enumerate() {
                let ok = match *capture {
                    Capture::Local(slot) => slot < parent.slot_count,
                    Capture::Upvalue(uv) => (uv as usize) < parent.captures.len(),
                };
                if !ok {
                    return Err(LoadError::BadCapture { idx });
                }
            }
        }

        let constants = def
            .constants
            .iter()
            .map(|c| self.constant(c))
            .collect::<Vec<_>>();

        let mut code = Vec::with_capacity(def.code.len());
        for (at, inst) in def.code.iter().enumerate() {
            let (op, values) = inst.decode().ok_or(LoadError::UnknownOpcode {
                at,
                byte: inst.raw() as u8,
            })?;
            let shape = op.shape();
            let mut inst = *inst;
            for (idx, (kind, bits)) in shape.fields().enumerate() {
                let value = values[idx];
                match kind {
                    OperandKind::Slot => {
                        let slot = value as usize;
                        if slot >= slot_count {
                            return Err(LoadError::SlotOutOfRange {
                                at,
                                slot,
                                slot_count,
                            });
                        }
                    }
                    OperandKind::Const => {
                        let idx = value as usize;
                        if idx >= constants.len() {
                            return Err(LoadError::ConstOutOfRange { at, idx });
                        }
                        let names_global = matches!(op, Opcode::LoadGlobal | Opcode::SetGlobal);
                        if names_global && !matches!(constants[idx], Value::Symbol(_)) {
                            return Err(LoadError::BadGlobalName { at, idx });
                        }
                    }
                    OperandKind::Def => {
                        let idx = value as usize;
                        if idx >= def.defs.len() {
                            return Err(LoadError::DefOutOfRange { at, idx });
                        }
                    }
                    OperandKind::Env => {
                        let idx = value as usize;
                        if idx >= def.captures.len() {
                            return Err(LoadError::EnvOutOfRange { at, idx });
                        }
                    }
                    OperandKind::Label => {
                        let target = at as i64 + value as i64;
                        let fits = target >= 0
                            && (target as usize) < def.code.len()
                            && target < (1i64 << bits);
                        if !fits {
                            return Err(LoadError::LabelOutOfRange { at, target });
                        }
                        inst = inst.with_field(shape, idx, target as u32);
                    }
                    OperandKind::Imm | OperandKind::Count => {}
                }
            }
            check_runs(op, &values, at, slot_count)?;
            code.push(inst);
        }

        let terminated = code
            .last()
            .and_then(|inst| inst.opcode())
            .map_or(false, Opcode::is_terminator);
        if !terminated {
            return Err(LoadError::MissingTerminator);
        }

        let mut defs = Vec::with_capacity(def.defs.len());
        for (idx, child) in def.defs.iter().enumerate() {
            let proto = self
                .load_def(child, Some(def), depth + 1)
                .map_err(|error| LoadError::Nested {
                    def: idx,
                    error: Box::new(error),
                })?;
            defs.push(proto);
        }

        Ok(Rc::new(FuncProto {
            name: def.name.clone(),
            arity: def.arity as usize,
            vararg: def.is_vararg(),
            slot_count,
            code: code.into_boxed_slice(),
            constants: constants.into_boxed_slice(),
            captures: def.captures.clone().into_boxed_slice(),
            defs: defs.into_boxed_slice(),
        }))
    }

    fn constant(&mut self, c: &Constant) -> Value {
        match c {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(i) => Value::Integer(*i),
            Constant::Real(bits) => Value::Real(f64::from_bits(*bits)),
            Constant::String(s) => Value::string(s),
            Constant::Symbol(s) => self.symbol(s),
            Constant::Keyword(s) => self.keyword(s),
        }
    }
}

/// Check the register runs of instructions that read several consecutive
/// registers.
fn check_runs(op: Opcode, values: &[i32; 3], at: usize, slot_count: usize) -> Result<(), LoadError> {
    let (start, len) = match op {
        Opcode::Call => (values[1] as usize, values[2] as usize + 1),
        Opcode::TailCall => (values[0] as usize, values[1] as usize + 1),
        Opcode::MakeArray | Opcode::MakeTuple | Opcode::MakeTable | Opcode::MakeStruct => {
            (values[1] as usize, values[2] as usize)
        }
        _ => return Ok(()),
    };
    if matches!(op, Opcode::MakeTable | Opcode::MakeStruct) && len % 2 != 0 {
        return Err(LoadError::OddPairCount { at, count: len });
    }
    if len > 0 && start + len > slot_count {
        return Err(LoadError::SlotOutOfRange {
            at,
            slot: start + len - 1,
            slot_count,
        });
    }
    Ok(())
}
