use std::cell::RefCell;
use std::rc::Rc;

use quill_bytecode::{Capture, Instruction};
use smol_str::SmolStr;

use crate::gc::{Trace, Tracer};
use crate::vm::{Registers, Vm};

use super::Value;

/// A verified function, ready to be closed over.
///
/// Label operands in `code` are absolute instruction indices.
pub struct FuncProto {
    pub name: Option<SmolStr>,
    pub arity: usize,
    pub vararg: bool,
    pub slot_count: usize,
    pub code: Box<[Instruction]>,
    pub constants: Box<[Value]>,
    pub captures: Box<[Capture]>,
    pub defs: Box<[Rc<FuncProto>]>,
}

impl FuncProto {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

impl std::fmt::Debug for FuncProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncProto")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("slot_count", &self.slot_count)
            .field("code", &self.code.len())
            .finish()
    }
}

/// A captured variable.
///
/// While the frame that owns the variable is live, the upvalue points into
/// that frame's registers; when the frame returns the value is moved into
/// the upvalue itself.
pub enum Upvalue {
    Open { regs: Rc<Registers>, index: usize },
    Closed(Value),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

impl Upvalue {
    pub fn get(&self) -> Value {
        match self {
            Upvalue::Open { regs, index } => regs.get(*index),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set(&mut self, value: Value) {
        match self {
            Upvalue::Open { regs, index } => regs.set(*index, value),
            Upvalue::Closed(v) => *v = value,
        }
    }

    /// Move the value out of the frame registers into the upvalue.
    pub fn close(&mut self) {
        if let Upvalue::Open { regs, index } = self {
            let v = regs.get(*index);
            *self = Upvalue::Closed(v);
        }
    }
}

impl Trace for Upvalue {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self {
            Upvalue::Open { regs, .. } => tracer.mark_registers(regs),
            Upvalue::Closed(v) => tracer.mark(v),
        }
    }
}

/// A function value: a prototype paired with its captured upvalues.
pub struct Closure {
    pub proto: Rc<FuncProto>,
    pub upvalues: Box<[UpvalueRef]>,
}

impl Closure {
    pub fn new(proto: Rc<FuncProto>, upvalues: Box<[UpvalueRef]>) -> Closure {
        Closure { proto, upvalues }
    }
}

impl Trace for Closure {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for uv in self.upvalues.iter() {
            tracer.mark_upvalue(uv);
        }
    }
}

/// A native function.
///
/// `Ok` is a normal return. `Err` carries the payload of an error signal,
/// usually a descriptive string.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, Value>;

pub struct Native {
    pub name: SmolStr,
    pub func: NativeFn,
}

impl Native {
    pub fn new(name: impl Into<SmolStr>, func: NativeFn) -> Native {
        Native {
            name: name.into(),
            func,
        }
    }
}
