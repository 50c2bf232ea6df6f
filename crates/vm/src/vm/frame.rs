use std::cell::RefCell;
use std::rc::Rc;

use crate::gc::{Trace, Tracer};
use crate::value::{Closure, UpvalueRef, Value};

/// The register file of a fiber. Every frame of the fiber owns a window of
/// `slot_count` registers in it, stacked on top of its caller's window.
#[derive(Default)]
pub struct Registers(RefCell<Vec<Value>>);

impl Registers {
    pub fn new() -> Registers {
        Registers::default()
    }

    /// The value at `idx`; registers past the end read as `nil`.
    pub fn get(&self, idx: usize) -> Value {
        self.0.borrow().get(idx).cloned().unwrap_or_default()
    }

    pub fn set(&self, idx: usize, value: Value) {
        let mut regs = self.0.borrow_mut();
        if idx >= regs.len() {
            regs.resize(idx + 1, Value::Nil);
        }
        regs[idx] = value;
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub(crate) fn truncate(&self, len: usize) {
        // dropping values can run finalizers, so release the borrow first
        let dropped = {
            let mut regs = self.0.borrow_mut();
            let n = len.min(regs.len());
            regs.split_off(n)
        };
        drop(dropped);
    }

    /// Grow to `len` registers, filling with `nil`.
    pub(crate) fn grow_to(&self, len: usize) {
        let mut regs = self.0.borrow_mut();
        if regs.len() < len {
            regs.resize(len, Value::Nil);
        }
    }

    pub(crate) fn take_all(&self) -> Vec<Value> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl Trace for Registers {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for v in self.0.borrow().iter() {
            tracer.mark(v);
        }
    }
}

/// One activation of a closure.
pub(crate) struct Frame {
    pub closure: Rc<Closure>,
    /// Absolute index of the first register of this frame.
    pub base: usize,
    /// Index of the next instruction.
    pub ip: usize,
    /// Absolute register the return value goes to. `None` for the entry
    /// frame of a fiber.
    pub ret: Option<usize>,
    /// Upvalues still pointing into this frame, by absolute register.
    pub open: Vec<(usize, UpvalueRef)>,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base: usize, ret: Option<usize>) -> Frame {
        Frame {
            closure,
            base,
            ip: 0,
            ret,
            open: vec![],
        }
    }

    pub fn end(&self) -> usize {
        self.base + self.closure.proto.slot_count
    }

    pub fn close_upvalues(&mut self) {
        for (_, uv) in self.open.drain(..) {
            uv.borrow_mut().close();
        }
    }
}
