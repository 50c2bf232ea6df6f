//! Cycle collection on top of reference counting.
//!
//! Every value handle is an `Rc`, so acyclic garbage is released as soon as
//! its last handle goes away. Objects that can take part in a cycle are also
//! registered with the [`GcAllocator`](alloc::GcAllocator) through a weak
//! handle. A collection marks everything reachable from the roots and then
//! empties the tracked objects that were not reached, which breaks the
//! cycles they were part of and lets reference counting free them.

pub mod alloc;

use std::rc::Rc;

use fnv::FnvHashSet;

use crate::value::{UpvalueRef, Value};
use crate::vm::Registers;

/// Types that hold values the collector must see.
pub trait Trace {
    /// Report every directly held value to `tracer`.
    fn trace(&self, tracer: &mut dyn Tracer);
}

/// The receiving end of [`Trace::trace`].
pub trait Tracer {
    fn mark(&mut self, value: &Value);
    fn mark_upvalue(&mut self, upvalue: &UpvalueRef);
    fn mark_registers(&mut self, regs: &Rc<Registers>);
}

enum Work {
    Value(Value),
    Upvalue(UpvalueRef),
    Registers(Rc<Registers>),
}

/// The mark phase. Reached objects are recorded by address; tracing uses an
/// explicit worklist so deeply nested data does not exhaust the host stack.
#[derive(Default)]
pub struct Marker {
    visited: FnvHashSet<usize>,
    work: Vec<Work>,
}

impl Marker {
    pub fn new() -> Marker {
        Marker::default()
    }

    pub fn is_marked(&self, addr: usize) -> bool {
        self.visited.contains(&addr)
    }

    pub fn marked_count(&self) -> usize {
        self.visited.len()
    }

    /// Trace everything reachable from what has been marked so far.
    pub fn drain(&mut self) {
        while let Some(work) = self.work.pop() {
            match work {
                Work::Value(v) => v.trace(self),
                Work::Upvalue(uv) => uv.borrow().trace(self),
                Work::Registers(regs) => regs.trace(self),
            }
        }
    }
}

impl Tracer for Marker {
    fn mark(&mut self, value: &Value) {
        let holds_values = !matches!(
            value,
            Value::String(_)
                | Value::Symbol(_)
                | Value::Keyword(_)
                | Value::Buffer(_)
                | Value::NativeFunction(_)
        );
        if !holds_values {
            return;
        }
        if let Some(addr) = value.heap_addr() {
            if self.visited.insert(addr) {
                self.work.push(Work::Value(value.clone()));
            }
        }
    }

    fn mark_upvalue(&mut self, upvalue: &UpvalueRef) {
        let addr = Rc::as_ptr(upvalue) as *const () as usize;
        if self.visited.insert(addr) {
            self.work.push(Work::Upvalue(upvalue.clone()));
        }
    }

    fn mark_registers(&mut self, regs: &Rc<Registers>) {
        let addr = Rc::as_ptr(regs) as *const () as usize;
        if self.visited.insert(addr) {
            self.work.push(Work::Registers(regs.clone()));
        }
    }
}
