use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::RuntimeError;
use crate::gc::{Trace, Tracer};
use crate::value::{Closure, Tuple, Value};

use super::frame::{Frame, Registers};

bitflags! {
    pub struct FiberFlags: u8 {
        /// An error inside the fiber becomes the value of the `Resume` that
        /// ran it instead of propagating into the resumer.
        const CATCH_ERROR = 0b0000_0001;
    }
}

impl Default for FiberFlags {
    fn default() -> Self {
        FiberFlags::empty()
    }
}

/// ```plaintext
/// New -> Alive -> Dead
///          ^ |  \
///          | v   -> Error
///        Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Created and never resumed
    New,
    /// Currently running, possibly with a child fiber on top
    Alive,
    /// Suspended by a yield
    Pending,
    /// Returned normally
    Dead,
    /// Stopped by an error or a cancellation
    Error,
}

impl FiberStatus {
    pub fn name(self) -> &'static str {
        match self {
            FiberStatus::New => "new",
            FiberStatus::Alive => "alive",
            FiberStatus::Pending => "pending",
            FiberStatus::Dead => "dead",
            FiberStatus::Error => "error",
        }
    }
}

impl Display for FiberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a resume ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ok,
    Yield,
    Error,
}

pub(crate) struct Entry {
    pub closure: Rc<Closure>,
    /// Explicit arguments for the first resume. Without them the resume
    /// value is passed if the closure takes a parameter.
    pub args: Option<Vec<Value>>,
}

/// The execution state of a fiber. It lives inside the fiber while the
/// fiber is suspended and on the runtime's active stack while it runs.
#[derive(Default)]
pub(crate) struct FiberState {
    pub regs: Rc<Registers>,
    pub frames: Vec<Frame>,
    /// Register of the suspended `Yield` that receives the next resume value
    pub resume_slot: Option<usize>,
    pub entry: Option<Entry>,
}

impl FiberState {
    pub fn new(regs: Rc<Registers>, entry: Entry) -> FiberState {
        FiberState {
            regs,
            frames: vec![],
            resume_slot: None,
            entry: Some(entry),
        }
    }

    /// Push a frame for `closure`, binding `args` to its parameters.
    pub fn push_frame(
        &mut self,
        closure: Rc<Closure>,
        args: &[Value],
        ret: Option<usize>,
        max_depth: usize,
    ) -> Result<(), RuntimeError> {
        let proto = &closure.proto;
        let arity_ok = if proto.vararg {
            args.len() >= proto.arity
        } else {
            args.len() == proto.arity
        };
        if !arity_ok {
            return Err(RuntimeError::Arity {
                name: proto.display_name().into(),
                min: proto.arity,
                max: (!proto.vararg).then(|| proto.arity),
                got: args.len(),
            });
        }
        if self.frames.len() >= max_depth {
            return Err(RuntimeError::StackOverflow);
        }

        let rest = if proto.vararg {
            Some(Tuple::new(args[proto.arity..].to_vec())?)
        } else {
            None
        };

        let base = self.frames.last().map_or(0, |f| f.end());
        self.regs.truncate(base);
        self.regs.grow_to(base + proto.slot_count);
        for (i, arg) in args.iter().take(proto.arity).enumerate() {
            self.regs.set(base + i, arg.clone());
        }
        if let Some(rest) = rest {
            self.regs.set(base + proto.arity, Value::Tuple(rest));
        }

        self.frames.push(Frame::new(closure, base, ret));
        Ok(())
    }

    /// Pop the innermost frame, closing its upvalues and releasing its
    /// registers.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let mut frame = self.frames.pop()?;
        frame.close_upvalues();
        self.regs.truncate(frame.base);
        Some(frame)
    }
}

impl Trace for FiberState {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.mark_registers(&self.regs);
        for frame in &self.frames {
            tracer.mark(&Value::Function(frame.closure.clone()));
            for (_, uv) in &frame.open {
                tracer.mark_upvalue(uv);
            }
        }
        if let Some(entry) = &self.entry {
            tracer.mark(&Value::Function(entry.closure.clone()));
            for arg in entry.args.iter().flatten() {
                tracer.mark(arg);
            }
        }
    }
}

/// A suspendable call stack.
pub struct Fiber {
    status: Cell<FiberStatus>,
    flags: FiberFlags,
    state: RefCell<FiberState>,
    pending_cancel: RefCell<Option<Value>>,
}

impl Fiber {
    pub(crate) fn new(flags: FiberFlags, state: FiberState) -> Fiber {
        Fiber {
            status: Cell::new(FiberStatus::New),
            flags,
            state: RefCell::new(state),
            pending_cancel: RefCell::new(None),
        }
    }

    pub fn status(&self) -> FiberStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: FiberStatus) {
        self.status.set(status)
    }

    pub fn flags(&self) -> FiberFlags {
        self.flags
    }

    pub fn has_pending_cancel(&self) -> bool {
        self.pending_cancel.borrow().is_some()
    }

    pub(crate) fn set_pending_cancel(&self, value: Value) {
        *self.pending_cancel.borrow_mut() = Some(value);
    }

    pub(crate) fn take_pending_cancel(&self) -> Option<Value> {
        self.pending_cancel.borrow_mut().take()
    }

    pub(crate) fn take_state(&self) -> FiberState {
        std::mem::take(&mut *self.state.borrow_mut())
    }

    pub(crate) fn put_state(&self, state: FiberState) {
        *self.state.borrow_mut() = state;
    }

    /// Empty an unreachable fiber, returning what it held.
    pub(crate) fn clear(&self) -> (FiberState, Option<Value>) {
        let state = self.take_state();
        let cancel = self.take_pending_cancel();
        if !matches!(self.status(), FiberStatus::Dead | FiberStatus::Error) {
            self.set_status(FiberStatus::Dead);
        }
        (state, cancel)
    }
}

impl Trace for Fiber {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.state.borrow().trace(tracer);
        if let Some(v) = &*self.pending_cancel.borrow() {
            tracer.mark(v);
        }
    }
}
