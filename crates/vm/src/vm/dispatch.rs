//! The instruction dispatch loop.

use std::cell::RefCell;
use std::rc::Rc;

use itertools::Itertools;
use quill_bytecode::{Capture, Instruction, Opcode};
use tracing::trace;

use crate::error::{RuntimeError, TraceEntry};
use crate::value::{Closure, StructBuilder, Table, Tuple, Upvalue, UpvalueRef, Value};

use super::arith;
use super::fiber::FiberFlags;
use super::frame::Registers;
use super::{Signal, Vm};

/// What one instruction asks the loop to do next.
pub(crate) enum Flow {
    Continue,
    /// The entry frame of the fiber returned.
    Return(Value),
    Yield(Value),
}

/// Why the running fiber stopped.
pub(crate) enum Exit {
    Return(Value),
    Yield(Value),
}

impl Vm {
    /// Run the innermost active fiber until it stops. On error its frames
    /// are unwound into the stack trace.
    pub(super) fn run_active(&mut self) -> Result<Exit, RuntimeError> {
        loop {
            if self.native_depth == 0 && self.heap.should_collect() {
                self.collect();
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(v)) => return Ok(Exit::Return(v)),
                Ok(Flow::Yield(v)) => return Ok(Exit::Yield(v)),
                Err(e) => {
                    self.unwind_active();
                    return Err(e);
                }
            }
        }
    }

    fn unwind_active(&mut self) {
        let trace = &mut self.trace;
        let af = self
            .active
            .last_mut()
            .expect("unwinding requires a running fiber");
        while let Some(frame) = af.state.pop_frame() {
            trace.push(TraceEntry {
                function: frame.closure.proto.display_name().into(),
                ip: frame.ip.saturating_sub(1),
            });
        }
        af.state.resume_slot = None;
    }

    fn step(&mut self) -> Result<Flow, RuntimeError> {
        let (closure, regs, base, ip) = {
            let af = self.active.last_mut().expect("a fiber is running");
            let frame = af
                .state
                .frames
                .last_mut()
                .expect("a running fiber has a frame");
            let ip = frame.ip;
            frame.ip += 1;
            (frame.closure.clone(), af.state.regs.clone(), frame.base, ip)
        };
        let inst = *closure
            .proto
            .code
            .get(ip)
            .ok_or(RuntimeError::FiberMisuse("instruction pointer ran off the code"))?;
        let op = inst
            .opcode()
            .ok_or(RuntimeError::FiberMisuse("unverified instruction"))?;
        trace!(ip, op = %op, "dispatch");
        self.exec(op, inst, &closure, &regs, base)
    }

    fn set_ip(&mut self, target: usize) {
        if let Some(frame) = self
            .active
            .last_mut()
            .and_then(|af| af.state.frames.last_mut())
        {
            frame.ip = target;
        }
    }

    fn exec(
        &mut self,
        op: Opcode,
        inst: Instruction,
        closure: &Rc<Closure>,
        regs: &Rc<Registers>,
        base: usize,
    ) -> Result<Flow, RuntimeError> {
        let r = |slot: usize| regs.get(base + slot);
        let w = |slot: usize, v: Value| regs.set(base + slot, v);
        let proto = &closure.proto;

        match op {
            Opcode::Noop => {}
            Opcode::Error => return Err(RuntimeError::Raised(r(inst.abc()))),
            Opcode::Return => return self.return_value(r(inst.abc())),
            Opcode::ReturnNil => return self.return_value(Value::Nil),

            Opcode::LoadNil => w(inst.abc(), Value::Nil),
            Opcode::LoadTrue => w(inst.abc(), Value::Boolean(true)),
            Opcode::LoadFalse => w(inst.abc(), Value::Boolean(false)),
            Opcode::LoadInteger => w(inst.a(), Value::Integer(inst.bc() as u16 as i16 as i32)),
            Opcode::LoadConstant => w(inst.a(), proto.constants[inst.bc()].clone()),
            Opcode::LoadSelf => w(inst.abc(), Value::Function(closure.clone())),
            Opcode::LoadUpvalue => w(inst.a(), closure.upvalues[inst.bc()].borrow().get()),
            Opcode::SetUpvalue => closure.upvalues[inst.bc()].borrow_mut().set(r(inst.a())),
            Opcode::LoadGlobal => {
                let name = global_name(&proto.constants[inst.bc()])?;
                let v = self
                    .namespace
                    .get(name)
                    .ok_or_else(|| RuntimeError::UnknownGlobal(name.into()))?;
                w(inst.a(), v);
            }
            Opcode::SetGlobal => {
                let name = global_name(&proto.constants[inst.bc()])?;
                self.namespace.put(name, r(inst.a()));
            }
            Opcode::Move => w(inst.a(), r(inst.bc())),

            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Modulo
            | Opcode::AddInteger
            | Opcode::SubtractInteger
            | Opcode::MultiplyInteger
            | Opcode::AddReal
            | Opcode::SubtractReal
            | Opcode::MultiplyReal
            | Opcode::DivideReal
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::ShiftLeft
            | Opcode::ShiftRight => {
                let v = arith::binary(op, &r(inst.b()), &r(inst.c()))?;
                w(inst.a(), v);
            }
            Opcode::AddImmediate => {
                let imm = Value::Integer(inst.c() as u8 as i8 as i32);
                let v = arith::binary(Opcode::Add, &r(inst.b()), &imm)?;
                w(inst.a(), v);
            }
            Opcode::Negate => w(inst.a(), arith::negate(&r(inst.bc()))?),
            Opcode::Not => w(inst.a(), Value::Boolean(!r(inst.bc()).truthy())),

            Opcode::Equals
            | Opcode::NotEquals
            | Opcode::LessThan
            | Opcode::LessThanEqual
            | Opcode::GreaterThan
            | Opcode::GreaterThanEqual
            | Opcode::Compare => w(inst.a(), arith::compare(op, &r(inst.b()), &r(inst.c()))),

            Opcode::Jump => self.set_ip(inst.abc()),
            Opcode::JumpIf => {
                if r(inst.a()).truthy() {
                    self.set_ip(inst.bc());
                }
            }
            Opcode::JumpIfNot => {
                if !r(inst.a()).truthy() {
                    self.set_ip(inst.bc());
                }
            }

            Opcode::Call => {
                let (dst, callee, n) = (inst.a(), inst.b(), inst.c());
                let f = r(callee);
                let args = (1..=n).map(|i| r(callee + i)).collect_vec();
                match f {
                    Value::Function(c) => {
                        let max_depth = self.config.max_call_depth;
                        self.active_state()
                            .push_frame(c, &args, Some(base + dst), max_depth)?;
                    }
                    Value::NativeFunction(native) => {
                        let v = self.call_native(&native, &args)?;
                        w(dst, v);
                    }
                    other => return Err(RuntimeError::NotCallable(other.ty())),
                }
            }
            Opcode::TailCall => {
                let (callee, n) = (inst.a(), inst.bc());
                let f = r(callee);
                let args = (1..=n).map(|i| r(callee + i)).collect_vec();
                match f {
                    Value::Function(c) => {
                        let max_depth = self.config.max_call_depth;
                        let state = self.active_state();
                        let frame = state
                            .pop_frame()
                            .expect("a tail call happens inside a frame");
                        state.push_frame(c, &args, frame.ret, max_depth)?;
                    }
                    Value::NativeFunction(native) => {
                        let v = self.call_native(&native, &args)?;
                        return self.return_value(v);
                    }
                    other => return Err(RuntimeError::NotCallable(other.ty())),
                }
            }
            Opcode::Closure => {
                let def = proto.defs[inst.bc()].clone();
                let mut upvalues = Vec::with_capacity(def.captures.len());
                for capture in def.captures.iter() {
                    let uv = match *capture {
                        Capture::Local(slot) => self.capture_local(base + slot as usize),
                        Capture::Upvalue(idx) => closure.upvalues[idx as usize].clone(),
                    };
                    upvalues.push(uv);
                }
                let c = Closure::new(def, upvalues.into_boxed_slice());
                w(inst.a(), Value::Function(Rc::new(c)));
            }

            Opcode::Get => w(inst.a(), self.get(&r(inst.b()), &r(inst.c()))?),
            Opcode::Put => self.put(&r(inst.a()), r(inst.b()), r(inst.c()))?,
            Opcode::GetIndex => {
                let key = Value::Integer(inst.c() as i32);
                w(inst.a(), self.get(&r(inst.b()), &key)?);
            }
            Opcode::PutIndex => {
                let key = Value::Integer(inst.c() as i32);
                self.put(&r(inst.a()), key, r(inst.b()))?;
            }
            Opcode::Length => w(inst.a(), self.length(&r(inst.bc()))?),
            Opcode::Next => w(inst.a(), self.next(&r(inst.b()), &r(inst.c()))?),

            Opcode::MakeArray => {
                let items = (0..inst.c()).map(|i| r(inst.b() + i)).collect_vec();
                let v = self.new_array(items);
                w(inst.a(), v);
            }
            Opcode::MakeTuple => {
                let items = (0..inst.c()).map(|i| r(inst.b() + i)).collect_vec();
                w(inst.a(), Value::Tuple(Tuple::new(items)?));
            }
            Opcode::MakeTable => {
                let (start, len) = (inst.b(), inst.c());
                let mut table = Table::with_capacity(len / 2);
                for i in (0..len).step_by(2) {
                    table.put(r(start + i), r(start + i + 1));
                }
                let v = self.new_table(table);
                w(inst.a(), v);
            }
            Opcode::MakeStruct => {
                let (start, len) = (inst.b(), inst.c());
                let mut b = StructBuilder::new(len / 2);
                for i in (0..len).step_by(2) {
                    b.put(r(start + i), r(start + i + 1));
                }
                w(inst.a(), Value::Struct(b.finish()?));
            }

            Opcode::Yield => {
                self.active_state().resume_slot = Some(base + inst.a());
                return Ok(Flow::Yield(r(inst.bc())));
            }
            Opcode::Resume => {
                let fiber = match r(inst.b()) {
                    Value::Fiber(f) => f,
                    other => return Err(RuntimeError::type_error("resume", "fiber", &other)),
                };
                let mark = self.trace.len();
                let v = match self.resume(&fiber, r(inst.c())) {
                    (Signal::Error, payload) => {
                        if fiber.flags().contains(FiberFlags::CATCH_ERROR) {
                            self.trace.truncate(mark);
                            payload
                        } else {
                            return Err(RuntimeError::Raised(payload));
                        }
                    }
                    (_, v) => v,
                };
                w(inst.a(), v);
            }
        }
        Ok(Flow::Continue)
    }

    fn active_state(&mut self) -> &mut super::FiberState {
        &mut self
            .active
            .last_mut()
            .expect("a fiber is running")
            .state
    }

    /// Pop the current frame and hand `v` to its caller.
    fn return_value(&mut self, v: Value) -> Result<Flow, RuntimeError> {
        let state = self.active_state();
        let frame = state
            .pop_frame()
            .expect("returning requires a frame");
        match frame.ret {
            Some(slot) => {
                state.regs.set(slot, v);
                Ok(Flow::Continue)
            }
            None => Ok(Flow::Return(v)),
        }
    }

    /// The upvalue for register `abs` of the current frame, shared with every
    /// other closure that captured it from this frame.
    fn capture_local(&mut self, abs: usize) -> UpvalueRef {
        let af = self.active.last_mut().expect("a fiber is running");
        let regs = af.state.regs.clone();
        let frame = af
            .state
            .frames
            .last_mut()
            .expect("a running fiber has a frame");
        if let Some((_, uv)) = frame.open.iter().find(|(idx, _)| *idx == abs) {
            return uv.clone();
        }
        let uv = Rc::new(RefCell::new(Upvalue::Open { regs, index: abs }));
        frame.open.push((abs, uv.clone()));
        self.heap.track_upvalue(&uv);
        uv
    }
}

fn global_name(name: &Value) -> Result<&str, RuntimeError> {
    match name {
        Value::Symbol(s) => std::str::from_utf8(s)
            .map_err(|_| RuntimeError::type_error("global", "symbol", name)),
        other => Err(RuntimeError::type_error("global", "symbol", other)),
    }
}
