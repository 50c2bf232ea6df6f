use std::sync::Arc;

use pretty_assertions::assert_eq;
use quill_bytecode::{image, Capture, Constant, FuncDef, Instruction, Opcode};
use quill_codegen::FunctionBuilder;
use quill_vm::{ErrorReport, FiberFlags, FiberStatus, Signal, TraceEntry, Value, Vm};
use test_env_log::test;

fn run(vm: &mut Vm, def: &FuncDef) -> Result<Value, ErrorReport> {
    let proto = vm.load(def).unwrap();
    vm.run(&proto)
}

fn entry(name: &str) -> FunctionBuilder {
    FunctionBuilder::new(Some(name.into()), 0, false)
}

/// A top-level function that returns a closure over `def`.
fn closure_of(def: FuncDef) -> FuncDef {
    let mut b = entry("main");
    let r0 = b.regs().alloc_one();
    let f = b.add_def(def);
    b.emit(Opcode::Closure, &[r0 as i32, f as i32]);
    b.ret(r0);
    b.finish().unwrap()
}

#[test]
fn adds_two_integers() {
    let code = [
        (Opcode::LoadInteger, vec![0, 2]),
        (Opcode::LoadInteger, vec![1, 3]),
        (Opcode::Add, vec![2, 0, 1]),
        (Opcode::Return, vec![2]),
    ];
    let def = FuncDef {
        slot_count: 3,
        code: code
            .iter()
            .map(|(op, operands)| Instruction::encode(*op, operands).unwrap())
            .collect(),
        ..FuncDef::default()
    };
    let mut vm = Vm::default();
    assert_eq!(run(&mut vm, &def).unwrap(), Value::Integer(5));

    // the same program survives a trip through the image format
    let decoded = image::decode(&image::encode(&def)).unwrap();
    assert_eq!(run(&mut vm, &decoded).unwrap(), Value::Integer(5));
}

#[test]
fn fiber_yields_then_returns() {
    let mut g = FunctionBuilder::new(Some("gen".into()), 0, false);
    let (v, got) = (g.regs().alloc_one(), g.regs().alloc_one());
    g.emit_load(v, Constant::Integer(5));
    g.emit(Opcode::Yield, &[got as i32, v as i32]);
    g.emit_load(v, Constant::Integer(10));
    g.ret(v);

    let mut vm = Vm::default();
    let f = run(&mut vm, &closure_of(g.finish().unwrap())).unwrap();
    let fiber = vm.new_fiber(&f, FiberFlags::empty()).unwrap();

    assert_eq!(vm.resume(&fiber, Value::Nil), (Signal::Yield, Value::Integer(5)));
    assert_eq!(fiber.status(), FiberStatus::Pending);
    assert_eq!(
        vm.resume(&fiber, Value::string("ignored")),
        (Signal::Ok, Value::Integer(10))
    );
    assert_eq!(fiber.status(), FiberStatus::Dead);
}

#[test]
fn resume_value_becomes_the_yield_result() {
    // echo: yields whatever it was resumed with, forever
    let mut g = FunctionBuilder::new(Some("echo".into()), 1, false);
    let top = g.new_block();
    g.jump(top);
    g.switch_to(top);
    g.emit(Opcode::Yield, &[0, 0]);
    g.jump(top);

    let mut vm = Vm::default();
    let f = run(&mut vm, &closure_of(g.finish().unwrap())).unwrap();
    let fiber = vm.new_fiber(&f, FiberFlags::empty()).unwrap();
    for i in 1..4 {
        assert_eq!(
            vm.resume(&fiber, Value::Integer(i)),
            (Signal::Yield, Value::Integer(i))
        );
    }
}

#[test]
fn native_arity_error_is_a_signal() {
    let mut vm = Vm::default();
    vm.load_corelib();
    let length = vm.global("length").unwrap();
    let report = vm.call(&length, &[]).unwrap_err();
    assert_eq!(
        report.payload,
        Value::string("arity mismatch in length: expected 1 argument, got 0")
    );

    let mut b = entry("main");
    let f = b.regs().alloc_one();
    let name = b.constants().insert_symbol("length");
    b.emit(Opcode::LoadGlobal, &[f as i32, name as i32]);
    b.emit(Opcode::Call, &[f as i32, f as i32, 0]);
    b.ret(f);
    let report = run(&mut vm, &b.finish().unwrap()).unwrap_err();
    assert_eq!(
        report.trace,
        vec![TraceEntry {
            function: "main".into(),
            ip: 1
        }]
    );
    assert_eq!(
        report.to_string(),
        "error: arity mismatch in length: expected 1 argument, got 0\n  in main at 1"
    );
}

fn counter() -> FuncDef {
    let mut inc = FunctionBuilder::new(Some("inc".into()), 0, false);
    let r = inc.regs().alloc_one();
    let uv = inc.capture(Capture::Local(0));
    inc.emit(Opcode::LoadUpvalue, &[r as i32, uv as i32]);
    inc.emit(Opcode::AddImmediate, &[r as i32, r as i32, 1]);
    inc.emit(Opcode::SetUpvalue, &[r as i32, uv as i32]);
    inc.ret(r);
    inc.finish().unwrap()
}

#[test]
fn open_upvalues_alias_the_register() {
    let mut b = entry("main");
    let n = b.regs().alloc_one();
    let f = b.regs().alloc_one();
    let out = b.regs().alloc_one();
    let def = b.add_def(counter());
    b.emit_load(n, Constant::Integer(0));
    b.emit(Opcode::Closure, &[f as i32, def as i32]);
    b.emit(Opcode::Call, &[out as i32, f as i32, 0]);
    b.emit(Opcode::Call, &[out as i32, f as i32, 0]);
    b.ret(n);

    let mut vm = Vm::default();
    assert_eq!(run(&mut vm, &b.finish().unwrap()).unwrap(), Value::Integer(2));
}

#[test]
fn closed_upvalues_outlive_their_frame() {
    let mut b = entry("make-counter");
    let n = b.regs().alloc_one();
    let f = b.regs().alloc_one();
    let def = b.add_def(counter());
    b.emit_load(n, Constant::Integer(0));
    b.emit(Opcode::Closure, &[f as i32, def as i32]);
    b.ret(f);

    let mut vm = Vm::default();
    let counter = run(&mut vm, &b.finish().unwrap()).unwrap();
    for i in 1..=3 {
        assert_eq!(vm.call(&counter, &[]).unwrap(), Value::Integer(i));
    }
}

fn thrower() -> FuncDef {
    let mut t = FunctionBuilder::new(Some("thrower".into()), 0, false);
    let r = t.regs().alloc_one();
    t.emit_load(r, Constant::string("boom"));
    t.raise(r);
    t.finish().unwrap()
}

/// `(resume (fiber/new thrower flags))`
fn resume_thrower(flags: &str) -> FuncDef {
    let mut b = entry("main");
    let call = b.regs().alloc_n(3);
    let out = b.regs().alloc_one();
    let fiber_new = b.constants().insert_symbol("fiber/new");
    let def = b.add_def(thrower());
    b.emit(Opcode::LoadGlobal, &[call as i32, fiber_new as i32]);
    b.emit(Opcode::Closure, &[call as i32 + 1, def as i32]);
    b.emit_load(call + 2, Constant::Keyword(flags.into()));
    b.emit(Opcode::Call, &[call as i32, call as i32, 2]);
    b.emit(Opcode::LoadNil, &[out as i32]);
    b.emit(Opcode::Resume, &[out as i32, call as i32, out as i32]);
    b.ret(out);
    b.finish().unwrap()
}

#[test]
fn catch_error_fiber_hands_back_the_payload() {
    let mut vm = Vm::default();
    vm.load_corelib();
    let v = run(&mut vm, &resume_thrower("e")).unwrap();
    assert_eq!(v, Value::string("boom"));
    assert!(vm.last_trace().is_empty());
}

#[test]
fn uncaught_child_error_propagates() {
    let mut vm = Vm::default();
    vm.load_corelib();
    let report = run(&mut vm, &resume_thrower("")).unwrap_err();
    assert_eq!(report.payload, Value::string("boom"));
    let names = report
        .trace
        .iter()
        .map(|e| e.function.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["thrower", "main"]);
    assert_eq!(report.trace[1].ip, 5);
}

#[test]
fn cancelled_fiber_reports_the_value() {
    let mut g = FunctionBuilder::new(Some("gen".into()), 0, false);
    let r = g.regs().alloc_one();
    g.emit_load(r, Constant::Integer(1));
    g.emit(Opcode::Yield, &[r as i32, r as i32]);
    g.ret(r);

    let mut vm = Vm::default();
    vm.load_corelib();
    let f = run(&mut vm, &closure_of(g.finish().unwrap())).unwrap();
    let fiber = vm.new_fiber(&f, FiberFlags::empty()).unwrap();
    assert_eq!(vm.resume(&fiber, Value::Nil).0, Signal::Yield);

    let cancel = vm.global("fiber/cancel").unwrap();
    vm.call(&cancel, &[Value::Fiber(fiber.clone())]).unwrap();
    assert_eq!(
        vm.resume(&fiber, Value::Nil),
        (Signal::Error, Value::string("cancelled"))
    );
    let status = vm.global("fiber/status").unwrap();
    let kw = vm.keyword("error");
    assert_eq!(vm.call(&status, &[Value::Fiber(fiber)]).unwrap(), kw);
}

#[test]
fn collects_unreachable_cycles() {
    let mut b = entry("main");
    let push = b.regs().alloc_n(3);
    let collect = b.regs().alloc_one();
    let push_name = b.constants().insert_symbol("array/push");
    let collect_name = b.constants().insert_symbol("gc/collect");
    // (def a @[]) (array/push a a)
    b.emit(Opcode::LoadGlobal, &[push as i32, push_name as i32]);
    b.emit(Opcode::MakeArray, &[push as i32 + 1, 0, 0]);
    b.emit(Opcode::Move, &[push as i32 + 2, push as i32 + 1]);
    b.emit(Opcode::Call, &[push as i32 + 1, push as i32, 2]);
    b.emit(Opcode::LoadNil, &[push as i32 + 1]);
    b.emit(Opcode::LoadNil, &[push as i32 + 2]);
    b.emit(Opcode::LoadGlobal, &[collect as i32, collect_name as i32]);
    b.emit(Opcode::Call, &[collect as i32, collect as i32, 0]);
    b.ret(collect);

    let mut vm = Vm::default();
    vm.load_corelib();
    assert_eq!(run(&mut vm, &b.finish().unwrap()).unwrap(), Value::Integer(1));
}

/// `(fn count [n] (if (= n 0) :done (count (- n 1))))`, as a tail call or
/// a plain call.
fn count_down(tail: bool) -> FuncDef {
    let mut f = FunctionBuilder::new(Some("count".into()), 1, false);
    let tmp = f.regs().alloc_one();
    let arg = f.regs().alloc_one();
    let (done, recur) = (f.new_block(), f.new_block());
    f.emit_load(tmp, Constant::Integer(0));
    f.emit(Opcode::Equals, &[tmp as i32, 0, tmp as i32]);
    f.branch(tmp, done, recur);

    f.switch_to(done);
    f.emit_load(tmp, Constant::Keyword("done".into()));
    f.ret(tmp);

    f.switch_to(recur);
    f.emit(Opcode::LoadSelf, &[tmp as i32]);
    f.emit(Opcode::AddImmediate, &[arg as i32, 0, -1]);
    if tail {
        f.tail_call(tmp, 1);
    } else {
        f.emit(Opcode::Call, &[tmp as i32, tmp as i32, 1]);
        f.ret(tmp);
    }
    f.finish().unwrap()
}

fn call_with(def: FuncDef, arg: i32) -> FuncDef {
    let mut b = entry("main");
    let f = b.regs().alloc_n(2);
    let d = b.add_def(def);
    b.emit(Opcode::Closure, &[f as i32, d as i32]);
    b.emit_load(f + 1, Constant::Integer(arg));
    b.emit(Opcode::Call, &[f as i32, f as i32, 1]);
    b.ret(f);
    b.finish().unwrap()
}

#[test]
fn tail_calls_run_in_constant_frames() {
    let mut vm = Vm::default();
    let v = run(&mut vm, &call_with(count_down(true), 10_000)).unwrap();
    let done = vm.keyword("done");
    assert_eq!(v, done);
}

#[test]
fn deep_recursion_overflows() {
    let mut vm = Vm::default();
    let report = run(&mut vm, &call_with(count_down(false), 10_000)).unwrap_err();
    assert_eq!(report.payload, Value::string("stack overflow"));
    assert_eq!(report.trace.len(), vm.config().max_call_depth);

    // shallow enough is fine
    let v = run(&mut vm, &call_with(count_down(false), 100)).unwrap();
    let done = vm.keyword("done");
    assert_eq!(v, done);
}

#[test]
fn globals() {
    let mut b = entry("main");
    let r = b.regs().alloc_one();
    let answer = b.constants().insert_symbol("answer");
    b.emit_load(r, Constant::Integer(42));
    b.emit(Opcode::SetGlobal, &[r as i32, answer as i32]);
    b.emit(Opcode::LoadNil, &[r as i32]);
    b.emit(Opcode::LoadGlobal, &[r as i32, answer as i32]);
    b.ret(r);

    let mut vm = Vm::default();
    assert_eq!(run(&mut vm, &b.finish().unwrap()).unwrap(), Value::Integer(42));
    assert_eq!(vm.global("answer"), Some(Value::Integer(42)));

    let mut b = entry("main");
    let r = b.regs().alloc_one();
    let nope = b.constants().insert_symbol("nope");
    b.emit(Opcode::LoadGlobal, &[r as i32, nope as i32]);
    b.ret(r);
    let report = run(&mut vm, &b.finish().unwrap()).unwrap_err();
    assert_eq!(report.payload, Value::string("unknown global nope"));
}

#[test]
fn varargs_collect_into_a_tuple() {
    let mut rest = FunctionBuilder::new(Some("rest".into()), 1, true);
    let n = rest.regs().alloc_one();
    rest.emit(Opcode::Length, &[n as i32, 1]);
    rest.ret(n);
    let rest = Arc::new(rest.finish().unwrap());

    let mut b = entry("main");
    let f = b.regs().alloc_n(4);
    let d = b.add_def(rest.clone());
    b.emit(Opcode::Closure, &[f as i32, d as i32]);
    for i in 1..4 {
        b.emit_load(f + i, Constant::Integer(i as i32));
    }
    b.emit(Opcode::Call, &[f as i32, f as i32, 3]);
    b.ret(f);

    let mut vm = Vm::default();
    assert_eq!(run(&mut vm, &b.finish().unwrap()).unwrap(), Value::Integer(2));

    let f = run(&mut vm, &closure_of((*rest).clone())).unwrap();
    let report = vm.call(&f, &[]).unwrap_err();
    assert_eq!(
        report.payload,
        Value::string("arity mismatch in rest: expected at least 1 argument, got 0")
    );
}

#[test]
fn struct_and_table_lookups() {
    let mut b = entry("main");
    let kv = b.regs().alloc_n(4);
    let (s, t, out) = (b.regs().alloc_one(), b.regs().alloc_one(), b.regs().alloc_one());
    b.emit_load(kv, Constant::Keyword("a".into()));
    b.emit_load(kv + 1, Constant::Integer(1));
    b.emit_load(kv + 2, Constant::Keyword("b".into()));
    b.emit_load(kv + 3, Constant::Integer(2));
    b.emit(Opcode::MakeStruct, &[s as i32, kv as i32, 4]);
    b.emit(Opcode::MakeTable, &[t as i32, kv as i32, 2]);
    // t[:b] = s[:b] + t[:a]
    b.emit(Opcode::Get, &[out as i32, s as i32, kv as i32 + 2]);
    b.emit(Opcode::Get, &[kv as i32 + 1, t as i32, kv as i32]);
    b.emit(Opcode::Add, &[out as i32, out as i32, kv as i32 + 1]);
    b.emit(Opcode::Put, &[t as i32, kv as i32 + 2, out as i32]);
    b.emit(Opcode::Length, &[kv as i32 + 3, t as i32]);
    b.emit(Opcode::MakeTuple, &[out as i32, kv as i32 + 1, 3]);
    b.ret(out);

    let mut vm = Vm::default();
    let v = run(&mut vm, &b.finish().unwrap()).unwrap();
    let b_kw = vm.keyword("b");
    assert_eq!(
        v,
        Value::tuple(vec![Value::Integer(1), b_kw, Value::Integer(2)]).unwrap()
    );
}

#[test]
fn runaway_tuple_nesting_is_an_error() {
    // (var t nil) (while true (set t [t]))
    let mut b = entry("main");
    let t = b.regs().alloc_one();
    let top = b.new_block();
    b.emit_load(t, Constant::Nil);
    b.jump(top);
    b.switch_to(top);
    b.emit(Opcode::MakeTuple, &[t as i32, t as i32, 1]);
    b.jump(top);

    let mut vm = Vm::default();
    let report = run(&mut vm, &b.finish().unwrap()).unwrap_err();
    assert_eq!(
        report.payload,
        Value::string(format!(
            "tuples and structs cannot nest more than {} levels deep",
            quill_vm::value::MAX_NESTING
        ))
    );
    assert_eq!(report.trace[0].function, "main");
}

#[test]
fn putting_into_a_struct_is_an_error() {
    let mut b = entry("main");
    let r = b.regs().alloc_n(2);
    b.emit(Opcode::MakeStruct, &[r as i32, 0, 0]);
    b.emit_load(r + 1, Constant::Integer(1));
    b.emit(Opcode::Put, &[r as i32, r as i32 + 1, r as i32 + 1]);
    b.ret_nil();

    let mut vm = Vm::default();
    let report = run(&mut vm, &b.finish().unwrap()).unwrap_err();
    assert_eq!(report.payload, Value::string("cannot put into immutable struct"));
}
