//! The built-in demo program: a generator fiber summed by its resumer.

use quill_bytecode::{Constant, FuncDef, Opcode};
use quill_codegen::{BuildError, FunctionBuilder};

/// `(fn gen [n] (var i 0) (while true (++ i) (if (> i n) (break)) (yield i)))`
fn generator() -> Result<FuncDef, Vec<BuildError>> {
    let mut f = FunctionBuilder::new(Some("gen".into()), 1, false);
    let n = 0;
    let i = f.regs().alloc_one();
    let cmp = f.regs().alloc_one();
    let (head, body, done) = (f.new_block(), f.new_block(), f.new_block());

    f.emit_load(i, Constant::Integer(0));
    f.jump(head);

    f.switch_to(head);
    f.emit(Opcode::AddImmediate, &[i as i32, i as i32, 1]);
    f.emit(Opcode::GreaterThan, &[cmp as i32, i as i32, n]);
    f.branch(cmp, done, body);

    f.switch_to(done);
    f.ret_nil();

    f.switch_to(body);
    f.emit(Opcode::Yield, &[cmp as i32, i as i32]);
    f.jump(head);

    f.finish()
}

/// Resume `gen` with `limit` until it finishes, returning the sum of
/// everything it yielded.
pub fn build(limit: i32) -> Result<FuncDef, Vec<BuildError>> {
    let mut f = FunctionBuilder::new(Some("main".into()), 0, false);
    let fiber = f.regs().alloc_n(2);
    let arg = f.regs().alloc_one();
    let sum = f.regs().alloc_one();
    let got = f.regs().alloc_one();
    let status = f.regs().alloc_n(2);

    let gen = f.add_def(generator()?);
    let fiber_new = f.constants().insert_symbol("fiber/new");
    let fiber_status = f.constants().insert_symbol("fiber/status");
    let (head, body, done) = (f.new_block(), f.new_block(), f.new_block());

    f.emit(Opcode::LoadGlobal, &[fiber as i32, fiber_new as i32]);
    f.emit(Opcode::Closure, &[fiber as i32 + 1, gen as i32]);
    f.emit(Opcode::Call, &[fiber as i32, fiber as i32, 1]);
    f.emit_load(arg, Constant::Integer(limit));
    f.emit_load(sum, Constant::Integer(0));
    f.jump(head);

    f.switch_to(head);
    f.emit(Opcode::Resume, &[got as i32, fiber as i32, arg as i32]);
    f.emit(Opcode::LoadGlobal, &[status as i32, fiber_status as i32]);
    f.emit(Opcode::Move, &[status as i32 + 1, fiber as i32]);
    f.emit(Opcode::Call, &[status as i32, status as i32, 1]);
    f.emit_load(status + 1, Constant::Keyword("dead".into()));
    f.emit(Opcode::Equals, &[status as i32, status as i32, status as i32 + 1]);
    f.branch(status, done, body);

    f.switch_to(body);
    f.emit(Opcode::Add, &[sum as i32, sum as i32, got as i32]);
    f.jump(head);

    f.switch_to(done);
    f.ret(sum);

    f.finish()
}
