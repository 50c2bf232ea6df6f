use expect_test::expect;
use pretty_assertions::assert_eq;
use quill_bytecode::{Constant, Opcode};
use test_env_log::test;

use crate::regalloc::{RegisterAllocator, TEMP_BASE};
use crate::FunctionBuilder;

#[test]
fn first_fit_reuse() {
    let mut ra = RegisterAllocator::new();
    assert_eq!(ra.alloc_one(), 0);
    assert_eq!(ra.alloc_one(), 1);
    assert_eq!(ra.alloc_one(), 2);
    assert_eq!(ra.max(), Some(2));

    ra.free_one(1);
    assert_eq!(ra.max(), Some(2));
    assert_eq!(ra.alloc_one(), 1);
    assert_eq!(ra.max(), Some(2));
    assert_eq!(ra.frame_size(), 3);
}

#[test]
fn live_registers_never_alias() {
    let mut ra = RegisterAllocator::new();
    let mut live: Vec<u32> = vec![];
    let mut highest = None;
    let mut seed = 0x2545_f491u32;

    for _ in 0..2000 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        if seed % 3 == 0 && !live.is_empty() {
            let idx = (seed as usize / 3) % live.len();
            ra.free_one(live.swap_remove(idx));
        } else {
            let reg = ra.alloc_one();
            assert!(!live.contains(&reg), "r{} handed out twice", reg);
            live.push(reg);
            highest = highest.max(Some(reg));
        }
        assert_eq!(ra.max(), highest);
    }
}

#[test]
fn contiguous_ranges() {
    let mut ra = RegisterAllocator::new();
    ra.touch(0);
    ra.touch(2);
    assert_eq!(ra.max(), Some(2));

    let start = ra.alloc_n(3);
    assert_eq!(start, 3);
    assert!((3..6).all(|r| ra.is_used(r)));
    assert!(!ra.is_used(1));
    assert_eq!(ra.max(), Some(5));

    ra.free_range(3, 3);
    assert_eq!(ra.alloc_n(1), 1);
    assert_eq!(ra.max(), Some(5));
}

#[test]
fn call_ranges() {
    let mut ra = RegisterAllocator::new();
    let callee = ra.alloc_one();
    assert_eq!(ra.alloc_call(callee, 2), callee);
    assert!(ra.is_used(1) && ra.is_used(2));

    // r4 is taken, so the arguments of a call through r3 cannot follow it
    let other = ra.alloc_one();
    let blocker = ra.alloc_one();
    assert_eq!((other, blocker), (3, 4));
    let start = ra.alloc_call(other, 1);
    assert_eq!(start, 5);
    assert!(ra.is_used(5) && ra.is_used(6));
    assert_eq!(ra.max(), Some(6));
}

#[test]
fn scratch_registers() {
    let mut ra = RegisterAllocator::new();
    let low = ra.alloc_temp(0);
    assert_eq!(low, 0);
    ra.free_temp(low, 0);
    assert!(!ra.is_used(0));

    // fill every register an 8-bit operand can reach
    for _ in 0..(0x100 - 8) {
        let reg = ra.alloc_one();
        assert!(!(TEMP_BASE..TEMP_BASE + 8).contains(&reg));
    }
    assert_eq!(ra.max(), Some(0xFF));

    let t = ra.alloc_temp(2);
    assert_eq!(t, TEMP_BASE + 2);
    assert_eq!(ra.max(), Some(0xFF));
    assert!(!ra.is_used(0x100));
    ra.free_temp(t, 2);
}

#[test]
fn branches_merge_high_water_mark() {
    let mut ra = RegisterAllocator::new();
    ra.alloc_one();

    let mut then_ra = ra.branch();
    then_ra.alloc_n(4);
    let mut else_ra = ra.branch();
    else_ra.alloc_one();

    ra.merge(&then_ra);
    ra.merge(&else_ra);
    assert_eq!(ra.max(), Some(4));
    assert!(!ra.is_used(1));
    assert_eq!(ra.alloc_one(), 1);
}

#[test]
fn if_else_layout() {
    let mut f = FunctionBuilder::new(Some("choose".into()), 1, false);
    let then_bb = f.new_block();
    let else_bb = f.new_block();
    let join = f.new_block();
    let out = f.regs().alloc_one();
    f.branch(0, then_bb, else_bb);

    f.switch_to(then_bb);
    f.emit_load(out, Constant::Integer(100000));
    f.jump(join);

    f.switch_to(else_bb);
    f.emit_load(out, Constant::string("no"));
    f.jump(join);

    f.switch_to(join);
    f.ret(out);

    let def = f.finish().unwrap();
    expect![[r#"
        function choose (arity 1, slots 2)
          constants:
            #0 = 100000
            #1 = "no"
          code:
            0000 JumpIfNot r0 @3
            0001 LoadConstant r1 #0
            0002 Jump @4
            0003 LoadConstant r1 #1
            0004 Return r1
    "#]]
    .assert_eq(&def.to_string());
}

#[test]
fn loop_jumps_backwards() {
    let mut f = FunctionBuilder::new(Some("countdown".into()), 1, false);
    let header = f.new_block();
    let body = f.new_block();
    let exit = f.new_block();
    f.jump(header);

    f.switch_to(header);
    f.branch(0, body, exit);

    f.switch_to(body);
    f.emit(Opcode::AddImmediate, &[0, 0, -1]);
    f.jump(header);

    f.switch_to(exit);
    f.ret(0);

    let def = f.finish().unwrap();
    assert_eq!(def.code.len(), 4);
    assert_eq!(def.code[0].decode(), Some((Opcode::JumpIfNot, [0, 3, 0])));
    assert_eq!(def.code[2].decode(), Some((Opcode::Jump, [-2, 0, 0])));
    assert_eq!(def.slot_count, 1);
}

#[test]
fn constants_are_deduplicated() {
    let mut f = FunctionBuilder::new(None, 0, false);
    let a = f.constants().insert_symbol("print");
    let b = f.constants().insert_string("print");
    let c = f.constants().insert_symbol("print");
    assert_eq!((a, b, c), (0, 1, 0));
    assert_eq!(f.constants().len(), 2);
}

#[test]
fn unterminated_reachable_block() {
    let mut f = FunctionBuilder::new(None, 0, false);
    let next = f.new_block();
    let _unreachable = f.new_block();
    f.jump(next);

    let errors = f.finish().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].id, "unterminated-block");
    assert_eq!(errors[0].block, Some(next));
}

#[test]
fn misuse_is_reported() {
    let mut f = FunctionBuilder::new(None, 0, false);
    f.emit(Opcode::Jump, &[0]);
    f.emit(Opcode::LoadInteger, &[0, 1 << 20]);
    f.ret_nil();
    f.emit(Opcode::LoadNil, &[0]);

    let ids = f
        .finish()
        .unwrap_err()
        .into_iter()
        .map(|e| e.id)
        .collect::<Vec<_>>();
    assert_eq!(
        ids,
        vec![
            "terminator-as-instruction",
            "bad-operands",
            "emit-after-terminator"
        ]
    );
}
