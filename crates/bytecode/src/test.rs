use std::sync::Arc;

use expect_test::expect;
use pretty_assertions::assert_eq;

use crate::image::{self, ImageError};
use crate::{Capture, Constant, EncodeError, FuncDef, Instruction, Opcode};

fn inst(op: Opcode, operands: &[i32]) -> Instruction {
    Instruction::encode(op, operands).unwrap()
}

fn sample() -> FuncDef {
    let inner = FuncDef {
        name: Some("inner".into()),
        arity: 0,
        slot_count: 1,
        code: vec![
            inst(Opcode::LoadUpvalue, &[0, 0]),
            inst(Opcode::Return, &[0]),
        ],
        captures: vec![Capture::Local(0)],
        ..Default::default()
    };
    FuncDef {
        name: Some("pick".into()),
        arity: 1,
        slot_count: 2,
        code: vec![
            inst(Opcode::JumpIfNot, &[0, 3]),
            inst(Opcode::LoadConstant, &[1, 0]),
            inst(Opcode::Return, &[1]),
            inst(Opcode::Closure, &[1, 0]),
            inst(Opcode::Return, &[1]),
        ],
        constants: vec![
            Constant::Integer(10),
            Constant::string("hi"),
            Constant::Keyword("k".into()),
            Constant::real(1.5),
        ],
        defs: vec![Arc::new(inner)],
        ..Default::default()
    }
}

#[test]
fn signed_operands_are_sign_extended() {
    let i = inst(Opcode::LoadInteger, &[4, -5]);
    assert_eq!(i.decode(), Some((Opcode::LoadInteger, [4, -5, 0])));

    let j = inst(Opcode::Jump, &[-3]);
    assert_eq!(j.decode(), Some((Opcode::Jump, [-3, 0, 0])));

    let k = inst(Opcode::AddImmediate, &[1, 2, -128]);
    assert_eq!(k.decode(), Some((Opcode::AddImmediate, [1, 2, -128])));
}

#[test]
fn field_layout() {
    let i = inst(Opcode::Add, &[1, 2, 3]);
    assert_eq!(i.raw() & 0xff, Opcode::Add as u32);
    assert_eq!((i.a(), i.b(), i.c()), (1, 2, 3));

    let m = inst(Opcode::Move, &[7, 0x1234]);
    assert_eq!((m.a(), m.bc()), (7, 0x1234));

    let j = inst(Opcode::Jump, &[0x12_3456]);
    assert_eq!(j.abc(), 0x12_3456);
}

#[test]
fn encode_rejects_bad_operands() {
    assert_eq!(
        Instruction::encode(Opcode::Add, &[0, 1]),
        Err(EncodeError::OperandCount {
            op: Opcode::Add,
            expected: 3,
            got: 2
        })
    );
    assert_eq!(
        Instruction::encode(Opcode::LoadInteger, &[0, 40000]),
        Err(EncodeError::OperandRange {
            op: Opcode::LoadInteger,
            index: 1,
            value: 40000
        })
    );
    assert!(Instruction::encode(Opcode::Return, &[256]).is_err());
    assert!(Instruction::encode(Opcode::Return, &[-1]).is_err());
}

#[test]
fn unknown_opcode_does_not_decode() {
    let i = Instruction::from_raw(0xff);
    assert_eq!(i.opcode(), None);
    assert_eq!(i.decode(), None);
}

#[test]
fn disassembly() {
    let def = sample();
    expect![[r#"
        function pick (arity 1, slots 2)
          constants:
            #0 = 10
            #1 = "hi"
            #2 = :k
            #3 = 1.5
          code:
            0000 JumpIfNot r0 @3
            0001 LoadConstant r1 #0
            0002 Return r1
            0003 Closure r1 f0
            0004 Return r1
          f0:
            function inner (arity 0, slots 1)
              captures:
                u0 <- r0
              code:
                0000 LoadUpvalue r0 u0
                0001 Return r0
    "#]]
    .assert_eq(&def.to_string());
}

#[test]
fn image_preserves_definition() {
    let def = sample();
    let bytes = image::encode(&def);
    assert_eq!(&bytes[..4], image::MAGIC);

    let back = image::decode(&bytes).unwrap();
    assert_eq!(back.name, def.name);
    assert_eq!(back.constants, def.constants);
    assert_eq!(back.code, def.code);
    assert_eq!(back.defs[0].captures, def.defs[0].captures);
    assert_eq!(back.to_string(), def.to_string());
    assert_eq!(back, def);
}

#[test]
fn truncated_image_is_an_error() {
    let bytes = image::encode(&sample());
    for len in 0..bytes.len() {
        assert!(
            image::decode(&bytes[..len]).is_err(),
            "prefix of length {} decoded",
            len
        );
    }
}

#[test]
fn malformed_images() {
    assert_eq!(image::decode(b"QBC\x02"), Err(ImageError::BadMagic));

    let mut bytes = image::encode(&FuncDef::default()).to_vec();
    bytes.push(0);
    assert_eq!(image::decode(&bytes), Err(ImageError::TrailingBytes(1)));

    let mut long_slots = image::MAGIC.to_vec();
    long_slots.extend_from_slice(&[0, 0, 0, 0x84]);
    assert_eq!(image::decode(&long_slots), Err(ImageError::BadLength(0x84)));
}
