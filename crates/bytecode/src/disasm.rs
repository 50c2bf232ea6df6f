use std::fmt::{Display, Formatter, Result};

use crate::inst::OperandKind;
use crate::{Capture, Constant, FuncDef};

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Boolean(b) => write!(f, "{}", b),
            Constant::Integer(i) => write!(f, "{}", i),
            Constant::Real(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Constant::String(s) => write!(f, "\"{}\"", s.escape_ascii()),
            Constant::Symbol(s) => write!(f, "{}", s),
            Constant::Keyword(s) => write!(f, ":{}", s),
        }
    }
}

impl Display for Capture {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Capture::Local(slot) => write!(f, "r{}", slot),
            Capture::Upvalue(idx) => write!(f, "u{}", idx),
        }
    }
}

/// Prints the disassembly of this definition and all nested definitions.
/// Label operands are printed as absolute instruction indices.
impl Display for FuncDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write_def(self, f, 0)
    }
}

fn write_def(def: &FuncDef, f: &mut Formatter<'_>, indent: usize) -> Result {
    let pad = "    ".repeat(indent);
    writeln!(
        f,
        "{}function {} (arity {}{}, slots {})",
        pad,
        def.name.as_deref().unwrap_or("<anonymous>"),
        def.arity,
        if def.is_vararg() { "+" } else { "" },
        def.slot_count
    )?;

    if !def.constants.is_empty() {
        writeln!(f, "{}  constants:", pad)?;
        for (idx, c) in def.constants.iter().enumerate() {
            writeln!(f, "{}    #{} = {}", pad, idx, c)?;
        }
    }

    if !def.captures.is_empty() {
        writeln!(f, "{}  captures:", pad)?;
        for (idx, c) in def.captures.iter().enumerate() {
            writeln!(f, "{}    u{} <- {}", pad, idx, c)?;
        }
    }

    writeln!(f, "{}  code:", pad)?;
    for (idx, inst) in def.code.iter().enumerate() {
        write!(f, "{}    {:04} ", pad, idx)?;
        match inst.operands() {
            Some((op, operands)) => {
                write!(f, "{}", op)?;
                for mut operand in operands {
                    if operand.kind == OperandKind::Label {
                        operand.value += idx as i32;
                    }
                    write!(f, " {}", operand)?;
                }
            }
            None => write!(f, "<invalid {:#010x}>", inst.raw())?,
        }
        writeln!(f)?;
    }

    for (idx, nested) in def.defs.iter().enumerate() {
        writeln!(f, "{}  f{}:", pad, idx)?;
        write_def(nested, f, indent + 1)?;
    }
    Ok(())
}
