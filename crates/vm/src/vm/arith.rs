//! Arithmetic and comparison instructions.
//!
//! The generic operators accept any mix of integers and reals. Integer
//! operations promote to real when the result does not fit; mixed operands
//! are computed as reals. The typed fast paths only accept their own type,
//! and the integer ones wrap.

use std::cmp::Ordering;

use quill_bytecode::Opcode;

use crate::error::RuntimeError;
use crate::value::Value;

fn op_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Add | Opcode::AddInteger | Opcode::AddReal | Opcode::AddImmediate => "+",
        Opcode::Subtract | Opcode::SubtractInteger | Opcode::SubtractReal => "-",
        Opcode::Multiply | Opcode::MultiplyInteger | Opcode::MultiplyReal => "*",
        Opcode::Divide | Opcode::DivideReal => "/",
        Opcode::Modulo => "%",
        Opcode::BitAnd => "band",
        Opcode::BitOr => "bor",
        Opcode::BitXor => "bxor",
        Opcode::ShiftLeft => "blshift",
        Opcode::ShiftRight => "brshift",
        Opcode::Negate => "negate",
        _ => "arithmetic",
    }
}

enum Operands {
    Integers(i32, i32),
    Reals(f64, f64),
}

fn numbers(op: Opcode, lhs: &Value, rhs: &Value) -> Result<Operands, RuntimeError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Operands::Integers(*a, *b)),
        _ => {
            let a = lhs
                .as_number()
                .ok_or_else(|| RuntimeError::type_error(op_name(op), "number", lhs))?;
            let b = rhs
                .as_number()
                .ok_or_else(|| RuntimeError::type_error(op_name(op), "number", rhs))?;
            Ok(Operands::Reals(a, b))
        }
    }
}

fn integers(op: Opcode, lhs: &Value, rhs: &Value) -> Result<(i32, i32), RuntimeError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok((*a, *b)),
        (Value::Integer(_), other) | (other, _) => {
            Err(RuntimeError::type_error(op_name(op), "integer", other))
        }
    }
}

fn reals(op: Opcode, lhs: &Value, rhs: &Value) -> Result<(f64, f64), RuntimeError> {
    match (lhs, rhs) {
        (Value::Real(a), Value::Real(b)) => Ok((*a, *b)),
        (Value::Real(_), other) | (other, _) => {
            Err(RuntimeError::type_error(op_name(op), "real", other))
        }
    }
}

/// Evaluate a binary arithmetic or bitwise instruction.
pub(crate) fn binary(op: Opcode, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    use Operands::*;

    let v = match op {
        Opcode::Add => match numbers(op, lhs, rhs)? {
            Integers(a, b) => a
                .checked_add(b)
                .map_or(Value::Real(a as f64 + b as f64), Value::Integer),
            Reals(a, b) => Value::Real(a + b),
        },
        Opcode::Subtract => match numbers(op, lhs, rhs)? {
            Integers(a, b) => a
                .checked_sub(b)
                .map_or(Value::Real(a as f64 - b as f64), Value::Integer),
            Reals(a, b) => Value::Real(a - b),
        },
        Opcode::Multiply => match numbers(op, lhs, rhs)? {
            Integers(a, b) => a
                .checked_mul(b)
                .map_or(Value::Real(a as f64 * b as f64), Value::Integer),
            Reals(a, b) => Value::Real(a * b),
        },
        Opcode::Divide => match numbers(op, lhs, rhs)? {
            Integers(_, 0) => return Err(RuntimeError::DivisionByZero),
            // truncating; i32::MIN / -1 is the only overflow
            Integers(a, b) => a
                .checked_div(b)
                .map_or(Value::Real(a as f64 / b as f64), Value::Integer),
            Reals(a, b) => Value::Real(a / b),
        },
        Opcode::Modulo => match numbers(op, lhs, rhs)? {
            Integers(_, 0) => return Err(RuntimeError::DivisionByZero),
            Integers(a, b) => Value::Integer(a.wrapping_rem(b)),
            Reals(a, b) => Value::Real(a % b),
        },

        Opcode::AddInteger => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a.wrapping_add(b))
        }
        Opcode::SubtractInteger => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a.wrapping_sub(b))
        }
        Opcode::MultiplyInteger => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a.wrapping_mul(b))
        }

        Opcode::AddReal => {
            let (a, b) = reals(op, lhs, rhs)?;
            Value::Real(a + b)
        }
        Opcode::SubtractReal => {
            let (a, b) = reals(op, lhs, rhs)?;
            Value::Real(a - b)
        }
        Opcode::MultiplyReal => {
            let (a, b) = reals(op, lhs, rhs)?;
            Value::Real(a * b)
        }
        Opcode::DivideReal => {
            let (a, b) = reals(op, lhs, rhs)?;
            Value::Real(a / b)
        }

        Opcode::BitAnd => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a & b)
        }
        Opcode::BitOr => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a | b)
        }
        Opcode::BitXor => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a ^ b)
        }
        Opcode::ShiftLeft => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a.wrapping_shl(b as u32))
        }
        Opcode::ShiftRight => {
            let (a, b) = integers(op, lhs, rhs)?;
            Value::Integer(a.wrapping_shr(b as u32))
        }

        _ => unreachable!("{} is not a binary arithmetic instruction", op),
    };
    Ok(v)
}

pub(crate) fn negate(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Integer(i) => Ok(i
            .checked_neg()
            .map_or(Value::Real(-(*i as f64)), Value::Integer)),
        Value::Real(r) => Ok(Value::Real(-r)),
        other => Err(RuntimeError::type_error("negate", "number", other)),
    }
}

/// Order two values for the relational instructions. Numbers compare
/// numerically across integer and real, and NaN is unordered.
fn relate(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(lhs.compare(rhs)),
        },
    }
}

/// Evaluate a comparison instruction.
pub(crate) fn compare(op: Opcode, lhs: &Value, rhs: &Value) -> Value {
    let v = match op {
        Opcode::Equals => lhs == rhs,
        Opcode::NotEquals => lhs != rhs,
        Opcode::LessThan => relate(lhs, rhs) == Some(Ordering::Less),
        Opcode::LessThanEqual => matches!(relate(lhs, rhs), Some(Ordering::Less | Ordering::Equal)),
        Opcode::GreaterThan => relate(lhs, rhs) == Some(Ordering::Greater),
        Opcode::GreaterThanEqual => {
            matches!(relate(lhs, rhs), Some(Ordering::Greater | Ordering::Equal))
        }
        Opcode::Compare => {
            return Value::Integer(match lhs.compare(rhs) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })
        }
        _ => unreachable!("{} is not a comparison", op),
    };
    Value::Boolean(v)
}
