use std::fmt::Display;

use smol_str::SmolStr;

use crate::value::{Value, ValueType, MAX_NESTING};

/// Faults raised while executing bytecode or a native function.
///
/// These never leave a fiber as they are: at the signal boundary every
/// error becomes the payload value of an ERROR signal, see
/// [`RuntimeError::into_value`].
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// An operand had the wrong type.
    Type {
        op: &'static str,
        expected: &'static str,
        got: ValueType,
    },
    Arity {
        name: SmolStr,
        min: usize,
        max: Option<usize>,
        got: usize,
    },
    DivisionByZero,
    StackOverflow,
    UnknownGlobal(SmolStr),
    BadKey {
        ds: ValueType,
        key: ValueType,
    },
    ImmutablePut(ValueType),
    NotCallable(ValueType),
    NotIndexable(SmolStr),
    /// A value raised by user code.
    Raised(Value),
    FiberMisuse(&'static str),
    UnregisteredAbstract(&'static str),
    /// A tuple or struct would nest deeper than [`MAX_NESTING`].
    NestingTooDeep,
}

impl RuntimeError {
    pub fn type_error(op: &'static str, expected: &'static str, got: &Value) -> RuntimeError {
        RuntimeError::Type {
            op,
            expected,
            got: got.ty(),
        }
    }

    /// The payload of the ERROR signal this fault turns into.
    pub fn into_value(self) -> Value {
        match self {
            RuntimeError::Raised(v) => v,
            other => Value::string(other.to_string()),
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Type { op, expected, got } => {
                write!(f, "bad operand to {}: expected {}, got {}", op, expected, got)
            }
            RuntimeError::Arity {
                name,
                min,
                max,
                got,
            } => {
                let plural = |n: usize| if n == 1 { "argument" } else { "arguments" };
                write!(f, "arity mismatch in {}: expected ", name)?;
                match max {
                    Some(max) if max == min => write!(f, "{} {}", min, plural(*min))?,
                    Some(max) => write!(f, "{} to {} arguments", min, max)?,
                    None => write!(f, "at least {} {}", min, plural(*min))?,
                }
                write!(f, ", got {}", got)
            }
            RuntimeError::DivisionByZero => f.write_str("division by zero"),
            RuntimeError::StackOverflow => f.write_str("stack overflow"),
            RuntimeError::UnknownGlobal(name) => write!(f, "unknown global {}", name),
            RuntimeError::BadKey { ds, key } => write!(f, "cannot index {} with {}", ds, key),
            RuntimeError::ImmutablePut(ty) => write!(f, "cannot put into immutable {}", ty),
            RuntimeError::NotCallable(ty) => write!(f, "{} is not callable", ty),
            RuntimeError::NotIndexable(ty) => write!(f, "{} is not indexable", ty),
            RuntimeError::Raised(v) => write!(f, "{}", v),
            RuntimeError::FiberMisuse(msg) => f.write_str(msg),
            RuntimeError::UnregisteredAbstract(name) => {
                write!(f, "abstract type {} is not registered", name)
            }
            RuntimeError::NestingTooDeep => write!(
                f,
                "tuples and structs cannot nest more than {} levels deep",
                MAX_NESTING
            ),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<RuntimeError> for Value {
    fn from(e: RuntimeError) -> Self {
        e.into_value()
    }
}

/// Why a function definition was rejected by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    UnknownOpcode { at: usize, byte: u8 },
    SlotOutOfRange { at: usize, slot: usize, slot_count: usize },
    ConstOutOfRange { at: usize, idx: usize },
    /// A global name constant that is not a symbol
    BadGlobalName { at: usize, idx: usize },
    DefOutOfRange { at: usize, idx: usize },
    EnvOutOfRange { at: usize, idx: usize },
    LabelOutOfRange { at: usize, target: i64 },
    OddPairCount { at: usize, count: usize },
    SlotsBelowArity { slot_count: usize, needed: usize },
    MissingTerminator,
    BadCapture { idx: usize },
    TopLevelCaptures,
    TooDeep,
    /// An error inside a nested definition.
    Nested { def: usize, error: Box<LoadError> },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::UnknownOpcode { at, byte } => {
                write!(f, "unknown opcode {:#04x} at {}", byte, at)
            }
            LoadError::SlotOutOfRange {
                at,
                slot,
                slot_count,
            } => write!(
                f,
                "slot r{} at {} is out of range for a frame of {} slots",
                slot, at, slot_count
            ),
            LoadError::ConstOutOfRange { at, idx } => {
                write!(f, "constant #{} at {} is out of range", idx, at)
            }
            LoadError::BadGlobalName { at, idx } => {
                write!(f, "global name #{} at {} is not a symbol", idx, at)
            }
            LoadError::DefOutOfRange { at, idx } => {
                write!(f, "definition f{} at {} is out of range", idx, at)
            }
            LoadError::EnvOutOfRange { at, idx } => {
                write!(f, "upvalue u{} at {} is out of range", idx, at)
            }
            LoadError::LabelOutOfRange { at, target } => {
                write!(f, "jump at {} targets {}, outside the code", at, target)
            }
            LoadError::OddPairCount { at, count } => {
                write!(f, "key/value run at {} has odd length {}", at, count)
            }
            LoadError::SlotsBelowArity { slot_count, needed } => write!(
                f,
                "frame of {} slots cannot hold {} parameters",
                slot_count, needed
            ),
            LoadError::MissingTerminator => f.write_str("code does not end with a terminator"),
            LoadError::BadCapture { idx } => write!(f, "capture {} is invalid", idx),
            LoadError::TopLevelCaptures => f.write_str("a top-level function cannot capture"),
            LoadError::TooDeep => f.write_str("definitions are nested too deeply"),
            LoadError::Nested { def, error } => write!(f, "in f{}: {}", def, error),
        }
    }
}

impl std::error::Error for LoadError {}

/// One frame of a stack trace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub function: SmolStr,
    /// Index of the instruction that was executing.
    pub ip: usize,
}

/// An ERROR signal that reached the host.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub payload: Value,
    pub trace: Vec<TraceEntry>,
}

impl Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Value::String(s) => write!(f, "error: {}", String::from_utf8_lossy(s))?,
            other => write!(f, "error: {}", other)?,
        }
        for entry in &self.trace {
            write!(f, "\n  in {} at {}", entry.function, entry.ip)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {}
