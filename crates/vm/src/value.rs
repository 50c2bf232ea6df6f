mod abstract_obj;
mod array;
mod ast;
mod buffer;
mod function;
mod structs;
mod table;
mod tuple;

#[cfg(test)]
mod test;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{Display, Write as _};
use std::hash::Hasher;
use std::rc::Rc;

use enum_ordinalize::Ordinalize;
use fnv::FnvHasher;

use crate::error::RuntimeError;
use crate::gc::{Trace, Tracer};
use crate::vm::Fiber;

pub use abstract_obj::{AbstractCell, AbstractObject, AbstractRegistry, AbstractTypeKey, AsAny};
pub use array::Array;
pub use ast::{unwrap_ast, AstNode, Span};
pub use buffer::Buffer;
pub use function::{Closure, FuncProto, Native, NativeFn, Upvalue, UpvalueRef};
pub use structs::{Struct, StructBuilder};
pub use table::Table;
pub use tuple::{Tuple, TupleBuilder};

/// How many levels deep tuples and structs may nest inside each other.
///
/// Equality, ordering and hashing of these values recurse once per level, so
/// construction past this depth fails instead.
pub const MAX_NESTING: u32 = 256;

pub type ArrayRef = Rc<RefCell<Array>>;
pub type TableRef = Rc<RefCell<Table>>;
pub type BufferRef = Rc<RefCell<Buffer>>;

/// A runtime value.
///
/// Scalars and strings are stored inline. Every other variant is a counted
/// handle: tuples and structs are immutable and compared by content, the
/// remaining reference types are compared by identity.
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i32),
    Real(f64),
    String(Rc<[u8]>),
    /// An interned name
    Symbol(Rc<[u8]>),
    Keyword(Rc<[u8]>),
    Array(ArrayRef),
    Tuple(Tuple),
    Table(TableRef),
    Struct(Struct),
    Buffer(BufferRef),
    Function(Rc<Closure>),
    NativeFunction(Rc<Native>),
    Fiber(Rc<Fiber>),
    Abstract(Rc<AbstractCell>),
}

static_assertions::const_assert!(std::mem::size_of::<Value>() <= 24);

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

/// The type tag of a [`Value`]. Values of different types are ordered by
/// their tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Ordinalize)]
pub enum ValueType {
    Nil,
    Boolean,
    Integer,
    Real,
    String,
    Symbol,
    Keyword,
    Array,
    Tuple,
    Table,
    Struct,
    Buffer,
    Function,
    NativeFunction,
    Fiber,
    Abstract,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Real => "real",
            ValueType::String => "string",
            ValueType::Symbol => "symbol",
            ValueType::Keyword => "keyword",
            ValueType::Array => "array",
            ValueType::Tuple => "tuple",
            ValueType::Table => "table",
            ValueType::Struct => "struct",
            ValueType::Buffer => "buffer",
            ValueType::Function => "function",
            ValueType::NativeFunction => "native",
            ValueType::Fiber => "fiber",
            ValueType::Abstract => "abstract",
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fold a 64-bit hash into the 32 bits stored in aggregate headers.
pub(crate) fn fold_hash(h: u64) -> u32 {
    (h ^ (h >> 32)) as u32
}

impl Value {
    pub fn string(s: impl AsRef<[u8]>) -> Value {
        Value::String(Rc::from(s.as_ref()))
    }

    /// Create an array that is not registered with any collector.
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(Array::from(items))))
    }

    pub fn tuple(items: Vec<Value>) -> Result<Value, RuntimeError> {
        Tuple::new(items).map(Value::Tuple)
    }

    /// Create a table that is not registered with any collector.
    pub fn table(table: Table) -> Value {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn buffer(buffer: Buffer) -> Value {
        Value::Buffer(Rc::new(RefCell::new(buffer)))
    }

    pub fn ty(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::String(_) => ValueType::String,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Keyword(_) => ValueType::Keyword,
            Value::Array(_) => ValueType::Array,
            Value::Tuple(_) => ValueType::Tuple,
            Value::Table(_) => ValueType::Table,
            Value::Struct(_) => ValueType::Struct,
            Value::Buffer(_) => ValueType::Buffer,
            Value::Function(_) => ValueType::Function,
            Value::NativeFunction(_) => ValueType::NativeFunction,
            Value::Fiber(_) => ValueType::Fiber,
            Value::Abstract(_) => ValueType::Abstract,
        }
    }

    /// Levels of tuples and structs in this value. Everything else is `0`.
    pub fn nesting(&self) -> u32 {
        match self {
            Value::Tuple(t) => t.nesting(),
            Value::Struct(s) => s.nesting(),
            _ => 0,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Real(r) if r.is_nan())
    }

    pub fn as_integer(&self) -> Option<i32> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Either kind of number, as a real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// The bytes of a string, symbol or keyword.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_keyword(&self, name: &str) -> bool {
        matches!(self, Value::Keyword(k) if &k[..] == name.as_bytes())
    }

    /// Address of the heap object behind this value, if it has one.
    pub fn heap_addr(&self) -> Option<usize> {
        let addr = match self {
            Value::Nil | Value::Boolean(_) | Value::Integer(_) | Value::Real(_) => return None,
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => s.as_ptr() as usize,
            Value::Array(a) => Rc::as_ptr(a) as *const () as usize,
            Value::Tuple(t) => t.addr(),
            Value::Table(t) => Rc::as_ptr(t) as *const () as usize,
            Value::Struct(s) => s.addr(),
            Value::Buffer(b) => Rc::as_ptr(b) as *const () as usize,
            Value::Function(c) => Rc::as_ptr(c) as *const () as usize,
            Value::NativeFunction(n) => Rc::as_ptr(n) as *const () as usize,
            Value::Fiber(f) => Rc::as_ptr(f) as *const () as usize,
            Value::Abstract(a) => Rc::as_ptr(a) as *const () as usize,
        };
        Some(addr)
    }

    /// Whether both values are the very same scalar or the very same object.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self.heap_addr(), other.heap_addr()) {
            (Some(a), Some(b)) => a == b && self.ty() == other.ty(),
            (None, None) => match (self, other) {
                (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
                _ => self == other,
            },
            _ => false,
        }
    }

    fn hash_into(&self, h: &mut FnvHasher) {
        h.write_u8(self.ty().ordinal() as u8);
        match self {
            Value::Nil => {}
            Value::Boolean(b) => h.write_u8(*b as u8),
            Value::Integer(i) => h.write_i32(*i),
            Value::Real(r) => {
                // 0.0 and -0.0 are equal, so they must hash alike
                let r = if *r == 0.0 { 0.0f64 } else { *r };
                h.write_u64(r.to_bits())
            }
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => h.write(s),
            other => h.write_usize(other.heap_addr().unwrap_or(0)),
        }
    }

    /// Hash of this value, consistent with `==`.
    pub fn hash(&self) -> u32 {
        match self {
            Value::Tuple(t) => t.hash(),
            Value::Struct(s) => s.hash(),
            Value::Abstract(a) => a.hash(),
            _ => {
                let mut h = FnvHasher::default();
                self.hash_into(&mut h);
                fold_hash(h.finish())
            }
        }
    }

    /// Total order over all values: by type tag first, then by a per-type
    /// rule.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (ta, tb) = (self.ty(), other.ty());
        if ta != tb {
            return ta.cmp(&tb);
        }
        match (self, other) {
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => {
                if a == b {
                    Ordering::Equal
                } else {
                    a.total_cmp(b)
                }
            }
            (Value::String(a), Value::String(b))
            | (Value::Symbol(a), Value::Symbol(b))
            | (Value::Keyword(a), Value::Keyword(b)) => a[..].cmp(&b[..]),
            (Value::Buffer(a), Value::Buffer(b)) => {
                if Rc::ptr_eq(a, b) {
                    Ordering::Equal
                } else {
                    a.borrow().as_bytes().cmp(b.borrow().as_bytes())
                }
            }
            (Value::Tuple(a), Value::Tuple(b)) => a.compare(b),
            (Value::Struct(a), Value::Struct(b)) => a.compare(b),
            (Value::Abstract(a), Value::Abstract(b)) => a
                .compare(b)
                .unwrap_or_else(|| self.heap_addr().cmp(&other.heap_addr())),
            _ => self.heap_addr().cmp(&other.heap_addr()),
        }
    }

    fn fmt_depth(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:?}", r),
            Value::String(s) => write!(f, "\"{}\"", s.escape_ascii()),
            Value::Symbol(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            Value::Keyword(s) => write!(f, ":{}", String::from_utf8_lossy(s)),
            Value::Array(a) => {
                f.write_str("@[")?;
                fmt_items(f, &mut a.borrow().iter(), depth + 1)?;
                f.write_char(']')
            }
            Value::Tuple(t) => {
                f.write_char('(')?;
                fmt_items(f, &mut t.iter(), depth + 1)?;
                f.write_char(')')
            }
            Value::Table(t) => {
                f.write_str("@{")?;
                let t = t.borrow();
                fmt_items(f, &mut t.iter().flat_map(|(k, v)| [k, v]), depth + 1)?;
                f.write_char('}')
            }
            Value::Struct(s) => {
                f.write_char('{')?;
                fmt_items(f, &mut s.iter().flat_map(|(k, v)| [k, v]), depth + 1)?;
                f.write_char('}')
            }
            Value::Buffer(b) => write!(f, "@\"{}\"", b.borrow().as_bytes().escape_ascii()),
            Value::Function(c) => match &c.proto.name {
                Some(name) => write!(f, "<function {}>", name),
                None => f.write_str("<function>"),
            },
            Value::NativeFunction(n) => write!(f, "<native {}>", n.name),
            Value::Fiber(fib) => write!(f, "<fiber {}>", fib.status()),
            Value::Abstract(a) => write!(f, "<{} {:#x}>", a.type_name(), Rc::as_ptr(a) as *const () as usize),
        }
    }
}

const MAX_DISPLAY_DEPTH: usize = 8;

fn fmt_items<'a>(
    f: &mut std::fmt::Formatter<'_>,
    items: &mut dyn Iterator<Item = &'a Value>,
    depth: usize,
) -> std::fmt::Result {
    if depth > MAX_DISPLAY_DEPTH {
        return f.write_str("...");
    }
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        item.fmt_depth(f, depth)?;
    }
    Ok(())
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::String(a), Value::String(b))
            | (Value::Symbol(a), Value::Symbol(b))
            | (Value::Keyword(a), Value::Keyword(b)) => Rc::ptr_eq(a, b) || a[..] == b[..],
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Buffer(a), Value::Buffer(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Fiber(a), Value::Fiber(b)) => Rc::ptr_eq(a, b),
            (Value::Abstract(a), Value::Abstract(b)) => {
                Rc::ptr_eq(a, b) || a.compare(b) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_depth(f, 0)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_depth(f, 0)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self {
            // these variants don't hold anything that could point back
            Value::Nil
            | Value::Boolean(_)
            | Value::Integer(_)
            | Value::Real(_)
            | Value::String(_)
            | Value::Symbol(_)
            | Value::Keyword(_)
            | Value::Buffer(_)
            | Value::NativeFunction(_) => {}

            Value::Array(a) => a.borrow().trace(tracer),
            Value::Tuple(t) => t.trace(tracer),
            Value::Table(t) => t.borrow().trace(tracer),
            Value::Struct(s) => s.trace(tracer),
            Value::Function(c) => c.trace(tracer),
            Value::Fiber(f) => f.trace(tracer),
            Value::Abstract(a) => a.trace(tracer),
        }
    }
}
