use std::cell::Cell;
use std::cmp::Ordering;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::{Trace, Tracer};

use super::{Value, MAX_NESTING};

pub(super) const HASH_SEED: u32 = 0x9e37_79b9;
pub(super) const HASH_MUL: u32 = 0x0100_0193;

struct TupleData {
    /// Cached hash. `0` means not yet computed, so a tuple whose hash really
    /// is `0` recomputes it every time.
    hash: Cell<u32>,
    depth: u32,
    items: Box<[Value]>,
}

/// An immutable, fixed-length sequence of values.
#[derive(Clone)]
pub struct Tuple(Rc<TupleData>);

impl Tuple {
    /// Freeze `items` into a tuple. Fails if the result would nest deeper
    /// than [`MAX_NESTING`].
    pub fn new(items: Vec<Value>) -> Result<Tuple, RuntimeError> {
        let depth = 1 + items.iter().map(Value::nesting).max().unwrap_or(0);
        if depth > MAX_NESTING {
            return Err(RuntimeError::NestingTooDeep);
        }
        Ok(Tuple(Rc::new(TupleData {
            hash: Cell::new(0),
            depth,
            items: items.into_boxed_slice(),
        })))
    }

    /// Levels of tuples and structs, counting this one.
    pub fn nesting(&self) -> u32 {
        self.0.depth
    }

    pub fn ptr_eq(&self, other: &Tuple) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Content hash, computed on first use and cached.
    pub fn hash(&self) -> u32 {
        let cached = self.0.hash.get();
        if cached != 0 {
            return cached;
        }
        let mut h = HASH_SEED;
        for item in self.0.items.iter() {
            h = h.rotate_left(5) ^ item.hash();
            h = h.wrapping_mul(HASH_MUL);
        }
        h ^= self.0.items.len() as u32;
        self.0.hash.set(h);
        h
    }

    /// Lexicographic order by element, ties broken by length.
    pub fn compare(&self, other: &Tuple) -> Ordering {
        if self.ptr_eq(other) {
            return Ordering::Equal;
        }
        for (a, b) in self.iter().zip(other.iter()) {
            match a.compare(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.len().cmp(&other.len())
    }
}

impl Deref for Tuple {
    type Target = [Value];

    fn deref(&self) -> &Self::Target {
        &self.0.items
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Tuple) -> bool {
        if self.len() != other.len() {
            return false;
        }
        if self.ptr_eq(other) {
            return true;
        }
        if self.hash() != other.hash() {
            return false;
        }
        self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl Trace for Tuple {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for item in self.iter() {
            tracer.mark(item);
        }
    }
}

/// Fills the slots of a tuple before it is frozen.
///
/// Every slot starts out `nil`; slots that are never set stay `nil`.
pub struct TupleBuilder {
    items: Vec<Value>,
}

impl TupleBuilder {
    pub fn new(len: usize) -> TupleBuilder {
        TupleBuilder {
            items: vec![Value::Nil; len],
        }
    }

    /// Set the value of slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    pub fn set(&mut self, idx: usize, value: Value) {
        self.items[idx] = value;
    }

    /// Append one more slot.
    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn finish(self) -> Result<Tuple, RuntimeError> {
        Tuple::new(self.items)
    }
}
