use std::ops::Deref;

use crate::gc::{Trace, Tracer};

use super::Value;

/// A mutable, growable sequence of values.
#[derive(Clone, Default)]
pub struct Array {
    items: Vec<Value>,
}

impl Array {
    pub fn new() -> Array {
        Array::default()
    }

    pub fn with_capacity(n: usize) -> Array {
        Array {
            items: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, value: Value) {
        if self.items.len() == self.items.capacity() {
            let grow = self.items.capacity().max(4);
            self.items.reserve_exact(grow);
        }
        self.items.push(value);
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Remove the last element. An empty array yields `None`.
    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.items.get(idx)
    }

    /// Store `value` at `idx`, padding with `nil` if the array is too short.
    pub fn set(&mut self, idx: usize, value: Value) {
        if idx >= self.items.len() {
            self.items.resize(idx + 1, Value::Nil);
        }
        self.items[idx] = value;
    }

    pub(crate) fn take_items(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.items)
    }
}

impl Deref for Array {
    type Target = [Value];

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Array { items }
    }
}

impl Trace for Array {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for item in &self.items {
            tracer.mark(item);
        }
    }
}
