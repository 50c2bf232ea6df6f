use fnv::FnvHashMap;
use smol_str::SmolStr;

use crate::gc::Tracer;
use crate::value::Value;

/// The flat name-to-value mapping the runtime resolves globals against.
///
/// The runtime only reads and writes single names; how the namespace is
/// populated and how long it lives is up to its owner.
pub trait Namespace {
    fn get(&self, name: &str) -> Option<Value>;
    fn put(&mut self, name: &str, value: Value);

    /// Report every bound value to the collector.
    fn trace(&self, tracer: &mut dyn Tracer);
}

#[derive(Default)]
pub struct FlatNamespace {
    names: FnvHashMap<SmolStr, Value>,
}

impl FlatNamespace {
    pub fn new() -> FlatNamespace {
        FlatNamespace::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Namespace for FlatNamespace {
    fn get(&self, name: &str) -> Option<Value> {
        self.names.get(name).cloned()
    }

    /// Binding `nil` removes the name.
    fn put(&mut self, name: &str, value: Value) {
        if value.is_nil() {
            self.names.remove(name);
        } else {
            self.names.insert(name.into(), value);
        }
    }

    fn trace(&self, tracer: &mut dyn Tracer) {
        for value in self.names.values() {
            tracer.mark(value);
        }
    }
}
