//! Foreign objects the runtime only sees through a capability trait.

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::cmp::Ordering;

use fnv::FnvHashMap;
use slotmap::{Key, SlotMap};

use crate::error::RuntimeError;
use crate::gc::{Trace, Tracer};

use super::Value;

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The capabilities of a foreign type.
///
/// Every hook except [`type_name`](Self::type_name) has a default. A type
/// that holds values **must** report them in [`mark`](Self::mark), or the
/// collector may clear them while they are still in use.
pub trait AbstractObject: AsAny {
    fn type_name(&self) -> &'static str;

    /// Report every value this object holds.
    fn mark(&self, _tracer: &mut dyn Tracer) {}

    fn get(&self, key: &Value) -> Result<Value, RuntimeError> {
        let _ = key;
        Err(RuntimeError::NotIndexable(self.type_name().into()))
    }

    fn put(&self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        let _ = (key, value);
        Err(RuntimeError::NotIndexable(self.type_name().into()))
    }

    /// Order against another abstract object. `None` falls back to identity.
    ///
    /// A type that orders by content should also override
    /// [`hash`](Self::hash). Without it every object of the type hashes
    /// alike, which keeps hashing consistent with equality but makes them
    /// poor table keys.
    fn compare(&self, _other: &dyn AbstractObject) -> Option<Ordering> {
        None
    }

    /// Content hash. `None` falls back to identity.
    fn hash(&self) -> Option<u32> {
        None
    }

    /// Release foreign resources. Runs at most once, before the object is
    /// dropped or when the collector clears it.
    fn finalize(&self) {}
}

slotmap::new_key_type! {
    /// Identifies a registered abstract type within one runtime.
    pub struct AbstractTypeKey;
}

pub struct AbstractTypeInfo {
    pub name: &'static str,
}

/// The abstract types registered with one runtime.
#[derive(Default)]
pub struct AbstractRegistry {
    types: SlotMap<AbstractTypeKey, AbstractTypeInfo>,
    by_type: FnvHashMap<TypeId, AbstractTypeKey>,
}

impl AbstractRegistry {
    pub fn register<T: AbstractObject>(&mut self) -> AbstractTypeKey {
        let id = TypeId::of::<T>();
        if let Some(key) = self.by_type.get(&id) {
            return *key;
        }
        let key = self.types.insert(AbstractTypeInfo {
            name: std::any::type_name::<T>(),
        });
        self.by_type.insert(id, key);
        key
    }

    pub fn lookup<T: AbstractObject>(&self) -> Option<AbstractTypeKey> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn info(&self, key: AbstractTypeKey) -> Option<&AbstractTypeInfo> {
        self.types.get(key)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// The heap cell of an abstract value.
pub struct AbstractCell {
    ty: AbstractTypeKey,
    obj: Box<dyn AbstractObject>,
    finalized: Cell<bool>,
}

impl AbstractCell {
    pub(crate) fn new(ty: AbstractTypeKey, obj: Box<dyn AbstractObject>) -> AbstractCell {
        AbstractCell {
            ty,
            obj,
            finalized: Cell::new(false),
        }
    }

    pub fn type_key(&self) -> AbstractTypeKey {
        self.ty
    }

    pub fn type_name(&self) -> &'static str {
        self.obj.type_name()
    }

    pub fn object(&self) -> &dyn AbstractObject {
        &*self.obj
    }

    pub fn downcast<T: AbstractObject>(&self) -> Option<&T> {
        <dyn AbstractObject as AsAny>::as_any(&*self.obj).downcast_ref::<T>()
    }

    pub fn get(&self, key: &Value) -> Result<Value, RuntimeError> {
        self.obj.get(key)
    }

    pub fn put(&self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        self.obj.put(key, value)
    }

    pub fn compare(&self, other: &AbstractCell) -> Option<Ordering> {
        if self.ty != other.ty {
            return None;
        }
        self.obj.compare(other.object())
    }

    pub fn hash(&self) -> u32 {
        if let Some(h) = self.obj.hash() {
            return h;
        }
        // equal by content must mean equal hashes, so only identity may
        // hash by address
        if self.obj.compare(self.object()).is_some() {
            super::fold_hash(self.ty.data().as_ffi())
        } else {
            super::fold_hash(self as *const AbstractCell as usize as u64)
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Run the finalizer unless it already ran.
    pub fn finalize(&self) {
        if !self.finalized.replace(true) {
            self.obj.finalize();
        }
    }
}

impl Trace for AbstractCell {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if !self.is_finalized() {
            self.obj.mark(tracer);
        }
    }
}

impl Drop for AbstractCell {
    fn drop(&mut self) {
        self.finalize();
    }
}
