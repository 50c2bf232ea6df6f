//! Immutable open-addressed maps.
//!
//! Entries are laid out with Robin Hood probing and a total tie-break on the
//! key, so the slot layout only depends on the set of entries and not on the
//! order they were added in. Two equal structs therefore have identical
//! layouts, which makes slot-order iteration and comparison deterministic.

use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::gc::{Trace, Tracer};

use super::{Value, MAX_NESTING};

#[derive(Clone)]
struct Entry {
    key: Value,
    value: Value,
    hash: u32,
}

struct StructData {
    slots: Box<[Option<Entry>]>,
    count: usize,
    hash: Cell<u32>,
    depth: u32,
    proto: Option<Struct>,
}

/// An immutable mapping with an optional prototype.
#[derive(Clone)]
pub struct Struct(Rc<StructData>);

fn capacity_for(count: usize) -> usize {
    (2 * count).max(1).next_power_of_two()
}

/// Distance of `idx` from the home slot of `hash`.
fn probe_distance(hash: u32, idx: usize, mask: usize) -> usize {
    idx.wrapping_sub(hash as usize & mask) & mask
}

/// Insert into a slot array with room to spare. An equal key has its value
/// replaced.
fn insert(slots: &mut [Option<Entry>], mut entry: Entry) {
    let mask = slots.len() - 1;
    let mut idx = entry.hash as usize & mask;
    let mut dist = 0;
    loop {
        let existing = match &mut slots[idx] {
            Some(existing) => existing,
            empty => {
                *empty = Some(entry);
                return;
            }
        };
        if existing.hash == entry.hash && existing.key == entry.key {
            existing.value = entry.value;
            return;
        }
        let existing_dist = probe_distance(existing.hash, idx, mask);
        let displace = existing_dist < dist
            || (existing_dist == dist && entry.key.compare(&existing.key) == Ordering::Less);
        if displace {
            std::mem::swap(existing, &mut entry);
            dist = existing_dist;
        }
        idx = (idx + 1) & mask;
        dist += 1;
    }
}

impl Struct {
    pub fn empty() -> Struct {
        StructBuilder::new(0).freeze(1)
    }

    /// Levels of tuples and structs, counting this one and its prototypes.
    pub fn nesting(&self) -> u32 {
        self.0.depth
    }

    pub fn ptr_eq(&self, other: &Struct) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn len(&self) -> usize {
        self.0.count
    }

    pub fn is_empty(&self) -> bool {
        self.0.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.0.slots.len()
    }

    pub fn proto(&self) -> Option<&Struct> {
        self.0.proto.as_ref()
    }

    fn find(&self, key: &Value) -> Option<usize> {
        if key.is_nil() || key.is_nan() || self.0.count == 0 {
            return None;
        }
        let slots = &self.0.slots;
        let mask = slots.len() - 1;
        let hash = key.hash();
        let mut idx = hash as usize & mask;
        for dist in 0..slots.len() {
            let entry = slots[idx].as_ref()?;
            if entry.hash == hash && &entry.key == key {
                return Some(idx);
            }
            if probe_distance(entry.hash, idx, mask) < dist {
                return None;
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    /// Look up `key` in this struct only.
    pub fn get_local(&self, key: &Value) -> Option<&Value> {
        let idx = self.find(key)?;
        self.0.slots[idx].as_ref().map(|e| &e.value)
    }

    /// Look up `key`, falling back to at most `max_depth` prototypes.
    pub fn get(&self, key: &Value, max_depth: usize) -> Option<Value> {
        let mut current = Some(self);
        let mut depth = 0;
        while let Some(s) = current {
            if let Some(v) = s.get_local(key) {
                return Some(v.clone());
            }
            if depth >= max_depth {
                break;
            }
            depth += 1;
            current = s.proto();
        }
        None
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.0
            .slots
            .iter()
            .flatten()
            .map(|e| (&e.key, &e.value))
    }

    /// The key following `key` in slot order. `nil` starts the iteration;
    /// `None` means there are no more keys or `key` is not present.
    pub fn next_key(&self, key: &Value) -> Option<Value> {
        let start = if key.is_nil() { 0 } else { self.find(key)? + 1 };
        self.0.slots[start.min(self.0.slots.len())..]
            .iter()
            .flatten()
            .next()
            .map(|e| e.key.clone())
    }

    /// Order-independent content hash, cached like a tuple's.
    pub fn hash(&self) -> u32 {
        let cached = self.0.hash.get();
        if cached != 0 {
            return cached;
        }
        let mut h = self.0.count as u32;
        for entry in self.0.slots.iter().flatten() {
            let mixed = entry.hash.rotate_left(11) ^ entry.value.hash();
            h = h.wrapping_add(mixed.wrapping_mul(0x85eb_ca6b));
        }
        self.0.hash.set(h);
        h
    }

    /// Order by entry count, then slot by slot, then by prototype.
    pub fn compare(&self, other: &Struct) -> Ordering {
        if self.ptr_eq(other) {
            return Ordering::Equal;
        }
        match self.len().cmp(&other.len()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let nil = Value::Nil;
        for (a, b) in self.0.slots.iter().zip(other.0.slots.iter()) {
            let (ak, av) = a.as_ref().map_or((&nil, &nil), |e| (&e.key, &e.value));
            let (bk, bv) = b.as_ref().map_or((&nil, &nil), |e| (&e.key, &e.value));
            match ak.compare(bk).then_with(|| av.compare(bv)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        match (self.proto(), other.proto()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.compare(b),
        }
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Struct) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.len() != other.len() || self.hash() != other.hash() {
            return false;
        }
        let entries_eq = self
            .iter()
            .all(|(k, v)| other.get_local(k).map_or(false, |ov| ov == v));
        entries_eq && self.proto() == other.proto()
    }
}

impl Trace for Struct {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for (k, v) in self.iter() {
            tracer.mark(k);
            tracer.mark(v);
        }
        if let Some(proto) = self.proto() {
            tracer.mark(&Value::Struct(proto.clone()));
        }
    }
}

/// Collects the entries of a struct before it is frozen.
///
/// `nil` and NaN keys are skipped, as are `nil` values. When a key is put
/// more than once the last value wins.
pub struct StructBuilder {
    pairs: Vec<(Value, Value)>,
    proto: Option<Struct>,
}

impl StructBuilder {
    pub fn new(count: usize) -> StructBuilder {
        StructBuilder {
            pairs: Vec::with_capacity(count),
            proto: None,
        }
    }

    pub fn put(&mut self, key: Value, value: Value) {
        if key.is_nil() || key.is_nan() || value.is_nil() {
            return;
        }
        self.pairs.push((key, value));
    }

    pub fn with_proto(mut self, proto: Option<Struct>) -> Self {
        self.proto = proto;
        self
    }

    /// Freeze the entries. Fails if the struct would nest deeper than
    /// [`MAX_NESTING`], prototypes included.
    pub fn finish(self) -> Result<Struct, RuntimeError> {
        let deepest = self
            .pairs
            .iter()
            .flat_map(|(k, v)| [k.nesting(), v.nesting()])
            .chain(self.proto.as_ref().map(Struct::nesting))
            .max()
            .unwrap_or(0);
        if deepest >= MAX_NESTING {
            return Err(RuntimeError::NestingTooDeep);
        }
        Ok(self.freeze(deepest + 1))
    }

    fn freeze(self, depth: u32) -> Struct {
        let mut slots = vec![None; capacity_for(self.pairs.len())];
        for (key, value) in self.pairs {
            let hash = key.hash();
            insert(&mut slots, Entry { key, value, hash });
        }
        let mut count = slots.iter().flatten().count();

        // duplicates shrank the struct below what the capacity was sized for
        if capacity_for(count) < slots.len() {
            let mut relaid = vec![None; capacity_for(count)];
            for entry in slots.into_iter().flatten() {
                insert(&mut relaid, entry);
            }
            slots = relaid;
            count = slots.iter().flatten().count();
        }

        Struct(Rc::new(StructData {
            slots: slots.into_boxed_slice(),
            count,
            hash: Cell::new(0),
            depth,
            proto: self.proto,
        }))
    }
}
