use crate::gc::{Trace, Tracer};

use super::{TableRef, Value};

#[derive(Clone)]
enum Slot {
    Empty,
    /// A removed entry. Probing continues past it.
    Tombstone,
    Occupied { key: Value, value: Value, hash: u32 },
}

/// A mutable open-addressed mapping with an optional prototype.
///
/// The table is rehashed once live entries plus tombstones reach half the
/// capacity. Rehashing drops tombstones and keeps the prototype.
#[derive(Clone, Default)]
pub struct Table {
    slots: Vec<Slot>,
    count: usize,
    deleted: usize,
    proto: Option<TableRef>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn with_capacity(n: usize) -> Table {
        let mut t = Table::new();
        if n > 0 {
            t.rehash((2 * n).next_power_of_two().max(4));
        }
        t
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn proto(&self) -> Option<&TableRef> {
        self.proto.as_ref()
    }

    pub fn set_proto(&mut self, proto: Option<TableRef>) {
        self.proto = proto;
    }

    /// Find the slot holding `key`, or `Err` with the slot an insertion of
    /// `key` should use.
    fn find(&self, key: &Value, hash: u32) -> Result<usize, Option<usize>> {
        if self.slots.is_empty() {
            return Err(None);
        }
        let mask = self.slots.len() - 1;
        let mut idx = hash as usize & mask;
        let mut first_tombstone = None;
        for _ in 0..self.slots.len() {
            match &self.slots[idx] {
                Slot::Empty => return Err(first_tombstone.or(Some(idx))),
                Slot::Tombstone => {
                    first_tombstone.get_or_insert(idx);
                }
                Slot::Occupied { key: k, hash: h, .. } => {
                    if *h == hash && k == key {
                        return Ok(idx);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
        Err(first_tombstone)
    }

    fn rehash(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; capacity]);
        self.deleted = 0;
        let mask = capacity - 1;
        for slot in old {
            if let Slot::Occupied { hash, .. } = &slot {
                let mut idx = *hash as usize & mask;
                while !matches!(self.slots[idx], Slot::Empty) {
                    idx = (idx + 1) & mask;
                }
                self.slots[idx] = slot;
            }
        }
    }

    /// Insert or replace an entry. A `nil` value removes the key; `nil` and
    /// NaN keys are ignored.
    pub fn put(&mut self, key: Value, value: Value) {
        if key.is_nil() || key.is_nan() {
            return;
        }
        if value.is_nil() {
            self.remove(&key);
            return;
        }
        let hash = key.hash();
        if let Ok(idx) = self.find(&key, hash) {
            if let Slot::Occupied { value: v, .. } = &mut self.slots[idx] {
                *v = value;
            }
            return;
        }

        if 2 * (self.count + self.deleted + 1) > self.slots.len() {
            self.rehash((2 * self.count + 2).next_power_of_two().max(4));
        }
        let idx = match self.find(&key, hash) {
            Err(Some(idx)) => idx,
            _ => unreachable!("a rehashed table always has a free slot"),
        };
        if matches!(self.slots[idx], Slot::Tombstone) {
            self.deleted -= 1;
        }
        self.slots[idx] = Slot::Occupied { key, value, hash };
        self.count += 1;
    }

    /// Look up `key` in this table only.
    pub fn get_local(&self, key: &Value) -> Option<&Value> {
        if key.is_nil() || key.is_nan() {
            return None;
        }
        match self.find(key, key.hash()) {
            Ok(idx) => match &self.slots[idx] {
                Slot::Occupied { value, .. } => Some(value),
                _ => None,
            },
            Err(_) => None,
        }
    }

    /// Look up `key`, falling back to at most `max_depth` prototypes.
    pub fn get(&self, key: &Value, max_depth: usize) -> Option<Value> {
        if let Some(v) = self.get_local(key) {
            return Some(v.clone());
        }
        let mut current = self.proto.clone();
        let mut depth = 0;
        while let Some(t) = current {
            if depth >= max_depth {
                break;
            }
            depth += 1;
            let t = t.borrow();
            if let Some(v) = t.get_local(key) {
                return Some(v.clone());
            }
            current = t.proto.clone();
        }
        None
    }

    /// Remove `key` from this table, returning its value. Prototypes are
    /// never touched.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        if key.is_nil() || key.is_nan() {
            return None;
        }
        let idx = self.find(key, key.hash()).ok()?;
        match std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            Slot::Occupied { value, .. } => {
                self.count -= 1;
                self.deleted += 1;
                Some(value)
            }
            other => {
                self.slots[idx] = other;
                None
            }
        }
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    /// The key following `key` in slot order. `nil` starts the iteration.
    pub fn next_key(&self, key: &Value) -> Option<Value> {
        let start = if key.is_nil() {
            0
        } else {
            self.find(key, key.hash()).ok()? + 1
        };
        self.slots[start.min(self.slots.len())..]
            .iter()
            .find_map(|s| match s {
                Slot::Occupied { key, .. } => Some(key.clone()),
                _ => None,
            })
    }

    /// Drop every entry and the prototype, returning what was held so the
    /// caller decides when it is released.
    pub(crate) fn take_contents(&mut self) -> (Vec<Value>, Option<TableRef>) {
        let mut out = Vec::with_capacity(self.count * 2);
        for slot in std::mem::take(&mut self.slots) {
            if let Slot::Occupied { key, value, .. } = slot {
                out.push(key);
                out.push(value);
            }
        }
        self.count = 0;
        self.deleted = 0;
        (out, self.proto.take())
    }
}

impl Trace for Table {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for (k, v) in self.iter() {
            tracer.mark(k);
            tracer.mark(v);
        }
        if let Some(proto) = &self.proto {
            tracer.mark(&Value::Table(proto.clone()));
        }
    }
}
