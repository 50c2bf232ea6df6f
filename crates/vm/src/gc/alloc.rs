use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::HopSlotMap;
use tracing::debug;

use crate::value::{AbstractCell, Array, Table, Upvalue, Value};
use crate::vm::{Fiber, Registers};

use super::Marker;

slotmap::new_key_type! {pub struct RootHandle;}

/// A weak handle to an object that can take part in a reference cycle.
pub enum Tracked {
    Array(Weak<RefCell<Array>>),
    Table(Weak<RefCell<Table>>),
    Upvalue(Weak<RefCell<Upvalue>>),
    Registers(Weak<Registers>),
    Fiber(Weak<Fiber>),
    Abstract(Weak<AbstractCell>),
}

impl Tracked {
    fn is_alive(&self) -> bool {
        match self {
            Tracked::Array(w) => w.strong_count() > 0,
            Tracked::Table(w) => w.strong_count() > 0,
            Tracked::Upvalue(w) => w.strong_count() > 0,
            Tracked::Registers(w) => w.strong_count() > 0,
            Tracked::Fiber(w) => w.strong_count() > 0,
            Tracked::Abstract(w) => w.strong_count() > 0,
        }
    }

    fn addr(&self) -> usize {
        match self {
            Tracked::Array(w) => w.as_ptr() as *const () as usize,
            Tracked::Table(w) => w.as_ptr() as *const () as usize,
            Tracked::Upvalue(w) => w.as_ptr() as *const () as usize,
            Tracked::Registers(w) => w.as_ptr() as *const () as usize,
            Tracked::Fiber(w) => w.as_ptr() as *const () as usize,
            Tracked::Abstract(w) => w.as_ptr() as *const () as usize,
        }
    }

    /// Empty the object, moving what it held into `garbage`. Abstract
    /// objects are finalized instead, once.
    fn clear(&self, garbage: &mut Vec<Box<dyn Any>>) -> bool {
        match self {
            Tracked::Array(w) => w.upgrade().map(|a| {
                garbage.push(Box::new(a.borrow_mut().take_items()));
            }),
            Tracked::Table(w) => w.upgrade().map(|t| {
                garbage.push(Box::new(t.borrow_mut().take_contents()));
            }),
            Tracked::Upvalue(w) => w.upgrade().map(|uv| {
                let old = std::mem::replace(&mut *uv.borrow_mut(), Upvalue::Closed(Value::Nil));
                garbage.push(Box::new(old));
            }),
            Tracked::Registers(w) => w.upgrade().map(|regs| {
                garbage.push(Box::new(regs.take_all()));
            }),
            Tracked::Fiber(w) => w.upgrade().map(|fiber| {
                garbage.push(Box::new(fiber.clear()));
            }),
            Tracked::Abstract(w) => {
                return w.upgrade().map_or(false, |cell| {
                    let fresh = !cell.is_finalized();
                    cell.finalize();
                    fresh
                })
            }
        }
        .is_some()
    }
}

/// Counters of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Tracked objects before the cycle
    pub tracked: usize,
    /// Tracked objects that survived
    pub live: usize,
    /// Unreachable objects that were cleared
    pub cleared: usize,
}

/// The heap tracker of one runtime.
pub struct GcAllocator {
    tracked: Vec<Tracked>,

    /// Tracked allocations since the last collection.
    since_last: usize,

    /// The number of allocations that triggers a collection. Recalculated as
    /// `1.5 * live` after each collection, but never below the configured
    /// minimum.
    threshold: usize,
    min_threshold: usize,

    /// Values the host holds outside of the runtime, considered part of the
    /// root set.
    pub(crate) roots: HopSlotMap<RootHandle, Value>,

    last: GcStats,
}

impl GcAllocator {
    pub fn new(threshold: usize) -> GcAllocator {
        GcAllocator {
            tracked: vec![],
            since_last: 0,
            threshold,
            min_threshold: threshold,
            roots: HopSlotMap::with_key(),
            last: GcStats::default(),
        }
    }

    pub fn track(&mut self, obj: Tracked) {
        self.tracked.push(obj);
        self.since_last += 1;
    }

    pub fn track_array(&mut self, a: &Rc<RefCell<Array>>) {
        self.track(Tracked::Array(Rc::downgrade(a)));
    }

    pub fn track_table(&mut self, t: &Rc<RefCell<Table>>) {
        self.track(Tracked::Table(Rc::downgrade(t)));
    }

    pub fn track_upvalue(&mut self, uv: &Rc<RefCell<Upvalue>>) {
        self.track(Tracked::Upvalue(Rc::downgrade(uv)));
    }

    pub fn track_registers(&mut self, regs: &Rc<Registers>) {
        self.track(Tracked::Registers(Rc::downgrade(regs)));
    }

    pub fn track_fiber(&mut self, fiber: &Rc<Fiber>) {
        self.track(Tracked::Fiber(Rc::downgrade(fiber)));
    }

    pub fn track_abstract(&mut self, cell: &Rc<AbstractCell>) {
        self.track(Tracked::Abstract(Rc::downgrade(cell)));
    }

    pub fn should_collect(&self) -> bool {
        self.since_last >= self.threshold
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of tracked objects, including ones that already died and have
    /// not been pruned yet.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn last_stats(&self) -> GcStats {
        self.last
    }

    pub fn root(&mut self, value: Value) -> RootHandle {
        self.roots.insert(value)
    }

    pub fn unroot(&mut self, handle: RootHandle) -> Option<Value> {
        self.roots.remove(handle)
    }

    pub fn rooted(&self, handle: RootHandle) -> Option<&Value> {
        self.roots.get(handle)
    }

    /// Clear every tracked object `marker` did not reach.
    ///
    /// The contents of cleared objects are released only after all of them
    /// have been emptied, so finalizers and drops never observe a half-swept
    /// heap.
    pub fn sweep(&mut self, marker: &Marker) -> GcStats {
        let tracked = self.tracked.len();
        let mut garbage: Vec<Box<dyn Any>> = vec![];
        let mut cleared = 0;
        for obj in &self.tracked {
            if obj.is_alive() && !marker.is_marked(obj.addr()) && obj.clear(&mut garbage) {
                cleared += 1;
            }
        }
        drop(garbage);

        self.tracked.retain(|obj| obj.is_alive());
        let live = self.tracked.len();
        self.since_last = 0;
        self.threshold = self.min_threshold.max(live * 3 / 2);

        let stats = GcStats {
            tracked,
            live,
            cleared,
        };
        debug!(
            tracked = stats.tracked,
            live = stats.live,
            cleared = stats.cleared,
            threshold = self.threshold,
            "collection finished"
        );
        self.last = stats;
        stats
    }
}
