//! The runtime instance.

mod arith;
mod dispatch;
mod fiber;
mod frame;
mod index;
mod load;


use std::rc::Rc;

use fnv::FnvHashSet;
use tracing::debug;

use crate::error::{ErrorReport, RuntimeError, TraceEntry};
use crate::gc::alloc::{GcAllocator, GcStats, RootHandle};
use crate::gc::{Marker, Trace, Tracer};
use crate::namespace::{FlatNamespace, Namespace};
use crate::value::{
    AbstractCell, AbstractObject, AbstractRegistry, AbstractTypeKey, Array, AstNode, Closure,
    FuncProto, Native, NativeFn, Table, Value,
};

pub use fiber::{Fiber, FiberFlags, FiberStatus, Signal};
pub use frame::Registers;

use fiber::{Entry, FiberState};

/// Limits and tuning of one runtime.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Tracked allocations between automatic collections. Also the lower
    /// bound of the adaptive threshold.
    pub gc_threshold: usize,
    /// Frames per fiber.
    pub max_call_depth: usize,
    /// Fibers resumed inside each other.
    pub max_fiber_depth: usize,
    /// Prototypes followed by a single lookup.
    pub max_proto_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            gc_threshold: 4096,
            max_call_depth: 1024,
            max_fiber_depth: 64,
            max_proto_depth: 200,
        }
    }
}

/// A running fiber and its execution state.
pub(crate) struct ActiveFiber {
    pub fiber: Rc<Fiber>,
    pub state: FiberState,
}

/// One independent runtime: configuration, globals, heap and fibers.
pub struct Vm {
    config: VmConfig,
    namespace: Box<dyn Namespace>,
    symbols: FnvHashSet<Rc<[u8]>>,
    abstract_types: AbstractRegistry,
    heap: GcAllocator,

    /// Fibers currently executing, innermost last.
    active: Vec<ActiveFiber>,
    /// Natives currently executing. Automatic collection waits until this
    /// is zero.
    native_depth: usize,
    /// Stack trace of the last error, innermost first.
    trace: Vec<TraceEntry>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Vm {
        Vm::with_namespace(config, Box::new(FlatNamespace::new()))
    }

    pub fn with_namespace(config: VmConfig, namespace: Box<dyn Namespace>) -> Vm {
        let mut vm = Vm {
            heap: GcAllocator::new(config.gc_threshold),
            config,
            namespace,
            symbols: FnvHashSet::default(),
            abstract_types: AbstractRegistry::default(),
            active: vec![],
            native_depth: 0,
            trace: vec![],
        };
        vm.register_abstract_type::<AstNode>();
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn namespace(&self) -> &dyn Namespace {
        &*self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut dyn Namespace {
        &mut *self.namespace
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.namespace.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.namespace.put(name, value)
    }

    fn intern_bytes(&mut self, bytes: &[u8]) -> Rc<[u8]> {
        if let Some(s) = self.symbols.get(bytes) {
            return s.clone();
        }
        let s: Rc<[u8]> = Rc::from(bytes);
        self.symbols.insert(s.clone());
        s
    }

    /// The interned symbol `name`.
    pub fn symbol(&mut self, name: &str) -> Value {
        Value::Symbol(self.intern_bytes(name.as_bytes()))
    }

    /// The interned keyword `:name`.
    pub fn keyword(&mut self, name: &str) -> Value {
        Value::Keyword(self.intern_bytes(name.as_bytes()))
    }

    /// Bind a native function in the namespace.
    pub fn register_native(&mut self, name: &str, func: NativeFn) -> Value {
        let native = Value::NativeFunction(Rc::new(Native::new(name, func)));
        self.namespace.put(name, native.clone());
        native
    }

    pub fn register_abstract_type<T: AbstractObject>(&mut self) -> AbstractTypeKey {
        self.abstract_types.register::<T>()
    }

    pub fn abstract_types(&self) -> &AbstractRegistry {
        &self.abstract_types
    }

    /// Wrap a foreign object. Its type must have been registered.
    pub fn new_abstract<T: AbstractObject>(&mut self, obj: T) -> Result<Value, RuntimeError> {
        let ty = self
            .abstract_types
            .lookup::<T>()
            .ok_or_else(|| RuntimeError::UnregisteredAbstract(std::any::type_name::<T>()))?;
        let cell = Rc::new(AbstractCell::new(ty, Box::new(obj)));
        self.heap.track_abstract(&cell);
        Ok(Value::Abstract(cell))
    }

    /// Create an array the collector knows about.
    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        let arr = Rc::new(std::cell::RefCell::new(Array::from(items)));
        self.heap.track_array(&arr);
        Value::Array(arr)
    }

    /// Create a table the collector knows about.
    pub fn new_table(&mut self, table: Table) -> Value {
        let t = Rc::new(std::cell::RefCell::new(table));
        self.heap.track_table(&t);
        Value::Table(t)
    }

    /// Keep `value` alive across collections until it is unrooted.
    pub fn root(&mut self, value: Value) -> RootHandle {
        self.heap.root(value)
    }

    pub fn unroot(&mut self, handle: RootHandle) -> Option<Value> {
        self.heap.unroot(handle)
    }

    pub fn heap(&self) -> &GcAllocator {
        &self.heap
    }

    /// Run a full collection cycle.
    ///
    /// Everything reachable from the namespace, the persistent roots and the
    /// running fibers survives. Values only held by host code must be rooted
    /// first.
    pub fn collect(&mut self) -> GcStats {
        let mut marker = Marker::new();
        self.namespace.trace(&mut marker);
        for v in self.heap.roots.values() {
            marker.mark(v);
        }
        for af in &self.active {
            marker.mark(&Value::Fiber(af.fiber.clone()));
            af.state.trace(&mut marker);
        }
        marker.drain();
        self.heap.sweep(&marker)
    }

    /// Stack trace of the last error, innermost first.
    pub fn last_trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Create a fiber that runs `f` when first resumed.
    ///
    /// The returned fiber is not a root. A host that keeps it suspended
    /// across calls into the runtime must [`root`](Self::root) it, or the
    /// next collection clears it and it reads as dead.
    pub fn new_fiber(&mut self, f: &Value, flags: FiberFlags) -> Result<Rc<Fiber>, RuntimeError> {
        match f {
            Value::Function(closure) => Ok(self.spawn_fiber(closure.clone(), None, flags)),
            other => Err(RuntimeError::type_error("fiber/new", "function", other)),
        }
    }

    fn spawn_fiber(
        &mut self,
        closure: Rc<Closure>,
        args: Option<Vec<Value>>,
        flags: FiberFlags,
    ) -> Rc<Fiber> {
        let regs = Rc::new(Registers::new());
        self.heap.track_registers(&regs);
        let state = FiberState::new(regs, Entry { closure, args });
        let fiber = Rc::new(Fiber::new(flags, state));
        self.heap.track_fiber(&fiber);
        fiber
    }

    /// Request that `fiber` stops. The next resume unwinds it and reports
    /// `(Error, value)`. Returns `false` if the fiber already finished.
    pub fn cancel(&mut self, fiber: &Rc<Fiber>, value: Value) -> bool {
        match fiber.status() {
            FiberStatus::Dead | FiberStatus::Error => false,
            _ => {
                fiber.set_pending_cancel(value);
                true
            }
        }
    }

    /// Run `fiber` until it yields, returns or raises.
    ///
    /// On the first resume `value` becomes the argument of the entry
    /// function if it takes one; afterwards it is the result of the `Yield`
    /// the fiber is suspended in.
    pub fn resume(&mut self, fiber: &Rc<Fiber>, value: Value) -> (Signal, Value) {
        let status = fiber.status();
        let misuse = match status {
            FiberStatus::Alive => Some("cannot resume a running fiber"),
            FiberStatus::Dead => Some("cannot resume a dead fiber"),
            FiberStatus::Error => Some("cannot resume an errored fiber"),
            FiberStatus::New | FiberStatus::Pending => None,
        };
        if let Some(msg) = misuse {
            return (Signal::Error, Value::string(msg));
        }
        if self.active.len() >= self.config.max_fiber_depth {
            return (Signal::Error, Value::string("fibers nested too deeply"));
        }
        if self.active.is_empty() {
            self.trace.clear();
        }

        let mut state = fiber.take_state();
        if let Some(payload) = fiber.take_pending_cancel() {
            while state.pop_frame().is_some() {}
            state.entry = None;
            fiber.put_state(state);
            fiber.set_status(FiberStatus::Error);
            debug!("fiber cancelled");
            return (Signal::Error, payload);
        }

        match status {
            FiberStatus::New => {
                let entry = match state.entry.take() {
                    Some(entry) => entry,
                    None => {
                        fiber.put_state(state);
                        fiber.set_status(FiberStatus::Error);
                        return (Signal::Error, Value::string("fiber has nothing to run"));
                    }
                };
                let takes_value = entry.closure.proto.arity >= 1 || entry.closure.proto.vararg;
                let args = entry
                    .args
                    .unwrap_or_else(|| if takes_value { vec![value] } else { vec![] });
                if let Err(e) =
                    state.push_frame(entry.closure, &args, None, self.config.max_call_depth)
                {
                    fiber.put_state(state);
                    fiber.set_status(FiberStatus::Error);
                    return (Signal::Error, e.into_value());
                }
            }
            _ => {
                if let Some(slot) = state.resume_slot.take() {
                    state.regs.set(slot, value);
                }
            }
        }

        fiber.set_status(FiberStatus::Alive);
        self.active.push(ActiveFiber {
            fiber: fiber.clone(),
            state,
        });
        debug!(depth = self.active.len(), "fiber resumed");

        let result = self.run_active();

        let ActiveFiber { state, .. } = self
            .active
            .pop()
            .expect("active fiber stack is balanced across a resume");
        fiber.put_state(state);

        let (status, signal, value) = match result {
            Ok(dispatch::Exit::Return(v)) => (FiberStatus::Dead, Signal::Ok, v),
            Ok(dispatch::Exit::Yield(v)) => (FiberStatus::Pending, Signal::Yield, v),
            Err(e) => (FiberStatus::Error, Signal::Error, e.into_value()),
        };
        fiber.set_status(status);
        debug!(status = %status, depth = self.active.len(), "fiber suspended");
        (signal, value)
    }

    fn report(&mut self, payload: Value) -> ErrorReport {
        let trace = if self.active.is_empty() {
            std::mem::take(&mut self.trace)
        } else {
            self.trace.clone()
        };
        ErrorReport { payload, trace }
    }

    /// Call a function from host code.
    ///
    /// Closures run in a fresh fiber; a yield that escapes that fiber is an
    /// error since there is no resumer to hand the value to.
    pub fn call(&mut self, f: &Value, args: &[Value]) -> Result<Value, ErrorReport> {
        match f {
            Value::NativeFunction(native) => {
                if self.active.is_empty() {
                    self.trace.clear();
                }
                let native = native.clone();
                self.call_native(&native, args)
                    .map_err(|e| self.report(e.into_value()))
            }
            Value::Function(closure) => {
                let fiber = self.spawn_fiber(closure.clone(), Some(args.to_vec()), FiberFlags::empty());
                match self.resume(&fiber, Value::Nil) {
                    (Signal::Ok, v) => Ok(v),
                    (Signal::Yield, _) => {
                        Err(self.report(Value::string("cannot yield across a host call")))
                    }
                    (Signal::Error, payload) => Err(self.report(payload)),
                }
            }
            other => Err(self.report(RuntimeError::NotCallable(other.ty()).into_value())),
        }
    }

    /// Run a loaded top-level function.
    pub fn run(&mut self, proto: &Rc<FuncProto>) -> Result<Value, ErrorReport> {
        let closure = Rc::new(Closure::new(proto.clone(), Box::new([])));
        self.call(&Value::Function(closure), &[])
    }

    pub(crate) fn call_native(&mut self, native: &Native, args: &[Value]) -> Result<Value, RuntimeError> {
        self.native_depth += 1;
        let result = (native.func)(self, args);
        self.native_depth -= 1;
        result.map_err(RuntimeError::Raised)
    }
}
