pub mod corelib;
pub mod error;
pub mod gc;
pub mod namespace;
pub mod value;
pub mod vm;

pub use error::{ErrorReport, LoadError, RuntimeError, TraceEntry};
pub use gc::alloc::{GcStats, RootHandle};
pub use namespace::{FlatNamespace, Namespace};
pub use value::{Value, ValueType};
pub use vm::{Fiber, FiberFlags, FiberStatus, Signal, Vm, VmConfig};
