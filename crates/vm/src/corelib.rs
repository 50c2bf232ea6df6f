//! Natives every runtime can opt into with [`Vm::load_corelib`].

use crate::error::RuntimeError;
use crate::value::{unwrap_ast, NativeFn, Value};
use crate::vm::{FiberFlags, Signal, Vm};

fn arity(name: &str, args: &[Value], min: usize, max: Option<usize>) -> Result<(), RuntimeError> {
    let ok = args.len() >= min && max.map_or(true, |max| args.len() <= max);
    if ok {
        Ok(())
    } else {
        Err(RuntimeError::Arity {
            name: name.into(),
            min,
            max,
            got: args.len(),
        })
    }
}

fn core_type(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("type", args, 1, Some(1))?;
    Ok(vm.keyword(args[0].ty().name()))
}

fn core_length(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("length", args, 1, Some(1))?;
    Ok(vm.length(&args[0])?)
}

fn array_push(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("array/push", args, 1, None)?;
    match &args[0] {
        Value::Array(a) => {
            let mut a = a.borrow_mut();
            for v in &args[1..] {
                a.push(v.clone());
            }
        }
        other => return Err(RuntimeError::type_error("array/push", "array", other).into()),
    }
    Ok(args[0].clone())
}

fn array_pop(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("array/pop", args, 1, Some(1))?;
    match &args[0] {
        Value::Array(a) => Ok(a.borrow_mut().pop().unwrap_or_default()),
        other => Err(RuntimeError::type_error("array/pop", "array", other).into()),
    }
}

fn buffer_push(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("buffer/push", args, 1, None)?;
    let buf = match &args[0] {
        Value::Buffer(b) => b,
        other => return Err(RuntimeError::type_error("buffer/push", "buffer", other).into()),
    };
    for v in &args[1..] {
        match v {
            Value::Integer(i) => {
                let byte = u8::try_from(*i)
                    .map_err(|_| RuntimeError::type_error("buffer/push", "byte", v))?;
                buf.borrow_mut().push_byte(byte);
            }
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => {
                buf.borrow_mut().push_bytes(s)
            }
            Value::Buffer(other) => {
                // may be the buffer being pushed to
                let bytes = other.borrow().as_bytes().to_vec();
                buf.borrow_mut().push_bytes(&bytes);
            }
            other => {
                return Err(RuntimeError::type_error("buffer/push", "byte or string", other).into())
            }
        }
    }
    Ok(args[0].clone())
}

fn table_setproto(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("table/setproto", args, 2, Some(2))?;
    let proto = match &args[1] {
        Value::Nil => None,
        Value::Table(p) => Some(p.clone()),
        other => return Err(RuntimeError::type_error("table/setproto", "table or nil", other).into()),
    };
    match &args[0] {
        Value::Table(t) => t.borrow_mut().set_proto(proto),
        other => return Err(RuntimeError::type_error("table/setproto", "table", other).into()),
    }
    Ok(args[0].clone())
}

fn table_getproto(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("table/getproto", args, 1, Some(1))?;
    match &args[0] {
        Value::Table(t) => Ok(t.borrow().proto().cloned().map_or(Value::Nil, Value::Table)),
        other => Err(RuntimeError::type_error("table/getproto", "table", other).into()),
    }
}

fn struct_getproto(_vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("struct/getproto", args, 1, Some(1))?;
    match &args[0] {
        Value::Struct(s) => Ok(s.proto().cloned().map_or(Value::Nil, Value::Struct)),
        other => Err(RuntimeError::type_error("struct/getproto", "struct", other).into()),
    }
}

/// `(fiber/new f &opt flags)`. A flag string or keyword containing `e`
/// catches errors.
fn fiber_new(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("fiber/new", args, 1, Some(2))?;
    let mut flags = FiberFlags::empty();
    if let Some(flag) = args.get(1) {
        match flag {
            Value::String(s) | Value::Keyword(s) => {
                if s.contains(&b'e') {
                    flags |= FiberFlags::CATCH_ERROR;
                }
            }
            other => {
                return Err(RuntimeError::type_error("fiber/new", "keyword or string", other).into())
            }
        }
    }
    let fiber = vm.new_fiber(&args[0], flags)?;
    Ok(Value::Fiber(fiber))
}

fn fiber_status(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("fiber/status", args, 1, Some(1))?;
    match &args[0] {
        Value::Fiber(f) => Ok(vm.keyword(f.status().name())),
        other => Err(RuntimeError::type_error("fiber/status", "fiber", other).into()),
    }
}

fn fiber_cancel(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("fiber/cancel", args, 1, Some(2))?;
    match &args[0] {
        Value::Fiber(f) => {
            let payload = args.get(1).cloned().unwrap_or_else(|| Value::string("cancelled"));
            vm.cancel(f, payload);
            Ok(args[0].clone())
        }
        other => Err(RuntimeError::type_error("fiber/cancel", "fiber", other).into()),
    }
}

/// `(resume fiber &opt value)`. Errors propagate unless the fiber catches
/// them.
fn core_resume(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("resume", args, 1, Some(2))?;
    let fiber = match &args[0] {
        Value::Fiber(f) => f.clone(),
        other => return Err(RuntimeError::type_error("resume", "fiber", other).into()),
    };
    let value = args.get(1).cloned().unwrap_or_default();
    match vm.resume(&fiber, value) {
        (Signal::Error, payload) if !fiber.flags().contains(FiberFlags::CATCH_ERROR) => {
            Err(payload)
        }
        (_, v) => Ok(v),
    }
}

fn ast_unwrap(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("ast/unwrap", args, 1, Some(1))?;
    Ok(unwrap_ast(vm, &args[0])?)
}

fn gc_collect(vm: &mut Vm, args: &[Value]) -> Result<Value, Value> {
    arity("gc/collect", args, 0, Some(0))?;
    let stats = vm.collect();
    Ok(Value::Integer(stats.cleared as i32))
}

const CORELIB: &[(&str, NativeFn)] = &[
    ("type", core_type),
    ("length", core_length),
    ("array/push", array_push),
    ("array/pop", array_pop),
    ("buffer/push", buffer_push),
    ("table/setproto", table_setproto),
    ("table/getproto", table_getproto),
    ("struct/getproto", struct_getproto),
    ("fiber/new", fiber_new),
    ("fiber/status", fiber_status),
    ("fiber/cancel", fiber_cancel),
    ("resume", core_resume),
    ("ast/unwrap", ast_unwrap),
    ("gc/collect", gc_collect),
];

impl Vm {
    /// Bind the core natives in the namespace.
    pub fn load_corelib(&mut self) {
        for (name, func) in CORELIB {
            self.register_native(name, *func);
        }
    }
}
