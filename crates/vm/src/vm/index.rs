use crate::error::RuntimeError;
use crate::value::Value;

use super::Vm;

fn bytes_index(bytes: &[u8], key: &Value, ds: &Value) -> Result<Value, RuntimeError> {
    match key {
        Value::Integer(i) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| bytes.get(i))
            .map_or(Value::Nil, |b| Value::Integer(*b as i32))),
        other => Err(bad_key(ds, other)),
    }
}

fn seq_index(items: &[Value], key: &Value, ds: &Value) -> Result<Value, RuntimeError> {
    match key {
        Value::Integer(i) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_default()),
        other => Err(bad_key(ds, other)),
    }
}

fn bad_key(ds: &Value, key: &Value) -> RuntimeError {
    RuntimeError::BadKey {
        ds: ds.ty(),
        key: key.ty(),
    }
}

/// The index after `key` in a sequence of `len` items. `nil` starts at 0.
fn next_index(len: usize, key: &Value, ds: &Value) -> Result<Value, RuntimeError> {
    let next = match key {
        Value::Nil => 0,
        Value::Integer(i) if *i >= 0 => *i as usize + 1,
        other => return Err(bad_key(ds, other)),
    };
    Ok(if next < len {
        Value::Integer(next as i32)
    } else {
        Value::Nil
    })
}

impl Vm {
    /// Index `ds` with `key`. Missing keys and out-of-range indices read as
    /// `nil`; tables and structs fall back to their prototypes.
    pub fn get(&self, ds: &Value, key: &Value) -> Result<Value, RuntimeError> {
        let max_depth = self.config.max_proto_depth;
        match ds {
            Value::Array(a) => seq_index(&a.borrow(), key, ds),
            Value::Tuple(t) => seq_index(t, key, ds),
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => bytes_index(s, key, ds),
            Value::Buffer(b) => bytes_index(b.borrow().as_bytes(), key, ds),
            Value::Table(t) => Ok(t.borrow().get(key, max_depth).unwrap_or_default()),
            Value::Struct(s) => Ok(s.get(key, max_depth).unwrap_or_default()),
            Value::Abstract(cell) => cell.get(key),
            other => Err(RuntimeError::NotIndexable(other.ty().name().into())),
        }
    }

    /// Store `value` under `key` in a mutable aggregate.
    pub fn put(&self, ds: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        match ds {
            Value::Array(a) => match key {
                Value::Integer(i) if i >= 0 => {
                    a.borrow_mut().set(i as usize, value);
                    Ok(())
                }
                other => Err(bad_key(ds, &other)),
            },
            Value::Buffer(b) => {
                let idx = match key {
                    Value::Integer(i) if i >= 0 => i as usize,
                    other => return Err(bad_key(ds, &other)),
                };
                let byte = match value {
                    Value::Integer(v) => u8::try_from(v)
                        .map_err(|_| RuntimeError::type_error("put", "byte", &value))?,
                    other => return Err(RuntimeError::type_error("put", "byte", &other)),
                };
                b.borrow_mut().set(idx, byte);
                Ok(())
            }
            Value::Table(t) => {
                t.borrow_mut().put(key, value);
                Ok(())
            }
            Value::Abstract(cell) => cell.put(&key, value),
            Value::Tuple(_)
            | Value::Struct(_)
            | Value::String(_)
            | Value::Symbol(_)
            | Value::Keyword(_) => Err(RuntimeError::ImmutablePut(ds.ty())),
            other => Err(RuntimeError::NotIndexable(other.ty().name().into())),
        }
    }

    pub fn length(&self, ds: &Value) -> Result<Value, RuntimeError> {
        let len = match ds {
            Value::Array(a) => a.borrow().len(),
            Value::Tuple(t) => t.len(),
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => s.len(),
            Value::Buffer(b) => b.borrow().len(),
            Value::Table(t) => t.borrow().len(),
            Value::Struct(s) => s.len(),
            other => return Err(RuntimeError::type_error("length", "a collection", other)),
        };
        Ok(Value::Integer(len as i32))
    }

    /// The key after `key` in the iteration order of `ds`, or `nil` at the
    /// end. `nil` starts the iteration.
    pub fn next(&self, ds: &Value, key: &Value) -> Result<Value, RuntimeError> {
        match ds {
            Value::Array(a) => next_index(a.borrow().len(), key, ds),
            Value::Tuple(t) => next_index(t.len(), key, ds),
            Value::String(s) | Value::Symbol(s) | Value::Keyword(s) => next_index(s.len(), key, ds),
            Value::Buffer(b) => next_index(b.borrow().len(), key, ds),
            Value::Table(t) => Ok(t.borrow().next_key(key).unwrap_or_default()),
            Value::Struct(s) => Ok(s.next_key(key).unwrap_or_default()),
            other => Err(RuntimeError::type_error("next", "a collection", other)),
        }
    }
}
