use itertools::Itertools;

use crate::error::RuntimeError;
use crate::gc::Tracer;
use crate::vm::Vm;

use super::{AbstractObject, StructBuilder, Table, Tuple, Value};

const MAX_UNWRAP_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

/// A value annotated with the source span it was parsed from.
pub struct AstNode {
    pub value: Value,
    pub span: Span,
}

impl AstNode {
    pub fn new(value: Value, span: Span) -> AstNode {
        AstNode { value, span }
    }
}

impl AbstractObject for AstNode {
    fn type_name(&self) -> &'static str {
        "core/ast"
    }

    fn mark(&self, tracer: &mut dyn Tracer) {
        tracer.mark(&self.value);
    }

    fn get(&self, key: &Value) -> Result<Value, RuntimeError> {
        if key.is_keyword("value") {
            Ok(self.value.clone())
        } else if key.is_keyword("start") {
            Ok(Value::Integer(self.span.start as i32))
        } else if key.is_keyword("end") {
            Ok(Value::Integer(self.span.end as i32))
        } else {
            Ok(Value::Nil)
        }
    }
}

/// Strip every [`AstNode`] wrapper from `value`.
///
/// Aggregates whose children were not changed are returned as they are, so
/// unwrapping a tree without annotations allocates nothing. Rebuilt arrays
/// and tables are registered with the collector of `vm`. Nesting beyond a
/// fixed depth is left untouched.
pub fn unwrap_ast(vm: &mut Vm, value: &Value) -> Result<Value, RuntimeError> {
    unwrap_depth(vm, value, 0)
}

fn unwrap_depth(vm: &mut Vm, value: &Value, depth: usize) -> Result<Value, RuntimeError> {
    if depth > MAX_UNWRAP_DEPTH {
        return Ok(value.clone());
    }
    let recur = move |vm: &mut Vm, v: &Value| unwrap_depth(vm, v, depth + 1);
    let out = match value {
        Value::Abstract(cell) => match cell.downcast::<AstNode>() {
            Some(node) => recur(vm, &node.value)?,
            None => value.clone(),
        },
        Value::Tuple(t) => match rebuild(vm, t.to_vec(), recur)? {
            Some(items) => Value::Tuple(Tuple::new(items)?),
            None => value.clone(),
        },
        Value::Array(a) => {
            let items = a.borrow().iter().cloned().collect_vec();
            match rebuild(vm, items, recur)? {
                Some(items) => vm.new_array(items),
                None => value.clone(),
            }
        }
        Value::Struct(s) => {
            let pairs = s.iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect_vec();
            match rebuild(vm, pairs, recur)? {
                Some(items) => {
                    let mut b = StructBuilder::new(items.len() / 2).with_proto(s.proto().cloned());
                    for (k, v) in items.into_iter().tuples() {
                        b.put(k, v);
                    }
                    Value::Struct(b.finish()?)
                }
                None => value.clone(),
            }
        }
        Value::Table(t) => {
            let (pairs, proto) = {
                let t = t.borrow();
                let pairs = t.iter().flat_map(|(k, v)| [k.clone(), v.clone()]).collect_vec();
                (pairs, t.proto().cloned())
            };
            match rebuild(vm, pairs, recur)? {
                Some(items) => {
                    let mut out = Table::with_capacity(items.len() / 2);
                    out.set_proto(proto);
                    for (k, v) in items.into_iter().tuples() {
                        out.put(k, v);
                    }
                    vm.new_table(out)
                }
                None => value.clone(),
            }
        }
        _ => value.clone(),
    };
    Ok(out)
}

/// Map `items` through `f`. Returns `None` if every result is identical to
/// its input.
fn rebuild(
    vm: &mut Vm,
    items: Vec<Value>,
    mut f: impl FnMut(&mut Vm, &Value) -> Result<Value, RuntimeError>,
) -> Result<Option<Vec<Value>>, RuntimeError> {
    let mut changed = false;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        let new = f(&mut *vm, item)?;
        changed |= !new.is_identical(item);
        out.push(new);
    }
    Ok(changed.then(|| out))
}
