use std::cmp::Ordering;
use std::ffi::CString;

use pretty_assertions::assert_eq;
use test_env_log::test;

use super::*;

fn s(text: &str) -> Value {
    Value::string(text)
}

#[test]
fn value_fits_three_words() {
    assert!(std::mem::size_of::<Value>() <= 24);
}

#[test]
fn truthiness() {
    assert!(!Value::Nil.truthy());
    assert!(!Value::Boolean(false).truthy());
    assert!(Value::Boolean(true).truthy());
    assert!(Value::Integer(0).truthy());
    assert!(s("").truthy());
}

#[test]
fn scalar_equality() {
    assert_eq!(Value::Integer(1), Value::Integer(1));
    assert_ne!(Value::Integer(1), Value::Real(1.0));
    assert_eq!(Value::Real(0.0), Value::Real(-0.0));
    assert_eq!(Value::Real(0.0).hash(), Value::Real(-0.0).hash());
    assert_ne!(Value::Real(f64::NAN), Value::Real(f64::NAN));
    assert_eq!(s("abc"), s("abc"));
    assert_eq!(s("abc").hash(), s("abc").hash());
    assert_ne!(s("abc"), Value::Symbol(std::rc::Rc::from(&b"abc"[..])));
}

#[test]
fn total_order_by_type_first() {
    let ordered = vec![
        Value::Nil,
        Value::Boolean(false),
        Value::Boolean(true),
        Value::Integer(-5),
        Value::Integer(7),
        Value::Real(-1.0),
        s("a"),
        s("ab"),
        s("b"),
    ];
    for pair in ordered.windows(2) {
        assert_eq!(pair[0].compare(&pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
        assert_eq!(pair[1].compare(&pair[0]), Ordering::Greater);
    }
}

#[test]
fn mutable_aggregates_compare_by_identity() {
    let a = Value::array(vec![Value::Integer(1)]);
    let b = Value::array(vec![Value::Integer(1)]);
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
    assert_ne!(a.hash(), 0);
}

#[test]
fn equal_tuples_hash_alike() {
    let a = Tuple::new(vec![Value::Integer(1), s("two"), Value::Real(3.0)]).unwrap();
    let b = Tuple::new(vec![Value::Integer(1), s("two"), Value::Real(3.0)]).unwrap();
    assert!(!a.ptr_eq(&b));
    assert_eq!(a.hash(), b.hash());
    assert!(a == b);
    assert_eq!(a.compare(&b), Ordering::Equal);
}

#[test]
fn tuples_of_different_length_differ() {
    let a = Tuple::new(vec![Value::Integer(1)]).unwrap();
    let b = Tuple::new(vec![Value::Integer(1), Value::Nil]).unwrap();
    assert!(a != b);
    assert_eq!(a.compare(&b), Ordering::Less);

    let c = Tuple::new(vec![Value::Integer(2)]).unwrap();
    assert_eq!(c.compare(&b), Ordering::Greater);
}

#[test]
fn tuple_builder_fills_with_nil() {
    let mut b = TupleBuilder::new(3);
    b.set(1, Value::Integer(9));
    b.push(Value::Boolean(true));
    let t = b.finish().unwrap();
    assert_eq!(
        &t[..],
        &[
            Value::Nil,
            Value::Integer(9),
            Value::Nil,
            Value::Boolean(true)
        ]
    );
}

#[test]
fn nesting_is_bounded_at_construction() {
    let (mut a, mut b) = (Value::Integer(0), Value::Integer(0));
    for i in 0..MAX_NESTING {
        a = Value::tuple(vec![a, Value::Integer(i as i32)]).unwrap();
        b = Value::tuple(vec![b, Value::Integer(i as i32)]).unwrap();
    }
    assert_eq!(a.nesting(), MAX_NESTING);
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a.compare(&b), Ordering::Equal);

    assert!(matches!(
        Value::tuple(vec![a.clone()]),
        Err(crate::error::RuntimeError::NestingTooDeep)
    ));
    let mut sb = StructBuilder::new(1);
    sb.put(s("k"), a.clone());
    assert!(matches!(
        sb.finish(),
        Err(crate::error::RuntimeError::NestingTooDeep)
    ));

    // keys and prototypes count as well
    let shallow = match &a {
        Value::Tuple(t) => t[0].clone(),
        other => panic!("expected a tuple, got {}", other),
    };
    let mut sb = StructBuilder::new(1);
    sb.put(shallow, Value::Integer(1));
    let inner = sb.finish().unwrap();
    assert_eq!(inner.nesting(), MAX_NESTING);
    let sb = StructBuilder::new(0).with_proto(Some(inner));
    assert!(sb.finish().is_err());
}

struct FixedHash {
    hash: u32,
    calls: std::rc::Rc<std::cell::Cell<u32>>,
}

impl AbstractObject for FixedHash {
    fn type_name(&self) -> &'static str {
        "test/fixed-hash"
    }

    fn hash(&self) -> Option<u32> {
        self.calls.set(self.calls.get() + 1);
        Some(self.hash)
    }
}

fn fixed_hash(hash: u32) -> (Value, std::rc::Rc<std::cell::Cell<u32>>) {
    let mut reg = AbstractRegistry::default();
    let key = reg.register::<FixedHash>();
    let calls = std::rc::Rc::new(std::cell::Cell::new(0));
    let obj = FixedHash {
        hash,
        calls: calls.clone(),
    };
    let cell = AbstractCell::new(key, Box::new(obj));
    (Value::Abstract(std::rc::Rc::new(cell)), calls)
}

#[test]
fn zero_tuple_hash_is_recomputed() {
    use super::tuple::{HASH_MUL, HASH_SEED};

    // pick the one element hash that makes a 1-tuple hash to 0
    let inverse = (0..5).fold(HASH_MUL, |x, _| {
        x.wrapping_mul(2u32.wrapping_sub(HASH_MUL.wrapping_mul(x)))
    });
    assert_eq!(inverse.wrapping_mul(HASH_MUL), 1);
    let (elem, calls) = fixed_hash(inverse ^ HASH_SEED.rotate_left(5));
    let zero = Tuple::new(vec![elem]).unwrap();
    assert_eq!(zero.hash(), 0);
    assert_eq!(zero.hash(), 0);
    assert_eq!(calls.get(), 2);

    let (elem, calls) = fixed_hash(7);
    let cached = Tuple::new(vec![elem]).unwrap();
    let h = cached.hash();
    assert_ne!(h, 0);
    assert_eq!(cached.hash(), h);
    assert_eq!(calls.get(), 1);
}

fn build_struct(pairs: &[(Value, Value)]) -> Struct {
    let mut b = StructBuilder::new(pairs.len());
    for (k, v) in pairs {
        b.put(k.clone(), v.clone());
    }
    b.finish().unwrap()
}

#[test]
fn struct_is_independent_of_insertion_order() {
    let pairs = (0..12)
        .map(|i| (Value::Integer(i * 7), s(&format!("v{}", i))))
        .collect::<Vec<_>>();
    let forward = build_struct(&pairs);

    let mut reversed = pairs.clone();
    reversed.reverse();
    let backward = build_struct(&reversed);

    let mut shuffled = pairs.clone();
    shuffled.rotate_left(5);
    shuffled.swap(0, 9);
    let rotated = build_struct(&shuffled);

    for other in [&backward, &rotated] {
        assert!(&forward == other);
        assert_eq!(forward.hash(), other.hash());
        assert_eq!(forward.compare(other), Ordering::Equal);
        let a = forward.iter().collect::<Vec<_>>();
        let b = other.iter().collect::<Vec<_>>();
        assert_eq!(a, b);
    }

    assert_eq!(forward.len(), 12);
    assert_eq!(forward.capacity(), 32);
    let mut seen = forward
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Vec<_>>();
    seen.sort_by(|a, b| a.0.compare(&b.0));
    assert_eq!(seen, pairs);
}

#[test]
fn struct_lookup_and_proto() {
    let base = build_struct(&[(s("greeting"), s("hello")), (s("n"), Value::Integer(1))]);
    let mut b = StructBuilder::new(1).with_proto(Some(base.clone()));
    b.put(s("n"), Value::Integer(2));
    let derived = b.finish().unwrap();

    assert_eq!(derived.get_local(&s("n")), Some(&Value::Integer(2)));
    assert_eq!(derived.get_local(&s("greeting")), None);
    assert_eq!(derived.get(&s("greeting"), 8), Some(s("hello")));
    assert_eq!(derived.get(&s("greeting"), 0), None);
    assert_eq!(derived.get(&s("missing"), 8), None);

    // same entries, different prototype
    let plain = build_struct(&[(s("n"), Value::Integer(2))]);
    assert!(plain != derived);
    assert_ne!(plain.compare(&derived), Ordering::Equal);
}

#[test]
fn struct_skips_nil_and_duplicates() {
    let st = build_struct(&[
        (Value::Nil, Value::Integer(1)),
        (Value::Real(f64::NAN), Value::Integer(2)),
        (s("gone"), Value::Nil),
        (s("k"), Value::Integer(3)),
        (s("k"), Value::Integer(4)),
    ]);
    assert_eq!(st.len(), 1);
    assert_eq!(st.capacity(), 2);
    assert_eq!(st.get_local(&s("k")), Some(&Value::Integer(4)));
}

#[test]
fn struct_iteration_by_next_key() {
    let st = build_struct(&[
        (s("a"), Value::Integer(1)),
        (s("b"), Value::Integer(2)),
        (s("c"), Value::Integer(3)),
    ]);
    let mut keys = vec![];
    let mut key = Value::Nil;
    while let Some(next) = st.next_key(&key) {
        keys.push(next.clone());
        key = next;
    }
    assert_eq!(keys, st.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>());
    assert_eq!(keys.len(), 3);
}

#[test]
fn table_put_get_remove() {
    let mut t = Table::new();
    t.put(s("x"), Value::Integer(1));
    assert_eq!(t.get(&s("x"), 8), Some(Value::Integer(1)));
    t.put(s("x"), Value::Integer(2));
    assert_eq!(t.len(), 1);
    assert_eq!(t.get_local(&s("x")), Some(&Value::Integer(2)));

    assert_eq!(t.remove(&s("x")), Some(Value::Integer(2)));
    assert_eq!(t.get(&s("x"), 8), None);
    assert_eq!(t.remove(&s("x")), None);
    assert!(t.is_empty());
}

#[test]
fn table_remove_leaves_proto_alone() {
    let proto = std::rc::Rc::new(std::cell::RefCell::new(Table::new()));
    proto.borrow_mut().put(s("k"), s("proto"));

    let mut t = Table::new();
    t.set_proto(Some(proto.clone()));
    t.put(s("k"), s("own"));
    assert_eq!(t.get(&s("k"), 8), Some(s("own")));

    assert_eq!(t.remove(&s("k")), Some(s("own")));
    assert_eq!(t.get(&s("k"), 8), Some(s("proto")));
    assert_eq!(t.remove(&s("k")), None);
    assert_eq!(proto.borrow().len(), 1);
}

#[test]
fn table_nil_value_removes_and_nil_key_is_ignored() {
    let mut t = Table::new();
    t.put(Value::Nil, Value::Integer(1));
    t.put(Value::Real(f64::NAN), Value::Integer(1));
    assert!(t.is_empty());
    t.put(Value::Integer(3), Value::Integer(1));
    t.put(Value::Integer(3), Value::Nil);
    assert!(t.is_empty());
}

#[test]
fn table_grows_and_reuses_tombstones() {
    let proto = std::rc::Rc::new(std::cell::RefCell::new(Table::new()));
    let mut t = Table::new();
    t.set_proto(Some(proto.clone()));
    for i in 0..100 {
        t.put(Value::Integer(i), Value::Integer(i * i));
    }
    assert_eq!(t.len(), 100);
    assert!(t.capacity() >= 200);
    assert!(t.capacity().is_power_of_two());
    for i in 0..100 {
        assert_eq!(t.get_local(&Value::Integer(i)), Some(&Value::Integer(i * i)));
    }
    assert!(t.proto().is_some());

    // churn must not grow the table without bound
    let cap = t.capacity();
    for round in 0..1000 {
        t.remove(&Value::Integer(round % 100));
        t.put(Value::Integer(round % 100), Value::Integer(round));
    }
    assert_eq!(t.len(), 100);
    assert_eq!(t.capacity(), cap);
    assert!(t.proto().is_some());
}

#[test]
fn table_iteration_by_next_key() {
    let mut t = Table::new();
    for i in 0..10 {
        t.put(Value::Integer(i), Value::Boolean(true));
    }
    t.remove(&Value::Integer(4));
    let mut count = 0;
    let mut key = Value::Nil;
    while let Some(next) = t.next_key(&key) {
        assert_ne!(next, Value::Integer(4));
        count += 1;
        key = next;
    }
    assert_eq!(count, 9);
}

#[test]
fn array_push_pop_set() {
    let mut a = Array::new();
    assert_eq!(a.pop(), None);
    for i in 0..10 {
        a.push(Value::Integer(i));
    }
    assert_eq!(a.len(), 10);
    assert_eq!(a.pop(), Some(Value::Integer(9)));
    a.set(12, s("far"));
    assert_eq!(a.len(), 13);
    assert_eq!(a.get(10), Some(&Value::Nil));
    assert_eq!(a.get(12), Some(&s("far")));
}

#[test]
fn array_capacity_grows_geometrically() {
    let mut a = Array::new();
    let mut cap = a.capacity();
    let mut growths = 0;
    for i in 0..1000 {
        a.push(Value::Integer(i));
        if a.capacity() != cap {
            assert!(a.capacity() >= 2 * cap, "{} -> {}", cap, a.capacity());
            cap = a.capacity();
            growths += 1;
        }
    }
    assert_eq!(a.len(), 1000);
    assert!(growths <= 10, "grew {} times", growths);
}

#[test]
fn buffer_pushes() {
    let mut b = Buffer::new();
    b.push_byte(b'q');
    b.push_bytes(b"uil");
    let c = CString::new("l!").unwrap();
    b.push_cstring(&c);
    assert_eq!(b.as_bytes(), b"quill!");
    b.push_u16_le(0x0201);
    assert_eq!(&b.as_bytes()[6..], &[1, 2]);
    b.set(10, 7);
    assert_eq!(b.len(), 11);
    assert_eq!(&b.as_bytes()[8..], &[0, 0, 7]);
}

#[test]
fn display() {
    let t = Value::tuple(vec![Value::Integer(1), s("x"), Value::Real(1.5)]).unwrap();
    assert_eq!(t.to_string(), "(1 \"x\" 1.5)");
    let a = Value::array(vec![Value::Nil, Value::Boolean(true)]);
    assert_eq!(a.to_string(), "@[nil true]");
    assert_eq!(Value::Keyword(std::rc::Rc::from(&b"k"[..])).to_string(), ":k");
    assert_eq!(Value::buffer(Buffer::from(&b"hi"[..])).to_string(), "@\"hi\"");
}

struct Counter {
    hits: std::cell::Cell<u32>,
}

impl AbstractObject for Counter {
    fn type_name(&self) -> &'static str {
        "test/counter"
    }

    fn get(&self, _key: &Value) -> Result<Value, crate::error::RuntimeError> {
        self.hits.set(self.hits.get() + 1);
        Ok(Value::Integer(self.hits.get() as i32))
    }
}

#[test]
fn abstract_registry_and_downcast() {
    let mut reg = AbstractRegistry::default();
    let key = reg.register::<Counter>();
    assert_eq!(reg.register::<Counter>(), key);
    assert_eq!(reg.lookup::<AstNode>(), None);
    assert!(reg.info(key).unwrap().name.ends_with("Counter"));

    let cell = AbstractCell::new(
        key,
        Box::new(Counter {
            hits: std::cell::Cell::new(0),
        }),
    );
    assert_eq!(cell.type_name(), "test/counter");
    assert_eq!(cell.get(&Value::Nil).unwrap(), Value::Integer(1));
    assert_eq!(cell.downcast::<Counter>().unwrap().hits.get(), 1);
    assert!(cell.downcast::<AstNode>().is_none());
    assert!(cell.put(&Value::Nil, Value::Nil).is_err());
}

fn ast(v: Value) -> Value {
    let mut reg = AbstractRegistry::default();
    let key = reg.register::<AstNode>();
    let node = AstNode::new(v, Span { start: 1, end: 4 });
    Value::Abstract(std::rc::Rc::new(AbstractCell::new(key, Box::new(node))))
}

#[test]
fn unwrap_ast_strips_and_shares() {
    let mut vm = crate::vm::Vm::default();
    let plain = Value::tuple(vec![Value::Integer(1), s("leaf")]).unwrap();
    let untouched = Value::tuple(vec![plain.clone(), Value::Integer(2)]).unwrap();
    assert!(unwrap_ast(&mut vm, &untouched).unwrap().is_identical(&untouched));

    let wrapped = Value::tuple(vec![plain.clone(), ast(Value::Integer(2))]).unwrap();
    let out = unwrap_ast(&mut vm, &wrapped).unwrap();
    assert_eq!(out, untouched);
    assert!(!out.is_identical(&wrapped));
    // the unchanged child is shared, not copied
    match &out {
        Value::Tuple(t) => assert!(t[0].is_identical(&plain)),
        other => panic!("expected a tuple, got {}", other),
    }

    let nested = ast(Value::array(vec![ast(s("deep"))]));
    match unwrap_ast(&mut vm, &nested).unwrap() {
        Value::Array(a) => assert_eq!(a.borrow()[0], s("deep")),
        other => panic!("expected an array, got {}", other),
    }
}

#[test]
fn unwrapped_aggregates_are_collectable() {
    let mut vm = crate::vm::Vm::default();
    let arr = Value::array(vec![ast(Value::Integer(1))]);
    let mut table = Table::new();
    table.put(s("k"), ast(Value::Integer(2)));
    let tab = Value::table(table);

    let (arr, tab) = match (
        unwrap_ast(&mut vm, &arr).unwrap(),
        unwrap_ast(&mut vm, &tab).unwrap(),
    ) {
        (Value::Array(a), Value::Table(t)) => (a, t),
        other => panic!("expected an array and a table, got {:?}", other),
    };
    assert_eq!(arr.borrow()[0], Value::Integer(1));
    assert_eq!(tab.borrow().get_local(&s("k")), Some(&Value::Integer(2)));

    // self-references only the collector can break
    arr.borrow_mut().push(Value::Array(arr.clone()));
    tab.borrow_mut().put(s("me"), Value::Table(tab.clone()));
    let (weak_arr, weak_tab) = (std::rc::Rc::downgrade(&arr), std::rc::Rc::downgrade(&tab));
    drop((arr, tab));

    let stats = vm.collect();
    assert_eq!(stats.cleared, 2);
    assert!(weak_arr.upgrade().is_none());
    assert!(weak_tab.upgrade().is_none());
}

#[test]
fn ast_node_answers_keywords() {
    let node = AstNode::new(Value::Integer(5), Span { start: 3, end: 9 });
    let kw = |k: &str| Value::Keyword(std::rc::Rc::from(k.as_bytes()));
    assert_eq!(node.get(&kw("value")).unwrap(), Value::Integer(5));
    assert_eq!(node.get(&kw("start")).unwrap(), Value::Integer(3));
    assert_eq!(node.get(&kw("end")).unwrap(), Value::Integer(9));
    assert_eq!(node.get(&kw("other")).unwrap(), Value::Nil);
}

/// Orders by content but keeps the default hash.
struct Amount(i32);

impl AbstractObject for Amount {
    fn type_name(&self) -> &'static str {
        "test/amount"
    }

    fn compare(&self, other: &dyn AbstractObject) -> Option<Ordering> {
        let other = <dyn AbstractObject as AsAny>::as_any(other).downcast_ref::<Amount>()?;
        Some(self.0.cmp(&other.0))
    }
}

#[test]
fn content_compared_abstracts_hash_alike() {
    let mut reg = AbstractRegistry::default();
    let key = reg.register::<Amount>();
    let amount = |n| Value::Abstract(std::rc::Rc::new(AbstractCell::new(key, Box::new(Amount(n)))));
    let (a, b, c) = (amount(5), amount(5), amount(6));
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
    assert_ne!(a, c);
    assert_eq!(a.compare(&c), Ordering::Less);

    let ta = Value::tuple(vec![a.clone(), Value::Integer(1)]).unwrap();
    let tb = Value::tuple(vec![b.clone(), Value::Integer(1)]).unwrap();
    assert_eq!(ta, tb);
    assert_eq!(ta.hash(), tb.hash());

    let mut t = Table::new();
    t.put(a, s("five"));
    assert_eq!(t.get_local(&b), Some(&s("five")));
    assert_eq!(t.get_local(&c), None);
}
