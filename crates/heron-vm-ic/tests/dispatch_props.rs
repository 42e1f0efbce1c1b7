//! Whatever stubs an entry holds, its result must equal the canonical
//! operation's, its chain must stay bounded, and its monitor must keep
//! accepting everything it has seen. Writes are checked by driving two
//! identically built object pools, one through the IC and one through
//! `ops`, and comparing their layouts after every step.

use heron_vm_bytecode::{BinaryOp, CompareOp, LocalIndex, Opcode, PcOffset, Script, ScriptBuilder, UnaryOp};
use heron_vm_core::{
    JsObject, NativeFn, ObjectClass, ObjectGroup, PropertyKey, Realm, Value, VmError, VmResult, ops, same_value,
};
use heron_vm_ic::{IcConfig, IcMode, IcRuntime, IcScript};
use proptest::prelude::*;
use std::sync::Arc;

const PC0: PcOffset = PcOffset::new(0);

fn engine(config: IcConfig, build: impl FnOnce(ScriptBuilder) -> ScriptBuilder) -> IcScript {
    let script = build(Script::builder().name("props").local_count(1)).build().unwrap();
    let runtime = IcRuntime::builder().config(config).build();
    IcScript::new(Arc::new(script), runtime).unwrap()
}

/// Numbers compare by value regardless of Int32/Double representation
fn equivalent(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => same_value(&Value::number(x), &Value::number(y)),
        _ => same_value(a, b),
    }
}

fn primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int32),
        prop_oneof![Just(0), Just(1), Just(-1), Just(i32::MAX), Just(i32::MIN)].prop_map(Value::Int32),
        any::<f64>().prop_map(Value::Double),
        Just(Value::Double(-0.0)),
        "[a-c0-9]{0,3}".prop_map(|s| Value::string(&s)),
        any::<bool>().prop_map(Value::Boolean),
        Just(Value::Null),
        Just(Value::Undefined),
        Just(Value::Symbol(1)),
    ]
}

fn binary_op() -> impl Strategy<Value = BinaryOp> {
    proptest::sample::select(BinaryOp::ALL.to_vec())
}

fn compare_op() -> impl Strategy<Value = CompareOp> {
    proptest::sample::select(CompareOp::ALL.to_vec())
}

/// Pool of objects, each group/shape combination chosen by index
fn object_pool(realm: &Realm, size: usize) -> Vec<Value> {
    let groups: Vec<Arc<ObjectGroup>> = (0..3).map(|_| ObjectGroup::new(ObjectClass::Plain)).collect();
    (0..size)
        .map(|i| {
            let obj = realm.new_object_in(&groups[i % groups.len()]);
            for pad in 0..(i % 4) {
                obj.set(&PropertyKey::new(&format!("pad{pad}")), Value::Null);
            }
            if i % 5 != 4 {
                obj.set(&PropertyKey::new("x"), Value::Int32(i as i32));
            }
            Value::Object(obj)
        })
        .collect()
}

fn outcomes_agree(expected: &VmResult<Value>, actual: &VmResult<Value>) -> bool {
    match (expected, actual) {
        (Ok(e), Ok(a)) => same_value(e, a),
        (Err(e), Err(a)) => e.to_string() == a.to_string(),
        _ => false,
    }
}

/// Plain objects over three groups with varying pads, plus a few arrays.
/// Built twice, in two realms, the pools are structurally identical.
fn twin_pool(realm: &Realm, size: usize) -> Vec<Value> {
    let groups: Vec<Arc<ObjectGroup>> = (0..3).map(|_| ObjectGroup::new(ObjectClass::Plain)).collect();
    (0..size)
        .map(|i| {
            if i % 4 == 3 {
                let elements = (0..i % 3).map(|n| Value::Int32(n as i32)).collect();
                return Value::Object(realm.new_array(elements));
            }
            let obj = realm.new_object_in(&groups[i % groups.len()]);
            for pad in 0..(i % 3) {
                obj.set(&PropertyKey::new(&format!("pad{pad}")), Value::Null);
            }
            if i % 5 != 4 {
                obj.set(&PropertyKey::new("x"), Value::Int32(i as i32));
            }
            Value::Object(obj)
        })
        .collect()
}

const POOL_SIZE: usize = 12;

#[derive(Debug, Clone)]
enum Step {
    SetProp(usize, Value),
    GetProp(usize),
    GetElem(usize, Value),
    SetElem(usize, Value, Value),
    In(Value, usize),
    HasOwn(Value, usize),
    PreventExtensions(usize),
}

fn element_key() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => (-1i32..6).prop_map(Value::Int32),
        1 => Just(Value::Double(0.5)),
        2 => proptest::sample::select(vec!["x", "y", "pad0", "length", "0", "2"]).prop_map(|s| Value::string(s)),
    ]
}

fn stored_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-2i32..8).prop_map(Value::Int32),
        Just(Value::Double(0.5)),
        Just(Value::string("s")),
        Just(Value::Null),
        Just(Value::Undefined),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    let pick = 0..POOL_SIZE;
    prop_oneof![
        3 => (pick.clone(), stored_value()).prop_map(|(i, v)| Step::SetProp(i, v)),
        2 => pick.clone().prop_map(Step::GetProp),
        2 => (pick.clone(), element_key()).prop_map(|(i, k)| Step::GetElem(i, k)),
        3 => (pick.clone(), element_key(), stored_value()).prop_map(|(i, k, v)| Step::SetElem(i, k, v)),
        1 => (element_key(), pick.clone()).prop_map(|(k, i)| Step::In(k, i)),
        2 => (element_key(), pick.clone()).prop_map(|(k, i)| Step::HasOwn(k, i)),
        1 => pick.prop_map(Step::PreventExtensions),
    ]
}

const SET_X: PcOffset = PcOffset::new(0);
const GET_X: PcOffset = PcOffset::new(1);
const GET_ELEM: PcOffset = PcOffset::new(2);
const SET_ELEM: PcOffset = PcOffset::new(3);
const IN: PcOffset = PcOffset::new(4);
const HAS_OWN: PcOffset = PcOffset::new(5);

fn object_steps(b: ScriptBuilder) -> ScriptBuilder {
    b.set_prop("x")
        .get_prop("x")
        .op(Opcode::GetElem)
        .op(Opcode::SetElem)
        .op(Opcode::In)
        .op(Opcode::HasOwn)
}

fn prevent_extensions(target: &Value) -> VmResult<Value> {
    if let Value::Object(obj) = target {
        obj.prevent_extensions();
    }
    Ok(Value::Undefined)
}

fn run_cached(ic: &IcScript, pool: &[Value], step: &Step) -> VmResult<Value> {
    match step {
        Step::SetProp(i, v) => ic.set_prop(SET_X, &pool[*i], v),
        Step::GetProp(i) => ic.get_prop(GET_X, &pool[*i]),
        Step::GetElem(i, k) => ic.get_elem(GET_ELEM, &pool[*i], k),
        Step::SetElem(i, k, v) => ic.set_elem(SET_ELEM, &pool[*i], k, v),
        Step::In(k, i) => ic.has_prop(IN, k, &pool[*i]).map(Value::Boolean),
        Step::HasOwn(k, i) => ic.has_own(HAS_OWN, k, &pool[*i]).map(Value::Boolean),
        Step::PreventExtensions(i) => prevent_extensions(&pool[*i]),
    }
}

fn run_canonical(pool: &[Value], step: &Step) -> VmResult<Value> {
    let x = PropertyKey::new("x");
    match step {
        Step::SetProp(i, v) => ops::set_property(&pool[*i], &x, v).map(|()| v.clone()),
        Step::GetProp(i) => ops::get_property(&pool[*i], &x),
        Step::GetElem(i, k) => ops::get_element(&pool[*i], k),
        Step::SetElem(i, k, v) => ops::set_element(&pool[*i], k, v).map(|()| v.clone()),
        Step::In(k, i) => ops::has_property(k, &pool[*i]).map(Value::Boolean),
        Step::HasOwn(k, i) => ops::has_own(k, &pool[*i]).map(Value::Boolean),
        Step::PreventExtensions(i) => prevent_extensions(&pool[*i]),
    }
}

fn own_keys(obj: &JsObject) -> Vec<PropertyKey> {
    let mut keys = Vec::new();
    let mut shape = Some(obj.shape());
    while let Some(current) = shape {
        keys.extend(current.last_key().cloned());
        shape = current.parent().cloned();
    }
    keys.reverse();
    keys
}

fn same_layout(cached: &Value, canonical: &Value) -> Result<(), TestCaseError> {
    let (Value::Object(a), Value::Object(b)) = (cached, canonical) else {
        return Err(TestCaseError::fail("pools hold objects only"));
    };
    let keys = own_keys(a);
    prop_assert_eq!(&keys, &own_keys(b));
    for key in &keys {
        let (x, y) = (a.get_own(key), b.get_own(key));
        prop_assert!(
            matches!((&x, &y), (Some(x), Some(y)) if same_value(x, y)),
            "{key}: {x:?} vs {y:?}"
        );
    }
    let (xs, ys) = (a.elements(), b.elements());
    prop_assert_eq!(xs.len(), ys.len());
    for (x, y) in xs.iter().zip(&ys) {
        prop_assert!(same_value(x, y), "element {x:?} vs {y:?}");
    }
    prop_assert_eq!(a.is_extensible(), b.is_extensible());
    Ok(())
}

fn shape_id(value: &Value) -> Option<heron_vm_core::ShapeId> {
    value.as_object().map(|obj| obj.shape().id())
}

fn call_pool(realm: &Realm) -> Vec<Value> {
    let count: NativeFn = Arc::new(|_this: &Value, args: &[Value]| -> VmResult<Value> {
        Ok(Value::Int32(args.len() as i32))
    });
    let first: NativeFn = Arc::new(|_this: &Value, args: &[Value]| -> VmResult<Value> {
        Ok(args.first().cloned().unwrap_or(Value::Undefined))
    });
    let picky: NativeFn = Arc::new(|this: &Value, args: &[Value]| -> VmResult<Value> {
        if args.len() == 2 {
            return Err(VmError::type_error("two arguments"));
        }
        Ok(this.clone())
    });
    vec![
        Value::Object(realm.new_function("count", count)),
        Value::Object(realm.new_function("first", first)),
        Value::Object(realm.new_function("picky", picky)),
        Value::Object(realm.new_object()),
        Value::Int32(1),
    ]
}

proptest! {
    #[test]
    fn writes_match_canonical_on_twin_pools(
        cap in 1usize..5,
        steps in proptest::collection::vec(step(), 1..60),
    ) {
        let ic = engine(IcConfig::default().with_max_optimized_stubs(cap), object_steps);
        let cached = twin_pool(ic.runtime().realm(), POOL_SIZE);
        let canonical = twin_pool(&Realm::new(), POOL_SIZE);

        for step in &steps {
            let expected = run_canonical(&canonical, step);
            let actual = run_cached(&ic, &cached, step);
            prop_assert!(outcomes_agree(&expected, &actual), "{step:?}: {expected:?} vs {actual:?}");

            for (a, b) in cached.iter().zip(&canonical) {
                same_layout(a, b)?;
            }
            // Stub-installed shapes are the ones the generic path would pick
            for i in 0..POOL_SIZE {
                for j in i + 1..POOL_SIZE {
                    prop_assert_eq!(
                        shape_id(&cached[i]) == shape_id(&cached[j]),
                        shape_id(&canonical[i]) == shape_id(&canonical[j])
                    );
                }
            }
            for id in ic.entries() {
                prop_assert!(ic.chain_path(id).len() <= cap + 1);
            }
        }
    }

    #[test]
    fn unary_arith_matches_canonical(
        op in proptest::sample::select(UnaryOp::ALL.to_vec()),
        cap in 1usize..4,
        values in proptest::collection::vec(primitive(), 1..40),
    ) {
        let ic = engine(IcConfig::default().with_max_optimized_stubs(cap), |b| b.op(Opcode::Unary(op)));
        let id = ic.entry_for_pc(PC0).unwrap();
        for value in &values {
            let expected = ops::unary_arith(op, value);
            let actual = ic.unary(PC0, value);
            match (&expected, &actual) {
                (Ok(e), Ok(a)) => prop_assert!(equivalent(e, a), "{op:?} {value:?}: {e:?} vs {a:?}"),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "{op:?} {value:?}: {expected:?} vs {actual:?}"),
            }
            prop_assert!(ic.stubs(id).len() <= cap);
        }
    }

    #[test]
    fn type_of_matches_canonical(
        picks in proptest::collection::vec(prop_oneof![primitive().prop_map(Ok::<Value, usize>), (0usize..5).prop_map(Err::<Value, usize>)], 1..40),
    ) {
        let ic = engine(IcConfig::default(), |b| b.op(Opcode::TypeOf));
        let callees = call_pool(ic.runtime().realm());
        for pick in picks {
            let value = pick.unwrap_or_else(|index| callees[index].clone());
            let actual = ic.type_of(PC0, &value).unwrap();
            prop_assert_eq!(actual.as_str(), Some(ops::type_of(&value)));
        }
    }

    #[test]
    fn call_matches_canonical(
        cap in 1usize..4,
        calls in proptest::collection::vec((0usize..5, primitive(), proptest::collection::vec(primitive(), 0..3)), 1..40),
    ) {
        let ic = engine(IcConfig::default().with_max_optimized_stubs(cap), |b| b.op(Opcode::Call(2)));
        let id = ic.entry_for_pc(PC0).unwrap();
        let callees = call_pool(ic.runtime().realm());
        for (pick, this, args) in &calls {
            let callee = &callees[*pick];
            let expected = ops::call_value(callee, this, args);
            let actual = ic.call(PC0, callee, this, args);
            prop_assert!(outcomes_agree(&expected, &actual), "{pick}: {expected:?} vs {actual:?}");
            if let Ok(result) = &actual {
                prop_assert!(ic.monitor_accepts(id, result));
            }
            prop_assert!(ic.stubs(id).len() <= cap);
        }
    }
    #[test]
    fn binary_arith_matches_canonical(
        op in binary_op(),
        cap in 1usize..6,
        pairs in proptest::collection::vec((primitive(), primitive()), 1..40),
    ) {
        let ic = engine(IcConfig::default().with_max_optimized_stubs(cap), |b| b.op(Opcode::Binary(op)));
        let id = ic.entry_for_pc(PC0).unwrap();
        for (lhs, rhs) in &pairs {
            let expected = ops::binary_arith(op, lhs, rhs);
            let actual = ic.binary(PC0, lhs, rhs);
            match (&expected, &actual) {
                (Ok(e), Ok(a)) => prop_assert!(equivalent(e, a), "{op:?} {lhs:?} {rhs:?}: {e:?} vs {a:?}"),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "{op:?} {lhs:?} {rhs:?}: {expected:?} vs {actual:?}"),
            }
            prop_assert!(ic.stubs(id).len() <= cap);
            prop_assert!(ic.chain_path(id).len() <= cap + 1);
        }
    }

    #[test]
    fn compare_matches_canonical(
        op in compare_op(),
        pairs in proptest::collection::vec((primitive(), primitive()), 1..40),
    ) {
        let ic = engine(IcConfig::default(), |b| b.op(Opcode::Compare(op)));
        for (lhs, rhs) in &pairs {
            let expected = ops::compare(op, lhs, rhs);
            let actual = ic.compare(PC0, lhs, rhs);
            match (&expected, &actual) {
                (Ok(e), Ok(a)) => prop_assert_eq!(e, a, "{:?} {:?} {:?}", op, lhs, rhs),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "{op:?} {lhs:?} {rhs:?}: {expected:?} vs {actual:?}"),
            }
        }
    }

    #[test]
    fn to_bool_matches_canonical(values in proptest::collection::vec(primitive(), 1..40)) {
        let ic = engine(IcConfig::default(), |b| b.op(Opcode::JumpIfFalse(PC0)));
        for value in &values {
            prop_assert_eq!(ic.to_bool(PC0, value).unwrap(), ops::to_boolean(value));
        }
    }

    #[test]
    fn get_prop_matches_canonical_and_respects_cap(
        cap in 1usize..5,
        picks in proptest::collection::vec(0usize..12, 1..60),
    ) {
        let ic = engine(IcConfig::default().with_max_optimized_stubs(cap), |b| b.get_prop("x"));
        let id = ic.entry_for_pc(PC0).unwrap();
        let pool = object_pool(ic.runtime().realm(), 12);
        let key = PropertyKey::new("x");
        let mut attached_after_terminal = false;

        for pick in picks {
            let target = &pool[pick];
            let terminal = matches!(ic.attach_state(id).mode(), IcMode::Megamorphic | IcMode::Generic);
            let before = ic.stats().stubs_attached;

            let expected = ops::get_property(target, &key).unwrap();
            let actual = ic.get_prop(PC0, target).unwrap();
            prop_assert!(same_value(&expected, &actual));

            attached_after_terminal |= terminal && ic.stats().stubs_attached > before;
            prop_assert!(ic.attach_state(id).num_optimized_stubs() <= cap);
            let path = ic.chain_path(id);
            prop_assert!(path.len() <= cap + 1);
            prop_assert_eq!(path.last().copied(), Some(ic.chain(id).fallback()));
            prop_assert!(ic.monitor_accepts(id, &actual));
        }
        prop_assert!(!attached_after_terminal);
    }

    #[test]
    fn monitor_widening_is_monotonic(
        picks in proptest::collection::vec(prop_oneof![primitive().prop_map(Ok::<Value, usize>), (0usize..12).prop_map(Err::<Value, usize>)], 1..40),
        cap in 1usize..4,
    ) {
        let runtime = IcRuntime::builder().config(IcConfig::default().with_max_optimized_stubs(cap)).build();
        let script = Script::builder()
            .local_count(1)
            .op(Opcode::GetAliasedVar(LocalIndex::new(0)))
            .build()
            .unwrap();
        let ic = IcScript::new(Arc::new(script), Arc::clone(&runtime)).unwrap();
        let id = ic.entry_for_pc(PC0).unwrap();
        let pool = object_pool(runtime.realm(), 12);

        let mut seen = Vec::new();
        for pick in picks {
            let value = pick.unwrap_or_else(|index| pool[index].clone());
            let first_time = !ic.monitor_accepts(id, &value);
            let monitor_len = ic.monitor_stubs(id).len();
            ic.monitor_aliased(PC0, &value).unwrap();
            seen.push(value.clone());
            for earlier in &seen {
                prop_assert!(ic.monitor_accepts(id, earlier), "lost {earlier:?}");
            }
            if !first_time {
                // Idempotent: an accepted value changes nothing
                prop_assert_eq!(ic.monitor_stubs(id).len(), monitor_len);
            }
            let object_guards = ic
                .monitor_stubs(id)
                .iter()
                .filter(|stub| stub.kind().type_guard().is_some_and(|guard| guard.is_object_kind()))
                .count();
            prop_assert!(object_guards <= cap);
        }
    }
}
