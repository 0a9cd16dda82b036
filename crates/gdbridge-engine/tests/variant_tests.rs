//! Integration tests for the variant codec
//!
//! Tests cover:
//! - Encode/decode round trips for every family of kinds
//! - Ownership of values created by the codec (destroyed exactly once)
//! - Borrowed values (never destroyed)
//! - Generic operations: construct, call, evaluate, indexed/keyed/named access
//! - Typed builtin, evaluator and utility entry points

mod common;

use common::{FakeHost, HostValue};
use gdbridge_engine::{Ownership, RawVariant};
use gdbridge_sdk::{
    Aabb, Basis, BridgeError, CallErrorKind, Color, Operator, Projection, Transform3D, Value,
    Vector2, Vector3, Vector4, VariantType,
};

fn round_trip(host: &FakeHost, value: Value) -> Value {
    let ctx = host.context();
    let codec = ctx.codec();
    let variant = codec.encode(&value).unwrap();
    assert_eq!(variant.kind(), value.kind());
    codec.decode(&variant).unwrap()
}

// ===== Round trips =====

#[test]
fn test_scalar_round_trips() {
    let host = FakeHost::new();
    for value in [
        Value::Nil,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(i64::MIN),
        Value::Int(i64::MAX),
        Value::Float(-0.5),
        Value::Float(f64::INFINITY),
        Value::Float(f64::NEG_INFINITY),
        Value::Float(f64::MIN_POSITIVE),
        Value::Rid(0xdead_beef),
    ] {
        assert_eq!(round_trip(&host, value.clone()), value);
    }
}

#[test]
fn test_nan_survives_round_trip() {
    let host = FakeHost::new();
    match round_trip(&host, Value::Float(f64::NAN)) {
        Value::Float(f) => assert!(f.is_nan()),
        other => panic!("expected a float, got {:?}", other),
    }
}

#[test]
fn test_negative_zero_keeps_its_sign() {
    let host = FakeHost::new();
    match round_trip(&host, Value::Float(-0.0)) {
        Value::Float(f) => assert_eq!(f.to_bits(), (-0.0f64).to_bits()),
        other => panic!("expected a float, got {:?}", other),
    }
}

#[test]
fn test_inline_math_round_trips() {
    let host = FakeHost::new();
    let values = [
        Value::Vector2(Vector2 { x: 1.5, y: -2.0 }),
        Value::Vector3(Vector3 { x: 0.0, y: 1.0, z: f32::MAX }),
        Value::Vector4(Vector4 { x: 1.0, y: 2.0, z: 3.0, w: 4.0 }),
        Value::Color(Color::rgb(0.25, 0.5, 1.0)),
        Value::Aabb(Aabb {
            position: Vector3 { x: -1.0, y: -1.0, z: -1.0 },
            size: Vector3 { x: 2.0, y: 2.0, z: 2.0 },
        }),
    ];
    for value in values {
        assert_eq!(round_trip(&host, value.clone()), value);
    }
}

#[test]
fn test_boxed_math_round_trips() {
    let host = FakeHost::new();
    let basis = Basis::default();
    let transform = Transform3D {
        basis,
        origin: Vector3 { x: 10.0, y: 20.0, z: 30.0 },
    };
    let projection = Projection {
        columns: [
            Vector4 { x: 1.0, y: 0.0, z: 0.0, w: 0.0 },
            Vector4 { x: 0.0, y: 1.0, z: 0.0, w: 0.0 },
            Vector4 { x: 0.0, y: 0.0, z: 1.0, w: -1.0 },
            Vector4 { x: 0.0, y: 0.0, z: 0.5, w: 0.0 },
        ],
    };
    assert_eq!(round_trip(&host, Value::Basis(basis)), Value::Basis(basis));
    assert_eq!(
        round_trip(&host, Value::Transform3D(transform)),
        Value::Transform3D(transform)
    );
    assert_eq!(
        round_trip(&host, Value::Projection(projection)),
        Value::Projection(projection)
    );
}

#[test]
fn test_string_round_trips() {
    let host = FakeHost::new();
    for text in ["", "hello", "héllo wörld ✓", "line\nbreak\0nul"] {
        for value in [
            Value::String(text.to_string()),
            Value::StringName(text.to_string()),
            Value::NodePath(text.to_string()),
        ] {
            assert_eq!(round_trip(&host, value.clone()), value);
        }
    }
}

#[test]
fn test_container_round_trips() {
    let host = FakeHost::new();
    let nested = Value::Array(vec![
        Value::Int(1),
        Value::String("two".into()),
        Value::Array(vec![Value::Bool(true), Value::Nil]),
        Value::Dictionary(vec![(Value::String("k".into()), Value::Float(3.0))]),
    ]);
    assert_eq!(round_trip(&host, nested.clone()), nested);

    let dict = Value::Dictionary(vec![
        (Value::Int(1), Value::String("one".into())),
        (Value::String("list".into()), Value::Array(vec![Value::Int(2)])),
    ]);
    assert_eq!(round_trip(&host, dict.clone()), dict);
    assert_eq!(round_trip(&host, Value::Array(vec![])), Value::Array(vec![]));
}

#[test]
fn test_packed_array_round_trips() {
    let host = FakeHost::new();
    let values = [
        Value::PackedByteArray(vec![0, 127, 255]),
        Value::PackedInt32Array(vec![i32::MIN, 0, i32::MAX]),
        Value::PackedInt64Array(vec![i64::MIN, i64::MAX]),
        Value::PackedFloat32Array(vec![0.5, -1.25]),
        Value::PackedFloat64Array(vec![1e300, -0.0]),
        Value::PackedStringArray(vec!["a".into(), "".into(), "ccc".into()]),
        Value::PackedVector2Array(vec![Vector2 { x: 1.0, y: 2.0 }]),
        Value::PackedColorArray(vec![Color::rgb(1.0, 0.0, 0.0)]),
    ];
    for value in values {
        assert_eq!(round_trip(&host, value.clone()), value);
    }
}

#[test]
fn test_callable_decodes_to_opaque_copy() {
    let host = FakeHost::new();
    let ctx = host.context();
    let callable = ctx.callables().create(|_| Ok(Value::Nil)).unwrap();
    let value = ctx.codec().decode(&callable).unwrap();
    let Value::Callable(opaque) = &value else {
        panic!("expected a callable, got {:?}", value);
    };
    assert_eq!(opaque.kind, VariantType::Callable);
    assert_ne!(opaque.words[0], callable.payload()[0]);

    let again = ctx.codec().encode(&value).unwrap();
    assert_eq!(again.kind(), VariantType::Callable);
}

// ===== Ownership =====

#[test]
fn test_owned_value_destroyed_exactly_once() {
    let host = FakeHost::new();
    let ctx = host.context();
    let variant = ctx.codec().encode(&Value::String("owned".into())).unwrap();
    let word = variant.payload()[0];
    assert_eq!(variant.pointer().ownership(), Ownership::Owned);

    drop(variant);
    assert_eq!(host.state.destroy_count(word), 0);
    ctx.cycle();
    assert_eq!(host.state.destroy_count(word), 1);
    ctx.cycle();
    ctx.cycle();
    assert_eq!(host.state.destroy_count(word), 1);
}

#[test]
fn test_referenced_value_survives_sweep() {
    let host = FakeHost::new();
    let ctx = host.context();
    let variant = ctx.codec().encode(&Value::String("kept".into())).unwrap();
    let word = variant.payload()[0];
    ctx.cycle();
    ctx.cycle();
    assert_eq!(host.state.destroy_count(word), 0);
    assert_eq!(ctx.codec().decode(&variant).unwrap(), Value::String("kept".into()));
}

#[test]
fn test_borrowed_value_never_destroyed() {
    let host = FakeHost::new();
    let ctx = host.context();
    let word = host.state.alloc(HostValue::Str("host owned".into()));
    let raw = RawVariant::new(VariantType::String, [word, 0, 0]);

    let view = ctx.codec().borrow_raw(raw);
    assert_eq!(view.pointer().ownership(), Ownership::Borrowed);
    assert_eq!(ctx.codec().decode(&view).unwrap(), Value::String("host owned".into()));
    drop(view);
    ctx.cycle();
    ctx.cycle();
    assert_eq!(host.state.destroy_count(word), 0);
    assert!(host.state.cell(word).is_some());
}

#[test]
fn test_into_raw_hands_value_to_host() {
    let host = FakeHost::new();
    let ctx = host.context();
    let variant = ctx.codec().encode(&Value::String("given".into())).unwrap();
    let raw = variant.into_raw();
    ctx.cycle();
    assert_eq!(host.state.destroy_count(raw.payload[0]), 0);
    assert_eq!(host.state.text(raw.payload[0]), "given");
}

#[test]
fn test_decode_releases_every_temporary() {
    let host = FakeHost::new();
    let ctx = host.context();
    let value = Value::Dictionary(vec![
        (Value::String("a".into()), Value::Array(vec![Value::String("x".into())])),
        (Value::String("b".into()), Value::PackedStringArray(vec!["y".into()])),
    ]);
    let variant = ctx.codec().encode(&value).unwrap();
    assert_eq!(ctx.codec().decode(&variant).unwrap(), value);
    drop(variant);

    ctx.initialize(gdbridge_sdk::InitializationLevel::Scene);
    let report = ctx
        .deinitialize(gdbridge_sdk::InitializationLevel::Scene)
        .unwrap();
    assert_eq!(report.leftover, 0);
    assert!(host.state.double_frees().is_empty());
    assert_eq!(host.state.live_cells(), 0);
    assert_eq!(ctx.pointers().stats().live, 0);
}

// ===== Generic operations =====

#[test]
fn test_construct_then_call_length() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let source = codec.encode(&Value::String("a".into())).unwrap();
    let string = codec.construct(VariantType::String, &[&source]).unwrap();
    let length = codec.call(&string, "length", &[]).unwrap();
    assert_eq!(codec.decode(&length).unwrap(), Value::Int(1));
}

#[test]
fn test_construct_error_is_structured() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let int = codec.encode(&Value::Int(3)).unwrap();
    let err = codec.construct(VariantType::String, &[&int]).unwrap_err();
    let BridgeError::Call(call) = err else {
        panic!("expected a call error, got {:?}", err);
    };
    assert_eq!(call.kind(), CallErrorKind::InvalidArgument);
    assert_eq!(call.argument, 0);
}

#[test]
fn test_unknown_method_is_invalid_method() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let string = codec.encode(&Value::String("s".into())).unwrap();
    let err = codec.call(&string, "no_such_method", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::Call(e) if e.kind() == CallErrorKind::InvalidMethod));
}

#[test]
fn test_call_mutates_container_in_place() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let array = codec.construct(VariantType::Array, &[]).unwrap();
    let item = codec.encode(&Value::Int(7)).unwrap();
    codec.call(&array, "append", &[&item]).unwrap();
    codec.call(&array, "append", &[&item]).unwrap();
    assert_eq!(
        codec.decode(&array).unwrap(),
        Value::Array(vec![Value::Int(7), Value::Int(7)])
    );
}

#[test]
fn test_call_static() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let code = codec.encode(&Value::Int(65)).unwrap();
    let result = codec.call_static(VariantType::String, "chr", &[&code]).unwrap();
    assert_eq!(codec.decode(&result).unwrap(), Value::String("A".into()));
}

#[test]
fn test_evaluate() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let a = codec.encode(&Value::Int(40)).unwrap();
    let b = codec.encode(&Value::Int(2)).unwrap();
    let sum = codec.evaluate(Operator::Add, &a, &b).unwrap();
    assert_eq!(codec.decode(&sum).unwrap(), Value::Int(42));

    let l = codec.encode(&Value::String("ab".into())).unwrap();
    let r = codec.encode(&Value::String("cd".into())).unwrap();
    let joined = codec.evaluate(Operator::Add, &l, &r).unwrap();
    assert_eq!(codec.decode(&joined).unwrap(), Value::String("abcd".into()));

    let eq = codec.evaluate(Operator::Equal, &a, &a).unwrap();
    assert_eq!(codec.decode(&eq).unwrap(), Value::Bool(true));

    let err = codec.evaluate(Operator::Multiply, &a, &l).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InvalidOperator { left: VariantType::Int, right: VariantType::String, .. }
    ));
}

#[test]
fn test_indexed_access() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let array = codec
        .encode(&Value::Array(vec![Value::Int(1), Value::Int(2)]))
        .unwrap();
    let second = codec.get_indexed(&array, 1).unwrap();
    assert_eq!(codec.decode(&second).unwrap(), Value::Int(2));

    let nine = codec.encode(&Value::Int(9)).unwrap();
    codec.set_indexed(&array, 0, &nine).unwrap();
    assert_eq!(
        codec.decode(&array).unwrap(),
        Value::Array(vec![Value::Int(9), Value::Int(2)])
    );

    assert!(matches!(
        codec.get_indexed(&array, 5),
        Err(BridgeError::IndexOutOfBounds { kind: VariantType::Array, index: 5 })
    ));
    assert!(matches!(
        codec.set_indexed(&array, -1, &nine),
        Err(BridgeError::IndexOutOfBounds { .. })
    ));
    let int = codec.encode(&Value::Int(1)).unwrap();
    assert!(matches!(
        codec.get_indexed(&int, 0),
        Err(BridgeError::InvalidAccess(VariantType::Int))
    ));
}

#[test]
fn test_keyed_access() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let dict = codec.construct(VariantType::Dictionary, &[]).unwrap();
    let key = codec.encode(&Value::String("hp".into())).unwrap();
    let value = codec.encode(&Value::Int(100)).unwrap();
    codec.set_keyed(&dict, &key, &value).unwrap();

    let got = codec.get_keyed(&dict, &key).unwrap();
    assert_eq!(codec.decode(&got).unwrap(), Value::Int(100));

    let missing = codec.encode(&Value::String("mp".into())).unwrap();
    assert!(matches!(
        codec.get_keyed(&dict, &missing),
        Err(BridgeError::InvalidAccess(VariantType::Dictionary))
    ));
}

#[test]
fn test_named_access() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let v = codec
        .encode(&Value::Vector2(Vector2 { x: 1.0, y: 2.0 }))
        .unwrap();
    let y = codec.get_named(&v, "y").unwrap();
    assert_eq!(codec.decode(&y).unwrap(), Value::Float(2.0));

    let x = codec.encode(&Value::Float(5.0)).unwrap();
    codec.set_named(&v, "x", &x).unwrap();
    assert_eq!(
        codec.decode(&v).unwrap(),
        Value::Vector2(Vector2 { x: 5.0, y: 2.0 })
    );
    assert!(matches!(
        codec.get_named(&v, "z"),
        Err(BridgeError::InvalidAccess(VariantType::Vector2))
    ));
}

#[test]
fn test_stringify_hash_booleanize() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let list = codec
        .encode(&Value::Array(vec![Value::Int(1), Value::String("a".into())]))
        .unwrap();
    assert_eq!(codec.stringify(&list), "[1, a]");

    let a = codec.encode(&Value::String("same".into())).unwrap();
    let b = codec.encode(&Value::String("same".into())).unwrap();
    assert_eq!(codec.hash(&a), codec.hash(&b));

    let empty = codec.encode(&Value::String(String::new())).unwrap();
    assert!(codec.booleanize(&a));
    assert!(!codec.booleanize(&empty));
    assert!(!codec.booleanize(&codec.nil()));
}

#[test]
fn test_copy_is_independent() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let original = codec.encode(&Value::String("copy me".into())).unwrap();
    let copy = codec.copy(&original).unwrap();
    assert_ne!(copy.payload()[0], original.payload()[0]);
    let word = original.payload()[0];
    drop(original);
    ctx.cycle();
    assert_eq!(host.state.destroy_count(word), 1);
    assert_eq!(codec.decode(&copy).unwrap(), Value::String("copy me".into()));
}

#[test]
fn test_append_string_in_place() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let target = codec.string("foo");
    codec.append_string(&target, "bar");
    assert_eq!(codec.read_string(target.word()), "foobar");
}

// ===== Typed entry points =====

#[test]
fn test_builtin_method() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let s = codec.encode(&Value::String("four".into())).unwrap();
    let len = codec
        .call_builtin(VariantType::String, "length", 0, Some(&s), &[], VariantType::Int)
        .unwrap();
    assert_eq!(codec.decode(&len).unwrap(), Value::Int(4));

    assert!(matches!(
        codec.call_builtin(VariantType::String, "nope", 0, Some(&s), &[], VariantType::Int),
        Err(BridgeError::MethodNotFound { .. })
    ));
    let int = codec.encode(&Value::Int(1)).unwrap();
    assert!(matches!(
        codec.call_builtin(VariantType::String, "length", 0, Some(&int), &[], VariantType::Int),
        Err(BridgeError::TypeMismatch { expected: VariantType::String, got: VariantType::Int })
    ));
}

#[test]
fn test_typed_evaluator() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let a = codec.encode(&Value::Int(-3)).unwrap();
    let b = codec.encode(&Value::Int(10)).unwrap();
    let sum = codec
        .evaluate_typed(Operator::Add, &a, &b, VariantType::Int)
        .unwrap();
    assert_eq!(codec.decode(&sum).unwrap(), Value::Int(7));

    let f = codec.encode(&Value::Float(1.0)).unwrap();
    assert!(matches!(
        codec.evaluate_typed(Operator::Add, &a, &f, VariantType::Float),
        Err(BridgeError::InvalidOperator { .. })
    ));
}

#[test]
fn test_utility_function() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let args: Vec<_> = [3, 11, 7]
        .iter()
        .map(|&i| codec.encode(&Value::Int(i)).unwrap())
        .collect();
    let refs: Vec<_> = args.iter().collect();
    let max = codec.call_utility("max", 0, &refs).unwrap();
    assert_eq!(codec.decode(&max).unwrap(), Value::Int(11));
    assert!(matches!(
        codec.call_utility("nope", 0, &refs),
        Err(BridgeError::MethodNotFound { .. })
    ));
}

#[test]
fn test_method_names_are_interned() {
    let host = FakeHost::new();
    let ctx = host.context();
    let codec = ctx.codec();
    let s = codec.encode(&Value::String("x".into())).unwrap();
    codec.call(&s, "length", &[]).unwrap();
    codec.call(&s, "length", &[]).unwrap();
    codec.call(&s, "to_upper", &[]).unwrap();
    assert_eq!(codec.interned(), 2);
    assert_eq!(ctx.pointers().stats().pinned, 2);
    assert_eq!(codec.release_names(), 2);
    assert_eq!(ctx.pointers().stats().pinned, 0);
}
