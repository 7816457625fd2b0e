// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.


macro_rules! pydict {
    ($($k:expr => $v:expr),* $(,)?) => {
        $crate::Value::dict(vec![$(($k, $v)),*])
    };
}

fn hstr(s: &str) -> crate::HashableValue {
    crate::HashableValue::String(s.into())
}

fn items(value: &crate::Value) -> Vec<crate::Value> {
    match *value {
        crate::Value::List(ref l) => l.borrow().clone(),
        crate::Value::Tuple(ref t) => t.to_vec(),
        ref other => panic!("expected a sequence, got {}", other),
    }
}

fn opnames(data: &[u8]) -> Vec<&'static str> {
    crate::ops::genops(data).map(|op| op.unwrap().info.name).collect()
}

mod struct_tests {
    use std::fmt;
    use serde::ser;
    use serde_derive::{Deserialize, Serialize};
    use crate::{from_slice, to_vec, value_from_slice, DeOptions, SerOptions, Value};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Inner {
        a: (),
        b: usize,
        c: Vec<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Outer {
        inner: Vec<Inner>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Unit;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Newtype(i32);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Tuple(i32, bool);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    enum Animal {
        Dog,
        AntHive(Vec<String>),
        Frog(String, Vec<isize>),
        Cat { age: usize, name: String },
    }

    fn test_encode_ok<T>(value: T, repr: &'static str)
        where T: PartialEq + fmt::Debug + ser::Serialize,
    {
        for proto in 0..=5 {
            let vec = to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            let val: Value = value_from_slice(&vec, DeOptions::new()).unwrap();
            let ser_fmt = format!("{}", val);
            assert_eq!(ser_fmt, repr, "protocol {}", proto);
        }
    }

    fn test_roundtrip<T>(value: T)
        where T: PartialEq + fmt::Debug + ser::Serialize + serde::de::DeserializeOwned,
    {
        for proto in 0..=5 {
            let vec = to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            let tripped: T = from_slice(&vec, DeOptions::new()).unwrap();
            assert_eq!(tripped, value, "protocol {}", proto);
        }
    }

    #[test]
    fn encode_types() {
        test_encode_ok((), "None");
        test_encode_ok(None::<i32>, "None");
        test_encode_ok(Some(false), "False");
        test_encode_ok(4.5_f64, "4.5");
        test_encode_ok(u64::MAX, "18446744073709551615");
        test_encode_ok('x', "\"x\"");
        test_encode_ok((1, "two"), "(1, \"two\")");
    }

    #[test]
    fn encode_struct() {
        test_encode_ok(Unit,
                       r#"()"#);
        test_encode_ok(Newtype(42),
                       r#"42"#);
        test_encode_ok(Tuple(42, false),
                       r#"(42, False)"#);
        test_encode_ok(Inner { a: (), b: 32, c: vec!["doc".into()] },
                       r#"{"a": None, "b": 32, "c": ["doc"]}"#);
    }

    #[test]
    fn encode_enum() {
        test_encode_ok(Animal::Dog,
                       r#"("Dog",)"#);
        test_encode_ok(Animal::AntHive(vec!["ant".into(), "aunt".into()]),
                       r#"("AntHive", ["ant", "aunt"])"#);
        test_encode_ok(Animal::Frog("Henry".into(), vec![1, 5]),
                       r#"("Frog", ["Henry", [1, 5]])"#);
        test_encode_ok(Animal::Cat { age: 5, name: "Molyneux".into() },
                       r#"("Cat", {"age": 5, "name": "Molyneux"})"#);
    }

    #[test]
    fn roundtrip_structs() {
        test_roundtrip(Unit);
        test_roundtrip(Newtype(-7));
        test_roundtrip(Tuple(1, true));
        test_roundtrip(Outer { inner: vec![
            Inner { a: (), b: 0, c: vec![] },
            Inner { a: (), b: 1 << 40, c: vec!["x".into(), "\u{20ac}".into()] },
        ] });
        test_roundtrip(Animal::Dog);
        test_roundtrip(Animal::AntHive(vec!["ant".into()]));
        test_roundtrip(Animal::Frog("Henry".into(), vec![-1, 5]));
        test_roundtrip(Animal::Cat { age: 5, name: "Molyneux".into() });
    }

    #[test]
    fn decode_enum_spellings() {
        // Unit variant as a plain string, others as single-entry dicts.
        let dog: Animal = from_slice(b"\x80\x03X\x03\x00\x00\x00Dogq\x00.", DeOptions::new()).unwrap();
        assert_eq!(dog, Animal::Dog);
        let cat = pydict! {
            super::hstr("Cat") => pydict! {
                super::hstr("age") => Value::I64(3),
                super::hstr("name") => Value::String("Tom".into()),
            },
        };
        let bytes = crate::value_to_vec(&cat, SerOptions::new()).unwrap();
        let cat: Animal = from_slice(&bytes, DeOptions::new()).unwrap();
        assert_eq!(cat, Animal::Cat { age: 3, name: "Tom".into() });
    }

    #[test]
    fn decode_unknown_field() {
        let bytes = to_vec(&("Cat", pydict_of_cat()), SerOptions::new()).unwrap();
        assert!(from_slice::<Animal>(&bytes, DeOptions::new()).is_err());
    }

    fn pydict_of_cat() -> std::collections::BTreeMap<String, usize> {
        vec![("age".to_string(), 1), ("legs".to_string(), 4)].into_iter().collect()
    }
}

mod value_tests {
    use std::collections::BTreeSet;
    use std::iter::FromIterator;
    use std::rc::Rc;
    use num_bigint::BigInt;
    use rand::{thread_rng, Rng, RngCore};
    use quickcheck::{QuickCheck, StdGen};
    use crate::{from_slice, to_vec, value_from_iter, value_from_reader, value_from_slice,
                value_to_vec, from_value, to_value};
    use crate::{DeOptions, Global, HashableValue, Init, Object, SerOptions, Value};
    use crate::error::{Error, ErrorCode};
    use super::arby::Tree;
    use super::{hstr, opnames};

    fn get_test_object() -> Value {
        let longish = BigInt::from(10000000000u64) * BigInt::from(10000000000u64);
        let set = BTreeSet::from_iter(vec![HashableValue::I64(42), HashableValue::I64(0)]);
        let point = Rc::new(Global::new("__main__", "Point"));
        let mut object = Object::new(point);
        object.state = Some(pydict! { hstr("x") => Value::I64(1), hstr("y") => Value::F64(-2.5) });
        pydict! {
            HashableValue::None => Value::None,
            HashableValue::Bool(false) => Value::tuple(vec![Value::Bool(false), Value::Bool(true)]),
            HashableValue::I64(10) => Value::I64(100000),
            HashableValue::Int(longish.clone()) => Value::Int(-longish),
            HashableValue::F64(1.0) => Value::F64(1.0),
            HashableValue::Bytes(b"bytes".to_vec()) => Value::Bytes(b"by\x00\xfftes".to_vec()),
            HashableValue::String("string".into()) => Value::String("str\u{e9}\u{1f600}\n".into()),
            HashableValue::FrozenSet(set.clone()) => Value::FrozenSet(Rc::new(set.clone())),
            HashableValue::Tuple(vec![HashableValue::I64(1), HashableValue::I64(2)]) =>
                Value::tuple(vec![Value::I64(1), Value::I64(2), Value::I64(3), Value::I64(4)]),
            HashableValue::Tuple(vec![]) =>
                Value::list(vec![
                    Value::list(vec![Value::I64(1), Value::I64(2), Value::I64(3)]),
                    Value::Set(Rc::new(std::cell::RefCell::new(set))),
                    pydict! {},
                    Value::Bytes(vec![]),
                ]),
            hstr("object") => Value::object(object),
            hstr("class") => Value::global("collections", "OrderedDict"),
        }
    }

    #[test]
    fn roundtrip() {
        let dict = get_test_object();
        for proto in 0..=5 {
            let vec = value_to_vec(&dict, SerOptions::new().proto(proto)).unwrap();
            let tripped = value_from_slice(&vec, DeOptions::new()).unwrap();
            assert_eq!(dict, tripped, "protocol {}", proto);
        }
    }

    #[test]
    fn roundtrip_readers() {
        let dict = get_test_object();
        let vec = value_to_vec(&dict, SerOptions::new().highest_protocol()).unwrap();
        let from_reader = value_from_reader(&vec[..], DeOptions::new()).unwrap();
        let from_iter = value_from_iter(vec.iter().map(|&b| Ok(b)), DeOptions::new()).unwrap();
        assert_eq!(dict, from_reader);
        assert_eq!(dict, from_iter);
    }

    #[test]
    fn known_encodings() {
        let one = Value::list(vec![Value::I64(1)]);
        assert_eq!(value_to_vec(&one, SerOptions::new()).unwrap(), b"\x80\x03]q\x00K\x01a.");
        assert_eq!(value_to_vec(&one, SerOptions::new().proto(4)).unwrap(),
                   b"\x80\x04\x95\x06\x00\x00\x00\x00\x00\x00\x00]\x94K\x01a.");
        let two = Value::list(vec![Value::I64(1), Value::String("a".into())]);
        assert_eq!(value_to_vec(&two, SerOptions::new().proto(0)).unwrap(), b"(lp0\nI1\naVa\na.");
        assert_eq!(value_to_vec(&Value::Bool(true), SerOptions::new().proto(1)).unwrap(),
                   b"I01\n.");
        assert_eq!(value_to_vec(&Value::None, SerOptions::new().proto(2)).unwrap(), b"\x80\x02N.");
    }

    #[test]
    fn integer_opcodes() {
        let cases: &[(i64, &str)] = &[
            (0, "BININT1"), (255, "BININT1"), (256, "BININT2"), (65535, "BININT2"),
            (65536, "BININT"), (-1, "BININT"), (i32::MIN as i64, "BININT"),
            (i32::MAX as i64 + 1, "LONG1"), (i64::MIN, "LONG1"),
        ];
        for &(i, name) in cases {
            let bytes = value_to_vec(&Value::I64(i), SerOptions::new().proto(2)).unwrap();
            assert_eq!(opnames(&bytes)[1], name, "{}", i);
            for proto in 0..=5 {
                let bytes = value_to_vec(&Value::I64(i), SerOptions::new().proto(proto)).unwrap();
                assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), Value::I64(i));
            }
        }
        let bytes = value_to_vec(&Value::I64(1 << 40), SerOptions::new().proto(0)).unwrap();
        assert_eq!(bytes, b"L1099511627776L\n.");
        let huge = Value::Int(BigInt::from(1) << 3000);
        let bytes = value_to_vec(&huge, SerOptions::new().proto(2)).unwrap();
        assert_eq!(opnames(&bytes)[1], "LONG4");
        assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), huge);
    }

    #[test]
    fn text_floats() {
        let bytes = value_to_vec(&Value::F64(1e100), SerOptions::new().proto(0)).unwrap();
        assert_eq!(bytes, b"F1e+100\n.");
        for &f in &[0.1, -0.0, 1.5e-300, std::f64::INFINITY] {
            let bytes = value_to_vec(&Value::F64(f), SerOptions::new().proto(0)).unwrap();
            assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), Value::F64(f));
        }
        match value_from_slice(b"Fnan\n.", DeOptions::new()).unwrap() {
            Value::F64(f) => assert!(f.is_nan()),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn python2_strings() {
        let bytes = b"S'a\\x41\\101\\q'\n.";
        assert_eq!(value_from_slice(bytes, DeOptions::new()).unwrap(),
                   Value::Bytes(b"aAA\\q".to_vec()));
        assert_eq!(value_from_slice(bytes, DeOptions::new().decode_strings()).unwrap(),
                   Value::String("aAA\\q".into()));
        assert_eq!(value_from_slice(b"U\x03abc.", DeOptions::new().decode_strings()).unwrap(),
                   Value::String("abc".into()));
        assert!(value_from_slice(b"U\x02\xff\xfe.", DeOptions::new().decode_strings()).is_err());
        assert_eq!(value_from_slice(b"Vcaf\xe9 \\u20ac\n.", DeOptions::new()).unwrap(),
                   Value::String("caf\u{e9} \u{20ac}".into()));
    }

    #[test]
    fn bytes_for_python2() {
        // Protocols below 3 spell bytes with _codecs.encode.
        let value = Value::Bytes(b"\x00\x80\xff".to_vec());
        let bytes = value_to_vec(&value, SerOptions::new().proto(2)).unwrap();
        assert!(opnames(&bytes).contains(&"REDUCE"));
        assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), value);
    }

    #[test]
    fn fuzzing() {
        // Tries to ensure that we don't panic when encountering strange streams.
        for _ in 0..1000 {
            let mut stream = [0u8; 1000];
            thread_rng().fill_bytes(&mut stream);
            if *stream.last().unwrap() == b'.' { continue; }
            // These must all fail with an error, since we skip the check if the
            // last byte is a STOP opcode.
            assert!(value_from_slice(&stream, DeOptions::new()).is_err());
            assert!(value_from_slice(&stream, DeOptions::new().lenient_memo()).is_err());
        }
    }

    #[test]
    fn fuzzing_mutations() {
        // Corrupt single bytes of a valid pickle; anything may come out,
        // but nothing may panic.
        let mut rng = thread_rng();
        for proto in 0..=5 {
            let valid = value_to_vec(&get_test_object(), SerOptions::new().proto(proto)).unwrap();
            for _ in 0..300 {
                let mut stream = valid.clone();
                let idx = rng.gen_range(0, stream.len());
                stream[idx] = rng.gen();
                let _ = value_from_slice(&stream, DeOptions::new());
                let _ = crate::ops::dis(&stream, &mut String::new());
            }
        }
    }

    #[test]
    fn int_width_grows_with_magnitude() {
        for proto in 0..=5 {
            let mut last = 0;
            for n in 0..200usize {
                let value = Value::Int(BigInt::from(1) << n);
                let len = value_to_vec(&value, SerOptions::new().proto(proto)).unwrap().len();
                assert!(len >= last, "protocol {}, 2**{}", proto, n);
                last = len;
            }
        }
    }

    #[test]
    fn small_ints_at_protocol_2() {
        let ints = [0, 1, 1, -1, 255, -255, -256, 256, 65535, 65536,
                    i32::MIN as i64, i32::MAX as i64];
        let mut elements: Vec<Value> = ints.iter().cloned().map(Value::I64).collect();
        elements.insert(2, Value::F64(2.0));
        let value = Value::list(elements);
        let bytes = value_to_vec(&value, SerOptions::new().proto(2)).unwrap();
        assert_eq!(&bytes[..2], b"\x80\x02");
        assert!(opnames(&bytes).iter().all(|name| !["LONG", "LONG1", "LONG4"].contains(name)));
        let decoded = value_from_slice(&bytes, DeOptions::new()).unwrap();
        assert_eq!(decoded, value);
        assert!(matches!(super::items(&decoded)[2], Value::F64(_)));
    }

    #[test]
    fn qc_roundtrip() {
        fn roundtrip(original: Tree, proto: u8) {
            let original = original.to_value();
            let options = SerOptions::new().proto(proto % 6);
            let vec: Vec<_> = value_to_vec(&original, options).unwrap();
            let tripped = value_from_slice(&vec, DeOptions::new()).unwrap();
            assert_eq!(original, tripped);
        }
        QuickCheck::new().gen(StdGen::new(thread_rng(), 10))
                         .tests(5000)
                         .quickcheck(roundtrip as fn(_, _));
    }

    #[test]
    fn roundtrip_json() {
        let original: serde_json::Value = serde_json::from_str(r#"[
            {"null": null,
             "false": false,
             "true": true,
             "int": -1238571,
             "float": 1.5e10,
             "list": [false, 5, "true", 3.8]
            }
        ]"#).unwrap();
        for proto in 0..=5 {
            let vec: Vec<_> = to_vec(&original, SerOptions::new().proto(proto)).unwrap();
            let tripped: serde_json::Value = from_slice(&vec, DeOptions::new()).unwrap();
            assert_eq!(original, tripped);
        }
    }

    #[test]
    fn value_conversions() {
        let value = to_value(&vec![(1, "a".to_string())]).unwrap();
        assert_eq!(format!("{}", value), r#"[(1, "a")]"#);
        let back: Vec<(i32, String)> = from_value(value).unwrap();
        assert_eq!(back, vec![(1, "a".to_string())]);

        // Instances are replaced by their state.
        let mut object = Object::with_init(Rc::new(Global::new("m", "C")), Init::Call(vec![]));
        object.state = Some(pydict! { hstr("n") => Value::I64(7) });
        let state: std::collections::BTreeMap<String, i64> =
            from_value(Value::object(object)).unwrap();
        assert_eq!(state.get("n"), Some(&7));
    }

    #[test]
    fn recursive_from_value() {
        let list = Value::list(vec![]);
        if let Value::List(ref l) = list {
            l.borrow_mut().push(list.clone());
        }
        match from_value::<serde_json::Value>(list.clone()) {
            Err(Error::Syntax(ErrorCode::Recursive)) => { }
            other => panic!("wrong/no error returned for recursive structure: {:?}", other),
        }
        // Sharing without a cycle is fine.
        let inner = Value::list(vec![Value::I64(1)]);
        let shared = Value::tuple(vec![inner.clone(), inner]);
        let tree: Vec<Vec<i64>> = from_value(shared).unwrap();
        assert_eq!(tree, vec![vec![1], vec![1]]);
        // Break the cycle so the list is freed.
        if let Value::List(ref l) = list {
            l.borrow_mut().clear();
        }
    }

    #[test]
    fn display() {
        let value = pydict! {
            hstr("b") => Value::Bytes(b"a'\x01".to_vec()),
            hstr("t") => Value::tuple(vec![Value::None]),
            hstr("s") => Value::set(vec![]),
            hstr("f") => Value::frozenset(vec![HashableValue::I64(1)]),
            hstr("g") => Value::global("builtins", "len"),
        };
        assert_eq!(format!("{}", value),
                   r#"{"b": b'a\'\x01', "f": frozenset([1]), "g": builtins.len, "s": set(), "t": (None,)}"#);
    }
}

mod graph_tests {
    use std::rc::Rc;
    use crate::{value_from_slice, value_to_vec, DeOptions, Global, HashableValue, Object,
                SerOptions, Value};
    use super::{hstr, items, opnames};

    fn roundtrip(value: &Value, proto: u8) -> Value {
        let bytes = value_to_vec(value, SerOptions::new().proto(proto)).unwrap();
        value_from_slice(&bytes, DeOptions::new()).unwrap()
    }

    fn self_list() -> Value {
        let list = Value::list(vec![Value::I64(1)]);
        if let Value::List(ref l) = list {
            l.borrow_mut().push(list.clone());
        }
        list
    }

    #[test]
    fn shared_references() {
        let inner = Value::list(vec![Value::I64(1)]);
        let outer = Value::tuple(vec![inner.clone(), inner]);
        let bytes = value_to_vec(&outer, SerOptions::new().proto(2)).unwrap();
        assert_eq!(bytes, b"\x80\x02]q\x00K\x01ah\x00\x86q\x01.");
        for proto in 0..=5 {
            let decoded = roundtrip(&outer, proto);
            let parts = items(&decoded);
            assert!(parts[0].is(&parts[1]), "protocol {}", proto);
            assert_eq!(items(&parts[0]), vec![Value::I64(1)]);
        }
    }

    #[test]
    fn shared_containers_of_every_kind() {
        let dict = pydict! { hstr("k") => Value::None };
        let set = Value::set(vec![HashableValue::I64(1)]);
        let frozen = Value::frozenset(vec![HashableValue::I64(2)]);
        let object = Value::object(Object::new(Rc::new(Global::new("m", "C"))));
        let global = Value::global("m", "f");
        let shared = vec![dict, set, frozen, object, global];
        let mut doubled = vec![];
        for v in &shared {
            doubled.push(v.clone());
            doubled.push(v.clone());
        }
        let value = Value::list(doubled);
        for proto in 0..=5 {
            let decoded = items(&roundtrip(&value, proto));
            for pair in decoded.chunks(2) {
                assert!(pair[0].is(&pair[1]), "protocol {}: {}", proto, pair[0]);
            }
        }
    }

    #[test]
    fn recursive_list() {
        let list = Value::list(vec![]);
        if let Value::List(ref l) = list {
            l.borrow_mut().push(list.clone());
        }
        let bytes = value_to_vec(&list, SerOptions::new().proto(2)).unwrap();
        assert_eq!(bytes, b"\x80\x02]q\x00h\x00a.");
        for proto in 0..=5 {
            let decoded = roundtrip(&list, proto);
            assert!(items(&decoded)[0].is(&decoded));
            assert_eq!(format!("{}", decoded), "[[...]]");
        }
        assert_eq!(format!("{}", self_list()), "[1, [...]]");
    }

    #[test]
    fn recursive_dict() {
        let dict = pydict! {};
        if let Value::Dict(ref d) = dict {
            d.borrow_mut().insert(hstr("self"), dict.clone());
        }
        for proto in 0..=5 {
            let decoded = roundtrip(&dict, proto);
            match decoded {
                Value::Dict(ref d) => assert!(d.borrow()[&hstr("self")].is(&decoded)),
                ref other => panic!("expected dict, got {}", other),
            }
        }
    }

    #[test]
    fn recursive_tuple() {
        // t = ([],); t[0].append(t)
        let list = Value::list(vec![]);
        let tuple = Value::tuple(vec![list.clone()]);
        if let Value::List(ref l) = list {
            l.borrow_mut().push(tuple.clone());
        }
        let bytes = value_to_vec(&tuple, SerOptions::new().proto(2)).unwrap();
        assert_eq!(bytes, b"\x80\x02]q\x00h\x00\x85q\x01a0h\x01.");
        let bytes = value_to_vec(&tuple, SerOptions::new().proto(0)).unwrap();
        assert_eq!(bytes, b"((lp0\n(g0\ntp1\na00g1\n.");
        // Longer tuples go through MARK ... TUPLE and POP_MARK.
        let long = Value::tuple(vec![list.clone(), Value::I64(1), Value::I64(2), Value::I64(3)]);
        for proto in 0..=5 {
            let decoded = roundtrip(&tuple, proto);
            let inner = items(&decoded)[0].clone();
            assert!(items(&inner)[0].is(&decoded), "protocol {}", proto);
            let decoded = roundtrip(&long, proto);
            assert_eq!(items(&decoded).len(), 4);
        }
        if let Value::List(ref l) = list {
            l.borrow_mut().clear();
        }
    }

    #[test]
    fn recursive_object() {
        let object = Value::object(Object::new(Rc::new(Global::new("__main__", "Node"))));
        if let Value::Object(ref o) = object {
            o.borrow_mut().state = Some(pydict! { hstr("me") => object.clone() });
        }
        for proto in 0..=5 {
            let decoded = roundtrip(&object, proto);
            let state = match decoded {
                Value::Object(ref o) => o.borrow().state.clone().unwrap(),
                ref other => panic!("expected object, got {}", other),
            };
            match state {
                Value::Dict(ref d) => assert!(d.borrow()[&hstr("me")].is(&decoded)),
                ref other => panic!("expected dict, got {}", other),
            }
        }
    }

    #[test]
    fn recursive_sets() {
        // A set containing an instance whose state refers back to the set.
        for &frozen in &[false, true] {
            let object = Rc::new(std::cell::RefCell::new(
                Object::new(Rc::new(Global::new("__main__", "Member")))));
            let member = vec![HashableValue::Object(object.clone())];
            let set = if frozen { Value::frozenset(member) } else { Value::set(member) };
            object.borrow_mut().state = Some(set.clone());
            for proto in 0..=5 {
                let decoded = roundtrip(&set, proto);
                let members: Vec<HashableValue> = match decoded {
                    Value::Set(ref s) => s.borrow().iter().cloned().collect(),
                    Value::FrozenSet(ref s) => s.iter().cloned().collect(),
                    ref other => panic!("expected set, got {}", other),
                };
                match members[..] {
                    [HashableValue::Object(ref o)] => {
                        let state = o.borrow().state.clone().unwrap();
                        assert!(state.is(&decoded), "protocol {} frozen {}", proto, frozen);
                    }
                    _ => panic!("expected one member"),
                }
            }
            object.borrow_mut().state = None;
        }
    }

    #[test]
    fn large_memo() {
        let lists: Vec<Value> = (0..300).map(|i| Value::list(vec![Value::I64(i)])).collect();
        let mut all = lists.clone();
        all.push(lists[299].clone());
        let value = Value::list(all);
        let bytes = value_to_vec(&value, SerOptions::new().proto(2)).unwrap();
        let names = opnames(&bytes);
        assert!(names.contains(&"LONG_BINPUT"));
        assert!(names.contains(&"LONG_BINGET"));
        let decoded = items(&value_from_slice(&bytes, DeOptions::new()).unwrap());
        assert!(decoded[299].is(&decoded[300]));
        assert_eq!(items(&decoded[299]), vec![Value::I64(299)]);
    }

    #[test]
    fn batching() {
        let count = |bytes: &[u8], name: &str| opnames(bytes).iter().filter(|&&n| n == name).count();
        let list = Value::list((0..2500).map(Value::I64).collect());
        for proto in 1..=5 {
            let bytes = value_to_vec(&list, SerOptions::new().proto(proto)).unwrap();
            assert_eq!(count(&bytes, "APPENDS"), 3, "protocol {}", proto);
            assert_eq!(count(&bytes, "APPEND"), 0);
            assert_eq!(roundtrip(&list, proto), list);
        }
        let bytes = value_to_vec(&list, SerOptions::new().proto(0)).unwrap();
        assert_eq!(count(&bytes, "APPENDS"), 0);
        assert_eq!(count(&bytes, "APPEND"), 2500);

        let dict = Value::dict((0..1001).map(|i| (HashableValue::I64(i), Value::None)));
        let bytes = value_to_vec(&dict, SerOptions::new().proto(2)).unwrap();
        assert_eq!(count(&bytes, "SETITEMS"), 1);
        assert_eq!(count(&bytes, "SETITEM"), 1);
        let bytes = value_to_vec(&dict, SerOptions::new().proto(0)).unwrap();
        assert_eq!(count(&bytes, "SETITEM"), 1001);

        let set = Value::set((0..1500).map(HashableValue::I64));
        let bytes = value_to_vec(&set, SerOptions::new().proto(4)).unwrap();
        assert_eq!(count(&bytes, "ADDITEMS"), 2);
        assert_eq!(count(&bytes, "EMPTY_SET"), 1);
        assert_eq!(roundtrip(&set, 4), set);
    }

    #[test]
    fn shared_build_state() {
        // Two instances built from the same memoized dict.
        let bytes = b"\x80\x02(c__main__\nA\n)\x81}q\x00X\x01\x00\x00\x00xK\x01sb\
                      c__main__\nA\n)\x81h\x00bl.";
        let decoded = value_from_slice(bytes, DeOptions::new()).unwrap();
        let objects = items(&decoded);
        let states: Vec<Value> = objects.iter().map(|value| match *value {
            Value::Object(ref o) => o.borrow().state.clone().unwrap(),
            ref other => panic!("expected object, got {}", other),
        }).collect();
        assert_eq!(states[0], states[1]);
        assert!(!states[0].is(&states[1]));
        if let Value::Object(ref o) = objects[0] {
            o.borrow_mut().set_state(pydict! { hstr("y") => Value::I64(2) });
        }
        assert_eq!(states[0], pydict! { hstr("x") => Value::I64(1), hstr("y") => Value::I64(2) });
        assert_eq!(states[1], pydict! { hstr("x") => Value::I64(1) });
    }

    #[test]
    fn recursion_limit() {
        let mut value = Value::list(vec![]);
        for _ in 0..600 {
            value = Value::list(vec![value]);
        }
        match value_to_vec(&value, SerOptions::new()) {
            Err(crate::Error::Encode(crate::ErrorCode::RecursionLimit(500))) => { }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        let bytes = value_to_vec(&value, SerOptions::new().recursion_limit(1000)).unwrap();
        match value_from_slice(&bytes, DeOptions::new()) {
            Err(crate::Error::Eval(crate::ErrorCode::RecursionLimit(500), _)) => { }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        let decoded = value_from_slice(&bytes, DeOptions::new().recursion_limit(1000)).unwrap();
        assert_eq!(decoded, value);
    }
}

mod stream_tests {
    use std::io::Cursor;
    use crate::consts::FRAME_SIZE_TARGET;
    use crate::ops::{genops, Arg};
    use crate::{value_from_slice, value_to_vec, DeOptions, Pickler, SerOptions, Status,
                Unpickler, Value};
    use crate::error::{Error, ErrorCode};
    use super::items;

    fn big_list() -> Value {
        Value::list((0..2000).map(|i| Value::String(format!("{:0100}", i))).collect())
    }

    #[test]
    fn frames_tile_the_stream() {
        let value = big_list();
        let bytes = value_to_vec(&value, SerOptions::new().proto(4)).unwrap();
        assert_eq!(&bytes[..2], b"\x80\x04");
        let frames: Vec<(usize, usize)> = genops(&bytes).filter_map(|op| {
            let op = op.unwrap();
            match (op.info.name, op.arg) {
                ("FRAME", Arg::Int(len)) => Some((op.pos, len as usize)),
                _ => None,
            }
        }).collect();
        assert!(frames.len() >= 3);
        assert_eq!(frames[0].0, 2);
        for pair in frames.windows(2) {
            let (pos, len) = pair[0];
            assert!(len >= FRAME_SIZE_TARGET);
            assert_eq!(pos + 9 + len, pair[1].0);
        }
        let &(pos, len) = frames.last().unwrap();
        assert_eq!(pos + 9 + len, bytes.len());
        assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), value);
    }

    #[test]
    fn frames_are_advisory() {
        let value = big_list();
        let bytes = value_to_vec(&value, SerOptions::new().proto(4)).unwrap();
        let headers: Vec<usize> = genops(&bytes).map(|op| op.unwrap())
                                                .filter(|op| op.info.name == "FRAME")
                                                .map(|op| op.pos).collect();
        let strip = |skip: &[usize]| {
            let mut out = Vec::with_capacity(bytes.len());
            let mut pos = 0;
            for &header in skip {
                out.extend_from_slice(&bytes[pos..header]);
                pos = header + 9;
            }
            out.extend_from_slice(&bytes[pos..]);
            out
        };
        assert_eq!(value_from_slice(&strip(&headers), DeOptions::new()).unwrap(), value);
        assert_eq!(value_from_slice(&strip(&headers[1..2]), DeOptions::new()).unwrap(), value);
    }

    #[test]
    fn frame_errors() {
        let good = b"\x80\x04\x95\x05\x00\x00\x00\x00\x00\x00\x00I42\n.";
        assert_eq!(value_from_slice(good, DeOptions::new()).unwrap(), Value::I64(42));
        let overrun = b"\x80\x04\x95\x02\x00\x00\x00\x00\x00\x00\x00I42\n.";
        match value_from_slice(overrun, DeOptions::new()) {
            Err(Error::Eval(ErrorCode::FrameOverrun, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
        let nested = b"\x80\x04\x95\x0a\x00\x00\x00\x00\x00\x00\x00\x95\x01\x00\x00\x00\x00\x00\x00\x00N.";
        match value_from_slice(nested, DeOptions::new()) {
            Err(Error::Eval(ErrorCode::FrameMismatch, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn feed_byte_by_byte() {
        let value = Value::tuple(vec![
            Value::String("x".repeat(300)),
            Value::list(vec![Value::F64(0.5), Value::Bytes(vec![1, 2, 3])]),
        ]);
        for proto in 0..=5 {
            let bytes = value_to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            let mut unpickler = Unpickler::new(DeOptions::new());
            let (last, head) = bytes.split_last().unwrap();
            for &byte in head {
                unpickler.feed(&[byte]);
                assert!(matches!(unpickler.poll().unwrap(), Status::Incomplete));
            }
            unpickler.feed(&[*last]);
            match unpickler.poll().unwrap() {
                Status::Complete(decoded) => assert_eq!(decoded, value),
                Status::Incomplete => panic!("protocol {}: pickle not complete", proto),
            }
            assert_eq!(unpickler.buffered(), 0);
        }
    }

    #[test]
    fn feed_framed_chunks() {
        let value = big_list();
        let bytes = value_to_vec(&value, SerOptions::new().proto(5)).unwrap();
        let mut unpickler = Unpickler::new(DeOptions::new());
        let mut result = None;
        for chunk in bytes.chunks(777) {
            assert!(result.is_none());
            unpickler.feed(chunk);
            if let Status::Complete(decoded) = unpickler.poll().unwrap() {
                result = Some(decoded);
            }
        }
        assert_eq!(result, Some(value));
    }

    #[test]
    fn truncated_after_finish() {
        let bytes = value_to_vec(&Value::list(vec![Value::None]), SerOptions::new()).unwrap();
        let mut unpickler = Unpickler::new(DeOptions::new());
        unpickler.feed(&bytes[..bytes.len() - 1]);
        assert!(matches!(unpickler.poll().unwrap(), Status::Incomplete));
        unpickler.finish();
        match unpickler.poll() {
            Err(Error::Eval(ErrorCode::EOFWhileParsing, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn memo_spans_pickles() {
        let shared = Value::list(vec![Value::I64(1)]);
        let first = value_to_vec(&shared, SerOptions::new()).unwrap();

        let mut pickler = Pickler::new(Vec::new(), SerOptions::new());
        pickler.dump(&shared).unwrap();
        pickler.dump(&shared).unwrap();
        pickler.clear_memo();
        pickler.dump(&shared).unwrap();
        let bytes = pickler.into_inner();
        assert_eq!(bytes, [&first[..], &b"\x80\x03h\x00."[..], &first[..]].concat());

        let mut unpickler = Unpickler::new(DeOptions::new());
        unpickler.feed(&bytes);
        unpickler.finish();
        let mut next = || match unpickler.poll().unwrap() {
            Status::Complete(value) => value,
            Status::Incomplete => panic!("pickle not complete"),
        };
        let one = next();
        let two = next();
        assert!(one.is(&two));
        drop(next);
        unpickler.clear_memo();
        let three = match unpickler.poll().unwrap() {
            Status::Complete(value) => value,
            Status::Incomplete => panic!("pickle not complete"),
        };
        assert_eq!(three, one);
        assert!(!three.is(&one));
        assert_eq!(unpickler.buffered(), 0);
    }

    #[test]
    fn load_from_reader() {
        let mut bytes = value_to_vec(&Value::I64(1), SerOptions::new().proto(0)).unwrap();
        bytes.extend(value_to_vec(&Value::String("two".into()), SerOptions::new()).unwrap());
        let mut reader = Cursor::new(bytes);
        let mut unpickler = Unpickler::new(DeOptions::new());
        assert_eq!(unpickler.load(&mut reader).unwrap(), Value::I64(1));
        assert_eq!(unpickler.load(&mut reader).unwrap(), Value::String("two".into()));
        unpickler.end(&mut reader).unwrap();

        let mut reader = Cursor::new(b"N.N".to_vec());
        let mut unpickler = Unpickler::new(DeOptions::new());
        assert_eq!(unpickler.load(&mut reader).unwrap(), Value::None);
        match unpickler.end(&mut reader) {
            Err(Error::Eval(ErrorCode::TrailingBytes, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn memo_strictness() {
        let ok = b"(]q\x00h\x00t.";
        let value = value_from_slice(ok, DeOptions::new()).unwrap();
        assert!(items(&value)[0].is(&items(&value)[1]));

        let sparse = b"(]q\xffh\xfft.";
        match value_from_slice(sparse, DeOptions::new()) {
            Err(Error::Eval(ErrorCode::MemoIdMismatch { expected: 0, found: 255 }, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
        let value = value_from_slice(sparse, DeOptions::new().lenient_memo()).unwrap();
        assert!(items(&value)[0].is(&items(&value)[1]));

        match value_from_slice(b"(]h\x00t.", DeOptions::new().lenient_memo()) {
            Err(Error::Eval(ErrorCode::MissingMemo(0), _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }
}

mod hook_tests {
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use crate::compat::CompatTable;
    use crate::ext::ExtensionRegistry;
    use crate::resolve::{constructor_fn, TableResolver};
    use crate::{value_from_slice, value_to_vec, DeOptions, DispatchTable, Global, HostObject,
                Init, Items, Object, Pickler, Reduction, SerOptions, Status, TypeKey,
                Unpickler, Value};
    use crate::error::{Error, ErrorCode, Result};
    use crate::ops::{genops, Arg};
    use super::{hstr, items, opnames};

    #[derive(Default)]
    struct Point {
        coords: RefCell<(i64, i64)>,
    }

    impl HostObject for Point {
        fn class_name(&self) -> (&str, &str) {
            ("geometry", "Point")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn reduce(&self, _proto: u8) -> Result<Reduction> {
            let (x, y) = *self.coords.borrow();
            Ok(Reduction::call(Value::global("geometry", "Point"), vec![])
               .with_state(pydict! { hstr("x") => Value::I64(x), hstr("y") => Value::I64(y) }))
        }

        fn set_state(&self, state: Value) -> Result<()> {
            if let Value::Dict(ref d) = state {
                let d = d.borrow();
                let get = |k: &str| match d.get(&hstr(k)) {
                    Some(&Value::I64(i)) => i,
                    _ => 0,
                };
                *self.coords.borrow_mut() = (get("x"), get("y"));
            }
            Ok(())
        }
    }

    struct Opaque;

    impl HostObject for Opaque {
        fn class_name(&self) -> (&str, &str) {
            ("geometry", "Opaque")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn point_resolver() -> Arc<TableResolver> {
        let mut resolver = TableResolver::new();
        resolver.register("geometry", "Point",
                          constructor_fn(|_, _, _| Ok(Value::host(Point::default()))));
        Arc::new(resolver)
    }

    fn coords(value: &Value) -> (i64, i64) {
        match *value {
            Value::Host(ref h) => *h.as_any().downcast_ref::<Point>().unwrap().coords.borrow(),
            ref other => panic!("expected host object, got {}", other),
        }
    }

    #[test]
    fn host_objects() {
        let point = Value::host(Point { coords: RefCell::new((3, -4)) });
        let value = Value::list(vec![point.clone(), point]);
        for proto in 0..=5 {
            let bytes = value_to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            let options = DeOptions::new().resolver(point_resolver());
            let decoded = items(&value_from_slice(&bytes, options).unwrap());
            assert_eq!(coords(&decoded[0]), (3, -4));
            assert!(decoded[0].is(&decoded[1]));

            // Without the resolver entry, the same stream gives a generic instance.
            let generic = items(&value_from_slice(&bytes, DeOptions::new()).unwrap());
            match generic[0] {
                Value::Object(ref o) => {
                    let o = o.borrow();
                    assert_eq!(*o.class, Global::new("geometry", "Point"));
                    assert_eq!(o.init, Init::Call(vec![]));
                }
                ref other => panic!("expected object, got {}", other),
            }
        }
    }

    #[test]
    fn unpicklable_host() {
        match value_to_vec(&Value::host(Opaque), SerOptions::new()) {
            Err(Error::Encode(ErrorCode::Unpicklable(ref name))) if name == "geometry.Opaque" => { }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn dispatch_table_priority() {
        let mut table = DispatchTable::new();
        table.register(TypeKey::class("geometry", "Point"), |_, _| {
            Ok(Reduction::call(Value::global("geometry", "make_point"), vec![Value::I64(0)]))
        });
        table.register(TypeKey::List, |value, _| {
            Ok(Reduction::call(Value::global("collections", "deque"),
                               vec![Value::tuple(super::items(value))]))
        });
        let options = SerOptions::new().dispatch_table(Arc::new(table));
        let value = Value::tuple(vec![Value::host(Point::default()),
                                      Value::list(vec![Value::I64(1)])]);
        let bytes = value_to_vec(&value, options).unwrap();
        assert!(!opnames(&bytes).contains(&"EMPTY_LIST"));
        let decoded = items(&value_from_slice(&bytes, DeOptions::new()).unwrap());
        let expect = [("make_point", vec![Value::I64(0)]),
                      ("deque", vec![Value::tuple(vec![Value::I64(1)])])];
        for (value, (name, args)) in decoded.iter().zip(expect.iter()) {
            match *value {
                Value::Object(ref o) => {
                    let o = o.borrow();
                    assert_eq!(o.class.name, *name);
                    assert_eq!(o.init, Init::Call(args.clone()));
                }
                ref other => panic!("expected object, got {}", other),
            }
        }
    }

    #[test]
    fn iterable_items_only_at_protocol_0() {
        let mut table = DispatchTable::new();
        table.register(TypeKey::class("bag", "Bag"), |_, _| {
            Ok(Reduction::call(Value::global("bag", "Bag"), vec![])
               .with_list_items(Items::Iterable(Value::list(vec![Value::I64(1), Value::I64(2)]))))
        });
        let options = SerOptions::new().dispatch_table(Arc::new(table));
        let bag = Value::object(Object::new(Rc::new(Global::new("bag", "Bag"))));

        let bytes = value_to_vec(&bag, options.clone().proto(0)).unwrap();
        match value_from_slice(&bytes, DeOptions::new()).unwrap() {
            Value::Object(ref o) => assert_eq!(o.borrow().list_items,
                                               vec![Value::I64(1), Value::I64(2)]),
            other => panic!("expected object, got {}", other),
        }
        match value_to_vec(&bag, options.proto(2)) {
            Err(Error::Encode(ErrorCode::NotAnIterator(..))) => { }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn object_reductions() {
        let class = Rc::new(Global::new("shapes", "Circle"));
        let mut with_kwargs = Object::with_init(class.clone(), Init::New {
            args: vec![Value::I64(1)],
            kwargs: Some(pydict! { hstr("r") => Value::F64(2.0) }),
        });
        with_kwargs.dict_items.push((Value::String("k".into()), Value::None));
        let mut with_args = Object::with_init(class.clone(), Init::New {
            args: vec![Value::I64(5)],
            kwargs: None,
        });
        with_args.list_items = vec![Value::I64(1), Value::I64(2)];
        let value = Value::list(vec![Value::object(with_kwargs), Value::object(with_args),
                                     Value::object(Object::new(class))]);
        for proto in 0..=5 {
            let bytes = value_to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            let names = opnames(&bytes);
            assert_eq!(names.contains(&"NEWOBJ_EX"), proto >= 4);
            assert_eq!(names.contains(&"NEWOBJ"), proto >= 2);
            assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), value,
                       "protocol {}", proto);
        }
    }

    #[test]
    fn persistent_references() {
        let value = Value::list(vec![Value::Bytes(b"BIG".to_vec()), Value::I64(5),
                                     Value::Bytes(b"EMPTY".to_vec())]);
        for proto in 0..=5 {
            let mut pickler = Pickler::new(Vec::new(), SerOptions::new().proto(proto))
                .with_persistent_id(|value| Ok(match *value {
                    Value::Bytes(ref b) if b == b"BIG" => Some(Value::String("blob-1".into())),
                    Value::Bytes(ref b) if b == b"EMPTY" => Some(Value::String(String::new())),
                    _ => None,
                }));
            pickler.dump(&value).unwrap();
            let bytes = pickler.into_inner();
            if proto == 0 {
                assert_eq!(bytes, b"(lp0\nPblob-1\naI5\naP\na.");
            }

            let mut unpickler = Unpickler::new(DeOptions::new())
                .with_persistent_load(|token| match token {
                    Value::String(s) => Ok(Value::String(format!("loaded {:?}", s))),
                    other => Err(Error::Syntax(ErrorCode::InvalidValue(other.to_string()))),
                });
            unpickler.feed(&bytes);
            match unpickler.poll().unwrap() {
                Status::Complete(decoded) => assert_eq!(decoded, Value::list(vec![
                    Value::String("loaded \"blob-1\"".into()),
                    Value::I64(5),
                    Value::String("loaded \"\"".into()),
                ])),
                Status::Incomplete => panic!("pickle not complete"),
            }

            match value_from_slice(&bytes, DeOptions::new()) {
                Err(Error::Eval(ErrorCode::NoPersistentLoad, _)) => { }
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn persistent_id_text_restrictions() {
        let mut pickler = Pickler::new(Vec::new(), SerOptions::new().proto(0))
            .with_persistent_id(|_| Ok(Some(Value::String("two\nlines".into()))));
        match pickler.dump(&Value::None) {
            Err(Error::Encode(ErrorCode::InvalidPersistentId(_))) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn extension_codes() {
        let mut registry = ExtensionRegistry::new();
        registry.register("geometry", "Point", 1).unwrap();
        registry.register("geometry", "Line", 300).unwrap();
        registry.register("geometry", "Plane", 70000).unwrap();
        // Registering the same binding again is fine, conflicting ones are not.
        registry.register("geometry", "Point", 1).unwrap();
        assert!(matches!(registry.register("geometry", "Point", 2),
                         Err(Error::Registry(ErrorCode::ExtensionConflict { code: 1, .. }))));
        assert!(matches!(registry.register("geometry", "Cube", 300),
                         Err(Error::Registry(ErrorCode::ExtensionConflict { code: 300, .. }))));
        assert!(matches!(registry.register("geometry", "Cube", 0),
                         Err(Error::Registry(ErrorCode::InvalidExtensionCode(0)))));
        assert_eq!(registry.len(), 3);
        let registry = Arc::new(registry);

        let value = Value::list(vec![Value::global("geometry", "Point"),
                                     Value::global("geometry", "Line"),
                                     Value::global("geometry", "Plane")]);
        let bytes = value_to_vec(&value, SerOptions::new().extensions(registry.clone())).unwrap();
        let names = opnames(&bytes);
        for name in &["EXT1", "EXT2", "EXT4"] {
            assert!(names.contains(name));
        }
        assert!(!names.contains(&"GLOBAL"));
        let options = DeOptions::new().extensions(registry.clone());
        assert_eq!(value_from_slice(&bytes, options).unwrap(), value);
        match value_from_slice(&bytes, DeOptions::new()) {
            Err(Error::Eval(ErrorCode::UnregisteredExtension(1), _)) => { }
            other => panic!("unexpected result {:?}", other),
        }

        // Protocols without EXT opcodes ignore the registry.
        let bytes = value_to_vec(&value, SerOptions::new().proto(1).extensions(registry)).unwrap();
        assert!(!opnames(&bytes).contains(&"EXT1"));

        let mut registry = ExtensionRegistry::new();
        registry.register("m", "n", 5).unwrap();
        assert_eq!(registry.unregister(5), Some(("m".to_string(), "n".to_string())));
        assert!(registry.is_empty());
        registry.register("other", "n", 5).unwrap();
        assert_eq!(registry.name_for(5), Some(("other", "n")));
    }

    #[test]
    fn python2_names() {
        let set = Value::set(vec![crate::HashableValue::I64(1)]);
        let bytes = value_to_vec(&set, SerOptions::new().proto(2)).unwrap();
        assert_eq!(bytes, &b"\x80\x02c__builtin__\nset\nq\x00]q\x01K\x01a\x85q\x02Rq\x03."[..]);
        let bytes = value_to_vec(&set, SerOptions::new().proto(2).no_fix_imports()).unwrap();
        let globals: Vec<Arg> = genops(&bytes).map(|op| op.unwrap())
                                              .filter(|op| op.info.name == "GLOBAL")
                                              .map(|op| op.arg).collect();
        assert_eq!(globals, vec![Arg::Lines(b"builtins".to_vec(), b"set".to_vec())]);

        let legacy = b"c__builtin__\nset\n((lI1\natR.";
        assert_eq!(value_from_slice(legacy, DeOptions::new()).unwrap(), set);
        match value_from_slice(legacy, DeOptions::new().no_fix_imports()).unwrap() {
            Value::Object(ref o) => assert_eq!(o.borrow().class.module, "__builtin__"),
            other => panic!("expected object, got {}", other),
        }
        // With an empty table nothing is renamed in either direction.
        let empty = Arc::new(CompatTable::empty());
        let bytes = value_to_vec(&set, SerOptions::new().proto(2).compat_table(empty.clone()))
            .unwrap();
        assert!(bytes.windows(8).any(|w| w == b"builtins"));
        let options = DeOptions::new().compat_table(empty);
        assert!(matches!(value_from_slice(legacy, options).unwrap(), Value::Object(_)));
    }

    #[test]
    fn dotted_global_names() {
        let value = Value::global("shapes", "Circle.Factory");
        for proto in 0..=5 {
            let bytes = value_to_vec(&value, SerOptions::new().proto(proto)).unwrap();
            assert_eq!(opnames(&bytes).contains(&"STACK_GLOBAL"), proto >= 4);
            assert_eq!(value_from_slice(&bytes, DeOptions::new()).unwrap(), value);
        }
    }

    #[test]
    fn strict_globals() {
        let bytes = b"c__main__\nFoo\n)\x81.";
        match value_from_slice(bytes, DeOptions::new()).unwrap() {
            Value::Object(ref o) => assert_eq!(o.borrow().class.name, "Foo"),
            other => panic!("expected object, got {}", other),
        }
        match value_from_slice(bytes, DeOptions::new().strict_globals()) {
            Err(Error::Eval(ErrorCode::UnsupportedGlobal(ref m, ref n), _))
                if m == b"__main__" && n == b"Foo" => { }
            other => panic!("unexpected result {:?}", other),
        }
        // The builtins stay available.
        let set = b"c__builtin__\nset\n((lI1\natR.";
        assert!(value_from_slice(set, DeOptions::new().strict_globals()).is_ok());
    }
}

mod error_tests {
    use std::io::Cursor;
    use crate::{value_from_reader, value_from_slice, DeOptions, SerOptions, Status, Unpickler,
                Value};
    use crate::error::{Error, ErrorCode};

    fn code(bytes: &[u8]) -> ErrorCode {
        match value_from_slice(bytes, DeOptions::new()) {
            Ok(value) => panic!("unexpected success: {}", value),
            Err(err) => err.code().cloned().unwrap_or_else(|| panic!("no code in {}", err)),
        }
    }

    #[test]
    fn bad_streams() {
        assert!(matches!(code(b"Va\np-1\n."), ErrorCode::InvalidLiteral(_)));
        assert_eq!(code(b"0"), ErrorCode::StackUnderflow);
        assert!(matches!(code(b"S'abc\n."), ErrorCode::InvalidLiteral(_)));
        assert!(matches!(code(b"S'abc\"\n."), ErrorCode::InvalidLiteral(_)));
        assert_eq!(code(b"N.x"), ErrorCode::TrailingBytes);
        assert_eq!(code(&[0x58, 0, 0, 0, 0x54]), ErrorCode::EOFWhileParsing);
        assert_eq!(code(b""), ErrorCode::EOFWhileParsing);
        assert_eq!(code(b"\x80\x06N."), ErrorCode::UnsupportedProtocol(6));
        assert_eq!(code(b"\x80\x05\x97."), ErrorCode::Unsupported('\u{97}'));
        assert_eq!(code(b"T\xff\xff\xff\xff."), ErrorCode::NegativeLength);
        assert_eq!(code(b"X\x02\x00\x00\x00\xff\xfe."), ErrorCode::StringNotUTF8);
        assert_eq!(code(b"z"), ErrorCode::Unsupported('z'));
        assert_eq!(code(b"NN."), ErrorCode::InvalidValue("stack not empty at STOP".into()));
        assert_eq!(code(b"}]]s."), ErrorCode::ValueNotHashable);
        assert_eq!(code(b"K\x01)R."), ErrorCode::UnresolvedGlobal);
        assert!(matches!(code(b"NK\x01a."), ErrorCode::InvalidStackTop("list", _)));
    }

    #[test]
    fn positions() {
        match value_from_slice(b"N.x", DeOptions::new()) {
            Err(Error::Eval(ErrorCode::TrailingBytes, 2)) => { }
            other => panic!("unexpected result {:?}", other),
        }
        match value_from_slice(b"0", DeOptions::new()) {
            Err(Error::Eval(ErrorCode::StackUnderflow, 1)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn overflow() {
        let mut bytes = b"\x80\x04\x8e".to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.push(b'.');
        match value_from_slice(&bytes, DeOptions::new()) {
            Err(Error::Overflow(len, 3)) => assert_eq!(len, u64::MAX),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn overflow_over_isize() {
        let len = isize::MAX as u64 + 1;
        for &(header, op) in &[(b"\x80\x04", 0x8e), (b"\x80\x05", 0x96)] {
            let mut bytes = header.to_vec();
            bytes.push(op);
            bytes.extend_from_slice(&len.to_le_bytes());
            bytes.push(b'.');
            match value_from_slice(&bytes, DeOptions::new()) {
                Err(Error::Overflow(n, 3)) => assert_eq!(n, len),
                other => panic!("unexpected result {:?}", other),
            }
        }
        // Addressable but absent.
        let mut bytes = b"\x80\x04\x8e".to_vec();
        bytes.extend_from_slice(&(isize::MAX as u64).to_le_bytes());
        bytes.push(b'.');
        assert_eq!(code(&bytes), ErrorCode::EOFWhileParsing);
    }

    #[test]
    fn huge_bytes_call() {
        let bytes = b"\x80\x02cbuiltins\nbytes\n\x8a\x08\x00\x00\x00\x00\x00\x00\x00\x40\x85R.";
        assert!(matches!(code(bytes), ErrorCode::InvalidValue(_)));
        let bytes = b"\x80\x02cbuiltins\nbytes\nK\x03\x85R.";
        assert_eq!(value_from_slice(bytes, DeOptions::new()).unwrap(), Value::Bytes(vec![0; 3]));
    }

    fn deep_lists(depth: usize) -> Vec<u8> {
        let mut bytes = vec![b'('; depth];
        bytes.push(b']');
        bytes.extend(std::iter::repeat(b'l').take(depth));
        bytes.push(b'.');
        bytes
    }

    #[test]
    fn deep_nesting() {
        assert_eq!(code(&deep_lists(100_000)), ErrorCode::RecursionLimit(500));
        let mut tuples = b"\x80\x02N".to_vec();
        tuples.extend(std::iter::repeat(b'\x85').take(100_000));
        tuples.push(b'.');
        assert_eq!(code(&tuples), ErrorCode::RecursionLimit(500));
        // Cut off before the limit is reached.
        let mut truncated = deep_lists(100_000);
        truncated.truncate(100_000 + 1 + 400);
        assert_eq!(code(&truncated), ErrorCode::EOFWhileParsing);

        assert!(value_from_slice(&deep_lists(499), DeOptions::new()).is_ok());
        assert_eq!(code(&deep_lists(500)), ErrorCode::RecursionLimit(500));
        let options = DeOptions::new().recursion_limit(2000);
        assert!(value_from_slice(&deep_lists(1500), options).is_ok());
    }

    /// Lists that are each shallow on their own, chained through the memo
    /// into one value 400 * `links` levels deep.
    fn memo_chain(links: u32) -> Vec<u8> {
        let mut bytes = b"\x80\x02]r\x00\x00\x00\x00".to_vec();
        bytes.extend(std::iter::repeat(b'\x85').take(400));
        for id in 1..=links {
            bytes.push(b'j');
            bytes.extend_from_slice(&(id - 1).to_le_bytes());
            bytes.extend_from_slice(b"]r");
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.extend(std::iter::repeat(b'\x85').take(400));
            bytes.extend_from_slice(b"a0");
        }
        bytes
    }

    #[test]
    fn deep_nesting_through_memo() {
        let mut bytes = memo_chain(250);
        bytes.push(b'.');
        assert_eq!(code(&bytes), ErrorCode::RecursionLimit(500));

        // Dropping an unpickler in the middle of such a pickle.
        let mut unpickler = Unpickler::new(DeOptions::new());
        unpickler.feed(&memo_chain(250));
        assert!(matches!(unpickler.poll(), Ok(Status::Incomplete)));
        drop(unpickler);

        // 802 levels, only visible once the whole value is there.
        let mut bytes = memo_chain(1);
        bytes.push(b'.');
        assert_eq!(code(&bytes), ErrorCode::RecursionLimit(500));
        assert!(value_from_slice(&bytes, DeOptions::new().recursion_limit(1000)).is_ok());
    }

    #[test]
    fn trailing_bytes_in_reader() {
        match value_from_reader(Cursor::new(b"N.x".to_vec()), DeOptions::new()) {
            Err(Error::Eval(ErrorCode::TrailingBytes, _)) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn unsupported_protocol_on_write() {
        match crate::value_to_vec(&Value::None, SerOptions::new().proto(6)) {
            Err(Error::Encode(ErrorCode::UnsupportedProtocol(6))) => { }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn invalid_global_names() {
        let value = Value::global("mod", "bad\nname");
        match crate::value_to_vec(&value, SerOptions::new().proto(2)) {
            Err(Error::Encode(ErrorCode::InvalidGlobalName(_))) => { }
            other => panic!("unexpected result {:?}", other),
        }
        let value = Value::global("mod\u{e9}", "name");
        assert!(crate::value_to_vec(&value, SerOptions::new().proto(2)).is_err());
        assert!(crate::value_to_vec(&value, SerOptions::new().proto(3)).is_ok());
    }
}
