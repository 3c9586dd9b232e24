use std::rc::Rc;

use ocodec_core::{Error, Flags, Kind, Number, NumberType, Value};

#[test]
fn null_and_booleans_are_shared_readonly_singletons() {
    assert!(Value::null().ptr_eq(&Value::null()));
    assert!(Value::boolean(true).ptr_eq(&Value::boolean(true)));
    assert!(!Value::boolean(true).ptr_eq(&Value::boolean(false)));
    assert!(Value::init(Flags::SINGLETON, Kind::Null).ptr_eq(&Value::null()));

    let t = Value::boolean(true);
    assert!(t.is_readonly());
    assert!(matches!(t.set_bool(false), Err(Error::ReadOnly)));
    t.clear();
    assert_eq!(t.as_bool(), Some(true));
    // copies of singletons are the singleton
    assert!(t.copy().ptr_eq(&t));
}

#[test]
fn mutators_check_kind() {
    let s = Value::string("abc");
    assert!(matches!(
        s.set_number(1u8),
        Err(Error::WrongKind {
            expected: Kind::Number,
            found: Kind::String
        })
    ));
    s.set_string("xyz").unwrap();
    assert_eq!(s.as_str().as_deref(), Some("xyz"));
    assert_eq!(s.len(), 3);

    let n = Value::number(3u8);
    n.set_number(-70000i32).unwrap();
    assert_eq!(n.as_number().map(|n| n.number_type()), Some(NumberType::I32));
}

#[test]
fn clear_resets_to_zero_of_same_subtype() {
    let n = Value::number(300u16);
    n.clear();
    let got = n.as_number().unwrap();
    assert_eq!(got.number_type(), NumberType::U16);
    assert_eq!(got, Number::U16(0));

    let arr = Value::array_from([Value::number(1u8), Value::null()]);
    arr.clear();
    assert_eq!(arr.kind(), Kind::Array);
    assert!(arr.is_empty());
}

#[test]
fn copy_retains_children_deep_copy_clones_them() {
    let child = Value::string("c");
    let arr = Value::array_from([child.clone()]);
    assert_eq!(child.ref_count(), 2);

    let shallow = arr.copy();
    assert_eq!(child.ref_count(), 3);
    assert!(shallow.get(0).unwrap().ptr_eq(&child));
    assert!(!shallow.ptr_eq(&arr));

    let deep = arr.deep_copy();
    assert_eq!(child.ref_count(), 3);
    assert!(!deep.get(0).unwrap().ptr_eq(&child));
    assert_eq!(deep, arr);

    drop(shallow);
    assert_eq!(child.ref_count(), 2);
    arr.release();
    assert_eq!(child.ref_count(), 1);
}

#[test]
fn array_edits() {
    let arr = Value::array();
    arr.push(Value::number(1u8)).unwrap();
    arr.push(Value::number(3u8)).unwrap();
    arr.insert_at(1, Value::number(2u8)).unwrap();
    assert_eq!(arr.len(), 3);
    assert!(matches!(
        arr.insert_at(9, Value::null()),
        Err(Error::OutOfBounds { index: 9, len: 3 })
    ));

    let old = arr.set_item(0, Value::string("first")).unwrap();
    assert_eq!(old.as_number(), Some(Number::U8(1)));
    let removed = arr.remove_at(2).unwrap();
    assert_eq!(removed.as_number(), Some(Number::U8(3)));
    assert_eq!(arr.len(), 2);
    assert!(arr.get(5).is_none());
}

#[test]
fn dictionary_keys_are_unique_and_ordered() {
    let d = Value::dictionary();
    assert!(d.insert_key("b", Value::number(1u8)).unwrap().is_none());
    assert!(d.insert_key("a", Value::number(2u8)).unwrap().is_none());
    let replaced = d.insert_key("b", Value::number(3u8)).unwrap();
    assert_eq!(replaced.and_then(|v| v.as_number()), Some(Number::U8(1)));
    assert_eq!(d.keys(), vec!["b".to_string(), "a".to_string()]);

    assert!(d.remove_key("a").unwrap().is_some());
    assert!(d.remove_key("a").unwrap().is_none());
    assert_eq!(d.len(), 1);
}

#[test]
fn large_dictionaries_keep_insertion_order() {
    let d = Value::dictionary_from((0..20_000).rev().map(|i| (format!("k{i}"), Value::number(i as u16))));
    assert_eq!(d.len(), 20_000);
    assert_eq!(d.get_key("k123").and_then(|v| v.as_number()), Some(Number::U16(123)));
    d.remove_key("k19998").unwrap();
    let keys = d.keys();
    assert_eq!(&keys[..2], &["k19999".to_string(), "k19997".to_string()]);
    assert_eq!(keys.last().map(String::as_str), Some("k0"));
}

#[test]
fn dictionary_equality_ignores_order() {
    let x = Value::dictionary_from([("a", Value::number(1u8)), ("b", Value::boolean(false))]);
    let y = Value::dictionary_from([("b", Value::boolean(false)), ("a", Value::number(1u64))]);
    assert_eq!(x, y);
    y.insert_key("c", Value::null()).unwrap();
    assert_ne!(x, y);
}

#[test]
fn increment_containers_keep_their_flag_on_copy() {
    let a = Value::array_incr();
    assert!(a.flags().contains(Flags::INCREMENT));
    assert!(a.copy().flags().contains(Flags::INCREMENT));
    assert!(!Value::array().flags().contains(Flags::INCREMENT));
}

#[test]
fn user_data_slot() {
    let v = Value::dictionary();
    assert!(v.user_data().is_none());
    v.set_user_data(Some(Rc::new(42u32)));
    let ud = v.user_data().unwrap();
    assert_eq!(ud.downcast_ref::<u32>(), Some(&42));
    v.set_user_data(None);
    assert!(v.user_data().is_none());
}

#[test]
fn dates_and_data() {
    let d = Value::date(978_307_200);
    assert_eq!(d.as_date(), Some(978_307_200));
    assert_eq!(
        d.as_datetime().map(|t| t.to_rfc3339()),
        Some("2001-01-01T00:00:00+00:00".to_string())
    );
    let b = Value::data(vec![1u8, 2, 3]);
    assert_eq!(b.as_bytes().as_deref(), Some(&[1u8, 2, 3][..]));
    b.set_data(Vec::new()).unwrap();
    assert!(b.is_empty());
}
