use super::*;
use std::cmp::Ordering;

#[test]
fn test_names_round_trip() {
    for t in ElemType::all() {
        assert_eq!(ElemType::by_name(t.name()).unwrap(), t);
        assert_eq!(t.name().parse::<ElemType>().unwrap(), t);
    }
}

#[test]
fn test_sizes_match_registry_order() {
    let sizes: Vec<usize> = ElemType::all().map(|t| t.size()).collect();
    assert_eq!(sizes, vec![1, 1, 2, 2, 4, 4, 8, 8, 2, 4, 8]);
    assert_eq!(ElemType::all().count(), ElemType::COUNT);
}

#[test]
fn test_unknown_type() {
    assert!(matches!(ElemType::by_name("int128"), Err(Error::UnknownType(_))));
    // Lookup is case sensitive.
    assert!(matches!(ElemType::by_name("Int"), Err(Error::UnknownType(_))));
    assert!(matches!(ElemType::from_index(11), Err(Error::UnknownType(_))));
    assert_eq!(ElemType::from_index(4).unwrap(), ElemType::Int);
    assert_eq!(ElemType::Double.index(), 10);
}

#[test]
fn test_compare_respects_signedness() {
    let neg = (-1i8).to_le_bytes();
    let one = 1i8.to_le_bytes();
    assert_eq!(ElemType::Char.compare(&neg, &one), Ordering::Less);
    // Same bytes, unsigned interpretation: 255 > 1.
    assert_eq!(ElemType::UChar.compare(&neg, &one), Ordering::Greater);

    let a = (-5i64).to_le_bytes();
    let b = (-5i64).to_le_bytes();
    assert_eq!(ElemType::Long.compare(&a, &b), Ordering::Equal);
}

#[test]
fn test_compare_floats() {
    let a = 1.5f32.to_le_bytes();
    let b = (-2.0f32).to_le_bytes();
    assert_eq!(ElemType::Float.compare(&a, &b), Ordering::Greater);

    let h1 = f16::from_f32(0.5).to_le_bytes();
    let h2 = f16::from_f32(0.75).to_le_bytes();
    assert_eq!(ElemType::Half.compare(&h1, &h2), Ordering::Less);

    let nan = f64::NAN.to_le_bytes();
    let x = 3.0f64.to_le_bytes();
    assert_eq!(ElemType::Double.compare(&nan, &x), Ordering::Equal);
}

#[test]
#[should_panic]
fn test_compare_wrong_width_panics() {
    ElemType::Int.compare(&[0u8; 2], &[0u8; 4]);
}

#[test]
fn test_add_wraps_on_encode() {
    let t = ElemType::UChar;
    let s = t.add(Value::Int(200), Value::Int(100));
    let mut out = [0u8; 1];
    t.encode(s, &mut out);
    assert_eq!(out[0], 44);

    let t = ElemType::Int;
    let s = t.add(Value::Int(i32::MAX as i128), Value::Int(1));
    let mut out = [0u8; 4];
    t.encode(s, &mut out);
    assert_eq!(i32::from_le_bytes(out), i32::MIN);

    let s = t.add(Value::Int(-7), Value::Int(3));
    t.encode(s, &mut out);
    assert_eq!(i32::from_le_bytes(out), -4);
}

#[test]
fn test_add_rounds_to_float_precision() {
    let big = Value::Float(1e8);
    let one = Value::Float(1.0);
    assert_eq!(ElemType::Float.add(big, one), Value::Float(1e8));
    assert_eq!(ElemType::Double.add(big, one), Value::Float(1e8 + 1.0));

    // Above 2048 consecutive halfs are two apart.
    assert_eq!(ElemType::Half.add(Value::Float(2048.0), one), Value::Float(2048.0));
    assert_eq!(ElemType::Half.add(Value::Float(0.5), Value::Float(0.25)), Value::Float(0.75));
}

#[test]
fn test_radix_key_preserves_order() {
    for t in [ElemType::Char, ElemType::Int, ElemType::Long, ElemType::UShort] {
        let mut vals: Vec<Vec<u8>> = [-100i128, -1, 0, 1, 90]
            .iter()
            .map(|v| {
                let mut out = vec![0u8; t.size()];
                t.encode(Value::Int(*v), &mut out);
                out
            })
            .collect();
        vals.sort_by(|a, b| t.compare(a, b));
        let keys: Vec<u64> = vals.iter().map(|v| t.radix_key(v)).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "{t}: {keys:?}");
    }

    let floats = [-3.5f32, -0.25, 0.0, 0.125, 7.0];
    let keys: Vec<u64> = floats
        .iter()
        .map(|f| ElemType::Float.radix_key(&f.to_le_bytes()))
        .collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_element_trait_types() {
    assert_eq!(<u32 as Element>::TYPE, ElemType::UInt);
    assert_eq!(<f16 as Element>::TYPE, ElemType::Half);
    assert_eq!(<i64 as Element>::TYPE, ElemType::Long);
}
