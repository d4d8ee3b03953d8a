use crate::{Field, Value};
use itertools::{EitherOrBoth, Itertools};
use std::cmp::Ordering;

/// compare evaluates the deep ordering of |lhs| and |rhs|, establishing an
/// arbitrary total ordering over values. Arrays and objects compare
/// lexicographically; objects in member order.
pub fn compare(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::Null | Value::Error(_), Value::Null | Value::Error(_)) => Ordering::Equal,
        (Value::Bool(lhs), Value::Bool(rhs)) => lhs.cmp(rhs),
        (Value::Number(lhs), Value::Number(rhs)) => lhs.cmp(rhs),
        (Value::String(lhs), Value::String(rhs)) => lhs.cmp(rhs),
        (Value::Array(_) | Value::Deferred(_), Value::Array(_) | Value::Deferred(_)) => lhs
            .elements()
            .zip_longest(rhs.elements())
            .map(|eob| match eob {
                EitherOrBoth::Both(lhs, rhs) => compare(&lhs, &rhs),
                EitherOrBoth::Right(_) => Ordering::Less,
                EitherOrBoth::Left(_) => Ordering::Greater,
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal),
        (Value::Object(lhs), Value::Object(rhs)) => lhs
            .iter()
            .zip_longest(rhs.iter())
            .map(|eob| match eob {
                EitherOrBoth::Both(lhs, rhs) => {
                    let prop_ord = lhs.property.cmp(&rhs.property);
                    match prop_ord {
                        Ordering::Equal => compare(&lhs.value, &rhs.value),
                        _ => prop_ord,
                    }
                }
                EitherOrBoth::Right(_) => Ordering::Less,
                EitherOrBoth::Left(_) => Ordering::Greater,
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal),

        // Types are not equal. Define an (arbitrary) total ordering.
        (Value::Null | Value::Error(_), _) => Ordering::Less,
        (_, Value::Null | Value::Error(_)) => Ordering::Greater,
        (Value::Bool(_), _) => Ordering::Less,
        (_, Value::Bool(_)) => Ordering::Greater,
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (Value::String(_), _) => Ordering::Less,
        (_, Value::String(_)) => Ordering::Greater,
        (Value::Array(_) | Value::Deferred(_), _) => Ordering::Less,
        (_, Value::Array(_) | Value::Deferred(_)) => Ordering::Greater,
    }
}

/// Structural equality. Types must match; arrays compare element-wise in
/// order; objects compare member-wise by name, irrespective of member
/// order. Error-bearing nulls equal plain nulls.
pub fn equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null | Value::Error(_), Value::Null | Value::Error(_)) => true,
        (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
        (Value::Number(lhs), Value::Number(rhs)) => lhs == rhs,
        (Value::String(lhs), Value::String(rhs)) => lhs == rhs,
        (Value::Array(_) | Value::Deferred(_), Value::Array(_) | Value::Deferred(_)) => {
            if lhs.array_len() != rhs.array_len() {
                return false;
            }
            lhs.elements()
                .zip(rhs.elements())
                .all(|(l, r)| equal(&l, &r))
        }
        (Value::Object(lhs_fields), Value::Object(_)) => {
            if lhs_fields.len() != rhs.fields().map(<[Field]>::len).unwrap_or(0) {
                return false;
            }
            lhs_fields.iter().all(|f| match rhs.get(&f.property) {
                Some(other) => equal(&f.value, other),
                None => false,
            })
        }
        _ => false,
    }
}

/// Compare two objects over a list of member paths only. Paths may be
/// dotted ("addr.city"). A missing member sorts after a present one.
pub fn equal_by_keys(lhs: &Value, rhs: &Value, keys: &[String]) -> bool {
    keys.iter().all(|key| {
        match (get_path(lhs, key), get_path(rhs, key)) {
            (Some(l), Some(r)) => equal(l, r),
            (None, None) => true,
            _ => false,
        }
    })
}

/// Follow a dotted member path down through nested objects.
pub fn get_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut node = value;
    for step in path.split('.') {
        node = node.get(step)?;
    }
    Some(node)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RangeProvider;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_type_ordering() {
        use serde_json::json;
        let ordered = vec![
            v(json!(null)),
            v(json!(false)),
            v(json!(true)),
            v(json!(-1)),
            v(json!(3.5)),
            v(json!("a")),
            v(json!("b")),
            v(json!([1, 2])),
            v(json!({"a": 1})),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less);
            assert_eq!(compare(&pair[1], &pair[0]), Ordering::Greater);
        }
    }

    #[test]
    fn test_object_equality_ignores_member_order() {
        use serde_json::json;
        let a = v(json!({"x": 1, "y": [1, 2]}));
        let b = v(json!({"y": [1, 2], "x": 1}));
        assert!(equal(&a, &b));
        assert!(!equal(&a, &v(json!({"x": 1}))));
    }

    #[test]
    fn test_error_null_equals_null() {
        assert!(equal(&Value::Null, &Value::error("x", "boom")));
    }

    #[test]
    fn test_deferred_equals_materialized() {
        use serde_json::json;
        let lazy = Value::Deferred(RangeProvider::deferred(1, 3));
        assert!(equal(&lazy, &v(json!([1, 2, 3]))));
        assert!(!equal(&lazy, &v(json!([1, 2]))));
    }

    #[test]
    fn test_equal_by_keys() {
        use serde_json::json;
        let a = v(json!({"k": 1, "x": "ignored", "addr": {"city": "here"}}));
        let b = v(json!({"k": 1, "x": "different", "addr": {"city": "here"}}));
        assert!(equal_by_keys(&a, &b, &["k".to_string(), "addr.city".to_string()]));
        assert!(!equal_by_keys(&a, &b, &["x".to_string()]));
    }
}
