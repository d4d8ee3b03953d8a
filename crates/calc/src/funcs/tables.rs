//! Array and table built-ins: ordering, grouping, reshaping, searching.

use super::FnExtra;
use json::{equal, equal_by_keys, get_path, text, Field, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

pub fn keys(_: &FnExtra, args: &[Value]) -> Value {
    match args.first().and_then(Value::fields) {
        Some(fields) => Value::Array(
            fields.iter().map(|f| Value::from(f.property.as_str())).collect(),
        ),
        None => Value::Null,
    }
}

/// Object {k:v,...} becomes a table [{key,value},...]; a table argument
/// passes through row by row.
pub fn keys_values(_: &FnExtra, args: &[Value]) -> Value {
    fn explode(obj: &[Field]) -> Vec<Value> {
        obj.iter()
            .map(|f| {
                Value::Object(vec![
                    Field::new("key", Value::from(f.property.as_str())),
                    Field::new("value", f.value.clone()),
                ])
            })
            .collect()
    }
    match args.first() {
        Some(Value::Object(fields)) => Value::Array(explode(fields)),
        Some(v @ (Value::Array(_) | Value::Deferred(_))) => Value::Array(
            v.elements()
                .flat_map(|row| match row.as_ref() {
                    Value::Object(fields) => explode(fields),
                    _ => Vec::new(),
                })
                .collect(),
        ),
        _ => Value::Null,
    }
}

pub fn concat(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(_)) => {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::String(s) => out.push_str(s),
                    Value::Null | Value::Error(_) => {}
                    other => out.push_str(&other.text()),
                }
            }
            Value::from(out)
        }
        Some(Value::Array(_) | Value::Deferred(_)) => {
            let mut out: Vec<Value> = Vec::new();
            for arg in args {
                match arg {
                    Value::Array(_) | Value::Deferred(_) => {
                        out.extend(arg.elements().map(Cow::into_owned))
                    }
                    Value::Null | Value::Error(_) => {}
                    _ => {
                        return Value::error(
                            "concat",
                            "concat() works on arrays or strings, not a mixture",
                        )
                    }
                }
            }
            Value::Array(out)
        }
        _ => Value::Null,
    }
}

pub fn slice(_: &FnExtra, args: &[Value]) -> Value {
    let src = match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_) | Value::String(_))) => v,
        _ => return Value::Null,
    };
    let len = match src {
        Value::String(s) => text::char_len(s),
        _ => src.array_len().unwrap_or(0),
    } as i64;

    let (start, end) = match args.get(1).and_then(Value::as_i64) {
        None => (0, len),
        Some(mut start) => {
            if start < 0 {
                start += len;
            }
            let start = start.max(0);
            let end = match args.get(2).and_then(Value::as_i64) {
                None => len,
                Some(mut end) => {
                    if end < 0 {
                        end += len;
                    }
                    end.max(start)
                }
            };
            (start, end)
        }
    };

    match src {
        Value::String(s) => Value::from(text::substr(
            s,
            start as usize,
            Some((end - start).max(0) as usize),
        )),
        _ => Value::Array(
            src.elements()
                .skip(start as usize)
                .take((end - start).max(0) as usize)
                .map(Cow::into_owned)
                .collect(),
        ),
    }
}

pub fn flat(_: &FnExtra, args: &[Value]) -> Value {
    fn flatten(out: &mut Vec<Value>, v: &Value, depth: i64) {
        for elem in v.elements() {
            match elem.as_ref() {
                Value::Array(_) | Value::Deferred(_) if depth != 0 => {
                    flatten(out, elem.as_ref(), depth - 1)
                }
                other => out.push(other.clone()),
            }
        }
    }
    match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_))) => {
            let depth = args.get(1).and_then(Value::as_i64).unwrap_or(-1);
            let mut out = Vec::new();
            flatten(&mut out, v, depth);
            Value::Array(out)
        }
        _ => Value::Null,
    }
}

/// Parse an order-by list: strings are member paths, and a `true` before
/// a path marks it descending.
fn sort_spec(orderby: &Value) -> Vec<(String, bool)> {
    let mut spec = Vec::new();
    let mut descending = false;
    let single;
    let entries: Box<dyn Iterator<Item = Cow<'_, Value>>> = match orderby {
        Value::String(_) => {
            single = [Cow::Borrowed(orderby)];
            Box::new(single.into_iter())
        }
        _ => Box::new(orderby.elements()),
    };
    for entry in entries {
        match entry.as_ref() {
            Value::Bool(flag) => descending = *flag,
            Value::String(path) => {
                spec.push((path.clone(), descending));
                descending = false;
            }
            _ => {}
        }
    }
    spec
}

/// Row ordering for one sort key: booleans, then strings
/// (case-insensitive), then numbers; null, containers, and missing
/// values sort last.
fn key_cmp(lhs: Option<&Value>, rhs: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            Some(Value::Bool(_)) => 0,
            Some(Value::String(_)) => 1,
            Some(Value::Number(_)) => 2,
            _ => 3,
        }
    }
    match (lhs, rhs) {
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::String(l)), Some(Value::String(r))) => text::caseless_cmp(l, r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => l.cmp(r),
        (l, r) => rank(l).cmp(&rank(r)),
    }
}

fn sort_rows(rows: &mut [Value], spec: &[(String, bool)]) {
    rows.sort_by(|a, b| {
        for (path, descending) in spec {
            let ord = key_cmp(get_path(a, path), get_path(b, path));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

pub fn order_by(_: &FnExtra, args: &[Value]) -> Value {
    let spec = match args.get(1) {
        Some(orderby) => sort_spec(orderby),
        None => Vec::new(),
    };
    match args.first() {
        // An empty result set is still sortable.
        Some(tbl) if (tbl.is_table() || tbl.array_len() == Some(0)) && !spec.is_empty() => {
            let mut rows: Vec<Value> = tbl.elements().map(Cow::into_owned).collect();
            sort_rows(&mut rows, &spec);
            Value::Array(rows)
        }
        _ => Value::error("orderBy", "orderBy() requires a table and an array of keys"),
    }
}

/// Sort by the named members, then collect runs of rows with equal keys
/// into sub-arrays. The result is an array of groups.
pub fn group_by(_: &FnExtra, args: &[Value]) -> Value {
    let spec = match args.get(1) {
        Some(orderby) => sort_spec(orderby),
        None => Vec::new(),
    };
    let tbl = match args.first() {
        Some(tbl) if (tbl.is_table() || tbl.array_len() == Some(0)) && !spec.is_empty() => tbl,
        _ => return Value::Null,
    };
    let keys: Vec<String> = spec.iter().map(|(path, _)| path.clone()).collect();
    let mut rows: Vec<Value> = tbl.elements().map(Cow::into_owned).collect();
    sort_rows(&mut rows, &spec);

    let mut groups: Vec<Value> = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    for row in rows {
        if !current.is_empty() && !equal_by_keys(&current[0], &row, &keys) {
            groups.push(Value::Array(std::mem::take(&mut current)));
        }
        current.push(row);
    }
    if !current.is_empty() {
        groups.push(Value::Array(current));
    }
    Value::Array(groups)
}

pub fn distinct(_: &FnExtra, args: &[Value]) -> Value {
    let src = match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_))) if !v.is_empty() => v,
        Some(other) => return other.clone(),
        None => return Value::Null,
    };

    // Optional "strict" flag, then an optional member list.
    let mut next = 1;
    let mut strict = false;
    if let Some(Value::Bool(true)) = args.get(next) {
        strict = true;
        next += 1;
    }
    let fields: Option<Vec<String>> = match args.get(next) {
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(list @ (Value::Array(_) | Value::Deferred(_))) => Some(
            list.elements()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    };

    let same = |a: &Value, b: &Value| match &fields {
        Some(keys) if a.fields().is_some() && b.fields().is_some() => {
            equal_by_keys(a, b, keys)
        }
        _ => equal(a, b),
    };

    let mut out: Vec<Value> = Vec::new();
    for elem in src.elements() {
        let duplicate = if strict {
            out.iter().any(|prev| same(prev, &elem))
        } else {
            out.last().map(|prev| same(prev, &elem)).unwrap_or(false)
        };
        if !duplicate {
            out.push(elem.into_owned());
        }
    }
    Value::Array(out)
}

/// Expand nested tables: each row multiplies into one row per element of
/// each named nested list, with object elements merged over the parent.
pub fn unroll(_: &FnExtra, args: &[Value]) -> Value {
    let tbl = match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_))) => v,
        _ => return Value::Null,
    };
    let names: Vec<String> = match args.get(1) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(list @ (Value::Array(_) | Value::Deferred(_))) => list
            .elements()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect(),
        _ => return tbl.clone(),
    };

    let mut rows: Vec<Value> = tbl.elements().map(Cow::into_owned).collect();
    for name in &names {
        let mut expanded: Vec<Value> = Vec::new();
        for row in rows {
            let nested = match row.get(name) {
                Some(v @ (Value::Array(_) | Value::Deferred(_))) => v.clone(),
                _ => {
                    expanded.push(row);
                    continue;
                }
            };
            for elem in nested.elements() {
                let mut copy = row.clone();
                copy.remove(name);
                match elem.as_ref() {
                    Value::Object(fields) => {
                        for f in fields {
                            copy.set(&f.property, f.value.clone());
                        }
                    }
                    scalar => copy.set(name, scalar.clone()),
                }
                expanded.push(copy);
            }
        }
        rows = expanded;
    }
    Value::Array(rows)
}

/// Shared scan for includes()/indexOf()/lastIndexOf(). Returns matching
/// positions in codepoints (strings) or element indexes (arrays).
fn search(extra: &FnExtra, args: &[Value], last: bool) -> Option<i64> {
    let ignorecase = args.get(2).map(Value::is_true).unwrap_or(false);
    match (args.first(), args.get(1)) {
        (Some(subject @ (Value::Array(_) | Value::Deferred(_))), Some(needle)) => {
            let mut found = None;
            for (i, elem) in subject.elements().enumerate() {
                let hit = match (ignorecase, elem.as_str(), needle.as_str()) {
                    (true, Some(e), Some(n)) => text::caseless_eq(e, n),
                    _ => equal(&elem, needle),
                };
                if hit {
                    found = Some(i as i64);
                    if !last {
                        break;
                    }
                }
            }
            found
        }
        (Some(Value::String(subject)), needle) => match (extra.regex, needle) {
            (Some(rx), _) => {
                let mut found = None;
                for m in rx.regex.find_iter(subject) {
                    found = Some(m.start());
                    if !last {
                        break;
                    }
                }
                found.map(|at| subject[..at].chars().count() as i64)
            }
            (None, Some(Value::String(n))) => {
                // Byte offsets must be converted to codepoint positions
                // within the same string the search ran over.
                let (s, n): (String, String) = if ignorecase {
                    (text::to_lower(subject), text::to_lower(n))
                } else {
                    (subject.clone(), n.clone())
                };
                let at = if last { s.rfind(&n) } else { s.find(&n) };
                at.map(|at| s[..at].chars().count() as i64)
            }
            _ => None,
        },
        _ => None,
    }
}

pub fn includes(extra: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(search(extra, args, false).is_some())
}

pub fn index_of(extra: &FnExtra, args: &[Value]) -> Value {
    Value::from(search(extra, args, false).unwrap_or(-1))
}

pub fn last_index_of(extra: &FnExtra, args: &[Value]) -> Value {
    Value::from(search(extra, args, true).unwrap_or(-1))
}

/// Deep search of a container for members matching a needle: substring
/// for strings, numeric equality for numbers, or a regex. Returns a
/// table of {key, value} rows.
pub fn find(extra: &FnExtra, args: &[Value]) -> Value {
    let haystack = match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_) | Value::Object(_))) => v,
        _ => return Value::Null,
    };
    let ignorecase = args.get(3).map(Value::is_true).unwrap_or(false);
    let only_key = args.get(2).and_then(Value::as_str);

    let matches = |v: &Value| -> bool {
        if let Some(rx) = extra.regex {
            return v.as_str().map(|s| rx.regex.is_match(s)).unwrap_or(false);
        }
        match (args.get(1), v) {
            (Some(Value::String(needle)), Value::String(s)) => {
                if ignorecase {
                    text::to_lower(s).contains(&text::to_lower(needle))
                } else {
                    s.contains(needle.as_str())
                }
            }
            (Some(needle @ Value::Number(_)), Value::Number(_)) => equal(needle, v),
            _ => false,
        }
    };

    fn walk(
        out: &mut Vec<Value>,
        node: &Value,
        only_key: Option<&str>,
        matches: &dyn Fn(&Value) -> bool,
    ) {
        match node {
            Value::Object(fields) => {
                for f in fields {
                    let wanted = only_key.map(|k| k == f.property).unwrap_or(true);
                    if wanted && matches(&f.value) {
                        out.push(Value::Object(vec![
                            Field::new("key", Value::from(f.property.as_str())),
                            Field::new("value", f.value.clone()),
                        ]));
                    }
                    walk(out, &f.value, only_key, matches);
                }
            }
            Value::Array(_) | Value::Deferred(_) => {
                for elem in node.elements() {
                    walk(out, &elem, only_key, matches);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(&mut out, haystack, only_key, &matches);
    Value::Array(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_slice_negative_start() {
        let args = [v(json!([1, 2, 3])), Value::from(-2)];
        assert_eq!(slice(&FnExtra::default(), &args), v(json!([2, 3])));
    }

    #[test]
    fn test_slice_string() {
        let args = [Value::from("hello"), Value::from(1), Value::from(3)];
        assert_eq!(slice(&FnExtra::default(), &args), Value::from("el"));
    }

    #[test]
    fn test_order_by_collation() {
        let tbl = v(json!([{"k": 2}, {"k": "b"}, {"k": null}, {"k": "A"}, {"k": 1}]));
        let args = [tbl, Value::from("k")];
        let sorted = order_by(&FnExtra::default(), &args);
        // Strings (caseless) before numbers; null last.
        assert_eq!(sorted, v(json!([{"k": "A"}, {"k": "b"}, {"k": 1}, {"k": 2}, {"k": null}])));
    }

    #[test]
    fn test_group_by_partitions() {
        let tbl = v(json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}, {"a": 1, "b": "z"}]));
        let args = [tbl.clone(), v(json!(["a"]))];
        let grouped = group_by(&FnExtra::default(), &args);
        assert_eq!(
            grouped,
            v(json!([[{"a": 1, "b": "x"}, {"a": 1, "b": "z"}], [{"a": 2, "b": "y"}]]))
        );

        // Multiset union of the groups equals the input table.
        let mut all: Vec<Value> = grouped.elements().flat_map(|g| {
            g.elements().map(|r| r.into_owned()).collect::<Vec<_>>()
        }).collect();
        let mut expect: Vec<Value> = tbl.elements().map(|r| r.into_owned()).collect();
        all.sort_by(json::compare);
        expect.sort_by(json::compare);
        assert_eq!(all, expect);
    }

    #[test]
    fn test_distinct_adjacent_vs_strict() {
        let args = [v(json!([1, 1, 2, 1]))];
        assert_eq!(distinct(&FnExtra::default(), &args), v(json!([1, 2, 1])));
        let args = [v(json!([1, 1, 2, 1])), Value::Bool(true)];
        assert_eq!(distinct(&FnExtra::default(), &args), v(json!([1, 2])));
    }

    #[test]
    fn test_unroll_merges_nested_rows() {
        let tbl = v(json!([{"o": 1, "items": [{"x": "a"}, {"x": "b"}]}]));
        let args = [tbl, Value::from("items")];
        assert_eq!(
            unroll(&FnExtra::default(), &args),
            v(json!([{"o": 1, "x": "a"}, {"o": 1, "x": "b"}]))
        );
    }

    #[test]
    fn test_index_of() {
        let args = [v(json!(["a", "b", "c"])), Value::from("b")];
        assert_eq!(index_of(&FnExtra::default(), &args), Value::from(1));
        let args = [Value::from("héllo"), Value::from("llo")];
        assert_eq!(index_of(&FnExtra::default(), &args), Value::from(2));
        let args = [Value::from("abc"), Value::from("z")];
        assert_eq!(index_of(&FnExtra::default(), &args), Value::from(-1));
    }

    #[test]
    fn test_concat_mixture_is_an_error() {
        let args = [v(json!([1])), Value::from("x")];
        assert!(concat(&FnExtra::default(), &args).is_error());
    }
}
