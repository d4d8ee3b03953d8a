//! Aggregate built-ins. Each aggregate is a fold step applied once per
//! row plus a finish step that produces the final value from the
//! accumulator cell. Cells are allocated zero-initialised per
//! evaluation, one per aggregate call, and dropped afterwards.

use super::{aggregate, AggregateFns, FuncDef};
use json::{text, Field, Value};
use std::sync::Arc;

/// One aggregate call's accumulator. A typed view of what the original
/// kept in a raw byte region.
#[derive(Debug)]
pub enum AgCell {
    /// count, rowNumber
    Count(i64),
    /// sum, avg, product
    NumAcc { count: i64, val: f64 },
    /// min, max: the best number or string seen, plus the marker row.
    Best {
        count: i64,
        num: f64,
        text: Option<String>,
        marker: Option<Value>,
    },
    /// any, all
    Flag(bool),
    /// join
    Text { text: String, count: i64 },
    /// arrayAgg
    Rows(Vec<Value>),
    /// objectAgg
    Members(Vec<Field>),
    /// explain: accumulated column statistics, a table keyed by "key".
    Stats(Vec<Value>),
}

pub(super) fn builtins() -> Vec<Arc<FuncDef>> {
    vec![
        aggregate("count", "val:any|*", "number", AggregateFns {
            fold: count_fold, finish: count_finish, cell: || AgCell::Count(0),
        }),
        aggregate("rowNumber", "format:string", "number|string", AggregateFns {
            fold: |_, _| {}, finish: row_number_finish, cell: || AgCell::Count(0),
        }),
        aggregate("min", "val:number|string, marker?:any", "number|string|any", AggregateFns {
            fold: min_fold, finish: best_finish, cell: best_cell,
        }),
        aggregate("max", "val:number|string, marker?:any", "number|string|any", AggregateFns {
            fold: max_fold, finish: best_finish, cell: best_cell,
        }),
        aggregate("avg", "num:number", "number", AggregateFns {
            fold: num_fold_add, finish: avg_finish, cell: num_cell,
        }),
        aggregate("sum", "num:number", "number", AggregateFns {
            fold: num_fold_add, finish: sum_finish, cell: num_cell,
        }),
        aggregate("product", "num:number", "number", AggregateFns {
            fold: num_fold_mul, finish: product_finish, cell: num_cell,
        }),
        aggregate("any", "bool:boolean", "boolean", AggregateFns {
            fold: any_fold, finish: any_finish, cell: || AgCell::Flag(false),
        }),
        aggregate("all", "bool:boolean", "boolean", AggregateFns {
            fold: all_fold, finish: all_finish, cell: || AgCell::Flag(false),
        }),
        aggregate("arrayAgg", "data:any", "array", AggregateFns {
            fold: array_agg_fold, finish: array_agg_finish, cell: || AgCell::Rows(Vec::new()),
        }),
        aggregate("objectAgg", "key:string, value:any", "object", AggregateFns {
            fold: object_agg_fold, finish: object_agg_finish, cell: || AgCell::Members(Vec::new()),
        }),
        aggregate("join", "str:string, delim?:string", "string", AggregateFns {
            fold: join_fold, finish: join_finish, cell: || AgCell::Text { text: String::new(), count: 0 },
        }),
        aggregate("explain", "tbl:table, depth?:number", "table", AggregateFns {
            fold: explain_fold, finish: explain_finish, cell: || AgCell::Stats(Vec::new()),
        }),
    ]
}

fn num_cell() -> AgCell {
    AgCell::NumAcc { count: 0, val: 0.0 }
}

fn best_cell() -> AgCell {
    AgCell::Best { count: 0, num: 0.0, text: None, marker: None }
}

/// count(x) counts rows where x is neither null nor false.
fn count_fold(args: &[Value], cell: &mut AgCell) {
    let counted = match args.first() {
        None | Some(Value::Null | Value::Error(_)) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    };
    if counted {
        if let AgCell::Count(n) = cell {
            *n += 1;
        }
    }
}

fn count_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Count(n) => Value::from(*n),
        _ => Value::Null,
    }
}

/// rowNumber(style) yields a fresh value on each evaluation within the
/// group: numbers count up from the style when it is a number, "a"/"A"
/// yield alphabetic labels, and null/false yield nothing.
fn row_number_finish(args: &[Value], cell: &mut AgCell) -> Value {
    let counter = match cell {
        AgCell::Count(n) => n,
        _ => return Value::Null,
    };
    match args.first() {
        Some(Value::Null | Value::Error(_)) | Some(Value::Bool(false)) => Value::Null,
        Some(Value::Number(base)) => {
            let n = base.to_i64_lossy() + *counter;
            *counter += 1;
            Value::from(n)
        }
        Some(Value::String(style)) if style.starts_with('a') || style.starts_with('A') => {
            let base = if style.starts_with('a') { b'a' } else { b'A' };
            let mut tmp = *counter;
            *counter += 1;
            let mut label = Vec::new();
            loop {
                label.insert(0, base + (tmp % 26) as u8);
                tmp /= 26;
                if tmp == 0 {
                    break;
                }
                tmp -= 1;
            }
            Value::from(String::from_utf8(label).unwrap_or_default())
        }
        _ => {
            let n = 1 + *counter;
            *counter += 1;
            Value::from(n)
        }
    }
}

/// Shared fold for min/max. Numbers are tracked while no string has been
/// seen; strings compare case-insensitively. A second argument is
/// remembered as the marker to return instead of the extreme value.
fn best_fold(args: &[Value], cell: &mut AgCell, want_greater: bool) {
    let (count, num, text_slot, marker) = match cell {
        AgCell::Best { count, num, text, marker } => (count, num, text, marker),
        _ => return,
    };
    match args.first() {
        Some(Value::Number(n)) if text_slot.is_none() => {
            let d = n.as_f64();
            let better = *count == 0 || if want_greater { d > *num } else { d < *num };
            if better {
                *num = d;
                *marker = args.get(1).cloned();
            }
            *count += 1;
        }
        Some(Value::String(s)) => {
            let better = match text_slot {
                None => true,
                Some(have) => {
                    let ord = text::caseless_cmp(s, have);
                    if want_greater { ord == std::cmp::Ordering::Greater } else { ord == std::cmp::Ordering::Less }
                }
            };
            if better {
                *text_slot = Some(s.clone());
                *marker = args.get(1).cloned();
            }
            *count += 1;
        }
        _ => {}
    }
}

fn min_fold(args: &[Value], cell: &mut AgCell) {
    best_fold(args, cell, false);
}

fn max_fold(args: &[Value], cell: &mut AgCell) {
    best_fold(args, cell, true);
}

fn best_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Best { count: 0, .. } => Value::Null,
        AgCell::Best { marker: Some(marker), .. } => marker.clone(),
        AgCell::Best { text: Some(text), .. } => Value::from(text.as_str()),
        AgCell::Best { num, .. } => Value::from(*num),
        _ => Value::Null,
    }
}

fn num_fold_add(args: &[Value], cell: &mut AgCell) {
    if let (Some(Value::Number(n)), AgCell::NumAcc { count, val }) = (args.first(), cell) {
        *val += n.as_f64();
        *count += 1;
    }
}

fn num_fold_mul(args: &[Value], cell: &mut AgCell) {
    if let (Some(Value::Number(n)), AgCell::NumAcc { count, val }) = (args.first(), cell) {
        if *count == 0 {
            *val = n.as_f64();
        } else {
            *val *= n.as_f64();
        }
        *count += 1;
    }
}

fn sum_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::NumAcc { count: 0, .. } => Value::from(0),
        AgCell::NumAcc { val, .. } => number_value(*val),
        _ => Value::Null,
    }
}

fn avg_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::NumAcc { count: 0, .. } => Value::Null,
        AgCell::NumAcc { count, val } => Value::from(*val / *count as f64),
        _ => Value::Null,
    }
}

fn product_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::NumAcc { count: 0, .. } => Value::from(1),
        AgCell::NumAcc { val, .. } => number_value(*val),
        _ => Value::Null,
    }
}

/// Keep whole-valued results as integers.
fn number_value(val: f64) -> Value {
    if val.fract() == 0.0 && val.abs() < i64::MAX as f64 {
        Value::from(val as i64)
    } else {
        Value::from(val)
    }
}

fn any_fold(args: &[Value], cell: &mut AgCell) {
    if let AgCell::Flag(seen) = cell {
        *seen |= args.first().map(Value::is_true).unwrap_or(false);
    }
}

fn any_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Flag(seen) => Value::Bool(*seen),
        _ => Value::Null,
    }
}

// all() accumulates "saw a false row".
fn all_fold(args: &[Value], cell: &mut AgCell) {
    if let AgCell::Flag(seen_false) = cell {
        *seen_false |= !args.first().map(Value::is_true).unwrap_or(false);
    }
}

fn all_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Flag(seen_false) => Value::Bool(!*seen_false),
        _ => Value::Null,
    }
}

fn array_agg_fold(args: &[Value], cell: &mut AgCell) {
    if let (Some(v), AgCell::Rows(rows)) = (args.first(), cell) {
        rows.push(v.clone());
    }
}

fn array_agg_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Rows(rows) => Value::Array(std::mem::take(rows)),
        _ => Value::Null,
    }
}

fn object_agg_fold(args: &[Value], cell: &mut AgCell) {
    if let (Some(Value::String(key)), Some(value), AgCell::Members(members)) =
        (args.first(), args.get(1), cell)
    {
        members.push(Field::new(key.clone(), value.clone()));
    }
}

fn object_agg_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Members(members) => Value::Object(std::mem::take(members)),
        _ => Value::Null,
    }
}

fn join_fold(args: &[Value], cell: &mut AgCell) {
    let item = match args.first() {
        None | Some(Value::Null | Value::Error(_)) => return,
        Some(v) => v,
    };
    let delim = args.get(1).and_then(Value::as_str).unwrap_or(", ");
    if let AgCell::Text { text, count } = cell {
        if *count > 0 {
            text.push_str(delim);
        }
        text.push_str(&item.text());
        *count += 1;
    }
}

fn join_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Text { text, .. } => Value::from(text.as_str()),
        _ => Value::Null,
    }
}

/// Merge one row into the per-column statistics used by explain:
/// member key, value type (or "mixed"), maximum display width, and
/// whether any row held null.
fn explain_fold(args: &[Value], cell: &mut AgCell) {
    let row = match args.first() {
        Some(Value::Object(fields)) => fields,
        _ => return,
    };
    let stats = match cell {
        AgCell::Stats(stats) => stats,
        _ => return,
    };
    for f in row {
        let vtype = f.value.type_of(false);
        let width = text::char_len(&f.value.text()) as i64;
        let null = f.value.is_null();
        let have = stats.iter_mut().find(|s| {
            s.get("key").and_then(Value::as_str) == Some(f.property.as_str())
        });
        match have {
            None => stats.push(Value::Object(vec![
                Field::new("key", Value::from(f.property.as_str())),
                Field::new("type", Value::from(if null { "null" } else { vtype })),
                Field::new("width", Value::from(width)),
                Field::new("nullable", Value::Bool(null)),
            ])),
            Some(entry) => {
                if null {
                    entry.set("nullable", Value::Bool(true));
                } else {
                    let mixed = match entry.get("type").and_then(Value::as_str) {
                        Some("null") => vtype.to_string(),
                        Some(have) if have == vtype => have.to_string(),
                        _ => "mixed".to_string(),
                    };
                    entry.set("type", Value::from(mixed));
                }
                let old = entry.get("width").and_then(Value::as_i64).unwrap_or(0);
                if width > old {
                    entry.set("width", Value::from(width));
                }
            }
        }
    }
}

fn explain_finish(_: &[Value], cell: &mut AgCell) -> Value {
    match cell {
        AgCell::Stats(stats) if !stats.is_empty() => Value::Array(std::mem::take(stats)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn run(name: &str, rows: &[Vec<Value>]) -> Value {
        let def = super::super::lookup(name).unwrap();
        let fns = match &def.kind {
            super::super::FuncKind::Aggregate(fns) => fns,
            _ => panic!("not an aggregate"),
        };
        let mut cell = (fns.cell)();
        for row in rows {
            (fns.fold)(row, &mut cell);
        }
        (fns.finish)(&[], &mut cell)
    }

    #[test]
    fn test_sum_and_avg() {
        let rows: Vec<Vec<Value>> = [1, 2, 3, 4].iter().map(|n| vec![Value::from(*n as i64)]).collect();
        assert_eq!(run("sum", &rows), Value::from(10));
        assert_eq!(run("avg", &rows), Value::from(2.5));
        assert_eq!(run("sum", &[]), Value::from(0));
        assert_eq!(run("avg", &[]), Value::Null);
        assert_eq!(run("product", &[]), Value::from(1));
    }

    #[test]
    fn test_count_skips_null_and_false() {
        let rows = vec![
            vec![Value::from(1)],
            vec![Value::Null],
            vec![Value::Bool(false)],
            vec![Value::from("x")],
        ];
        assert_eq!(run("count", &rows), Value::from(2));
    }

    #[test]
    fn test_min_max_strings_caseless() {
        let rows = vec![
            vec![Value::from("banana")],
            vec![Value::from("Apple")],
            vec![Value::from("cherry")],
        ];
        assert_eq!(run("min", &rows), Value::from("Apple"));
        assert_eq!(run("max", &rows), Value::from("cherry"));
        assert_eq!(run("min", &[]), Value::Null);
    }

    #[test]
    fn test_min_marker() {
        let rows = vec![
            vec![Value::from(5), Value::from("five")],
            vec![Value::from(2), Value::from("two")],
        ];
        assert_eq!(run("min", &rows), Value::from("two"));
    }

    #[test]
    fn test_join() {
        let rows = vec![vec![Value::from("a")], vec![Value::from("b")]];
        assert_eq!(run("join", &rows), Value::from("a, b"));
    }

    #[test]
    fn test_any_all() {
        let rows = vec![vec![Value::Bool(false)], vec![Value::Bool(true)]];
        assert_eq!(run("any", &rows), Value::Bool(true));
        assert_eq!(run("all", &rows), Value::Bool(false));
        assert_eq!(run("all", &[]), Value::Bool(true));
    }
}
