//! The tree-walking evaluator. Every evaluation returns a freshly owned
//! value; errors travel as error-bearing nulls and are consumed by the
//! truthiness tests of `&&`, `||`, `??`, and `?:`. A process-wide
//! interruption flag is polled at array, group, and row boundaries.

use crate::aggregate;
use crate::ast::{Member, Node};
use crate::cmd::{self, Flow};
use crate::context::{Context, LayerFlags, PathStep, WriteKind};
use crate::funcs::{AgCell, FnExtra, FuncKind, UserFn};
use crate::interrupt::interrupted;
use crate::op::Opcode;
use json::{equal, text, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Evaluate an expression under a context. `ag` carries the
/// accumulator cells provided by an enclosing aggregation scope.
pub fn eval(node: &Node, context: &mut Context, mut ag: Option<&mut [AgCell]>) -> Value {
    match node {
        Node::Literal(v) => v.clone(),
        Node::Name(name) => match context.lookup(name) {
            Some(v) => v,
            None => Value::error("unknownVar", format!("Unknown variable \"{}\"", name)),
        },
        // A bare regex has no value of its own; operators and functions
        // reach it through the node instead.
        Node::Regex(_) => Value::Null,
        Node::DefaultTable => match context.default_table() {
            Some((table, _)) => table,
            None => Value::error("noTable", "No default table for SELECT"),
        },
        Node::Environ(name) => eval_environ(name.as_deref(), context, ag),
        Node::Unary { op, expr } => {
            let v = eval(expr, context, ag);
            if v.is_error() {
                return v;
            }
            match op {
                Opcode::Not => Value::Bool(!v.is_true()),
                Opcode::Negate => match to_number(&v) {
                    Some(Num::Int(n)) => Value::from(-n),
                    Some(Num::Float(n)) => Value::from(-n),
                    None => type_error("-", &v),
                },
                Opcode::BitNot => match v.as_number() {
                    Some(n) => Value::from(!n.to_i64_lossy()),
                    None => type_error("~", &v),
                },
                _ => Value::Null,
            }
        }
        Node::Array(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for elem in elems {
                if interrupted() {
                    return interrupted_error();
                }
                out.push(eval(elem, context, ag.as_deref_mut()));
            }
            Value::Array(out)
        }
        Node::Object(members) => eval_object(members, context, ag),
        Node::Call(call) => {
            let args = eval_args(&call.args, context, ag.as_deref_mut());
            let regex = call.args.iter().find_map(|a| match a {
                Node::Regex(rx) => Some(rx),
                _ => None,
            });
            let extra = FnExtra { regex };
            match &call.func.kind {
                FuncKind::Builtin(f) => f(&extra, &args),
                FuncKind::User(user) => call_user(user, args, context),
                FuncKind::Aggregate(fns) => match (call.ag_slot, ag.as_deref_mut()) {
                    (Some(slot), Some(cells)) if slot < cells.len() => {
                        (fns.finish)(&args, &mut cells[slot])
                    }
                    _ => {
                        // No enclosing scope: fold the argument itself,
                        // element by element for arrays.
                        let mut cell = (fns.cell)();
                        match args.first() {
                            Some(first @ (Value::Array(_) | Value::Deferred(_))) => {
                                let mut row = args.clone();
                                for elem in first.elements() {
                                    row[0] = elem.into_owned();
                                    (fns.fold)(&row, &mut cell);
                                }
                            }
                            Some(_) => (fns.fold)(&args, &mut cell),
                            None => {}
                        }
                        (fns.finish)(&args, &mut cell)
                    }
                },
            }
        }
        Node::Ag { descriptor, expr } => {
            // This scope's accumulator lives for exactly one traversal:
            // zeroed here, folded once, then read by the final pass.
            let mut cells = descriptor.new_cells();
            aggregate::fold_row(expr, context, &mut cells);
            eval(expr, context, Some(&mut cells))
        }
        Node::Binary { op, left, right } => eval_binary(*op, left, right, context, ag),
    }
}

/// Evaluate an argument list left to right. Regex literal arguments
/// yield a null placeholder; the callee receives the compiled regex
/// out-of-band.
pub(crate) fn eval_args(
    args: &[Node],
    context: &mut Context,
    mut ag: Option<&mut [AgCell]>,
) -> Vec<Value> {
    args.iter()
        .map(|arg| eval(arg, context, ag.as_deref_mut()))
        .collect()
}

fn eval_binary(
    op: Opcode,
    left: &Node,
    right: &Node,
    context: &mut Context,
    mut ag: Option<&mut [AgCell]>,
) -> Value {
    // Short-circuit forms evaluate their right side conditionally.
    match op {
        Opcode::And => {
            let l = eval(left, context, ag.as_deref_mut());
            if !l.is_true() {
                return Value::Bool(false);
            }
            return Value::Bool(eval(right, context, ag).is_true());
        }
        Opcode::Or => {
            let l = eval(left, context, ag.as_deref_mut());
            if l.is_true() {
                return Value::Bool(true);
            }
            return Value::Bool(eval(right, context, ag).is_true());
        }
        Opcode::Coalesce => {
            let l = eval(left, context, ag.as_deref_mut());
            if !l.is_null() {
                return l;
            }
            return eval(right, context, ag);
        }
        Opcode::Question => {
            let cond = eval(left, context, ag.as_deref_mut()).is_true();
            return match right {
                Node::Binary { op: Opcode::Colon, left: then, right: other } => {
                    if cond {
                        eval(then, context, ag)
                    } else {
                        eval(other, context, ag)
                    }
                }
                // Lowered `where ? columns` has no else branch; a false
                // condition yields null, which each/group rows drop.
                _ => {
                    if cond {
                        eval(right, context, ag)
                    } else {
                        Value::Null
                    }
                }
            };
        }
        Opcode::Assign | Opcode::Append | Opcode::MaybeAssign => {
            let rvalue = eval(right, context, ag);
            if rvalue.is_error() {
                return rvalue;
            }
            return eval_assign(op, left, rvalue, context);
        }
        Opcode::Each | Opcode::Group | Opcode::Find => {
            let table = eval(left, context, ag);
            if table.is_error() {
                return table;
            }
            return match op {
                Opcode::Each => eval_each(&table, right, context),
                Opcode::Group => eval_group(&table, right, context),
                _ => eval_find(&table, right, context),
            };
        }
        _ => {}
    }

    let l = eval(left, context, ag.as_deref_mut());
    match op {
        Opcode::Dot => {
            if l.is_error() {
                return l;
            }
            let name = match right.as_name() {
                Some(name) => name,
                None => return Value::error("dotName", "The . operator requires a name"),
            };
            eval_dot(&l, name)
        }
        Opcode::DotDot => {
            if l.is_error() {
                return l;
            }
            match right.as_name().and_then(|name| deep_member(&l, name)) {
                Some(found) => found,
                None => Value::Null,
            }
        }
        Opcode::Subscript => eval_subscript(&l, right, context),
        Opcode::Like | Opcode::NotLike => {
            let matched = match (l.as_str(), right) {
                (Some(subject), Node::Regex(rx)) => rx.regex.is_match(subject),
                (Some(subject), _) => match eval(right, context, ag).as_str() {
                    Some(pattern) => text::like(subject, pattern),
                    None => false,
                },
                (None, _) => false,
            };
            Value::Bool(matched == (op == Opcode::Like))
        }
        Opcode::Ellipsis => {
            let r = eval(right, context, ag);
            match (l.as_i64(), r.as_i64()) {
                (Some(from), Some(to)) => {
                    Value::Deferred(json::RangeProvider::deferred(from, to))
                }
                _ => Value::error("range", "The ... operator requires two integers"),
            }
        }
        Opcode::Between => {
            let (lo, hi) = match right {
                Node::Binary { op: Opcode::And, left: lo, right: hi } => (lo, hi),
                _ => return Value::error("between", "Malformed BETWEEN range"),
            };
            let lo = eval(lo, context, ag.as_deref_mut());
            let hi = eval(hi, context, ag);
            let ge_lo = rel_cmp(&l, &lo).map(|o| o != Ordering::Less).unwrap_or(false);
            let le_hi = rel_cmp(&l, &hi).map(|o| o != Ordering::Greater).unwrap_or(false);
            Value::Bool(ge_lo && le_hi)
        }
        Opcode::In | Opcode::NotIn => {
            let r = eval(right, context, ag);
            match r {
                Value::Array(_) | Value::Deferred(_) => {
                    let found = r.elements().any(|e| loose_eq(&l, &e));
                    Value::Bool(found == (op == Opcode::In))
                }
                _ => Value::error("typeError", "The right side of IN must be an array"),
            }
        }
        Opcode::NJoin | Opcode::LJoin | Opcode::RJoin => {
            let r = eval(right, context, ag);
            if r.is_error() {
                return r;
            }
            eval_join(op, &l, &r)
        }
        Opcode::Values => {
            Value::error("values", "VALUES is only meaningful inside a SELECT")
        }
        op => {
            // The remaining operators evaluate both sides eagerly and
            // propagate operand errors.
            if l.is_error() {
                return l;
            }
            let r = eval(right, context, ag);
            if r.is_error() && !matches!(op, Opcode::Eq | Opcode::Ne | Opcode::EqStrict | Opcode::NeStrict) {
                return r;
            }
            match op {
                Opcode::Add => eval_add(&l, &r),
                Opcode::Subtract => arith(&l, &r, "-", i64::checked_sub, |a, b| a - b),
                Opcode::Multiply => arith(&l, &r, "*", i64::checked_mul, |a, b| a * b),
                Opcode::Divide => eval_divide(&l, &r),
                Opcode::Modulo => eval_modulo(&l, &r),
                Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => {
                    match (l.as_number(), r.as_number()) {
                        (Some(a), Some(b)) => {
                            let (a, b) = (a.to_i64_lossy(), b.to_i64_lossy());
                            Value::from(match op {
                                Opcode::BitAnd => a & b,
                                Opcode::BitOr => a | b,
                                _ => a ^ b,
                            })
                        }
                        _ => type_error("bitwise operator", if l.as_number().is_none() { &l } else { &r }),
                    }
                }
                Opcode::Eq => Value::Bool(loose_eq(&l, &r)),
                Opcode::Ne => Value::Bool(!loose_eq(&l, &r)),
                Opcode::EqStrict => Value::Bool(equal(&l, &r)),
                Opcode::NeStrict => Value::Bool(!equal(&l, &r)),
                Opcode::IcEq => Value::Bool(ic_eq(&l, &r)),
                Opcode::IcNe => Value::Bool(!ic_eq(&l, &r)),
                Opcode::Lt => rel(&l, &r, |o| o == Ordering::Less),
                Opcode::Le => rel(&l, &r, |o| o != Ordering::Greater),
                Opcode::Gt => rel(&l, &r, |o| o == Ordering::Greater),
                Opcode::Ge => rel(&l, &r, |o| o != Ordering::Less),
                // Colon pairs are consumed by ?:, object members, and
                // subscripts; a stray one has no value.
                Opcode::Colon | Opcode::MaybeMember => Value::Null,
                _ => Value::error("badOp", format!("Cannot evaluate operator {}", op.text())),
            }
        }
    }
}

fn eval_object(members: &[Member], context: &mut Context, mut ag: Option<&mut [AgCell]>) -> Value {
    let mut fields = Vec::with_capacity(members.len());
    for m in members {
        let v = eval(&m.expr, context, ag.as_deref_mut());
        if m.maybe && v.is_null() {
            continue;
        }
        fields.push(json::Field::new(m.name.clone(), v));
    }
    Value::Object(fields)
}

fn eval_environ(name: Option<&Node>, context: &mut Context, ag: Option<&mut [AgCell]>) -> Value {
    match name {
        None => Value::Object(
            std::env::vars()
                .map(|(name, value)| json::Field::new(name, Value::from(value)))
                .collect(),
        ),
        Some(node) => {
            let name = match node.as_name() {
                Some(name) => name.to_string(),
                None => match eval(node, context, ag) {
                    Value::String(s) => s,
                    other => return type_error("$", &other),
                },
            };
            match std::env::var(&name) {
                Ok(value) => Value::from(value),
                Err(_) => Value::Null,
            }
        }
    }
}

fn eval_dot(container: &Value, name: &str) -> Value {
    match container {
        Value::Object(_) => match container.get(name) {
            Some(v) => v.clone(),
            None => Value::error(
                "unknownMember",
                format!("Object has no member \"{}\"", name),
            ),
        },
        // A dot on a table projects the member across its rows.
        Value::Array(_) | Value::Deferred(_) => Value::Array(
            container
                .elements()
                .filter_map(|row| row.get(name).cloned())
                .collect(),
        ),
        other => Value::error(
            "notObject",
            format!("Attempt to access member \"{}\" in a {}", name, other.type_of(false)),
        ),
    }
}

/// Depth-first search for a member name, directly or in any nested
/// container.
fn deep_member(node: &Value, name: &str) -> Option<Value> {
    match node {
        Value::Object(fields) => match node.get(name) {
            Some(v) => Some(v.clone()),
            None => fields.iter().find_map(|f| deep_member(&f.value, name)),
        },
        Value::Array(_) | Value::Deferred(_) => {
            node.elements().find_map(|e| deep_member(&e, name))
        }
        _ => None,
    }
}

fn eval_subscript(container: &Value, index: &Node, context: &mut Context) -> Value {
    if container.is_error() {
        return container.clone();
    }

    // The [key:value] form scans a table for the first matching row.
    if let Node::Binary { op: Opcode::Colon, left: key, right: wanted } = index {
        let key = match key.as_name() {
            Some(key) => key.to_string(),
            None => return Value::error("badSubKey", "Invalid key for [key:value] subscript"),
        };
        let wanted = eval(wanted, context, None);
        for row in container.elements() {
            if let Some(have) = row.get(&key) {
                if equal(have, &wanted) {
                    return row.into_owned();
                }
            }
        }
        return Value::Null;
    }

    let idx = eval(index, context, None);
    match (container, &idx) {
        (Value::Array(_) | Value::Deferred(_), Value::Number(n)) => {
            match container.element(n.to_i64_lossy()) {
                Some(elem) => elem.into_owned(),
                None => Value::Null,
            }
        }
        (Value::Object(_), Value::String(key)) => {
            container.get(key).cloned().unwrap_or(Value::Null)
        }
        // A numeric object key is looked up by its text.
        (Value::Object(_), Value::Number(n)) => {
            container.get(&n.to_string()).cloned().unwrap_or(Value::Null)
        }
        (Value::String(s), Value::Number(n)) => {
            let chars = text::char_len(s) as i64;
            let mut at = n.to_i64_lossy();
            if at < 0 {
                at += chars;
            }
            if at < 0 || at >= chars {
                Value::Null
            } else {
                Value::from(text::substr(s, at as usize, Some(1)))
            }
        }
        _ => Value::error("subType", "Subscript has invalid type"),
    }
}

fn eval_assign(op: Opcode, lvalue: &Node, rvalue: Value, context: &mut Context) -> Value {
    let (root, path) = match lvalue_path(lvalue, context) {
        Ok(resolved) => resolved,
        Err(err) => return err,
    };
    let kind = match op {
        Opcode::Append => WriteKind::Append,
        Opcode::MaybeAssign => WriteKind::AssignIfNull,
        _ => WriteKind::Assign,
    };
    match context.write(&root, &path, rvalue.clone(), kind) {
        Ok(()) => rvalue,
        Err(err) => Value::error(err.key(), err.to_string()),
    }
}

/// Walk a syntactic l-value into its root name plus a path of member
/// and subscript steps, evaluating subscript expressions now.
fn lvalue_path(node: &Node, context: &mut Context) -> Result<(String, Vec<PathStep>), Value> {
    let bad = || Value::error("badLValue", "Invalid assignment");
    let mut steps = Vec::new();
    let mut node = node;
    let root = loop {
        match node {
            Node::Name(name) => break name.clone(),
            Node::Literal(Value::String(name)) => break name.clone(),
            Node::Binary { op: Opcode::Dot, left, right } => {
                match right.as_name() {
                    Some(name) => steps.push(PathStep::Member(name.to_string())),
                    None => return Err(bad()),
                }
                node = left.as_ref();
            }
            Node::Binary { op: Opcode::Subscript, left, right } => {
                match right.as_ref() {
                    Node::Binary { op: Opcode::Colon, left: key, right: wanted } => {
                        let key = match key.as_name() {
                            Some(key) => key.to_string(),
                            None => {
                                return Err(Value::error(
                                    "badSubKey",
                                    "Invalid key for [key:value] subscript",
                                ))
                            }
                        };
                        let wanted = eval(wanted, context, None);
                        steps.push(PathStep::KeyValue(key, wanted));
                    }
                    other => match eval(other, context, None) {
                        Value::Number(n) => steps.push(PathStep::Index(n.to_i64_lossy())),
                        Value::String(key) => steps.push(PathStep::Member(key)),
                        _ => return Err(Value::error("subType", "Subscript has invalid type")),
                    },
                }
                node = left.as_ref();
            }
            _ => return Err(bad()),
        }
    };
    steps.reverse();
    Ok((root, steps))
}

/// `table ## expr`: evaluate expr once per row with the row bound as
/// `this`, dropping null results. Aggregates inside expr fold over the
/// whole traversal first, so every row sees whole-table totals.
fn eval_each(table: &Value, right: &Node, context: &mut Context) -> Value {
    if !matches!(table, Value::Array(_) | Value::Deferred(_)) {
        return type_error("##", table);
    }
    let (descriptor, inner) = match right {
        Node::Ag { descriptor, expr } => (Some(descriptor), expr.as_ref()),
        other => (None, other),
    };

    let mut cells = descriptor.map(|d| d.new_cells());
    if let Some(cells) = &mut cells {
        for row in table.elements() {
            if interrupted() {
                return interrupted_error();
            }
            context.push_layer(row.into_owned(), LayerFlags::THIS);
            aggregate::fold_row(inner, context, cells);
            context.pop_layer();
        }
    }

    let mut out = Vec::new();
    for row in table.elements() {
        if interrupted() {
            return interrupted_error();
        }
        let row = row.into_owned();
        context.push_layer(row.clone(), LayerFlags::THIS);
        let v = eval(inner, context, cells.as_deref_mut());
        context.pop_layer();
        // A boolean keeps or drops the row itself (a lowered WHERE);
        // null drops it; anything else is the mapped value.
        match v {
            Value::Null | Value::Error(_) | Value::Bool(false) => {}
            Value::Bool(true) => out.push(row),
            v => out.push(v),
        }
    }
    Value::Array(out)
}

/// `groups # proj`: for each group (an array of rows), zero this
/// scope's accumulator, fold every row, then evaluate the projection
/// once with `this` bound to the group and member names resolving
/// through its first row.
fn eval_group(groups: &Value, right: &Node, context: &mut Context) -> Value {
    if !matches!(groups, Value::Array(_) | Value::Deferred(_)) {
        return type_error("#", groups);
    }
    let (descriptor, inner) = match right {
        Node::Ag { descriptor, expr } => (Some(descriptor), expr.as_ref()),
        other => (None, other),
    };

    let mut out = Vec::new();
    for group in groups.elements() {
        if interrupted() {
            return interrupted_error();
        }
        let group = group.into_owned();
        if !matches!(group, Value::Array(_) | Value::Deferred(_)) {
            return Value::error("group", "The # operator requires an array of groups");
        }

        let mut cells = descriptor.map(|d| d.new_cells());
        if let Some(cells) = &mut cells {
            for row in group.elements() {
                if interrupted() {
                    return interrupted_error();
                }
                context.push_layer(row.into_owned(), LayerFlags::THIS);
                aggregate::fold_row(inner, context, cells);
                context.pop_layer();
            }
        }

        let first = group
            .elements()
            .next()
            .map(Cow::into_owned)
            .unwrap_or(Value::Null);
        context.push_layer(group.clone(), LayerFlags::THIS);
        context.push_layer(first, LayerFlags::default());
        let v = eval(inner, context, cells.as_deref_mut());
        context.pop_layer();
        context.pop_layer();
        // As with each: a boolean projection (a lowered HAVING) keeps
        // or drops the whole group.
        match v {
            Value::Null | Value::Error(_) | Value::Bool(false) => {}
            Value::Bool(true) => out.push(group),
            v => out.push(v),
        }
    }
    Value::Array(out)
}

/// `table @ cond`: the rows for which cond holds.
fn eval_find(table: &Value, cond: &Node, context: &mut Context) -> Value {
    if !matches!(table, Value::Array(_) | Value::Deferred(_)) {
        return type_error("@", table);
    }
    let mut out = Vec::new();
    for row in table.elements() {
        if interrupted() {
            return interrupted_error();
        }
        let row = row.into_owned();
        context.push_layer(row.clone(), LayerFlags::THIS);
        let keep = eval(cond, context, None).is_true();
        context.pop_layer();
        if keep {
            out.push(row);
        }
    }
    Value::Array(out)
}

/// Natural/left/right join on the member names the two rows share.
fn eval_join(op: Opcode, left: &Value, right: &Value) -> Value {
    if !matches!(left, Value::Array(_) | Value::Deferred(_))
        || !matches!(right, Value::Array(_) | Value::Deferred(_))
    {
        return Value::error("typeError", "Join operators require two tables");
    }

    let rights: Vec<Value> = right.elements().map(Cow::into_owned).collect();
    let mut right_matched = vec![false; rights.len()];
    let mut out = Vec::new();

    for lrow in left.elements() {
        let mut matched = false;
        for (at, rrow) in rights.iter().enumerate() {
            let shared_equal = match (lrow.fields(), rrow.fields()) {
                (Some(lfields), Some(_)) => lfields
                    .iter()
                    .filter_map(|f| rrow.get(&f.property).map(|rv| (&f.value, rv)))
                    .all(|(lv, rv)| equal(lv, rv)),
                _ => false,
            };
            if !shared_equal {
                continue;
            }
            matched = true;
            right_matched[at] = true;

            let mut merged = lrow.clone().into_owned();
            if let Some(rfields) = rrow.fields() {
                for f in rfields {
                    if merged.get(&f.property).is_none() {
                        merged.set(&f.property, f.value.clone());
                    }
                }
            }
            out.push(merged);
        }
        if !matched && op == Opcode::LJoin {
            out.push(lrow.into_owned());
        }
    }
    if op == Opcode::RJoin {
        for (at, rrow) in rights.into_iter().enumerate() {
            if !right_matched[at] {
                out.push(rrow);
            }
        }
    }
    Value::Array(out)
}

fn call_user(user: &UserFn, args: Vec<Value>, context: &mut Context) -> Value {
    let depth = context.depth();
    context.push_call_frame(&user.params, &args);
    let flow = cmd::run_list(&user.body, context);
    context.truncate(depth);

    match flow {
        None => Value::Null,
        // A `return`, or the body's bare terminal value.
        Some(Flow::Return(v) | Flow::Output(v)) => v,
        Some(Flow::Break) => Value::error("break", "Misuse of \"break\""),
        Some(Flow::Continue) => Value::error("continue", "Misuse of \"continue\""),
        Some(Flow::Error(err)) => err.into_value(),
        Some(Flow::CaseMiss) => Value::Null,
    }
}

// Numeric coercion and arithmetic.

enum Num {
    Int(i64),
    Float(f64),
}

/// Numbers stay numbers, booleans count as 0/1, and numeric strings
/// convert; anything else is not a number.
fn to_number(v: &Value) -> Option<Num> {
    match v {
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(n.as_f64()),
        }),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Some(Num::Int(i))
            } else {
                s.parse::<f64>().ok().map(Num::Float)
            }
        }
        _ => None,
    }
}

fn type_error(what: &str, operand: &Value) -> Value {
    Value::error(
        "typeError",
        format!("Cannot apply {} to a {}", what, operand.type_of(false)),
    )
}

fn interrupted_error() -> Value {
    Value::error("interrupted", "Interrupted")
}

/// Integer arithmetic widens to float on overflow rather than wrapping.
fn arith(
    l: &Value,
    r: &Value,
    what: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (to_number(l), to_number(r)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => match int_op(a, b) {
            Some(n) => Value::from(n),
            None => Value::from(float_op(a as f64, b as f64)),
        },
        (Some(a), Some(b)) => Value::from(float_op(widen(a), widen(b))),
        (None, _) => type_error(what, l),
        (_, None) => type_error(what, r),
    }
}

fn widen(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

/// `+` adds numbers and concatenates when either side is a string.
fn eval_add(l: &Value, r: &Value) -> Value {
    if let (Some(Num::Int(a)), Some(Num::Int(b))) = (to_number(l), to_number(r)) {
        if !matches!(l, Value::String(_)) && !matches!(r, Value::String(_)) {
            return match a.checked_add(b) {
                Some(n) => Value::from(n),
                None => Value::from(a as f64 + b as f64),
            };
        }
    }
    match (l, r) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Value::from(format!("{}{}", l.text(), r.text()))
        }
        _ => arith(l, r, "+", i64::checked_add, |a, b| a + b),
    }
}

/// Division stays integral only when it is exact.
fn eval_divide(l: &Value, r: &Value) -> Value {
    match (to_number(l), to_number(r)) {
        (Some(_), Some(Num::Int(0))) => Value::error("divide", "Division by zero"),
        (Some(Num::Int(a)), Some(Num::Int(b))) if a % b == 0 => Value::from(a / b),
        (Some(a), Some(b)) => {
            let b = widen(b);
            if b == 0.0 {
                Value::error("divide", "Division by zero")
            } else {
                Value::from(widen(a) / b)
            }
        }
        (None, _) => type_error("/", l),
        (_, None) => type_error("/", r),
    }
}

fn eval_modulo(l: &Value, r: &Value) -> Value {
    match (to_number(l), to_number(r)) {
        (Some(_), Some(Num::Int(0))) => Value::error("divide", "Division by zero"),
        (Some(Num::Int(a)), Some(Num::Int(b))) => Value::from(a % b),
        (Some(a), Some(b)) => {
            let b = widen(b);
            if b == 0.0 {
                Value::error("divide", "Division by zero")
            } else {
                Value::from(widen(a) % b)
            }
        }
        (None, _) => type_error("%", l),
        (_, None) => type_error("%", r),
    }
}

// Comparison semantics.

/// Loose equality coerces across number/string/boolean.
fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(_) | Value::String(_), Value::Number(_) | Value::String(_))
            if std::mem::discriminant(l) != std::mem::discriminant(r) =>
        {
            match (to_number(l), to_number(r)) {
                (Some(a), Some(b)) => widen(a) == widen(b),
                _ => l.text() == r.text(),
            }
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) => l.is_true() == r.is_true(),
        _ => equal(l, r),
    }
}

/// `=` compares strings case-insensitively and numbers numerically.
fn ic_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::String(a), Value::String(b)) => text::caseless_eq(a, b),
        _ => loose_eq(l, r),
    }
}

/// Relational ordering: numbers numerically (with string coercion),
/// strings case-insensitively. Null never compares.
fn rel_cmp(l: &Value, r: &Value) -> Option<Ordering> {
    if l.is_null() || r.is_null() {
        return None;
    }
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Some(text::caseless_cmp(a, b));
    }
    match (to_number(l), to_number(r)) {
        (Some(a), Some(b)) => widen(a).partial_cmp(&widen(b)),
        _ => Some(json::compare(l, r)),
    }
}

fn rel(l: &Value, r: &Value, test: fn(Ordering) -> bool) -> Value {
    Value::Bool(rel_cmp(l, r).map(test).unwrap_or(false))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse;
    use serde_json::json;

    fn run(src: &str) -> Value {
        let mut context = Context::std(None);
        context.declare("t", Value::from(json!([
            {"a": 1, "b": "x"},
            {"a": 2, "b": "y"},
            {"a": 1, "b": "z"},
        ])), false).unwrap();
        let node = parse(src, true).expect(src);
        eval(&node, &mut context, None)
    }

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("1 + 2 * 3"), v(json!(7)));
        assert_eq!(run("10 - 2 - 3"), v(json!(5)));
        assert_eq!(run("7 / 2"), v(json!(3.5)));
        assert_eq!(run("6 / 2"), v(json!(3)));
        assert_eq!(run("7 % 3"), v(json!(1)));
        assert_eq!(run("\"a\" + 1"), v(json!("a1")));
        assert!(run("1 / 0").is_error());
    }

    #[test]
    fn test_overflow_widens() {
        let out = run("9223372036854775807 + 1");
        assert_eq!(out.as_f64(), Some(9223372036854775807.0 + 1.0));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("1 < 2"), v(json!(true)));
        assert_eq!(run("\"Apple\" = \"APPLE\""), v(json!(true)));
        assert_eq!(run("\"Apple\" == \"APPLE\""), v(json!(false)));
        assert_eq!(run("1 == \"1\""), v(json!(true)));
        assert_eq!(run("1 === \"1\""), v(json!(false)));
        assert_eq!(run("null == null"), v(json!(true)));
        assert_eq!(run("2 between 1 and 3"), v(json!(true)));
        assert_eq!(run("5 not in [1, 2]"), v(json!(true)));
        assert!(run("5 in 7").is_error());
    }

    #[test]
    fn test_short_circuit() {
        // The right side must not be evaluated: an unknown variable
        // there would otherwise yield an error.
        assert_eq!(run("false && bogus"), v(json!(false)));
        assert_eq!(run("true || bogus"), v(json!(true)));
        assert_eq!(run("false ? bogus : 2"), v(json!(2)));
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(run("{a:1,b:2} ?? \"nope\""), v(json!({"a": 1, "b": 2})));
        assert_eq!(run("null ?? \"nope\""), v(json!("nope")));
        // An error on the left counts as null.
        assert_eq!(run("bogus ?? 5"), v(json!(5)));
    }

    #[test]
    fn test_dot_and_subscript() {
        assert_eq!(run("{x: 1, \"y\": 2, z: {w:3}}.z.w"), v(json!(3)));
        assert_eq!(run("t.a"), v(json!([1, 2, 1])));
        assert_eq!(run("[10, 20, 30][-1]"), v(json!(30)));
        assert_eq!(run("{list: [1,2]}[\"list\"]"), v(json!([1, 2])));
        assert_eq!(run("t[a: 2].b"), v(json!("y")));
        assert_eq!(run("\"héllo\"[1]"), v(json!("é")));
    }

    #[test]
    fn test_like_and_regex() {
        assert_eq!(run("\"hello\" like \"h%o\""), v(json!(true)));
        assert_eq!(run("\"hello\" not like \"x%\""), v(json!(true)));
        assert_eq!(run("\"hello\" like /L+/i"), v(json!(true)));
    }

    #[test]
    fn test_each_and_find() {
        assert_eq!(run("t ## a"), v(json!([1, 2, 1])));
        assert_eq!(run("t @ (a == 1) ## b"), v(json!(["x", "z"])));
        // Rows mapping to null drop out.
        assert_eq!(run("t ## (a == 1 ? b)"), v(json!(["x", "z"])));
    }

    #[test]
    fn test_each_aggregates_see_whole_table() {
        assert_eq!(run("t ## {b: b, total: sum(a)}"), v(json!([
            {"b": "x", "total": 4},
            {"b": "y", "total": 4},
            {"b": "z", "total": 4},
        ])));
    }

    #[test]
    fn test_aggregate_calls() {
        assert_eq!(run("sum([1, 2, 3, 4])"), v(json!(10)));
        assert_eq!(run("sum([])"), v(json!(0)));
        assert_eq!(run("avg([])"), v(json!(null)));
        assert_eq!(run("sum(t.a)"), v(json!(4)));
        assert_eq!(run("avg(t.a) == sum(t.a) / count(t.a)"), v(json!(true)));
    }

    #[test]
    fn test_assignment() {
        let mut context = Context::std(None);
        context.declare("x", Value::Null, false).unwrap();
        let node = parse("x = 5", true).unwrap();
        eval(&node, &mut context, None);
        assert_eq!(context.lookup("x"), Some(v(json!(5))));

        context.declare("k", v(json!(1)), true).unwrap();
        let node = parse("k = 2", true).unwrap();
        let out = eval(&node, &mut context, None);
        assert_eq!(out.as_error().unwrap().key, "const");
    }

    #[test]
    fn test_ellipsis_range() {
        assert_eq!(run("1 ... 4"), v(json!([1, 2, 3, 4])));
        assert_eq!(run("sum(1 ... 4)"), v(json!(10)));
    }

    #[test]
    fn test_joins() {
        let mut context = Context::std(None);
        context
            .declare("l", v(json!([{"k": 1, "a": "x"}, {"k": 2, "a": "y"}])), false)
            .unwrap();
        context
            .declare("r", v(json!([{"k": 1, "b": "m"}, {"k": 3, "b": "n"}])), false)
            .unwrap();
        let run = |src: &str, context: &mut Context| {
            eval(&parse(src, false).unwrap(), context, None)
        };
        assert_eq!(run("l #= r", &mut context), v(json!([{"k": 1, "a": "x", "b": "m"}])));
        assert_eq!(
            run("l #< r", &mut context),
            v(json!([{"k": 1, "a": "x", "b": "m"}, {"k": 2, "a": "y"}]))
        );
        assert_eq!(
            run("l #> r", &mut context),
            v(json!([{"k": 1, "a": "x", "b": "m"}, {"k": 3, "b": "n"}]))
        );
    }

    #[test]
    fn test_unknown_name_is_error() {
        let out = run("bogus");
        assert_eq!(out.as_error().unwrap().key, "unknownVar");
    }
}
