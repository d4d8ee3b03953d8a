//! The function registry and the built-in function library.
//!
//! Every function receives its actual parameters as a slice of values;
//! for calls of the form `expr.func(args)`, `expr` arrives as the first
//! parameter. Functions return newly built values and never reuse parts
//! of the argument list. Aggregate functions come in two parts: a fold
//! step called once per row with a typed accumulator cell, and a finish
//! step that produces the final value from the cell.

mod agg;
mod strings;
mod tables;

pub use agg::AgCell;

use crate::ast::RegexNode;
use crate::cmd::Cmd;
use json::{text, Value};
use std::sync::{Arc, RwLock};

/// Out-of-band state handed to built-ins: a regex literal argument, if
/// the call had one, arrives here rather than through the value slice.
#[derive(Default)]
pub struct FnExtra<'a> {
    pub regex: Option<&'a RegexNode>,
}

pub type BuiltinFn = fn(&FnExtra, &[Value]) -> Value;

pub struct AggregateFns {
    /// Folds one row into the accumulator cell.
    pub fold: fn(&[Value], &mut AgCell),
    /// Produces the final value after the last row.
    pub finish: fn(&[Value], &mut AgCell) -> Value,
    /// Builds the zero-initialised cell.
    pub cell: fn() -> AgCell,
}

/// A function defined in script source rather than native code.
pub struct UserFn {
    /// Parameter template: an object mapping names to default values.
    pub params: Value,
    pub body: Arc<Vec<Cmd>>,
}

pub enum FuncKind {
    Builtin(BuiltinFn),
    Aggregate(AggregateFns),
    User(UserFn),
}

pub struct FuncDef {
    pub name: String,
    /// Argument list as display text, e.g. "str:string, start:number".
    pub args: String,
    /// Return type as display text.
    pub ret: String,
    pub kind: FuncKind,
}

impl FuncDef {
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, FuncKind::Aggregate(_))
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self.kind, FuncKind::User(_))
    }
}

impl std::fmt::Debug for FuncDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FuncDef({})", self.name)
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: RwLock<Vec<Arc<FuncDef>>> = RwLock::new(builtins());
}

/// Look up a function: exact name first, then case-insensitive, then as
/// an abbreviation (prefix) when the name is at least two characters.
pub fn lookup(name: &str) -> Option<Arc<FuncDef>> {
    let registry = REGISTRY.read().unwrap();
    if let Some(def) = registry.iter().find(|def| def.name == name) {
        return Some(def.clone());
    }
    if let Some(def) = registry.iter().find(|def| text::caseless_eq(&def.name, name)) {
        return Some(def.clone());
    }
    if text::char_len(name) > 1 {
        if let Some(def) = registry.iter().find(|def| text::abbrev_match(name, &def.name)) {
            return Some(def.clone());
        }
    }
    None
}

/// Register or replace a native function. Intended for start-up and
/// plugin-style extension; callers serialise registration themselves.
pub fn register(def: FuncDef) {
    let def = Arc::new(def);
    let mut registry = REGISTRY.write().unwrap();
    match registry.iter_mut().find(|have| have.name == def.name) {
        Some(have) => *have = def,
        None => registry.push(def),
    }
}

/// Define or redefine a user function. Fails if the name resolves to a
/// built-in, which cannot be shadowed.
pub fn register_user(name: &str, params: Value, args: String, ret: String, body: Arc<Vec<Cmd>>) -> Result<(), ()> {
    if let Some(existing) = lookup(name) {
        if existing.is_builtin() {
            return Err(());
        }
    }
    register(FuncDef {
        name: name.to_string(),
        args,
        ret,
        kind: FuncKind::User(UserFn { params, body }),
    });
    Ok(())
}

/// Every user-defined function, for the body-less `function` command.
pub fn user_functions() -> Vec<Arc<FuncDef>> {
    REGISTRY
        .read()
        .unwrap()
        .iter()
        .filter(|def| !def.is_builtin())
        .cloned()
        .collect()
}

fn builtin(name: &str, args: &str, ret: &str, fun: BuiltinFn) -> Arc<FuncDef> {
    Arc::new(FuncDef {
        name: name.to_string(),
        args: args.to_string(),
        ret: ret.to_string(),
        kind: FuncKind::Builtin(fun),
    })
}

fn aggregate(
    name: &str,
    args: &str,
    ret: &str,
    fns: AggregateFns,
) -> Arc<FuncDef> {
    Arc::new(FuncDef {
        name: name.to_string(),
        args: args.to_string(),
        ret: ret.to_string(),
        kind: FuncKind::Aggregate(fns),
    })
}

#[rustfmt::skip]
fn builtins() -> Vec<Arc<FuncDef>> {
    let mut defs = vec![
        builtin("toUpperCase", "str:string", "string", strings::to_upper_case),
        builtin("toLowerCase", "str:string", "string", strings::to_lower_case),
        builtin("toMixedCase", "str:string, exceptions?:string[]", "string", strings::to_mixed_case),
        builtin("trim", "str:string", "string", strings::trim),
        builtin("trimStart", "str:string", "string", strings::trim_start),
        builtin("trimEnd", "str:string", "string", strings::trim_end),
        builtin("substr", "str:string, start:number, length?:number", "string", strings::substr),
        builtin("charAt", "str:string, pos?:number", "string", strings::char_at),
        builtin("charCodeAt", "str:string, pos?:number", "number", strings::char_code_at),
        builtin("fromCharCode", "what:number|string|array, ...", "string", strings::from_char_code),
        builtin("repeat", "str:string, count:number", "string", strings::repeat),
        builtin("replace", "str:string, find:string|regex, replace:string", "string", strings::replace),
        builtin("replaceAll", "str:string, find:string|regex, replace:string", "string", strings::replace_all),
        builtin("split", "str:string, delim?:string|regex, limit?:number", "string[]", strings::split),
        builtin("startsWith", "subj:string, srch:string, ignorecase?:true", "boolean", strings::starts_with),
        builtin("endsWith", "subj:string, srch:string, ignorecase?:true", "boolean", strings::ends_with),
        builtin("hex", "val:string|number, length?:number", "string", strings::hex),
        builtin("toString", "val:any", "string", strings::to_string),
        builtin("String", "val:any", "string", strings::to_string),
        builtin("toFixed", "num:number, precision:number", "string", strings::to_fixed),
        builtin("wrap", "text:string, width?:number", "string", strings::wrap),

        builtin("isString", "val:any", "boolean", is_string),
        builtin("isNumber", "val:any", "boolean", is_number),
        builtin("isInteger", "val:any", "boolean", is_integer),
        builtin("isNaN", "val:any", "boolean", is_nan),
        builtin("isArray", "val:any", "boolean", is_array),
        builtin("isTable", "val:any", "boolean", is_table),
        builtin("isObject", "val:any", "boolean", is_object),
        builtin("typeOf", "val:any, extended?:true", "string", type_of),
        builtin("sizeOf", "val:any", "number", size_of),
        builtin("widthOf", "str:string", "number", width_of),

        builtin("length", "val:array|object|string", "number", length),
        builtin("keys", "obj:object", "string[]", tables::keys),
        builtin("keysValues", "val:object|table", "table", tables::keys_values),
        builtin("concat", "item:array|string, ...more", "array|string", tables::concat),
        builtin("slice", "val:array|string, start:number, end?:number", "array|string", tables::slice),
        builtin("flat", "arr:array, depth?:number", "array", tables::flat),
        builtin("orderBy", "tbl:table, columns:string|string[]", "table", tables::order_by),
        builtin("groupBy", "tbl:table, columns:string|string[]", "array", tables::group_by),
        builtin("distinct", "arr:array, strict?:true, columns?:string[]", "array", tables::distinct),
        builtin("unroll", "tbl:table, nestlist:string|string[]", "table", tables::unroll),
        builtin("includes", "subj:string|array, find:string|regex, ignorecase?:true", "boolean", tables::includes),
        builtin("indexOf", "subj:string|array, find:string|regex, ignorecase?:true", "number", tables::index_of),
        builtin("lastIndexOf", "subj:string|array, find:string|regex, ignorecase?:true", "number", tables::last_index_of),
        builtin("find", "haystack:array|object, needle:string|regex|number, key?:string", "table", tables::find),

        builtin("abs", "val:number", "number", abs),
        builtin("sign", "val:number", "number", sign),
        builtin("parseInt", "str:string", "number", parse_int),
        builtin("parseFloat", "str:string", "number", parse_float),
        builtin("parse", "str:string", "any", parse_json),
        builtin("stringify", "data:any", "string", stringify),
        builtin("getenv", "str:string", "string|null", getenv),
    ];
    defs.extend(agg::builtins());
    defs
}

fn is_string(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::String(_))))
}

fn is_number(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Number(_))))
}

fn is_integer(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(args.first().and_then(Value::as_number).map(|n| n.is_integer()).unwrap_or(false))
}

fn is_nan(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Number(n)) => Value::Bool(n.is_nan()),
        _ => Value::Bool(true),
    }
}

fn is_array(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Array(_) | Value::Deferred(_))))
}

fn is_table(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(args.first().map(Value::is_table).unwrap_or(false))
}

fn is_object(_: &FnExtra, args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Object(_))))
}

fn type_of(_: &FnExtra, args: &[Value]) -> Value {
    let extended = args.get(1).map(Value::is_true).unwrap_or(false);
    match args.first() {
        Some(v) => Value::from(v.type_of(extended)),
        None => Value::from("null"),
    }
}

fn size_of(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::from(v.len() as i64),
        None => Value::from(0),
    }
}

fn width_of(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(text::char_len(s) as i64),
        _ => Value::Null,
    }
}

fn length(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(v @ (Value::Array(_) | Value::Deferred(_) | Value::Object(_) | Value::String(_))) => {
            Value::from(v.len() as i64)
        }
        _ => Value::Null,
    }
}

fn abs(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::from(i.abs()),
            None => Value::from(n.as_f64().abs()),
        },
        _ => Value::Null,
    }
}

fn sign(_: &FnExtra, args: &[Value]) -> Value {
    match args.first().and_then(Value::as_f64) {
        Some(n) if n > 0.0 => Value::from(1),
        Some(n) if n < 0.0 => Value::from(-1),
        Some(_) => Value::from(0),
        None => Value::Null,
    }
}

fn parse_int(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => {
            let s = s.trim();
            let digits: &str = match s.find(|c: char| !c.is_ascii_digit() && c != '-' && c != '+') {
                Some(end) => &s[..end],
                None => s,
            };
            match digits.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::Null,
            }
        }
        Some(Value::Number(n)) => Value::from(n.to_i64_lossy()),
        _ => Value::Null,
    }
}

fn parse_float(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::Null,
        },
        Some(Value::Number(n)) => Value::from(n.as_f64()),
        _ => Value::Null,
    }
}

fn parse_json(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => match Value::parse_str(s) {
            Ok(v) => v,
            Err(err) => Value::error("parse", err.to_string()),
        },
        _ => Value::Null,
    }
}

fn stringify(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(v) => Value::from(v.to_string()),
        None => Value::from("null"),
    }
}

fn getenv(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(name)) => match std::env::var(name) {
            Ok(value) => Value::from(value),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup_phases() {
        assert_eq!(lookup("toUpperCase").unwrap().name, "toUpperCase");
        assert_eq!(lookup("TOUPPERCASE").unwrap().name, "toUpperCase");
        assert_eq!(lookup("toUpper").unwrap().name, "toUpperCase");
        assert!(lookup("t").is_none());
        assert!(lookup("noSuchFunction").is_none());
    }

    #[test]
    fn test_aggregates_are_marked() {
        assert!(lookup("sum").unwrap().is_aggregate());
        assert!(lookup("count").unwrap().is_aggregate());
        assert!(!lookup("slice").unwrap().is_aggregate());
    }

    #[test]
    fn test_user_cannot_shadow_builtin() {
        let body = Arc::new(Vec::new());
        assert!(register_user("sum", Value::Object(vec![]), String::new(), String::new(), body).is_err());
    }
}
