//! Common helpers for end-to-end expression and script tests.

#![allow(dead_code)]

use calc::{cmd, eval, parse, Context};
use json::Value;

/// Evaluate one expression against a fresh standard context.
pub fn eval_str(src: &str) -> Value {
    let mut context = Context::std(None);
    eval_in(src, &mut context)
}

/// Evaluate one expression against the given context.
pub fn eval_in(src: &str, context: &mut Context) -> Value {
    let node = parse(src, true).unwrap_or_else(|err| panic!("parse({:?}): {}", src, err));
    eval(&node, context, None)
}

/// A context with a variable bound to a JSON fixture.
pub fn context_with(name: &str, fixture: serde_json::Value) -> Context {
    let mut context = Context::std(None);
    context
        .declare(name, Value::from(fixture), false)
        .expect("declare fixture");
    context
}

/// Run a script and return the value of its last output expression.
pub fn run_script(src: &str) -> Value {
    let mut context = Context::std(None);
    cmd::run_script(src, &mut context)
        .unwrap_or_else(|err| panic!("script {:?} failed: {}", src, err.message))
        .expect("script produced no output value")
}

pub fn v(fixture: serde_json::Value) -> Value {
    Value::from(fixture)
}
