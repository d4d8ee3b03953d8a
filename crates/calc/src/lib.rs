//! A JSON-centric expression and query engine.
//!
//! Text goes in one end (`parse`), an expression tree comes out, and the
//! tree evaluates against a layered [`Context`] of JSON values (`eval`).
//! Expressions cover arithmetic, logic, strings, regular expressions,
//! subscripts and dots, array/object generators, aggregate functions, and
//! a SQL-like `SELECT` that is lowered to ordinary operators at parse
//! time. The `cmd` module wraps expressions in a small statement language
//! (if/while/for/try/var/function/...).

mod aggregate;
mod ast;
pub mod cmd;
mod config;
mod context;
mod eval;
mod files;
pub mod funcs;
mod interrupt;
mod lex;
mod op;
mod parse;
mod select;

pub use ast::{AgDescriptor, Member, Node, RegexNode};
pub use config::{default_config, default_system};
pub use context::{AssignError, Context, LayerFlags};
pub use eval::eval;
pub use interrupt::{interrupt, interrupted, reset_interrupt};
pub use op::Opcode;
pub use parse::{parse, parse_tail, ParseError};

use json::Value;

/// Parse and evaluate one expression against a context. Assignment is
/// enabled, as at a script's top level.
pub fn calc(src: &str, context: &mut Context) -> Value {
    match parse(src, true) {
        Ok(node) => eval(&node, context, None),
        Err(err) => Value::error_at(err.offset(), err.key(), err.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_calc_round_trip() {
        let mut context = Context::std(None);
        assert_eq!(calc("1 + 2 * 3", &mut context), Value::from(7));
        assert_eq!(
            calc("{x: 1, \"y\": 2, z: {w:3}}.z.w", &mut context),
            Value::from(3)
        );
        assert_eq!(
            calc("[1, [2, 3], null]", &mut context),
            Value::from(json!([1, [2, 3], null]))
        );
    }

    #[test]
    fn test_calc_parse_error() {
        let mut context = Context::std(None);
        let result = calc("1 +", &mut context);
        assert!(result.is_error());
    }
}
