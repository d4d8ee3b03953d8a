//! Aggregate discovery and folding.
//!
//! After parsing, `discover` walks the finished tree and, at every
//! aggregation scope (the tree root and the right operand of each
//! `#`/`##`), collects the aggregate function calls within, assigns
//! each one a slot index, and wraps the scope in an `Ag` node owning
//! the layout. The accumulator itself is built per evaluation — never
//! stored in the tree — so one parsed tree can be evaluated from many
//! threads at once, each with its own cells.

use crate::ast::{AgDescriptor, Node};
use crate::context::Context;
use crate::eval;
use crate::funcs::{AgCell, FuncKind};
use crate::op::Opcode;
use json::Value;
use std::sync::Arc;

impl AgDescriptor {
    /// Zero-initialised accumulator cells, one per aggregate call.
    pub fn new_cells(&self) -> Vec<AgCell> {
        self.slots
            .iter()
            .map(|def| match &def.kind {
                FuncKind::Aggregate(fns) => (fns.cell)(),
                _ => AgCell::Count(0),
            })
            .collect()
    }
}

/// Does this expression call an aggregate function anywhere, including
/// inside nested each/group scopes?
pub fn uses_aggregate(node: &Node) -> bool {
    match node {
        Node::Call(call) => {
            call.func.is_aggregate() || call.args.iter().any(uses_aggregate)
        }
        Node::Binary { left, right, .. } => uses_aggregate(left) || uses_aggregate(right),
        Node::Unary { expr, .. } => uses_aggregate(expr),
        Node::Array(elems) => elems.iter().any(uses_aggregate),
        Node::Object(members) => members.iter().any(|m| uses_aggregate(&m.expr)),
        Node::Ag { .. } => true,
        Node::Environ(Some(name)) => uses_aggregate(name),
        _ => false,
    }
}

/// Tag the tree's aggregation scopes. Returns the (possibly wrapped)
/// tree; `Ag` nodes appear wherever a scope contains aggregate calls.
pub fn discover(node: Node) -> Node {
    let mut slots = Vec::new();
    let node = walk(node, &mut slots);
    if slots.is_empty() {
        node
    } else {
        Node::Ag {
            descriptor: AgDescriptor { slots },
            expr: Box::new(node),
        }
    }
}

fn walk(node: Node, slots: &mut Vec<Arc<crate::funcs::FuncDef>>) -> Node {
    match node {
        // The right operand of each/group is its own aggregation scope;
        // do not descend past it into a still-deeper one.
        Node::Binary { op: op @ (Opcode::Each | Opcode::Group), left, right } => Node::Binary {
            op,
            left: Box::new(walk(*left, slots)),
            right: Box::new(discover(*right)),
        },
        Node::Binary { op, left, right } => Node::Binary {
            op,
            left: Box::new(walk(*left, slots)),
            right: Box::new(walk(*right, slots)),
        },
        Node::Unary { op, expr } => Node::Unary { op, expr: Box::new(walk(*expr, slots)) },
        Node::Array(elems) => {
            Node::Array(elems.into_iter().map(|e| walk(e, slots)).collect())
        }
        Node::Object(members) => Node::Object(
            members
                .into_iter()
                .map(|mut m| {
                    m.expr = walk(m.expr, slots);
                    m
                })
                .collect(),
        ),
        Node::Call(mut call) => {
            if call.func.is_aggregate() {
                call.ag_slot = Some(slots.len());
                slots.push(call.func.clone());
            }
            call.args = call.args.into_iter().map(|a| walk(a, slots)).collect();
            Node::Call(call)
        }
        Node::Environ(Some(name)) => Node::Environ(Some(Box::new(walk(*name, slots)))),
        leaf => leaf,
    }
}

/// Fold one row into the accumulator: revisit each aggregate call in
/// this scope, evaluate its argument list under the current context,
/// and apply its fold step to its slot. An array first argument folds
/// element by element, which is what lets `sum([1,2,3])` work outside
/// any grouping operator.
pub fn fold_row(node: &Node, context: &mut Context, cells: &mut [AgCell]) {
    match node {
        Node::Binary { op: Opcode::Each | Opcode::Group, left, .. } => {
            // The right operand folds in its own scope.
            fold_row(left, context, cells);
        }
        Node::Binary { left, right, .. } => {
            fold_row(left, context, cells);
            fold_row(right, context, cells);
        }
        Node::Unary { expr, .. } => fold_row(expr, context, cells),
        Node::Array(elems) => {
            for elem in elems {
                fold_row(elem, context, cells);
            }
        }
        Node::Object(members) => {
            for m in members {
                fold_row(&m.expr, context, cells);
            }
        }
        Node::Environ(Some(name)) => fold_row(name, context, cells),
        Node::Call(call) => {
            for arg in &call.args {
                fold_row(arg, context, cells);
            }
            if let (Some(slot), FuncKind::Aggregate(fns)) = (call.ag_slot, &call.func.kind) {
                let args = eval::eval_args(&call.args, context, Some(&mut *cells));
                let cell = &mut cells[slot];
                match args.first() {
                    Some(first @ (Value::Array(_) | Value::Deferred(_))) => {
                        let mut row = args.clone();
                        for elem in first.elements() {
                            row[0] = elem.into_owned();
                            (fns.fold)(&row, cell);
                        }
                    }
                    _ => (fns.fold)(&args, cell),
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn test_root_scope_wrapped() {
        let node = parse("sum(n) / count(*)", false).unwrap();
        match node {
            Node::Ag { descriptor, .. } => {
                assert_eq!(descriptor.slots.len(), 2);
                assert_eq!(descriptor.slots[0].name, "sum");
                assert_eq!(descriptor.slots[1].name, "count");
            }
            other => panic!("root not wrapped: {:?}", other),
        }
    }

    #[test]
    fn test_each_scope_is_separate() {
        let node = parse("t ## {n: sum(x)}", false).unwrap();
        // The aggregate belongs to the each's right operand, so the
        // root is not wrapped.
        match node {
            Node::Binary { op: Opcode::Each, right, .. } => {
                assert!(matches!(*right, Node::Ag { .. }))
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_no_aggregates_no_wrap() {
        let node = parse("1 + length(a)", false).unwrap();
        assert!(!matches!(node, Node::Ag { .. }));
    }

    #[test]
    fn test_distinct_slots() {
        let node = parse("sum(a) + sum(b)", false).unwrap();
        match node {
            Node::Ag { expr, .. } => match *expr {
                Node::Binary { left, right, .. } => {
                    let slot = |n: &Node| match n {
                        Node::Call(c) => c.ag_slot.unwrap(),
                        _ => panic!("not a call"),
                    };
                    assert_ne!(slot(&left), slot(&right));
                }
                other => panic!("unexpected shape {:?}", other),
            },
            other => panic!("unexpected shape {:?}", other),
        }
    }
}
