//! SQL SELECT support. While a SELECT parses, its clauses accumulate in
//! a `SelectAcc`; when the SELECT reduces it is lowered into a tree of
//! ordinary operators and built-in calls, so no SQL survives into the
//! evaluator.

use crate::aggregate;
use crate::ast::{Member, Node};
use crate::op::Opcode;
use crate::parse::{self, ParseError};
use json::Value;

#[derive(Default)]
pub struct SelectAcc {
    /// Column list as a comma chain of name:expr members, or None
    /// for `*`.
    pub columns: Option<Node>,
    pub distinct: bool,
    pub from: Option<Node>,
    /// Trailing FROM names: nested lists to unroll.
    pub unroll: Vec<Value>,
    pub where_: Option<Node>,
    pub group_by: Vec<Value>,
    pub having: Option<Node>,
    /// Member names, each optionally preceded by `true` for descending.
    pub order_by: Vec<Value>,
    pub limit: Option<Node>,
}

impl std::fmt::Debug for SelectAcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectAcc")
            .field("distinct", &self.distinct)
            .field("group_by", &self.group_by)
            .field("order_by", &self.order_by)
            .finish_non_exhaustive()
    }
}

impl SelectAcc {
    /// Lower to plain operators:
    ///
    /// ```text
    /// slice(distinct(orderBy(groupBy(unroll(FROM) ## WHERE, keys)
    ///                        # (HAVING ? columns), order), true), 0, LIMIT)
    /// ```
    ///
    /// with each wrapper present only when its clause is.
    pub fn lower(self: Box<Self>, offset: usize) -> Result<Node, ParseError> {
        let SelectAcc {
            columns,
            mut distinct,
            from,
            unroll,
            mut where_,
            group_by,
            mut having,
            order_by,
            limit,
        } = *self;

        let columns = match columns {
            Some(chain) => Some(parse::to_members(parse::fixcomma(chain), offset)?),
            None => None,
        };

        // No explicit DISTINCT, but every column aggregates: an implied
        // grouping, so "SELECT count(*) FROM t" yields a single row.
        if !distinct {
            if let Some(columns) = &columns {
                distinct = !columns.is_empty()
                    && columns.iter().all(|m| aggregate::uses_aggregate(&m.expr));
            }
        }

        // HAVING without GROUP BY is just more WHERE.
        if having.is_some() && group_by.is_empty() {
            where_ = match (where_, having.take()) {
                (Some(w), Some(h)) => Some(Node::binary(Opcode::And, w, h)),
                (None, h) => h,
                (w, None) => w,
            };
        }

        let mut ja = match from {
            Some(from) => from,
            None => Node::DefaultTable,
        };
        if !unroll.is_empty() {
            ja = Node::call_named("unroll", vec![ja, Node::Literal(Value::Array(unroll))]);
        }

        let object = |members: Vec<Member>| Node::Object(members);

        if !group_by.is_empty() {
            // Filter rows before grouping.
            if let Some(where_) = where_ {
                ja = Node::binary(Opcode::Each, ja, where_);
            }
            ja = Node::call_named("groupBy", vec![ja, Node::Literal(Value::Array(group_by))]);

            // The per-group projection; `this` when nothing else.
            let proj = match (having, columns) {
                (Some(having), Some(columns)) => {
                    Node::binary(Opcode::Question, having, object(columns))
                }
                (Some(having), None) => having,
                (None, Some(columns)) => object(columns),
                (None, None) => Node::name("this"),
            };
            ja = Node::binary(Opcode::Group, ja, proj);
        } else if where_.is_some() || columns.is_some() {
            let each = match (where_, columns) {
                (Some(where_), Some(columns)) => {
                    Node::binary(Opcode::Question, where_, object(columns))
                }
                (Some(where_), None) => where_,
                (None, Some(columns)) => object(columns),
                (None, None) => unreachable!(),
            };
            ja = Node::binary(Opcode::Each, ja, each);
        }

        if !order_by.is_empty() {
            ja = Node::call_named("orderBy", vec![ja, Node::Literal(Value::Array(order_by))]);
        }
        if distinct {
            ja = Node::call_named("distinct", vec![ja, Node::literal(true)]);
        }
        if let Some(limit) = limit {
            ja = Node::call_named("slice", vec![ja, Node::literal(0i64), limit]);
        }
        Ok(ja)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse;

    fn lowered(src: &str) -> Node {
        parse(src, false).unwrap()
    }

    fn call_name(node: &Node) -> &str {
        match node {
            Node::Call(call) => &call.func.name,
            _ => panic!("not a call: {:?}", node),
        }
    }

    #[test]
    fn test_bare_select_uses_default_table() {
        // "SELECT" alone wraps the default table in nothing at all.
        assert!(matches!(lowered("select"), Node::DefaultTable));
    }

    #[test]
    fn test_where_becomes_each() {
        match lowered("SELECT FROM t WHERE a > 1") {
            Node::Binary { op: Opcode::Each, left, right } => {
                assert!(matches!(*left, Node::Name(ref n) if n == "t"));
                assert!(matches!(*right, Node::Binary { op: Opcode::Gt, .. }));
            }
            other => panic!("unexpected lowering {:?}", other),
        }
    }

    #[test]
    fn test_columns_become_object_generator() {
        match lowered("SELECT a, b FROM t") {
            Node::Binary { op: Opcode::Each, right, .. } => match *right {
                Node::Object(members) => {
                    assert_eq!(members.len(), 2);
                    assert_eq!(members[0].name, "a");
                }
                other => panic!("unexpected projection {:?}", other),
            },
            other => panic!("unexpected lowering {:?}", other),
        }
    }

    #[test]
    fn test_group_by_pipeline() {
        // orderBy(groupBy(t, [a]) # proj, [a])
        match lowered("SELECT a, count(*) AS n FROM t GROUP BY a ORDER BY a") {
            Node::Call(order) => {
                assert_eq!(order.func.name, "orderBy");
                match &order.args[0] {
                    Node::Binary { op: Opcode::Group, left, right } => {
                        assert_eq!(call_name(left), "groupBy");
                        assert!(matches!(**right, Node::Ag { .. }));
                    }
                    other => panic!("unexpected group {:?}", other),
                }
            }
            other => panic!("unexpected lowering {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_columns_imply_distinct() {
        match lowered("SELECT count(*) FROM t") {
            Node::Call(call) => assert_eq!(call.func.name, "distinct"),
            other => panic!("unexpected lowering {:?}", other),
        }
    }

    #[test]
    fn test_limit_becomes_slice() {
        match lowered("SELECT FROM t LIMIT 5") {
            Node::Call(call) => {
                assert_eq!(call.func.name, "slice");
                assert_eq!(call.args.len(), 3);
            }
            other => panic!("unexpected lowering {:?}", other),
        }
    }

    #[test]
    fn test_unroll_from_field_list() {
        match lowered("SELECT FROM t, items WHERE x") {
            Node::Binary { op: Opcode::Each, left, .. } => {
                assert_eq!(call_name(&left), "unroll");
            }
            other => panic!("unexpected lowering {:?}", other),
        }
    }
}
