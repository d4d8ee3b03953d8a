use crate::funcs::FuncDef;
use crate::op::Opcode;
use json::Value;
use std::sync::Arc;

/// A parsed expression. Grammatical markers (parens, brackets, SQL clause
/// keywords) exist only on the parse stack and never appear here, so
/// dropping the root releases the whole tree: literals, regex buffers,
/// and aggregate descriptors included.
#[derive(Debug)]
pub enum Node {
    Literal(Value),
    Name(String),
    Regex(RegexNode),
    /// Placeholder for the table of a FROM-less SELECT; the evaluator
    /// asks the context for a default table.
    DefaultTable,
    /// `$`, `$name`, or the name part of `$name[i]`.
    Environ(Option<Box<Node>>),
    Unary {
        op: Opcode,
        expr: Box<Node>,
    },
    Binary {
        op: Opcode,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// Array generator `[a, b, ...]`.
    Array(Vec<Node>),
    /// Object generator `{name: expr, ...}`.
    Object(Vec<Member>),
    Call(Box<CallNode>),
    /// An aggregate-bearing subtree, tagged by the discovery pass.
    Ag {
        descriptor: AgDescriptor,
        expr: Box<Node>,
    },
}

/// One member of an object generator. `maybe` marks the `name:??expr`
/// form, whose member is omitted when the value is null.
#[derive(Debug)]
pub struct Member {
    pub name: String,
    pub expr: Node,
    pub maybe: bool,
}

#[derive(Debug)]
pub struct CallNode {
    pub func: Arc<FuncDef>,
    pub args: Vec<Node>,
    /// Slot in the enclosing accumulator region, assigned by aggregate
    /// discovery. None for non-aggregate calls.
    pub ag_slot: Option<usize>,
}

/// A compiled `/pattern/flags` literal.
#[derive(Debug)]
pub struct RegexNode {
    pub regex: regex::Regex,
    pub global: bool,
}

/// Layout of the accumulator region for one aggregate-bearing subtree:
/// one slot per aggregate call, in discovery order. The region itself is
/// allocated per evaluation (never inside the tree) so a parsed tree can
/// be evaluated from several threads at once.
#[derive(Debug)]
pub struct AgDescriptor {
    pub slots: Vec<Arc<FuncDef>>,
}

impl Node {
    pub fn binary(op: Opcode, left: Node, right: Node) -> Node {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: Opcode, expr: Node) -> Node {
        Node::Unary { op, expr: Box::new(expr) }
    }

    pub fn name(text: impl Into<String>) -> Node {
        Node::Name(text.into())
    }

    pub fn literal(value: impl Into<Value>) -> Node {
        Node::Literal(value.into())
    }

    /// Build a call to a named built-in. Used by SQL lowering; the names
    /// it passes are always registered.
    pub fn call_named(name: &str, args: Vec<Node>) -> Node {
        let func = crate::funcs::lookup(name)
            .unwrap_or_else(|| panic!("built-in function {} is not registered", name));
        Node::Call(Box::new(CallNode { func, args, ag_slot: None }))
    }

    /// The name text, when this node is a plain name or a string literal
    /// serving as a quoted name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Node::Name(name) => Some(name),
            Node::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether this tree is an assignment at its root.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Node::Binary { op: Opcode::Assign | Opcode::Append | Opcode::MaybeAssign, .. }
        )
    }
}
