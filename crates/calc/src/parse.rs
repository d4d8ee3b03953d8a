//! The expression parser: a shift-reduce parser over an operator
//! precedence table. Nearly every syntax token is an operator; the
//! exceptions (literals, generators, subscripts, SELECT clauses) are
//! handled by explicit reduction rules against the top of the stack.

use crate::aggregate;
use crate::ast::{CallNode, Member, Node, RegexNode};
use crate::lex::{self, Token};
use crate::op::{OpClass, Opcode};
use crate::select::SelectAcc;
use json::{text, Number, Value};

/// Parse stack capacity. Nesting deeper than this is rejected; comma
/// lists do not count against it because they stay left-associative.
const STACK_LIMIT: usize = 100;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Expression is missing")]
    MissingExpression { offset: usize },
    #[error("Syntax error - Incomplete expression")]
    Incomplete { offset: usize },
    #[error("Missing operand")]
    MissingOperand { offset: usize },
    #[error("Missing operand of unary operator")]
    MissingUnaryOperand { offset: usize },
    #[error("Missing operand of postfix operator")]
    MissingPostfixOperand { offset: usize },
    #[error("Misuse of \":\"")]
    BadColon { offset: usize },
    #[error("Object generators use a series of name:expr pairs")]
    BadMember { offset: usize },
    #[error("The . operator requires a name on the right")]
    DotName { offset: usize },
    #[error("Syntax error - Name expected")]
    NameExpected { offset: usize },
    #[error("Unknown function \"{name}\"")]
    UnknownFunction { name: String, offset: usize },
    #[error("Expression is too complex")]
    TooComplex { offset: usize },
    #[error("Syntax error near \"{near}\"")]
    Trailing { near: String, offset: usize },
}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            ParseError::MissingExpression { offset }
            | ParseError::Incomplete { offset }
            | ParseError::MissingOperand { offset }
            | ParseError::MissingUnaryOperand { offset }
            | ParseError::MissingPostfixOperand { offset }
            | ParseError::BadColon { offset }
            | ParseError::BadMember { offset }
            | ParseError::DotName { offset }
            | ParseError::NameExpected { offset }
            | ParseError::UnknownFunction { offset, .. }
            | ParseError::TooComplex { offset }
            | ParseError::Trailing { offset, .. } => *offset,
        }
    }

    /// Short stable key for tests and localisation.
    pub fn key(&self) -> &'static str {
        match self {
            ParseError::MissingExpression { .. } => "missingExpr",
            ParseError::Incomplete { .. } => "incomplete",
            ParseError::MissingOperand { .. } => "missingOperand",
            ParseError::MissingUnaryOperand { .. } => "missingUnary",
            ParseError::MissingPostfixOperand { .. } => "missingPostfix",
            ParseError::BadColon { .. } => "badColon",
            ParseError::BadMember { .. } => "badMember",
            ParseError::DotName { .. } => "dotName",
            ParseError::NameExpected { .. } => "nameExpected",
            ParseError::UnknownFunction { .. } => "unknownFn",
            ParseError::TooComplex { .. } => "tooComplex",
            ParseError::Trailing { .. } => "syntax",
        }
    }
}

pub(crate) enum Entry {
    /// A completed expression.
    Expr(Node),
    /// A shifted operator or grouping marker awaiting reduction.
    Token(Opcode),
    /// A SELECT accumulating its clauses.
    Select(Box<SelectAcc>),
}

pub struct ParseStack {
    entries: Vec<Entry>,
    /// Source offset where each entry's first token began.
    anchors: Vec<usize>,
    can_assign: bool,
}

impl ParseStack {
    pub fn new(can_assign: bool) -> ParseStack {
        ParseStack { entries: Vec::new(), anchors: Vec::new(), can_assign }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry at depth (1 = top of stack).
    fn at(&self, depth: usize) -> Option<&Entry> {
        self.len().checked_sub(depth).map(|i| &self.entries[i])
    }

    fn anchor(&self, depth: usize) -> usize {
        self.anchors[self.len() - depth]
    }

    fn is_expr(&self, depth: usize) -> bool {
        matches!(self.at(depth), Some(Entry::Expr(_)))
    }

    fn expr(&self, depth: usize) -> Option<&Node> {
        match self.at(depth) {
            Some(Entry::Expr(node)) => Some(node),
            _ => None,
        }
    }

    fn is_tok(&self, depth: usize, op: Opcode) -> bool {
        matches!(self.at(depth), Some(Entry::Token(have)) if *have == op)
    }

    fn is_select(&self, depth: usize) -> bool {
        matches!(self.at(depth), Some(Entry::Select(_)))
    }

    /// An unfinished infix operator (commas are handled separately).
    fn pending_infix(&self, depth: usize) -> bool {
        matches!(self.at(depth), Some(Entry::Token(op))
            if matches!(op.class(), OpClass::Infix | OpClass::RightInfix) && *op != Opcode::Comma)
    }

    fn pending_prefix(&self, depth: usize) -> bool {
        matches!(self.at(depth), Some(Entry::Token(op)) if op.class() == OpClass::Prefix)
    }

    /// Start-of-operand context: nothing at this depth, or a grouping/
    /// clause token that a fresh operand may follow.
    fn start_context(&self, depth: usize) -> bool {
        match self.at(depth) {
            None => self.len() < depth,
            Some(Entry::Token(op)) => matches!(
                op,
                Opcode::StartParen
                    | Opcode::StartArray
                    | Opcode::StartObject
                    | Opcode::Colon
                    | Opcode::MaybeMember
                    | Opcode::Assign
                    | Opcode::Append
                    | Opcode::Comma
                    | Opcode::From
                    | Opcode::Where
                    | Opcode::GroupBy
                    | Opcode::Having
                    | Opcode::OrderBy
                    | Opcode::Limit
                    | Opcode::Values
            ),
            _ => false,
        }
    }

    /// A name, a quoted name, or a dotted name chain.
    fn name_at(&self, depth: usize) -> Option<String> {
        self.expr(depth).and_then(dotted_name)
    }

    fn pop(&mut self) -> (Entry, usize) {
        let anchor = self.anchors.pop().unwrap();
        (self.entries.pop().unwrap(), anchor)
    }

    fn pop_expr(&mut self) -> (Node, usize) {
        match self.pop() {
            (Entry::Expr(node), anchor) => (node, anchor),
            _ => unreachable!("pop_expr on a non-expression entry"),
        }
    }

    fn push(&mut self, entry: Entry, anchor: usize) {
        self.entries.push(entry);
        self.anchors.push(anchor);
    }

    /// Remove `count` entries just below the top entry, keeping the top.
    fn remove_below_top(&mut self, count: usize) {
        let top = self.len() - 1;
        for _ in 0..count {
            self.entries.remove(top - count);
            self.anchors.remove(top - count);
        }
    }

    fn select_mut(&mut self, depth: usize) -> &mut SelectAcc {
        let at = self.len() - depth;
        match &mut self.entries[at] {
            Entry::Select(sel) => sel,
            _ => unreachable!("select_mut on a non-select entry"),
        }
    }

    // The lexer's view of the stack.

    /// An unresolved SELECT is somewhere on the stack.
    pub(crate) fn selecting(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, Entry::Select(_)))
    }

    /// `/` starts a regex here rather than a division.
    pub(crate) fn regex_allowed(&self) -> bool {
        match self.at(1) {
            None => true,
            Some(Entry::Token(
                Opcode::Like | Opcode::NotLike | Opcode::StartParen | Opcode::Comma,
            )) => true,
            _ => false,
        }
    }

    /// There is an open `{` on the stack, so `}` belongs to us.
    pub(crate) fn open_object(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, Entry::Token(Opcode::StartObject)))
    }

    /// `-` negates rather than subtracts here.
    pub(crate) fn negate_context(&self) -> bool {
        self.len() == 0 || self.start_context(1) || self.pending_infix(1)
    }

    /// Decide whether `=` is a comparison or an assignment, and rewrite
    /// a trailing `[]` pair into the append form. The stack top must be
    /// a plausible l-value: a bare name other than this/that, or a
    /// chain of dots and subscripts rooted at a name (possibly with the
    /// final dot or subscript still unreduced).
    fn assignment_kind(&mut self) -> Opcode {
        if !self.can_assign {
            return Opcode::IcEq;
        }

        let mut top = self.len();
        let mut op = Opcode::Assign;
        if top >= 3 && self.is_tok(2, Opcode::StartArray) && self.is_tok(1, Opcode::EndArray) {
            op = Opcode::Append;
            top -= 2;
        }

        let root_is_chain = |node: &Node| {
            let mut node = node;
            loop {
                match node {
                    Node::Name(_) => return true,
                    Node::Binary { op: Opcode::Dot, left, right }
                        if right.as_name().is_some() =>
                    {
                        node = left.as_ref()
                    }
                    Node::Binary { op: Opcode::Subscript, left, .. } => node = left.as_ref(),
                    _ => return false,
                }
            }
        };

        let ok = match top {
            1 => match &self.entries[0] {
                Entry::Expr(Node::Name(name)) => {
                    !name.eq_ignore_ascii_case("this") && !name.eq_ignore_ascii_case("that")
                }
                Entry::Expr(node) => root_is_chain(node),
                _ => false,
            },
            3 => {
                matches!(self.entries[1], Entry::Token(Opcode::Dot))
                    && matches!(&self.entries[2], Entry::Expr(n) if n.as_name().is_some())
                    && matches!(&self.entries[0], Entry::Expr(root) if root_is_chain(root))
            }
            4 => {
                matches!(self.entries[1], Entry::Token(Opcode::StartArray))
                    && matches!(self.entries[2], Entry::Expr(_))
                    && matches!(self.entries[3], Entry::Token(Opcode::EndArray))
                    && matches!(&self.entries[0], Entry::Expr(root) if root_is_chain(root))
            }
            _ => false,
        };
        if !ok {
            return Opcode::IcEq;
        }

        if op == Opcode::Append {
            self.entries.truncate(top);
            self.anchors.truncate(top);
        }
        op
    }
}

/// The text of a name-like node: a name, a quoted name, or a dotted
/// chain of names ("a.b.c").
fn dotted_name(node: &Node) -> Option<String> {
    match node {
        Node::Name(name) => Some(name.clone()),
        Node::Literal(Value::String(s)) => Some(s.clone()),
        Node::Binary { op: Opcode::Dot, left, right } => {
            let mut path = dotted_name(left)?;
            path.push('.');
            path.push_str(right.as_name()?);
            Some(path)
        }
        _ => None,
    }
}

/// Is the incoming operator weak enough to reduce `op` now?
/// Right-associative operators hold out for a strictly greater
/// precedence.
fn prec_ok(op: Opcode, next: Option<Opcode>) -> bool {
    match next {
        None => true,
        Some(next) => {
            let bias = if next.class() == OpClass::RightInfix { 1 } else { 0 };
            op.prec() >= next.prec() + bias
        }
    }
}

/// Convert a left-associative comma chain into an element list.
pub(crate) fn fixcomma(node: Node) -> Vec<Node> {
    let mut items = Vec::new();
    let mut node = node;
    loop {
        match node {
            Node::Binary { op: Opcode::Comma, left, right } => {
                items.push(*right);
                node = *left;
            }
            other => {
                items.push(other);
                break;
            }
        }
    }
    items.reverse();
    items
}

/// Convert fixed comma-list items into validated object members.
/// String keys become names; `name:??expr` marks an optional member.
pub(crate) fn to_members(items: Vec<Node>, offset: usize) -> Result<Vec<Member>, ParseError> {
    items
        .into_iter()
        .map(|item| match item {
            Node::Binary { op: op @ (Opcode::Colon | Opcode::MaybeMember), left, right } => {
                match left.as_name() {
                    Some(name) => Ok(Member {
                        name: name.to_string(),
                        expr: *right,
                        maybe: op == Opcode::MaybeMember,
                    }),
                    None => Err(ParseError::BadMember { offset }),
                }
            }
            _ => Err(ParseError::BadMember { offset }),
        })
        .collect()
}

/// Force the top entry into `name:expr` member form: `expr AS name`
/// swaps, and anything else takes its own source text as its name.
fn fixcolon(node: Node, anchor: usize, srcend: usize, src: &str) -> Node {
    match node {
        Node::Binary { op: Opcode::As, left, right } => {
            Node::binary(Opcode::Colon, *right, *left)
        }
        node @ Node::Binary { op: Opcode::Colon | Opcode::MaybeMember, .. } => node,
        node => {
            let mut label = src[anchor..srcend.max(anchor).min(src.len())].trim();
            label = label.trim_start_matches(&['"', '\'', '`'][..]);
            label = label.trim_end_matches(&[' ', '"', '\'', '`'][..]);
            Node::binary(Opcode::Colon, Node::name(label), node)
        }
    }
}

/// Build a literal value from a number token's text.
fn number_literal(text: &str) -> Value {
    fn radix(text: &str) -> Option<(u32, &str)> {
        match text.as_bytes().get(1).copied() {
            Some(b'x' | b'X') => Some((16, &text[2..])),
            Some(b'o' | b'O') => Some((8, &text[2..])),
            Some(b'b' | b'B') => Some((2, &text[2..])),
            Some(b'0'..=b'9') => Some((8, &text[1..])),
            _ => None,
        }
    }
    if text.starts_with('0') && text.len() > 1 {
        if let Some((radix, digits)) = radix(text) {
            return match i64::from_str_radix(digits, radix) {
                Ok(n) => Value::from(n),
                Err(_) => Value::from(Number::from_text(text)),
            };
        }
    }
    Value::from(Number::from_text(text))
}

/// Compile a `/pattern/flags` token. A malformed pattern becomes an
/// error-null literal so the failure surfaces at evaluation.
fn regex_literal(token_text: &str, offset: usize) -> Node {
    let body = &token_text[1..];
    let close = {
        let mut at = None;
        let bytes = body.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 1,
                b'/' => {
                    at = Some(i);
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        at.unwrap_or(body.len())
    };
    let pattern = body[..close].replace("\\/", "/");
    let flags = body.get(close + 1..).unwrap_or("");
    let ignorecase = flags.contains('i');
    let global = flags.contains('g');

    match regex::RegexBuilder::new(&pattern).case_insensitive(ignorecase).build() {
        Ok(regex) => Node::Regex(RegexNode { regex, global }),
        Err(err) => Node::Literal(Value::error_at(offset, "regex", err.to_string())),
    }
}

/// Reduce the stack as far as the incoming token allows.
fn reduce(
    stack: &mut ParseStack,
    next: Option<Opcode>,
    srcend: usize,
    src: &str,
) -> Result<(), ParseError> {
    loop {
        // x BETWEEN lo AND hi
        if stack.len() >= 5
            && stack.is_expr(5)
            && stack.is_tok(4, Opcode::Between)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::And)
            && stack.is_expr(1)
            && prec_ok(Opcode::Between, next)
        {
            let (hi, _) = stack.pop_expr();
            stack.pop();
            let (lo, _) = stack.pop_expr();
            stack.pop();
            let (x, anchor) = stack.pop_expr();
            let range = Node::binary(Opcode::And, lo, hi);
            stack.push(Entry::Expr(Node::binary(Opcode::Between, x, range)), anchor);
            continue;
        }

        // c ? t : e
        if stack.len() >= 5
            && stack.is_expr(5)
            && stack.is_tok(4, Opcode::Question)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Colon)
            && stack.is_expr(1)
            && prec_ok(Opcode::Question, next)
        {
            let (e, _) = stack.pop_expr();
            stack.pop();
            let (t, _) = stack.pop_expr();
            stack.pop();
            let (c, anchor) = stack.pop_expr();
            let branches = Node::binary(Opcode::Colon, t, e);
            stack.push(Entry::Expr(Node::binary(Opcode::Question, c, branches)), anchor);
            continue;
        }

        // Prefix unary operators bind tightly.
        if stack.len() >= 2 && stack.pending_prefix(2) && stack.is_expr(1) {
            let op = match stack.at(2) {
                Some(Entry::Token(op)) => *op,
                _ => unreachable!(),
            };
            let below_ok =
                stack.len() == 2 || stack.start_context(3) || stack.pending_infix(3);
            if below_ok && prec_ok(op, next) {
                let (expr, _) = stack.pop_expr();
                let (_, anchor) = stack.pop();
                stack.push(Entry::Expr(Node::unary(op, expr)), anchor);
                continue;
            }
        }

        // $name reads the environment; a subscript may bind first.
        if stack.len() >= 2 && stack.is_tok(2, Opcode::Environ) && stack.is_expr(1) {
            if matches!(stack.expr(1), Some(node) if node.as_name().is_some())
                && next != Some(Opcode::StartArray)
            {
                let (name, _) = stack.pop_expr();
                let (_, anchor) = stack.pop();
                stack.push(Entry::Expr(Node::Environ(Some(Box::new(name)))), anchor);
                continue;
            }
            if matches!(stack.expr(1), Some(Node::Binary { op: Opcode::Subscript, .. })) {
                let (sub, _) = stack.pop_expr();
                let (_, anchor) = stack.pop();
                if let Node::Binary { left, right, .. } = sub {
                    let env = Node::Environ(Some(left));
                    stack.push(Entry::Expr(Node::binary(Opcode::Subscript, env, *right)), anchor);
                }
                continue;
            }
        }

        // In a SELECT column list or an object generator, elements are
        // coerced into name:expr form; the element's own source text
        // names an anonymous column.
        if stack.len() >= 2
            && (stack.is_select(2) || stack.is_tok(2, Opcode::StartObject))
            && stack.is_expr(1)
            && !matches!(stack.expr(1), Some(Node::Binary { op: Opcode::Comma, .. }))
            && prec_ok(Opcode::Comma, next)
        {
            let (node, anchor) = stack.pop_expr();
            let fixed = fixcolon(node, anchor, srcend, src);
            stack.push(Entry::Expr(fixed), anchor);
            // Falls through: the element may now take part in a comma
            // or clause reduction below.
        } else if stack.len() >= 4
            && (stack.is_select(4) || stack.is_tok(4, Opcode::StartObject))
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Comma)
            && stack.is_expr(1)
            && prec_ok(Opcode::Comma, next)
        {
            let (node, anchor) = stack.pop_expr();
            let fixed = fixcolon(node, anchor, srcend, src);
            stack.pop();
            let (chain, chain_anchor) = stack.pop_expr();
            stack.push(Entry::Expr(Node::binary(Opcode::Comma, chain, fixed)), chain_anchor);
        }

        // SQL SELECT clause accumulation.
        if stack.len() >= 2 && stack.is_select(2) && stack.is_tok(1, Opcode::Multiply) {
            stack.pop();
            continue;
        }
        if stack.len() >= 2
            && stack.is_select(2)
            && stack.is_expr(1)
            && prec_ok(Opcode::From, next)
        {
            let (columns, _) = stack.pop_expr();
            stack.select_mut(1).columns = Some(columns);
            continue;
        }
        if stack.len() >= 5
            && stack.is_select(5)
            && stack.is_tok(4, Opcode::From)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Comma)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::Comma, next)
        {
            // A comma in the FROM clause adds a field to the unroll list.
            let name = stack.name_at(1).unwrap();
            stack.pop();
            stack.pop();
            stack.select_mut(3).unroll.push(Value::from(name));
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::From)
            && stack.is_expr(1)
            && prec_ok(Opcode::From, next)
        {
            let (from, _) = stack.pop_expr();
            stack.pop();
            stack.select_mut(1).from = Some(from);
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::Where)
            && stack.is_expr(1)
            && prec_ok(Opcode::Where, next)
        {
            let (cond, _) = stack.pop_expr();
            stack.pop();
            stack.select_mut(1).where_ = Some(cond);
            continue;
        }
        if stack.len() >= 5
            && stack.is_select(5)
            && stack.is_tok(4, Opcode::GroupBy)
            && stack.name_at(3).is_some()
            && stack.is_tok(2, Opcode::Comma)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::Comma, next)
        {
            let name = stack.name_at(3).unwrap();
            stack.select_mut(5).group_by.push(Value::from(name));
            stack.remove_below_top(2);
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::GroupBy)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::GroupBy, next)
        {
            let name = stack.name_at(1).unwrap();
            stack.pop();
            stack.select_mut(2).group_by.push(Value::from(name));
            continue;
        }
        if stack.len() >= 2
            && stack.is_select(2)
            && stack.is_tok(1, Opcode::GroupBy)
            && prec_ok(Opcode::GroupBy, next)
        {
            stack.pop();
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::Having)
            && stack.is_expr(1)
            && prec_ok(Opcode::Having, next)
        {
            let (cond, _) = stack.pop_expr();
            stack.pop();
            stack.select_mut(1).having = Some(cond);
            continue;
        }
        if stack.len() >= 6
            && stack.is_select(6)
            && stack.is_tok(5, Opcode::OrderBy)
            && stack.name_at(4).is_some()
            && stack.is_tok(3, Opcode::Descending)
            && stack.is_tok(2, Opcode::Comma)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::Comma, next)
        {
            let name = stack.name_at(4).unwrap();
            let sel = stack.select_mut(6);
            sel.order_by.push(Value::Bool(true));
            sel.order_by.push(Value::from(name));
            stack.remove_below_top(3);
            continue;
        }
        if stack.len() >= 5
            && stack.is_select(5)
            && stack.is_tok(4, Opcode::OrderBy)
            && stack.name_at(3).is_some()
            && stack.is_tok(2, Opcode::Comma)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::Comma, next)
        {
            let name = stack.name_at(3).unwrap();
            stack.select_mut(5).order_by.push(Value::from(name));
            stack.remove_below_top(2);
            continue;
        }
        if stack.len() >= 4
            && stack.is_select(4)
            && stack.is_tok(3, Opcode::OrderBy)
            && stack.name_at(2).is_some()
            && stack.is_tok(1, Opcode::Descending)
            && prec_ok(Opcode::OrderBy, next)
        {
            let name = stack.name_at(2).unwrap();
            let sel = stack.select_mut(4);
            sel.order_by.push(Value::Bool(true));
            sel.order_by.push(Value::from(name));
            stack.pop();
            stack.pop();
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::OrderBy)
            && stack.name_at(1).is_some()
            && prec_ok(Opcode::OrderBy, next)
        {
            let name = stack.name_at(1).unwrap();
            stack.pop();
            stack.select_mut(2).order_by.push(Value::from(name));
            continue;
        }
        if stack.len() >= 2
            && stack.is_select(2)
            && stack.is_tok(1, Opcode::OrderBy)
            && prec_ok(Opcode::OrderBy, next)
        {
            stack.pop();
            continue;
        }
        if stack.len() >= 3
            && stack.is_select(3)
            && stack.is_tok(2, Opcode::Limit)
            && matches!(stack.expr(1), Some(Node::Literal(_)))
            && prec_ok(Opcode::Limit, next)
        {
            let (limit, _) = stack.pop_expr();
            stack.pop();
            stack.select_mut(1).limit = Some(limit);
            continue;
        }
        if stack.len() >= 1 && stack.is_select(1) && prec_ok(Opcode::Select, next) {
            // Every clause is in; lower the SELECT to plain operators.
            let (entry, anchor) = stack.pop();
            let sel = match entry {
                Entry::Select(sel) => sel,
                _ => unreachable!(),
            };
            stack.push(Entry::Expr(sel.lower(anchor)?), anchor);
            continue;
        }

        // Ordinary infix binary operators.
        if stack.len() >= 3 && stack.is_expr(3) && stack.pending_infix(2) && stack.is_expr(1) {
            let op = match stack.at(2) {
                Some(Entry::Token(op)) => *op,
                _ => unreachable!(),
            };
            if prec_ok(op, next) {
                let (mut right, right_anchor) = stack.pop_expr();
                stack.pop();
                let (left, anchor) = stack.pop_expr();
                if op == Opcode::Dot {
                    // The right side of a dot must be a name; a quoted
                    // string serves as one.
                    right = match right {
                        Node::Literal(Value::String(s)) => Node::Name(s),
                        right @ Node::Name(_) => right,
                        _ => return Err(ParseError::DotName { offset: right_anchor }),
                    };
                }
                stack.push(Entry::Expr(Node::binary(op, left, right)), anchor);
                continue;
            }
        }

        // Commas inside argument lists and array generators chain
        // left-associatively; object and SELECT commas were handled
        // above.
        if stack.len() >= 5
            && stack.is_expr(5)
            && stack.is_tok(4, Opcode::StartParen)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Comma)
            && stack.is_expr(1)
            && prec_ok(Opcode::Comma, next)
        {
            let (right, _) = stack.pop_expr();
            stack.pop();
            let (left, anchor) = stack.pop_expr();
            stack.push(Entry::Expr(Node::binary(Opcode::Comma, left, right)), anchor);
            continue;
        }
        if stack.len() >= 4
            && stack.is_tok(4, Opcode::StartArray)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Comma)
            && stack.is_expr(1)
            && prec_ok(Opcode::Comma, next)
        {
            let (right, _) = stack.pop_expr();
            stack.pop();
            let (left, anchor) = stack.pop_expr();
            stack.push(Entry::Expr(Node::binary(Opcode::Comma, left, right)), anchor);
            continue;
        }

        // Function calls. f() and obj.f() pass `this`/obj; f(*) passes
        // true, so count(*) counts rows.
        if stack.len() >= 3
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::StartParen)
            && stack.is_tok(1, Opcode::EndParen)
        {
            stack.pop();
            stack.pop();
            let (callee, anchor) = stack.pop_expr();
            let node = build_call(callee, CallArgs::Empty, anchor)?;
            stack.push(Entry::Expr(node), anchor);
            continue;
        }
        if stack.len() >= 4
            && stack.is_expr(4)
            && stack.is_tok(3, Opcode::StartParen)
            && stack.is_tok(2, Opcode::Multiply)
            && stack.is_tok(1, Opcode::EndParen)
        {
            stack.pop();
            stack.pop();
            stack.pop();
            let (callee, anchor) = stack.pop_expr();
            let node = build_call(callee, CallArgs::Star, anchor)?;
            stack.push(Entry::Expr(node), anchor);
            continue;
        }
        if stack.len() >= 4
            && stack.is_expr(4)
            && stack.is_tok(3, Opcode::StartParen)
            && stack.is_expr(2)
            && stack.is_tok(1, Opcode::EndParen)
        {
            stack.pop();
            let (args, _) = stack.pop_expr();
            stack.pop();
            let (callee, anchor) = stack.pop_expr();
            let node = build_call(callee, CallArgs::List(fixcomma(args)), anchor)?;
            stack.push(Entry::Expr(node), anchor);
            continue;
        }

        // Parenthesized group.
        if stack.len() >= 3
            && stack.is_tok(3, Opcode::StartParen)
            && stack.is_expr(2)
            && stack.is_tok(1, Opcode::EndParen)
        {
            stack.pop();
            let (inner, _) = stack.pop_expr();
            let (_, anchor) = stack.pop();
            stack.push(Entry::Expr(inner), anchor);
            continue;
        }

        // Subscript on a value (or on the bare environment `$[...]`).
        if stack.len() >= 4
            && (stack.is_expr(4) || stack.is_tok(4, Opcode::Environ))
            && stack.is_tok(3, Opcode::StartArray)
            && stack.is_expr(2)
            && stack.is_tok(1, Opcode::EndArray)
        {
            stack.pop();
            let (index, _) = stack.pop_expr();
            stack.pop();
            let (container, anchor) = match stack.pop() {
                (Entry::Expr(node), anchor) => (node, anchor),
                (Entry::Token(_), anchor) => (Node::Environ(None), anchor),
                _ => unreachable!(),
            };
            stack.push(Entry::Expr(Node::binary(Opcode::Subscript, container, index)), anchor);
            continue;
        }

        // Array generators (checked after the subscript pattern).
        if stack.len() >= 2
            && stack.is_tok(2, Opcode::StartArray)
            && stack.is_tok(1, Opcode::EndArray)
            && stack.start_context(3)
        {
            stack.pop();
            let (_, anchor) = stack.pop();
            stack.push(Entry::Expr(Node::Array(Vec::new())), anchor);
            continue;
        }
        if stack.len() >= 3
            && stack.is_tok(3, Opcode::StartArray)
            && stack.is_expr(2)
            && stack.is_tok(1, Opcode::EndArray)
        {
            stack.pop();
            let (elems, _) = stack.pop_expr();
            let (_, anchor) = stack.pop();
            stack.push(Entry::Expr(Node::Array(fixcomma(elems))), anchor);
            continue;
        }
        if stack.len() >= 4
            && stack.is_tok(4, Opcode::StartArray)
            && stack.is_expr(3)
            && stack.is_tok(2, Opcode::Comma)
            && stack.is_tok(1, Opcode::EndArray)
        {
            // Superfluous trailing comma.
            stack.pop();
            stack.pop();
            let (elems, _) = stack.pop_expr();
            let (_, anchor) = stack.pop();
            stack.push(Entry::Expr(Node::Array(fixcomma(elems))), anchor);
            continue;
        }

        // "x is null" and "x is not null" become strict null compares.
        if stack.len() >= 2
            && stack.is_expr(2)
            && (stack.is_tok(1, Opcode::IsNull) || stack.is_tok(1, Opcode::IsNotNull))
        {
            let op = if stack.is_tok(1, Opcode::IsNull) {
                Opcode::EqStrict
            } else {
                Opcode::NeStrict
            };
            stack.pop();
            let (x, anchor) = stack.pop_expr();
            stack.push(Entry::Expr(Node::binary(op, x, Node::Literal(Value::Null))), anchor);
            continue;
        }

        // Object generators.
        if stack.len() >= 2
            && stack.is_tok(2, Opcode::StartObject)
            && stack.is_tok(1, Opcode::EndObject)
        {
            stack.pop();
            let (_, anchor) = stack.pop();
            stack.push(Entry::Expr(Node::Object(Vec::new())), anchor);
            continue;
        }
        if stack.len() >= 3
            && stack.is_tok(3, Opcode::StartObject)
            && stack.is_expr(2)
            && stack.is_tok(1, Opcode::EndObject)
        {
            stack.pop();
            let (members, member_anchor) = stack.pop_expr();
            let (_, anchor) = stack.pop();
            let members = to_members(fixcomma(members), member_anchor)?;
            stack.push(Entry::Expr(Node::Object(members)), anchor);
            continue;
        }

        // Nothing left to reduce.
        return Ok(());
    }
}

enum CallArgs {
    /// `f()`
    Empty,
    /// `f(*)`
    Star,
    /// `f(a, b, ...)`
    List(Vec<Node>),
}

/// Assemble a function call from the callee expression and argument
/// list. `x.f(args)` becomes `f(x, args)`; a bare `f()` passes `this`
/// and `f(*)` passes true, so `count(*)` counts rows. Unknown names are
/// rejected here, not at evaluation time.
fn build_call(callee: Node, args: CallArgs, offset: usize) -> Result<Node, ParseError> {
    let name = match &callee {
        Node::Binary { op: Opcode::Dot, right, .. } => match right.as_name() {
            Some(name) => name.to_string(),
            None => return Err(ParseError::NameExpected { offset }),
        },
        Node::Name(name) => name.clone(),
        _ => return Err(ParseError::NameExpected { offset }),
    };
    let func = crate::funcs::lookup(&name)
        .ok_or(ParseError::UnknownFunction { name, offset })?;

    let args = match (callee, args) {
        (Node::Binary { op: Opcode::Dot, left, .. }, CallArgs::List(mut args)) => {
            args.insert(0, *left);
            args
        }
        (Node::Binary { op: Opcode::Dot, left, .. }, _) => vec![*left],
        (_, CallArgs::List(args)) => args,
        (_, CallArgs::Star) => vec![Node::literal(true)],
        (_, CallArgs::Empty) => vec![Node::name("this")],
    };
    Ok(Node::Call(Box::new(CallNode { func, args, ag_slot: None })))
}

/// Reject `:` anywhere it is not part of `?:`, an object member, or a
/// `[key:value]` subscript.
fn misused_colon(node: &Node) -> bool {
    match node {
        Node::Binary { op: Opcode::Colon, .. } => true,
        Node::Binary { op: Opcode::Subscript, left, right } => {
            misused_colon(left)
                || match right.as_ref() {
                    Node::Binary { op: Opcode::Colon, right, .. } => misused_colon(right),
                    other => misused_colon(other),
                }
        }
        Node::Binary { op: Opcode::Question, left, right } => {
            misused_colon(left)
                || match right.as_ref() {
                    Node::Binary { op: Opcode::Colon, left, right } => {
                        misused_colon(left) || misused_colon(right)
                    }
                    other => misused_colon(other),
                }
        }
        Node::Binary { left, right, .. } => misused_colon(left) || misused_colon(right),
        Node::Unary { expr, .. } => misused_colon(expr),
        Node::Array(elems) => elems.iter().any(misused_colon),
        Node::Object(members) => members.iter().any(|m| misused_colon(&m.expr)),
        Node::Call(call) => call.args.iter().any(misused_colon),
        Node::Environ(Some(name)) => misused_colon(name),
        _ => false,
    }
}

/// Parse one expression from the head of `src`, returning the tree and
/// the offset where parsing stopped (a `;`, an unmatched `}`, a
/// top-level comma, or the end of input). `can_assign` enables `=` as
/// assignment.
pub fn parse_tail(src: &str, can_assign: bool) -> Result<(Node, usize), ParseError> {
    let mut stack = ParseStack::new(can_assign);
    let mut pos = 0;
    let mut stopped_at: Option<usize> = None;
    let mut last_end = 0;

    loop {
        let token = match lex::next_token(src, pos, &stack) {
            None => break,
            Some(token) if token.op == Opcode::Invalid => {
                stopped_at = Some(token.start);
                break;
            }
            Some(token) => token,
        };
        pos = token.end();
        last_end = pos;

        let mut op = token.op;
        if op == Opcode::IcEq {
            op = stack.assignment_kind();
        }

        // DISTINCT right after SELECT is a flag, not a stack entry.
        if op == Opcode::Distinct && stack.is_select(1) {
            stack.select_mut(1).distinct = true;
            continue;
        }

        if !stack.entries.is_empty() && op.prec() >= 0 {
            reduce(&mut stack, Some(op), token.start, src)?;
        }
        if stack.len() >= STACK_LIMIT {
            return Err(ParseError::TooComplex { offset: token.start });
        }

        let entry = match op {
            Opcode::Number => Entry::Expr(Node::Literal(number_literal(token.text(src)))),
            Opcode::String => {
                let body = token.text(src);
                let body = &body[1..body.len().saturating_sub(1)];
                Entry::Expr(Node::Literal(Value::from(text::unescape(body))))
            }
            Opcode::Name => {
                let name = token.text(src);
                let name = name.strip_prefix('`').unwrap_or(name);
                let name = name.strip_suffix('`').unwrap_or(name);
                Entry::Expr(Node::name(name))
            }
            Opcode::Boolean => Entry::Expr(Node::literal(token.text(src) == "true")),
            Opcode::Null => Entry::Expr(Node::Literal(Value::Null)),
            Opcode::Regex => Entry::Expr(regex_literal(token.text(src), token.start)),
            Opcode::Select => Entry::Select(Box::new(SelectAcc::default())),
            op => Entry::Token(op),
        };
        stack.push(entry, token.start);
        tracing::trace!(op = ?op, at = token.start, "shift");
    }

    if stack.entries.is_empty() {
        return Err(ParseError::MissingExpression { offset: pos });
    }

    // One last reduce with no lookahead drains everything reducible.
    reduce(&mut stack, None, stopped_at.unwrap_or(last_end), src)?;

    // A lone `$` is the whole environment.
    if stack.len() == 1 && stack.is_tok(1, Opcode::Environ) {
        let (_, anchor) = stack.pop();
        stack.push(Entry::Expr(Node::Environ(None)), anchor);
    }

    // Where did the expression end? Surplus stack entries mean parsing
    // really stopped at the second entry's first token.
    let end = if stack.len() > 1 {
        stack.anchor(stack.len() - 1)
    } else {
        match stopped_at {
            Some(at) => at,
            None => lex::skip_space(src, last_end),
        }
    };

    let anchor = stack.anchors[0];
    let node = match stack.entries.swap_remove(0) {
        Entry::Expr(node) => node,
        Entry::Select(_) => return Err(ParseError::Incomplete { offset: anchor }),
        Entry::Token(op) => {
            return Err(match op.class() {
                OpClass::Infix | OpClass::RightInfix => ParseError::MissingOperand { offset: anchor },
                OpClass::Prefix => ParseError::MissingUnaryOperand { offset: anchor },
                OpClass::Postfix => ParseError::MissingPostfixOperand { offset: anchor },
                OpClass::Other => ParseError::Incomplete { offset: anchor },
            })
        }
    };

    // A token that cannot head a finished expression (AS, SQL clause
    // markers) means the parse never completed.
    let root_op = match &node {
        Node::Binary { op, .. } => Some(*op),
        Node::Unary { op, .. } => Some(*op),
        _ => None,
    };
    if matches!(root_op, Some(op) if op.info().noexpr) {
        return Err(ParseError::Incomplete { offset: anchor });
    }

    if misused_colon(&node) {
        return Err(ParseError::BadColon { offset: anchor });
    }

    // Tag aggregate-bearing subtrees with their accumulator layouts.
    Ok((aggregate::discover(node), end))
}

/// Parse a complete expression; trailing input is an error.
pub fn parse(src: &str, can_assign: bool) -> Result<Node, ParseError> {
    let (node, end) = parse_tail(src, can_assign)?;
    let rest = src[end.min(src.len())..].trim();
    if !rest.is_empty() {
        return Err(ParseError::Trailing {
            near: rest.chars().take(10).collect(),
            offset: end,
        });
    }
    Ok(node)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_ok(src: &str) -> Node {
        match parse(src, true) {
            Ok(node) => node,
            Err(err) => panic!("parse({:?}) failed: {}", src, err),
        }
    }

    #[test]
    fn test_precedence_shapes() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        match parse_ok("1 + 2 * 3") {
            Node::Binary { op: Opcode::Add, right, .. } => {
                assert!(matches!(*right, Node::Binary { op: Opcode::Multiply, .. }))
            }
            other => panic!("unexpected shape {:?}", other),
        }
        // a - b - c parses left-associatively.
        match parse_ok("a - b - c") {
            Node::Binary { op: Opcode::Subtract, left, .. } => {
                assert!(matches!(*left, Node::Binary { op: Opcode::Subtract, .. }))
            }
            other => panic!("unexpected shape {:?}", other),
        }
        // The conditional is right-associative.
        match parse_ok("a ? b : c ? d : e") {
            Node::Binary { op: Opcode::Question, right, .. } => match *right {
                Node::Binary { op: Opcode::Colon, right, .. } => {
                    assert!(matches!(*right, Node::Binary { op: Opcode::Question, .. }))
                }
                other => panic!("unexpected shape {:?}", other),
            },
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_negate_vs_subtract() {
        assert!(matches!(parse_ok("-1"), Node::Unary { op: Opcode::Negate, .. }));
        assert!(matches!(parse_ok("a - 1"), Node::Binary { op: Opcode::Subtract, .. }));
        assert!(matches!(parse_ok("2 * -3"), Node::Binary { op: Opcode::Multiply, .. }));
    }

    #[test]
    fn test_call_rewrites() {
        // x.f(args) becomes f(x, args).
        match parse_ok("s.substr(1, 2)") {
            Node::Call(call) => {
                assert_eq!(call.func.name, "substr");
                assert_eq!(call.args.len(), 3);
                assert!(matches!(call.args[0], Node::Name(ref n) if n == "s"));
            }
            other => panic!("unexpected shape {:?}", other),
        }
        // count(*) passes true; f() passes this.
        match parse_ok("count(*)") {
            Node::Ag { expr, .. } => match *expr {
                Node::Call(call) => {
                    assert!(matches!(call.args[0], Node::Literal(Value::Bool(true))))
                }
                other => panic!("unexpected shape {:?}", other),
            },
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_unknown_function_rejected_at_parse() {
        assert!(matches!(
            parse("noSuchFn(1)", false),
            Err(ParseError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_assignment_contexts() {
        assert!(parse_ok("x = 1").is_assignment());
        assert!(matches!(parse_ok("x[] = 1"), Node::Binary { op: Opcode::Append, .. }));
        assert!(matches!(parse_ok("a.b[0] = 1"), Node::Binary { op: Opcode::Assign, .. }));
        // Without assignment enabled, = is a case-insensitive compare.
        assert!(matches!(parse("x = 1", false).unwrap(), Node::Binary { op: Opcode::IcEq, .. }));
        // this/that are not assignable.
        assert!(matches!(parse("this = 1", true).unwrap(), Node::Binary { op: Opcode::IcEq, .. }));
    }

    #[test]
    fn test_object_member_forms() {
        match parse_ok("{a: 1, b, \"c d\": 3}") {
            Node::Object(members) => {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c d"]);
                // Shorthand b expands to b:b.
                assert!(matches!(members[1].expr, Node::Name(ref n) if n == "b"));
            }
            other => panic!("unexpected shape {:?}", other),
        }
        assert!(matches!(parse_ok("{n :?? x}"), Node::Object(ref m) if m[0].maybe));
    }

    #[test]
    fn test_is_null_lowering() {
        match parse_ok("a is not null") {
            Node::Binary { op: Opcode::NeStrict, right, .. } => {
                assert!(matches!(*right, Node::Literal(Value::Null)))
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_between_shape() {
        match parse_ok("x between 1 and 10") {
            Node::Binary { op: Opcode::Between, right, .. } => {
                assert!(matches!(*right, Node::Binary { op: Opcode::And, .. }))
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_select_lowers_to_operators() {
        // A SELECT never survives into the tree.
        let node = parse_ok("SELECT a, count(*) AS n FROM t GROUP BY a ORDER BY a");
        match &node {
            Node::Call(call) => assert_eq!(call.func.name, "orderBy"),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_select_keywords_are_plain_names_outside() {
        // "from" works as a member name when no SELECT is parsing.
        assert!(matches!(parse_ok("a.from"), Node::Binary { op: Opcode::Dot, .. }));
    }

    #[test]
    fn test_parse_tail_stops_at_statement_end() {
        let (node, end) = parse_tail("x + 1; y", true).unwrap();
        assert!(matches!(node, Node::Binary { op: Opcode::Add, .. }));
        assert_eq!(&"x + 1; y"[end..end + 1], ";");

        // A top-level comma ends the expression too.
        let (_, end) = parse_tail("a, b", false).unwrap();
        assert_eq!(&"a, b"[end..end + 1], ",");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("1 +", false), Err(ParseError::Trailing { .. })));
        assert!(matches!(parse("", false), Err(ParseError::MissingExpression { .. })));
        assert!(matches!(parse("{1: 2}", false), Err(ParseError::BadMember { .. })));
        assert!(matches!(parse("a.3", false), Err(ParseError::DotName { .. })));
        assert!(matches!(parse("a : b", false), Err(ParseError::BadColon { .. })));
    }

    #[test]
    fn test_regex_literal() {
        match parse_ok("s like /ab?c/i") {
            Node::Binary { op: Opcode::Like, right, .. } => match *right {
                Node::Regex(rx) => {
                    assert!(!rx.global);
                    assert!(rx.regex.is_match("aC"));
                }
                other => panic!("unexpected shape {:?}", other),
            },
            other => panic!("unexpected shape {:?}", other),
        }
        // In division position, / stays an operator.
        assert!(matches!(parse_ok("a / b"), Node::Binary { op: Opcode::Divide, .. }));
    }

    #[test]
    fn test_ellipsis_and_environ() {
        assert!(matches!(parse_ok("1 ... 5"), Node::Binary { op: Opcode::Ellipsis, .. }));
        assert!(matches!(parse_ok("$PATH"), Node::Environ(Some(_))));
        match parse_ok("$[\"PATH\"]") {
            Node::Binary { op: Opcode::Subscript, left, .. } => {
                assert!(matches!(*left, Node::Environ(None)))
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }
}
