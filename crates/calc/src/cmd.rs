//! The command layer: a thin statement language wrapped around
//! expressions. A script is a series of statements; each statement is a
//! command name followed by command-specific arguments, or a bare
//! expression (an assignment or an output). The statement parser is
//! plain recursive descent; all the heavy lifting lives in the
//! expression parser.

use crate::ast::Node;
use crate::context::{Context, LayerFlags};
use crate::eval::eval;
use crate::files;
use crate::funcs::{self, AgCell, FuncKind};
use crate::lex;
use crate::parse::{self, ParseError};
use json::{Field, Value};
use std::sync::Arc;

/// A statement's runtime outcome, threaded up through blocks. `None`
/// from a runner means execution continues with the next statement.
#[derive(Debug)]
pub enum Flow {
    Break,
    Continue,
    Return(Value),
    /// The value of a bare output expression. Printed when more
    /// statements follow; a terminal one becomes the block's value.
    Output(Value),
    Error(CmdError),
    /// A `case` that did not match; the block runner skips ahead to the
    /// next case or default.
    CaseMiss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmdError {
    pub offset: usize,
    pub key: String,
    pub message: String,
}

impl CmdError {
    fn new(offset: usize, key: &str, message: impl Into<String>) -> CmdError {
        CmdError { offset, key: key.to_string(), message: message.into() }
    }

    fn from_parse(err: ParseError, base: usize) -> CmdError {
        CmdError {
            offset: base + err.offset(),
            key: err.key().to_string(),
            message: err.to_string(),
        }
    }

    pub fn into_value(self) -> Value {
        Value::error_at(self.offset, self.key, self.message)
    }

    /// "file:line: message" formatting for display.
    pub fn display(&self, src: &str, filename: &str) -> String {
        format!("{}:{}: {}", filename, files::line_of(src, self.offset), self.message)
    }
}

pub struct Cmd {
    /// Offset of the statement in its source, for error reporting.
    pub at: usize,
    pub kind: CmdKind,
}

pub enum CmdKind {
    If { cond: Node, then: Vec<Cmd>, otherwise: Vec<Cmd> },
    While { cond: Node, body: Vec<Cmd> },
    For { declare: bool, key: Option<String>, expr: Node, body: Vec<Cmd> },
    Break,
    Continue,
    Switch { expr: Node, body: Vec<Cmd> },
    Case(Node),
    Default,
    Try { body: Vec<Cmd>, name: Option<String>, catch: Vec<Cmd> },
    Throw { code: Option<i64>, parts: Vec<Node> },
    Declare { constant: bool, decls: Vec<(String, Option<Node>)> },
    Return(Option<Node>),
    Void(Node),
    Explain(Option<Node>),
    File(FileSel),
    Import(String),
    Print(Vec<Node>),
    Set { text: Option<String>, expr: Option<Node> },
    Expr(Node),
}

pub enum FileSel {
    List,
    Next,
    Previous,
    Name(String),
    Expr(Node),
}

struct Src<'s> {
    text: &'s str,
    pos: usize,
}

impl<'s> Src<'s> {
    fn skip_space(&mut self) {
        self.pos = lex::skip_space(self.text, self.pos);
    }

    fn rest(&self) -> &'s str {
        &self.text[self.pos.min(self.text.len())..]
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Case-insensitive keyword at the cursor, with a word boundary.
    fn word(&self, want: &str) -> bool {
        let rest = self.rest();
        match rest.get(..want.len()) {
            Some(head) if head.eq_ignore_ascii_case(want) => match rest.as_bytes().get(want.len()) {
                Some(b) => !b.is_ascii_alphanumeric() && *b != b'_',
                None => true,
            },
            _ => false,
        }
    }

    fn take_word(&mut self, want: &str) -> bool {
        if self.word(want) {
            self.pos += want.len();
            true
        } else {
            false
        }
    }

    /// A name, possibly backtick-quoted.
    fn parse_key(&mut self) -> Option<String> {
        self.skip_space();
        let bytes = self.text.as_bytes();
        if self.peek() == Some(b'`') {
            let start = self.pos + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end] != b'`' {
                end += 1;
            }
            self.pos = (end + 1).min(self.text.len());
            return Some(self.text[start..end].to_string());
        }
        let start = self.pos;
        if !matches!(self.peek(), Some(b) if b.is_ascii_alphabetic() || b == b'_') {
            return None;
        }
        let mut end = start;
        while matches!(bytes.get(end), Some(b) if b.is_ascii_alphanumeric() || *b == b'_') {
            end += 1;
        }
        self.pos = end;
        Some(self.text[start..end].to_string())
    }

    /// Skip a `:type` annotation, which is parsed and ignored.
    fn skip_type(&mut self) {
        self.skip_space();
        if self.eat(b':') {
            self.skip_space();
            while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'[' || b == b']' || b == b'|') {
                self.pos += 1;
            }
            self.skip_space();
        }
    }

    /// Parse one expression at the cursor and advance past it.
    fn parse_expr(&mut self, can_assign: bool) -> Result<Node, CmdError> {
        let base = self.pos;
        let (node, end) = parse::parse_tail(self.rest(), can_assign)
            .map_err(|err| CmdError::from_parse(err, base))?;
        self.pos = base + end;
        Ok(node)
    }

    /// Extract the span inside a balanced `( ... )`, honouring quotes.
    /// The cursor advances past the closing paren.
    fn take_paren(&mut self) -> Option<(usize, usize)> {
        self.skip_space();
        if !self.eat(b'(') {
            return None;
        }
        let bytes = self.text.as_bytes();
        let start = self.pos;
        let mut nest = 1usize;
        let mut quote = 0u8;
        let mut at = start;
        while at < bytes.len() {
            let b = bytes[at];
            if quote != 0 {
                if b == b'\\' {
                    at += 1;
                } else if b == quote {
                    quote = 0;
                }
            } else {
                match b {
                    b'"' | b'\'' => quote = b,
                    b'(' => nest += 1,
                    b')' => {
                        nest -= 1;
                        if nest == 0 {
                            self.pos = at + 1;
                            return Some((start, at));
                        }
                    }
                    _ => {}
                }
            }
            at += 1;
        }
        None
    }

    /// Expect a parenthesized expression: `( expr )`. The span is
    /// extracted first so that whatever follows the parens cannot
    /// confuse the expression parser.
    fn parse_paren_expr(&mut self, what: &str) -> Result<Node, CmdError> {
        let (start, end) = match self.take_paren() {
            Some(span) => span,
            None => {
                return Err(CmdError::new(
                    self.pos,
                    "missingParen",
                    format!("Missing \"{}\" condition", what),
                ))
            }
        };
        parse::parse(&self.text[start..end], false)
            .map_err(|err| CmdError::from_parse(err, start))
    }
}

/// Parse a whole script into a statement list. A leading `#!` line is
/// skipped.
pub fn parse_script(text: &str) -> Result<Vec<Cmd>, CmdError> {
    let mut src = Src { text, pos: 0 };
    if text.starts_with("#!") {
        src.pos = text.find('\n').map(|at| at + 1).unwrap_or(text.len());
    }

    let mut cmds = Vec::new();
    loop {
        src.skip_space();
        if src.pos >= src.text.len() {
            return Ok(cmds);
        }
        if let Some(cmd) = parse_single(&mut src)? {
            cmds.push(cmd);
        }
    }
}

/// Parse `{ statements }`, or a single statement without braces.
fn parse_block(src: &mut Src) -> Result<Vec<Cmd>, CmdError> {
    src.skip_space();
    let mut cmds = Vec::new();
    if src.eat(b'{') {
        loop {
            src.skip_space();
            if src.eat(b'}') {
                break;
            }
            if src.pos >= src.text.len() {
                return Err(CmdError::new(src.pos, "missingBrace", "Missing \"}\""));
            }
            if let Some(cmd) = parse_single(src)? {
                cmds.push(cmd);
            }
        }
    } else if let Some(cmd) = parse_single(src)? {
        cmds.push(cmd);
    }
    src.skip_space();
    Ok(cmds)
}

/// Parse one statement. Returns None for empty statements and for
/// definitions handled entirely at parse time.
fn parse_single(src: &mut Src) -> Result<Option<Cmd>, CmdError> {
    src.skip_space();
    let at = src.pos;

    if src.eat(b';') {
        return Ok(None);
    }
    if src.peek() == Some(b'}') || src.pos >= src.text.len() {
        return Ok(None);
    }

    // A command word is only a command when it is not a call to a
    // function of the same name.
    let command = [
        "if", "while", "for", "break", "continue", "switch", "case", "default", "try",
        "throw", "var", "const", "function", "return", "void", "explain", "file",
        "import", "print", "set",
    ]
    .iter()
    .find(|name| src.word(name))
    .copied();
    if let Some(name) = command {
        // "explain(...)" with a function of that name is a call, not a
        // command.
        let is_call = src.text.as_bytes().get(src.pos + name.len()) == Some(&b'(')
            && funcs::lookup(name).is_some();
        if !is_call {
            src.pos += name.len();
            let cmd = parse_named(src, name, at)?;
            return Ok(cmd);
        }
    }

    // An assignment or an output expression.
    let node = src.parse_expr(true)?;
    src.skip_space();
    match src.peek() {
        None | Some(b';' | b'}') => {}
        Some(_) => {
            return Err(CmdError::new(src.pos, "syntax", "Expression syntax error"));
        }
    }
    src.eat(b';');
    Ok(Some(Cmd { at, kind: CmdKind::Expr(node) }))
}

fn parse_named(src: &mut Src, name: &str, at: usize) -> Result<Option<Cmd>, CmdError> {
    let kind = match name {
        "if" => {
            let cond = src.parse_paren_expr("if")?;
            let then = parse_block(src)?;
            let otherwise = if src.take_word("else") { parse_block(src)? } else { Vec::new() };
            CmdKind::If { cond, then, otherwise }
        }
        "while" => {
            let cond = src.parse_paren_expr("while")?;
            let body = parse_block(src)?;
            CmdKind::While { cond, body }
        }
        "for" => parse_for(src)?,
        "break" => {
            src.skip_space();
            src.eat(b';');
            CmdKind::Break
        }
        "continue" => {
            src.skip_space();
            src.eat(b';');
            CmdKind::Continue
        }
        "switch" => {
            let expr = src.parse_paren_expr("switch")?;
            let body = parse_block(src)?;
            CmdKind::Switch { expr, body }
        }
        "case" => CmdKind::Case(parse_case(src)?),
        "default" => {
            src.skip_space();
            if !src.eat(b':') {
                return Err(CmdError::new(src.pos, "syntax", "Syntax error in \"default\""));
            }
            CmdKind::Default
        }
        "try" => {
            let body = parse_block(src)?;
            if !src.take_word("catch") {
                return Err(CmdError::new(src.pos, "missingCatch", "Missing \"catch\""));
            }
            src.skip_space();
            let name = if src.eat(b'(') {
                let name = src.parse_key();
                src.skip_space();
                if name.is_none() || !src.eat(b')') {
                    return Err(CmdError::new(
                        src.pos,
                        "catchName",
                        "The argument to \"catch\" should be a single name",
                    ));
                }
                name
            } else {
                None
            };
            let catch = parse_block(src)?;
            CmdKind::Try { body, name, catch }
        }
        "throw" => parse_throw(src)?,
        "var" => parse_declare(src, false)?,
        "const" => parse_declare(src, true)?,
        "function" => {
            parse_function(src)?;
            return Ok(None);
        }
        "return" => {
            src.skip_space();
            let expr = match src.peek() {
                None | Some(b';' | b'}') => None,
                _ => Some(src.parse_expr(false)?),
            };
            src.skip_space();
            src.eat(b';');
            CmdKind::Return(expr)
        }
        "void" => {
            let expr = src.parse_expr(false)?;
            src.skip_space();
            src.eat(b';');
            CmdKind::Void(expr)
        }
        "explain" => {
            src.skip_space();
            let expr = match src.peek() {
                None | Some(b';' | b'}') => None,
                _ => Some(src.parse_expr(false)?),
            };
            src.skip_space();
            src.eat(b';');
            CmdKind::Explain(expr)
        }
        "file" => parse_file(src)?,
        "import" => {
            src.skip_space();
            let start = src.pos;
            while matches!(src.peek(), Some(b) if b != b';' && b != b'\n' && !b.is_ascii_whitespace()) {
                src.pos += 1;
            }
            if start == src.pos {
                return Err(CmdError::new(src.pos, "importName", "Missing \"import\" filename"));
            }
            let path = src.text[start..src.pos].to_string();
            src.skip_space();
            src.eat(b';');
            CmdKind::Import(path)
        }
        "print" => {
            let mut parts = Vec::new();
            loop {
                src.skip_space();
                match src.peek() {
                    None | Some(b';' | b'}') => break,
                    _ => {}
                }
                parts.push(src.parse_expr(false)?);
                src.skip_space();
                if !src.eat(b',') {
                    break;
                }
            }
            src.eat(b';');
            CmdKind::Print(parts)
        }
        "set" => parse_set(src)?,
        _ => unreachable!("unhandled command {}", name),
    };
    Ok(Some(Cmd { at, kind }))
}

/// `for (var? name (= | of) expr)`, `for (name of expr)`, or `for (expr)`.
fn parse_for(src: &mut Src) -> Result<CmdKind, CmdError> {
    let (start, end) = match src.take_paren() {
        Some(span) => span,
        None => {
            return Err(CmdError::new(src.pos, "missingParen", "Missing \"for\" attributes"))
        }
    };

    // Scan the loop attributes inside the parens.
    let mut inner = Src { text: &src.text[..end], pos: start };
    inner.skip_space();
    let reset = inner.pos;
    let declare = inner.take_word("var") || inner.take_word("const");
    let mut key = inner.parse_key();
    inner.skip_space();
    if key.is_some() {
        if inner.eat(b'=') || inner.take_word("of") {
            inner.skip_space();
        } else {
            // It was the first word of a plain expression after all.
            key = None;
            inner.pos = reset;
        }
    } else if declare {
        inner.pos = reset;
    }
    let expr_start = inner.pos;
    let expr = parse::parse(&src.text[expr_start..end], false)
        .map_err(|err| CmdError::from_parse(err, expr_start))?;

    let body = parse_block(src)?;
    Ok(CmdKind::For { declare: declare && key.is_some(), key, expr, body })
}

/// The case expression ends at a `:` outside any quotes or parens.
fn parse_case(src: &mut Src) -> Result<Node, CmdError> {
    src.skip_space();
    let bytes = src.text.as_bytes();
    let start = src.pos;
    let mut end = start;
    let mut nest = 0usize;
    let mut quote = 0u8;
    while end < bytes.len() && bytes[end] >= b' ' {
        let b = bytes[end];
        if quote != 0 {
            if b == b'\\' {
                end += 1;
            } else if b == quote {
                quote = 0;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = b,
                b'(' => nest += 1,
                b')' => nest = nest.saturating_sub(1),
                b':' if nest == 0 => break,
                _ => {}
            }
        }
        end += 1;
    }
    if end == start || bytes.get(end) != Some(&b':') {
        return Err(CmdError::new(start, "caseSyntax", "Missing or malformed \"case\" expression"));
    }
    let node = parse::parse(&src.text[start..end], false)
        .map_err(|err| CmdError::from_parse(err, start))?;
    src.pos = end + 1;
    Ok(node)
}

/// `throw [code,] "message" [, arg]`. A string pair is key + message.
fn parse_throw(src: &mut Src) -> Result<CmdKind, CmdError> {
    let mut code = None;
    let mut parts = Vec::new();
    loop {
        src.skip_space();
        match src.peek() {
            None | Some(b';' | b'}') => break,
            _ => {}
        }
        let node = src.parse_expr(false)?;
        if parts.is_empty() && code.is_none() {
            if let Node::Literal(Value::Number(n)) = &node {
                code = n.as_i64();
                if code.is_some() {
                    src.skip_space();
                    if !src.eat(b',') {
                        break;
                    }
                    continue;
                }
            }
        }
        parts.push(node);
        src.skip_space();
        if !src.eat(b',') {
            break;
        }
    }
    src.eat(b';');
    if parts.is_empty() && code.is_none() {
        return Err(CmdError::new(src.pos, "throwArgs", "Bad parameters to throw"));
    }
    Ok(CmdKind::Throw { code, parts })
}

fn parse_declare(src: &mut Src, constant: bool) -> Result<CmdKind, CmdError> {
    let mut decls = Vec::new();
    loop {
        src.skip_space();
        let key = match src.parse_key() {
            Some(key) => key,
            None => {
                return Err(CmdError::new(
                    src.pos,
                    "declName",
                    format!("Name expected after {}", if constant { "const" } else { "var" }),
                ))
            }
        };
        src.skip_type();
        let init = if src.eat(b'=') {
            Some(src.parse_expr(false)?)
        } else {
            None
        };
        decls.push((key, init));
        src.skip_space();
        if !src.eat(b',') {
            break;
        }
    }
    src.eat(b';');
    Ok(CmdKind::Declare { constant, decls })
}

/// `function name(params):type { body }` defines the function at parse
/// time; nothing remains to run. A body-less form describes instead.
fn parse_function(src: &mut Src) -> Result<(), CmdError> {
    src.skip_space();
    let name = match src.parse_key() {
        Some(name) => name,
        None => {
            for def in funcs::user_functions() {
                println!("function {}({}):{}", def.name, def.args, def.ret);
            }
            return Ok(());
        }
    };

    src.skip_space();
    if !src.eat(b'(') {
        match funcs::lookup(&name) {
            Some(def) => {
                println!("function {}({}):{}", def.name, def.args, def.ret);
                return Ok(());
            }
            None => {
                return Err(CmdError::new(
                    src.pos,
                    "unknownFn",
                    format!("Unknown function \"{}\"", name),
                ))
            }
        }
    }

    let params_start = src.pos;
    let mut params = Vec::new();
    loop {
        src.skip_space();
        if src.eat(b')') {
            break;
        }
        let pname = match src.parse_key() {
            Some(pname) => pname,
            None => return Err(CmdError::new(src.pos, "paramName", "Missing parameter name")),
        };
        src.skip_type();
        let default = if src.eat(b'=') {
            let node = src.parse_expr(false)?;
            // Defaults are fixed at definition time.
            let mut scratch = Context::std(None);
            let value = eval(&node, &mut scratch, None);
            if value.is_error() {
                return Err(CmdError::new(
                    src.pos,
                    "paramDefault",
                    format!("Bad default for parameter \"{}\"", pname),
                ));
            }
            value
        } else {
            Value::Null
        };
        params.push(Field::new(pname, default));
        src.skip_space();
        src.eat(b',');
    }
    let params_text = src.text[params_start..src.pos.saturating_sub(1)].trim().to_string();
    let mut ret = String::new();
    src.skip_space();
    if src.peek() == Some(b':') {
        let before = src.pos;
        src.skip_type();
        ret = src.text[before + 1..src.pos].trim().to_string();
    }

    src.skip_space();
    if src.peek() != Some(b'{') {
        // A redundant declaration of something already defined is fine.
        if funcs::lookup(&name).is_some() {
            return Ok(());
        }
        return Err(CmdError::new(src.pos, "missingBody", "Missing function body"));
    }

    // Register a forward declaration first so the body can recurse.
    let params = Value::Object(params);
    if funcs::register_user(&name, params.clone(), params_text.clone(), ret.clone(), Arc::new(Vec::new()))
        .is_err()
    {
        return Err(CmdError::new(
            src.pos,
            "redefine",
            format!("Can't redefine built-in function \"{}\"", name),
        ));
    }
    let body = parse_block(src)?;
    let _ = funcs::register_user(&name, params, params_text, ret, Arc::new(body));
    Ok(())
}

fn parse_file(src: &mut Src) -> Result<CmdKind, CmdError> {
    src.skip_space();
    let sel = match src.peek() {
        None | Some(b';' | b'}') => FileSel::List,
        Some(b'+') => {
            src.pos += 1;
            FileSel::Next
        }
        Some(b'-') => {
            src.pos += 1;
            FileSel::Previous
        }
        Some(b'(') => FileSel::Expr(src.parse_paren_expr("file")?),
        _ => {
            let start = src.pos;
            while matches!(src.peek(), Some(b) if b != b';' && !b.is_ascii_whitespace()) {
                src.pos += 1;
            }
            FileSel::Name(src.text[start..src.pos].to_string())
        }
    };
    src.skip_space();
    src.eat(b';');
    Ok(CmdKind::File(sel))
}

fn parse_set(src: &mut Src) -> Result<CmdKind, CmdError> {
    src.skip_space();
    if src.peek() == Some(b'(') {
        let expr = src.parse_paren_expr("set")?;
        src.skip_space();
        src.eat(b';');
        return Ok(CmdKind::Set { text: None, expr: Some(expr) });
    }
    let start = src.pos;
    while matches!(src.peek(), Some(b) if b != b';' && b != b'\n' && b != b'{') {
        src.pos += 1;
    }
    let text = src.text[start..src.pos].trim().to_string();
    src.eat(b';');
    Ok(CmdKind::Set { text: Some(text), expr: None })
}

/// Run a statement list. `None` means it ran to completion. A bare
/// expression's value is printed, except that a terminal one is passed
/// up as `Flow::Output` (so a function body may end in its value).
pub fn run_list(cmds: &[Cmd], context: &mut Context) -> Option<Flow> {
    let mut at = 0;
    while at < cmds.len() {
        match run_cmd(&cmds[at], context) {
            None => at += 1,
            Some(Flow::CaseMiss) => {
                // Skip ahead to the next case or default.
                at += 1;
                while at < cmds.len()
                    && !matches!(cmds[at].kind, CmdKind::Case(_) | CmdKind::Default)
                {
                    at += 1;
                }
            }
            Some(Flow::Output(value)) if at + 1 < cmds.len() => {
                println!("{}", value);
                at += 1;
            }
            Some(flow) => return Some(flow),
        }
    }
    None
}

fn expr_error(value: Value, at: usize) -> Flow {
    let (key, message, origin) = match value.as_error() {
        Some(err) => (err.key.clone(), err.message.clone(), err.origin),
        None => ("error".to_string(), "error".to_string(), None),
    };
    Flow::Error(CmdError { offset: origin.unwrap_or(at), key, message })
}

fn run_cmd(cmd: &Cmd, context: &mut Context) -> Option<Flow> {
    tracing::trace!(at = cmd.at, "run statement");
    match &cmd.kind {
        CmdKind::If { cond, then, otherwise } => {
            if eval(cond, context, None).is_true() {
                run_list(then, context)
            } else {
                run_list(otherwise, context)
            }
        }
        CmdKind::While { cond, body } => {
            while eval(cond, context, None).is_true() {
                match run_list(body, context) {
                    None | Some(Flow::Continue) => {}
                    Some(Flow::Break) => break,
                    Some(Flow::Output(value)) => println!("{}", value),
                    Some(flow) => return Some(flow),
                }
            }
            None
        }
        CmdKind::For { declare, key, expr, body } => run_for(cmd.at, *declare, key.as_deref(), expr, body, context),
        CmdKind::Break => Some(Flow::Break),
        CmdKind::Continue => Some(Flow::Continue),
        CmdKind::Switch { expr, body } => {
            let value = eval(expr, context, None);
            context.push_layer(
                Value::Object(vec![Field::new("switchcase", value)]),
                LayerFlags::default(),
            );
            let flow = run_list(body, context);
            context.pop_layer();
            match flow {
                Some(Flow::Break) => None,
                other => other,
            }
        }
        CmdKind::Case(expr) => {
            let current = match context.top_member("switchcase") {
                Some(current) => current,
                None => {
                    return Some(Flow::Error(CmdError::new(
                        cmd.at,
                        "case",
                        "Can't use \"case\" outside of \"switch\"",
                    )))
                }
            };
            // A null switchcase means an earlier case matched; keep
            // falling through.
            if current.is_null() {
                return None;
            }
            let this_case = eval(expr, context, None);
            if json::equal(&this_case, &current) {
                context.set_top_member("switchcase", Value::Null);
                None
            } else {
                Some(Flow::CaseMiss)
            }
        }
        CmdKind::Default => None,
        CmdKind::Try { body, name, catch } => {
            match run_list(body, context) {
                Some(Flow::Error(err)) => {
                    if let Some(name) = name {
                        let caught = Value::Object(vec![
                            Field::new("key", Value::from(err.key.as_str())),
                            Field::new("message", Value::from(err.message.as_str())),
                        ]);
                        context.push_layer(
                            Value::Object(vec![Field::new(name.clone(), caught)]),
                            LayerFlags::default(),
                        );
                        let flow = run_list(catch, context);
                        context.pop_layer();
                        flow
                    } else {
                        run_list(catch, context)
                    }
                }
                other => other,
            }
        }
        CmdKind::Throw { code, parts } => {
            let mut values: Vec<Value> = parts.iter().map(|p| eval(p, context, None)).collect();
            let (key, message) = match values.len() {
                0 => ("throw".to_string(), format!("error {}", code.unwrap_or(0))),
                1 => ("throw".to_string(), values.remove(0).text().into_owned()),
                _ => {
                    let key = values.remove(0).text().into_owned();
                    // Any further argument substitutes into the message.
                    let message = values.remove(0).text().into_owned();
                    let message = match values.first() {
                        Some(arg) => message.replacen("%s", &arg.text(), 1),
                        None => message,
                    };
                    (key, message)
                }
            };
            Some(Flow::Error(CmdError { offset: cmd.at, key, message }))
        }
        CmdKind::Declare { constant, decls } => {
            for (key, init) in decls {
                let value = match init {
                    Some(expr) => {
                        let value = eval(expr, context, None);
                        if value.is_error() {
                            return Some(expr_error(value, cmd.at));
                        }
                        value
                    }
                    None => Value::Null,
                };
                if context.declare(key, value, *constant).is_err() {
                    return Some(Flow::Error(CmdError::new(
                        cmd.at,
                        "redeclare",
                        format!(
                            "Duplicate {} \"{}\"",
                            if *constant { "const" } else { "var" },
                            key
                        ),
                    )));
                }
            }
            None
        }
        CmdKind::Return(expr) => {
            let value = match expr {
                Some(expr) => eval(expr, context, None),
                None => Value::Null,
            };
            Some(Flow::Return(value))
        }
        CmdKind::Void(expr) => {
            eval(expr, context, None);
            None
        }
        CmdKind::Explain(expr) => {
            let table = match expr {
                Some(expr) => eval(expr, context, None),
                None => match context.default_table() {
                    Some((table, _)) => table,
                    None => Value::Null,
                },
            };
            println!("{}", explain_table(&table));
            None
        }
        CmdKind::File(sel) => run_file(cmd.at, sel, context),
        CmdKind::Import(path) => {
            let text = match files::load(std::path::Path::new(path)) {
                Ok(text) => text,
                Err(err) => {
                    return Some(Flow::Error(CmdError::new(
                        cmd.at,
                        "import",
                        format!("{}: {}", path, err),
                    )))
                }
            };
            let cmds = match parse_script(&text) {
                Ok(cmds) => cmds,
                Err(err) => return Some(Flow::Error(err)),
            };
            run_list(&cmds, context)
        }
        CmdKind::Print(parts) => {
            let mut out = String::new();
            for part in parts {
                let value = eval(part, context, None);
                if value.is_error() {
                    return Some(expr_error(value, cmd.at));
                }
                match value {
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            println!("{}", out);
            None
        }
        CmdKind::Set { text, expr } => {
            let settings = match (text, expr) {
                (Some(text), _) => text.clone(),
                (None, Some(expr)) => match eval(expr, context, None) {
                    Value::String(s) => s,
                    _ => {
                        return Some(Flow::Error(CmdError::new(
                            cmd.at,
                            "setString",
                            "set expression must return a string",
                        )))
                    }
                },
                (None, None) => String::new(),
            };
            match context.apply_settings(&settings) {
                Ok(()) => None,
                Err(message) => Some(Flow::Error(CmdError::new(cmd.at, "set", message))),
            }
        }
        CmdKind::Expr(node) => {
            let value = eval(node, context, None);
            if value.is_error() {
                return Some(expr_error(value, cmd.at));
            }
            if !node.is_assignment() {
                return Some(Flow::Output(value));
            }
            None
        }
    }
}

fn run_for(
    at: usize,
    declare: bool,
    key: Option<&str>,
    expr: &Node,
    body: &[Cmd],
    context: &mut Context,
) -> Option<Flow> {
    let array = eval(expr, context, None);
    if array.is_error() {
        return Some(expr_error(array, at));
    }
    if !matches!(array, Value::Array(_) | Value::Deferred(_)) {
        return Some(Flow::Error(CmdError::new(
            at,
            "forNotArray",
            "\"for\" expression is not an array",
        )));
    }

    // Three binding forms: an existing variable, a fresh loop-local
    // variable, or anonymous iteration bound to `this`.
    enum Binding {
        Existing(String),
        Local(String),
        This,
    }
    let binding = match key {
        Some(key) if !declare => match context.var_writable(key) {
            Some(false) => {
                return Some(Flow::Error(CmdError::new(
                    at,
                    "forConst",
                    format!("\"for\" variable \"{}\" is a const", key),
                )))
            }
            Some(true) => Binding::Existing(key.to_string()),
            None => Binding::Local(key.to_string()),
        },
        Some(key) => Binding::Local(key.to_string()),
        None => Binding::This,
    };

    if let Binding::Local(key) = &binding {
        context.push_layer(
            Value::Object(vec![Field::new(key.clone(), Value::Null)]),
            LayerFlags::VAR,
        );
    }

    let mut out = None;
    for elem in array.elements() {
        if crate::interrupted() {
            out = Some(Flow::Error(CmdError::new(at, "interrupted", "Interrupted")));
            break;
        }
        let elem = elem.into_owned();
        match &binding {
            Binding::Existing(key) | Binding::Local(key) => {
                let _ = context.write(key, &[], elem, crate::context::WriteKind::Assign);
            }
            Binding::This => context.push_layer(elem, LayerFlags::THIS),
        }
        let flow = run_list(body, context);
        if matches!(binding, Binding::This) {
            context.pop_layer();
        }
        match flow {
            None | Some(Flow::Continue) => {}
            Some(Flow::Break) => break,
            Some(flow) => {
                out = Some(flow);
                break;
            }
        }
    }

    if matches!(binding, Binding::Local(_)) {
        context.pop_layer();
    }
    out
}

fn run_file(at: usize, sel: &FileSel, context: &mut Context) -> Option<Flow> {
    let switch_to = |context: &mut Context, index: usize| -> Option<Flow> {
        match context.switch_file(index) {
            Ok(()) => None,
            Err(message) => Some(Flow::Error(CmdError::new(at, "file", message))),
        }
    };
    match sel {
        FileSel::List => {
            for (i, entry) in context.files().iter().enumerate() {
                let marker = if context.current_file() == Some(i) { "*" } else { " " };
                println!("{} {}", marker, entry.filename.display());
            }
            None
        }
        FileSel::Next => {
            let next = context.current_file().map(|i| i + 1).unwrap_or(0);
            switch_to(context, next)
        }
        FileSel::Previous => {
            let previous = context.current_file().and_then(|i| i.checked_sub(1)).unwrap_or(0);
            switch_to(context, previous)
        }
        FileSel::Name(name) => {
            let index = context.add_file(name.into(), true);
            switch_to(context, index)
        }
        FileSel::Expr(expr) => match eval(expr, context, None) {
            Value::String(name) => {
                let index = context.add_file(name.into(), true);
                switch_to(context, index)
            }
            _ => Some(Flow::Error(CmdError::new(at, "file", "file expression must return a name"))),
        },
    }
}

/// Column statistics for the explain command, via the explain
/// aggregate.
fn explain_table(table: &Value) -> Value {
    let def = match funcs::lookup("explain") {
        Some(def) => def,
        None => return Value::Null,
    };
    let fns = match &def.kind {
        FuncKind::Aggregate(fns) => fns,
        _ => return Value::Null,
    };
    let mut cell: AgCell = (fns.cell)();
    for row in table.elements() {
        (fns.fold)(&[row.into_owned()], &mut cell);
    }
    (fns.finish)(&[], &mut cell)
}

/// Parse and run a script. The value of the last output expression (a
/// bare non-assignment expression) is returned; errors carry a source
/// offset the caller can map to a line.
pub fn run_script(text: &str, context: &mut Context) -> Result<Option<Value>, CmdError> {
    let cmds = parse_script(text)?;
    let mut last = None;
    let mut at = 0;
    while at < cmds.len() {
        match run_cmd(&cmds[at], context) {
            None => at += 1,
            Some(Flow::CaseMiss) => {
                at += 1;
                while at < cmds.len()
                    && !matches!(cmds[at].kind, CmdKind::Case(_) | CmdKind::Default)
                {
                    at += 1;
                }
            }
            // At the top level output values are captured for the
            // caller rather than printed.
            Some(Flow::Output(value)) => {
                last = Some(value);
                at += 1;
            }
            Some(Flow::Return(value)) => return Ok(Some(value)),
            Some(Flow::Break) => {
                return Err(CmdError::new(cmds[at].at, "break", "Misuse of \"break\""))
            }
            Some(Flow::Continue) => {
                return Err(CmdError::new(cmds[at].at, "continue", "Misuse of \"continue\""))
            }
            Some(Flow::Error(err)) => return Err(err),
        }
    }
    Ok(last)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn run(script: &str) -> Result<Option<Value>, CmdError> {
        let mut context = Context::std(None);
        run_script(script, &mut context)
    }

    fn value(script: &str) -> Value {
        run(script).expect("script failed").expect("no output value")
    }

    #[test]
    fn test_var_and_loop() {
        assert_eq!(
            value("var x = 0; for (i of [1,2,3]) x = x + i; x"),
            Value::from(json!(6))
        );
    }

    #[test]
    fn test_if_else() {
        assert_eq!(value("var x; if (1 < 2) x = \"yes\"; else x = \"no\"; x"), Value::from("yes"));
    }

    #[test]
    fn test_while_break_continue() {
        let script = "
            var n = 0, total = 0;
            while (true) {
                n = n + 1;
                if (n == 2) continue;
                if (n > 4) break;
                total = total + n;
            }
            total";
        // 1 + 3 + 4
        assert_eq!(value(script), Value::from(json!(8)));
    }

    #[test]
    fn test_const_is_constant() {
        let err = run("const k = 1; k = 2;").unwrap_err();
        assert_eq!(err.key, "const");
    }

    #[test]
    fn test_try_catch() {
        assert_eq!(
            value("var m; try { throw \"E\",\"boom\" } catch (e) { m = e.message } m"),
            Value::from("boom")
        );
        assert_eq!(
            value("try { throw \"E\",\"boom\" } catch (e) { e.key }"),
            Value::from("E")
        );
    }

    #[test]
    fn test_uncaught_throw() {
        let err = run("throw 404, \"not found\"").unwrap_err();
        assert_eq!(err.message, "not found");
    }

    #[test]
    fn test_switch() {
        let script = "
            var out;
            switch (2) {
                case 1: out = \"one\"; break;
                case 2: out = \"two\"; break;
                default: out = \"many\";
            }
            out";
        assert_eq!(value(script), Value::from("two"));
    }

    #[test]
    fn test_switch_default() {
        let script = "
            var out = \"none\";
            switch (9) { case 1: out = \"one\"; break; default: out = \"many\"; }
            out";
        assert_eq!(value(script), Value::from("many"));
    }

    #[test]
    fn test_user_function() {
        let script = "
            function double(n) { return n * 2 }
            double(21)";
        assert_eq!(value(script), Value::from(json!(42)));
    }

    #[test]
    fn test_function_locals_do_not_leak() {
        let script = "
            function probe(n) { var hidden = 1; return n }
            void probe(1);
            var leaked = \"no\";
            try { hidden } catch { leaked = \"yes\" }
            leaked";
        // The local var is gone after the call returns.
        assert_eq!(value(script), Value::from("yes"));
    }

    #[test]
    fn test_function_defaults() {
        // Defaults stand in for missing positional arguments.
        assert_eq!(
            value("function pad(a, b = 9) { return [a, b] } pad(1)"),
            Value::from(json!([1, 9]))
        );
    }

    #[test]
    fn test_anonymous_for_binds_this() {
        assert_eq!(
            value("var total = 0; for ([{v: 1}, {v: 2}]) total = total + v; total"),
            Value::from(json!(3))
        );
    }

    #[test]
    fn test_command_vs_function_name() {
        // "print" is a command; an expression still works after it.
        assert!(run("print \"hello\";").unwrap().is_none());
    }

    #[test]
    fn test_set_command() {
        assert!(run("set tab=4, pretty").unwrap().is_none());
        assert_eq!(run("set bogus=1").unwrap_err().key, "set");
    }

    #[test]
    fn test_error_line_mapping() {
        let err = run("var a = 1;\nb = 2;").unwrap_err();
        assert_eq!(err.key, "unknownVar");
        assert_eq!(files::line_of("var a = 1;\nb = 2;", err.offset), 2);
    }
}
