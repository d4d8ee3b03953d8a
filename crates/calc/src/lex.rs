//! The expression tokenizer. Tokens are produced one at a time on
//! demand, and several of them depend on the current parse stack:
//! `-` lexes as negation after a start-of-operand, `/` starts a regular
//! expression where a division cannot appear, SQL keywords are only
//! reserved while a SELECT is being parsed, and an unmatched `}` ends
//! the expression.

use crate::op::Opcode;
use crate::parse::ParseStack;

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub op: Opcode,
    pub start: usize,
    pub len: usize,
}

impl Token {
    pub fn text<'s>(&self, src: &'s str) -> &'s str {
        &src[self.start..self.start + self.len]
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Skip whitespace and // comments.
pub fn skip_space(src: &str, mut pos: usize) -> usize {
    let bytes = src.as_bytes();
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos + 1 < bytes.len() && bytes[pos] == b'/' && bytes[pos + 1] == b'/' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        return pos;
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive match of a multi-word phrase at `pos`, requiring a
/// word boundary after it.
fn phrase_at(src: &str, pos: usize, phrase: &str) -> bool {
    let bytes = src.as_bytes();
    let end = pos + phrase.len();
    if end > bytes.len() || !src[pos..end].eq_ignore_ascii_case(phrase) {
        return false;
    }
    end == bytes.len() || !is_name_char(bytes[end])
}

/// Produce the next token, or None at the end of input. A token with
/// `Opcode::Invalid` marks a character that cannot start a token (or an
/// unmatched `}`), which ends the expression.
pub fn next_token(src: &str, pos: usize, stack: &ParseStack) -> Option<Token> {
    let start = skip_space(src, pos);
    let bytes = src.as_bytes();
    if start >= bytes.len() {
        return None;
    }
    let rest = &src[start..];
    let b = bytes[start];

    // Number literals: decimal with fraction/exponent, or radix-prefixed.
    if b.is_ascii_digit() || (b == b'.' && bytes.get(start + 1).map(u8::is_ascii_digit) == Some(true)) {
        let mut len = 0;
        let rb = rest.as_bytes();
        if b == b'0' && matches!(rb.get(1).copied(), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B')) {
            len = 2;
            while rb.get(len).map(u8::is_ascii_alphanumeric) == Some(true) {
                len += 1;
            }
        } else if b == b'0' && rb.get(1).map(u8::is_ascii_digit) == Some(true) {
            // Leading 0 followed by digits: octal.
            len = 1;
            while rb.get(len).map(u8::is_ascii_digit) == Some(true) {
                len += 1;
            }
        } else {
            while rb.get(len).map(u8::is_ascii_digit) == Some(true) {
                len += 1;
            }
            if rb.get(len) == Some(&b'.') && rb.get(len + 1).map(u8::is_ascii_digit) == Some(true) {
                len += 1;
                while rb.get(len).map(u8::is_ascii_digit) == Some(true) {
                    len += 1;
                }
            }
            if matches!(rb.get(len).copied(), Some(b'e' | b'E')) {
                let mut exp = len + 1;
                if matches!(rb.get(exp).copied(), Some(b'+' | b'-')) {
                    exp += 1;
                }
                if rb.get(exp).map(u8::is_ascii_digit) == Some(true) {
                    len = exp;
                    while rb.get(len).map(u8::is_ascii_digit) == Some(true) {
                        len += 1;
                    }
                }
            }
        }
        return Some(Token { op: Opcode::Number, start, len });
    }

    // Quoted strings; backtick quotes a name rather than a string.
    if matches!(b, b'"' | b'\'' | b'`') {
        let mut len = 1;
        let rb = rest.as_bytes();
        while len < rb.len() && rb[len] != b {
            if rb[len] == b'\\' && len + 1 < rb.len() {
                len += 1;
            }
            len += 1;
        }
        len = (len + 1).min(rb.len().max(1));
        // A backtick-quoted token is a name, not a string; the parser
        // strips the quotes.
        let op = if b == b'`' { Opcode::Name } else { Opcode::String };
        return Some(Token { op, start, len });
    }

    // Names and keywords.
    if is_name_start(b) {
        let rb = rest.as_bytes();
        let mut len = 1;
        while rb.get(len).map(|b| is_name_char(*b)) == Some(true) {
            len += 1;
        }
        let word = &rest[..len];

        let mut op = Opcode::Name;
        if word == "true" || word == "false" {
            op = Opcode::Boolean;
        } else if word == "null" {
            op = Opcode::Null;
        } else if word.eq_ignore_ascii_case("not") && phrase_at(src, start, "not like") {
            return Some(Token { op: Opcode::NotLike, start, len: 8 });
        } else if word.eq_ignore_ascii_case("not") && phrase_at(src, start, "not in") {
            return Some(Token { op: Opcode::NotIn, start, len: 6 });
        } else if word.eq_ignore_ascii_case("is") && phrase_at(src, start, "is not null") {
            return Some(Token { op: Opcode::IsNotNull, start, len: 11 });
        } else if word.eq_ignore_ascii_case("is") && phrase_at(src, start, "is null") {
            return Some(Token { op: Opcode::IsNull, start, len: 7 });
        } else if word.eq_ignore_ascii_case("like") {
            op = Opcode::Like;
        } else if word.eq_ignore_ascii_case("in") {
            op = Opcode::In;
        } else if word.eq_ignore_ascii_case("and") {
            op = Opcode::And;
        } else if word.eq_ignore_ascii_case("or") {
            op = Opcode::Or;
        } else if word.eq_ignore_ascii_case("not") {
            op = Opcode::Not;
        } else if word.eq_ignore_ascii_case("between") {
            op = Opcode::Between;
        } else if word.eq_ignore_ascii_case("as") {
            op = Opcode::As;
        } else if word.eq_ignore_ascii_case("values") {
            op = Opcode::Values;
        } else if word.eq_ignore_ascii_case("select") {
            op = Opcode::Select;
        } else if stack.selecting() {
            // SQL clause keywords are reserved only inside a SELECT, so
            // names like "from" stay usable as members elsewhere.
            if word.eq_ignore_ascii_case("distinct") {
                op = Opcode::Distinct;
            } else if word.eq_ignore_ascii_case("from") {
                op = Opcode::From;
            } else if word.eq_ignore_ascii_case("where") {
                op = Opcode::Where;
            } else if word.eq_ignore_ascii_case("group") && phrase_at(src, start, "group by") {
                return Some(Token { op: Opcode::GroupBy, start, len: 8 });
            } else if word.eq_ignore_ascii_case("having") {
                op = Opcode::Having;
            } else if word.eq_ignore_ascii_case("order") && phrase_at(src, start, "order by") {
                return Some(Token { op: Opcode::OrderBy, start, len: 8 });
            } else if word.eq_ignore_ascii_case("descending") || word.eq_ignore_ascii_case("desc") {
                op = Opcode::Descending;
            } else if word.eq_ignore_ascii_case("limit") {
                op = Opcode::Limit;
            }
        }
        return Some(Token { op, start, len });
    }

    // Regular expression literal, where a division cannot appear.
    if b == b'/' && stack.regex_allowed() {
        let rb = rest.as_bytes();
        let mut len = 1;
        while len < rb.len() && rb[len] != b'/' {
            if rb[len] == b'\\' && len + 1 < rb.len() {
                len += 1;
            }
            len += 1;
        }
        if len < rb.len() {
            len += 1; // closing '/'
            while rb.get(len).map(u8::is_ascii_alphanumeric) == Some(true) {
                len += 1; // flags
            }
        }
        return Some(Token { op: Opcode::Regex, start, len });
    }

    // Symbol operators, longest match first.
    if let Some((op, len)) = Opcode::match_symbol(rest) {
        // An unmatched } ends the expression: it belongs to an enclosing
        // statement block, not to us.
        if op == Opcode::EndObject && !stack.open_object() {
            return Some(Token { op: Opcode::Invalid, start, len: 0 });
        }
        let op = if op == Opcode::Subtract && stack.negate_context() {
            Opcode::Negate
        } else {
            op
        };
        return Some(Token { op, start, len });
    }

    Some(Token { op: Opcode::Invalid, start, len: 0 })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::ParseStack;

    fn all_ops(src: &str) -> Vec<Opcode> {
        let stack = ParseStack::new(false);
        let mut pos = 0;
        let mut out = Vec::new();
        while let Some(tok) = next_token(src, pos, &stack) {
            if tok.op == Opcode::Invalid {
                break;
            }
            out.push(tok.op);
            pos = tok.end();
        }
        out
    }

    #[test]
    fn test_numbers() {
        let stack = ParseStack::new(false);
        for (src, len) in [("12.5e-3 x", 7), ("0x1f+", 4), ("0b101]", 5), ("017,", 3)] {
            let tok = next_token(src, 0, &stack).unwrap();
            assert_eq!(tok.op, Opcode::Number, "{}", src);
            assert_eq!(tok.len, len, "{}", src);
        }
    }

    #[test]
    fn test_strings_and_backtick_names() {
        let stack = ParseStack::new(false);
        let tok = next_token(r#""a\"b" "#, 0, &stack).unwrap();
        assert_eq!((tok.op, tok.len), (Opcode::String, 6));
        let tok = next_token("`select`", 0, &stack).unwrap();
        assert_eq!((tok.op, tok.len), (Opcode::Name, 8));
    }

    #[test]
    fn test_multiword_keywords() {
        assert_eq!(
            all_ops("a not like b is not null"),
            vec![Opcode::Name, Opcode::NotLike, Opcode::Name, Opcode::IsNotNull]
        );
        // "not" alone is the prefix operator; "notation" is a name.
        assert_eq!(all_ops("not notation"), vec![Opcode::Not, Opcode::Name]);
    }

    #[test]
    fn test_sql_keywords_only_when_selecting() {
        // Without a SELECT on the stack, "from" is an ordinary name.
        assert_eq!(all_ops("from"), vec![Opcode::Name]);
    }

    #[test]
    fn test_regex_at_start() {
        let stack = ParseStack::new(false);
        let tok = next_token("/a\\/b/ig", 0, &stack).unwrap();
        assert_eq!((tok.op, tok.len), (Opcode::Regex, 8));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(all_ops("1 // comment\n + 2"), vec![Opcode::Number, Opcode::Add, Opcode::Number]);
    }
}
