//! String built-ins. All positions and lengths are codepoint counts.

use super::FnExtra;
use crate::ast::RegexNode;
use json::{text, Value};

pub fn to_upper_case(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(text::to_upper(s)),
        _ => Value::Null,
    }
}

pub fn to_lower_case(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(text::to_lower(s)),
        _ => Value::Null,
    }
}

pub fn to_mixed_case(_: &FnExtra, args: &[Value]) -> Value {
    let exceptions: Vec<String> = match args.get(1) {
        Some(list @ (Value::Array(_) | Value::Deferred(_))) => list
            .elements()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let exceptions: Vec<&str> = exceptions.iter().map(String::as_str).collect();
    match args.first() {
        Some(Value::String(s)) => Value::from(text::to_mixed(s, &exceptions)),
        _ => Value::Null,
    }
}

pub fn trim(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(s.trim()),
        _ => Value::Null,
    }
}

pub fn trim_start(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(s.trim_start()),
        _ => Value::Null,
    }
}

pub fn trim_end(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => Value::from(s.trim_end()),
        _ => Value::Null,
    }
}

pub fn substr(_: &FnExtra, args: &[Value]) -> Value {
    let s = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Value::Null,
    };
    let len = text::char_len(s) as i64;
    let mut start = args.get(1).and_then(Value::as_i64).unwrap_or(0);
    if start < 0 {
        start += len;
    }
    let start = start.clamp(0, len) as usize;
    let limit = args.get(2).and_then(Value::as_i64).map(|l| l.max(0) as usize);
    Value::from(text::substr(s, start, limit))
}

pub fn char_at(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => {
            let pos = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            if pos < 0 {
                return Value::from("");
            }
            Value::from(text::substr(s, pos as usize, Some(1)))
        }
        _ => Value::Null,
    }
}

pub fn char_code_at(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(s)) => {
            let pos = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            match s.chars().nth(pos.max(0) as usize) {
                Some(c) => Value::from(c as i64),
                None => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

pub fn from_char_code(_: &FnExtra, args: &[Value]) -> Value {
    fn push(out: &mut String, v: &Value) {
        match v {
            Value::Number(n) => {
                if let Some(c) = u32::try_from(n.to_i64_lossy()).ok().and_then(char::from_u32) {
                    out.push(c);
                }
            }
            Value::String(s) => out.push_str(s),
            Value::Array(_) | Value::Deferred(_) => {
                for elem in v.elements() {
                    push(out, &elem);
                }
            }
            _ => {}
        }
    }
    let mut out = String::new();
    for arg in args {
        push(&mut out, arg);
    }
    Value::from(out)
}

pub fn repeat(_: &FnExtra, args: &[Value]) -> Value {
    match (args.first(), args.get(1).and_then(Value::as_i64)) {
        (Some(Value::String(s)), Some(count)) if count >= 0 => {
            Value::from(s.repeat(count as usize))
        }
        _ => Value::Null,
    }
}

/// Expand `$&`/`$0`-`$9` capture references in replacement text.
fn expand(out: &mut String, replacement: &str, caps: &regex::Captures) {
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('&') => {
                chars.next();
                out.push_str(caps.get(0).map(|m| m.as_str()).unwrap_or(""));
            }
            Some(d @ '0'..='9') => {
                let group = d as usize - '0' as usize;
                chars.next();
                if let Some(m) = caps.get(group) {
                    out.push_str(m.as_str());
                }
            }
            _ => out.push('$'),
        }
    }
}

fn regex_replace(subject: &str, rx: &RegexNode, replacement: &str, globally: bool) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while pos <= subject.len() {
        let caps = match rx.regex.captures_at(subject, pos) {
            Some(caps) => caps,
            None => break,
        };
        // Group 0 is the overall match and always present.
        let m = caps.get(0).unwrap();
        out.push_str(&subject[pos..m.start()]);
        expand(&mut out, replacement, &caps);
        pos = m.end();

        // An empty match must advance one codepoint, or the loop would
        // never terminate.
        if m.is_empty() {
            match subject[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos += c.len_utf8();
                }
                None => break,
            }
        }
        if !globally {
            break;
        }
    }
    out.push_str(&subject[pos.min(subject.len())..]);
    out
}

/// Caseless substring search by codepoint window; returns byte offsets.
fn find_caseless(subject: &str, needle: &str, from: usize) -> Option<(usize, usize)> {
    let needle_chars = text::char_len(needle);
    let mut boundaries: Vec<usize> = subject[from..]
        .char_indices()
        .map(|(at, _)| from + at)
        .collect();
    boundaries.push(subject.len());
    for (i, &start) in boundaries.iter().enumerate() {
        let end = match boundaries.get(i + needle_chars) {
            Some(&end) => end,
            None => break,
        };
        if text::caseless_eq(&subject[start..end], needle) {
            return Some((start, end));
        }
    }
    None
}

fn string_replace(
    subject: &str,
    search: &str,
    replacement: &str,
    globally: bool,
    ignorecase: bool,
) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while pos <= subject.len() {
        let found = if ignorecase {
            find_caseless(subject, search, pos)
        } else {
            subject[pos..].find(search).map(|at| (pos + at, pos + at + search.len()))
        };
        let (start, end) = match found {
            Some(hit) => hit,
            None => break,
        };
        out.push_str(&subject[pos..start]);
        out.push_str(replacement);
        pos = end;
        if start == end {
            match subject[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    pos += c.len_utf8();
                }
                None => break,
            }
        }
        if !globally {
            break;
        }
    }
    out.push_str(&subject[pos.min(subject.len())..]);
    out
}

fn replace_impl(extra: &FnExtra, args: &[Value], globally: bool) -> Value {
    let subject = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Value::Null,
    };
    let replacement = match args.get(2) {
        Some(Value::String(r)) => r,
        _ => return Value::Null,
    };
    match (extra.regex, args.get(1)) {
        (Some(rx), _) => {
            // A /…/g literal implies replace-all even via replace().
            Value::from(regex_replace(subject, rx, replacement, globally || rx.global))
        }
        (None, Some(Value::String(search))) => {
            let ignorecase = args.get(3).map(Value::is_true).unwrap_or(false);
            Value::from(string_replace(subject, search, replacement, globally, ignorecase))
        }
        _ => Value::Null,
    }
}

pub fn replace(extra: &FnExtra, args: &[Value]) -> Value {
    replace_impl(extra, args, false)
}

pub fn replace_all(extra: &FnExtra, args: &[Value]) -> Value {
    replace_impl(extra, args, true)
}

pub fn split(extra: &FnExtra, args: &[Value]) -> Value {
    let subject = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Value::Null,
    };
    let limit = args.get(2).and_then(Value::as_i64).map(|l| l.max(0) as usize);
    let mut parts: Vec<Value> = match (extra.regex, args.get(1)) {
        (Some(rx), _) => rx.regex.split(subject).map(Value::from).collect(),
        (None, Some(Value::String(delim))) if delim.is_empty() => {
            subject.chars().map(|c| Value::from(c.to_string())).collect()
        }
        (None, Some(Value::String(delim))) => subject.split(delim.as_str()).map(Value::from).collect(),
        _ => vec![Value::from(subject.as_str())],
    };
    if let Some(limit) = limit {
        parts.truncate(limit);
    }
    Value::Array(parts)
}

fn with_ignorecase(subject: &str, search: &str, ignorecase: bool, test: impl Fn(&str, &str) -> bool) -> bool {
    if ignorecase {
        test(&text::to_lower(subject), &text::to_lower(search))
    } else {
        test(subject, search)
    }
}

pub fn starts_with(_: &FnExtra, args: &[Value]) -> Value {
    match (args.first(), args.get(1)) {
        (Some(Value::String(subject)), Some(Value::String(search))) => {
            let ignorecase = args.get(2).map(Value::is_true).unwrap_or(false);
            Value::Bool(with_ignorecase(subject, search, ignorecase, |s, n| s.starts_with(n)))
        }
        _ => Value::Null,
    }
}

pub fn ends_with(_: &FnExtra, args: &[Value]) -> Value {
    match (args.first(), args.get(1)) {
        (Some(Value::String(subject)), Some(Value::String(search))) => {
            let ignorecase = args.get(2).map(Value::is_true).unwrap_or(false);
            Value::Bool(with_ignorecase(subject, search, ignorecase, |s, n| s.ends_with(n)))
        }
        _ => Value::Null,
    }
}

pub fn hex(_: &FnExtra, args: &[Value]) -> Value {
    let number = match args.first() {
        Some(Value::Number(n)) => n.to_i64_lossy(),
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => return Value::Null,
        },
        _ => return Value::Null,
    };
    let width = args.get(1).and_then(Value::as_i64).unwrap_or(0).max(0) as usize;
    Value::from(format!("{:0width$x}", number, width = width))
}

pub fn to_string(_: &FnExtra, args: &[Value]) -> Value {
    match args.first() {
        None | Some(Value::Null | Value::Error(_)) => Value::from("null"),
        Some(v @ (Value::Array(_) | Value::Deferred(_) | Value::Object(_))) => {
            Value::from(v.to_string())
        }
        Some(v) => Value::from(v.text().into_owned()),
    }
}

pub fn to_fixed(_: &FnExtra, args: &[Value]) -> Value {
    match (args.first(), args.get(1).and_then(Value::as_i64)) {
        (Some(Value::Number(n)), Some(digits)) => {
            Value::from(format!("{:.*}", digits.clamp(0, 17) as usize, n.as_f64()))
        }
        _ => Value::Null,
    }
}

pub fn wrap(_: &FnExtra, args: &[Value]) -> Value {
    let subject = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Value::Null,
    };
    let width = args.get(1).and_then(Value::as_i64).unwrap_or(80).max(1) as usize;
    let mut out = String::new();
    let mut line = 0;
    for word in subject.split_whitespace() {
        let len = text::char_len(word);
        if line > 0 && line + 1 + len > width {
            out.push('\n');
            line = 0;
        } else if line > 0 {
            out.push(' ');
            line += 1;
        }
        out.push_str(word);
        line += len;
    }
    Value::from(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::RegexNode;

    fn extra_with(rx: &RegexNode) -> FnExtra<'_> {
        FnExtra { regex: Some(rx) }
    }

    #[test]
    fn test_substr() {
        let args = [Value::from("hello"), Value::from(1), Value::from(3)];
        assert_eq!(substr(&FnExtra::default(), &args), Value::from("ell"));
        let args = [Value::from("hello"), Value::from(-2)];
        assert_eq!(substr(&FnExtra::default(), &args), Value::from("lo"));
    }

    #[test]
    fn test_replace_all_regex() {
        let rx = RegexNode {
            regex: regex::RegexBuilder::new("x").case_insensitive(true).build().unwrap(),
            global: true,
        };
        let args = [Value::from("aXbXc"), Value::Null, Value::from("-")];
        assert_eq!(replace_all(&extra_with(&rx), &args), Value::from("a-b-c"));
    }

    #[test]
    fn test_replace_empty_match_advances() {
        let rx = RegexNode { regex: regex::Regex::new("q*").unwrap(), global: true };
        let args = [Value::from("ab"), Value::Null, Value::from("-")];
        // Matches before 'a', before 'b', and at the end.
        assert_eq!(replace_all(&extra_with(&rx), &args), Value::from("-a-b-"));
    }

    #[test]
    fn test_replace_capture_groups() {
        let rx = RegexNode { regex: regex::Regex::new("(a+)(b)").unwrap(), global: false };
        let args = [Value::from("xaab"), Value::Null, Value::from("[$2$1]")];
        assert_eq!(replace(&extra_with(&rx), &args), Value::from("x[baa]"));
    }

    #[test]
    fn test_string_replace_first_only() {
        let args = [Value::from("a.b.c"), Value::from("."), Value::from("-")];
        assert_eq!(replace(&FnExtra::default(), &args), Value::from("a-b.c"));
        assert_eq!(replace_all(&FnExtra::default(), &args), Value::from("a-b-c"));
    }

    #[test]
    fn test_mixed_case() {
        let args = [Value::from("ada")];
        assert_eq!(to_mixed_case(&FnExtra::default(), &args), Value::from("Ada"));
    }

    #[test]
    fn test_split() {
        let args = [Value::from("a,b,c"), Value::from(",")];
        assert_eq!(
            split(&FnExtra::default(), &args),
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn test_hex() {
        let args = [Value::from(255), Value::from(4)];
        assert_eq!(hex(&FnExtra::default(), &args), Value::from("00ff"));
    }
}
