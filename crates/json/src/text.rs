//! String services for the engine: codepoint-indexed operations,
//! case-insensitive comparison, abbreviation matching, backslash
//! escapes, and the SQL LIKE matcher. All operations are defined over
//! codepoints, never bytes.

use std::cmp::Ordering;

/// Length in codepoints.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Substring by codepoint index. `limit` of None takes the rest.
pub fn substr(s: &str, start: usize, limit: Option<usize>) -> &str {
    let mut indices = s.char_indices().skip(start);
    let from = match indices.next() {
        Some((at, _)) => at,
        None => return "",
    };
    match limit {
        None => &s[from..],
        Some(limit) => {
            let to = s[from..]
                .char_indices()
                .nth(limit)
                .map(|(at, _)| from + at)
                .unwrap_or(s.len());
            &s[from..to]
        }
    }
}

pub fn to_upper(s: &str) -> String {
    s.to_uppercase()
}

pub fn to_lower(s: &str) -> String {
    s.to_lowercase()
}

/// Mixed (title) case: the first letter of each word is uppercased and
/// the rest lowercased. Words in the exception list keep their given
/// spelling ("of", "SQL", "McDonald", ...).
pub fn to_mixed(s: &str, exceptions: &[&str]) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, word) in s.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match exceptions.iter().find(|x| caseless_eq(x, word)) {
            // Interior exception words are used verbatim. The first word
            // is always capitalized, even when excepted.
            Some(x) if i > 0 => out.push_str(x),
            _ => {
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.extend(chars.flat_map(char::to_lowercase));
                }
            }
        }
    }
    out
}

/// Case-insensitive equality with full case folding.
pub fn caseless_eq(a: &str, b: &str) -> bool {
    caseless::default_caseless_match_str(a, b)
}

/// Case-insensitive ordering. Folds each codepoint to lowercase.
pub fn caseless_cmp(a: &str, b: &str) -> Ordering {
    let fold = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<char>>();
    fold(a).cmp(&fold(b))
}

/// Abbreviation match: |abbr| is a caseless prefix of |full|.
pub fn abbrev_match(abbr: &str, full: &str) -> bool {
    let count = char_len(abbr);
    count <= char_len(full) && caseless_eq(abbr, substr(full, 0, Some(count)))
}

/// Expand backslash escapes in a quoted-string body.
pub fn unescape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('e') => out.push('\u{1b}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                if hex.len() == 4 {
                    if let Some(c) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        out.push(c);
                        for _ in 0..4 {
                            chars.next();
                        }
                        continue;
                    }
                }
                out.push('u');
            }
            Some(other) => out.push(other),
        }
    }
    out
}

/// Add backslash escapes so that `unescape` restores the input.
pub fn escape(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for c in src.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// SQL LIKE: `%` matches any run, `_` matches one codepoint, everything
/// else matches itself case-insensitively.
pub fn like(text: &str, pattern: &str) -> bool {
    fn matches(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((&'%', rest)) => {
                (0..=text.len()).any(|skip| matches(&text[skip..], rest))
            }
            Some((&'_', rest)) => match text.split_first() {
                Some((_, text)) => matches(text, rest),
                None => false,
            },
            Some((p, rest)) => match text.split_first() {
                Some((t, text)) => {
                    t.to_lowercase().eq(p.to_lowercase()) && matches(text, rest)
                }
                None => false,
            },
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&text, &pattern)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_substr_by_codepoint() {
        assert_eq!(substr("héllo", 1, Some(3)), "éll");
        assert_eq!(substr("héllo", 4, None), "o");
        assert_eq!(substr("ab", 5, None), "");
    }

    #[test]
    fn test_mixed_case() {
        assert_eq!(to_mixed("ada", &[]), "Ada");
        assert_eq!(to_mixed("war AND peace", &["and"]), "War and Peace");
        assert_eq!(to_mixed("ada lovelace", &[]), "Ada Lovelace");
    }

    #[test]
    fn test_caseless() {
        assert!(caseless_eq("GROUP", "group"));
        assert_eq!(caseless_cmp("Apple", "apple"), Ordering::Equal);
        assert_eq!(caseless_cmp("Apple", "banana"), Ordering::Less);
        assert!(abbrev_match("toUp", "toUpperCase"));
        assert!(!abbrev_match("toUpperCaseX", "toUpperCase"));
    }

    #[test]
    fn test_escape_round_trip() {
        let subject = "a\"b\\c\nd\te";
        assert_eq!(unescape(&escape(subject)), subject);
        assert_eq!(unescape("\\u0041\\n"), "A\n");
    }

    #[test]
    fn test_like() {
        assert!(like("hello", "h%o"));
        assert!(like("HELLO", "h_llo"));
        assert!(like("abc", "%"));
        assert!(!like("abc", "a"));
        assert!(!like("abc", "_"));
    }
}
