//! Expression-text utilities: the MACRO-10-specific rewrites applied
//! before the host parser sees an expression, and the operand
//! scanners for literals, reserved symbols, value lists and macro
//! parameter lists.

use super::lexer::{is_symbol_char, LazyRegex};

/// Split `L,,R` at the first top-level double comma.  Quoted text and
/// bracketed groups are opaque to the scan.
pub(crate) fn split_double_comma(text: &str) -> Option<(String, String)> {
    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i + 1 < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' | b'[' | b'<' => depth += 1,
                b')' | b']' | b'>' => depth -= 1,
                b',' if depth == 0 && bytes[i + 1] == b',' => {
                    return Some((text[..i].to_string(), text[i + 2..].to_string()));
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

static TEXT_OPERATOR_RX: LazyRegex = LazyRegex::new("(?i)(SIXBIT|ASCII)[ \\t]*");

/// Rewrite embedded `SIXBIT /text/` to `'text'` and `ASCII /text/`
/// to `"text"`, the quoted forms the host expression parser
/// understands.  The delimiter is the first non-blank character
/// after the keyword.
pub(crate) fn rewrite_text_operators(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    loop {
        let caps = match TEXT_OPERATOR_RX.captures(rest) {
            Some(caps) => caps,
            None => {
                out.push_str(rest);
                return out;
            }
        };
        let whole = caps.get(0).expect("capture 0 always exists");
        let keyword = caps.get(1).expect("keyword group always matches");
        // The keyword must stand alone; SIXBITS is some other symbol.
        let flanked_left = whole.start() == 0
            || !is_symbol_char(rest[..whole.start()].chars().next_back().unwrap_or(' '));
        let after = &rest[whole.end()..];
        let delim = after.chars().next();
        // Whitespace after the keyword separates it from the
        // delimiter; without it the delimiter itself must be a
        // non-symbol character or we are looking at a longer symbol.
        let had_space = whole.end() > keyword.end();
        let flanked_right = delim
            .map(|c| had_space || !is_symbol_char(c))
            .unwrap_or(false);
        if !(flanked_left && flanked_right) {
            out.push_str(&rest[..whole.end()]);
            rest = after;
            continue;
        }
        let delim = delim.expect("checked above");
        let body_start = whole.end() + delim.len_utf8();
        match rest[body_start..].find(delim) {
            Some(len) => {
                let quote = if keyword.as_str().eq_ignore_ascii_case("SIXBIT") {
                    '\''
                } else {
                    '"'
                };
                out.push_str(&rest[..whole.start()]);
                out.push(quote);
                out.push_str(&rest[body_start..body_start + len]);
                out.push(quote);
                rest = &rest[body_start + len + delim.len_utf8()..];
            }
            None => {
                // No closing delimiter; leave the text alone and let
                // the host report it.
                out.push_str(&rest[..whole.end()]);
                rest = after;
            }
        }
    }
}

/// Replace `.` (the current location) with `here`.  A period which
/// touches a digit on either side is part of a number, and quoted
/// text is left alone.
pub(crate) fn substitute_location(text: &str, here: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    for (i, &ch) in chars.iter().enumerate() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '.' => {
                    let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
                    let next_digit = chars.get(i + 1).map_or(false, |c| c.is_ascii_digit());
                    if prev_digit || next_digit {
                        out.push('.');
                    } else {
                        out.push_str(here);
                    }
                }
                _ => out.push(ch),
            },
        }
    }
    out
}

/// Find the first `[`-bracketed region of the raw operand tail,
/// honouring nesting.  Returns the byte range including the
/// brackets.  A `;` outside any bracket ends the search, so comments
/// cannot introduce literals.
pub(crate) fn extract_literal(raw_tail: &str) -> Result<Option<(usize, usize)>, String> {
    let mut depth = 0_i32;
    let mut start = 0_usize;
    for (i, b) in raw_tail.bytes().enumerate() {
        match b {
            b';' if depth == 0 => return Ok(None),
            b'[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some((start, i)));
                }
                if depth < 0 {
                    return Err("unmatched ']' in operands".to_string());
                }
            }
            _ => {}
        }
    }
    if depth > 0 {
        Err("unterminated literal (missing ']')".to_string())
    } else {
        Ok(None)
    }
}

static RESERVED_RX: LazyRegex = LazyRegex::new("(?i)([A-Z$%.?][0-9A-Z$%.]*)#");

/// Find the next `NAME#` reserved-symbol token.  Returns the byte
/// range of the whole token and the bare name.
pub(crate) fn find_reserved(text: &str) -> Option<(usize, usize, String)> {
    let mut search_from = 0;
    while let Some(caps) = RESERVED_RX.captures(&text[search_from..]) {
        let whole = caps.get(0).expect("capture 0 always exists");
        let name = caps.get(1).expect("name group always matches");
        let start = search_from + whole.start();
        let flanked = start == 0
            || !is_symbol_char(text[..start].chars().next_back().unwrap_or(' '));
        if flanked {
            return Some((start, search_from + whole.end(), name.as_str().to_string()));
        }
        search_from += whole.end();
    }
    None
}

/// Split a value list on top-level commas; each value loses one
/// enclosing `<` `>` pair if present.  Empty input is an empty list.
pub(crate) fn split_value_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut values = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut item_start = 0;
    let bytes = trimmed.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q as u8 {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b as char),
                b'(' | b'[' | b'<' => depth += 1,
                b')' | b']' | b'>' => depth -= 1,
                b',' if depth == 0 => {
                    values.push(unbracket(&trimmed[item_start..i]));
                    item_start = i + 1;
                }
                _ => {}
            },
        }
    }
    values.push(unbracket(&trimmed[item_start..]));
    values
}

/// Strip one enclosing `<` `>` pair, used to protect commas inside a
/// single value.
fn unbracket(item: &str) -> String {
    let t = item.trim();
    if let Some(inner) = t.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        inner.to_string()
    } else {
        t.to_string()
    }
}

/// Parse a DEFINE parameter list: names, each optionally followed by
/// a `<default>`.
pub(crate) fn parse_params(text: &str) -> Result<(Vec<String>, Vec<Option<String>>), String> {
    let mut params = Vec::new();
    let mut defaults = Vec::new();
    for raw in split_top_level_commas(text) {
        let item = raw.trim();
        if item.is_empty() {
            continue;
        }
        let name: String = item.chars().take_while(|c| is_symbol_char(*c)).collect();
        if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(format!("bad macro parameter '{item}'"));
        }
        let rest = item[name.len()..].trim();
        if rest.is_empty() {
            defaults.push(None);
        } else if let Some(inner) = rest.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            defaults.push(Some(inner.to_string()));
        } else {
            return Err(format!("bad default for macro parameter '{item}'"));
        }
        params.push(name);
    }
    Ok((params, defaults))
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'(' | b'[' | b'<' => depth += 1,
            b')' | b']' | b'>' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// The argument list of a macro call: either `(a,b,c)` or a bare
/// `a,b,c`.
pub(crate) fn call_values(operands: &str) -> Vec<String> {
    let t = operands.trim();
    if t.is_empty() {
        return Vec::new();
    }
    if let Some(inner) = t.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        split_value_list(inner)
    } else {
        split_value_list(t)
    }
}

/// Parse a `DEFINE NAME(params)` header from the raw tail, returning
/// the name, the parameter names and defaults, and the unconsumed
/// remainder (which starts the body capture).
pub(crate) fn parse_define_header(
    tail: &str,
) -> Result<(String, Vec<String>, Vec<Option<String>>, &str), String> {
    let (name, rest) = parse_name_header(tail)?;
    let rest_trimmed = rest.trim_start();
    if let Some(after_paren) = rest_trimmed.strip_prefix('(') {
        let mut depth = 1_i32;
        for (i, b) in after_paren.bytes().enumerate() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        let (params, defaults) = parse_params(&after_paren[..i])?;
                        return Ok((name, params, defaults, &after_paren[i + 1..]));
                    }
                }
                _ => {}
            }
        }
        Err("unterminated parameter list".to_string())
    } else {
        Ok((name, Vec::new(), Vec::new(), rest))
    }
}

/// Parse a bare `NAME` header (OPDEF), returning the name and the
/// remainder.
pub(crate) fn parse_name_header(tail: &str) -> Result<(String, &str), String> {
    let trimmed = tail.trim_start();
    let name: String = trimmed
        .chars()
        .take_while(|c| is_symbol_char(*c))
        .collect();
    if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(format!("missing or bad name in '{}'", tail.trim()));
    }
    let offset = (trimmed.as_ptr() as usize - tail.as_ptr() as usize) + name.len();
    Ok((name.to_ascii_uppercase(), &tail[offset..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_double_comma() {
        assert_eq!(
            split_double_comma("1,,2"),
            Some(("1".to_string(), "2".to_string()))
        );
        assert_eq!(split_double_comma("1,2"), None);
        // Quoted and bracketed commas are opaque.
        assert_eq!(split_double_comma("',,'"), None);
        assert_eq!(
            split_double_comma("<A,,B>,,C"),
            Some(("<A,,B>".to_string(), "C".to_string()))
        );
    }

    #[test]
    fn test_rewrite_text_operators() {
        assert_eq!(rewrite_text_operators("SIXBIT /DSKA/"), "'DSKA'");
        assert_eq!(rewrite_text_operators("ASCII /AB/+1"), "\"AB\"+1");
        assert_eq!(rewrite_text_operators("1+SIXBIT .X. "), "1+'X' ");
        // Not flanked: some other symbol.
        assert_eq!(rewrite_text_operators("XSIXBIT /A/"), "XSIXBIT /A/");
    }

    #[test]
    fn test_substitute_location() {
        assert_eq!(substitute_location(".+1", "1000"), "1000+1");
        assert_eq!(substitute_location(".", "52"), "52");
        // Digit-adjacent dots are number syntax.
        assert_eq!(substitute_location("10.", "52"), "10.");
        assert_eq!(substitute_location("'A.B'", "52"), "'A.B'");
    }

    #[test]
    fn test_extract_literal() {
        assert_eq!(extract_literal("1,[3]"), Ok(Some((2, 4))));
        assert_eq!(extract_literal("1,[A[B]C]"), Ok(Some((2, 8))));
        assert_eq!(extract_literal("1,2 ;[not me]"), Ok(None));
        assert!(extract_literal("1,[3").is_err());
    }

    #[test]
    fn test_find_reserved() {
        let (start, end, name) = find_reserved("MOVE 1,COUNT#").expect("should find");
        assert_eq!(&"MOVE 1,COUNT#"[start..end], "COUNT#");
        assert_eq!(name, "COUNT");
        assert_eq!(find_reserved("MOVE 1,2"), None);
    }

    #[test]
    fn test_split_value_list() {
        assert_eq!(split_value_list("1,2,3"), vec!["1", "2", "3"]);
        assert_eq!(split_value_list("<1,2>,3"), vec!["1,2", "3"]);
        assert_eq!(split_value_list(""), Vec::<String>::new());
        assert_eq!(split_value_list("A, ,B"), vec!["A", "", "B"]);
    }

    #[test]
    fn test_parse_params() {
        let (params, defaults) = parse_params("A,B<12>,C").expect("should parse");
        assert_eq!(params, vec!["A", "B", "C"]);
        assert_eq!(
            defaults,
            vec![None, Some("12".to_string()), None]
        );
        assert!(parse_params("1X").is_err());
    }

    #[test]
    fn test_call_values() {
        assert_eq!(call_values("(1,2)"), vec!["1", "2"]);
        assert_eq!(call_values("1,2"), vec!["1", "2"]);
        assert_eq!(call_values(" "), Vec::<String>::new());
    }

    #[test]
    fn test_parse_define_header() {
        let (name, params, defaults, rest) =
            parse_define_header(" INCR(X,Y<1>) <body>").expect("should parse");
        assert_eq!(name, "INCR");
        assert_eq!(params, vec!["X", "Y"]);
        assert_eq!(defaults[1].as_deref(), Some("1"));
        assert_eq!(rest, " <body>");

        let (name, params, _, rest) = parse_define_header("FLIP <X>").expect("should parse");
        assert_eq!(name, "FLIP");
        assert!(params.is_empty());
        assert_eq!(rest, " <X>");
    }

    #[test]
    fn test_parse_name_header() {
        let (name, rest) = parse_name_header(" calli [047000,,0]").expect("should parse");
        assert_eq!(name, "CALLI");
        assert_eq!(rest, " [047000,,0]");
        assert!(parse_name_header(" [3]").is_err());
    }
}
