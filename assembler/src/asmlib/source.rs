//! Source retrieval and preparation.
//!
//! Sources are named by a semicolon-separated list of URLs.  Each
//! one may be plain text or an HTML page carrying the listing inside
//! `<pre>` sections, as the emulator archives serve them; the HTML
//! wrapper is stripped and the three entities the listings use are
//! decoded.  Line separators are normalised to CR/LF before the
//! texts are joined.

use std::fs;

use super::lexer::LazyRegex;
use super::types::{AssemblerFailure, IoFailed};

pub trait SourceLoader {
    fn fetch(&self, url: &str) -> Result<String, AssemblerFailure>;
}

/// Reads local files; a `file://` prefix is accepted and ignored.
/// Network transport is the business of whatever invokes the
/// assembler.
#[derive(Debug, Default)]
pub struct FileLoader;

impl SourceLoader for FileLoader {
    fn fetch(&self, url: &str) -> Result<String, AssemblerFailure> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        fs::read_to_string(path).map_err(|error| {
            AssemblerFailure::Io(IoFailed {
                target: path.to_string(),
                error,
            })
        })
    }
}

pub(crate) fn split_url_list(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// CR, LF and CR LF all become CR LF.
pub(crate) fn normalise_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            other => out.push(other),
        }
    }
    out
}

static PRE_OPEN_RX: LazyRegex = LazyRegex::new("(?i)<pre[^>]*>");
static PRE_CLOSE_RX: LazyRegex = LazyRegex::new("(?i)</pre>");
static ENTITY_RX: LazyRegex = LazyRegex::new("&[#0-9A-Za-z]+;");

fn looks_like_html(text: &str) -> bool {
    PRE_OPEN_RX.is_match(text) || text.trim_start().starts_with("<!")
}

fn extract_pre(url: &str, text: &str) -> Result<String, AssemblerFailure> {
    let mut sections = Vec::new();
    let mut rest = text;
    while let Some(open) = PRE_OPEN_RX.find(rest) {
        let after = &rest[open.end()..];
        match PRE_CLOSE_RX.find(after) {
            Some(close) => {
                sections.push(&after[..close.start()]);
                rest = &after[close.end()..];
            }
            None => {
                sections.push(after);
                rest = "";
            }
        }
    }
    if sections.is_empty() {
        return Err(AssemblerFailure::BadSource {
            url: url.to_string(),
            msg: "HTML container has no <pre> section".to_string(),
        });
    }
    Ok(sections.join("\n"))
}

fn decode_entities(text: &str, warnings: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(found) = ENTITY_RX.find(rest) {
        out.push_str(&rest[..found.start()]);
        match found.as_str() {
            "&lt;" => out.push('<'),
            "&gt;" => out.push('>'),
            "&amp;" => out.push('&'),
            other => {
                warnings.push(format!("warning: unknown entity {other}"));
                out.push_str(other);
            }
        }
        rest = &rest[found.end()..];
    }
    out.push_str(rest);
    out
}

/// Make one source usable: unwrap HTML if present, decode entities,
/// normalise line separators.
pub(crate) fn prepare_source(
    url: &str,
    text: &str,
    warnings: &mut Vec<String>,
) -> Result<String, AssemblerFailure> {
    let body = if looks_like_html(text) {
        decode_entities(&extract_pre(url, text)?, warnings)
    } else {
        text.to_string()
    };
    Ok(normalise_newlines(&body))
}

/// Fetch, prepare and join every source in the list.
pub(crate) fn load_sources(
    list: &str,
    loader: &dyn SourceLoader,
    warnings: &mut Vec<String>,
) -> Result<String, AssemblerFailure> {
    let mut joined = String::new();
    for url in split_url_list(list) {
        let raw = loader.fetch(&url)?;
        let prepared = prepare_source(&url, &raw, warnings)?;
        if !joined.is_empty() && !joined.ends_with("\r\n") {
            joined.push_str("\r\n");
        }
        joined.push_str(&prepared);
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_newlines() {
        assert_eq!(normalise_newlines("a\nb\rc\r\nd"), "a\r\nb\r\nc\r\nd");
    }

    #[test]
    fn test_split_url_list() {
        assert_eq!(
            split_url_list("a.mac; b.mac;"),
            vec!["a.mac".to_string(), "b.mac".to_string()]
        );
    }

    #[test]
    fn test_prepare_plain_text() {
        let mut warnings = Vec::new();
        let got = prepare_source("x", "EXP 1\nEND", &mut warnings).expect("should prepare");
        assert_eq!(got, "EXP 1\r\nEND");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_prepare_html() {
        let mut warnings = Vec::new();
        let html = "<html><body><pre>IFE A,&lt;EXP 1&gt;\nEND</pre></body></html>";
        let got = prepare_source("x", html, &mut warnings).expect("should prepare");
        assert_eq!(got, "IFE A,<EXP 1>\r\nEND");
    }

    #[test]
    fn test_unknown_entity_warns() {
        let mut warnings = Vec::new();
        let html = "<pre>EXP 1 ;&copy;\nEND</pre>";
        let got = prepare_source("x", html, &mut warnings).expect("should prepare");
        assert!(got.contains("&copy;"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("&copy;"));
    }

    #[test]
    fn test_html_without_pre_is_rejected() {
        let mut warnings = Vec::new();
        assert!(prepare_source("x", "<!DOCTYPE html><p>hi</p>", &mut warnings).is_err());
    }
}
