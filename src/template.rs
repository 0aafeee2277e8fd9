//! `{name}` placeholder templates.
//!
//! A placeholder is `{` + identifier + `}`, where an identifier starts with a
//! letter or `_` and continues with letters, digits or `_`. `{{` and `}}`
//! render as literal braces. Any other brace is literal text, so templates
//! may quote JSON or code without escaping.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn is_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn pieces(text: &str) -> Vec<Piece<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let escaped = (b == b'{' || b == b'}') && bytes.get(i + 1) == Some(&b);

        if escaped {
            out.push(Piece::Text(&text[literal_start..i]));
            out.push(Piece::Brace(b as char));
            i += 2;
            literal_start = i;
            continue;
        }

        if b == b'{' {
            if let Some(len) = text[i + 1..].find('}') {
                let name = &text[i + 1..i + 1 + len];
                if is_ident(name) {
                    out.push(Piece::Text(&text[literal_start..i]));
                    out.push(Piece::Placeholder(name));
                    i += len + 2;
                    literal_start = i;
                    continue;
                }
            }
        }
        i += 1;
    }
    out.push(Piece::Text(&text[literal_start..]));
    out.retain(|p| !matches!(p, Piece::Text("")));
    out
}

/// Placeholder names referenced by `text`, unique, in first-use order.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for piece in pieces(text) {
        if let Piece::Placeholder(name) = piece {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Referenced placeholders missing from `declared`.
pub fn undeclared(text: &str, declared: &[String]) -> Vec<String> {
    placeholders(text)
        .into_iter()
        .filter(|name| !declared.contains(name))
        .collect()
}

/// Substitute every placeholder. Fails, naming all of them, if any is unbound.
pub fn render(text: &str, values: &HashMap<String, String>) -> Result<String> {
    let parts = pieces(text);

    let mut missing: Vec<&str> = Vec::new();
    for piece in &parts {
        if let Piece::Placeholder(name) = piece {
            if !values.contains_key(*name) && !missing.contains(name) {
                missing.push(name);
            }
        }
    }
    if !missing.is_empty() {
        return Err(Error::validation(format!(
            "unresolved placeholders: {}",
            missing.join(", ")
        )));
    }

    let mut out = String::with_capacity(text.len());
    for piece in parts {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Brace(c) => out.push(c),
            Piece::Placeholder(name) => {
                if let Some(value) = values.get(name) {
                    out.push_str(value);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn finds_placeholders_in_order_once() {
        assert_eq!(
            placeholders("Review {code_content} against {architecture_info} and {code_content}"),
            vec!["code_content", "architecture_info"]
        );
    }

    #[test]
    fn escapes_and_stray_braces_are_literal() {
        assert!(placeholders("{{not_a_var}} and {\"json\": 1} and {1abc}").is_empty());
        let out = render("{{x}} {\"k\": {v}} }", &values(&[("v", "1")])).unwrap();
        assert_eq!(out, "{x} {\"k\": 1} }");
    }

    #[test]
    fn render_substitutes_values() {
        let out = render("Hello {name}!", &values(&[("name", "world")])).unwrap();
        assert_eq!(out, "Hello world!");
    }

    #[test]
    fn render_names_every_missing_placeholder() {
        let err = render("{a} {b} {c}", &values(&[("b", "x")])).unwrap_err();
        match err {
            Error::Validation(msg) => assert!(msg.ends_with("placeholders: a, c"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn undeclared_lists_missing_names() {
        let declared = vec!["a".to_string()];
        assert_eq!(undeclared("{a} {b}", &declared), vec!["b"]);
    }
}
