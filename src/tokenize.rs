//! Term extraction shared by indexing and querying.
//!
//! Text is split on non-alphanumeric characters and lowercased. Words written
//! in camelCase or PascalCase also emit their parts, so `CircuitBreaker`
//! yields `circuitbreaker`, `circuit` and `breaker`. Terms shorter than
//! [`MIN_TERM_CHARS`] are dropped.

pub const MIN_TERM_CHARS: usize = 2;

/// A term and the byte offset where it starts in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub start: usize,
}

pub fn tokenize(text: &str) -> Vec<String> {
    token_spans(text).into_iter().map(|t| t.term).collect()
}

/// Query terms: tokenized, de-duplicated, first occurrence order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

pub fn token_spans(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if word_start.is_none() {
                word_start = Some(idx);
            }
        } else if let Some(start) = word_start.take() {
            push_word(&text[start..idx], start, &mut tokens);
        }
    }
    if let Some(start) = word_start {
        push_word(&text[start..], start, &mut tokens);
    }

    tokens
}

fn push_word(word: &str, start: usize, out: &mut Vec<Token>) {
    if word.chars().count() >= MIN_TERM_CHARS {
        out.push(Token {
            term: word.to_lowercase(),
            start,
        });
    }

    let parts = camel_parts(word);
    if parts.len() > 1 {
        for (offset, part) in parts {
            if part.chars().count() >= MIN_TERM_CHARS {
                out.push(Token {
                    term: part.to_lowercase(),
                    start: start + offset,
                });
            }
        }
    }
}

/// Split `HTTPServerError` into `HTTP`, `Server`, `Error` (with byte offsets).
fn camel_parts(word: &str) -> Vec<(usize, &str)> {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    let mut parts = Vec::new();
    let mut part_start = 0;

    for i in 1..chars.len() {
        let (idx, ch) = chars[i];
        let prev = chars[i - 1].1;
        let next_is_lower = chars.get(i + 1).map(|(_, c)| c.is_lowercase()).unwrap_or(false);

        let boundary = (ch.is_uppercase() && prev.is_lowercase())
            || (ch.is_uppercase() && prev.is_uppercase() && next_is_lower)
            || (ch.is_alphabetic() && prev.is_numeric())
            || (ch.is_numeric() && prev.is_alphabetic());

        if boundary {
            parts.push((part_start, &word[part_start..idx]));
            part_start = idx;
        }
    }
    parts.push((part_start, &word[part_start..]));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("Retry Policy: back-off, x"),
            vec!["retry", "policy", "back", "off"]
        );
    }

    #[test]
    fn camel_case_emits_whole_word_and_parts() {
        assert_eq!(
            tokenize("CircuitBreaker"),
            vec!["circuitbreaker", "circuit", "breaker"]
        );
        assert_eq!(
            tokenize("HTTPServerError"),
            vec!["httpservererror", "http", "server", "error"]
        );
    }

    #[test]
    fn snake_case_splits_naturally() {
        assert_eq!(tokenize("circuit_breaker"), vec!["circuit", "breaker"]);
    }

    #[test]
    fn spans_point_at_term_start() {
        let text = "see RetryPolicy";
        let spans = token_spans(text);
        let policy = spans.iter().find(|t| t.term == "policy").unwrap();
        assert_eq!(&text[policy.start..policy.start + 6], "Policy");
    }

    #[test]
    fn query_terms_are_unique() {
        assert_eq!(query_terms("retry RETRY retry"), vec!["retry"]);
    }

    #[test]
    fn handles_non_ascii() {
        assert_eq!(tokenize("café größe"), vec!["café", "größe"]);
    }
}
