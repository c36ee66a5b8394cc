//! JSON payload extraction from model output
//!
//! Models wrap JSON in markdown fences, add prose around it, and sometimes
//! emit bytes that are not clean UTF-8. Candidates are tried in order:
//! fenced code blocks, then the whole text (including a leading object
//! followed by prose), then the same candidates with control characters
//! stripped.

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
    })
}

/// Extract the first plausible JSON object from model output
pub fn extract_json(raw: &str) -> Result<Value> {
    let text = strip_invalid(raw);
    let candidates = candidates(&text);

    for candidate in &candidates {
        if let Some(value) = parse_candidate(candidate) {
            return Ok(value);
        }
    }

    for candidate in &candidates {
        if let Some(value) = parse_candidate(&strip_control(candidate)) {
            tracing::debug!("JSON recovered after stripping control characters");
            return Ok(value);
        }
    }

    Err(AppError::ParseError {
        message: format!(
            "no JSON object found in {} characters of model output",
            raw.chars().count()
        ),
    })
}

/// Decode bytes lossily and drop anything that did not survive decoding
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    strip_invalid(&String::from_utf8_lossy(bytes))
}

/// Remove replacement characters and byte-order marks
pub fn strip_invalid(text: &str) -> String {
    text.chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER && *c != '\u{FEFF}')
        .collect()
}

/// Remove every control character, including line breaks
pub fn strip_control(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

fn candidates(text: &str) -> Vec<String> {
    let mut found: Vec<String> = fence_regex()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    found.push(text.to_string());
    found
}

fn parse_candidate(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    leading_object(trimmed)
}

/// First complete object starting at the first `{`, ignoring what follows
fn leading_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value @ Value::Object(_))) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_json() {
        assert_eq!(extract_json("{\"a\":1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_json_fence() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_generic_fence_after_prose() {
        assert_eq!(
            extract_json("prefix text\n```\n{\"a\":1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_embedded_vertical_tab() {
        let text = "{\"a\":\u{0B}1}";
        assert!(serde_json::from_str::<Value>(text).is_err());
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_trailing_prose() {
        let text = "{\"summary\": \"ok\", \"items\": [1, 2]}\n\nLet me know if you need more.";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"summary": "ok", "items": [1, 2]})
        );
    }

    #[test]
    fn test_invalid_utf8_is_ignored() {
        let mut bytes = b"{\"a\":".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.extend_from_slice(b"1}");
        let text = sanitize_bytes(&bytes);
        assert_eq!(extract_json(&text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_raw_newline_inside_string_value() {
        let text = "```json\n{\"summary\": \"line one\nline two\"}\n```";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"summary": "line oneline two"})
        );
    }

    #[test]
    fn test_no_object_is_parse_error() {
        assert!(matches!(
            extract_json("I cannot help with that."),
            Err(AppError::ParseError { .. })
        ));
        assert!(matches!(
            extract_json("[1, 2, 3]"),
            Err(AppError::ParseError { .. })
        ));
    }
}
