//! Best-effort recovery of a JSON document from free-form model output

use regex::Regex;
use std::sync::LazyLock;

/// Warning attached to an extraction that found no JSON
pub const INVALID_JSON_WARNING: &str = "Generated text is not valid JSON; please check the output";

/// A fenced block: three backticks with an optional language tag on the
/// opening line, up to the next three backticks.
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+.-]*[ \t]*\r?\n(.*?)```").unwrap());

/// Which strategy produced the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// The whole text was already JSON
    Direct,
    /// Content of a fenced code block
    Fenced,
    /// Outermost `{...}` or `[...]` span
    Bracketed,
    /// Nothing parsed; the original text is returned
    Raw,
}

/// Result of [`extract_structured_payload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub payload: String,
    pub source: PayloadSource,
}

impl Extraction {
    /// Whether the payload is a JSON document
    pub fn is_json(&self) -> bool {
        self.source != PayloadSource::Raw
    }

    /// Non-fatal warning for the user, set when no strategy succeeded
    pub fn warning(&self) -> Option<&'static str> {
        (!self.is_json()).then_some(INVALID_JSON_WARNING)
    }
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Recover a JSON document from generated text; first success wins.
///
/// 1. The whole text parses: returned unchanged.
/// 2. A fenced code block parses: its trimmed content.
/// 3. The leftmost `{` through the rightmost `}` (or else `[` through `]`)
///    parses: that trimmed span.
/// 4. Otherwise the original text, flagged with a warning.
pub fn extract_structured_payload(text: &str) -> Extraction {
    if parses(text) {
        return Extraction {
            payload: text.to_string(),
            source: PayloadSource::Direct,
        };
    }

    for captures in FENCED_BLOCK.captures_iter(text) {
        let inner = captures.get(1).map_or("", |m| m.as_str()).trim();
        if parses(inner) {
            return Extraction {
                payload: inner.to_string(),
                source: PayloadSource::Fenced,
            };
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                let span = text[start..=end].trim();
                if parses(span) {
                    return Extraction {
                        payload: span.to_string(),
                        source: PayloadSource::Bracketed,
                    };
                }
            }
        }
    }

    tracing::warn!("{}", INVALID_JSON_WARNING);
    Extraction {
        payload: text.to_string(),
        source: PayloadSource::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json_unchanged() {
        let e = extract_structured_payload(r#"{"a":1}"#);
        assert_eq!(e.payload, r#"{"a":1}"#);
        assert_eq!(e.source, PayloadSource::Direct);
        assert!(e.warning().is_none());
    }

    #[test]
    fn test_direct_json_keeps_surrounding_whitespace() {
        let e = extract_structured_payload("  [1, 2]\n");
        assert_eq!(e.payload, "  [1, 2]\n");
        assert_eq!(e.source, PayloadSource::Direct);
    }

    #[test]
    fn test_fenced_block_trimmed() {
        let e = extract_structured_payload("```json\n{\"a\":1}\n```");
        assert_eq!(e.payload, r#"{"a":1}"#);
        assert_eq!(e.source, PayloadSource::Fenced);
    }

    #[test]
    fn test_fenced_block_without_language_in_prose() {
        let text = "Here is the quiz:\n```\n[{\"q\": \"2+2?\", \"a\": 4}]\n```\nLet me know!";
        let e = extract_structured_payload(text);
        assert_eq!(e.payload, r#"[{"q": "2+2?", "a": 4}]"#);
        assert_eq!(e.source, PayloadSource::Fenced);
    }

    #[test]
    fn test_first_parsing_fence_wins() {
        let text = "```text\nnot json\n```\nand\n```json\n{\"ok\": true}\n```";
        let e = extract_structured_payload(text);
        assert_eq!(e.payload, r#"{"ok": true}"#);
    }

    #[test]
    fn test_bracketed_object_in_prose() {
        let e = extract_structured_payload(r#"here is it: {"a":1} thanks"#);
        assert_eq!(e.payload, r#"{"a":1}"#);
        assert_eq!(e.source, PayloadSource::Bracketed);
    }

    #[test]
    fn test_bracketed_spans_leftmost_to_rightmost() {
        let text = r#"Result: {"outer": {"inner": [1, 2]}} done."#;
        let e = extract_structured_payload(text);
        assert_eq!(e.payload, r#"{"outer": {"inner": [1, 2]}}"#);
    }

    #[test]
    fn test_bracketed_array_when_object_span_fails() {
        let text = "Use {name} in [1, 2, 3]";
        let e = extract_structured_payload(text);
        assert_eq!(e.payload, "[1, 2, 3]");
        assert_eq!(e.source, PayloadSource::Bracketed);
    }

    #[test]
    fn test_unbalanced_fence_falls_back_to_brackets() {
        let text = "```json\n{\"a\": 1}";
        let e = extract_structured_payload(text);
        assert_eq!(e.payload, r#"{"a": 1}"#);
        assert_eq!(e.source, PayloadSource::Bracketed);
    }

    #[test]
    fn test_not_json_returned_with_warning() {
        let e = extract_structured_payload("not json at all");
        assert_eq!(e.payload, "not json at all");
        assert_eq!(e.source, PayloadSource::Raw);
        assert!(!e.is_json());
        assert_eq!(e.warning(), Some(INVALID_JSON_WARNING));
    }

    #[test]
    fn test_two_objects_is_not_json() {
        let text = r#"{"a":1} and {"b":2}"#;
        let e = extract_structured_payload(text);
        assert_eq!(e.source, PayloadSource::Raw);
        assert_eq!(e.payload, text);
    }

    #[test]
    fn test_empty_text() {
        let e = extract_structured_payload("");
        assert_eq!(e.payload, "");
        assert!(e.warning().is_some());
    }
}
