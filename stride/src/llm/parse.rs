//! Lenient extraction of a JSON decision from raw model text.
//!
//! Models wrap their JSON in code fences, add `// comments`, and leave
//! trailing commas. The strict parse runs first; the fixes below are only
//! applied when it fails, and each scanner is string-aware so content
//! inside JSON strings is never touched.

use serde_json::Value;

/// Maximum length of the raw excerpt carried by parse failures.
pub const MAX_RAW_EXCERPT_CHARS: usize = 400;

/// Extract the most plausible JSON object slice from raw model text.
///
/// Strips a surrounding code fence when present, then takes the outermost
/// brace-balanced object. Returns `None` when no object opens at all.
#[must_use]
pub fn extract_json_candidate(text: &str) -> Option<&str> {
    outermost_object(strip_code_fence(text))
}

/// Parse text into a JSON value, tolerating line comments and trailing
/// commas when the strict parse fails.
#[must_use]
pub fn parse_lenient(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    let without_comments = strip_line_comments(text);
    if let Ok(value) = serde_json::from_str::<Value>(&without_comments) {
        return Some(value);
    }

    let without_commas = strip_trailing_commas(&without_comments);
    serde_json::from_str(&without_commas).ok()
}

/// A bounded, char-safe excerpt of raw model output for error reports.
#[must_use]
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_RAW_EXCERPT_CHARS {
        trimmed.to_owned()
    } else {
        let mut out: String = trimmed.chars().take(MAX_RAW_EXCERPT_CHARS).collect();
        out.push_str("...");
        out
    }
}

// Tracks whether the scanner currently sits inside a JSON string.
#[derive(Default, Clone, Copy)]
struct StringState {
    in_string: bool,
    escaped: bool,
}

impl StringState {
    // Feed one character; returns `true` when the character belongs to
    // string content (including the delimiting quotes).
    fn step(&mut self, ch: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            true
        } else if ch == '"' {
            self.in_string = true;
            true
        } else {
            false
        }
    }
}

/// Strip a surrounding Markdown code fence, tolerating a language tag on
/// the opening fence (```json).
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[open + 3..];
    // Skip the language tag up to the first newline.
    let body_start = after_fence.find('\n').map_or(0, |pos| pos + 1);
    let body = &after_fence[body_start..];
    match body.rfind("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Locate the outermost `{...}` object. An unterminated object yields the
/// slice to end-of-input; the lenient parser decides whether it is
/// salvageable.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut state = StringState::default();
    let mut depth = 0usize;

    for (offset, ch) in text[start..].char_indices() {
        if state.step(ch) {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Remove `// ...` line comments appearing outside of strings.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = StringState::default();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if state.step(ch) {
            out.push(ch);
            continue;
        }
        if ch == '/' && chars.peek() == Some(&'/') {
            // Drop everything to end of line, keeping the newline.
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Remove commas that directly precede `}` or `]` outside of strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = StringState::default();
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if state.step(ch) {
            out.push(ch);
            continue;
        }
        if ch == ',' {
            let next_significant = chars.clone().find(|c| !c.is_whitespace());
            if matches!(next_significant, Some('}' | ']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_passes_through() {
        let value = parse_lenient(r#"{"action":"finish"}"#).unwrap();
        assert_eq!(value, json!({"action": "finish"}));
    }

    #[test]
    fn extracts_from_json_fence() {
        let text = "Here you go:\n```json\n{\"action\": \"plan\"}\n```\nthanks";
        let candidate = extract_json_candidate(text).unwrap();
        assert_eq!(candidate, r#"{"action": "plan"}"#);
    }

    #[test]
    fn extracts_from_bare_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_candidate(text).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn extracts_outermost_object_from_prose() {
        let text = r#"Sure! {"action": "tool_call", "action_input": {"tool": "t"}} done."#;
        let candidate = extract_json_candidate(text).unwrap();
        assert_eq!(
            candidate,
            r#"{"action": "tool_call", "action_input": {"tool": "t"}}"#
        );
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let text = r#"{"thoughts": "use {curly} braces", "action": "plan"}"#;
        let candidate = extract_json_candidate(text).unwrap();
        assert_eq!(candidate, text);
        assert!(parse_lenient(candidate).is_some());
    }

    #[test]
    fn escaped_quotes_inside_strings_are_handled() {
        let text = r#"{"thoughts": "a \"quoted\" word", "action": "plan"}"#;
        let candidate = extract_json_candidate(text).unwrap();
        assert_eq!(candidate, text);
    }

    #[test]
    fn tolerates_trailing_commas() {
        let text = r#"{"action": "plan", "action_input": {"a": 1,},}"#;
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["action_input"]["a"], 1);
    }

    #[test]
    fn tolerates_line_comments() {
        let text = "{\n  \"action\": \"plan\", // the action\n  \"action_input\": \"p\"\n}";
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["action"], "plan");
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let text = r#"{"url": "https://example.com", "action": "plan"}"#;
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["url"], "https://example.com");
    }

    #[test]
    fn comments_and_trailing_commas_together() {
        let text = "{\n  \"a\": 1, // first\n  \"b\": [1, 2,], // second\n}";
        let value = parse_lenient(text).unwrap();
        assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn garbage_stays_unparseable() {
        assert!(parse_lenient("{definitely not json").is_none());
        assert!(extract_json_candidate("no object here").is_none());
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "x".repeat(1000);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), MAX_RAW_EXCERPT_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("short"), "short");
    }
}
