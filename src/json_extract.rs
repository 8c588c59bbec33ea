//! Best-effort JSON-object extraction from free-form LLM text.
//!
//! Used by the quality gate, title inference, and final decision
//! classification, all of which ask an LLM for a small JSON object embedded
//! in otherwise free-form prose. Tries, in order: a fenced ```json block, any
//! fenced code block, then a brace-depth-matched raw object in the text.

/// Find the first JSON object in `text`, trying progressively looser
/// extraction strategies. Returns `None` if nothing parses.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    if let Some(block) = fenced_block(text, Some("json")) {
        if let Ok(value) = serde_json::from_str(&block) {
            return Some(value);
        }
    }
    if let Some(block) = fenced_block(text, None) {
        if let Ok(value) = serde_json::from_str(&block) {
            return Some(value);
        }
    }
    if let Some(raw) = balanced_object(text) {
        if let Ok(value) = serde_json::from_str(&raw) {
            return Some(value);
        }
    }
    None
}

fn fenced_block(text: &str, lang: Option<&str>) -> Option<String> {
    let fence = "```";
    let start = text.find(fence)?;
    let after_fence = &text[start + fence.len()..];
    let after_lang = if let Some(lang) = lang {
        after_fence.strip_prefix(lang).unwrap_or(after_fence)
    } else {
        after_fence.trim_start_matches(|c: char| c.is_alphanumeric())
    };
    let body_start = after_lang.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_lang[body_start..];
    let end = body.find(fence)?;
    Some(body[..end].trim().to_string())
}

/// Scan for the first balanced `{...}` span, tracking brace depth and
/// skipping over braces that occur inside string literals.
fn balanced_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fenced_block() {
        let text = "Here is the verdict:\n```json\n{\"issues\": [], \"suggestion\": \"ok\"}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["suggestion"], "ok");
    }

    #[test]
    fn extracts_from_generic_fenced_block() {
        let text = "```\n{\"decision\": \"approved\", \"reason\": \"looks good\"}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["decision"], "approved");
    }

    #[test]
    fn extracts_balanced_object_from_raw_text() {
        let text = "I think the result is {\"decision\": \"on-hold\", \"reason\": \"missing data\"} based on review.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["decision"], "on-hold");
    }

    #[test]
    fn ignores_braces_inside_string_literals_when_matching_depth() {
        let text = "{\"reason\": \"contains a { brace } inside\", \"decision\": \"approved\"}";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["decision"], "approved");
    }

    #[test]
    fn returns_none_for_unparseable_text() {
        assert!(extract_json_object("no json here at all").is_none());
    }
}
