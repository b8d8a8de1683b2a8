use serde_json::{Map, Value};

use super::AiError;

/// Parses a JSON object out of free-form model output.
///
/// The whole text is tried first. Failing that, the first balanced
/// brace-delimited region is tried; braces inside JSON strings do not count.
/// Anything else is a parse error.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, AiError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(map);
    }

    let region = first_balanced_object(text)
        .ok_or_else(|| AiError::Parse("no brace-delimited object found".to_string()))?;
    match serde_json::from_str::<Value>(region) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AiError::Parse("extracted region is not an object".to_string())),
        Err(e) => Err(AiError::Parse(e.to_string())),
    }
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
