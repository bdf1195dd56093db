//! Recovery of structured data from free-form model text.

use crate::traits::ToolCall;
use serde_json::Value;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// Splits a reply into its prose and any `<tool_call>{..}</tool_call>`
/// blocks. Unterminated blocks, and blocks holding no valid call, are left
/// in the prose.
pub fn parse_tool_calls(response: &str) -> (String, Vec<ToolCall>) {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut prose = String::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN) {
        let after_open = &remaining[start + TOOL_CALL_OPEN.len()..];
        let Some(close_idx) = after_open.find(TOOL_CALL_CLOSE) else {
            break;
        };
        let block_end = start + TOOL_CALL_OPEN.len() + close_idx + TOOL_CALL_CLOSE.len();

        let block_calls: Vec<ToolCall> = extract_json_values(&after_open[..close_idx])
            .iter()
            .filter_map(tool_call_from_value)
            .collect();

        if block_calls.is_empty() {
            prose.push_str(&remaining[..block_end]);
        } else {
            prose.push_str(&remaining[..start]);
            push_trimmed(&mut text_parts, &prose);
            prose.clear();
            calls.extend(block_calls);
        }
        remaining = &remaining[block_end..];
    }

    prose.push_str(remaining);
    push_trimmed(&mut text_parts, &prose);

    (text_parts.join("\n"), calls)
}

fn push_trimmed(parts: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        parts.push(text.to_string());
    }
}

fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments") {
        // Some models double-encode the arguments object.
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::String(raw.clone())),
        Some(args) => args.clone(),
        None => Value::Object(Default::default()),
    };

    Some(ToolCall {
        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        name,
        arguments,
    })
}

/// Every top-level `{..}` span in `text` that parses as JSON, in order.
pub fn extract_json_values(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
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
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                    && let Ok(value) = serde_json::from_str::<Value>(&text[s..=i])
                {
                    values.push(value);
                }
            }
            _ => {}
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_has_no_calls() {
        let (text, calls) = parse_tool_calls("The answer is 42.");
        assert_eq!(text, "The answer is 42.");
        assert!(calls.is_empty());
    }

    #[test]
    fn extracts_calls_and_keeps_prose() {
        let reply = "Let me check.\n<tool_call>\n\
                     {\"name\": \"shell\", \"arguments\": {\"command\": \"date\"}}\n\
                     </tool_call>\nDone soon.";
        let (text, calls) = parse_tool_calls(reply);

        assert_eq!(text, "Let me check.\nDone soon.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "shell");
        assert_eq!(calls[0].arguments, json!({"command": "date"}));
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn string_arguments_are_decoded() {
        let reply = r#"<tool_call>{"name":"echo","arguments":"{\"x\":1}"}</tool_call>"#;
        let (_, calls) = parse_tool_calls(reply);
        assert_eq!(calls[0].arguments, json!({"x": 1}));
    }

    #[test]
    fn unterminated_block_stays_text() {
        let (text, calls) = parse_tool_calls("<tool_call>{\"name\":\"echo\"}");
        assert!(calls.is_empty());
        assert!(text.contains("<tool_call>"));
    }

    #[test]
    fn blocks_without_a_valid_call_stay_in_the_prose() {
        let reply = "Before <tool_call>not json at all</tool_call> after \
                     <tool_call>{\"name\":\"echo\"}</tool_call> end";
        let (text, calls) = parse_tool_calls(reply);

        assert_eq!(calls.len(), 1);
        assert_eq!(text, "Before <tool_call>not json at all</tool_call> after\nend");
    }

    #[test]
    fn json_values_respect_strings_and_escapes() {
        let text = r#"noise } {"a": "}{", "b": "quote \" and slash \\"} tail {"c": 2}"#;
        let values = extract_json_values(text);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["a"], "}{");
        assert_eq!(values[1], json!({"c": 2}));
    }
}
