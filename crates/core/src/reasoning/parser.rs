//! Tagged wire-format parser for completion text (§4.6 step 3).
//!
//! The format is deliberately model-agnostic — a small set of XML-ish tags
//! rather than any one provider's native function-calling schema, following
//! the same "parse text, don't trust structured tool-call APIs" approach the
//! agent-runtime crate's reasoning parser uses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchToolCall {
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCallRequest {
    pub tools: Vec<BatchToolCall>,
    #[serde(default)]
    pub execution_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ParsedAction {
    ToolCall(ToolCallRequest),
    BatchCall(BatchCallRequest),
    Complete(serde_json::Value),
    HumanNeeded { question: String, options: Option<Vec<String>> },
    Failed { reason: String },
    None,
}

/// The result of parsing one completion's text. `thinking` is always
/// non-empty (§8 property 8) even when no tags were found at all.
#[derive(Debug, Clone)]
pub struct ParsedStep {
    pub thinking: String,
    pub action: ParsedAction,
}

const SYSTEM_NOTE_NO_TAGS: &str =
    "SYSTEM NOTE: the completion contained no recognizable <thinking>/<tool_call>/<complete> tags; \
     treating the full response as reasoning so the model can self-correct on the next iteration.";

/// Parses a completion's raw text into a [`ParsedStep`]. Never panics or
/// returns an error — per §8 property 8, the parser always yields a step
/// with non-empty `thinking`.
pub fn parse(text: &str) -> ParsedStep {
    let text = strip_code_fences(text);

    let thinking = extract_tag(&text, "thinking").filter(|s| !s.is_empty());

    if let Some(body) = extract_tag(&text, "complete") {
        let payload = serde_json::from_str(&body).unwrap_or_else(|_| serde_json::json!({ "raw": body }));
        return ParsedStep {
            thinking: non_empty_thinking(thinking, &text),
            action: ParsedAction::Complete(payload),
        };
    }

    if let Some(body) = extract_tag(&text, "failed") {
        let reason = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("reason").and_then(|r| r.as_str()).map(str::to_string))
            .unwrap_or(body);
        return ParsedStep {
            thinking: non_empty_thinking(thinking, &text),
            action: ParsedAction::Failed { reason },
        };
    }

    if let Some(body) = extract_tag(&text, "human_needed") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            let question = value
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or(&body)
                .to_string();
            let options = value.get("options").and_then(|o| o.as_array()).map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });
            return ParsedStep {
                thinking: non_empty_thinking(thinking, &text),
                action: ParsedAction::HumanNeeded { question, options },
            };
        }
        return ParsedStep {
            thinking: non_empty_thinking(thinking, &text),
            action: ParsedAction::HumanNeeded {
                question: body,
                options: None,
            },
        };
    }

    if let Some(body) = extract_tag(&text, "batch_call") {
        if let Ok(request) = serde_json::from_str::<BatchCallRequest>(&body) {
            return ParsedStep {
                thinking: non_empty_thinking(thinking, &text),
                action: ParsedAction::BatchCall(request),
            };
        }
    }

    if let Some(body) = extract_tag(&text, "tool_call") {
        if let Ok(request) = serde_json::from_str::<ToolCallRequest>(&body) {
            return ParsedStep {
                thinking: non_empty_thinking(thinking, &text),
                action: ParsedAction::ToolCall(request),
            };
        }
    }

    // Last-resort extraction: the first balanced JSON object with
    // {name,input}, per §4.6 step 3.
    if let Some(obj) = first_balanced_json_object(&text) {
        if let Ok(request) = serde_json::from_str::<ToolCallRequest>(&obj) {
            return ParsedStep {
                thinking: non_empty_thinking(thinking, &text),
                action: ParsedAction::ToolCall(request),
            };
        }
    }

    if thinking.is_some() {
        return ParsedStep {
            thinking: thinking.unwrap(),
            action: ParsedAction::None,
        };
    }

    ParsedStep {
        thinking: format!("{SYSTEM_NOTE_NO_TAGS}\n\n{text}"),
        action: ParsedAction::None,
    }
}

fn non_empty_thinking(thinking: Option<String>, full_text: &str) -> String {
    thinking.unwrap_or_else(|| format!("{SYSTEM_NOTE_NO_TAGS}\n\n{full_text}"))
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}

/// Scans for the first `{`…`}` span whose braces are balanced, ignoring
/// braces inside string literals.
fn first_balanced_json_object(text: &str) -> Option<String> {
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
    fn parses_thinking_and_tool_call() {
        let text = r#"<thinking>checking the file</thinking><tool_call>{"name":"fetch_github_file","input":{"owner":"a","repo":"b","path":"c"}}</tool_call>"#;
        let step = parse(text);
        assert_eq!(step.thinking, "checking the file");
        match step.action {
            ParsedAction::ToolCall(req) => assert_eq!(req.name, "fetch_github_file"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn parses_complete() {
        let text = r#"<thinking>done</thinking><complete>{"summary":"ok"}</complete>"#;
        let step = parse(text);
        match step.action {
            ParsedAction::Complete(payload) => assert_eq!(payload["summary"], "ok"),
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn untagged_reply_yields_system_note_and_none_action() {
        // S5: LLM reply "Sure thing." with no tags at all.
        let step = parse("Sure thing.");
        assert!(step.thinking.contains("SYSTEM NOTE"));
        assert!(matches!(step.action, ParsedAction::None));
    }

    #[test]
    fn last_resort_json_object_treated_as_tool_call() {
        let text = r#"I'll call it now: {"name":"query_db","input":{"table":"audits"}} done."#;
        let step = parse(text);
        match step.action {
            ParsedAction::ToolCall(req) => assert_eq!(req.name, "query_db"),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn strips_code_fences() {
        let text = "```json\n<thinking>x</thinking><failed>{\"reason\":\"bad input\"}</failed>\n```";
        let step = parse(text);
        match step.action {
            ParsedAction::Failed { reason } => assert_eq!(reason, "bad input"),
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[test]
    fn parser_never_panics_on_garbage() {
        for input in ["", "{", "}}}}", "<thinking>", "<tool_call>not json</tool_call>"] {
            let step = parse(input);
            assert!(!step.thinking.is_empty());
        }
    }
}
