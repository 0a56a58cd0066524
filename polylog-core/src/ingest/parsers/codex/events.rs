//! Raw Codex records, normalized into one event stream.
//!
//! Codex has written two envelopes over time:
//!
//! - **exec stream**: `{type: "turn.started" | "item.completed" | ...}` with
//!   the payload inline (`item`, `usage`, `error`)
//! - **rollout**: `{timestamp, type, payload}` where `type` is one of
//!   `session_meta`, `turn_context`, `event_msg` or `response_item`
//!
//! Both map onto [`CodexEvent`] so the turn builder has one state machine.
//! Legacy files may also open with a bare header object carrying `id`.

use crate::types::{input_map, Usage};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Session header fields, from whichever envelope provided them.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct SessionMeta {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub model: Option<String>,
    #[serde(alias = "model_provider")]
    pub provider: Option<String>,
    pub git: Option<GitInfo>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct GitInfo {
    pub branch: Option<String>,
}

/// A finished item that becomes one content block.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CodexItem {
    AgentMessage(String),
    Reasoning(String),
    /// A tool call whose result arrived in the same record
    Tool {
        id: Option<String>,
        name: String,
        input: Map<String, Value>,
        result: String,
        is_error: bool,
    },
    /// A call whose output arrives later under the same `call_id`
    FunctionCall {
        call_id: String,
        name: String,
        input: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CodexEvent {
    Meta(SessionMeta),
    /// Model in effect for the following turns
    TurnContext { model: Option<String>, cwd: Option<String> },
    TurnStarted,
    TurnCompleted { usage: Option<Usage> },
    /// `turn.failed`, `error` or an `event_msg` error
    Failure(String),
    UserMessage(String),
    Item(CodexItem),
    ToolOutput {
        call_id: String,
        output: String,
        is_error: bool,
    },
    TokenCount {
        total: Option<Usage>,
        last: Option<Usage>,
    },
    /// Recognized but carries nothing for the transcript
    Ignored,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    cached_input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl From<RawUsage> for Usage {
    fn from(raw: RawUsage) -> Self {
        Usage {
            input_tokens: raw.input_tokens.unwrap_or(0),
            output_tokens: raw.output_tokens.unwrap_or(0),
            cache_read_tokens: raw.cached_input_tokens,
            cache_creation_tokens: None,
        }
    }
}

/// Classify one parsed line. `Err` carries a structural error message.
pub(crate) fn parse_event(value: &Value, line_number: usize) -> Result<CodexEvent, String> {
    let Value::Object(obj) = value else {
        return Err("record is not a JSON object".to_string());
    };

    match obj.get("type") {
        Some(Value::String(kind)) => match obj.get("payload") {
            Some(payload) => parse_rollout(kind, payload),
            None => parse_exec(kind, obj),
        },
        Some(_) => Err("record `type` is not a string".to_string()),
        // Legacy header: a bare object on the first line
        None if line_number == 1 && obj.contains_key("id") => from_json::<SessionMeta>(value)
            .map(CodexEvent::Meta),
        None => Err("record has no `type`".to_string()),
    }
}

fn from_json<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T, String> {
    T::deserialize(value).map_err(|e| e.to_string())
}

fn str_field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

// ============================================
// exec stream envelope
// ============================================

fn parse_exec(kind: &str, obj: &Map<String, Value>) -> Result<CodexEvent, String> {
    match kind {
        "thread.started" => Ok(CodexEvent::Meta(SessionMeta {
            id: obj.get("thread_id").and_then(Value::as_str).map(str::to_string),
            ..Default::default()
        })),
        "turn.started" => Ok(CodexEvent::TurnStarted),
        "turn.completed" => {
            let usage = match obj.get("usage") {
                Some(u) => Some(Usage::from(from_json::<RawUsage>(u)?)),
                None => None,
            };
            Ok(CodexEvent::TurnCompleted { usage })
        }
        "turn.failed" => {
            let message = obj
                .get("error")
                .and_then(|e| str_field(e, "message"))
                .unwrap_or("turn failed");
            Ok(CodexEvent::Failure(message.to_string()))
        }
        "error" => {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("error");
            Ok(CodexEvent::Failure(message.to_string()))
        }
        "item.completed" => match obj.get("item") {
            Some(item @ Value::Object(_)) => parse_exec_item(item),
            _ => Err("item.completed without an item object".to_string()),
        },
        // item.started / item.updated repeat what item.completed carries
        _ => Ok(CodexEvent::Ignored),
    }
}

fn parse_exec_item(item: &Value) -> Result<CodexEvent, String> {
    let id = str_field(item, "id").map(str::to_string);
    let kind = str_field(item, "type").ok_or("item has no `type`")?;

    let event = match kind {
        "agent_message" => CodexEvent::Item(CodexItem::AgentMessage(
            str_field(item, "text").unwrap_or_default().to_string(),
        )),
        "reasoning" => CodexEvent::Item(CodexItem::Reasoning(
            str_field(item, "text").unwrap_or_default().to_string(),
        )),
        "command_execution" => {
            let command = item.get("command").cloned().unwrap_or(Value::Null);
            let exit_code = item.get("exit_code").and_then(Value::as_i64);
            let mut input = Map::new();
            input.insert("command".to_string(), command);
            CodexEvent::Item(CodexItem::Tool {
                id,
                name: "command_execution".to_string(),
                input,
                result: str_field(item, "aggregated_output")
                    .unwrap_or_default()
                    .to_string(),
                is_error: exit_code.is_some_and(|code| code != 0),
            })
        }
        "file_change" => {
            let mut input = Map::new();
            input.insert(
                "changes".to_string(),
                item.get("changes").cloned().unwrap_or(Value::Null),
            );
            CodexEvent::Item(CodexItem::Tool {
                id,
                name: "file_change".to_string(),
                input,
                result: str_field(item, "status").unwrap_or_default().to_string(),
                is_error: false,
            })
        }
        "mcp_tool_call" => {
            let name = str_field(item, "tool").unwrap_or("mcp_tool_call").to_string();
            let error = item.get("error").filter(|e| !e.is_null());
            let result = match (item.get("result"), error) {
                (_, Some(err)) => value_text(err.get("message").unwrap_or(err)),
                (Some(result), None) => value_text(result),
                (None, None) => String::new(),
            };
            CodexEvent::Item(CodexItem::Tool {
                id,
                name,
                input: input_map(item.get("arguments").cloned().unwrap_or(Value::Null)),
                result,
                is_error: error.is_some() || str_field(item, "status") == Some("failed"),
            })
        }
        "web_search" => {
            let mut input = Map::new();
            input.insert(
                "query".to_string(),
                item.get("query").cloned().unwrap_or(Value::Null),
            );
            CodexEvent::Item(CodexItem::Tool {
                id,
                name: "web_search".to_string(),
                input,
                result: String::new(),
                is_error: false,
            })
        }
        "error" => CodexEvent::Failure(str_field(item, "message").unwrap_or("error").to_string()),
        _ => CodexEvent::Ignored,
    };
    Ok(event)
}

// ============================================
// rollout envelope
// ============================================

fn parse_rollout(kind: &str, payload: &Value) -> Result<CodexEvent, String> {
    match kind {
        "session_meta" => from_json::<SessionMeta>(payload).map(CodexEvent::Meta),
        "turn_context" => Ok(CodexEvent::TurnContext {
            model: str_field(payload, "model").map(str::to_string),
            cwd: str_field(payload, "cwd").map(str::to_string),
        }),
        "event_msg" => parse_event_msg(payload),
        "response_item" => parse_response_item(payload),
        _ => Ok(CodexEvent::Ignored),
    }
}

fn parse_event_msg(payload: &Value) -> Result<CodexEvent, String> {
    let kind = str_field(payload, "type").ok_or("event_msg has no `type`")?;
    let event = match kind {
        "task_started" => CodexEvent::TurnStarted,
        "task_complete" => CodexEvent::TurnCompleted { usage: None },
        "user_message" => CodexEvent::UserMessage(
            str_field(payload, "message").unwrap_or_default().to_string(),
        ),
        "token_count" => {
            let info = payload.get("info").filter(|i| !i.is_null());
            let usage_at = |key: &str| -> Result<Option<Usage>, String> {
                match info.and_then(|i| i.get(key)).filter(|u| !u.is_null()) {
                    Some(u) => Ok(Some(from_json::<RawUsage>(u)?.into())),
                    None => Ok(None),
                }
            };
            CodexEvent::TokenCount {
                total: usage_at("total_token_usage")?,
                last: usage_at("last_token_usage")?,
            }
        }
        "error" | "stream_error" => CodexEvent::Failure(
            str_field(payload, "message").unwrap_or("error").to_string(),
        ),
        // agent_message / agent_reasoning duplicate the response items
        _ => CodexEvent::Ignored,
    };
    Ok(event)
}

fn parse_response_item(payload: &Value) -> Result<CodexEvent, String> {
    let kind = str_field(payload, "type").ok_or("response_item has no `type`")?;
    let event = match kind {
        "message" => {
            // User input is taken from event_msg.user_message instead
            if str_field(payload, "role") != Some("assistant") {
                return Ok(CodexEvent::Ignored);
            }
            CodexEvent::Item(CodexItem::AgentMessage(message_text(payload)))
        }
        "reasoning" => {
            let summary = payload
                .get("summary")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| str_field(p, "text"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            CodexEvent::Item(CodexItem::Reasoning(summary))
        }
        "function_call" => {
            let call_id = str_field(payload, "call_id").ok_or("function_call has no call_id")?;
            let input = match payload.get("arguments") {
                // Arguments are a JSON document encoded as a string
                Some(Value::String(args)) => input_map(
                    serde_json::from_str(args).unwrap_or_else(|_| Value::String(args.clone())),
                ),
                Some(other) => input_map(other.clone()),
                None => Map::new(),
            };
            CodexEvent::Item(CodexItem::FunctionCall {
                call_id: call_id.to_string(),
                name: str_field(payload, "name").unwrap_or("function_call").to_string(),
                input,
            })
        }
        "custom_tool_call" => {
            let call_id =
                str_field(payload, "call_id").ok_or("custom_tool_call has no call_id")?;
            CodexEvent::Item(CodexItem::FunctionCall {
                call_id: call_id.to_string(),
                name: str_field(payload, "name").unwrap_or("custom_tool_call").to_string(),
                input: input_map(payload.get("input").cloned().unwrap_or(Value::Null)),
            })
        }
        "function_call_output" | "custom_tool_call_output" => {
            let call_id = str_field(payload, "call_id").ok_or("tool output has no call_id")?;
            let (output, is_error) = tool_output(payload.get("output").unwrap_or(&Value::Null));
            CodexEvent::ToolOutput {
                call_id: call_id.to_string(),
                output,
                is_error,
            }
        }
        "web_search_call" => {
            let query = payload
                .get("action")
                .and_then(|a| a.get("query"))
                .cloned()
                .unwrap_or(Value::Null);
            let mut input = Map::new();
            input.insert("query".to_string(), query);
            CodexEvent::Item(CodexItem::Tool {
                id: str_field(payload, "id").map(str::to_string),
                name: "web_search".to_string(),
                input,
                result: String::new(),
                is_error: str_field(payload, "status") == Some("failed"),
            })
        }
        _ => CodexEvent::Ignored,
    };
    Ok(event)
}

/// Concatenated `output_text`/`text` parts of a message item.
fn message_text(payload: &Value) -> String {
    match payload.get("content") {
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| {
                matches!(
                    str_field(p, "type"),
                    Some("output_text") | Some("text") | Some("input_text")
                )
            })
            .filter_map(|p| str_field(p, "text"))
            .collect::<Vec<_>>()
            .join(""),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Output text and error flag of a function call.
///
/// Shell calls wrap their output as `{"output": "...", "metadata":
/// {"exit_code": N}}`, either as an object or as an encoded string.
fn tool_output(raw: &Value) -> (String, bool) {
    let decoded = match raw {
        Value::String(s) => serde_json::from_str::<Value>(s).ok(),
        other => Some(other.clone()),
    };

    if let Some(Value::Object(obj)) = &decoded {
        if let Some(output) = obj.get("output") {
            let exit_code = obj
                .get("metadata")
                .and_then(|m| m.get("exit_code"))
                .and_then(Value::as_i64);
            return (value_text(output), exit_code.is_some_and(|c| c != 0));
        }
    }

    let is_error = raw
        .as_str()
        .is_some_and(|s| s.starts_with("Exit code:") && !s.starts_with("Exit code: 0\n"));
    (value_text(raw), is_error)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
