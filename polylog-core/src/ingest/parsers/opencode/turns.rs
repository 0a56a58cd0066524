//! OpenCode message rows to turns.
//!
//! One turn per message row. Parts are mapped in order: `text` to text,
//! `reasoning` to thinking, `tool` to a tool call whose result depends on
//! the tool's `state.status`. Other part kinds carry nothing for the
//! transcript.

use super::store::MessageRow;
use crate::format::millis_to_utc;
use crate::ingest::transcript::TranscriptBuilder;
use crate::types::{
    input_map, nonzero, ContentBlock, ImageAttachment, ParseErrorType, ToolCallWithResult, Turn,
    Usage, UserTurn,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
pub(crate) struct RawTokens {
    input: Option<u64>,
    output: Option<u64>,
    cache: Option<RawCache>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct RawCache {
    read: Option<u64>,
    write: Option<u64>,
}

impl From<RawTokens> for Usage {
    fn from(raw: RawTokens) -> Self {
        let cache = raw.cache.unwrap_or_default();
        Usage {
            input_tokens: raw.input.unwrap_or(0),
            output_tokens: raw.output.unwrap_or(0),
            cache_read_tokens: nonzero(cache.read),
            cache_creation_tokens: nonzero(cache.write),
        }
    }
}

/// Message payload (`message.data`).
#[derive(Debug, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub(crate) enum MessageData {
    User {},
    Assistant {
        #[serde(rename = "modelID", default)]
        model_id: Option<String>,
        #[serde(default)]
        tokens: Option<RawTokens>,
        #[serde(default)]
        finish: Option<String>,
    },
}

/// Part payload (`part.data`).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub(crate) enum PartData {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        ignored: bool,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    Tool {
        #[serde(rename = "callID", default)]
        call_id: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        state: ToolState,
    },
    File {
        #[serde(default)]
        mime: String,
        #[serde(default)]
        url: String,
    },
    StepFinish {
        #[serde(default)]
        tokens: Option<RawTokens>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ToolState {
    status: Option<String>,
    input: Value,
    output: Option<String>,
    error: Option<String>,
}

/// Text of a user message's parts, as shown in a listing.
pub(crate) fn user_text(parts: &[PartData]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            PartData::Text { text, ignored } if !ignored && !text.trim().is_empty() => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode part payloads, dropping ones that are not JSON.
pub(crate) fn decode_parts(raw_parts: &[String]) -> Vec<PartData> {
    raw_parts
        .iter()
        .filter_map(|raw| match serde_json::from_str::<PartData>(raw) {
            Ok(part) => Some(part),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OpenCode part");
                None
            }
        })
        .collect()
}

/// Build turns from message rows and their parts.
pub(crate) fn build_turns(rows: Vec<(MessageRow, Vec<String>)>) -> Vec<Turn> {
    let mut builder = TranscriptBuilder::new();

    for (idx, (row, raw_parts)) in rows.into_iter().enumerate() {
        let row_number = idx + 1;
        let Some(raw) = row.data.as_deref() else {
            tracing::warn!(message_id = %row.id, "OpenCode message has no data");
            builder.push_parse_error(
                row_number,
                "",
                ParseErrorType::InvalidStructure,
                Some(format!("message {} has no data", row.id)),
            );
            continue;
        };
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(message_id = %row.id, error = %e, "OpenCode message is not JSON");
                builder.push_parse_error(
                    row_number,
                    raw,
                    ParseErrorType::JsonParse,
                    Some(e.to_string()),
                );
                continue;
            }
        };
        let data = match MessageData::deserialize(&value) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(message_id = %row.id, error = %e, "OpenCode message has unexpected shape");
                builder.push_parse_error(
                    row_number,
                    raw,
                    ParseErrorType::InvalidStructure,
                    Some(e.to_string()),
                );
                continue;
            }
        };

        let timestamp = row.time_created_ms.and_then(millis_to_utc);
        let parts = decode_parts(&raw_parts);

        match data {
            MessageData::User {} => {
                let attachments = parts
                    .iter()
                    .filter_map(|p| match p {
                        PartData::File { mime, url } if mime.starts_with("image/") => {
                            Some(ImageAttachment {
                                media_type: mime.clone(),
                                data: url.clone(),
                            })
                        }
                        _ => None,
                    })
                    .collect();
                builder.push_turn(Turn::User(UserTurn {
                    uuid: row.id,
                    timestamp,
                    text: user_text(&parts),
                    attachments,
                    ..Default::default()
                }));
            }
            MessageData::Assistant {
                model_id,
                tokens,
                finish,
            } => {
                builder.close_assistant();
                let message_id = row.id.clone();
                let draft = builder.assistant(|_| row.id, timestamp);
                draft.model = model_id;
                draft.stop_reason = finish;

                let usage = tokens.map(Usage::from).or_else(|| step_finish_usage(&parts));
                if let Some(usage) = usage {
                    draft.set_usage(&message_id, usage);
                }

                for part in parts {
                    if let Some(block) = part_block(part, &mut builder) {
                        builder.push_block(block);
                    }
                }
                builder.close_assistant();
            }
        }
    }

    builder.finish(&HashMap::new())
}

/// Usage summed over `step-finish` parts.
fn step_finish_usage(parts: &[PartData]) -> Option<Usage> {
    parts
        .iter()
        .filter_map(|p| match p {
            PartData::StepFinish { tokens: Some(t) } => Some(Usage::from(*t)),
            _ => None,
        })
        .reduce(Usage::combine)
}

fn part_block(part: PartData, builder: &mut TranscriptBuilder) -> Option<ContentBlock> {
    match part {
        PartData::Text { text, ignored } if !ignored && !text.is_empty() => {
            Some(ContentBlock::text(text))
        }
        PartData::Reasoning { text } if !text.is_empty() => Some(ContentBlock::thinking(text)),
        PartData::Tool {
            call_id,
            id,
            tool,
            state,
        } => {
            let tool_use_id = call_id.or(id).unwrap_or_else(|| builder.next_id("call"));
            let input = input_map(state.input);
            let call = match state.status.as_deref() {
                Some("completed") => ToolCallWithResult {
                    tool_use_id,
                    name: tool,
                    input,
                    result: state.output.unwrap_or_default(),
                    is_error: false,
                    result_images: Vec::new(),
                    sub_agent_id: None,
                },
                Some("error") => ToolCallWithResult {
                    tool_use_id,
                    name: tool,
                    input,
                    result: state.error.unwrap_or_default(),
                    is_error: true,
                    result_images: Vec::new(),
                    sub_agent_id: None,
                },
                // pending / running: the session ended first
                _ => ToolCallWithResult::interrupted(tool_use_id, tool, input),
            };
            Some(ContentBlock::ToolCall { call })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INTERRUPTED_TOOL_RESULT;
    use serde_json::json;

    fn row(id: &str, ms: i64, data: Value) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            time_created_ms: Some(ms),
            data: Some(data.to_string()),
        }
    }

    fn parts(values: &[Value]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_pending_tool_is_interrupted() {
        let turns = build_turns(vec![(
            row("m1", 1, json!({"role": "assistant", "modelID": "claude-sonnet-4"})),
            parts(&[json!({"type": "tool", "callID": "c1", "tool": "bash", "state": {"status": "pending", "input": {"command": "ls"}}})]),
        )]);
        let call = turns[0].as_assistant().unwrap().content_blocks[0]
            .as_tool_call()
            .unwrap()
            .clone();
        assert_eq!(call.result, INTERRUPTED_TOOL_RESULT);
        assert!(call.is_error);
        assert_eq!(call.tool_use_id, "c1");
    }

    #[test]
    fn test_user_and_assistant_rows() {
        let turns = build_turns(vec![
            (
                row("m1", 1_700_000_000_000, json!({"role": "user"})),
                parts(&[
                    json!({"type": "text", "text": "hello"}),
                    json!({"type": "text", "text": "context", "ignored": true}),
                    json!({"type": "text", "text": "world"}),
                    json!({"type": "file", "mime": "image/png", "url": "data:image/png;base64,AA"}),
                    json!({"type": "file", "mime": "text/plain", "url": "file:///x"}),
                ]),
            ),
            (
                row("m2", 1_700_000_001_000, json!({"role": "assistant", "modelID": "gpt-5", "finish": "stop", "tokens": {"input": 12, "output": 4, "cache": {"read": 0, "write": 3}}})),
                parts(&[
                    json!({"type": "step-start"}),
                    json!({"type": "reasoning", "text": "hmm"}),
                    json!({"type": "tool", "callID": "c1", "tool": "read", "state": {"status": "completed", "input": {"path": "a"}, "output": "contents"}}),
                    json!({"type": "tool", "callID": "c2", "tool": "edit", "state": {"status": "error", "input": {}, "error": "denied"}}),
                    json!({"type": "text", "text": "done"}),
                ]),
            ),
        ]);

        assert_eq!(turns.len(), 2);
        let user = turns[0].as_user().unwrap();
        assert_eq!(user.text, "hello\nworld");
        assert_eq!(user.attachments.len(), 1);
        assert_eq!(user.timestamp.unwrap().timestamp(), 1_700_000_000);

        let a = turns[1].as_assistant().unwrap();
        assert_eq!(a.uuid, "m2");
        assert_eq!(a.model.as_deref(), Some("gpt-5"));
        assert_eq!(a.stop_reason.as_deref(), Some("stop"));
        assert_eq!(a.content_blocks.len(), 4);
        assert_eq!(a.content_blocks[1].as_tool_call().unwrap().result, "contents");
        let failed = a.content_blocks[2].as_tool_call().unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.result, "denied");
        let usage = a.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.cache_read_tokens, None);
        assert_eq!(usage.cache_creation_tokens, Some(3));
    }

    #[test]
    fn test_usage_falls_back_to_step_finish() {
        let turns = build_turns(vec![(
            row("m1", 1, json!({"role": "assistant"})),
            parts(&[
                json!({"type": "text", "text": "x"}),
                json!({"type": "step-finish", "tokens": {"input": 7, "output": 2}}),
            ]),
        )]);
        let usage = turns[0].as_assistant().unwrap().usage.unwrap();
        assert_eq!((usage.input_tokens, usage.output_tokens), (7, 2));
    }

    #[test]
    fn test_consecutive_assistant_rows_stay_separate() {
        let turns = build_turns(vec![
            (row("m1", 1, json!({"role": "assistant"})), parts(&[json!({"type": "text", "text": "a"})])),
            (row("m2", 2, json!({"role": "assistant"})), parts(&[json!({"type": "text", "text": "b"})])),
        ]);
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn test_bad_rows_become_parse_errors() {
        let turns = build_turns(vec![
            (
                MessageRow {
                    id: "m1".to_string(),
                    time_created_ms: None,
                    data: Some("{broken".to_string()),
                },
                Vec::new(),
            ),
            (row("m2", 2, json!({"role": "tool"})), Vec::new()),
            (row("m3", 3, json!({"role": "user"})), parts(&[json!({"type": "text", "text": "ok"})])),
        ]);
        assert_eq!(turns.len(), 3);
        let first = turns[0].as_parse_error().unwrap();
        assert_eq!(first.line_number, 1);
        assert_eq!(first.error_type, ParseErrorType::JsonParse);
        assert_eq!(
            turns[1].as_parse_error().unwrap().error_type,
            ParseErrorType::InvalidStructure
        );
        assert_eq!(turns[2].as_user().unwrap().text, "ok");
    }

    #[test]
    fn test_message_without_data_keeps_neighbours() {
        let turns = build_turns(vec![
            (row("m1", 1, json!({"role": "user"})), parts(&[json!({"type": "text", "text": "first"})])),
            (
                MessageRow {
                    id: "m2".to_string(),
                    time_created_ms: Some(2),
                    data: None,
                },
                Vec::new(),
            ),
            (row("m3", 3, json!({"role": "assistant"})), parts(&[json!({"type": "text", "text": "still here"})])),
        ]);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].as_user().unwrap().text, "first");
        let missing = turns[1].as_parse_error().unwrap();
        assert_eq!(missing.line_number, 2);
        assert_eq!(missing.error_type, ParseErrorType::InvalidStructure);
        assert!(missing.raw_line.is_empty());
        assert_eq!(turns[2].as_assistant().unwrap().content_blocks.len(), 1);
    }
}
