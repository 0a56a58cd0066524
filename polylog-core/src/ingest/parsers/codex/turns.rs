//! Codex turn builder.
//!
//! Codex does not replay user input between turns in its exec stream, so a
//! `turn.started` after the first one opens an empty user turn as a boundary
//! marker. A `user_message` event (rollout envelope) fills that marker in.

use super::events::{parse_event, CodexEvent, CodexItem, SessionMeta};
use crate::format::parse_timestamp;
use crate::ingest::transcript::TranscriptBuilder;
use crate::jsonl::JsonlLine;
use crate::types::{ContentBlock, ParseErrorType, SystemTurn, ToolCallWithResult, Turn, Usage, UserTurn};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct ParsedRollout {
    pub turns: Vec<Turn>,
    pub meta: SessionMeta,
}

#[derive(Default)]
struct CodexTranscriptParser {
    builder: TranscriptBuilder,
    meta: SessionMeta,
    model: Option<String>,
    turns_started: usize,
    /// A user message arrived since the last turn ended
    user_since_turn_end: bool,
    /// The last pushed turn is an unfilled boundary placeholder
    placeholder_open: bool,
    pending_usage: Option<Usage>,
    last_total: Option<Usage>,
}

/// Parse a Codex session file.
pub(crate) fn parse_rollout(lines: Vec<JsonlLine>) -> ParsedRollout {
    let mut parser = CodexTranscriptParser::default();
    for line in lines {
        parser.handle_line(line);
    }
    ParsedRollout {
        turns: parser.builder.finish(&HashMap::new()),
        meta: parser.meta,
    }
}

impl CodexTranscriptParser {
    fn handle_line(&mut self, line: JsonlLine) {
        let JsonlLine {
            line_number,
            raw,
            value,
        } = line;

        let value = match value {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(line = line_number, error = %e, "Codex JSON parse error");
                self.builder
                    .push_parse_error(line_number, &raw, ParseErrorType::JsonParse, Some(e));
                return;
            }
        };

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        match parse_event(&value, line_number) {
            Ok(event) => self.apply(event, timestamp),
            Err(message) => {
                tracing::warn!(line = line_number, error = %message, "Codex record has unexpected shape");
                self.builder.push_parse_error(
                    line_number,
                    &raw,
                    ParseErrorType::InvalidStructure,
                    Some(message),
                );
            }
        }
    }

    fn apply(&mut self, event: CodexEvent, timestamp: Option<DateTime<Utc>>) {
        match event {
            CodexEvent::Meta(meta) => self.merge_meta(meta),
            CodexEvent::TurnContext { model, cwd } => {
                if model.is_some() {
                    self.model = model;
                }
                if self.meta.cwd.is_none() {
                    self.meta.cwd = cwd;
                }
            }
            CodexEvent::TurnStarted => {
                self.builder.close_assistant();
                if self.turns_started > 0 && !self.user_since_turn_end {
                    let uuid = self.builder.next_id("user");
                    self.builder.push_turn(Turn::User(UserTurn {
                        uuid,
                        timestamp,
                        ..Default::default()
                    }));
                    self.placeholder_open = true;
                }
                self.turns_started += 1;
                self.pending_usage = None;
            }
            CodexEvent::TurnCompleted { usage } => {
                let usage = usage.or(self.pending_usage.take());
                if let (Some(usage), true) = (usage, self.builder.has_open_assistant()) {
                    let draft = self.builder.assistant(|b| b.next_id("assistant"), timestamp);
                    let key = draft.uuid.clone();
                    draft.set_usage(&key, usage);
                }
                self.builder.close_assistant();
                self.user_since_turn_end = false;
                self.placeholder_open = false;
            }
            CodexEvent::Failure(text) => {
                let uuid = self.builder.next_id("system");
                self.builder.push_turn(Turn::System(SystemTurn {
                    uuid,
                    timestamp,
                    text,
                }));
                self.placeholder_open = false;
            }
            CodexEvent::UserMessage(text) => self.user_message(text, timestamp),
            CodexEvent::Item(item) => self.item(item, timestamp),
            CodexEvent::ToolOutput {
                call_id,
                output,
                is_error,
            } => {
                if !self
                    .builder
                    .resolve_tool_call(&call_id, output, is_error, Vec::new())
                {
                    tracing::debug!(call_id, "Codex tool output without a matching call");
                }
            }
            CodexEvent::TokenCount { total, last } => {
                // Codex re-emits the same count; the running total dedupes it
                if total.is_some() && total == self.last_total {
                    return;
                }
                self.last_total = total;
                if let Some(last) = last {
                    self.pending_usage = Some(match self.pending_usage {
                        Some(pending) => pending.combine(last),
                        None => last,
                    });
                }
            }
            CodexEvent::Ignored => {}
        }
    }

    fn merge_meta(&mut self, meta: SessionMeta) {
        let current = &mut self.meta;
        current.id = current.id.take().or(meta.id);
        current.timestamp = current.timestamp.take().or(meta.timestamp);
        current.cwd = current.cwd.take().or(meta.cwd);
        current.model = current.model.take().or(meta.model);
        current.provider = current.provider.take().or(meta.provider);
        current.git = current.git.take().or(meta.git);
        if self.model.is_none() {
            self.model = current.model.clone();
        }
    }

    fn user_message(&mut self, text: String, timestamp: Option<DateTime<Utc>>) {
        self.user_since_turn_end = true;
        if self.placeholder_open {
            self.placeholder_open = false;
            if let Some(Turn::User(placeholder)) = self.builder.last_turn_mut() {
                placeholder.text = text;
                if placeholder.timestamp.is_none() {
                    placeholder.timestamp = timestamp;
                }
                return;
            }
        }
        let uuid = self.builder.next_id("user");
        self.builder.push_turn(Turn::User(UserTurn {
            uuid,
            timestamp,
            text,
            ..Default::default()
        }));
    }

    fn item(&mut self, item: CodexItem, timestamp: Option<DateTime<Utc>>) {
        self.placeholder_open = false;
        let model = self.model.clone();
        let draft = self.builder.assistant(|b| b.next_id("assistant"), timestamp);
        if draft.model.is_none() {
            draft.model = model;
        }

        match item {
            CodexItem::AgentMessage(text) => {
                if !text.is_empty() {
                    self.builder.push_block(ContentBlock::text(text));
                }
            }
            CodexItem::Reasoning(text) => {
                if !text.is_empty() {
                    self.builder.push_block(ContentBlock::thinking(text));
                }
            }
            CodexItem::Tool {
                id,
                name,
                input,
                result,
                is_error,
            } => {
                let tool_use_id = match id {
                    Some(id) => id,
                    None => self.builder.next_id("call"),
                };
                self.builder.push_block(ContentBlock::ToolCall {
                    call: ToolCallWithResult {
                        tool_use_id,
                        name,
                        input,
                        result,
                        is_error,
                        result_images: Vec::new(),
                        sub_agent_id: None,
                    },
                });
            }
            CodexItem::FunctionCall {
                call_id,
                name,
                input,
            } => self.builder.stage_tool_call(call_id, name, input),
        }
    }
}
