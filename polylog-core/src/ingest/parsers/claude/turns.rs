//! Claude Code transcript parser.
//!
//! Turns a sequence of JSONL lines into turns:
//!
//! - Consecutive `assistant` lines fold into one assistant turn until a real
//!   user message, a system notice, or a parse error closes it.
//! - `tool_use` blocks are staged and completed by the `tool_result` that
//!   names them, which arrives inside a later `user` line. A user line made
//!   only of tool results opens no turn and leaves the assistant turn open.
//! - A line that is not JSON, or a known record kind with the wrong shape,
//!   becomes a parse-error turn at its line number; parsing continues.

use super::envelope::{extract_agent_id, is_internal_markup, unwrap_user_text};
use super::records::{parse_blocks, AssistantRecord, ClaudeRecord, RawBlock, RawUsage, UserRecord};
use crate::format::parse_timestamp;
use crate::ingest::transcript::TranscriptBuilder;
use crate::jsonl::JsonlLine;
use crate::types::{
    input_map, nonzero, ContentBlock, ImageAttachment, ParseErrorType, SystemTurn, Turn, Usage,
    UserTurn,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Tool names whose calls spawn a sub-agent.
const AGENT_TOOLS: &[&str] = &["Task", "Agent"];

/// Output of a full transcript parse.
#[derive(Debug, Default)]
pub(crate) struct ParsedTranscript {
    pub turns: Vec<Turn>,
    /// tool_use_id -> agent id
    pub sub_agents: HashMap<String, String>,
    /// First `cwd` seen in the transcript
    pub cwd: Option<String>,
}

/// Options controlling which records are kept.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ParseOptions {
    /// Keep `isSidechain` records (true when parsing a sub-agent file)
    pub keep_sidechain: bool,
}

struct ClaudeTranscriptParser {
    builder: TranscriptBuilder,
    sub_agents: HashMap<String, String>,
    /// Ids of tool calls that spawn agents
    agent_calls: HashSet<String>,
    cwd: Option<String>,
    options: ParseOptions,
}

/// Parse a Claude Code transcript.
pub(crate) fn parse_transcript(lines: Vec<JsonlLine>, options: ParseOptions) -> ParsedTranscript {
    let mut parser = ClaudeTranscriptParser {
        builder: TranscriptBuilder::new(),
        sub_agents: HashMap::new(),
        agent_calls: HashSet::new(),
        cwd: None,
        options,
    };

    for line in lines {
        parser.handle_line(line);
    }

    let turns = parser.builder.finish(&parser.sub_agents);
    ParsedTranscript {
        turns,
        sub_agents: parser.sub_agents,
        cwd: parser.cwd,
    }
}

impl ClaudeTranscriptParser {
    fn handle_line(&mut self, line: JsonlLine) {
        let JsonlLine {
            line_number,
            raw,
            value,
        } = line;

        let value = match value {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(line = line_number, error = %e, "Claude Code JSON parse error");
                self.builder
                    .push_parse_error(line_number, &raw, ParseErrorType::JsonParse, Some(e));
                return;
            }
        };

        if self.cwd.is_none() {
            self.cwd = value.get("cwd").and_then(Value::as_str).map(str::to_string);
        }

        let result = ClaudeRecord::from_value(value).and_then(|record| match record {
            ClaudeRecord::Housekeeping(_) => Ok(()),
            ClaudeRecord::Progress(progress) => {
                if let Some((tool_use_id, agent_id)) = progress.agent_spawn() {
                    self.sub_agents.insert(tool_use_id, agent_id);
                }
                Ok(())
            }
            ClaudeRecord::System(system) => {
                if !system.envelope.is_meta() && self.keeps(system.envelope.is_sidechain()) {
                    let text = system.content.unwrap_or_default();
                    if !text.trim().is_empty() {
                        let uuid = self.uuid_or_generated(system.envelope.uuid, "system");
                        self.builder.push_turn(Turn::System(SystemTurn {
                            uuid,
                            timestamp: system.envelope.timestamp.as_deref().and_then(parse_timestamp),
                            text,
                        }));
                    }
                }
                Ok(())
            }
            ClaudeRecord::User(user) => self.handle_user(user),
            ClaudeRecord::Assistant(assistant) => self.handle_assistant(assistant),
        });

        if let Err(message) = result {
            tracing::warn!(line = line_number, error = %message, "Claude Code record has unexpected shape");
            self.builder.push_parse_error(
                line_number,
                &raw,
                ParseErrorType::InvalidStructure,
                Some(message),
            );
        }
    }

    fn keeps(&self, is_sidechain: bool) -> bool {
        !is_sidechain || self.options.keep_sidechain
    }

    fn uuid_or_generated(&mut self, uuid: Option<String>, prefix: &str) -> String {
        match uuid {
            Some(uuid) => uuid,
            None => self.builder.next_id(prefix),
        }
    }

    fn handle_user(&mut self, user: UserRecord) -> Result<(), String> {
        if user.envelope.is_meta() || !self.keeps(user.envelope.is_sidechain()) {
            return Ok(());
        }

        let mut texts: Vec<String> = Vec::new();
        let mut attachments: Vec<ImageAttachment> = Vec::new();

        match &user.message.content {
            Value::String(text) => texts.push(text.clone()),
            Value::Array(items) => {
                let blocks = parse_blocks(items)?;
                let single_result = blocks
                    .iter()
                    .filter(|b| matches!(b, RawBlock::ToolResult { .. }))
                    .count()
                    == 1;
                for block in blocks {
                    match block {
                        RawBlock::Text { text } => texts.push(text),
                        RawBlock::Image { source } => {
                            if let Some(image) = image_attachment(source) {
                                attachments.push(image);
                            }
                        }
                        RawBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let structured_agent = single_result
                                .then(|| user.tool_use_result.as_ref())
                                .flatten()
                                .and_then(|r| r.get("agentId"))
                                .and_then(Value::as_str);
                            self.apply_tool_result(
                                &tool_use_id,
                                &content,
                                is_error.unwrap_or(false),
                                structured_agent,
                            );
                        }
                        RawBlock::Thinking { .. } | RawBlock::ToolUse { .. } | RawBlock::Unknown => {}
                    }
                }
            }
            Value::Null => return Err("user message has no content".to_string()),
            _ => return Err("user message content must be a string or an array".to_string()),
        }

        let text = texts
            .iter()
            .filter(|t| !t.trim().is_empty() && !is_internal_markup(t))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() && attachments.is_empty() {
            // Tool results only, or nothing but harness chatter
            return Ok(());
        }

        let unwrapped = unwrap_user_text(&text);
        let uuid = self.uuid_or_generated(user.envelope.uuid, "user");
        let turn = UserTurn {
            uuid,
            timestamp: user.envelope.timestamp.as_deref().and_then(parse_timestamp),
            text: unwrapped.text,
            command: unwrapped.command,
            attachments,
            bash_input: unwrapped.bash.input,
            bash_stdout: unwrapped.bash.stdout,
            bash_stderr: unwrapped.bash.stderr,
            ide_opened_file: unwrapped.ide_opened_file,
        };

        if !self.merge_bash_output(&turn) {
            self.builder.push_turn(Turn::User(turn));
        }
        Ok(())
    }

    /// Fold a standalone stdout/stderr turn into the bash-input turn before it.
    fn merge_bash_output(&mut self, turn: &UserTurn) -> bool {
        let is_output_only = turn.bash_input.is_none()
            && (turn.bash_stdout.is_some() || turn.bash_stderr.is_some())
            && turn.text.is_empty()
            && turn.command.is_none();
        if !is_output_only {
            return false;
        }
        match self.builder.last_turn_mut() {
            Some(Turn::User(prev))
                if prev.bash_input.is_some()
                    && prev.bash_stdout.is_none()
                    && prev.bash_stderr.is_none() =>
            {
                prev.bash_stdout = turn.bash_stdout.clone();
                prev.bash_stderr = turn.bash_stderr.clone();
                true
            }
            _ => false,
        }
    }

    fn apply_tool_result(
        &mut self,
        tool_use_id: &str,
        content: &Value,
        is_error: bool,
        structured_agent: Option<&str>,
    ) {
        let (result, images) = tool_result_content(content);

        if self.agent_calls.contains(tool_use_id) && !self.sub_agents.contains_key(tool_use_id) {
            let agent_id = extract_agent_id(&result).or_else(|| structured_agent.map(str::to_string));
            if let Some(agent_id) = agent_id {
                self.sub_agents.insert(tool_use_id.to_string(), agent_id);
            }
        }

        if !self
            .builder
            .resolve_tool_call(tool_use_id, result, is_error, images)
        {
            tracing::debug!(tool_use_id, "tool_result without a matching tool_use");
        }
    }

    fn handle_assistant(&mut self, assistant: AssistantRecord) -> Result<(), String> {
        if !self.keeps(assistant.envelope.is_sidechain()) {
            return Ok(());
        }

        let message = assistant.message;
        let items = match &message.content {
            Value::Array(items) => items,
            _ => return Err("assistant message content must be an array".to_string()),
        };
        let blocks = parse_blocks(items)?;

        let record_uuid = assistant.envelope.uuid;
        let timestamp = assistant.envelope.timestamp.as_deref().and_then(parse_timestamp);
        let draft = self.builder.assistant(
            |b| record_uuid.clone().unwrap_or_else(|| b.next_id("assistant")),
            timestamp,
        );
        if draft.model.is_none() {
            draft.model = message.model.clone();
        }
        if let Some(stop_reason) = &message.stop_reason {
            draft.stop_reason = Some(stop_reason.clone());
        }
        if let Some(usage) = message.usage {
            let key = message
                .id
                .clone()
                .or_else(|| record_uuid.clone())
                .unwrap_or_default();
            draft.set_usage(&key, convert_usage(usage));
        }

        for block in blocks {
            match block {
                RawBlock::Text { text } => {
                    if !text.is_empty() {
                        self.builder.push_block(ContentBlock::text(text));
                    }
                }
                RawBlock::Thinking { thinking } => {
                    if !thinking.is_empty() {
                        self.builder.push_block(ContentBlock::thinking(thinking));
                    }
                }
                RawBlock::ToolUse { id, name, input } => {
                    if AGENT_TOOLS.contains(&name.as_str()) {
                        self.agent_calls.insert(id.clone());
                    }
                    self.builder.stage_tool_call(id, name, input_map(input));
                }
                RawBlock::ToolResult { .. } | RawBlock::Image { .. } | RawBlock::Unknown => {}
            }
        }
        Ok(())
    }
}

fn convert_usage(raw: RawUsage) -> Usage {
    Usage {
        input_tokens: raw.input_tokens.unwrap_or(0),
        output_tokens: raw.output_tokens.unwrap_or(0),
        cache_read_tokens: nonzero(raw.cache_read_input_tokens),
        cache_creation_tokens: nonzero(raw.cache_creation_input_tokens),
    }
}

fn image_attachment(source: super::records::ImageSource) -> Option<ImageAttachment> {
    let data = source.data.or(source.url)?;
    Some(ImageAttachment {
        media_type: source.media_type.unwrap_or_else(|| "image/png".to_string()),
        data,
    })
}

/// Flatten tool result content into text plus any images.
fn tool_result_content(content: &Value) -> (String, Vec<ImageAttachment>) {
    match content {
        Value::String(s) => (s.clone(), Vec::new()),
        Value::Array(items) => {
            let mut texts = Vec::new();
            let mut images = Vec::new();
            for item in items {
                match item.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                    Some("image") => {
                        let source = item
                            .get("source")
                            .cloned()
                            .and_then(|s| serde_json::from_value(s).ok());
                        if let Some(image) = source.and_then(image_attachment) {
                            images.push(image);
                        }
                    }
                    _ => {}
                }
            }
            (texts.join("\n"), images)
        }
        Value::Null => (String::new(), Vec::new()),
        other => (other.to_string(), Vec::new()),
    }
}
