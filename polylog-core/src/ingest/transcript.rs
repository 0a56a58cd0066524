//! Turn assembly shared by the line-oriented parsers.
//!
//! Parsers feed records in stream order. Assistant output is collected into
//! an open draft until a turn boundary closes it. Tool calls are staged at
//! the position they were emitted and filled in when their result arrives,
//! however many records later that is.

use crate::types::{
    AssistantTurn, ContentBlock, ImageAttachment, ParseErrorTurn, ParseErrorType, ToolCallWithResult,
    Turn, Usage,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A tool call waiting for its result.
#[derive(Debug)]
struct StagedCall {
    tool_use_id: String,
    name: String,
    input: Map<String, Value>,
}

#[derive(Debug)]
enum BlockDraft {
    Ready(ContentBlock),
    Staged(StagedCall),
}

/// Assistant turn still being assembled.
#[derive(Debug, Default)]
pub(crate) struct AssistantDraft {
    pub uuid: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    blocks: Vec<BlockDraft>,
    /// Usage keyed by source message id; the last report per id wins
    usage_by_message: Vec<(String, Usage)>,
}

impl AssistantDraft {
    /// Record usage for one source message within this turn.
    pub fn set_usage(&mut self, message_id: &str, usage: Usage) {
        match self
            .usage_by_message
            .iter_mut()
            .find(|(id, _)| id == message_id)
        {
            Some((_, existing)) => *existing = usage,
            None => self.usage_by_message.push((message_id.to_string(), usage)),
        }
    }

    fn usage(&self) -> Option<Usage> {
        self.usage_by_message
            .iter()
            .map(|(_, u)| *u)
            .reduce(Usage::combine)
    }
}

#[derive(Debug)]
enum TurnDraft {
    Done(Turn),
    Assistant(AssistantDraft),
}

/// Per-parse state threaded through a transcript build.
#[derive(Debug, Default)]
pub(crate) struct TranscriptBuilder {
    turns: Vec<TurnDraft>,
    open_assistant: Option<usize>,
    /// tool_use_id -> (turn index, block index)
    staged: HashMap<String, (usize, usize)>,
    generated_ids: usize,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an id unique within this parse.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.generated_ids += 1;
        format!("{}-{}", prefix, self.generated_ids)
    }

    /// Append a finished turn, closing any open assistant turn first.
    pub fn push_turn(&mut self, turn: Turn) {
        self.close_assistant();
        self.turns.push(TurnDraft::Done(turn));
    }

    /// Append a parse error at the current stream position.
    pub fn push_parse_error(
        &mut self,
        line_number: usize,
        raw_line: &str,
        error_type: ParseErrorType,
        details: Option<String>,
    ) {
        let uuid = format!("parse-error-{}", line_number);
        self.push_turn(Turn::ParseError(ParseErrorTurn {
            uuid,
            timestamp: None,
            line_number,
            raw_line: raw_line.to_string(),
            error_type,
            error_details: details,
        }));
    }

    /// The most recently pushed finished turn, if it is the last entry.
    pub fn last_turn_mut(&mut self) -> Option<&mut Turn> {
        match self.turns.last_mut() {
            Some(TurnDraft::Done(turn)) => Some(turn),
            _ => None,
        }
    }

    pub fn has_open_assistant(&self) -> bool {
        self.open_assistant.is_some()
    }

    /// The open assistant draft, opening one with these fields if needed.
    pub fn assistant(
        &mut self,
        uuid: impl FnOnce(&mut Self) -> String,
        timestamp: Option<DateTime<Utc>>,
    ) -> &mut AssistantDraft {
        let idx = match self.open_assistant {
            Some(idx) => idx,
            None => {
                let uuid = uuid(self);
                self.turns.push(TurnDraft::Assistant(AssistantDraft {
                    uuid,
                    timestamp,
                    ..Default::default()
                }));
                let idx = self.turns.len() - 1;
                self.open_assistant = Some(idx);
                idx
            }
        };
        match &mut self.turns[idx] {
            TurnDraft::Assistant(draft) => draft,
            TurnDraft::Done(_) => unreachable!("open assistant index always points at a draft"),
        }
    }

    /// Close the open assistant turn; the next assistant output starts a new one.
    pub fn close_assistant(&mut self) {
        self.open_assistant = None;
    }

    /// Append a block to the open assistant turn.
    ///
    /// Callers open the turn first via [`Self::assistant`].
    pub fn push_block(&mut self, block: ContentBlock) {
        if let Some(draft) = self.open_draft_mut() {
            draft.blocks.push(BlockDraft::Ready(block));
        }
    }

    /// Stage a tool call in the open assistant turn until its result arrives.
    pub fn stage_tool_call(&mut self, tool_use_id: String, name: String, input: Map<String, Value>) {
        let Some(turn_idx) = self.open_assistant else {
            return;
        };
        if let TurnDraft::Assistant(draft) = &mut self.turns[turn_idx] {
            let block_idx = draft.blocks.len();
            self.staged.insert(tool_use_id.clone(), (turn_idx, block_idx));
            draft.blocks.push(BlockDraft::Staged(StagedCall {
                tool_use_id,
                name,
                input,
            }));
        }
    }

    /// Fill a staged call with its result. Returns false for unknown ids.
    pub fn resolve_tool_call(
        &mut self,
        tool_use_id: &str,
        result: String,
        is_error: bool,
        result_images: Vec<ImageAttachment>,
    ) -> bool {
        let Some((turn_idx, block_idx)) = self.staged.remove(tool_use_id) else {
            return false;
        };
        let TurnDraft::Assistant(draft) = &mut self.turns[turn_idx] else {
            return false;
        };
        let slot = &mut draft.blocks[block_idx];
        if let BlockDraft::Staged(call) = slot {
            let call = ToolCallWithResult {
                tool_use_id: std::mem::take(&mut call.tool_use_id),
                name: std::mem::take(&mut call.name),
                input: std::mem::take(&mut call.input),
                result,
                is_error,
                result_images,
                sub_agent_id: None,
            };
            *slot = BlockDraft::Ready(ContentBlock::ToolCall { call });
            return true;
        }
        false
    }

    fn open_draft_mut(&mut self) -> Option<&mut AssistantDraft> {
        let idx = self.open_assistant?;
        match &mut self.turns[idx] {
            TurnDraft::Assistant(draft) => Some(draft),
            TurnDraft::Done(_) => None,
        }
    }

    /// Produce the final turn list.
    ///
    /// Assistant drafts without blocks are dropped, calls that never got a
    /// result are marked interrupted, and sub-agent ids are attached.
    pub fn finish(self, sub_agents: &HashMap<String, String>) -> Vec<Turn> {
        self.turns
            .into_iter()
            .filter_map(|draft| match draft {
                TurnDraft::Done(turn) => Some(turn),
                TurnDraft::Assistant(draft) => {
                    if draft.blocks.is_empty() {
                        return None;
                    }
                    let usage = draft.usage();
                    let content_blocks = draft
                        .blocks
                        .into_iter()
                        .map(|block| {
                            let mut block = match block {
                                BlockDraft::Ready(block) => block,
                                BlockDraft::Staged(call) => ContentBlock::ToolCall {
                                    call: ToolCallWithResult::interrupted(
                                        call.tool_use_id,
                                        call.name,
                                        call.input,
                                    ),
                                },
                            };
                            if let ContentBlock::ToolCall { call } = &mut block {
                                call.sub_agent_id = sub_agents.get(&call.tool_use_id).cloned();
                            }
                            block
                        })
                        .collect();
                    Some(Turn::Assistant(AssistantTurn {
                        uuid: draft.uuid,
                        timestamp: draft.timestamp,
                        model: draft.model,
                        content_blocks,
                        usage,
                        stop_reason: draft.stop_reason,
                    }))
                }
            })
            .collect()
    }
}
