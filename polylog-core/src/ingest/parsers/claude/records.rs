//! Raw Claude Code JSONL records.
//!
//! Each line is classified by its `type` into one [`ClaudeRecord`] variant.
//! A known kind whose body does not deserialize is reported as a structural
//! error; unknown kinds are housekeeping and carry no turn content.

use serde::Deserialize;
use serde_json::Value;

/// Represents a single line from a Claude Code JSONL file.
#[derive(Debug)]
pub(crate) enum ClaudeRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    System(SystemRecord),
    Progress(ProgressRecord),
    /// `file-history-snapshot`, `summary` and other non-turn kinds
    Housekeeping(String),
}

impl ClaudeRecord {
    /// Classify a parsed JSON line. `Err` carries a structural error message.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let record_type = match &value {
            Value::Object(map) => match map.get("type") {
                Some(Value::String(t)) => t.clone(),
                Some(_) => return Err("record `type` is not a string".to_string()),
                None => return Err("record has no `type`".to_string()),
            },
            _ => return Err("record is not a JSON object".to_string()),
        };

        let describe = |e: serde_json::Error| format!("invalid {} record: {}", record_type, e);
        match record_type.as_str() {
            "user" => serde_json::from_value(value)
                .map(ClaudeRecord::User)
                .map_err(describe),
            "assistant" => serde_json::from_value(value)
                .map(ClaudeRecord::Assistant)
                .map_err(describe),
            "system" => serde_json::from_value(value)
                .map(ClaudeRecord::System)
                .map_err(describe),
            "progress" => serde_json::from_value(value)
                .map(ClaudeRecord::Progress)
                .map_err(describe),
            _ => Ok(ClaudeRecord::Housekeeping(record_type)),
        }
    }
}

/// Fields every conversational record may carry.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RecordEnvelope {
    pub uuid: Option<String>,
    pub timestamp: Option<String>,
    pub is_meta: Option<bool>,
    pub is_sidechain: Option<bool>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub slug: Option<String>,
}

impl RecordEnvelope {
    pub fn is_meta(&self) -> bool {
        self.is_meta.unwrap_or(false)
    }

    pub fn is_sidechain(&self) -> bool {
        self.is_sidechain.unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRecord {
    #[serde(flatten)]
    pub envelope: RecordEnvelope,
    pub message: RawMessage,
    /// Structured result payload; Task results carry `agentId` here
    #[serde(default)]
    pub tool_use_result: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssistantRecord {
    #[serde(flatten)]
    pub envelope: RecordEnvelope,
    pub message: RawMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SystemRecord {
    #[serde(flatten)]
    pub envelope: RecordEnvelope,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressRecord {
    #[serde(rename = "parentToolUseID", default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub data: Option<ProgressData>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ProgressData {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub agent_id: Option<String>,
}

impl ProgressRecord {
    /// `(tool_use_id, agent_id)` for a foreground agent announcement.
    pub fn agent_spawn(&self) -> Option<(String, String)> {
        let data = self.data.as_ref()?;
        if data.kind.as_deref() != Some("agent_progress") {
            return None;
        }
        Some((self.parent_tool_use_id.clone()?, data.agent_id.clone()?))
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawMessage {
    pub id: Option<String>,
    pub model: Option<String>,
    /// A string or a block array; validated by the turn builder
    pub content: Value,
    pub stop_reason: Option<String>,
    pub usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub(crate) struct RawUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

/// One item of a message content array.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum RawBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    // Catch-all for unknown block types
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct ImageSource {
    pub media_type: Option<String>,
    pub data: Option<String>,
    pub url: Option<String>,
}

/// Parse a content array item by item.
pub(crate) fn parse_blocks(items: &[Value]) -> Result<Vec<RawBlock>, String> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            RawBlock::deserialize(item).map_err(|e| format!("content block {}: {}", idx, e))
        })
        .collect()
}
