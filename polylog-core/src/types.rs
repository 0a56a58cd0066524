//! Core domain types for polylog
//!
//! These types are the shared model every source format is normalized into,
//! and the shape the view layer consumes (serialized as camelCase JSON).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Turn** | One conversational unit: user message, assistant response, system notice, or parse error |
//! | **Content block** | One semantic unit inside an assistant turn (thinking, text, tool call) |
//! | **Sub-agent** | A nested conversation spawned by a tool call, linked by its tool-use id |
//! | **Plugin project** | One source's view of a project directory |
//! | **Merged project** | All plugin projects that resolve to the same filesystem path |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Result text for a tool call whose result never arrived.
pub const INTERRUPTED_TOOL_RESULT: &str = "[Tool execution was interrupted]";

// ============================================
// Turns
// ============================================

/// One conversational unit in a session.
///
/// Turns are ordered by their position in the source stream, not by
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
    System(SystemTurn),
    ParseError(ParseErrorTurn),
}

impl Turn {
    pub fn uuid(&self) -> &str {
        match self {
            Turn::User(t) => &t.uuid,
            Turn::Assistant(t) => &t.uuid,
            Turn::System(t) => &t.uuid,
            Turn::ParseError(t) => &t.uuid,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Turn::User(t) => t.timestamp,
            Turn::Assistant(t) => t.timestamp,
            Turn::System(t) => t.timestamp,
            Turn::ParseError(t) => t.timestamp,
        }
    }

    pub fn as_user(&self) -> Option<&UserTurn> {
        match self {
            Turn::User(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match self {
            Turn::Assistant(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_parse_error(&self) -> Option<&ParseErrorTurn> {
        match self {
            Turn::ParseError(t) => Some(t),
            _ => None,
        }
    }
}

/// A slash command invocation recovered from a user message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub args: String,
}

/// An inline image attached to a user message or tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    /// e.g. "image/png"
    pub media_type: String,
    /// Base64 payload or data URL, as recorded by the source
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTurn {
    pub uuid: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ide_opened_file: Option<String>,
}

/// Token usage attributed to one assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Absent when the source reported none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
}

impl Usage {
    /// Field-wise sum; cache fields stay absent unless either side has them.
    pub fn combine(self, other: Usage) -> Usage {
        fn add(a: Option<u64>, b: Option<u64>) -> Option<u64> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
            }
        }
        Usage {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cache_read_tokens: add(self.cache_read_tokens, other.cache_read_tokens),
            cache_creation_tokens: add(self.cache_creation_tokens, other.cache_creation_tokens),
        }
    }
}

/// Maps a reported cache counter to `None` when it is missing or zero.
pub(crate) fn nonzero(value: Option<u64>) -> Option<u64> {
    value.filter(|v| *v > 0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantTurn {
    pub uuid: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub content_blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTurn {
    pub uuid: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
}

/// Why a record could not become a regular turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorType {
    /// The record is not valid JSON
    JsonParse,
    /// Valid JSON with an unexpected shape
    InvalidStructure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseErrorTurn {
    pub uuid: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// 1-based line (or row) number in the source
    pub line_number: usize,
    pub raw_line: String,
    pub error_type: ParseErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

// ============================================
// Content blocks
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub text: String,
}

/// One semantic unit within an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Thinking { block: ThinkingBlock },
    Text { text: String },
    ToolCall { call: ToolCallWithResult },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        ContentBlock::Thinking {
            block: ThinkingBlock { text: text.into() },
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallWithResult> {
        match self {
            ContentBlock::ToolCall { call } => Some(call),
            _ => None,
        }
    }
}

/// A tool invocation joined with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallWithResult {
    /// Unique within a session
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub result: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_images: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent_id: Option<String>,
}

impl ToolCallWithResult {
    /// A call whose result never arrived before the transcript ended.
    pub fn interrupted(
        tool_use_id: String,
        name: String,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            tool_use_id,
            name,
            input,
            result: INTERRUPTED_TOOL_RESULT.to_string(),
            is_error: true,
            result_images: Vec::new(),
            sub_agent_id: None,
        }
    }
}

/// Coerces a free-form JSON value into a tool input map.
///
/// Objects pass through; anything else is wrapped under `"input"`.
pub(crate) fn input_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("input".to_string(), other);
            map
        }
    }
}

// ============================================
// Projects
// ============================================

/// One source's view of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginProject {
    pub plugin_id: String,
    /// Source-local identifier handed back to `list_sessions`/`load_session`
    pub native_id: String,
    /// Canonical filesystem path; the only merge key
    pub resolved_path: PathBuf,
    pub display_name: String,
    pub session_count: usize,
    pub last_activity: DateTime<Utc>,
}

/// A `(plugin, native id)` pair that contributed to a merged project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSource {
    pub plugin_id: String,
    pub native_id: String,
}

/// Union of every plugin project sharing one `resolved_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedProject {
    /// URL-safe id derived from `resolved_path`
    pub encoded_path: String,
    pub resolved_path: PathBuf,
    pub display_name: String,
    pub session_count: usize,
    pub last_activity: DateTime<Utc>,
    pub sources: Vec<ProjectSource>,
}

// ============================================
// Sessions
// ============================================

/// Plan/implementation pairing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Plan,
    Implementation,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Plan => "plan",
            SessionType::Implementation => "implementation",
        }
    }
}

/// Lightweight per-session listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub slug: Option<String>,
    /// At most 200 characters, control markup removed
    pub first_message: String,
    pub model: Option<String>,
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
}

/// A fully parsed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    /// Project path (or source-local project id when no path is known)
    pub project: String,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impl_session_id: Option<String>,
    /// Tool-use id -> spawned sub-agent id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sub_agents: HashMap<String, String>,
}

impl Session {
    /// A session with no turns, used when the source is missing.
    pub fn empty(session_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            project: project.into(),
            turns: Vec::new(),
            plugin_id: None,
            plan_session_id: None,
            impl_session_id: None,
            sub_agents: HashMap::new(),
        }
    }
}

/// Small label shown next to a session in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBadge {
    pub label: String,
    /// Free-form styling hint for the view layer
    pub variant: String,
}
