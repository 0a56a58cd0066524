//! Cheap session metadata for listings.
//!
//! Reads only the head of a transcript. A session qualifies for a listing
//! once it has a timestamp and a first real user message.

use super::envelope::{is_internal_markup, listing_message};
use crate::format::{listing_text, parse_timestamp};
use crate::jsonl::read_head_lines;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;

/// Records scanned per session file.
pub(crate) const HEAD_LINES: usize = 50;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct SessionHead {
    pub timestamp: Option<DateTime<Utc>>,
    pub slug: Option<String>,
    pub git_branch: Option<String>,
    pub model: Option<String>,
    pub first_message: Option<String>,
    pub cwd: Option<String>,
}

impl SessionHead {
    fn is_complete(&self) -> bool {
        self.timestamp.is_some()
            && self.slug.is_some()
            && self.git_branch.is_some()
            && self.model.is_some()
            && self.first_message.is_some()
            && self.cwd.is_some()
    }

    /// Apply one record; earlier records take precedence.
    fn absorb(&mut self, record: &Value) {
        let str_field = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if self.timestamp.is_none() {
            self.timestamp = str_field("timestamp").as_deref().and_then(parse_timestamp);
        }
        if self.slug.is_none() {
            self.slug = str_field("slug");
        }
        if self.git_branch.is_none() {
            self.git_branch = str_field("gitBranch");
        }
        if self.cwd.is_none() {
            self.cwd = str_field("cwd");
        }

        let is_meta = record.get("isMeta").and_then(Value::as_bool).unwrap_or(false);
        let is_sidechain = record
            .get("isSidechain")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_meta || is_sidechain {
            return;
        }

        match record.get("type").and_then(Value::as_str) {
            Some("assistant") if self.model.is_none() => {
                self.model = record
                    .pointer("/message/model")
                    .and_then(Value::as_str)
                    .filter(|m| !m.starts_with('<'))
                    .map(str::to_string);
            }
            Some("user") if self.first_message.is_none() => {
                self.first_message = record
                    .pointer("/message/content")
                    .and_then(first_user_text)
                    .map(|text| listing_text(&listing_message(&text)))
                    .filter(|text| !text.is_empty());
            }
            _ => {}
        }
    }
}

/// The typed text of a user message, ignoring tool results and markup.
fn first_user_text(content: &Value) -> Option<String> {
    let candidates: Vec<&str> = match content {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => {
            if items
                .iter()
                .any(|i| i.get("type").and_then(Value::as_str) == Some("tool_result"))
            {
                return None;
            }
            items
                .iter()
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect()
        }
        _ => return None,
    };
    candidates
        .into_iter()
        .find(|t| !t.trim().is_empty() && !is_internal_markup(t))
        .map(str::to_string)
}

/// Scan the head of a transcript.
pub(crate) async fn read_session_head(path: &Path) -> std::io::Result<SessionHead> {
    let mut head = SessionHead::default();
    for record in read_head_lines(path, HEAD_LINES).await? {
        head.absorb(&record);
        if head.is_complete() {
            break;
        }
    }
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn head_of(records: &[Value]) -> SessionHead {
        let mut head = SessionHead::default();
        for r in records {
            head.absorb(r);
        }
        head
    }

    #[test]
    fn test_first_message_skips_markup_and_tool_results() {
        let head = head_of(&[
            json!({"type": "user", "timestamp": "2025-01-01T00:00:00Z", "message": {"content": "<system-reminder>x</system-reminder>"}}),
            json!({"type": "user", "message": {"content": [{"type": "tool_result", "tool_use_id": "t", "content": "ok"}]}}),
            json!({"type": "user", "isMeta": true, "message": {"content": "Caveat"}}),
            json!({"type": "user", "gitBranch": "main", "message": {"content": [{"type": "text", "text": "  Add a login page  "}]}}),
            json!({"type": "assistant", "slug": "brave-otter", "message": {"model": "claude-opus-4"}}),
        ]);

        assert_eq!(head.first_message.as_deref(), Some("Add a login page"));
        assert_eq!(head.git_branch.as_deref(), Some("main"));
        assert_eq!(head.slug.as_deref(), Some("brave-otter"));
        assert_eq!(head.model.as_deref(), Some("claude-opus-4"));
        assert!(head.timestamp.is_some());
    }

    #[test]
    fn test_command_first_message() {
        let head = head_of(&[json!({"type": "user", "message": {"content": "<command-name>/init</command-name><command-args></command-args>"}})]);
        assert_eq!(head.first_message.as_deref(), Some("/init"));
    }

    #[test]
    fn test_synthetic_model_ignored() {
        let head = head_of(&[json!({"type": "assistant", "message": {"model": "<synthetic>"}})]);
        assert!(head.model.is_none());
    }

    #[tokio::test]
    async fn test_read_session_head_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let line = json!({"type": "user", "timestamp": "2025-02-01T10:00:00Z", "cwd": "/p", "message": {"content": "hello"}});
        std::fs::write(&path, format!("{}\n", line)).unwrap();

        let head = read_session_head(&path).await.unwrap();
        assert_eq!(head.first_message.as_deref(), Some("hello"));
        assert_eq!(head.cwd.as_deref(), Some("/p"));
    }
}
