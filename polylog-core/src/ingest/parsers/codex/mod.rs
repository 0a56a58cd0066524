//! OpenAI Codex CLI source
//!
//! Reads session logs from `~/.codex/sessions/`, in either layout:
//!
//! - `sessions/YYYY/MM/DD/rollout-<timestamp>-<uuid>.jsonl` (current)
//! - `sessions/<provider>/<date>/<uuid>.jsonl` (legacy)
//!
//! Codex has no project directories; sessions are grouped by the `cwd`
//! recorded in their header, and that path is the project's native id.
//!
//! # Error Handling
//!
//! - **Malformed JSON lines**: parse-error turns at their line number.
//! - **Unknown event types**: ignored; Codex adds new kinds regularly.
//! - **Missing tree**: empty results.
//! - **Session recorded under another `cwd`**: loads as empty for this
//!   project.

mod events;
mod paths;
mod turns;

use super::modified_utc;
use crate::config::home_dir;
use crate::error::Result;
use crate::format::{display_name_for, listing_text, parse_timestamp};
use crate::ingest::plugin::ToolPlugin;
use crate::jsonl::{read_head_lines, read_jsonl};
use crate::types::{PluginProject, Session, SessionBadge, SessionSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use events::{parse_event, CodexEvent, SessionMeta};
use paths::{session_id_from_path, walk_sessions, SessionPathCache};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const PLUGIN_ID: &str = "codex";

/// Records scanned per session file for listings.
const HEAD_LINES: usize = 50;

/// Plugin for Codex CLI session logs.
pub struct CodexPlugin {
    root: PathBuf,
    cache: Mutex<SessionPathCache>,
}

/// Listing fields read from the head of a session file.
#[derive(Debug, Default)]
struct SessionHead {
    meta: SessionMeta,
    model: Option<String>,
    first_timestamp: Option<DateTime<Utc>>,
    first_message: Option<String>,
}

impl SessionHead {
    fn cwd(&self) -> Option<&str> {
        self.meta.cwd.as_deref()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .or(self.first_timestamp)
    }
}

impl CodexPlugin {
    /// Create a plugin with the default root path (~/.codex).
    pub fn new() -> Self {
        Self::with_root(home_dir().join(".codex"))
    }

    /// Create a plugin with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            cache: Mutex::new(SessionPathCache::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SessionPathCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Walk the tree and refresh the path cache.
    async fn scan(&self) -> Result<Vec<PathBuf>> {
        let paths = walk_sessions(&self.root).await?;
        self.cache().replace(&self.root, &paths);
        Ok(paths)
    }

    /// Find a session file, walking the tree only on a cache miss.
    async fn locate(&self, session_id: &str) -> Result<Option<PathBuf>> {
        let cached = self.cache().get(&self.root, session_id);
        if let Some(cached) = cached {
            if tokio::fs::try_exists(&cached.path).await.unwrap_or(false) {
                return Ok(Some(cached.path));
            }
            tracing::debug!(session_id, "Cached Codex path is gone, evicting");
            self.cache().evict(session_id);
        }

        self.scan().await?;
        Ok(self.cache().get(&self.root, session_id).map(|c| c.path))
    }

    async fn read_head(path: &Path) -> std::io::Result<SessionHead> {
        let mut head = SessionHead::default();
        for (idx, value) in read_head_lines(path, HEAD_LINES).await?.iter().enumerate() {
            if head.first_timestamp.is_none() {
                head.first_timestamp = value
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp);
            }
            match parse_event(value, idx + 1) {
                Ok(CodexEvent::Meta(meta)) => {
                    if head.meta.id.is_none() {
                        head.meta = meta;
                    }
                }
                Ok(CodexEvent::TurnContext { model, cwd }) => {
                    if head.model.is_none() {
                        head.model = model;
                    }
                    if head.meta.cwd.is_none() {
                        head.meta.cwd = cwd;
                    }
                }
                Ok(CodexEvent::UserMessage(text)) if head.first_message.is_none() => {
                    let text = listing_text(&text);
                    if !text.is_empty() {
                        head.first_message = Some(text);
                    }
                }
                _ => {}
            }
            let complete = head.meta.id.is_some()
                && head.cwd().is_some()
                && head.model.is_some()
                && head.first_message.is_some();
            if complete {
                break;
            }
        }
        if head.model.is_none() {
            head.model = head.meta.model.clone();
        }
        Ok(head)
    }

    /// Read the head of every session file, skipping unreadable ones.
    async fn read_heads(&self) -> Result<Vec<(PathBuf, DateTime<Utc>, SessionHead)>> {
        let mut heads = Vec::new();
        for path in self.scan().await? {
            let mtime = match modified_utc(&path).await {
                Ok(mtime) => mtime,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat Codex session");
                    continue;
                }
            };
            match Self::read_head(&path).await {
                Ok(head) => heads.push((path, mtime, head)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable Codex session")
                }
            }
        }
        Ok(heads)
    }
}

impl Default for CodexPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolPlugin for CodexPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn default_data_dir(&self) -> Option<PathBuf> {
        Some(home_dir().join(".codex"))
    }

    async fn discover_projects(&self) -> Result<Vec<PluginProject>> {
        let mut by_cwd: HashMap<String, (usize, DateTime<Utc>)> = HashMap::new();
        for (path, mtime, head) in self.read_heads().await? {
            let Some(cwd) = head.cwd() else {
                tracing::debug!(path = %path.display(), "Codex session has no cwd");
                continue;
            };
            let entry = by_cwd.entry(cwd.to_string()).or_insert((0, mtime));
            entry.0 += 1;
            entry.1 = entry.1.max(mtime);
        }

        let projects = by_cwd
            .into_iter()
            .map(|(cwd, (session_count, last_activity))| {
                let resolved_path = PathBuf::from(&cwd);
                PluginProject {
                    plugin_id: PLUGIN_ID.to_string(),
                    display_name: display_name_for(&resolved_path),
                    native_id: cwd,
                    resolved_path,
                    session_count,
                    last_activity,
                }
            })
            .collect();
        Ok(projects)
    }

    async fn list_sessions(&self, native_id: &str) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for (path, mtime, head) in self.read_heads().await? {
            if head.cwd() != Some(native_id) {
                continue;
            }
            let Some(file_id) = session_id_from_path(&path) else {
                continue;
            };
            self.cache()
                .set_provider(&file_id, head.meta.provider.clone());

            sessions.push(SessionSummary {
                timestamp: head.timestamp().unwrap_or(mtime),
                session_id: file_id,
                slug: None,
                first_message: head.first_message.unwrap_or_default(),
                model: head.model,
                git_branch: head.meta.git.and_then(|g| g.branch),
                session_type: None,
                plugin_id: Some(PLUGIN_ID.to_string()),
            });
        }
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(sessions)
    }

    async fn load_session(&self, native_id: &str, session_id: &str) -> Result<Session> {
        let Some(path) = self.locate(session_id).await? else {
            tracing::debug!(session_id, "Codex session not found");
            return Ok(Session::empty(session_id, native_id));
        };

        let parsed = turns::parse_rollout(read_jsonl(&path).await?);
        if parsed.meta.cwd.as_deref().is_some_and(|cwd| cwd != native_id) {
            tracing::debug!(session_id, native_id, cwd = ?parsed.meta.cwd, "Codex session belongs to another project");
            return Ok(Session::empty(session_id, native_id));
        }
        Ok(Session {
            session_id: session_id.to_string(),
            project: parsed.meta.cwd.unwrap_or_else(|| native_id.to_string()),
            turns: parsed.turns,
            plugin_id: Some(PLUGIN_ID.to_string()),
            plan_session_id: None,
            impl_session_id: None,
            sub_agents: HashMap::new(),
        })
    }

    fn resume_command(&self, session_id: &str) -> Option<String> {
        Some(format!("codex resume {}", session_id))
    }

    fn session_badges(&self, summary: &SessionSummary) -> Vec<SessionBadge> {
        self.cache()
            .provider(&summary.session_id)
            .map(|provider| {
                vec![SessionBadge {
                    label: provider.to_string(),
                    variant: "provider".to_string(),
                }]
            })
            .unwrap_or_default()
    }
}
