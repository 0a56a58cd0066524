//! Claude Code JSONL source
//!
//! Reads session logs from `~/.claude/projects/[encoded-path]/*.jsonl`.
//! Sub-agent transcripts live next to their parent session in
//! `[session-id]/subagents/agent-[id].jsonl` (older releases wrote
//! `agent-[id].jsonl` directly into the project directory).
//!
//! # Error Handling
//!
//! - **Malformed JSON lines**: become a parse-error turn at their line
//!   number; parsing continues.
//! - **Unexpected record shapes**: same, with `invalid_structure`.
//! - **Missing directories or files**: empty results, never an error.
//! - **Unreadable project directories**: skipped during discovery; the
//!   remaining projects are still returned.
//! - **Unlistable sessions**: a file without a timestamp or a first user
//!   message in its head is left out of listings.

mod envelope;
mod metadata;
mod records;
mod turns;

use super::{is_safe_component, modified_utc};
use crate::classify::classify_session_types;
use crate::config::home_dir;
use crate::error::Result;
use crate::format::display_name_for;
use crate::ingest::plugin::ToolPlugin;
use crate::jsonl::read_jsonl;
use crate::types::{PluginProject, Session, SessionBadge, SessionSummary, SessionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metadata::read_session_head;
use std::path::{Path, PathBuf};
use turns::{parse_transcript, ParseOptions};

pub const PLUGIN_ID: &str = "claude-code";

/// Plugin for Claude Code session logs.
pub struct ClaudeCodePlugin {
    root: PathBuf,
}

impl ClaudeCodePlugin {
    /// Create a plugin with the default root path (~/.claude).
    pub fn new() -> Self {
        Self {
            root: home_dir().join(".claude"),
        }
    }

    /// Create a plugin with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn project_dir(&self, native_id: &str) -> Option<PathBuf> {
        if !is_safe_component(native_id) {
            tracing::warn!(native_id, "Rejecting Claude Code project id");
            return None;
        }
        Some(self.projects_dir().join(native_id))
    }

    /// Parse a sub-agent transcript spawned from `session_id`.
    ///
    /// The returned session carries the agent id as its `session_id`.
    pub async fn load_subagent(
        &self,
        native_id: &str,
        session_id: &str,
        agent_id: &str,
    ) -> Result<Session> {
        let empty = Session::empty(agent_id, native_id);
        let Some(project_dir) = self.project_dir(native_id) else {
            return Ok(empty);
        };
        if !is_safe_component(session_id) || !is_safe_component(agent_id) {
            return Ok(empty);
        }

        let file_name = format!("agent-{}.jsonl", agent_id);
        let candidates = [
            project_dir.join(session_id).join("subagents").join(&file_name),
            project_dir.join(&file_name),
        ];
        for path in candidates {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return self
                    .parse_file(&path, native_id, agent_id, ParseOptions { keep_sidechain: true })
                    .await;
            }
        }

        tracing::debug!(native_id, session_id, agent_id, "No sub-agent transcript found");
        Ok(empty)
    }

    async fn parse_file(
        &self,
        path: &Path,
        native_id: &str,
        session_id: &str,
        options: ParseOptions,
    ) -> Result<Session> {
        let lines = read_jsonl(path).await?;
        let parsed = parse_transcript(lines, options);
        let project = parsed
            .cwd
            .unwrap_or_else(|| decode_project_dir(native_id).to_string_lossy().to_string());

        Ok(Session {
            session_id: session_id.to_string(),
            project,
            turns: parsed.turns,
            plugin_id: Some(PLUGIN_ID.to_string()),
            plan_session_id: None,
            impl_session_id: None,
            sub_agents: parsed.sub_agents,
        })
    }
}

impl Default for ClaudeCodePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolPlugin for ClaudeCodePlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn default_data_dir(&self) -> Option<PathBuf> {
        Some(home_dir().join(".claude"))
    }

    async fn discover_projects(&self) -> Result<Vec<PluginProject>> {
        let mut dirs = match tokio::fs::read_dir(self.projects_dir()).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        loop {
            let entry = match dirs.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped reading Claude Code projects directory");
                    break;
                }
            };
            let path = entry.path();
            // Follows symlinked project directories
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable project entry");
                    continue;
                }
            }
            let Some(native_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let files = match session_files(&path).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable project directory");
                    continue;
                }
            };
            if files.is_empty() {
                continue;
            }

            let last_activity = files.iter().map(|(_, mtime)| *mtime).max();
            let mut resolved_path = None;
            for (path, _) in &files {
                match read_session_head(path).await {
                    Ok(head) => {
                        if let Some(cwd) = head.cwd {
                            resolved_path = Some(PathBuf::from(cwd));
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to read session head")
                    }
                }
            }
            let resolved_path = resolved_path.unwrap_or_else(|| decode_project_dir(&native_id));

            tracing::debug!(native_id, sessions = files.len(), "Discovered Claude Code project");
            projects.push(PluginProject {
                plugin_id: PLUGIN_ID.to_string(),
                display_name: display_name_for(&resolved_path),
                native_id,
                resolved_path,
                session_count: files.len(),
                last_activity: last_activity.unwrap_or_default(),
            });
        }

        Ok(projects)
    }

    async fn list_sessions(&self, native_id: &str) -> Result<Vec<SessionSummary>> {
        let Some(project_dir) = self.project_dir(native_id) else {
            return Ok(Vec::new());
        };
        if !tokio::fs::try_exists(&project_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let files = match session_files(&project_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(path = %project_dir.display(), error = %e, "Failed to list project directory");
                return Ok(Vec::new());
            }
        };

        let mut sessions = Vec::new();
        for (path, _) in files {
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };
            let head = match read_session_head(&path).await {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session");
                    continue;
                }
            };
            let (Some(timestamp), Some(first_message)) = (head.timestamp, head.first_message) else {
                tracing::debug!(session_id, "Session has no timestamp or first message");
                continue;
            };

            sessions.push(SessionSummary {
                session_id,
                timestamp,
                slug: head.slug,
                first_message,
                model: head.model,
                git_branch: head.git_branch,
                session_type: None,
                plugin_id: Some(PLUGIN_ID.to_string()),
            });
        }

        classify_session_types(&mut sessions);
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(sessions)
    }

    async fn load_session(&self, native_id: &str, session_id: &str) -> Result<Session> {
        let empty = Session::empty(session_id, native_id);
        let Some(project_dir) = self.project_dir(native_id) else {
            return Ok(empty);
        };
        if !is_safe_component(session_id) {
            return Ok(empty);
        }

        let path = project_dir.join(format!("{}.jsonl", session_id));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "Session file not found");
            return Ok(empty);
        }

        self.parse_file(&path, native_id, session_id, ParseOptions::default())
            .await
    }

    fn resume_command(&self, session_id: &str) -> Option<String> {
        Some(format!("claude --resume {}", session_id))
    }

    fn session_badges(&self, summary: &SessionSummary) -> Vec<SessionBadge> {
        match summary.session_type {
            Some(SessionType::Plan) => vec![SessionBadge {
                label: "Plan".to_string(),
                variant: SessionType::Plan.as_str().to_string(),
            }],
            Some(SessionType::Implementation) => vec![SessionBadge {
                label: "Implementation".to_string(),
                variant: SessionType::Implementation.as_str().to_string(),
            }],
            None => Vec::new(),
        }
    }
}

/// Session transcripts in a project directory, newest first.
///
/// Legacy `agent-*.jsonl` sub-agent files are not sessions.
async fn session_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Stopped reading project directory");
                break;
            }
        };
        let path = entry.path();
        let is_session = path.extension().is_some_and(|ext| ext == "jsonl")
            && !entry.file_name().to_string_lossy().starts_with("agent-");
        if !is_session {
            continue;
        }
        match modified_utc(&path).await {
            Ok(mtime) => files.push((path, mtime)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to stat session file"),
        }
    }
    files.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(files)
}

/// Reverse Claude Code's directory naming: `-` separates components and a
/// leading `-` marks an absolute path.
///
/// Lossy for paths that contain literal dashes; only used when no session
/// recorded a `cwd`.
pub(crate) fn decode_project_dir(name: &str) -> PathBuf {
    match name.strip_prefix('-') {
        Some(rest) => PathBuf::from(format!("/{}", rest.replace('-', "/"))),
        None => PathBuf::from(name.replace('-', "/")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write_lines(path: &Path, records: &[serde_json::Value]) {
        let text: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text.join("\n")).unwrap();
    }

    #[test]
    fn test_decode_project_dir() {
        assert_eq!(
            decode_project_dir("-home-user-dev-app"),
            PathBuf::from("/home/user/dev/app")
        );
        assert_eq!(decode_project_dir("work-app"), PathBuf::from("work/app"));
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = ClaudeCodePlugin::with_root(dir.path().join("nope"));
        assert!(plugin.discover_projects().await.unwrap().is_empty());
        assert!(plugin.list_sessions("-x").await.unwrap().is_empty());
        let session = plugin.load_session("-x", "abc").await.unwrap();
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = ClaudeCodePlugin::with_root(dir.path().to_path_buf());
        assert!(plugin.list_sessions("../etc").await.unwrap().is_empty());
        let session = plugin.load_session("-p", "../../secret").await.unwrap();
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn test_discover_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("projects/-tmp-demo");
        write_lines(
            &project.join("s1.jsonl"),
            &[json!({"type": "user", "timestamp": "2025-03-01T10:00:00Z", "cwd": "/tmp/demo", "slug": "quiet-fox", "message": {"content": "Implement the following plan:\n1. do it"}})],
        );
        write_lines(
            &project.join("s2.jsonl"),
            &[json!({"type": "user", "timestamp": "2025-02-01T10:00:00Z", "slug": "quiet-fox", "message": {"content": "plan a feature"}})],
        );
        // No first message: not listed
        write_lines(
            &project.join("s3.jsonl"),
            &[json!({"type": "summary", "summary": "x"})],
        );
        write_lines(&project.join("agent-123.jsonl"), &[json!({"type": "user"})]);

        let plugin = ClaudeCodePlugin::with_root(dir.path().to_path_buf());
        let projects = plugin.discover_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].native_id, "-tmp-demo");
        assert_eq!(projects[0].resolved_path, PathBuf::from("/tmp/demo"));
        assert_eq!(projects[0].display_name, "demo");
        assert_eq!(projects[0].session_count, 3);

        let sessions = plugin.list_sessions("-tmp-demo").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "s1");
        assert_eq!(sessions[0].session_type, Some(SessionType::Implementation));
        assert_eq!(sessions[1].session_type, Some(SessionType::Plan));
        assert_eq!(plugin.session_badges(&sessions[1])[0].label, "Plan");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_project_entry_does_not_hide_others() {
        let dir = tempfile::tempdir().unwrap();
        let projects_dir = dir.path().join("projects");
        write_lines(
            &projects_dir.join("-w-ok/s1.jsonl"),
            &[json!({"type": "user", "timestamp": "2025-03-01T10:00:00Z", "cwd": "/w/ok", "message": {"content": "hi"}})],
        );
        std::os::unix::fs::symlink(dir.path().join("gone"), projects_dir.join("-w-gone")).unwrap();
        std::os::unix::fs::symlink(projects_dir.join("-w-ok"), projects_dir.join("-w-linked")).unwrap();

        let plugin = ClaudeCodePlugin::with_root(dir.path().to_path_buf());
        let mut projects = plugin.discover_projects().await.unwrap();
        projects.sort_by(|a, b| a.native_id.cmp(&b.native_id));
        let ids: Vec<_> = projects.iter().map(|p| p.native_id.as_str()).collect();
        assert_eq!(ids, vec!["-w-linked", "-w-ok"]);

        assert!(plugin.list_sessions("-w-gone").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_subagent_prefers_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("projects/-p");
        let agent_line = json!({"type": "user", "isSidechain": true, "message": {"content": "sub task"}});
        write_lines(&project.join("s1/subagents/agent-ab12.jsonl"), &[agent_line]);
        write_lines(
            &project.join("agent-cd34.jsonl"),
            &[json!({"type": "user", "isSidechain": true, "message": {"content": "legacy"}})],
        );

        let plugin = ClaudeCodePlugin::with_root(dir.path().to_path_buf());
        let nested = plugin.load_subagent("-p", "s1", "ab12").await.unwrap();
        assert_eq!(nested.session_id, "ab12");
        assert_eq!(nested.turns[0].as_user().unwrap().text, "sub task");

        let legacy = plugin.load_subagent("-p", "s1", "cd34").await.unwrap();
        assert_eq!(legacy.turns[0].as_user().unwrap().text, "legacy");

        let missing = plugin.load_subagent("-p", "s1", "zz").await.unwrap();
        assert!(missing.turns.is_empty());
    }

    #[test]
    fn test_resume_command() {
        let plugin = ClaudeCodePlugin::with_root(PathBuf::from("/x"));
        assert_eq!(plugin.resume_command("abc").as_deref(), Some("claude --resume abc"));
    }
}
