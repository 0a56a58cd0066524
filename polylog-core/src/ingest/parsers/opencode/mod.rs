//! OpenCode source
//!
//! Reads the SQLite store at `$XDG_DATA_HOME/opencode/opencode.db`
//! (default `~/.local/share/opencode/opencode.db`). The database is opened
//! read-only on a blocking thread for each call and closed before the call
//! returns.
//!
//! # Error Handling
//!
//! - **Missing, unreadable or unfamiliar database**: empty results.
//! - **Undecodable message rows**: parse-error turns numbered by row.
//! - **Message rows without data**: parse-error turns too.
//! - **Undecodable or empty part rows**: skipped.
//! - **Sessions whose messages cannot be read**: left out of listings.

mod store;
mod turns;

use crate::classify::classify_session_types;
use crate::config::xdg_data_home;
use crate::error::Result;
use crate::format::{display_name_for, listing_text, millis_to_utc};
use crate::ingest::plugin::ToolPlugin;
use crate::types::{PluginProject, Session, SessionSummary};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use store::{Schema, LISTING_MESSAGE_LIMIT};
use turns::{build_turns, decode_parts, user_text};

pub const PLUGIN_ID: &str = "opencode";

const DB_FILE: &str = "opencode.db";

/// Plugin for the OpenCode session store.
pub struct OpenCodePlugin {
    data_dir: PathBuf,
}

impl OpenCodePlugin {
    /// Create a plugin reading the default data directory.
    pub fn new() -> Self {
        Self {
            data_dir: xdg_data_home().join("opencode"),
        }
    }

    /// Create a plugin reading `opencode.db` from `data_dir` (for testing).
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Run `f` against the database on a blocking thread.
    ///
    /// Yields `T::default()` when the file is missing, unreadable, or has no
    /// usable session table.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Default + Send + 'static,
        F: FnOnce(&Connection, &Schema) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.db_path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "OpenCode database not found");
            return Ok(T::default());
        }

        let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<T> {
            let conn = store::open_readonly(&path)?;
            match Schema::introspect(&conn)? {
                Some(schema) => f(&conn, &schema),
                None => {
                    tracing::warn!(path = %path.display(), "OpenCode database has no usable session table");
                    Ok(T::default())
                }
            }
        })
        .await?;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(path = %self.db_path().display(), error = %e, "OpenCode query failed");
                Ok(T::default())
            }
        }
    }
}

impl Default for OpenCodePlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// First user text and first assistant model among listing rows.
fn listing_fields(conn: &Connection, schema: &Schema, session_id: &str) -> rusqlite::Result<(Option<String>, Option<String>)> {
    let mut first_message = None;
    let mut model = None;
    for row in store::query_messages(conn, session_id, Some(LISTING_MESSAGE_LIMIT))? {
        let Some(Ok(data)) = row.data.as_deref().map(serde_json::from_str::<Value>) else {
            continue;
        };
        match data.get("role").and_then(Value::as_str) {
            Some("user") if first_message.is_none() => {
                let parts = decode_parts(&store::query_parts(conn, schema, &row.id)?);
                let text = listing_text(&user_text(&parts));
                if !text.is_empty() {
                    first_message = Some(text);
                }
            }
            Some("assistant") if model.is_none() => {
                model = data.get("modelID").and_then(Value::as_str).map(str::to_string);
            }
            _ => {}
        }
        if first_message.is_some() && model.is_some() {
            break;
        }
    }
    Ok((first_message, model))
}

#[async_trait]
impl ToolPlugin for OpenCodePlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "OpenCode"
    }

    fn default_data_dir(&self) -> Option<PathBuf> {
        Some(xdg_data_home().join("opencode"))
    }

    async fn discover_projects(&self) -> Result<Vec<PluginProject>> {
        let rows = self
            .with_db(|conn, schema| store::query_projects(conn, schema))
            .await?;

        let projects = rows
            .into_iter()
            .filter(|row| row.session_count > 0)
            .map(|row| {
                let resolved_path = PathBuf::from(&row.path);
                PluginProject {
                    plugin_id: PLUGIN_ID.to_string(),
                    native_id: row.native_id,
                    display_name: display_name_for(&resolved_path),
                    resolved_path,
                    session_count: row.session_count,
                    last_activity: millis_to_utc(row.last_updated_ms).unwrap_or_default(),
                }
            })
            .collect();
        Ok(projects)
    }

    async fn list_sessions(&self, native_id: &str) -> Result<Vec<SessionSummary>> {
        let native_id = native_id.to_string();
        self.with_db(move |conn, schema| {
            let mut sessions = Vec::new();
            for row in store::query_sessions(conn, schema, &native_id)? {
                let (first_message, model) = match listing_fields(conn, schema, &row.id) {
                    Ok(fields) => fields,
                    Err(e) => {
                        tracing::warn!(session_id = %row.id, error = %e, "Skipping unreadable OpenCode session");
                        continue;
                    }
                };
                sessions.push(SessionSummary {
                    session_id: row.id,
                    timestamp: millis_to_utc(row.time_created_ms).unwrap_or_default(),
                    slug: row.slug,
                    first_message: first_message
                        .or_else(|| row.title.as_deref().map(listing_text))
                        .unwrap_or_default(),
                    model,
                    git_branch: None,
                    session_type: None,
                    plugin_id: Some(PLUGIN_ID.to_string()),
                });
            }
            classify_session_types(&mut sessions);
            sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(sessions)
        })
        .await
    }

    async fn load_session(&self, native_id: &str, session_id: &str) -> Result<Session> {
        let id = session_id.to_string();
        let (rows, directory) = self
            .with_db(move |conn, schema| {
                let mut rows = Vec::new();
                for message in store::query_messages(conn, &id, None)? {
                    let parts = store::query_parts(conn, schema, &message.id).unwrap_or_else(|e| {
                        tracing::warn!(message_id = %message.id, error = %e, "Failed to read OpenCode parts");
                        Vec::new()
                    });
                    rows.push((message, parts));
                }
                let directory = store::query_session_path(conn, schema, &id)?;
                Ok((rows, directory))
            })
            .await?;

        Ok(Session {
            session_id: session_id.to_string(),
            project: directory.unwrap_or_else(|| native_id.to_string()),
            turns: build_turns(rows),
            plugin_id: Some(PLUGIN_ID.to_string()),
            plan_session_id: None,
            impl_session_id: None,
            sub_agents: HashMap::new(),
        })
    }

    fn resume_command(&self, session_id: &str) -> Option<String> {
        Some(format!("opencode --session {}", session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INTERRUPTED_TOOL_RESULT;
    use serde_json::json;

    fn seed(dir: &std::path::Path) {
        let conn = Connection::open(dir.join(DB_FILE)).unwrap();
        conn.execute_batch(
            "CREATE TABLE project (id TEXT PRIMARY KEY, worktree TEXT, name TEXT, time_created INTEGER, time_updated INTEGER);
             CREATE TABLE session (id TEXT PRIMARY KEY, project_id TEXT, directory TEXT, title TEXT, slug TEXT, time_created INTEGER, time_updated INTEGER);
             CREATE TABLE message (id TEXT PRIMARY KEY, session_id TEXT, time_created INTEGER, data TEXT);
             CREATE TABLE part (id TEXT PRIMARY KEY, message_id TEXT, session_id TEXT, data TEXT);
             INSERT INTO project VALUES ('p1', '/w/site', 'site', 1, 1);
             INSERT INTO session VALUES ('ses_1', 'p1', '/w/site', 'Fix header', 'brisk-elk', 1700000000000, 1700000100000);
             INSERT INTO session VALUES ('ses_2', 'p1', '/w/site', 'Untitled', NULL, 1700000200000, 1700000300000);",
        )
        .unwrap();

        let messages = [
            ("msg_1", "ses_1", 1700000000001_i64, json!({"role": "user"})),
            ("msg_2", "ses_1", 1700000000002, json!({"role": "assistant", "modelID": "claude-sonnet-4"})),
        ];
        for (id, session, ts, data) in messages {
            conn.execute(
                "INSERT INTO message VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, session, ts, data.to_string()],
            )
            .unwrap();
        }
        let parts = [
            ("prt_1", "msg_1", json!({"type": "text", "text": "The header overlaps"})),
            ("prt_2", "msg_2", json!({"type": "tool", "callID": "call_1", "tool": "bash", "state": {"status": "running", "input": {"command": "npm test"}}})),
        ];
        for (id, message, data) in parts {
            conn.execute(
                "INSERT INTO part VALUES (?1, ?2, 'ses_1', ?3)",
                rusqlite::params![id, message, data.to_string()],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_discover_list_load() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let plugin = OpenCodePlugin::with_data_dir(dir.path().to_path_buf());

        let projects = plugin.discover_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].native_id, "p1");
        assert_eq!(projects[0].resolved_path, PathBuf::from("/w/site"));
        assert_eq!(projects[0].session_count, 2);
        assert_eq!(projects[0].last_activity.timestamp_millis(), 1700000300000);

        let sessions = plugin.list_sessions("p1").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "ses_2");
        assert_eq!(sessions[0].first_message, "Untitled");
        assert_eq!(sessions[1].first_message, "The header overlaps");
        assert_eq!(sessions[1].model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(sessions[1].slug.as_deref(), Some("brisk-elk"));

        let session = plugin.load_session("p1", "ses_1").await.unwrap();
        assert_eq!(session.project, "/w/site");
        assert_eq!(session.turns.len(), 2);
        let call = session.turns[1].as_assistant().unwrap().content_blocks[0]
            .as_tool_call()
            .unwrap()
            .clone();
        assert_eq!(call.result, INTERRUPTED_TOOL_RESULT);
        assert!(call.is_error);
    }

    #[tokio::test]
    async fn test_missing_database_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = OpenCodePlugin::with_data_dir(dir.path().to_path_buf());
        assert!(plugin.discover_projects().await.unwrap().is_empty());
        assert!(plugin.list_sessions("p1").await.unwrap().is_empty());
        assert!(plugin.load_session("p1", "ses_1").await.unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_database_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DB_FILE), b"not a sqlite file at all").unwrap();
        let plugin = OpenCodePlugin::with_data_dir(dir.path().to_path_buf());
        assert!(plugin.discover_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_rows_only_affect_themselves() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let conn = Connection::open(dir.path().join(DB_FILE)).unwrap();
        conn.execute_batch(
            "INSERT INTO message VALUES ('msg_3', 'ses_2', 1700000200001, '{\"role\":\"user\"}');
             INSERT INTO message VALUES ('msg_4', 'ses_2', 1700000200002, NULL);
             INSERT INTO part VALUES ('prt_3', 'msg_3', 'ses_2', NULL);
             INSERT INTO part VALUES ('prt_4', 'msg_3', 'ses_2', '{\"type\":\"text\",\"text\":\"Shrink the logo\"}');",
        )
        .unwrap();
        drop(conn);
        let plugin = OpenCodePlugin::with_data_dir(dir.path().to_path_buf());

        let sessions = plugin.list_sessions("p1").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "ses_2");
        assert_eq!(sessions[0].first_message, "Shrink the logo");

        let session = plugin.load_session("p1", "ses_2").await.unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].as_user().unwrap().text, "Shrink the logo");
        let missing = session.turns[1].as_parse_error().unwrap();
        assert_eq!(missing.line_number, 2);
        assert_eq!(missing.error_type, crate::types::ParseErrorType::InvalidStructure);

        let untouched = plugin.load_session("p1", "ses_1").await.unwrap();
        assert_eq!(untouched.turns.len(), 2);
    }

    #[test]
    fn test_resume_command() {
        let plugin = OpenCodePlugin::with_data_dir(PathBuf::from("/x"));
        assert_eq!(
            plugin.resume_command("ses_1").as_deref(),
            Some("opencode --session ses_1")
        );
    }
}
