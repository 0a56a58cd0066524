//! Read-only access to `opencode.db`.
//!
//! OpenCode has reshaped its schema across releases, so every query checks
//! which tables and columns exist first (`PRAGMA table_info`) and degrades
//! to coarser grouping instead of failing.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Messages scanned per session for a listing row.
pub(crate) const LISTING_MESSAGE_LIMIT: usize = 20;

pub(crate) fn open_readonly(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    // OpenCode may hold a write lock while it is running
    conn.busy_timeout(Duration::from_millis(250))?;
    Ok(conn)
}

/// Column value as text; `None` for NULL, numbers and non-UTF-8 blobs.
fn text_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            std::str::from_utf8(bytes).ok().map(str::to_string)
        }
        _ => None,
    }
}

/// Column value as integer milliseconds; `None` for anything else.
fn millis_value(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(n) => Some(n),
        ValueRef::Real(f) => Some(f as i64),
        _ => None,
    }
}

fn columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

/// How sessions are grouped into projects for this schema revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grouping {
    /// `project.worktree`, keyed by project id
    Project,
    /// `session.directory`
    Directory,
    /// `session.project_id` without a usable project table
    ProjectId,
}

/// Tables and columns present in the opened database.
#[derive(Debug, Clone)]
pub(crate) struct Schema {
    pub grouping: Grouping,
    session: HashSet<String>,
    part: HashSet<String>,
}

impl Schema {
    /// `None` when there is no session table at all.
    pub fn introspect(conn: &Connection) -> rusqlite::Result<Option<Self>> {
        let session = columns(conn, "session")?;
        if !session.contains("id") {
            return Ok(None);
        }
        let project = columns(conn, "project")?;
        let grouping = if project.contains("worktree") && session.contains("project_id") {
            Grouping::Project
        } else if session.contains("directory") {
            Grouping::Directory
        } else if session.contains("project_id") {
            Grouping::ProjectId
        } else {
            return Ok(None);
        };
        Ok(Some(Self {
            grouping,
            session,
            part: columns(conn, "part")?,
        }))
    }

    fn session_col(&self, name: &str) -> String {
        if self.session.contains(name) {
            format!("s.{}", name)
        } else {
            "NULL".to_string()
        }
    }

    fn session_updated(&self) -> String {
        match (
            self.session.contains("time_updated"),
            self.session.contains("time_created"),
        ) {
            (true, true) => "COALESCE(s.time_updated, s.time_created)".to_string(),
            (true, false) => "s.time_updated".to_string(),
            (false, true) => "s.time_created".to_string(),
            (false, false) => "0".to_string(),
        }
    }

    fn group_filter(&self) -> &'static str {
        match self.grouping {
            Grouping::Project | Grouping::ProjectId => "s.project_id = ?1",
            Grouping::Directory => "s.directory = ?1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectRow {
    pub native_id: String,
    pub path: String,
    pub session_count: usize,
    pub last_updated_ms: i64,
}

pub(crate) fn query_projects(conn: &Connection, schema: &Schema) -> rusqlite::Result<Vec<ProjectRow>> {
    let updated = schema.session_updated();
    let sql = match schema.grouping {
        Grouping::Project => format!(
            "SELECT p.id, COALESCE(NULLIF(p.worktree, ''), MAX({dir}), p.id), COUNT(s.id), MAX({updated})
             FROM project p JOIN session s ON s.project_id = p.id
             GROUP BY p.id",
            dir = schema.session_col("directory"),
            updated = updated,
        ),
        Grouping::Directory => format!(
            "SELECT s.directory, s.directory, COUNT(s.id), MAX({updated})
             FROM session s WHERE s.directory IS NOT NULL
             GROUP BY s.directory",
            updated = updated,
        ),
        Grouping::ProjectId => format!(
            "SELECT s.project_id, s.project_id, COUNT(s.id), MAX({updated})
             FROM session s WHERE s.project_id IS NOT NULL
             GROUP BY s.project_id",
            updated = updated,
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ProjectRow {
                native_id: row.get(0)?,
                path: row.get(1)?,
                session_count: row.get::<_, i64>(2)?.max(0) as usize,
                last_updated_ms: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            })
        })?
        .collect();
    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionRow {
    pub id: String,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub time_created_ms: i64,
}

pub(crate) fn query_sessions(
    conn: &Connection,
    schema: &Schema,
    native_id: &str,
) -> rusqlite::Result<Vec<SessionRow>> {
    let created = if schema.session.contains("time_created") {
        "s.time_created".to_string()
    } else {
        schema.session_updated()
    };
    let sql = format!(
        "SELECT s.id, {title}, {slug}, {created} FROM session s WHERE {filter} ORDER BY {created} DESC",
        title = schema.session_col("title"),
        slug = schema.session_col("slug"),
        created = created,
        filter = schema.group_filter(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([native_id], |row| {
            Ok(SessionRow {
                id: row.get(0)?,
                title: text_value(row.get_ref(1)?),
                slug: text_value(row.get_ref(2)?),
                time_created_ms: millis_value(row.get_ref(3)?).unwrap_or(0),
            })
        })?
        .collect();
    rows
}

/// Session directory (or project worktree) for a session.
pub(crate) fn query_session_path(
    conn: &Connection,
    schema: &Schema,
    session_id: &str,
) -> rusqlite::Result<Option<String>> {
    let sql = format!(
        "SELECT {dir} FROM session s WHERE s.id = ?1",
        dir = schema.session_col("directory")
    );
    conn.query_row(&sql, [session_id], |row| row.get::<_, Option<String>>(0))
        .optional()
        .map(Option::flatten)
}

/// One message row; `data` is left undecoded and is `None` when the
/// column holds no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageRow {
    pub id: String,
    pub time_created_ms: Option<i64>,
    pub data: Option<String>,
}

pub(crate) fn query_messages(
    conn: &Connection,
    session_id: &str,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<MessageRow>> {
    let limit = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let sql = format!(
        "SELECT id, time_created, data FROM message WHERE session_id = ?1 ORDER BY time_created ASC, id ASC{}",
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([session_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                time_created_ms: millis_value(row.get_ref(1)?),
                data: text_value(row.get_ref(2)?),
            })
        })?
        .collect();
    rows
}

/// Raw part payloads of one message, in creation order.
///
/// Rows whose `data` is not text are skipped.
pub(crate) fn query_parts(
    conn: &Connection,
    schema: &Schema,
    message_id: &str,
) -> rusqlite::Result<Vec<String>> {
    let order = if schema.part.contains("time_created") {
        "time_created ASC, id ASC"
    } else {
        "id ASC"
    };
    let sql = format!(
        "SELECT id, data FROM part WHERE message_id = ?1 ORDER BY {}",
        order
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([message_id], |row| {
            Ok((text_value(row.get_ref(0)?), text_value(row.get_ref(1)?)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let parts = rows
        .into_iter()
        .filter_map(|(part_id, data)| {
            if data.is_none() {
                tracing::warn!(message_id, part_id = ?part_id, "Skipping OpenCode part without data");
            }
            data
        })
        .collect();
    Ok(parts)
}
