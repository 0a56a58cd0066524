//! Plugin trait abstraction
//!
//! Every supported source implements [`ToolPlugin`] so the registry can
//! discover projects, list sessions and load transcripts without knowing
//! the source's on-disk format.
//!
//! ## Design Principles
//!
//! 1. **Read-only**: source logs are never written
//! 2. **Resilience**: a malformed record becomes a parse-error turn or is
//!    skipped; it never aborts the call
//! 3. **Missing data is empty data**: an absent directory or database
//!    yields `Ok(vec![])`, not an error
//! 4. **Extensible**: a new source only requires implementing this trait

use crate::error::Result;
use crate::types::{PluginProject, Session, SessionBadge, SessionSummary};
use async_trait::async_trait;
use std::path::PathBuf;

/// Capability surface implemented once per source tool.
///
/// ## Example
///
/// ```rust,ignore
/// use polylog_core::ingest::ToolPlugin;
///
/// struct MyPlugin;
///
/// #[async_trait::async_trait]
/// impl ToolPlugin for MyPlugin {
///     fn id(&self) -> &'static str { "my-tool" }
///     // ... implement other methods
/// }
/// ```
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Stable identifier, also used as the composite session id prefix
    fn id(&self) -> &'static str;

    /// Human-readable source name
    fn display_name(&self) -> &'static str;

    /// Default data directory for this source (e.g. `~/.claude`)
    ///
    /// Returns `None` if the path cannot be determined (e.g. $HOME not set).
    fn default_data_dir(&self) -> Option<PathBuf>;

    /// Enumerate the projects this source knows about.
    async fn discover_projects(&self) -> Result<Vec<PluginProject>>;

    /// List sessions for one of this source's projects.
    async fn list_sessions(&self, native_id: &str) -> Result<Vec<SessionSummary>>;

    /// Fully parse one session into turns.
    async fn load_session(&self, native_id: &str, session_id: &str) -> Result<Session>;

    /// Shell command that resumes the session in its own tool.
    fn resume_command(&self, _session_id: &str) -> Option<String> {
        None
    }

    /// Labels to display next to a session in listings.
    fn session_badges(&self, _summary: &SessionSummary) -> Vec<SessionBadge> {
        Vec::new()
    }
}
