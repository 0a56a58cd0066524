//! Source-specific plugins
//!
//! Each supported tool has a module implementing
//! [`ToolPlugin`](super::ToolPlugin).
//!
//! ## Supported Sources
//!
//! | Source | Module | Storage |
//! |--------|--------|---------|
//! | Claude Code | [`claude`] | JSONL per session |
//! | Codex | [`codex`] | JSONL event stream per session |
//! | OpenCode | [`opencode`] | SQLite |

pub mod claude;
pub mod codex;
pub mod opencode;

pub use claude::ClaudeCodePlugin;
pub use codex::CodexPlugin;
pub use opencode::OpenCodePlugin;

use super::ToolPlugin;
use crate::config::Config;
use crate::format::system_time_to_utc;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Create every plugin that is not disabled in `config`.
///
/// Path overrides from `[sources]` replace the default data directories.
/// Use this to fill a [`PluginRegistry`](super::PluginRegistry).
pub fn create_all_plugins(config: &Config) -> Vec<Arc<dyn ToolPlugin>> {
    let sources = &config.sources;
    let mut plugins: Vec<Arc<dyn ToolPlugin>> = Vec::new();

    if !sources.is_disabled(claude::PLUGIN_ID) {
        plugins.push(Arc::new(match &sources.claude_code_path {
            Some(root) => ClaudeCodePlugin::with_root(root.clone()),
            None => ClaudeCodePlugin::new(),
        }));
    }
    if !sources.is_disabled(codex::PLUGIN_ID) {
        plugins.push(Arc::new(match &sources.codex_path {
            Some(root) => CodexPlugin::with_root(root.clone()),
            None => CodexPlugin::new(),
        }));
    }
    if !sources.is_disabled(opencode::PLUGIN_ID) {
        plugins.push(Arc::new(match &sources.opencode_path {
            Some(dir) => OpenCodePlugin::with_data_dir(dir.clone()),
            None => OpenCodePlugin::new(),
        }));
    }

    tracing::debug!(
        count = plugins.len(),
        disabled = ?sources.disabled,
        "Created source plugins"
    );
    plugins
}

/// Whether `name` can be joined onto a data directory as a single entry.
pub(crate) fn is_safe_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Modification time of `path` in UTC.
pub(crate) async fn modified_utc(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(system_time_to_utc(modified))
}
