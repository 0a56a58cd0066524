//! Discovery and loading across every registered source
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Source Logs    │ ──► │  ToolPlugin      │ ──► │ PluginRegistry  │
//! │ (~/.claude/...) │     │  ├─ claude-code  │     │ merge by path   │
//! │ (~/.codex/...)  │     │  ├─ codex        │     │ composite ids   │
//! │ (opencode.db)   │     │  └─ opencode     │     │ plan/impl links │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use polylog_core::Config;
//! use polylog_core::ingest::{parsers, PluginRegistry};
//!
//! let registry = PluginRegistry::with_plugins(parsers::create_all_plugins(&Config::load()?));
//! for project in registry.discover_all_projects().await {
//!     let sessions = registry.list_all_sessions(&project).await;
//!     println!("{}: {} sessions", project.display_name, sessions.len());
//! }
//! ```

pub mod parsers;
mod plugin;
pub(crate) mod transcript;

pub use plugin::ToolPlugin;

use crate::classify::{classify_session_types, counterpart};
use crate::error::{Error, Result};
use crate::types::{MergedProject, ProjectSource, Session, SessionSummary, SessionType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Separator between plugin id and source-local session id.
pub const SESSION_ID_SEPARATOR: &str = "::";

/// Registered source plugins, in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn ToolPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `plugins`.
    pub fn with_plugins(plugins: impl IntoIterator<Item = Arc<dyn ToolPlugin>>) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry
    }

    /// Add a plugin, replacing any plugin with the same id.
    pub fn register(&mut self, plugin: Arc<dyn ToolPlugin>) {
        match self.plugins.iter_mut().find(|p| p.id() == plugin.id()) {
            Some(existing) => {
                tracing::debug!(plugin = plugin.id(), "Replacing registered plugin");
                *existing = plugin;
            }
            None => self.plugins.push(plugin),
        }
    }

    /// Look up a plugin by id.
    pub fn get_plugin(&self, plugin_id: &str) -> Result<Arc<dyn ToolPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.id() == plugin_id)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(plugin_id.to_string()))
    }

    pub fn all_plugins(&self) -> &[Arc<dyn ToolPlugin>] {
        &self.plugins
    }

    /// Discover projects from every plugin and merge them by path.
    ///
    /// A plugin that fails is logged and left out. Results are sorted by
    /// last activity, newest first.
    pub async fn discover_all_projects(&self) -> Vec<MergedProject> {
        let mut merged: Vec<MergedProject> = Vec::new();
        let mut by_path: HashMap<PathBuf, usize> = HashMap::new();

        for plugin in &self.plugins {
            let projects = match plugin.discover_projects().await {
                Ok(projects) => projects,
                Err(e) => {
                    tracing::warn!(plugin = plugin.id(), error = %e, "Failed to discover projects");
                    continue;
                }
            };
            tracing::debug!(plugin = plugin.id(), count = projects.len(), "Discovered projects");

            for project in projects {
                let source = ProjectSource {
                    plugin_id: project.plugin_id,
                    native_id: project.native_id,
                };
                match by_path.get(&project.resolved_path) {
                    Some(&index) => {
                        let entry = &mut merged[index];
                        entry.session_count += project.session_count;
                        entry.last_activity = entry.last_activity.max(project.last_activity);
                        entry.sources.push(source);
                    }
                    None => {
                        by_path.insert(project.resolved_path.clone(), merged.len());
                        merged.push(MergedProject {
                            encoded_path: encode_path(&project.resolved_path),
                            resolved_path: project.resolved_path,
                            display_name: project.display_name,
                            session_count: project.session_count,
                            last_activity: project.last_activity,
                            sources: vec![source],
                        });
                    }
                }
            }
        }

        merged.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.resolved_path.cmp(&b.resolved_path))
        });
        merged
    }

    /// Find a merged project by its encoded path.
    pub async fn find_project(&self, encoded_path: &str) -> Option<MergedProject> {
        self.discover_all_projects()
            .await
            .into_iter()
            .find(|p| p.encoded_path == encoded_path)
    }

    /// List sessions from every source of `project`.
    ///
    /// Session ids are rewritten to `<plugin>::<id>`. A failing source is
    /// logged and left out. Results are sorted newest first.
    pub async fn list_all_sessions(&self, project: &MergedProject) -> Vec<SessionSummary> {
        let mut all = Vec::new();

        for source in &project.sources {
            let plugin = match self.get_plugin(&source.plugin_id) {
                Ok(plugin) => plugin,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping project source");
                    continue;
                }
            };
            match plugin.list_sessions(&source.native_id).await {
                Ok(sessions) => {
                    all.extend(sessions.into_iter().map(|mut s| {
                        s.session_id = composite_id(plugin.id(), &s.session_id);
                        s.plugin_id = Some(plugin.id().to_string());
                        s
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        plugin = plugin.id(),
                        native_id = %source.native_id,
                        error = %e,
                        "Failed to list sessions"
                    );
                }
            }
        }

        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// Load one session of `project` by composite id.
    ///
    /// The returned session carries the composite id and, when the source's
    /// listing pairs it with a plan or implementation session, the
    /// counterpart's composite id.
    pub async fn load_session(&self, project: &MergedProject, session_id: &str) -> Result<Session> {
        let (plugin_id, native_session_id) = parse_session_id(session_id)?;
        let plugin = self.get_plugin(plugin_id)?;
        let source = project
            .sources
            .iter()
            .find(|s| s.plugin_id == plugin_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let mut session = plugin
            .load_session(&source.native_id, native_session_id)
            .await?;
        session.session_id = session_id.to_string();
        session.plugin_id = Some(plugin_id.to_string());

        match plugin.list_sessions(&source.native_id).await {
            Ok(mut sessions) => {
                classify_session_types(&mut sessions);
                let pair = sessions
                    .iter()
                    .find(|s| s.session_id == native_session_id)
                    .and_then(|summary| Some((summary.session_type?, counterpart(summary, &sessions)?)));
                match pair {
                    Some((SessionType::Plan, other)) => {
                        session.impl_session_id = Some(composite_id(plugin_id, &other.session_id));
                    }
                    Some((SessionType::Implementation, other)) => {
                        session.plan_session_id = Some(composite_id(plugin_id, &other.session_id));
                    }
                    None => {}
                }
            }
            Err(e) => {
                tracing::warn!(plugin = plugin_id, error = %e, "Failed to list sessions for cross-links");
            }
        }

        Ok(session)
    }
}

/// URL-safe id for a project path.
///
/// Every separator becomes `-`; absolute paths get a leading `-`.
pub fn encode_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    let body = text.trim_start_matches(['/', '\\']).replace(['/', '\\'], "-");
    if path.has_root() {
        format!("-{}", body)
    } else {
        body
    }
}

fn composite_id(plugin_id: &str, session_id: &str) -> String {
    format!("{}{}{}", plugin_id, SESSION_ID_SEPARATOR, session_id)
}

/// Split `<plugin>::<id>` into its parts.
pub fn parse_session_id(composite: &str) -> Result<(&str, &str)> {
    match composite.split_once(SESSION_ID_SEPARATOR) {
        Some((plugin, id)) if !plugin.is_empty() && !id.is_empty() => Ok((plugin, id)),
        _ => Err(Error::InvalidSessionId(composite.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PluginProject, SessionBadge};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn summary(id: &str, secs: i64, slug: Option<&str>, first: &str) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            timestamp: at(secs),
            slug: slug.map(str::to_string),
            first_message: first.to_string(),
            model: None,
            git_branch: None,
            session_type: None,
            plugin_id: None,
        }
    }

    struct FakePlugin {
        id: &'static str,
        projects: Vec<(&'static str, &'static str, usize, i64)>,
        sessions: Vec<SessionSummary>,
        fail: bool,
    }

    impl FakePlugin {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                projects: Vec::new(),
                sessions: Vec::new(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ToolPlugin for FakePlugin {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            "Fake"
        }

        fn default_data_dir(&self) -> Option<PathBuf> {
            None
        }

        async fn discover_projects(&self) -> Result<Vec<PluginProject>> {
            if self.fail {
                return Err(Error::Config("broken".to_string()));
            }
            Ok(self
                .projects
                .iter()
                .map(|&(native_id, path, count, secs)| PluginProject {
                    plugin_id: self.id.to_string(),
                    native_id: native_id.to_string(),
                    resolved_path: PathBuf::from(path),
                    display_name: "p".to_string(),
                    session_count: count,
                    last_activity: at(secs),
                })
                .collect())
        }

        async fn list_sessions(&self, _native_id: &str) -> Result<Vec<SessionSummary>> {
            if self.fail {
                return Err(Error::Config("broken".to_string()));
            }
            Ok(self.sessions.clone())
        }

        async fn load_session(&self, native_id: &str, session_id: &str) -> Result<Session> {
            Ok(Session::empty(session_id, native_id))
        }

        fn session_badges(&self, _summary: &SessionSummary) -> Vec<SessionBadge> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_merge_by_resolved_path() {
        let mut a = FakePlugin::new("a");
        a.projects = vec![("na", "/w/app", 2, 100), ("nx", "/w/other", 1, 50)];
        let mut b = FakePlugin::new("b");
        b.projects = vec![("nb", "/w/app", 3, 300)];

        let registry = PluginRegistry::with_plugins([
            Arc::new(a) as Arc<dyn ToolPlugin>,
            Arc::new(b) as Arc<dyn ToolPlugin>,
        ]);
        let projects = registry.discover_all_projects().await;

        assert_eq!(projects.len(), 2);
        let app = &projects[0];
        assert_eq!(app.resolved_path, PathBuf::from("/w/app"));
        assert_eq!(app.encoded_path, "-w-app");
        assert_eq!(app.session_count, 5);
        assert_eq!(app.last_activity, at(300));
        assert_eq!(app.sources.len(), 2);
        assert_eq!(projects[1].session_count, 1);
    }

    #[tokio::test]
    async fn test_failing_plugin_is_skipped() {
        let mut good = FakePlugin::new("good");
        good.projects = vec![("n", "/w/app", 1, 10)];
        good.sessions = vec![summary("s1", 10, None, "hi")];
        let mut bad = FakePlugin::new("bad");
        bad.fail = true;

        let registry = PluginRegistry::with_plugins([
            Arc::new(bad) as Arc<dyn ToolPlugin>,
            Arc::new(good) as Arc<dyn ToolPlugin>,
        ]);
        let projects = registry.discover_all_projects().await;
        assert_eq!(projects.len(), 1);

        let mut project = projects[0].clone();
        project.sources.push(ProjectSource {
            plugin_id: "bad".to_string(),
            native_id: "n".to_string(),
        });
        let sessions = registry.list_all_sessions(&project).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "good::s1");
        assert_eq!(sessions[0].plugin_id.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_sessions_sorted_across_sources() {
        let mut a = FakePlugin::new("a");
        a.projects = vec![("n", "/w/app", 2, 10)];
        a.sessions = vec![summary("old", 10, None, "x"), summary("new", 30, None, "y")];
        let mut b = FakePlugin::new("b");
        b.projects = vec![("n", "/w/app", 1, 20)];
        b.sessions = vec![summary("mid", 20, None, "z")];

        let registry = PluginRegistry::with_plugins([
            Arc::new(a) as Arc<dyn ToolPlugin>,
            Arc::new(b) as Arc<dyn ToolPlugin>,
        ]);
        let project = registry.find_project("-w-app").await.unwrap();
        let ids: Vec<_> = registry
            .list_all_sessions(&project)
            .await
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["a::new", "b::mid", "a::old"]);
    }

    #[tokio::test]
    async fn test_load_session_links_plan_and_implementation() {
        let mut a = FakePlugin::new("a");
        a.projects = vec![("n", "/w/app", 2, 10)];
        a.sessions = vec![
            summary("impl", 20, Some("calm-owl"), "Implement the following plan:\n1. x"),
            summary("plan", 10, Some("calm-owl"), "design x"),
        ];
        let registry = PluginRegistry::with_plugins([Arc::new(a) as Arc<dyn ToolPlugin>]);
        let project = registry.find_project("-w-app").await.unwrap();

        let plan = registry.load_session(&project, "a::plan").await.unwrap();
        assert_eq!(plan.session_id, "a::plan");
        assert_eq!(plan.impl_session_id.as_deref(), Some("a::impl"));
        assert_eq!(plan.plan_session_id, None);

        let implementation = registry.load_session(&project, "a::impl").await.unwrap();
        assert_eq!(implementation.plan_session_id.as_deref(), Some("a::plan"));
    }

    #[tokio::test]
    async fn test_load_session_errors() {
        let mut a = FakePlugin::new("a");
        a.projects = vec![("n", "/w/app", 1, 10)];
        let registry = PluginRegistry::with_plugins([Arc::new(a) as Arc<dyn ToolPlugin>]);
        let project = registry.find_project("-w-app").await.unwrap();

        assert!(matches!(
            registry.load_session(&project, "plain-id").await,
            Err(Error::InvalidSessionId(_))
        ));
        assert!(matches!(
            registry.load_session(&project, "zzz::s").await,
            Err(Error::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(FakePlugin::new("a")));
        registry.register(Arc::new(FakePlugin::new("a")));
        assert_eq!(registry.all_plugins().len(), 1);
        assert!(registry.get_plugin("a").is_ok());
        assert!(matches!(
            registry.get_plugin("b"),
            Err(Error::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path(Path::new("/Users/me/repo")), "-Users-me-repo");
        assert_eq!(encode_path(Path::new("work/repo")), "work-repo");
    }

    #[test]
    fn test_parse_session_id() {
        assert_eq!(
            parse_session_id("claude-code::abc").unwrap(),
            ("claude-code", "abc")
        );
        assert_eq!(parse_session_id("codex::a::b").unwrap(), ("codex", "a::b"));
        assert!(parse_session_id("abc").is_err());
        assert!(parse_session_id("::abc").is_err());
    }
}
