//! Session file lookup for the Codex tree.
//!
//! Codex partitions sessions by date (and, in older releases, provider), so
//! finding one session by id means walking the whole tree. The walk result is
//! kept in a [`SessionPathCache`] keyed by the sessions root.

use crate::error::Result;
use glob::Pattern;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Session id for a Codex file name.
///
/// `rollout-2025-10-01T12-00-00-<uuid>.jsonl` yields the trailing uuid;
/// legacy `<uuid>.jsonl` files yield their stem.
pub(crate) fn session_id_from_path(path: &Path) -> Option<String> {
    const UUID_LEN: usize = 36;
    let stem = path.file_stem()?.to_str()?;
    match stem.strip_prefix("rollout-") {
        Some(rest) if rest.len() >= UUID_LEN && rest.is_char_boundary(rest.len() - UUID_LEN) => {
            Some(rest[rest.len() - UUID_LEN..].to_string())
        }
        _ => Some(stem.to_string()),
    }
}

/// Every `*.jsonl` file below `<root>/sessions`, both layouts.
pub(crate) async fn walk_sessions(root: &Path) -> Result<Vec<PathBuf>> {
    let sessions_dir = root.join("sessions");
    if !tokio::fs::try_exists(&sessions_dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/**/*.jsonl",
        Pattern::escape(&sessions_dir.to_string_lossy())
    );
    let paths = tokio::task::spawn_blocking(move || -> Vec<PathBuf> {
        match glob::glob(&pattern) {
            Ok(entries) => entries
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable Codex path");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Invalid Codex sessions pattern");
                Vec::new()
            }
        }
    })
    .await?;

    tracing::debug!(count = paths.len(), "Walked Codex sessions tree");
    Ok(paths)
}

/// What the cache remembers about one session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedSession {
    pub path: PathBuf,
    /// Model provider, once a listing has read the header
    pub provider: Option<String>,
}

/// Session id -> file lookup for one sessions root.
///
/// Switching roots drops everything. Individual entries are re-checked by
/// the caller and evicted when their file is gone.
#[derive(Debug, Default)]
pub(crate) struct SessionPathCache {
    root: Option<PathBuf>,
    entries: HashMap<String, CachedSession>,
}

impl SessionPathCache {
    fn ensure_root(&mut self, root: &Path) {
        if self.root.as_deref() != Some(root) {
            if self.root.is_some() {
                tracing::debug!(root = %root.display(), "Codex sessions root changed, clearing path cache");
            }
            self.root = Some(root.to_path_buf());
            self.entries.clear();
        }
    }

    pub fn get(&mut self, root: &Path, session_id: &str) -> Option<CachedSession> {
        self.ensure_root(root);
        self.entries.get(session_id).cloned()
    }

    pub fn evict(&mut self, session_id: &str) {
        self.entries.remove(session_id);
    }

    /// Replace the file map after a full walk, keeping known providers.
    pub fn replace(&mut self, root: &Path, paths: &[PathBuf]) {
        self.ensure_root(root);
        let mut previous = std::mem::take(&mut self.entries);
        for path in paths {
            if let Some(id) = session_id_from_path(path) {
                let provider = previous
                    .remove(&id)
                    .filter(|cached| &cached.path == path)
                    .and_then(|cached| cached.provider);
                self.entries.insert(
                    id,
                    CachedSession {
                        path: path.clone(),
                        provider,
                    },
                );
            }
        }
    }

    pub fn set_provider(&mut self, session_id: &str, provider: Option<String>) {
        if let Some(entry) = self.entries.get_mut(session_id) {
            entry.provider = provider;
        }
    }

    pub fn provider(&self, session_id: &str) -> Option<&str> {
        self.entries.get(session_id)?.provider.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0199a213-81c0-7800-8aa1-bbab2a035a53";

    #[test]
    fn test_session_id_from_path() {
        let rollout = PathBuf::from(format!(
            "/r/sessions/2025/10/01/rollout-2025-10-01T12-00-00-{}.jsonl",
            UUID
        ));
        assert_eq!(session_id_from_path(&rollout).as_deref(), Some(UUID));

        let legacy = PathBuf::from(format!("/r/sessions/openai/2025-01-01/{}.jsonl", UUID));
        assert_eq!(session_id_from_path(&legacy).as_deref(), Some(UUID));
    }

    #[test]
    fn test_cache_invalidated_on_root_change() {
        let mut cache = SessionPathCache::default();
        let path = PathBuf::from(format!("/a/sessions/{}.jsonl", UUID));
        cache.replace(Path::new("/a"), &[path.clone()]);
        assert_eq!(cache.get(Path::new("/a"), UUID).map(|c| c.path), Some(path));

        assert!(cache.get(Path::new("/b"), UUID).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_replace_keeps_provider_for_same_path() {
        let mut cache = SessionPathCache::default();
        let path = PathBuf::from("/a/sessions/x.jsonl");
        cache.replace(Path::new("/a"), &[path.clone()]);
        cache.set_provider("x", Some("openai".to_string()));
        cache.replace(Path::new("/a"), &[path]);
        assert_eq!(cache.provider("x"), Some("openai"));

        cache.evict("x");
        assert_eq!(cache.provider("x"), None);
    }

    #[tokio::test]
    async fn test_walk_finds_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let new_layout = dir.path().join("sessions/2025/10/01");
        let old_layout = dir.path().join("sessions/openai/2025-01-01");
        std::fs::create_dir_all(&new_layout).unwrap();
        std::fs::create_dir_all(&old_layout).unwrap();
        std::fs::write(new_layout.join("rollout-a.jsonl"), "").unwrap();
        std::fs::write(old_layout.join("b.jsonl"), "").unwrap();
        std::fs::write(old_layout.join("notes.txt"), "").unwrap();

        let mut paths = walk_sessions(dir.path()).await.unwrap();
        paths.sort();
        assert_eq!(paths.len(), 2);

        assert!(walk_sessions(&dir.path().join("missing"))
            .await
            .unwrap()
            .is_empty());
    }
}
