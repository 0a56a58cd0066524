//! # polylog-core
//!
//! Core library for polylog - one view over the session logs of several AI
//! coding assistants.
//!
//! This library provides:
//! - Domain types for projects, sessions, turns and content blocks
//! - Read-only plugins for Claude Code, Codex and OpenCode logs
//! - A registry that merges projects across sources by path
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Discovery:** each plugin finds projects and lists sessions with a
//!   cheap head scan of its logs
//! - **Parsing:** a plugin turns one session's raw records into ordered
//!   [`Turn`]s; malformed records become [`ParseErrorTurn`]s
//! - **Reconciliation:** the [`PluginRegistry`] merges projects that share a
//!   path, namespaces session ids and links plan/implementation pairs
//!
//! ## Example
//!
//! ```rust,no_run
//! use polylog_core::ingest::parsers::create_all_plugins;
//! use polylog_core::{Config, PluginRegistry};
//!
//! # async fn run() -> polylog_core::Result<()> {
//! let config = Config::load()?;
//! let registry = PluginRegistry::with_plugins(create_all_plugins(&config));
//! let projects = registry.discover_all_projects().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use classify::classify_session_types;
pub use config::Config;
pub use error::{Error, Result};
pub use grouping::group_content_blocks;
pub use ingest::{PluginRegistry, ToolPlugin};
pub use types::*;

// Public modules
pub mod classify;
pub mod config;
pub mod error;
pub mod format;
pub mod grouping;
pub mod ingest;
pub mod jsonl;
pub mod logging;
pub mod types;
