//! Shared helpers for the integration suites: tracing setup and tree
//! fixtures.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let tree = common::tree(2);
//!     // ...
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `dynamic_search_tree::epoch=trace`)
//! - `DYNAMIC_TREE_LOG_DIR`: Log directory (default: `logs/`)
//! - `DYNAMIC_TREE_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! Library events only reach the subscriber when the crate is built with
//! `--features tracing`.
//!
//! # Log Files
//!
//! Logs are appended to `logs/dynamic_search_tree.jsonl` as NDJSON:
//!
//! ```bash
//! # Reclaim passes only
//! jq 'select(.fields.message == "reclaim pass")' logs/dynamic_search_tree.jsonl
//!
//! # Splits by separator
//! jq 'select(.fields.separator != null)' logs/dynamic_search_tree.jsonl
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use dynamic_search_tree::{DocId, DynamicSearchTree, KeyType, NodeManager, ReclaimConfig};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Ensures tracing is only initialized once per test binary.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber with file and console logging.
///
/// Safe to call multiple times - only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        setup_tracing();
    });
}

/// Configuration for tracing setup.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Directory for log files.
    pub log_dir: PathBuf,
    /// Log file name.
    pub log_file: String,
    /// Enable console output.
    pub console_enabled: bool,
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "dynamic_search_tree.jsonl".to_string(),
            console_enabled: true,
            default_level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DYNAMIC_TREE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if env::var("DYNAMIC_TREE_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console_enabled = false;
        }

        config
    }
}

fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level}")))
}

fn setup_tracing() {
    let config = TracingConfig::from_env();

    // A read-only checkout must not fail the suite; fall back to console only.
    let file = std::fs::create_dir_all(&config.log_dir).ok().and_then(|()| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_dir.join(&config.log_file))
            .ok()
    });

    let console_layer = config.console_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(make_filter(config.default_level))
    });

    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(make_filter(config.default_level))
    });

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

// ============================================================================
//  Tree fixtures
// ============================================================================

/// Reclaim tuning used by the suites: small threshold so reclamation runs
/// often, no rate limit.
pub fn test_config() -> ReclaimConfig {
    ReclaimConfig::default().with_threshold(16)
}

/// Fresh tree with its own node manager.
pub fn tree(max_slot_shift: u8) -> Arc<DynamicSearchTree> {
    let manager = Arc::new(NodeManager::new(test_config()));
    Arc::new(DynamicSearchTree::new(max_slot_shift, manager))
}

/// Every key in iteration order.
pub fn collect_keys(tree: &DynamicSearchTree) -> Vec<KeyType> {
    tree.create_iterator().collect()
}

/// `(doc_id, is_delete)` pairs in iteration order, comparable against a
/// `BTreeMap` oracle.
pub fn snapshot(tree: &DynamicSearchTree) -> Vec<(DocId, bool)> {
    collect_keys(tree)
        .into_iter()
        .map(|k| (k.doc_id(), k.is_delete()))
        .collect()
}

/// Oracle contents in the same shape as [`snapshot`].
pub fn oracle_snapshot(oracle: &BTreeMap<DocId, bool>) -> Vec<(DocId, bool)> {
    oracle.iter().map(|(&d, &del)| (d, del)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init() {
        init_tracing();
        tracing::info!("Tracing initialized successfully");
        tracing::debug!(doc_id = 42, "Debug event");
    }
}
