//! Diagnostics for the bar terminal.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Connection health**: whether the admin dashboard answers, and how fast
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use reqwest::Method;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

use crate::api::ApiClient;
use crate::config::TerminalConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the daily rolling log files (`pos.2026-10-16`).
pub const LOG_FILE_PREFIX: &str = "pos";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Connection health
// ---------------------------------------------------------------------------

/// Check the admin dashboard. Never fails: an unreachable dashboard is a
/// health result, not an error.
pub async fn get_connection_health(cfg: &TerminalConfig, api: &ApiClient) -> Value {
    let started = Instant::now();
    let health = api.fetch(Method::GET, "/api/health", None).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    let (online, error) = match &health {
        Ok(_) => (true, None),
        // Any HTTP answer means the dashboard is up.
        Err(crate::api::ApiError::Status { .. }) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    json!({
        "online": online,
        "adminUrl": api.base_url(),
        "terminalId": cfg.terminal_id,
        "latencyMs": latency_ms,
        "error": error,
        "dualPricing": cfg.dual_pricing.enabled,
    })
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory path (same location used by lib.rs).
pub fn get_log_dir() -> PathBuf {
    crate::config::data_dir().join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    prune_logs_in(&get_log_dir(), MAX_LOG_FILES);
}

fn prune_logs_in(log_dir: &Path, keep: usize) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
