//! Bar POS terminal core.
//!
//! The touch front-end drives this crate over a line-delimited JSON bridge
//! on stdin/stdout (see [`bridge`]). Command names are snake_case and grouped
//! by screen: `menu_*`, `modifier_*`, `order_panel_*`, `split_*`,
//! `payment_*`, `block_time_*`. The admin dashboard owns all persistent
//! state; everything held here is view state for the current shift.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod entertainment;
pub mod ingredients;
pub mod menu;
pub mod modifiers;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod scanner;
pub mod split;
pub mod storage;
pub mod timers;

/// Config file override, when the CLI argument is not given.
pub const ENV_CONFIG_PATH: &str = "BAR_POS_CONFIG";

// ============================================================================
// JSON helpers
// ============================================================================

/// First non-empty string among `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

// ============================================================================
// Logging
// ============================================================================

/// Structured logging to stderr and a daily rolling file. Stdout carries the
/// bridge protocol and must stay clean. Keep the guard alive until exit:
/// dropping it flushes the file writer.
pub fn init_logging() -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bar_pos_lib=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// App entry point
// ============================================================================

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_logging();
    info!("Starting Bar POS v{}", env!("CARGO_PKG_VERSION"));

    let config_path = config_path.or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));
    let config = match config::TerminalConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e @ (config::ConfigError::MissingAdminUrl | config::ConfigError::MissingApiKey)) => {
            // Unpaired: only pairing and diagnostics will work until restart.
            warn!(error = %e, "terminal is not paired");
            config::TerminalConfig::load_layers(config_path.as_deref())?
        }
        Err(e) => return Err(e.into()),
    };

    let state = commands::AppState::new(config).map_err(anyhow::Error::msg)?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    bridge::serve(Arc::new(state), stdin, tokio::io::stdout()).await?;

    info!("Bar POS shutting down");
    Ok(())
}
