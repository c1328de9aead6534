//! Terminal configuration.
//!
//! Resolution order, lowest precedence first: built-in defaults, the JSON
//! config file, the OS credential store, then `BAR_POS_*` environment
//! variables. Only the admin URL, API key and terminal ID are read from the
//! credential store.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::storage;

pub const ENV_ADMIN_URL: &str = "BAR_POS_ADMIN_URL";
pub const ENV_API_KEY: &str = "BAR_POS_API_KEY";
pub const ENV_TERMINAL_ID: &str = "BAR_POS_TERMINAL_ID";

const CONFIG_FILE: &str = "terminal.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Terminal not configured: missing admin URL")]
    MissingAdminUrl,
    #[error("Terminal not configured: missing API key")]
    MissingApiKey,
    #[error("Invalid terminal config: {0}")]
    Invalid(String),
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Cash-discount program: the shelf price is the cash price, card payments
/// carry a percentage surcharge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DualPricingConfig {
    pub enabled: bool,
    #[serde(alias = "card_surcharge_percent")]
    pub card_surcharge_percent: Decimal,
}

impl Default for DualPricingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            card_surcharge_percent: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    #[serde(alias = "max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(alias = "min_length")]
    pub min_length: usize,
    #[serde(alias = "max_length")]
    pub max_length: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_interval_ms: 50,
            min_length: 3,
            max_length: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConfig {
    #[serde(alias = "admin_url")]
    pub admin_url: Option<String>,
    #[serde(alias = "api_key", skip_serializing)]
    pub api_key: Option<String>,
    #[serde(alias = "terminal_id")]
    pub terminal_id: Option<String>,
    #[serde(alias = "request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(alias = "dual_pricing")]
    pub dual_pricing: DualPricingConfig,
    #[serde(alias = "tip_presets")]
    pub tip_presets: Vec<Decimal>,
    pub scanner: ScannerConfig,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            admin_url: None,
            api_key: None,
            terminal_id: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            dual_pricing: DualPricingConfig::default(),
            tip_presets: vec![Decimal::from(15), Decimal::from(18), Decimal::from(20)],
            scanner: ScannerConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Base directory for terminal data (config file and logs).
pub fn data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("bar-pos")
}

impl TerminalConfig {
    /// Load the layered config. `path` overrides the default config file
    /// location; a missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = Self::load_layers(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve every layer without validating. An unpaired terminal still
    /// needs a config to accept its pairing credentials.
    pub fn load_layers(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir().join(CONFIG_FILE));

        let mut cfg = Self::from_file(&path)?.unwrap_or_default();
        cfg.apply_credential_store();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.resolve_connection_string();

        info!(
            config_path = %path.display(),
            admin_url = cfg.admin_url.as_deref().unwrap_or(""),
            dual_pricing = cfg.dual_pricing.enabled,
            "terminal config loaded"
        );
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no terminal config file, using defaults");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    fn apply_credential_store(&mut self) {
        if let Some(url) = storage::get_credential(storage::KEY_ADMIN_URL) {
            self.admin_url = Some(url);
        }
        if let Some(key) = storage::get_credential(storage::KEY_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(tid) = storage::get_credential(storage::KEY_TERMINAL_ID) {
            self.terminal_id = Some(tid);
        }
    }

    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(url) = non_empty(ENV_ADMIN_URL) {
            self.admin_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(tid) = non_empty(ENV_TERMINAL_ID) {
            self.terminal_id = Some(tid);
        }
    }

    /// Expand a pasted connection string into its parts. Explicit admin URL
    /// and terminal ID values are only filled in when missing.
    pub(crate) fn resolve_connection_string(&mut self) {
        let Some(decoded) = self.api_key.as_deref().and_then(ConnectionString::decode) else {
            return;
        };
        self.api_key = Some(decoded.key);
        if self.admin_url.is_none() {
            self.admin_url = decoded.url;
        }
        if self.terminal_id.is_none() {
            self.terminal_id = decoded.terminal_id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(ConfigError::MissingAdminUrl);
        }
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(ConfigError::MissingApiKey);
        }
        let pct = self.dual_pricing.card_surcharge_percent;
        if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid(format!(
                "card surcharge percent must be between 0 and 100, got {pct}"
            )));
        }
        if let Some(bad) = self.tip_presets.iter().find(|p| **p <= Decimal::ZERO) {
            return Err(ConfigError::Invalid(format!(
                "tip presets must be positive, got {bad}"
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeout must be non-zero".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// Pairing payload generated by the admin dashboard: JSON `{ url, key, tid }`,
/// either raw or base64url-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub key: String,
    pub url: Option<String>,
    pub terminal_id: Option<String>,
}

impl ConnectionString {
    pub fn decode(raw: &str) -> Option<Self> {
        let payload = decode_payload(raw)?;
        let field = |keys: &[&str]| crate::value_str(&payload, keys);
        Some(Self {
            key: field(&["key"])?,
            url: field(&["url"]).map(|u| crate::api::normalize_admin_url(&u)),
            terminal_id: field(&["tid", "terminalId"]),
        })
    }
}

fn decode_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let standard = compact.replace('-', "+").replace('_', "/");
    let padded = format!("{standard}{}", "=".repeat((4 - standard.len() % 4) % 4));
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}
