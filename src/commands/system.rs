use serde_json::Value;
use tracing::info;

use super::AppState;
use crate::{diagnostics, storage};

pub async fn app_about(_state: &AppState, _arg0: Option<Value>) -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

pub async fn app_connection_health(state: &AppState, _arg0: Option<Value>) -> Result<Value, String> {
    Ok(diagnostics::get_connection_health(&state.config, &state.api).await)
}

/// Pairing. Credentials take effect on the next start, when the config
/// layer reads them back from the keyring.
pub async fn terminal_update_credentials(
    _state: &AppState,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing credentials payload")?;
    storage::update_terminal_credentials(&payload)
}

pub async fn terminal_factory_reset(_state: &AppState, _arg0: Option<Value>) -> Result<Value, String> {
    info!("factory reset requested from front-end");
    storage::factory_reset()
}
