//! Admin dashboard API client.
//!
//! Authenticated HTTP communication with the admin dashboard: ingredient and
//! child-modifier lookups, block-time sessions, kitchen sends, order merge
//! and split-ticket persistence. Calls are user-triggered and never retried.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TerminalConfig;
use crate::ingredients::Ingredient;
use crate::menu::ModifierGroup;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Cannot reach admin dashboard at {0}")]
    Connect(String),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("Invalid admin dashboard URL: {0}")]
    InvalidUrl(String),
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Invalid JSON from admin dashboard: {0}")]
    InvalidJson(String),
    #[error("Network error communicating with {url}: {detail}")]
    Network { url: String, detail: String },
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_) | Self::Network { .. })
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes and a trailing `/api` segment
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_transport_error(base: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Connect(base.to_string());
    }
    if err.is_timeout() {
        return ApiError::Timeout(base.to_string());
    }
    if err.is_builder() {
        return ApiError::InvalidUrl(base.to_string());
    }
    ApiError::Network {
        url: base.to_string(),
        detail: err.to_string(),
    }
}

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Admin dashboard endpoint not found".to_string(),
        s if s >= 500 => "Admin dashboard server error".to_string(),
        _ => "Unexpected response from admin dashboard".to_string(),
    }
}

/// Build an error from a non-2xx response, preferring the server's own
/// `error`/`message` text and keeping validation details.
fn status_error(status: StatusCode, body_text: &str) -> ApiError {
    let trimmed = body_text.trim();
    let message = match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => {
            let message = crate::value_str(&json, &["error", "message"])
                .unwrap_or_else(|| status_message(status));
            match json.get("details").or_else(|| json.get("errors")) {
                Some(details) => format!("{message}: {details}"),
                None => message,
            }
        }
        Err(_) if !trimmed.is_empty() => format!("{}: {trimmed}", status_message(status)),
        Err(_) => status_message(status),
    };
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Lazily fetches child modifier groups. Implemented by [`ApiClient`]; tests
/// and the command bridge can substitute their own source.
#[async_trait]
pub trait ModifierGroupSource: Send + Sync {
    async fn fetch_modifier_group(&self, group_id: &str) -> Result<ModifierGroup, ApiError>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    terminal_id: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("terminal_id", &self.terminal_id)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(cfg: &TerminalConfig) -> Result<Self, ApiError> {
        let base_url = normalize_admin_url(cfg.admin_url.as_deref().unwrap_or_default());
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| map_transport_error(&base_url, &e))?;
        Ok(Self {
            client,
            base_url,
            api_key: cfg.api_key.clone().unwrap_or_default(),
            terminal_id: cfg.terminal_id.clone().unwrap_or_default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform an authenticated request. `path` includes the leading slash.
    /// Empty 2xx bodies come back as `Value::Null`.
    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("X-POS-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id);
        if let Some(b) = body {
            req = req.json(b);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| {
            let err = map_transport_error(&self.base_url, &e);
            warn!(method = %method, path, error = %err, "admin request failed");
            err
        })?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| map_transport_error(&self.base_url, &e))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let err = status_error(status, &body_text);
            warn!(method = %method, path, status = status.as_u16(), latency_ms, error = %err, "admin request rejected");
            return Err(err);
        }
        debug!(method = %method, path, status = status.as_u16(), latency_ms, "admin request ok");

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }

    /// Same as [`fetch`](Self::fetch) but abandons the request once `cancel`
    /// fires, so a late response never reaches closed UI state.
    pub async fn fetch_cancellable(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            res = self.fetch(method, path, body) => res,
        }
    }

    // -- Menu ----------------------------------------------------------------

    pub async fn get_item_ingredients(&self, item_id: &str) -> Result<Vec<Ingredient>, ApiError> {
        let resp = self
            .fetch(Method::GET, &format!("/api/menu/items/{item_id}/ingredients"), None)
            .await?;
        let list = unwrap_envelope(&resp, &["ingredients", "data"]);
        serde_json::from_value(list).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }

    pub async fn get_modifier_group(&self, group_id: &str) -> Result<ModifierGroup, ApiError> {
        let resp = self
            .fetch(Method::GET, &format!("/api/menu/modifiers/{group_id}"), None)
            .await?;
        let group = unwrap_envelope(&resp, &["modifierGroup", "group", "data"]);
        serde_json::from_value(group).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }

    // -- Entertainment -------------------------------------------------------

    pub async fn start_block_time(&self, body: &Value) -> Result<Value, ApiError> {
        self.fetch(Method::POST, "/api/entertainment/block-time", Some(body))
            .await
    }

    pub async fn extend_block_time(&self, body: &Value) -> Result<Value, ApiError> {
        self.fetch(Method::PATCH, "/api/entertainment/block-time", Some(body))
            .await
    }

    pub async fn stop_block_time(&self, body: &Value) -> Result<Value, ApiError> {
        self.fetch(Method::DELETE, "/api/entertainment/block-time", Some(body))
            .await
    }

    // -- Orders --------------------------------------------------------------

    pub async fn send_order_items(&self, order_id: &str, body: &Value) -> Result<Value, ApiError> {
        self.fetch(Method::POST, &format!("/api/orders/{order_id}/send"), Some(body))
            .await
    }

    pub async fn merge_orders(&self, order_id: &str, body: &Value) -> Result<Value, ApiError> {
        self.fetch(Method::POST, &format!("/api/orders/{order_id}/merge"), Some(body))
            .await
    }

    pub async fn save_split_tickets(
        &self,
        order_id: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        self.fetch(
            Method::POST,
            &format!("/api/orders/{order_id}/split-tickets"),
            Some(body),
        )
        .await
    }
}

#[async_trait]
impl ModifierGroupSource for ApiClient {
    async fn fetch_modifier_group(&self, group_id: &str) -> Result<ModifierGroup, ApiError> {
        self.get_modifier_group(group_id).await
    }
}

/// The dashboard wraps payloads inconsistently (`{ data: ... }`, named keys,
/// or bare). Return the first present key, or the response itself.
pub(crate) fn unwrap_envelope(resp: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|k| resp.get(*k))
        .cloned()
        .unwrap_or_else(|| resp.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_admin(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(url: &str) -> ApiClient {
        ApiClient::new(&TerminalConfig {
            admin_url: Some(url.to_string()),
            api_key: Some("test-key".into()),
            terminal_id: Some("term-1".into()),
            request_timeout_secs: 5,
            ..TerminalConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn normalize_strips_api_suffix_and_adds_scheme() {
        assert_eq!(normalize_admin_url("admin.example.com/api/"), "https://admin.example.com");
        assert_eq!(normalize_admin_url("localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_admin_url(" https://x.io// "), "https://x.io");
    }

    #[test]
    fn status_error_prefers_server_message() {
        let err = status_error(StatusCode::BAD_REQUEST, r#"{"error":"Order is closed"}"#);
        assert_eq!(err.to_string(), "Order is closed (HTTP 400)");

        let err = status_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.to_string(), "API key is invalid or expired (HTTP 401)");

        let err = status_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Invalid split","details":["ticket 2 empty"]}"#,
        );
        assert!(err.to_string().contains("ticket 2 empty"));
    }

    #[tokio::test]
    async fn fetches_modifier_group_with_auth_headers() {
        let router = Router::new().route(
            "/api/menu/modifiers/{id}",
            get(|headers: axum::http::HeaderMap| async move {
                if headers.get("X-POS-API-Key").and_then(|v| v.to_str().ok()) != Some("test-key") {
                    return (AxumStatus::UNAUTHORIZED, Json(serde_json::json!({})));
                }
                (
                    AxumStatus::OK,
                    Json(serde_json::json!({
                        "data": {
                            "id": "g-sauce",
                            "name": "Sauce",
                            "maxSelections": 1,
                            "modifiers": [{ "id": "m-bbq", "name": "BBQ", "price": 0.5 }]
                        }
                    })),
                )
            }),
        );
        let base = spawn_admin(router).await;
        let group = client_for(&base).get_modifier_group("g-sauce").await.unwrap();
        assert_eq!(group.id, "g-sauce");
        assert_eq!(group.modifiers.len(), 1);
        assert_eq!(group.max_selections, 1);
    }

    #[tokio::test]
    async fn non_success_status_maps_to_status_error() {
        let router = Router::new().route(
            "/api/orders/{id}/merge",
            post(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(serde_json::json!({ "error": "Order already paid" })),
                )
            }),
        );
        let base = spawn_admin(router).await;
        let err = client_for(&base)
            .merge_orders("o-1", &serde_json::json!({ "sourceOrderIds": ["o-2"] }))
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "Order already paid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let router = Router::new().route(
            "/api/entertainment/block-time",
            axum::routing::delete(|| async { AxumStatus::NO_CONTENT }),
        );
        let base = spawn_admin(router).await;
        let resp = client_for(&base)
            .stop_block_time(&serde_json::json!({ "sessionId": "s-1" }))
            .await
            .unwrap();
        assert!(resp.is_null());
    }

    #[tokio::test]
    async fn unreachable_dashboard_is_connectivity_error() {
        let err = client_for("http://127.0.0.1:9")
            .get_item_ingredients("i-1")
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "got {err:?}");
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_cancelled() {
        let router = Router::new().route(
            "/api/menu/modifiers/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(serde_json::json!({}))
            }),
        );
        let base = spawn_admin(router).await;
        let client = client_for(&base);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .fetch_cancellable(Method::GET, "/api/menu/modifiers/g", None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
    }
}
