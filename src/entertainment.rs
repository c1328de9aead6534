//! Timed rentals (pool tables, darts, karaoke rooms) billed by block time.
//!
//! The session clock belongs to the server: every start, extension and stop
//! goes through the block-time endpoint and the local session is replaced
//! with whatever the server answers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{unwrap_envelope, ApiClient, ApiError};
use crate::menu::MenuItem;
use crate::timers::DelayTimer;

/// Remaining time at or under which the countdown turns amber.
pub const WARNING_SECS: i64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum BlockTimeError {
    #[error("{0} is not a timed rental")]
    NotEntertainment(String),
    #[error("Block time must be at least one minute")]
    InvalidMinutes,
    #[error("Block time session has already ended")]
    AlreadyStopped,
    #[error("Unexpected block-time response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTimeStatus {
    Active,
    Warning,
    Expired,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTimeSession {
    #[serde(alias = "item_id", alias = "orderItemId", alias = "order_item_id")]
    pub item_id: String,
    #[serde(alias = "order_id")]
    pub order_id: String,
    #[serde(alias = "started_at", alias = "blockTimeStartedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(alias = "blockTimeMinutes", alias = "block_minutes")]
    pub minutes: u32,
    #[serde(default, alias = "extended_minutes")]
    pub extended_minutes: u32,
    #[serde(default, alias = "stopped_at", alias = "endedAt")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl BlockTimeSession {
    pub fn total_minutes(&self) -> u32 {
        self.minutes + self.extended_minutes
    }

    pub fn timer(&self) -> DelayTimer {
        DelayTimer::new(self.started_at, i64::from(self.total_minutes()) * 60)
    }

    /// A stopped session's clock froze at its stop time.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        self.timer().remaining_secs(self.stopped_at.unwrap_or(now))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.stopped_at.is_none() && self.timer().is_ready(now)
    }

    pub fn is_warning(&self, now: DateTime<Utc>) -> bool {
        if self.stopped_at.is_some() || self.is_expired(now) {
            return false;
        }
        self.remaining_secs(now) <= WARNING_SECS
    }

    pub fn status(&self, now: DateTime<Utc>) -> BlockTimeStatus {
        if self.stopped_at.is_some() {
            BlockTimeStatus::Stopped
        } else if self.is_expired(now) {
            BlockTimeStatus::Expired
        } else if self.is_warning(now) {
            BlockTimeStatus::Warning
        } else {
            BlockTimeStatus::Active
        }
    }

    pub fn label(&self, now: DateTime<Utc>) -> String {
        crate::timers::format_countdown(self.remaining_secs(now))
    }

    /// Minutes actually used, rounded up, for billing a stopped session.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        let end = self.stopped_at.unwrap_or(now);
        let secs = (end - self.started_at).num_seconds().max(0);
        (secs + 59) / 60
    }

    pub fn from_response(resp: &Value) -> Result<Self, BlockTimeError> {
        let body = unwrap_envelope(resp, &["session", "blockTime", "data"]);
        serde_json::from_value(body).map_err(|e| BlockTimeError::MalformedResponse(e.to_string()))
    }

    pub fn view(&self, now: DateTime<Utc>) -> Value {
        json!({
            "session": self,
            "status": self.status(now),
            "remainingSecs": self.remaining_secs(now),
            "label": self.label(now),
        })
    }
}

// ---------------------------------------------------------------------------
// Server calls
// ---------------------------------------------------------------------------

/// The block-time endpoint. Implemented by [`ApiClient`].
#[async_trait]
pub trait BlockTimeBackend: Send + Sync {
    async fn start(&self, body: &Value) -> Result<Value, ApiError>;
    async fn extend(&self, body: &Value) -> Result<Value, ApiError>;
    async fn stop(&self, body: &Value) -> Result<Value, ApiError>;
}

#[async_trait]
impl BlockTimeBackend for ApiClient {
    async fn start(&self, body: &Value) -> Result<Value, ApiError> {
        self.start_block_time(body).await
    }

    async fn extend(&self, body: &Value) -> Result<Value, ApiError> {
        self.extend_block_time(body).await
    }

    async fn stop(&self, body: &Value) -> Result<Value, ApiError> {
        self.stop_block_time(body).await
    }
}

/// Start the clock on a rental line. Minutes default to the item's block size.
pub async fn start(
    backend: &dyn BlockTimeBackend,
    order_id: &str,
    item_id: &str,
    menu_item: &MenuItem,
    minutes: Option<u32>,
) -> Result<BlockTimeSession, BlockTimeError> {
    if !menu_item.is_entertainment {
        return Err(BlockTimeError::NotEntertainment(menu_item.name.clone()));
    }
    let minutes = minutes
        .or(menu_item.block_minutes)
        .filter(|m| *m > 0)
        .ok_or(BlockTimeError::InvalidMinutes)?;

    let body = json!({
        "orderId": order_id,
        "itemId": item_id,
        "menuItemId": menu_item.id,
        "minutes": minutes,
    });
    let resp = backend.start(&body).await.inspect_err(|e| {
        warn!(order_id, item_id, error = %e, "block time start failed");
    })?;
    let session = BlockTimeSession::from_response(&resp)?;
    info!(order_id, item_id, minutes = session.minutes, "block time started");
    Ok(session)
}

pub async fn extend(
    backend: &dyn BlockTimeBackend,
    session: &BlockTimeSession,
    additional_minutes: u32,
) -> Result<BlockTimeSession, BlockTimeError> {
    if additional_minutes == 0 {
        return Err(BlockTimeError::InvalidMinutes);
    }
    if session.stopped_at.is_some() {
        return Err(BlockTimeError::AlreadyStopped);
    }
    let body = json!({
        "orderId": session.order_id,
        "itemId": session.item_id,
        "additionalMinutes": additional_minutes,
    });
    let resp = backend.extend(&body).await?;
    let updated = BlockTimeSession::from_response(&resp)?;
    info!(
        order_id = %updated.order_id,
        item_id = %updated.item_id,
        total_minutes = updated.total_minutes(),
        "block time extended"
    );
    Ok(updated)
}

/// Stop the clock. Returns the server's final session, or `None` when the
/// server only acknowledged the stop.
pub async fn stop(
    backend: &dyn BlockTimeBackend,
    session: &BlockTimeSession,
) -> Result<Option<BlockTimeSession>, BlockTimeError> {
    if session.stopped_at.is_some() {
        return Err(BlockTimeError::AlreadyStopped);
    }
    let body = json!({ "orderId": session.order_id, "itemId": session.item_id });
    let resp = backend.stop(&body).await?;
    info!(order_id = %session.order_id, item_id = %session.item_id, "block time stopped");
    if resp.is_null() || (resp.get("success").is_some() && resp.get("session").is_none()) {
        return Ok(None);
    }
    BlockTimeSession::from_response(&resp).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session(minutes: u32, extended: u32) -> BlockTimeSession {
        BlockTimeSession {
            item_id: "line-1".into(),
            order_id: "o1".into(),
            started_at: at(0),
            minutes,
            extended_minutes: extended,
            stopped_at: None,
        }
    }

    fn pool_table() -> MenuItem {
        serde_json::from_value(json!({
            "id": "pool", "name": "Pool Table", "price": 12.0,
            "is_entertainment": true, "blockTimeMinutes": 60
        }))
        .unwrap()
    }

    /// Echoes the request back as a session started at a fixed time.
    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<(&'static str, Value)>>,
    }

    #[async_trait]
    impl BlockTimeBackend for FakeBackend {
        async fn start(&self, body: &Value) -> Result<Value, ApiError> {
            self.calls.lock().unwrap().push(("start", body.clone()));
            Ok(json!({ "session": {
                "itemId": body["itemId"], "orderId": body["orderId"],
                "startedAt": "2023-11-14T22:13:20Z", "minutes": body["minutes"]
            }}))
        }

        async fn extend(&self, body: &Value) -> Result<Value, ApiError> {
            self.calls.lock().unwrap().push(("extend", body.clone()));
            Ok(json!({
                "item_id": body["itemId"], "order_id": body["orderId"],
                "started_at": "2023-11-14T22:13:20Z", "minutes": 60,
                "extended_minutes": body["additionalMinutes"]
            }))
        }

        async fn stop(&self, body: &Value) -> Result<Value, ApiError> {
            self.calls.lock().unwrap().push(("stop", body.clone()));
            Ok(json!({ "success": true }))
        }
    }

    #[test]
    fn countdown_states() {
        let s = session(30, 15);
        assert_eq!(s.total_minutes(), 45);
        assert_eq!(s.status(at(0)), BlockTimeStatus::Active);
        assert_eq!(s.label(at(0)), "45:00");
        assert!(s.is_warning(at(40 * 60)));
        assert_eq!(s.status(at(45 * 60)), BlockTimeStatus::Expired);
        assert!(!s.is_warning(at(45 * 60)));
    }

    #[test]
    fn stopped_session_freezes() {
        let mut s = session(60, 0);
        s.stopped_at = Some(at(10 * 60 + 1));
        assert_eq!(s.status(at(3 * 3600)), BlockTimeStatus::Stopped);
        assert_eq!(s.remaining_secs(at(3 * 3600)), 50 * 60 - 1);
        assert_eq!(s.elapsed_minutes(at(3 * 3600)), 11);
    }

    #[tokio::test]
    async fn start_uses_item_block_size_and_server_clock() {
        let backend = FakeBackend::default();
        let s = start(&backend, "o1", "line-1", &pool_table(), None).await.unwrap();
        assert_eq!(s.minutes, 60);
        assert_eq!(s.started_at, at(0));
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].1["menuItemId"], "pool");
    }

    #[tokio::test]
    async fn rejects_non_rental_items() {
        let backend = FakeBackend::default();
        let mut beer = pool_table();
        beer.is_entertainment = false;
        beer.name = "IPA".into();
        let err = start(&backend, "o1", "line-1", &beer, Some(30)).await.unwrap_err();
        assert!(matches!(err, BlockTimeError::NotEntertainment(name) if name == "IPA"));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extend_and_stop_round_trip_through_server() {
        let backend = FakeBackend::default();
        let s = session(60, 0);
        let extended = extend(&backend, &s, 30).await.unwrap();
        assert_eq!(extended.total_minutes(), 90);
        assert!(matches!(extend(&backend, &s, 0).await, Err(BlockTimeError::InvalidMinutes)));

        assert_eq!(stop(&backend, &extended).await.unwrap(), None);
        let mut stopped = extended.clone();
        stopped.stopped_at = Some(at(100));
        assert!(matches!(stop(&backend, &stopped).await, Err(BlockTimeError::AlreadyStopped)));
    }
}
