use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{lock, parse_payload, AppState};
use crate::entertainment::{self, BlockTimeSession};
use crate::menu::MenuItem;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    /// The order line the rental is billed on.
    #[serde(alias = "item_id", alias = "orderItemId")]
    item_id: String,
    #[serde(default, alias = "menu_item_id")]
    menu_item_id: Option<String>,
    #[serde(default)]
    item: Option<MenuItem>,
    #[serde(default)]
    minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    #[serde(alias = "item_id", alias = "orderItemId")]
    item_id: String,
    #[serde(default, alias = "additional_minutes", alias = "minutes")]
    additional_minutes: Option<u32>,
}

fn session_not_found(item_id: &str) -> String {
    format!("No block time running for {item_id}")
}

fn current(state: &AppState, item_id: &str) -> Result<BlockTimeSession, String> {
    lock(&state.block_times)?
        .get(item_id)
        .cloned()
        .ok_or_else(|| session_not_found(item_id))
}

pub async fn block_time_start(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: StartPayload = parse_payload(arg0, "block time")?;
    let menu_item = match (payload.item, payload.menu_item_id) {
        (Some(item), _) => item,
        (None, Some(id)) => lock(&state.menu)?
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| format!("Menu item {id} not found"))?,
        (None, None) => return Err("Missing menuItemId".into()),
    };
    if lock(&state.block_times)?.contains_key(&payload.item_id) {
        return Err(format!("Block time already running for {}", menu_item.name));
    }

    let session = entertainment::start(
        state.block_time.as_ref(),
        &payload.order_id,
        &payload.item_id,
        &menu_item,
        payload.minutes,
    )
    .await
    .map_err(|e| e.to_string())?;
    let view = session.view(Utc::now());
    lock(&state.block_times)?.insert(session.item_id.clone(), session);
    Ok(view)
}

pub async fn block_time_extend(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SessionPayload = parse_payload(arg0, "block time")?;
    let additional = payload.additional_minutes.ok_or("Missing additionalMinutes")?;
    let session = current(state, &payload.item_id)?;
    let updated = entertainment::extend(state.block_time.as_ref(), &session, additional)
        .await
        .map_err(|e| e.to_string())?;
    let view = updated.view(Utc::now());
    lock(&state.block_times)?.insert(payload.item_id, updated);
    Ok(view)
}

/// Stop the clock. When the server only acknowledges, the local session is
/// dropped; otherwise the stopped session is kept for billing.
pub async fn block_time_stop(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SessionPayload = parse_payload(arg0, "block time")?;
    let session = current(state, &payload.item_id)?;
    let stopped = entertainment::stop(state.block_time.as_ref(), &session)
        .await
        .map_err(|e| e.to_string())?;
    let now = Utc::now();
    let mut sessions = lock(&state.block_times)?;
    match stopped {
        Some(final_session) => {
            let view = final_session.view(now);
            let billed = final_session.elapsed_minutes(now);
            sessions.insert(payload.item_id, final_session);
            Ok(json!({ "stopped": true, "elapsedMinutes": billed, "view": view }))
        }
        None => {
            sessions.remove(&payload.item_id);
            Ok(json!({ "stopped": true, "elapsedMinutes": session.elapsed_minutes(now), "view": null }))
        }
    }
}

pub async fn block_time_state(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SessionPayload = parse_payload(arg0, "block time")?;
    Ok(current(state, &payload.item_id)?.view(Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::super::{dispatch, test_support};
    use super::*;

    fn pool() -> Value {
        json!({ "id": "pool", "name": "Pool Table", "price": 12.0, "isEntertainment": true, "blockMinutes": 60 })
    }

    #[tokio::test]
    async fn start_extend_stop_lifecycle() {
        let state = test_support::offline_state(Vec::new());
        let view = dispatch(
            &state,
            "block_time_start",
            json!({ "orderId": "o1", "itemId": "line-9", "item": pool() }),
        )
        .await
        .unwrap();
        assert_eq!(view["session"]["minutes"], 60);

        let err = dispatch(
            &state,
            "block_time_start",
            json!({ "orderId": "o1", "itemId": "line-9", "item": pool() }),
        )
        .await
        .unwrap_err();
        assert!(err.contains("already running"));

        let view = dispatch(
            &state,
            "block_time_extend",
            json!({ "itemId": "line-9", "additionalMinutes": 30 }),
        )
        .await
        .unwrap();
        assert_eq!(view["session"]["extendedMinutes"], 30);

        let resp = dispatch(&state, "block_time_stop", json!({ "itemId": "line-9" })).await.unwrap();
        assert_eq!(resp["stopped"], true);
        assert_eq!(resp["view"], Value::Null);

        let err = dispatch(&state, "block_time_state", json!({ "itemId": "line-9" }))
            .await
            .unwrap_err();
        assert!(err.contains("No block time"));
    }

    #[tokio::test]
    async fn non_rental_items_are_rejected() {
        let state = test_support::offline_state(Vec::new());
        let err = dispatch(
            &state,
            "block_time_start",
            json!({ "orderId": "o1", "itemId": "l1", "item": { "id": "ipa", "name": "IPA", "price": 7.0 } }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, "IPA is not a timed rental");
    }
}
