use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{lock, parse_payload, AppState};
use crate::orders::OrderPanelItemData;
use crate::split::{merge_body, OrderAdjustments, SplitTicketManager, TicketStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(default)]
    adjustments: OrderAdjustments,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitOpenPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    /// Lines to split when the order is not open on the panel.
    #[serde(default)]
    items: Option<Vec<OrderPanelItemData>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TicketPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(alias = "ticket_id")]
    ticket_id: String,
    #[serde(default)]
    status: Option<TicketStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveItemPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(alias = "line_id", alias = "itemId", alias = "orderItemId")]
    line_id: String,
    #[serde(alias = "from_ticket_id", alias = "fromTicketId")]
    from: String,
    #[serde(alias = "to_ticket_id", alias = "toTicketId")]
    to: String,
    #[serde(default)]
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitEvenlyPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(alias = "ways", alias = "ticketCount")]
    count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergePayload {
    #[serde(alias = "order_id", alias = "targetOrderId")]
    order_id: String,
    #[serde(alias = "source_order_ids")]
    source_order_ids: Vec<String>,
}

fn split_not_found(order_id: &str) -> String {
    format!("No split in progress for order {order_id}")
}

pub(crate) fn split_json(manager: &SplitTicketManager, adjustments: &OrderAdjustments) -> Value {
    json!({
        "orderId": manager.order_id(),
        "selectedTicketId": manager.selected().map(|t| t.id.clone()),
        "tickets": manager.tickets(),
        "allocations": manager.allocate(adjustments),
        "subtotal": manager.subtotal(),
        "conserved": manager.is_conserved(),
    })
}

fn with_split<F>(
    state: &AppState,
    order_id: &str,
    adjustments: &OrderAdjustments,
    f: F,
) -> Result<Value, String>
where
    F: FnOnce(&mut SplitTicketManager) -> Result<(), String>,
{
    let mut splits = lock(&state.splits)?;
    let manager = splits
        .get_mut(order_id)
        .ok_or_else(|| split_not_found(order_id))?;
    f(manager)?;
    Ok(split_json(manager, adjustments))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Start splitting. Every live line begins on ticket #1.
pub async fn split_open(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SplitOpenPayload = parse_payload(arg0, "split")?;
    let lines = match payload.items {
        Some(lines) => lines,
        None => lock(&state.panels)?
            .get(&payload.order_id)
            .map(|p| p.lines().to_vec())
            .ok_or_else(|| format!("Order {} is not open", payload.order_id))?,
    };
    let manager = SplitTicketManager::from_order(payload.order_id.clone(), &lines);
    let resp = split_json(&manager, &OrderAdjustments::default());
    lock(&state.splits)?.insert(payload.order_id.clone(), manager);
    info!(order_id = %payload.order_id, lines = lines.len(), "split opened");
    Ok(resp)
}

pub async fn split_state(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SplitPayload = parse_payload(arg0, "split")?;
    with_split(state, &payload.order_id, &payload.adjustments, |_| Ok(()))
}

pub async fn split_add_ticket(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SplitPayload = parse_payload(arg0, "split")?;
    with_split(state, &payload.order_id, &payload.adjustments, |m| {
        m.add_ticket();
        Ok(())
    })
}

pub async fn split_remove_ticket(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TicketPayload = parse_payload(arg0, "split ticket")?;
    with_split(state, &payload.order_id, &OrderAdjustments::default(), |m| {
        m.remove_ticket(&payload.ticket_id).map_err(|e| e.to_string())
    })
}

pub async fn split_move_item(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: MoveItemPayload = parse_payload(arg0, "split move")?;
    with_split(state, &payload.order_id, &OrderAdjustments::default(), |m| {
        m.move_item(&payload.line_id, &payload.from, &payload.to, payload.quantity)
            .map_err(|e| e.to_string())
    })
}

pub async fn split_evenly(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SplitEvenlyPayload = parse_payload(arg0, "split evenly")?;
    with_split(state, &payload.order_id, &OrderAdjustments::default(), |m| {
        m.split_evenly(payload.count).map_err(|e| e.to_string())
    })
}

pub async fn split_select(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TicketPayload = parse_payload(arg0, "split ticket")?;
    with_split(state, &payload.order_id, &OrderAdjustments::default(), |m| {
        m.select(&payload.ticket_id).map_err(|e| e.to_string())
    })
}

/// Mark a ticket authorized or paid; locked tickets no longer take moves.
pub async fn split_set_status(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TicketPayload = parse_payload(arg0, "split ticket")?;
    let status = payload.status.ok_or("Missing status")?;
    with_split(state, &payload.order_id, &OrderAdjustments::default(), |m| {
        m.set_status(&payload.ticket_id, status).map_err(|e| e.to_string())
    })
}

/// Persist the split plan on the dashboard.
pub async fn split_save(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SplitPayload = parse_payload(arg0, "split")?;
    let plan = {
        let splits = lock(&state.splits)?;
        let manager = splits
            .get(&payload.order_id)
            .ok_or_else(|| split_not_found(&payload.order_id))?;
        if !manager.is_conserved() {
            return Err("Split tickets do not account for every item".into());
        }
        manager.split_plan(&payload.adjustments)
    };

    let resp = state
        .api
        .save_split_tickets(&payload.order_id, &plan)
        .await
        .map_err(|e| format!("Failed to save split: {e}"))?;
    info!(order_id = %payload.order_id, "split tickets saved");
    Ok(json!({ "success": true, "plan": plan, "response": resp }))
}

/// Merge other checks into this order. Local views of every order involved
/// are stale afterwards and are dropped.
pub async fn split_merge(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: MergePayload = parse_payload(arg0, "merge")?;
    let sources: Vec<String> = payload
        .source_order_ids
        .into_iter()
        .filter(|id| !id.trim().is_empty() && *id != payload.order_id)
        .collect();
    if sources.is_empty() {
        return Err("Select at least one other order to merge".into());
    }

    let resp = state
        .api
        .merge_orders(&payload.order_id, &merge_body(&sources))
        .await
        .inspect_err(|e| warn!(order_id = %payload.order_id, error = %e, "order merge failed"))
        .map_err(|e| format!("Failed to merge orders: {e}"))?;

    {
        let mut panels = lock(&state.panels)?;
        for id in sources.iter().chain(std::iter::once(&payload.order_id)) {
            panels.remove(id);
        }
    }
    {
        let mut splits = lock(&state.splits)?;
        for id in sources.iter().chain(std::iter::once(&payload.order_id)) {
            splits.remove(id);
        }
    }
    info!(order_id = %payload.order_id, merged = sources.len(), "orders merged");
    Ok(json!({ "success": true, "mergedOrderIds": sources, "response": resp }))
}

#[cfg(test)]
mod tests {
    use super::super::{dispatch, test_support};
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use rust_decimal::Decimal;
    use std::sync::{Arc, Mutex};

    fn dec(v: &Value) -> Decimal {
        v.as_str().unwrap().parse().unwrap()
    }

    fn lines() -> Value {
        json!([
            { "id": "beer", "name": "Lager", "quantity": 3, "price": 6.0 },
            { "id": "nachos", "name": "Nachos", "quantity": 1, "price": 11.0 }
        ])
    }

    #[tokio::test]
    async fn partial_move_and_allocation_sum_to_order() {
        let state = test_support::offline_state(Vec::new());
        let view = dispatch(&state, "split_open", json!({ "orderId": "o1", "items": lines() }))
            .await
            .unwrap();
        let first = view["tickets"][0]["id"].as_str().unwrap().to_string();

        let view = dispatch(&state, "split_add_ticket", json!({ "orderId": "o1" })).await.unwrap();
        let second = view["tickets"][1]["id"].as_str().unwrap().to_string();

        let view = dispatch(
            &state,
            "split_move_item",
            json!({ "orderId": "o1", "lineId": "beer", "from": first, "to": second, "quantity": 1 }),
        )
        .await
        .unwrap();
        assert_eq!(view["conserved"], true);
        assert_eq!(view["tickets"][0]["items"][0]["quantity"], 2);
        assert_eq!(view["tickets"][1]["items"][0]["quantity"], 1);

        let view = dispatch(
            &state,
            "split_state",
            json!({ "orderId": "o1", "adjustments": { "tax": 2.33 } }),
        )
        .await
        .unwrap();
        let taxes: Decimal = view["allocations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| dec(&a["tax"]))
            .sum();
        assert_eq!(taxes, Decimal::new(233, 2));
    }

    #[tokio::test]
    async fn paid_ticket_refuses_moves() {
        let state = test_support::offline_state(Vec::new());
        dispatch(&state, "split_open", json!({ "orderId": "o1", "items": lines() }))
            .await
            .unwrap();
        let view = dispatch(&state, "split_evenly", json!({ "orderId": "o1", "count": 2 }))
            .await
            .unwrap();
        let a = view["tickets"][0]["id"].as_str().unwrap().to_string();
        let b = view["tickets"][1]["id"].as_str().unwrap().to_string();

        dispatch(&state, "split_set_status", json!({ "orderId": "o1", "ticketId": a, "status": "paid" }))
            .await
            .unwrap();
        let err = dispatch(
            &state,
            "split_move_item",
            json!({ "orderId": "o1", "lineId": "beer", "from": a, "to": b }),
        )
        .await
        .unwrap_err();
        assert!(err.contains("#1"), "{err}");
    }

    #[tokio::test]
    async fn save_posts_plan_without_empty_tickets() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let sink = seen.clone();
        let router = Router::new().route(
            "/api/orders/{id}/split-tickets",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some(body);
                    Json(json!({ "success": true }))
                }
            }),
        );
        let state = test_support::online_state(router).await;
        dispatch(&state, "split_open", json!({ "orderId": "o1", "items": lines() }))
            .await
            .unwrap();
        dispatch(&state, "split_add_ticket", json!({ "orderId": "o1" })).await.unwrap();

        let resp = dispatch(&state, "split_save", json!({ "orderId": "o1" })).await.unwrap();
        assert_eq!(resp["success"], true);
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["orderId"], "o1");
        assert_eq!(body["tickets"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_needs_another_order() {
        let state = test_support::offline_state(Vec::new());
        let err = dispatch(&state, "split_merge", json!({ "orderId": "o1", "sourceOrderIds": ["o1"] }))
            .await
            .unwrap_err();
        assert!(err.contains("at least one"));
    }
}
