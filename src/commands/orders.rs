use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{lock, parse_payload, AppState};
use crate::config::DualPricingConfig;
use crate::orders::{badge, KitchenStatus, OrderPanel, OrderPanelItemData};
use crate::pricing::format_dual_price;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    #[serde(alias = "order_id")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPanelPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    /// Lines already on the order, as the dashboard returns them.
    #[serde(default)]
    items: Option<Vec<OrderPanelItemData>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinePayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(alias = "line_id", alias = "itemId", alias = "item_id")]
    line_id: String,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default, alias = "seat_number", alias = "seatNumber")]
    seat: Option<u32>,
    #[serde(default, alias = "course_number", alias = "courseNumber")]
    course: Option<u32>,
    #[serde(default, alias = "is_held", alias = "isHeld")]
    held: Option<bool>,
    #[serde(default, alias = "delay_seconds")]
    delay_seconds: Option<i64>,
    #[serde(default, alias = "kitchen_status", alias = "kitchenStatus")]
    status: Option<KitchenStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseDelayPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(alias = "course_number", alias = "courseNumber")]
    course: u32,
    #[serde(default, alias = "delay_seconds")]
    delay_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchPayload {
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(default = "default_tick_ms", alias = "period_ms")]
    period_ms: u64,
}

fn default_tick_ms() -> u64 {
    1000
}

fn panel_not_found(order_id: &str) -> String {
    format!("Order {order_id} is not open")
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

fn ids(lines: &[&OrderPanelItemData]) -> Vec<String> {
    lines.iter().map(|l| l.id.clone()).collect()
}

fn grouping(groups: Vec<(Option<u32>, Vec<&OrderPanelItemData>)>, key: &str) -> Vec<Value> {
    groups
        .into_iter()
        .map(|(n, lines)| {
            let mut group = serde_json::Map::new();
            group.insert(key.to_string(), json!(n));
            group.insert("lineIds".to_string(), json!(ids(&lines)));
            Value::Object(group)
        })
        .collect()
}

/// Everything the order panel renders, computed at `now`.
pub(crate) fn panel_json(panel: &OrderPanel, cfg: &DualPricingConfig, now: DateTime<Utc>) -> Value {
    let lines: Vec<Value> = panel
        .lines()
        .iter()
        .map(|l| {
            json!({
                "item": l,
                "badge": badge(l.kitchen_status),
                "unitTotal": l.unit_total(),
                "lineTotal": l.line_total(),
                "modifierLabels": l.modifiers.iter().map(|m| m.ticket_label()).collect::<Vec<_>>(),
                "delayLabel": l.delay_timer().map(|t| t.label(now)),
            })
        })
        .collect();
    let timers: Vec<Value> = panel
        .timers()
        .into_iter()
        .map(|(key, t)| {
            json!({
                "key": key,
                "remainingSecs": t.remaining_secs(now),
                "label": t.label(now),
                "ready": t.is_ready(now),
            })
        })
        .collect();
    let totals = panel.totals(cfg);
    json!({
        "orderId": panel.order_id(),
        "lines": lines,
        "pendingIds": ids(&panel.pending_items()),
        "sentIds": ids(&panel.sent_items()),
        "sendableIds": panel.sendable_ids(),
        "byCourse": grouping(panel.group_by_course(), "course"),
        "bySeat": grouping(panel.group_by_seat(), "seat"),
        "timers": timers,
        "totalLabel": format_dual_price(&totals.total),
        "cashDiscount": totals.total.discount(),
        "totals": totals,
    })
}

/// Run `f` against an open panel and answer with the refreshed view.
fn with_panel<F>(state: &AppState, order_id: &str, f: F) -> Result<Value, String>
where
    F: FnOnce(&mut OrderPanel) -> Result<(), String>,
{
    let mut panels = lock(&state.panels)?;
    let panel = panels
        .get_mut(order_id)
        .ok_or_else(|| panel_not_found(order_id))?;
    f(panel)?;
    Ok(panel_json(panel, &state.config.dual_pricing, Utc::now()))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub async fn order_panel_open(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OpenPanelPayload = parse_payload(arg0, "order panel")?;
    let order_id = payload.order_id;
    let mut panels = lock(&state.panels)?;
    if let Some(lines) = payload.items {
        info!(order_id = %order_id, lines = lines.len(), "order panel opened with existing lines");
        panels.insert(order_id.clone(), OrderPanel::from_lines(order_id.clone(), lines));
    }
    let panel = panels
        .entry(order_id.clone())
        .or_insert_with(|| OrderPanel::new(order_id.clone()));
    Ok(panel_json(panel, &state.config.dual_pricing, Utc::now()))
}

pub async fn order_panel_state(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "order panel")?;
    with_panel(state, &payload.order_id, |_| Ok(()))
}

pub async fn order_panel_update_quantity(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    let quantity = payload.quantity.ok_or("Missing quantity")?;
    with_panel(state, &payload.order_id, |p| {
        p.update_quantity(&payload.line_id, quantity).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_remove(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    with_panel(state, &payload.order_id, |p| {
        p.remove_pending(&payload.line_id)
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
}

pub async fn order_panel_void(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    with_panel(state, &payload.order_id, |p| {
        p.void_line(&payload.line_id).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_set_seat(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    with_panel(state, &payload.order_id, |p| {
        p.set_seat(&payload.line_id, payload.seat).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_set_course(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    with_panel(state, &payload.order_id, |p| {
        p.set_course(&payload.line_id, payload.course).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_hold(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    let held = payload.held.unwrap_or(true);
    with_panel(state, &payload.order_id, |p| {
        p.hold_line(&payload.line_id, held).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_delay(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    let seconds = payload.delay_seconds.unwrap_or(0);
    with_panel(state, &payload.order_id, |p| {
        p.delay_line(&payload.line_id, seconds).map_err(|e| e.to_string())
    })
}

pub async fn order_panel_delay_course(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: CourseDelayPayload = parse_payload(arg0, "course delay")?;
    with_panel(state, &payload.order_id, |p| {
        p.delay_course(payload.course, payload.delay_seconds);
        Ok(())
    })
}

/// Kitchen status pushed by the dashboard (cooking, ready, served).
pub async fn order_panel_set_status(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: LinePayload = parse_payload(arg0, "order line")?;
    let status = payload.status.ok_or("Missing status")?;
    with_panel(state, &payload.order_id, |p| {
        p.set_status(&payload.line_id, status).map_err(|e| e.to_string())
    })
}

/// Fire pending, unheld lines to the kitchen. The panel is not locked while
/// the request is in flight.
pub async fn order_panel_send(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "order panel")?;
    let (body, sent_ids) = {
        let panels = lock(&state.panels)?;
        let panel = panels
            .get(&payload.order_id)
            .ok_or_else(|| panel_not_found(&payload.order_id))?;
        (panel.send_payload().map_err(|e| e.to_string())?, panel.sendable_ids())
    };

    let resp = state
        .api
        .send_order_items(&payload.order_id, &body)
        .await
        .map_err(|e| format!("Failed to send order: {e}"))?;

    with_panel(state, &payload.order_id, |p| {
        p.apply_send_response(&sent_ids, &resp, Utc::now());
        Ok(())
    })
}

/// Push `order_panel_tick` events for the panel's running delays until they
/// are all ready, the panel closes, or the front-end unwatches.
pub async fn order_panel_watch(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: WatchPayload = parse_payload(arg0, "order panel")?;
    let sink = state.event_sender().ok_or("No event channel attached")?;
    let period = Duration::from_millis(payload.period_ms.max(50));
    let spawned = lock(&state.panels)?
        .get(&payload.order_id)
        .ok_or_else(|| panel_not_found(&payload.order_id))?
        .spawn_ticker(Utc::now(), period);

    let Some((ticker, mut rx)) = spawned else {
        lock(&state.tickers)?.remove(&payload.order_id);
        return Ok(json!({ "watching": false }));
    };
    let order_id = payload.order_id.clone();
    tokio::spawn(async move {
        while let Some(tick) = rx.recv().await {
            let event = json!({ "event": "order_panel_tick", "payload": { "orderId": order_id, "tick": tick } });
            if sink.send(event).await.is_err() {
                break;
            }
        }
        debug!(order_id = %order_id, "order panel watch ended");
    });
    // Replacing a previous ticker drops it, which stops it.
    lock(&state.tickers)?.insert(payload.order_id, ticker);
    Ok(json!({ "watching": true }))
}

pub async fn order_panel_unwatch(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "order panel")?;
    let stopped = lock(&state.tickers)?.remove(&payload.order_id).is_some();
    Ok(json!({ "watching": false, "stopped": stopped }))
}

pub async fn order_panel_close(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OrderPayload = parse_payload(arg0, "order panel")?;
    lock(&state.tickers)?.remove(&payload.order_id);
    let removed = lock(&state.panels)?.remove(&payload.order_id).is_some();
    Ok(json!({ "success": true, "closed": removed }))
}
