//! Order panel state: the lines of the open order, their kitchen status,
//! seat/course placement and delayed fires.
//!
//! Pending lines are local until sent. Once the kitchen has a line it can
//! only be voided, and its status comes from the server.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::DualPricingConfig;
use crate::menu::SelectedModifier;
use crate::modifiers::ConfirmedItem;
use crate::pricing::{round_money, DualPrice};
use crate::timers::{CountdownTicker, DelayTimer, Tick};
use crate::value_str;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order line {0} not found")]
    UnknownLine(String),
    #[error("{0} has already been sent to the kitchen; void it instead")]
    AlreadySent(String),
    #[error("{0} has not been sent yet; remove it instead")]
    NotSent(String),
    #[error("{0} is already voided")]
    AlreadyVoided(String),
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Nothing to send")]
    NothingToSend,
}

// ---------------------------------------------------------------------------
// Kitchen status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KitchenStatus {
    #[default]
    Pending,
    Sent,
    #[serde(alias = "preparing", alias = "in_progress")]
    Cooking,
    Ready,
    #[serde(alias = "delivered", alias = "completed")]
    Served,
    #[serde(alias = "void", alias = "cancelled")]
    Voided,
}

impl KitchenStatus {
    pub fn is_pending(self) -> bool {
        self == KitchenStatus::Pending
    }

    /// In the kitchen's hands and still counted on the check.
    pub fn is_sent(self) -> bool {
        matches!(
            self,
            KitchenStatus::Sent | KitchenStatus::Cooking | KitchenStatus::Ready | KitchenStatus::Served
        )
    }

    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.trim().to_lowercase())).ok()
    }
}

/// Badge text shown on a line.
pub fn badge(status: KitchenStatus) -> &'static str {
    match status {
        KitchenStatus::Pending => "NEW",
        KitchenStatus::Sent => "SENT",
        KitchenStatus::Cooking => "COOKING",
        KitchenStatus::Ready => "READY",
        KitchenStatus::Served => "SERVED",
        KitchenStatus::Voided => "VOID",
    }
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPanelItemData {
    pub id: String,
    #[serde(default, alias = "menu_item_id")]
    pub menu_item_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    /// Unit price before modifiers.
    pub price: Decimal,
    #[serde(default)]
    pub modifiers: Vec<SelectedModifier>,
    #[serde(default, alias = "kitchen_status", alias = "status")]
    pub kitchen_status: KitchenStatus,
    #[serde(default, alias = "seat_number", alias = "seat")]
    pub seat_number: Option<u32>,
    #[serde(default, alias = "course_number", alias = "course")]
    pub course_number: Option<u32>,
    #[serde(default, alias = "is_held")]
    pub is_held: bool,
    #[serde(default, alias = "delay_seconds")]
    pub delay_seconds: Option<i64>,
    #[serde(default, alias = "delay_started_at")]
    pub delay_started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "sent_at")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "special_notes", alias = "notes")]
    pub special_notes: Option<String>,
}

impl OrderPanelItemData {
    pub fn from_confirmed(item: ConfirmedItem, quantity: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            menu_item_id: Some(item.item_id),
            name: match item.pour_size {
                Some(pour) => format!("{} ({pour})", item.name),
                None => item.name,
            },
            quantity,
            price: item.base_price,
            modifiers: item.modifiers,
            kitchen_status: KitchenStatus::Pending,
            seat_number: None,
            course_number: None,
            is_held: false,
            delay_seconds: None,
            delay_started_at: None,
            sent_at: None,
            special_notes: None,
        }
    }

    pub fn modifier_total(&self) -> Decimal {
        self.modifiers.iter().map(|m| m.price).sum()
    }

    pub fn unit_total(&self) -> Decimal {
        self.price + self.modifier_total()
    }

    pub fn line_total(&self) -> Decimal {
        round_money(self.unit_total() * Decimal::from(self.quantity))
    }

    /// Only once the server has started the clock.
    pub fn delay_timer(&self) -> Option<DelayTimer> {
        Some(DelayTimer::new(self.delay_started_at?, self.delay_seconds?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDelay {
    pub delay_seconds: i64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub item_count: u32,
    pub subtotal: Decimal,
    pub modifier_total: Decimal,
    pub total: DualPrice,
}

// ---------------------------------------------------------------------------
// Panel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OrderPanel {
    order_id: String,
    lines: Vec<OrderPanelItemData>,
    course_delays: BTreeMap<u32, CourseDelay>,
}

impl OrderPanel {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Default::default()
        }
    }

    pub fn from_lines(order_id: impl Into<String>, lines: Vec<OrderPanelItemData>) -> Self {
        Self {
            order_id: order_id.into(),
            lines,
            course_delays: BTreeMap::new(),
        }
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn lines(&self) -> &[OrderPanelItemData] {
        &self.lines
    }

    pub fn line(&self, line_id: &str) -> Option<&OrderPanelItemData> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    fn line_mut(&mut self, line_id: &str) -> Result<&mut OrderPanelItemData, OrderError> {
        self.lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| OrderError::UnknownLine(line_id.to_string()))
    }

    fn pending_mut(&mut self, line_id: &str) -> Result<&mut OrderPanelItemData, OrderError> {
        let line = self.line_mut(line_id)?;
        if !line.kitchen_status.is_pending() {
            return Err(OrderError::AlreadySent(line.name.clone()));
        }
        Ok(line)
    }

    pub fn pending_items(&self) -> Vec<&OrderPanelItemData> {
        self.lines.iter().filter(|l| l.kitchen_status.is_pending()).collect()
    }

    pub fn sent_items(&self) -> Vec<&OrderPanelItemData> {
        self.lines.iter().filter(|l| l.kitchen_status.is_sent()).collect()
    }

    /// Lines grouped by course, unassigned lines first.
    pub fn group_by_course(&self) -> Vec<(Option<u32>, Vec<&OrderPanelItemData>)> {
        group_by(&self.lines, |l| l.course_number)
    }

    /// Lines grouped by seat, shared lines first.
    pub fn group_by_seat(&self) -> Vec<(Option<u32>, Vec<&OrderPanelItemData>)> {
        group_by(&self.lines, |l| l.seat_number)
    }

    pub fn totals(&self, cfg: &DualPricingConfig) -> OrderTotals {
        let live = self.lines.iter().filter(|l| l.kitchen_status != KitchenStatus::Voided);
        let mut item_count = 0;
        let mut subtotal = Decimal::ZERO;
        let mut modifier_total = Decimal::ZERO;
        for line in live {
            item_count += line.quantity;
            subtotal += line.line_total();
            modifier_total += line.modifier_total() * Decimal::from(line.quantity);
        }
        OrderTotals {
            item_count,
            subtotal,
            modifier_total: round_money(modifier_total),
            total: DualPrice::from_cash(subtotal, cfg),
        }
    }

    // -- item actions --------------------------------------------------------

    pub fn add_line(
        &mut self,
        item: ConfirmedItem,
        quantity: u32,
        seat: Option<u32>,
        course: Option<u32>,
    ) -> Result<String, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        let mut line = OrderPanelItemData::from_confirmed(item, quantity);
        line.seat_number = seat;
        line.course_number = course;
        let id = line.id.clone();
        debug!(order_id = %self.order_id, line_id = %id, name = %line.name, quantity, "order line added");
        self.lines.push(line);
        Ok(id)
    }

    pub fn update_quantity(&mut self, line_id: &str, quantity: u32) -> Result<(), OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        self.pending_mut(line_id)?.quantity = quantity;
        Ok(())
    }

    pub fn remove_pending(&mut self, line_id: &str) -> Result<OrderPanelItemData, OrderError> {
        self.pending_mut(line_id)?;
        let idx = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| OrderError::UnknownLine(line_id.to_string()))?;
        Ok(self.lines.remove(idx))
    }

    pub fn void_line(&mut self, line_id: &str) -> Result<(), OrderError> {
        let order_id = self.order_id.clone();
        let line = self.line_mut(line_id)?;
        match line.kitchen_status {
            KitchenStatus::Pending => Err(OrderError::NotSent(line.name.clone())),
            KitchenStatus::Voided => Err(OrderError::AlreadyVoided(line.name.clone())),
            _ => {
                line.kitchen_status = KitchenStatus::Voided;
                info!(order_id = %order_id, line_id, name = %line.name, "order line voided");
                Ok(())
            }
        }
    }

    pub fn set_seat(&mut self, line_id: &str, seat: Option<u32>) -> Result<(), OrderError> {
        let line = self.line_mut(line_id)?;
        if line.kitchen_status == KitchenStatus::Voided {
            return Err(OrderError::AlreadyVoided(line.name.clone()));
        }
        line.seat_number = seat.filter(|s| *s > 0);
        Ok(())
    }

    pub fn set_course(&mut self, line_id: &str, course: Option<u32>) -> Result<(), OrderError> {
        self.pending_mut(line_id)?.course_number = course.filter(|c| *c > 0);
        Ok(())
    }

    /// Held lines stay on the panel but are skipped by the next send.
    pub fn hold_line(&mut self, line_id: &str, held: bool) -> Result<(), OrderError> {
        self.pending_mut(line_id)?.is_held = held;
        Ok(())
    }

    /// Fire this line `seconds` after the send. Zero clears the delay.
    pub fn delay_line(&mut self, line_id: &str, seconds: i64) -> Result<(), OrderError> {
        let line = self.pending_mut(line_id)?;
        line.delay_seconds = (seconds > 0).then_some(seconds);
        line.delay_started_at = None;
        Ok(())
    }

    pub fn delay_course(&mut self, course: u32, seconds: i64) {
        if seconds > 0 {
            self.course_delays.insert(
                course,
                CourseDelay {
                    delay_seconds: seconds,
                    started_at: None,
                },
            );
        } else {
            self.course_delays.remove(&course);
        }
    }

    pub fn course_delay(&self, course: u32) -> Option<&CourseDelay> {
        self.course_delays.get(&course)
    }

    // -- send ------------------------------------------------------------------

    /// Lines the next send would fire: pending and not held.
    pub fn sendable_ids(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| l.kitchen_status.is_pending() && !l.is_held)
            .map(|l| l.id.clone())
            .collect()
    }

    /// Body for `POST /api/orders/{id}/send`.
    pub fn send_payload(&self) -> Result<Value, OrderError> {
        let ids = self.sendable_ids();
        if ids.is_empty() {
            return Err(OrderError::NothingToSend);
        }
        let sending: Vec<&OrderPanelItemData> =
            self.lines.iter().filter(|l| ids.contains(&l.id)).collect();

        let items: Vec<Value> = sending
            .iter()
            .map(|l| {
                json!({
                    "id": l.id,
                    "menuItemId": l.menu_item_id,
                    "name": l.name,
                    "quantity": l.quantity,
                    "price": l.price,
                    "modifiers": l.modifiers,
                    "seatNumber": l.seat_number,
                    "courseNumber": l.course_number,
                    "specialNotes": l.special_notes,
                })
            })
            .collect();
        let item_delays: Vec<Value> = sending
            .iter()
            .filter_map(|l| Some(json!({ "itemId": l.id, "delaySeconds": l.delay_seconds? })))
            .collect();
        let course_delays: Vec<Value> = self
            .course_delays
            .iter()
            .filter(|(course, _)| sending.iter().any(|l| l.course_number == Some(**course)))
            .map(|(course, d)| json!({ "courseNumber": course, "delaySeconds": d.delay_seconds }))
            .collect();

        Ok(json!({
            "itemIds": ids,
            "items": items,
            "itemDelays": item_delays,
            "courseDelays": course_delays,
        }))
    }

    /// Fold the server's answer to a send back into the panel. Lines the
    /// server echoes take its status and timestamps; lines it does not
    /// mention are marked sent as of `now`.
    pub fn apply_send_response(&mut self, sent_ids: &[String], response: &Value, now: DateTime<Utc>) {
        let echoed: Vec<&Value> = response
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default();

        for line in self.lines.iter_mut().filter(|l| sent_ids.contains(&l.id)) {
            let server = echoed
                .iter()
                .find(|v| value_str(v, &["id", "itemId", "item_id"]).as_deref() == Some(line.id.as_str()));
            let status = server
                .and_then(|v| value_str(v, &["kitchenStatus", "kitchen_status", "status"]))
                .and_then(|s| KitchenStatus::parse(&s))
                .unwrap_or(KitchenStatus::Sent);
            line.kitchen_status = status;
            line.sent_at = server
                .and_then(|v| parse_time(v, &["sentAt", "sent_at"]))
                .or(Some(now));
            if line.delay_seconds.is_some() {
                line.delay_started_at = server
                    .and_then(|v| parse_time(v, &["delayStartedAt", "delay_started_at"]))
                    .or(Some(now));
            }
        }

        let server_courses: Vec<&Value> = response
            .get("courseDelays")
            .or_else(|| response.get("course_delays"))
            .and_then(Value::as_array)
            .map(|c| c.iter().collect())
            .unwrap_or_default();
        let fired_courses: Vec<u32> = self
            .lines
            .iter()
            .filter(|l| sent_ids.contains(&l.id))
            .filter_map(|l| l.course_number)
            .collect();
        for (course, delay) in self.course_delays.iter_mut() {
            if !fired_courses.contains(course) || delay.started_at.is_some() {
                continue;
            }
            let server = server_courses.iter().find(|v| {
                v.get("courseNumber")
                    .or_else(|| v.get("course_number"))
                    .and_then(Value::as_u64)
                    == Some(u64::from(*course))
            });
            delay.started_at = server
                .and_then(|v| parse_time(v, &["startedAt", "started_at"]))
                .or(Some(now));
        }

        info!(order_id = %self.order_id, count = sent_ids.len(), "order lines sent to kitchen");
    }

    /// Kitchen status pushed by the server.
    pub fn set_status(&mut self, line_id: &str, status: KitchenStatus) -> Result<(), OrderError> {
        self.line_mut(line_id)?.kitchen_status = status;
        Ok(())
    }

    // -- timers ----------------------------------------------------------------

    /// Every running delay, keyed `item:<line id>` or `course:<n>`.
    pub fn timers(&self) -> Vec<(String, DelayTimer)> {
        let items = self
            .lines
            .iter()
            .filter(|l| l.kitchen_status != KitchenStatus::Voided)
            .filter_map(|l| Some((format!("item:{}", l.id), l.delay_timer()?)));
        let courses = self.course_delays.iter().filter_map(|(course, d)| {
            Some((format!("course:{course}"), DelayTimer::new(d.started_at?, d.delay_seconds)))
        });
        items.chain(courses).collect()
    }

    /// Start a ticker over the timers still counting down at `now`.
    pub fn spawn_ticker(
        &self,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Option<(CountdownTicker, mpsc::Receiver<Tick>)> {
        let running: Vec<(String, DelayTimer)> =
            self.timers().into_iter().filter(|(_, t)| !t.is_ready(now)).collect();
        (!running.is_empty()).then(|| CountdownTicker::spawn(running, period))
    }
}

fn group_by<F>(lines: &[OrderPanelItemData], key: F) -> Vec<(Option<u32>, Vec<&OrderPanelItemData>)>
where
    F: Fn(&OrderPanelItemData) -> Option<u32>,
{
    // `None` sorts before `Some`, so unassigned lines lead.
    let mut groups: BTreeMap<Option<u32>, Vec<&OrderPanelItemData>> = BTreeMap::new();
    for line in lines {
        groups.entry(key(line)).or_default().push(line);
    }
    groups.into_iter().collect()
}

fn parse_time(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = value_str(v, keys)?;
    DateTime::parse_from_rfc3339(&raw).ok().map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn confirmed(name: &str, cents: i64, mods: &[(&str, i64)]) -> ConfirmedItem {
        let modifiers: Vec<SelectedModifier> = mods
            .iter()
            .map(|(n, c)| SelectedModifier {
                modifier_id: n.to_lowercase(),
                group_id: "g".into(),
                name: n.to_string(),
                price: money(*c),
                pre_modifier: None,
                depth: 0,
                parent_modifier_id: None,
                spirit_tier: None,
            })
            .collect();
        let unit_price = money(cents) + modifiers.iter().map(|m| m.price).sum::<Decimal>();
        ConfirmedItem {
            item_id: name.to_lowercase(),
            name: name.into(),
            base_price: money(cents),
            pour_size: None,
            modifiers,
            unit_price,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn totals_include_modifiers_and_skip_voids() {
        let mut panel = OrderPanel::new("o1");
        let burger = panel
            .add_line(confirmed("Burger", 1200, &[("Bacon", 200)]), 2, Some(1), Some(1))
            .unwrap();
        let fries = panel.add_line(confirmed("Fries", 450, &[]), 1, Some(2), Some(1)).unwrap();

        let cfg = DualPricingConfig {
            enabled: true,
            card_surcharge_percent: Decimal::from(4),
        };
        let totals = panel.totals(&cfg);
        assert_eq!(totals.item_count, 3);
        assert_eq!(totals.subtotal, money(3250));
        assert_eq!(totals.modifier_total, money(400));
        assert_eq!(totals.total.card, money(3380));

        panel.apply_send_response(&[fries.clone()], &Value::Null, at(0));
        panel.void_line(&fries).unwrap();
        assert_eq!(panel.totals(&cfg).subtotal, money(2800));
        assert_eq!(panel.line(&burger).unwrap().line_total(), money(2800));
    }

    #[test]
    fn sent_lines_can_only_be_voided() {
        let mut panel = OrderPanel::new("o1");
        let id = panel.add_line(confirmed("Wings", 1100, &[]), 1, None, None).unwrap();
        assert_eq!(panel.void_line(&id), Err(OrderError::NotSent("Wings".into())));

        panel.apply_send_response(&[id.clone()], &json!({}), at(0));
        assert!(matches!(panel.remove_pending(&id), Err(OrderError::AlreadySent(_))));
        assert!(matches!(panel.update_quantity(&id, 3), Err(OrderError::AlreadySent(_))));
        panel.void_line(&id).unwrap();
        assert!(matches!(panel.void_line(&id), Err(OrderError::AlreadyVoided(_))));
        assert!(panel.sent_items().is_empty());
    }

    #[test]
    fn pending_lines_are_editable() {
        let mut panel = OrderPanel::new("o1");
        let id = panel.add_line(confirmed("Wings", 1100, &[]), 1, None, None).unwrap();
        panel.update_quantity(&id, 3).unwrap();
        assert_eq!(panel.line(&id).unwrap().quantity, 3);
        assert_eq!(panel.update_quantity(&id, 0), Err(OrderError::InvalidQuantity));
        let removed = panel.remove_pending(&id).unwrap();
        assert_eq!(removed.name, "Wings");
        assert!(panel.lines().is_empty());
    }

    #[test]
    fn groups_by_course_and_seat() {
        let mut panel = OrderPanel::new("o1");
        panel.add_line(confirmed("Soup", 600, &[]), 1, Some(2), Some(1)).unwrap();
        panel.add_line(confirmed("Steak", 3000, &[]), 1, Some(2), Some(2)).unwrap();
        panel.add_line(confirmed("Bread", 0, &[]), 1, None, None).unwrap();

        let courses = panel.group_by_course();
        let keys: Vec<Option<u32>> = courses.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![None, Some(1), Some(2)]);

        let seats = panel.group_by_seat();
        assert_eq!(seats.len(), 2);
        assert_eq!(seats[1].1.len(), 2);
    }

    #[test]
    fn send_payload_skips_held_lines_and_carries_delays() {
        let mut panel = OrderPanel::new("o1");
        let app = panel.add_line(confirmed("Nachos", 900, &[]), 1, None, Some(1)).unwrap();
        let main = panel.add_line(confirmed("Ribs", 2400, &[]), 1, None, Some(2)).unwrap();
        let held = panel.add_line(confirmed("Cake", 700, &[]), 1, None, Some(3)).unwrap();
        panel.hold_line(&held, true).unwrap();
        panel.delay_line(&app, 120).unwrap();
        panel.delay_course(2, 600);
        panel.delay_course(3, 900);

        let body = panel.send_payload().unwrap();
        assert_eq!(body["itemIds"], json!([app, main]));
        assert_eq!(body["itemDelays"], json!([{ "itemId": app, "delaySeconds": 120 }]));
        assert_eq!(body["courseDelays"], json!([{ "courseNumber": 2, "delaySeconds": 600 }]));
    }

    #[test]
    fn nothing_to_send_when_everything_is_held() {
        let mut panel = OrderPanel::new("o1");
        let id = panel.add_line(confirmed("Cake", 700, &[]), 1, None, None).unwrap();
        panel.hold_line(&id, true).unwrap();
        assert_eq!(panel.send_payload(), Err(OrderError::NothingToSend));
    }

    #[test]
    fn send_response_starts_timers_from_server_clock() {
        let mut panel = OrderPanel::new("o1");
        let app = panel.add_line(confirmed("Nachos", 900, &[]), 1, None, Some(1)).unwrap();
        let main = panel.add_line(confirmed("Ribs", 2400, &[]), 1, None, Some(2)).unwrap();
        panel.delay_line(&app, 300).unwrap();
        panel.delay_course(2, 600);

        let response = json!({
            "items": [
                { "id": app, "kitchenStatus": "cooking", "delayStartedAt": "2023-11-14T22:13:20Z" }
            ],
            "courseDelays": [{ "courseNumber": 2, "startedAt": "2023-11-14T22:13:30Z" }]
        });
        panel.apply_send_response(&[app.clone(), main.clone()], &response, at(100));

        assert_eq!(panel.line(&app).unwrap().kitchen_status, KitchenStatus::Cooking);
        assert_eq!(panel.line(&main).unwrap().kitchen_status, KitchenStatus::Sent);
        assert_eq!(panel.line(&main).unwrap().sent_at, Some(at(100)));

        let timers = panel.timers();
        let item = timers.iter().find(|(k, _)| k == &format!("item:{app}")).unwrap().1;
        assert_eq!(item.started_at, at(0));
        assert_eq!(item.label(at(60)), "4:00");
        let course = timers.iter().find(|(k, _)| k == "course:2").unwrap().1;
        assert_eq!(course.remaining_secs(at(10)), 600);
        assert_eq!(panel.course_delay(2).unwrap().started_at, Some(at(10)));
    }

    #[tokio::test]
    async fn ticker_pushes_running_delays_only() {
        let mut panel = OrderPanel::new("o1");
        let app = panel.add_line(confirmed("Nachos", 900, &[]), 1, None, Some(1)).unwrap();
        let main = panel.add_line(confirmed("Ribs", 2400, &[]), 1, None, Some(2)).unwrap();
        panel.delay_line(&app, 300).unwrap();
        panel.delay_line(&main, 60).unwrap();
        let now = Utc::now();
        panel.apply_send_response(
            &[app.clone(), main.clone()],
            &Value::Null,
            now - chrono::Duration::seconds(120),
        );
        assert!(OrderPanel::new("empty").spawn_ticker(now, Duration::from_millis(10)).is_none());

        let (ticker, mut rx) = panel.spawn_ticker(now, Duration::from_millis(10)).unwrap();
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.id, format!("item:{app}"));
        assert!(!tick.ready);
        assert!(tick.remaining_secs > 0 && tick.remaining_secs <= 180);

        ticker.stop();
        while rx.recv().await.is_some() {}
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn lenient_line_parsing() {
        let line: OrderPanelItemData = serde_json::from_value(json!({
            "id": "l1", "name": "IPA", "quantity": 2, "price": 7.5,
            "status": "preparing", "seat": 3
        }))
        .unwrap();
        assert_eq!(line.kitchen_status, KitchenStatus::Cooking);
        assert_eq!(line.seat_number, Some(3));
        assert_eq!(badge(line.kitchen_status), "COOKING");
    }
}
