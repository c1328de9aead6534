//! Split tickets: redistributing an order's lines across several checks and
//! pricing each check's share of the order-level adjustments.
//!
//! Every line quantity of the source order lives on exactly one ticket at a
//! time. Moves that would break that are rejected, not clamped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::orders::{KitchenStatus, OrderPanelItemData};
use crate::pricing::round_money;

/// Upper bound for an even split; one check per seat at the largest table.
pub const MAX_SPLIT_TICKETS: usize = 20;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("Ticket {0} not found")]
    UnknownTicket(String),
    #[error("Item {0} is not on this ticket")]
    UnknownLine(String),
    #[error("Only {available} of {name} on this ticket")]
    InsufficientQuantity { name: String, available: u32 },
    #[error("Ticket #{0} is already paid")]
    TicketLocked(u32),
    #[error("Source and destination ticket are the same")]
    SameTicket,
    #[error("No open ticket left to take the items")]
    NoOpenTicket,
    #[error("Split count must be between 2 and {}", MAX_SPLIT_TICKETS)]
    InvalidCount,
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    Open,
    /// Card pre-authorised; the items are committed.
    Authorized,
    Paid,
}

impl TicketStatus {
    pub fn is_locked(self) -> bool {
        self != TicketStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitItem {
    #[serde(alias = "line_id", alias = "orderItemId")]
    pub line_id: String,
    pub name: String,
    pub quantity: u32,
    #[serde(alias = "unit_price")]
    pub unit_price: Decimal,
}

impl SplitItem {
    pub fn total(&self) -> Decimal {
        round_money(self.unit_price * Decimal::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitTicket {
    pub id: String,
    pub display_number: u32,
    pub items: Vec<SplitItem>,
    pub subtotal: Decimal,
    pub status: TicketStatus,
}

impl SplitTicket {
    fn new(display_number: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_number,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            status: TicketStatus::Open,
        }
    }

    fn recompute(&mut self) {
        self.subtotal = self.items.iter().map(SplitItem::total).sum();
    }

    /// Add quantity of a line, merging with a split-off part already here.
    fn put(&mut self, item: SplitItem) {
        match self.items.iter_mut().find(|i| i.line_id == item.line_id) {
            Some(existing) => existing.quantity += item.quantity,
            None => self.items.push(item),
        }
        self.recompute();
    }

    fn take(&mut self, line_id: &str, quantity: Option<u32>) -> Result<SplitItem, SplitError> {
        let idx = self
            .items
            .iter()
            .position(|i| i.line_id == line_id)
            .ok_or_else(|| SplitError::UnknownLine(line_id.to_string()))?;
        let available = self.items[idx].quantity;
        let qty = quantity.unwrap_or(available);
        if qty == 0 {
            return Err(SplitError::InvalidQuantity);
        }
        if qty > available {
            return Err(SplitError::InsufficientQuantity {
                name: self.items[idx].name.clone(),
                available,
            });
        }
        let taken = if qty == available {
            self.items.remove(idx)
        } else {
            self.items[idx].quantity -= qty;
            SplitItem {
                quantity: qty,
                ..self.items[idx].clone()
            }
        };
        self.recompute();
        Ok(taken)
    }
}

/// Order-level amounts shared across tickets in proportion to subtotal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderAdjustments {
    pub discount: Decimal,
    pub tax: Decimal,
    pub surcharge: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAllocation {
    pub ticket_id: String,
    pub display_number: u32,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub surcharge: Decimal,
    pub total: Decimal,
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Split `amount` across `weights` to the cent. Each share is the floor of
/// its proportional cents; leftover cents go to the largest remainders, ties
/// to the earlier share. Shares always sum to `amount` rounded to cents.
/// All-zero weights split evenly.
pub fn allocate_cents(amount: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    if weights.is_empty() {
        return Vec::new();
    }
    let hundred = Decimal::ONE_HUNDRED;
    let cents = round_money(amount) * hundred;
    let negative = cents.is_sign_negative();
    let cents = cents.abs();

    let total_weight: Decimal = weights.iter().map(|w| (*w).max(Decimal::ZERO)).sum();
    let raw: Vec<Decimal> = if total_weight.is_zero() {
        let n = Decimal::from(weights.len());
        weights.iter().map(|_| cents / n).collect()
    } else {
        weights
            .iter()
            .map(|w| cents * (*w).max(Decimal::ZERO) / total_weight)
            .collect()
    };

    let mut shares: Vec<Decimal> = raw.iter().map(|r| r.floor()).collect();
    let mut leftover = cents - shares.iter().copied().sum::<Decimal>();

    let mut order: Vec<usize> = (0..raw.len()).collect();
    order.sort_by(|&a, &b| (raw[b] - shares[b]).cmp(&(raw[a] - shares[a])).then(a.cmp(&b)));
    for idx in order.into_iter().cycle() {
        if leftover <= Decimal::ZERO {
            break;
        }
        shares[idx] += Decimal::ONE;
        leftover -= Decimal::ONE;
    }

    shares
        .into_iter()
        .map(|c| {
            let value = c / hundred;
            if negative {
                -value
            } else {
                value
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SplitTicketManager {
    order_id: String,
    tickets: Vec<SplitTicket>,
    selected: Option<String>,
    line_quantities: HashMap<String, u32>,
}

impl SplitTicketManager {
    /// Every live line of the order starts on ticket #1.
    pub fn from_order(order_id: impl Into<String>, lines: &[OrderPanelItemData]) -> Self {
        let mut first = SplitTicket::new(1);
        let mut line_quantities = HashMap::new();
        for line in lines
            .iter()
            .filter(|l| l.kitchen_status != KitchenStatus::Voided && l.quantity > 0)
        {
            line_quantities.insert(line.id.clone(), line.quantity);
            first.put(SplitItem {
                line_id: line.id.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_total(),
            });
        }
        let selected = Some(first.id.clone());
        Self {
            order_id: order_id.into(),
            tickets: vec![first],
            selected,
            line_quantities,
        }
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn tickets(&self) -> &[SplitTicket] {
        &self.tickets
    }

    pub fn ticket(&self, ticket_id: &str) -> Option<&SplitTicket> {
        self.tickets.iter().find(|t| t.id == ticket_id)
    }

    fn index_of(&self, ticket_id: &str) -> Result<usize, SplitError> {
        self.tickets
            .iter()
            .position(|t| t.id == ticket_id)
            .ok_or_else(|| SplitError::UnknownTicket(ticket_id.to_string()))
    }

    fn open_index(&self, ticket_id: &str) -> Result<usize, SplitError> {
        let idx = self.index_of(ticket_id)?;
        let ticket = &self.tickets[idx];
        if ticket.status.is_locked() {
            return Err(SplitError::TicketLocked(ticket.display_number));
        }
        Ok(idx)
    }

    fn next_display_number(&self) -> u32 {
        self.tickets.iter().map(|t| t.display_number).max().unwrap_or(0) + 1
    }

    pub fn selected(&self) -> Option<&SplitTicket> {
        self.selected.as_deref().and_then(|id| self.ticket(id))
    }

    pub fn select(&mut self, ticket_id: &str) -> Result<(), SplitError> {
        self.index_of(ticket_id)?;
        self.selected = Some(ticket_id.to_string());
        Ok(())
    }

    pub fn add_ticket(&mut self) -> String {
        let ticket = SplitTicket::new(self.next_display_number());
        let id = ticket.id.clone();
        debug!(order_id = %self.order_id, display_number = ticket.display_number, "split ticket added");
        self.tickets.push(ticket);
        id
    }

    /// Remove a ticket, returning its items to the lowest-numbered open
    /// ticket that remains.
    pub fn remove_ticket(&mut self, ticket_id: &str) -> Result<(), SplitError> {
        let idx = self.open_index(ticket_id)?;
        let target = self
            .tickets
            .iter()
            .enumerate()
            .filter(|(i, t)| *i != idx && !t.status.is_locked())
            .min_by_key(|(_, t)| t.display_number)
            .map(|(i, _)| i)
            .ok_or(SplitError::NoOpenTicket)?;

        let removed = self.tickets.remove(idx);
        let target = if target > idx { target - 1 } else { target };
        for item in removed.items {
            self.tickets[target].put(item);
        }
        if self.selected.as_deref() == Some(removed.id.as_str()) {
            self.selected = Some(self.tickets[target].id.clone());
        }
        debug!(order_id = %self.order_id, display_number = removed.display_number, "split ticket removed");
        Ok(())
    }

    /// Move `quantity` of a line (all of it when `None`) between tickets.
    /// A partial move splits the line across both tickets.
    pub fn move_item(
        &mut self,
        line_id: &str,
        from: &str,
        to: &str,
        quantity: Option<u32>,
    ) -> Result<(), SplitError> {
        if from == to {
            return Err(SplitError::SameTicket);
        }
        let from_idx = self.open_index(from)?;
        let to_idx = self.open_index(to)?;
        let item = self.tickets[from_idx].take(line_id, quantity)?;
        debug!(
            order_id = %self.order_id,
            line_id,
            quantity = item.quantity,
            from = self.tickets[from_idx].display_number,
            to = self.tickets[to_idx].display_number,
            "split item moved"
        );
        self.tickets[to_idx].put(item);
        Ok(())
    }

    /// Re-deal every open item round-robin, one line at a time, across `n`
    /// fresh tickets. Locked tickets keep their items.
    pub fn split_evenly(&mut self, n: usize) -> Result<(), SplitError> {
        if !(2..=MAX_SPLIT_TICKETS).contains(&n) {
            return Err(SplitError::InvalidCount);
        }
        let (open, locked): (Vec<SplitTicket>, Vec<SplitTicket>) =
            self.tickets.drain(..).partition(|t| !t.status.is_locked());
        self.tickets = locked;

        let mut items: Vec<SplitItem> = Vec::new();
        for item in open.into_iter().flat_map(|t| t.items) {
            match items.iter_mut().find(|i| i.line_id == item.line_id) {
                Some(existing) => existing.quantity += item.quantity,
                None => items.push(item),
            }
        }

        let first_new = self.tickets.len();
        for _ in 0..n {
            let ticket = SplitTicket::new(self.next_display_number());
            self.tickets.push(ticket);
        }
        for (i, item) in items.into_iter().enumerate() {
            self.tickets[first_new + i % n].put(item);
        }
        self.selected = Some(self.tickets[first_new].id.clone());
        info!(order_id = %self.order_id, tickets = n, "order split evenly");
        Ok(())
    }

    pub fn set_status(&mut self, ticket_id: &str, status: TicketStatus) -> Result<(), SplitError> {
        let idx = self.index_of(ticket_id)?;
        self.tickets[idx].status = status;
        Ok(())
    }

    /// True when every source line quantity is on exactly one ticket.
    pub fn is_conserved(&self) -> bool {
        let mut seen: HashMap<&str, u32> = HashMap::new();
        for item in self.tickets.iter().flat_map(|t| &t.items) {
            *seen.entry(item.line_id.as_str()).or_default() += item.quantity;
        }
        seen.len() == self.line_quantities.len()
            && self
                .line_quantities
                .iter()
                .all(|(id, qty)| seen.get(id.as_str()) == Some(qty))
    }

    pub fn subtotal(&self) -> Decimal {
        self.tickets.iter().map(|t| t.subtotal).sum()
    }

    /// Per-ticket share of the order adjustments. Each column sums exactly
    /// to the order amount, so ticket totals sum to the order total.
    pub fn allocate(&self, adjustments: &OrderAdjustments) -> Vec<TicketAllocation> {
        let weights: Vec<Decimal> = self.tickets.iter().map(|t| t.subtotal).collect();
        let discounts = allocate_cents(adjustments.discount, &weights);
        let taxes = allocate_cents(adjustments.tax, &weights);
        let surcharges = allocate_cents(adjustments.surcharge, &weights);

        self.tickets
            .iter()
            .enumerate()
            .map(|(i, t)| TicketAllocation {
                ticket_id: t.id.clone(),
                display_number: t.display_number,
                subtotal: t.subtotal,
                discount: discounts[i],
                tax: taxes[i],
                surcharge: surcharges[i],
                total: t.subtotal - discounts[i] + taxes[i] + surcharges[i],
            })
            .collect()
    }

    /// Body for `POST /api/orders/{id}/split-tickets`. Empty tickets are
    /// dropped.
    pub fn split_plan(&self, adjustments: &OrderAdjustments) -> Value {
        let allocations = self.allocate(adjustments);
        let tickets: Vec<Value> = self
            .tickets
            .iter()
            .zip(allocations)
            .filter(|(t, _)| !t.items.is_empty())
            .map(|(t, a)| {
                json!({
                    "displayNumber": t.display_number,
                    "status": t.status,
                    "items": t.items.iter().map(|i| json!({
                        "orderItemId": i.line_id,
                        "quantity": i.quantity,
                    })).collect::<Vec<_>>(),
                    "subtotal": a.subtotal,
                    "discount": a.discount,
                    "tax": a.tax,
                    "surcharge": a.surcharge,
                    "total": a.total,
                })
            })
            .collect();
        json!({ "orderId": self.order_id, "tickets": tickets })
    }
}

/// Body for `POST /api/orders/{id}/merge`: fold the source orders into `{id}`.
pub fn merge_body(source_order_ids: &[String]) -> Value {
    json!({ "sourceOrderIds": source_order_ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn line(id: &str, qty: u32, cents: i64) -> OrderPanelItemData {
        serde_json::from_value(json!({
            "id": id, "name": id.to_uppercase(), "quantity": qty,
            "price": money(cents), "kitchenStatus": "sent"
        }))
        .unwrap()
    }

    fn manager() -> SplitTicketManager {
        SplitTicketManager::from_order(
            "o1",
            &[line("burger", 2, 1200), line("fries", 3, 400), line("ipa", 4, 750)],
        )
    }

    #[test]
    fn starts_with_everything_on_ticket_one() {
        let m = manager();
        assert_eq!(m.tickets().len(), 1);
        assert_eq!(m.tickets()[0].subtotal, money(6600));
        assert!(m.is_conserved());
    }

    #[test]
    fn partial_move_splits_the_line() {
        let mut m = manager();
        let first = m.tickets()[0].id.clone();
        let second = m.add_ticket();
        m.move_item("ipa", &first, &second, Some(1)).unwrap();
        m.move_item("ipa", &first, &second, Some(2)).unwrap();

        let t2 = m.ticket(&second).unwrap();
        assert_eq!(t2.items.len(), 1);
        assert_eq!(t2.items[0].quantity, 3);
        assert_eq!(t2.subtotal, money(2250));
        assert_eq!(m.ticket(&first).unwrap().subtotal, money(4350));
        assert!(m.is_conserved());

        let err = m.move_item("ipa", &first, &second, Some(5)).unwrap_err();
        assert_eq!(err, SplitError::InsufficientQuantity { name: "IPA".into(), available: 1 });
        assert_eq!(m.move_item("ipa", &first, &first, None), Err(SplitError::SameTicket));
    }

    #[test]
    fn removing_a_ticket_returns_items() {
        let mut m = manager();
        let first = m.tickets()[0].id.clone();
        let second = m.add_ticket();
        m.move_item("burger", &first, &second, None).unwrap();
        m.select(&second).unwrap();
        m.remove_ticket(&second).unwrap();

        assert_eq!(m.tickets().len(), 1);
        assert_eq!(m.tickets()[0].subtotal, money(6600));
        assert_eq!(m.selected().unwrap().id, first);
        assert!(m.is_conserved());
    }

    #[test]
    fn paid_tickets_are_locked() {
        let mut m = manager();
        let first = m.tickets()[0].id.clone();
        let second = m.add_ticket();
        m.move_item("fries", &first, &second, None).unwrap();
        m.set_status(&second, TicketStatus::Paid).unwrap();

        assert_eq!(m.remove_ticket(&second), Err(SplitError::TicketLocked(2)));
        assert_eq!(m.move_item("fries", &second, &first, None), Err(SplitError::TicketLocked(2)));
        assert_eq!(m.remove_ticket(&first), Err(SplitError::NoOpenTicket));
    }

    #[test]
    fn split_evenly_deals_round_robin() {
        let mut m = manager();
        m.split_evenly(2).unwrap();
        let subtotals: Vec<Decimal> = m.tickets().iter().map(|t| t.subtotal).collect();
        assert_eq!(subtotals, vec![money(5400), money(1200)]);
        let numbers: Vec<u32> = m.tickets().iter().map(|t| t.display_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(m.is_conserved());
        assert_eq!(m.split_evenly(1), Err(SplitError::InvalidCount));
    }

    #[test]
    fn split_evenly_rejects_oversized_count() {
        let mut m = manager();
        assert_eq!(m.split_evenly(MAX_SPLIT_TICKETS + 1), Err(SplitError::InvalidCount));
        assert_eq!(m.split_evenly(usize::MAX), Err(SplitError::InvalidCount));
        assert_eq!(m.tickets().len(), 1);
        assert!(m.is_conserved());
    }

    #[test]
    fn allocation_sums_exactly() {
        let shares = allocate_cents(money(1000), &[Decimal::ONE, Decimal::ONE, Decimal::ONE]);
        assert_eq!(shares, vec![money(334), money(333), money(333)]);

        let shares = allocate_cents(money(-100), &[money(1000), money(2000)]);
        assert_eq!(shares, vec![money(-33), money(-67)]);
        assert_eq!(shares.iter().copied().sum::<Decimal>(), money(-100));

        let even = allocate_cents(money(5), &[Decimal::ZERO, Decimal::ZERO]);
        assert_eq!(even, vec![money(3), money(2)]);
    }

    #[test]
    fn ticket_totals_add_up_to_order_total() {
        let mut m = manager();
        m.split_evenly(3).unwrap();
        let adj = OrderAdjustments {
            discount: money(500),
            tax: money(537),
            surcharge: money(199),
        };
        let allocs = m.allocate(&adj);
        let sum = |f: fn(&TicketAllocation) -> Decimal| allocs.iter().map(f).sum::<Decimal>();
        assert_eq!(sum(|a| a.discount), money(500));
        assert_eq!(sum(|a| a.tax), money(537));
        assert_eq!(sum(|a| a.surcharge), money(199));
        assert_eq!(sum(|a| a.total), money(6600 - 500 + 537 + 199));
    }

    #[test]
    fn split_plan_skips_empty_tickets() {
        let mut m = manager();
        m.add_ticket();
        let plan = m.split_plan(&OrderAdjustments::default());
        let tickets = plan["tickets"].as_array().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0]["items"].as_array().unwrap().len(), 3);
        assert_eq!(merge_body(&["o2".into()]), json!({ "sourceOrderIds": ["o2"] }));
    }
}
