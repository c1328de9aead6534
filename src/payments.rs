//! Payment action state for the order panel.
//!
//! Walks a check from method choice through tip selection and terminal
//! processing (card) or tendering (cash). The card device itself sits behind
//! [`PaymentTerminal`]; this module only builds requests and folds results.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DualPricingConfig, TerminalConfig};
use crate::pricing::{card_price, round_money};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Cannot {action} while on the {view:?} screen")]
    InvalidState { view: PaymentView, action: &'static str },
    #[error("Cash tendered {tendered} is less than {due} due")]
    InsufficientCash { due: Decimal, tendered: Decimal },
    #[error("Tip cannot be negative")]
    InvalidTip,
    #[error("Amount due must be positive")]
    InvalidAmount,
    #[error("Card declined: {0}")]
    Declined(String),
    #[error("Payment terminal error: {0}")]
    Terminal(String),
    #[error("Terminal answered for reference {0}, not this payment")]
    ReferenceMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentView {
    Method,
    TipSelection,
    CardProcessing,
    CashTender,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TipSelection {
    #[default]
    None,
    Percent(Decimal),
    Amount(Decimal),
}

impl TipSelection {
    pub fn tip_amount(&self, subtotal: Decimal) -> Decimal {
        match self {
            TipSelection::None => Decimal::ZERO,
            TipSelection::Percent(p) => round_money(subtotal * *p / Decimal::ONE_HUNDRED),
            TipSelection::Amount(a) => round_money(*a),
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            TipSelection::None => true,
            TipSelection::Percent(v) | TipSelection::Amount(v) => !v.is_sign_negative(),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Approved,
    Declined,
    Error,
    Timeout,
    Cancelled,
}

/// What the card terminal is asked to charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRequest {
    pub reference: String,
    /// Card price of the check, surcharge included, tip excluded.
    pub amount: Decimal,
    pub tip: Decimal,
    pub surcharge: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResponse {
    pub reference: String,
    pub status: TerminalStatus,
    #[serde(default)]
    pub authorization_code: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub card_last_four: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Card device driver. Implementations own the wire protocol and device
/// lifecycle.
#[async_trait]
pub trait PaymentTerminal: Send + Sync {
    fn name(&self) -> &str;

    async fn process_sale(&self, request: &TerminalRequest) -> Result<TerminalResponse, String>;

    async fn cancel(&self) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFlow {
    reference: String,
    amount_due: Decimal,
    #[serde(skip)]
    dual_pricing: DualPricingConfig,
    tip_presets: Vec<Decimal>,
    view: PaymentView,
    method: Option<PaymentMethod>,
    tip: TipSelection,
    tendered: Option<Decimal>,
    change: Option<Decimal>,
    terminal_result: Option<TerminalResponse>,
}

impl PaymentFlow {
    /// `amount_due` is the cash price of the check.
    pub fn new(amount_due: Decimal, cfg: &TerminalConfig) -> Result<Self, PaymentError> {
        if amount_due <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount);
        }
        Ok(Self {
            reference: Uuid::new_v4().to_string(),
            amount_due: round_money(amount_due),
            dual_pricing: cfg.dual_pricing.clone(),
            tip_presets: cfg.tip_presets.clone(),
            view: PaymentView::Method,
            method: None,
            tip: TipSelection::None,
            tendered: None,
            change: None,
            terminal_result: None,
        })
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn view(&self) -> PaymentView {
        self.view
    }

    pub fn method(&self) -> Option<PaymentMethod> {
        self.method
    }

    pub fn amount_due(&self) -> Decimal {
        self.amount_due
    }

    pub fn card_amount(&self) -> Decimal {
        card_price(self.amount_due, &self.dual_pricing)
    }

    pub fn tip(&self) -> Decimal {
        self.tip.tip_amount(self.amount_due)
    }

    fn expect_view(&self, view: PaymentView, action: &'static str) -> Result<(), PaymentError> {
        if self.view != view {
            return Err(PaymentError::InvalidState {
                view: self.view,
                action,
            });
        }
        Ok(())
    }

    pub fn choose_cash(&mut self) -> Result<(), PaymentError> {
        self.expect_view(PaymentView::Method, "choose cash")?;
        self.method = Some(PaymentMethod::Cash);
        self.view = PaymentView::CashTender;
        Ok(())
    }

    pub fn choose_card(&mut self) -> Result<(), PaymentError> {
        self.expect_view(PaymentView::Method, "choose card")?;
        self.method = Some(PaymentMethod::Card);
        self.view = PaymentView::TipSelection;
        Ok(())
    }

    /// Back to method choice from a screen nothing has been charged on.
    pub fn back(&mut self) -> Result<(), PaymentError> {
        match self.view {
            PaymentView::TipSelection | PaymentView::CashTender => {
                self.view = PaymentView::Method;
                self.method = None;
                self.tip = TipSelection::None;
                Ok(())
            }
            view => Err(PaymentError::InvalidState { view, action: "go back" }),
        }
    }

    /// Preset buttons as (percent, amount) on the pre-surcharge subtotal.
    pub fn tip_options(&self) -> Vec<(Decimal, Decimal)> {
        self.tip_presets
            .iter()
            .map(|p| (*p, TipSelection::Percent(*p).tip_amount(self.amount_due)))
            .collect()
    }

    pub fn select_tip(&mut self, tip: TipSelection) -> Result<Decimal, PaymentError> {
        self.expect_view(PaymentView::TipSelection, "select a tip")?;
        if !tip.is_valid() {
            return Err(PaymentError::InvalidTip);
        }
        self.tip = tip;
        self.view = PaymentView::CardProcessing;
        Ok(self.tip())
    }

    pub fn card_request(&self) -> Result<TerminalRequest, PaymentError> {
        self.expect_view(PaymentView::CardProcessing, "charge a card")?;
        let amount = self.card_amount();
        let tip = self.tip();
        Ok(TerminalRequest {
            reference: self.reference.clone(),
            amount,
            tip,
            surcharge: amount - self.amount_due,
            total: amount + tip,
        })
    }

    /// Fold the device's answer in. Anything but an approval sends the
    /// flow back to method choice.
    pub fn apply_terminal_result(&mut self, result: TerminalResponse) -> Result<(), PaymentError> {
        self.expect_view(PaymentView::CardProcessing, "apply a card result")?;
        if result.reference != self.reference {
            return Err(PaymentError::ReferenceMismatch(result.reference));
        }
        let status = result.status;
        let message = result
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{status:?}"));
        self.terminal_result = Some(result);

        match status {
            TerminalStatus::Approved => {
                self.view = PaymentView::Complete;
                info!(reference = %self.reference, amount = %self.card_amount(), tip = %self.tip(), "card payment approved");
                Ok(())
            }
            TerminalStatus::Declined => {
                self.view = PaymentView::Method;
                warn!(reference = %self.reference, reason = %message, "card declined");
                Err(PaymentError::Declined(message))
            }
            _ => {
                self.view = PaymentView::Method;
                warn!(reference = %self.reference, status = ?status, reason = %message, "card payment failed");
                Err(PaymentError::Terminal(message))
            }
        }
    }

    /// Send the card request to a terminal and apply its answer.
    pub async fn process_card(&mut self, terminal: &dyn PaymentTerminal) -> Result<(), PaymentError> {
        let request = self.card_request()?;
        info!(reference = %request.reference, terminal = terminal.name(), total = %request.total, "sending card sale");
        match terminal.process_sale(&request).await {
            Ok(resp) => self.apply_terminal_result(resp),
            Err(e) => {
                self.view = PaymentView::Method;
                warn!(reference = %request.reference, error = %e, "payment terminal unreachable");
                Err(PaymentError::Terminal(e))
            }
        }
    }

    /// Take cash and return the change due.
    pub fn tender_cash(&mut self, tendered: Decimal) -> Result<Decimal, PaymentError> {
        self.expect_view(PaymentView::CashTender, "tender cash")?;
        let tendered = round_money(tendered);
        if tendered < self.amount_due {
            return Err(PaymentError::InsufficientCash {
                due: self.amount_due,
                tendered,
            });
        }
        let change = tendered - self.amount_due;
        self.tendered = Some(tendered);
        self.change = Some(change);
        self.view = PaymentView::Complete;
        info!(reference = %self.reference, due = %self.amount_due, tendered = %tendered, change = %change, "cash payment taken");
        Ok(change)
    }

    /// Quick-tender buttons: exact, next dollar, next $5/$10/$20 bill.
    pub fn quick_tender_amounts(&self) -> Vec<Decimal> {
        let due = self.amount_due;
        let mut out = vec![due];
        for step in [1, 5, 10, 20] {
            let step = Decimal::from(step);
            let next = (due / step).ceil() * step;
            let next = if next == due { next + step } else { next };
            if !out.contains(&next) {
                out.push(next);
            }
        }
        out.sort();
        out
    }

    pub fn to_json(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = v {
            map.insert("tipAmount".into(), serde_json::json!(self.tip()));
            map.insert("cardAmount".into(), serde_json::json!(self.card_amount()));
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn cfg(surcharge: i64) -> TerminalConfig {
        TerminalConfig {
            dual_pricing: DualPricingConfig {
                enabled: surcharge > 0,
                card_surcharge_percent: Decimal::from(surcharge),
            },
            ..TerminalConfig::default()
        }
    }

    struct FakeTerminal {
        status: TerminalStatus,
        seen: Mutex<Option<TerminalRequest>>,
    }

    #[async_trait]
    impl PaymentTerminal for FakeTerminal {
        fn name(&self) -> &str {
            "fake"
        }

        async fn process_sale(&self, request: &TerminalRequest) -> Result<TerminalResponse, String> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(TerminalResponse {
                reference: request.reference.clone(),
                status: self.status,
                authorization_code: Some("A1".into()),
                card_type: Some("VISA".into()),
                card_last_four: Some("4242".into()),
                error_message: None,
            })
        }

        async fn cancel(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn tip_amounts() {
        assert_eq!(TipSelection::Percent(Decimal::from(18)).tip_amount(money(4250)), money(765));
        assert_eq!(TipSelection::Amount(money(500)).tip_amount(money(4250)), money(500));
        assert_eq!(TipSelection::None.tip_amount(money(4250)), Decimal::ZERO);
    }

    #[test]
    fn cash_flow_returns_change() {
        let mut flow = PaymentFlow::new(money(1875), &cfg(4)).unwrap();
        flow.choose_cash().unwrap();
        assert_eq!(
            flow.tender_cash(money(1000)),
            Err(PaymentError::InsufficientCash { due: money(1875), tendered: money(1000) })
        );
        assert_eq!(flow.view(), PaymentView::CashTender);
        assert_eq!(flow.tender_cash(money(2000)).unwrap(), money(125));
        assert_eq!(flow.view(), PaymentView::Complete);
    }

    #[test]
    fn card_request_carries_surcharge_and_tip() {
        let mut flow = PaymentFlow::new(money(5000), &cfg(4)).unwrap();
        flow.choose_card().unwrap();
        assert_eq!(flow.tip_options()[0], (Decimal::from(15), money(750)));
        assert_eq!(flow.select_tip(TipSelection::Percent(Decimal::from(20))).unwrap(), money(1000));

        let req = flow.card_request().unwrap();
        assert_eq!(req.amount, money(5200));
        assert_eq!(req.surcharge, money(200));
        assert_eq!(req.total, money(6200));
    }

    #[test]
    fn screens_enforce_order() {
        let mut flow = PaymentFlow::new(money(1000), &cfg(0)).unwrap();
        assert!(matches!(flow.tender_cash(money(1000)), Err(PaymentError::InvalidState { .. })));
        assert!(flow.card_request().is_err());
        flow.choose_card().unwrap();
        assert_eq!(flow.select_tip(TipSelection::Amount(money(-1))), Err(PaymentError::InvalidTip));
        flow.back().unwrap();
        assert_eq!(flow.view(), PaymentView::Method);
        assert!(PaymentFlow::new(Decimal::ZERO, &cfg(0)).is_err());
    }

    #[tokio::test]
    async fn approved_card_completes() {
        let terminal = FakeTerminal {
            status: TerminalStatus::Approved,
            seen: Mutex::new(None),
        };
        let mut flow = PaymentFlow::new(money(1000), &cfg(0)).unwrap();
        flow.choose_card().unwrap();
        flow.select_tip(TipSelection::None).unwrap();
        flow.process_card(&terminal).await.unwrap();
        assert_eq!(flow.view(), PaymentView::Complete);
        assert_eq!(terminal.seen.lock().unwrap().as_ref().unwrap().total, money(1000));
    }

    #[tokio::test]
    async fn declined_card_returns_to_method() {
        let terminal = FakeTerminal {
            status: TerminalStatus::Declined,
            seen: Mutex::new(None),
        };
        let mut flow = PaymentFlow::new(money(1000), &cfg(0)).unwrap();
        flow.choose_card().unwrap();
        flow.select_tip(TipSelection::None).unwrap();
        let err = flow.process_card(&terminal).await.unwrap_err();
        assert!(matches!(err, PaymentError::Declined(_)));
        assert_eq!(flow.view(), PaymentView::Method);
    }

    #[test]
    fn rejects_results_for_other_payments() {
        let mut flow = PaymentFlow::new(money(1000), &cfg(0)).unwrap();
        flow.choose_card().unwrap();
        flow.select_tip(TipSelection::None).unwrap();
        let stray = TerminalResponse {
            reference: "someone-else".into(),
            status: TerminalStatus::Approved,
            authorization_code: None,
            card_type: None,
            card_last_four: None,
            error_message: None,
        };
        assert!(matches!(flow.apply_terminal_result(stray), Err(PaymentError::ReferenceMismatch(_))));
        assert_eq!(flow.view(), PaymentView::CardProcessing);
    }

    #[test]
    fn quick_tender_buttons() {
        let flow = PaymentFlow::new(money(1875), &cfg(0)).unwrap();
        assert_eq!(
            flow.quick_tender_amounts(),
            vec![money(1875), money(1900), money(2000)]
        );
        let even = PaymentFlow::new(money(2000), &cfg(0)).unwrap();
        assert_eq!(
            even.quick_tender_amounts(),
            vec![money(2000), money(2100), money(2500), money(3000), money(4000)]
        );
    }
}
