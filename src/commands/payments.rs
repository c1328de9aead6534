use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{lock, parse_payload, AppState};
use crate::payments::{PaymentFlow, TerminalResponse, TerminalStatus, TipSelection};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    #[serde(default, alias = "amount_due", alias = "amount")]
    amount_due: Option<Decimal>,
    /// Charge the cash total of an open order panel instead.
    #[serde(default, alias = "order_id")]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowPayload {
    #[serde(alias = "payment_id", alias = "reference")]
    payment_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TipPayload {
    #[serde(alias = "payment_id", alias = "reference")]
    payment_id: String,
    tip: TipSelection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardResultPayload {
    #[serde(alias = "payment_id")]
    payment_id: String,
    result: TerminalResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenderPayload {
    #[serde(alias = "payment_id", alias = "reference")]
    payment_id: String,
    tendered: Decimal,
}

fn flow_not_found(payment_id: &str) -> String {
    format!("Payment {payment_id} not found")
}

fn flow_json(flow: &PaymentFlow) -> Value {
    let mut v = flow.to_json();
    if let Value::Object(ref mut map) = v {
        let tips: Vec<Value> = flow
            .tip_options()
            .into_iter()
            .map(|(percent, amount)| json!({ "percent": percent, "amount": amount }))
            .collect();
        map.insert("tipOptions".into(), json!(tips));
        map.insert("quickTender".into(), json!(flow.quick_tender_amounts()));
    }
    v
}

fn with_flow<F>(state: &AppState, payment_id: &str, f: F) -> Result<Value, String>
where
    F: FnOnce(&mut PaymentFlow) -> Result<Value, String>,
{
    let mut flows = lock(&state.payments)?;
    let flow = flows
        .get_mut(payment_id)
        .ok_or_else(|| flow_not_found(payment_id))?;
    let extra = f(flow)?;
    Ok(json!({ "result": extra, "payment": flow_json(flow) }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub async fn payment_start(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: StartPayload = parse_payload(arg0, "payment")?;
    let amount_due = match (payload.amount_due, payload.order_id) {
        (Some(amount), _) => amount,
        (None, Some(order_id)) => lock(&state.panels)?
            .get(&order_id)
            .map(|p| p.totals(&state.config.dual_pricing).total.cash)
            .ok_or_else(|| format!("Order {order_id} is not open"))?,
        (None, None) => return Err("Missing amountDue".into()),
    };
    let flow = PaymentFlow::new(amount_due, &state.config).map_err(|e| e.to_string())?;
    let resp = flow_json(&flow);
    lock(&state.payments)?.insert(flow.reference().to_string(), flow);
    Ok(resp)
}

pub async fn payment_state(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    let flows = lock(&state.payments)?;
    let flow = flows
        .get(&payload.payment_id)
        .ok_or_else(|| flow_not_found(&payload.payment_id))?;
    Ok(flow_json(flow))
}

pub async fn payment_choose_cash(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    with_flow(state, &payload.payment_id, |f| {
        f.choose_cash().map_err(|e| e.to_string())?;
        Ok(Value::Null)
    })
}

pub async fn payment_choose_card(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    with_flow(state, &payload.payment_id, |f| {
        f.choose_card().map_err(|e| e.to_string())?;
        Ok(Value::Null)
    })
}

pub async fn payment_back(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    with_flow(state, &payload.payment_id, |f| {
        f.back().map_err(|e| e.to_string())?;
        Ok(Value::Null)
    })
}

pub async fn payment_select_tip(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TipPayload = parse_payload(arg0, "tip")?;
    with_flow(state, &payload.payment_id, |f| {
        let tip = f.select_tip(payload.tip).map_err(|e| e.to_string())?;
        Ok(json!({ "tipAmount": tip }))
    })
}

/// The charge the front-end hands to an external card device.
pub async fn payment_card_request(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    let flows = lock(&state.payments)?;
    let flow = flows
        .get(&payload.payment_id)
        .ok_or_else(|| flow_not_found(&payload.payment_id))?;
    let request = flow.card_request().map_err(|e| e.to_string())?;
    serde_json::to_value(request).map_err(|e| e.to_string())
}

/// Result from an external card device. A decline is an error string, and
/// the flow is back on method choice.
pub async fn payment_card_result(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: CardResultPayload = parse_payload(arg0, "card result")?;
    with_flow(state, &payload.payment_id, |f| {
        f.apply_terminal_result(payload.result).map_err(|e| e.to_string())?;
        Ok(Value::Null)
    })
}

/// Charge through the configured terminal driver. The flow is not locked
/// while the device is working.
pub async fn payment_process_card(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: FlowPayload = parse_payload(arg0, "payment")?;
    let terminal = state
        .terminal
        .clone()
        .ok_or("No payment terminal configured")?;
    let request = {
        let flows = lock(&state.payments)?;
        let flow = flows
            .get(&payload.payment_id)
            .ok_or_else(|| flow_not_found(&payload.payment_id))?;
        flow.card_request().map_err(|e| e.to_string())?
    };

    let response = match terminal.process_sale(&request).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(reference = %request.reference, terminal = terminal.name(), error = %e, "payment terminal unreachable");
            TerminalResponse {
                reference: request.reference.clone(),
                status: TerminalStatus::Error,
                authorization_code: None,
                card_type: None,
                card_last_four: None,
                error_message: Some(e),
            }
        }
    };

    with_flow(state, &payload.payment_id, |f| {
        f.apply_terminal_result(response).map_err(|e| e.to_string())?;
        Ok(Value::Null)
    })
}

pub async fn payment_tender_cash(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TenderPayload = parse_payload(arg0, "cash tender")?;
    with_flow(state, &payload.payment_id, |f| {
        let change = f.tender_cash(payload.tendered).map_err(|e| e.to_string())?;
        Ok(json!({ "change": change }))
    })
}

#[cfg(test)]
mod tests {
    use super::super::{dispatch, test_support};
    use super::*;
    use crate::payments::{PaymentTerminal, TerminalRequest};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn dec(v: &Value) -> Decimal {
        v.as_str().unwrap().parse().unwrap()
    }

    struct ApprovingTerminal;

    #[async_trait]
    impl PaymentTerminal for ApprovingTerminal {
        fn name(&self) -> &str {
            "approving"
        }

        async fn process_sale(&self, request: &TerminalRequest) -> Result<TerminalResponse, String> {
            Ok(TerminalResponse {
                reference: request.reference.clone(),
                status: TerminalStatus::Approved,
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

    #[tokio::test]
    async fn cash_flow_returns_change() {
        let state = test_support::offline_state(Vec::new());
        let flow = dispatch(&state, "payment_start", json!({ "amountDue": 23.5 })).await.unwrap();
        let id = flow["reference"].as_str().unwrap().to_string();

        dispatch(&state, "payment_choose_cash", json!({ "paymentId": id })).await.unwrap();
        let err = dispatch(&state, "payment_tender_cash", json!({ "paymentId": id, "tendered": 20 }))
            .await
            .unwrap_err();
        assert!(err.contains("less than"));

        let resp = dispatch(&state, "payment_tender_cash", json!({ "paymentId": id, "tendered": 40 }))
            .await
            .unwrap();
        assert_eq!(dec(&resp["result"]["change"]), Decimal::new(165, 1));
        assert_eq!(resp["payment"]["view"], "complete");
    }

    #[tokio::test]
    async fn card_flow_through_configured_terminal() {
        let state = test_support::offline_state(Vec::new()).with_terminal(Arc::new(ApprovingTerminal));
        let flow = dispatch(&state, "payment_start", json!({ "amountDue": 50 })).await.unwrap();
        let id = flow["reference"].as_str().unwrap().to_string();

        dispatch(&state, "payment_choose_card", json!({ "paymentId": id })).await.unwrap();
        let resp = dispatch(
            &state,
            "payment_select_tip",
            json!({ "paymentId": id, "tip": { "type": "percent", "value": 20 } }),
        )
        .await
        .unwrap();
        assert_eq!(dec(&resp["result"]["tipAmount"]), Decimal::from(10));

        let resp = dispatch(&state, "payment_process_card", json!({ "paymentId": id }))
            .await
            .unwrap();
        assert_eq!(resp["payment"]["view"], "complete");
    }

    #[tokio::test]
    async fn process_card_without_terminal_is_an_error() {
        let state = test_support::offline_state(Vec::new());
        let flow = dispatch(&state, "payment_start", json!({ "amountDue": 5 })).await.unwrap();
        let id = flow["reference"].as_str().unwrap().to_string();
        let err = dispatch(&state, "payment_process_card", json!({ "paymentId": id }))
            .await
            .unwrap_err();
        assert_eq!(err, "No payment terminal configured");
    }
}
