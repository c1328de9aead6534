use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{lock, parse_payload, AppState};
use crate::ingredients::{Ingredient, IngredientSelections};
use crate::menu::{MenuItem, ModifierGroup, PreModifier, SpiritTier};
use crate::modifiers::{fetch_child_group, ChildLoad, ModifierSession, SelectionWarning, ToggleOutcome};
use crate::orders::OrderPanel;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionPayload {
    #[serde(default, alias = "item_id", alias = "menuItemId")]
    item_id: Option<String>,
    /// Full item, for items the menu cache does not hold (open items).
    #[serde(default)]
    item: Option<MenuItem>,
    #[serde(default, alias = "pour_size", alias = "pour")]
    pour_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    #[serde(alias = "session_id")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TogglePayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "group_id")]
    group_id: String,
    #[serde(alias = "modifier_id")]
    modifier_id: String,
    #[serde(default, alias = "pre_modifier")]
    pre_modifier: Option<PreModifier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpiritPayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "group_id")]
    group_id: String,
    tier: SpiritTier,
    #[serde(default, alias = "modifier_id")]
    modifier_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PourPayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(default, alias = "pour_size", alias = "pour")]
    pour_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "order_id")]
    order_id: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default, alias = "seat_number", alias = "seatNumber")]
    seat: Option<u32>,
    #[serde(default, alias = "course_number", alias = "courseNumber")]
    course: Option<u32>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngredientsLoadPayload {
    #[serde(alias = "session_id")]
    session_id: String,
    /// Already fetched by the front-end; skips the dashboard round trip.
    #[serde(default)]
    ingredients: Option<Vec<Ingredient>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngredientTogglePayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "ingredient_id")]
    ingredient_id: String,
    #[serde(alias = "pre_modifier")]
    pre_modifier: PreModifier,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngredientSwapPayload {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "ingredient_id")]
    ingredient_id: String,
    /// `null` clears the swap.
    #[serde(default, alias = "option_id", alias = "swapId")]
    option_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn session_not_found(session_id: &str) -> String {
    format!("Modifier session {session_id} not found")
}

fn warning_json(w: &SelectionWarning) -> Value {
    json!({ "kind": w.kind(), "message": w.to_string() })
}

fn session_state(state: &AppState, session_id: &str) -> Result<Value, String> {
    let sessions = lock(&state.sessions)?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| session_not_found(session_id))?;
    serde_json::to_value(session.snapshot(&state.config.dual_pricing)).map_err(|e| e.to_string())
}

/// Start loads for every child group the session now needs.
fn begin_child_loads(session: &mut ModifierSession) -> Vec<ChildLoad> {
    let pending = session.pending_child_groups();
    pending
        .iter()
        .filter_map(|gid| session.begin_child_load(gid))
        .collect()
}

/// Resolve child loads from the shared cache or the dashboard. The session
/// lock is not held across the fetch; a session closed in the meantime
/// discards the result. Returns the groups that landed and the load errors.
async fn finish_child_loads(
    state: &AppState,
    session_id: &str,
    loads: Vec<ChildLoad>,
) -> Result<(Vec<ModifierGroup>, Vec<String>), String> {
    let mut loaded = Vec::new();
    let mut errors = Vec::new();
    for load in loads {
        let cached = lock(&state.groups)?.get(&load.group_id).cloned();
        let result = match cached {
            Some(group) => Ok(group),
            None => fetch_child_group(state.group_source.as_ref(), &load).await,
        };
        if let Ok(group) = &result {
            lock(&state.groups)?.insert(group.clone());
        }

        let mut sessions = lock(&state.sessions)?;
        let Some(session) = sessions.get_mut(session_id) else {
            debug!(session_id, group_id = %load.group_id, "session closed before child group arrived");
            continue;
        };
        let group_id = load.group_id.clone();
        match session.finish_child_load(load, result) {
            Ok(true) => {
                if let Some(group) = session.group(&group_id) {
                    loaded.push(group.clone());
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(session_id, group_id = %group_id, error = %e, "child modifier group failed to load");
                errors.push(format!("{group_id}: {e}"));
            }
        }
    }
    Ok((loaded, errors))
}

/// Shared tail of toggle-like commands: load child groups, then answer with
/// the outcome and the fresh session state.
async fn toggle_response(
    state: &AppState,
    session_id: &str,
    outcome: ToggleOutcome,
    loads: Vec<ChildLoad>,
) -> Result<Value, String> {
    let (loaded, errors) = finish_child_loads(state, session_id, loads).await?;
    let mut resp = json!({
        "outcome": outcome.as_str(),
        "state": session_state(state, session_id)?,
        "loadedGroups": loaded,
    });
    if let ToggleOutcome::Warning(w) = &outcome {
        resp["warning"] = warning_json(w);
    }
    if !errors.is_empty() {
        resp["childLoadErrors"] = json!(errors);
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Open the modal for an item. Root groups missing from the menu cache are
/// fetched before the session opens.
pub async fn modifier_session_open(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: OpenSessionPayload = parse_payload(arg0, "modifier session")?;
    let item = match (payload.item, payload.item_id) {
        (Some(item), _) => item,
        (None, Some(id)) => lock(&state.menu)?
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| format!("Menu item {id} not found"))?,
        (None, None) => return Err("Missing itemId".into()),
    };
    if item.is_86d {
        return Err(format!("{} is 86'd", item.name));
    }

    let mut groups = Vec::new();
    for group_id in &item.modifier_group_ids {
        let cached = lock(&state.groups)?.get(group_id).cloned();
        let group = match cached {
            Some(g) => g,
            None => {
                let g = state
                    .group_source
                    .fetch_modifier_group(group_id)
                    .await
                    .map_err(|e| format!("Failed to load modifier group {group_id}: {e}"))?;
                lock(&state.groups)?.insert(g.clone());
                g
            }
        };
        groups.push(group);
    }

    let mut session = ModifierSession::open(item, groups.clone());
    session.set_pour_size(payload.pour_size);
    let session_id = session.id().to_string();
    let snapshot = session.snapshot(&state.config.dual_pricing);
    lock(&state.sessions)?.insert(session_id.clone(), session);
    info!(session_id = %session_id, item_id = %snapshot.item_id, "modifier modal opened");
    Ok(json!({ "sessionId": session_id, "groups": groups, "state": snapshot }))
}

pub async fn modifier_session_state(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SessionPayload = parse_payload(arg0, "modifier session")?;
    session_state(state, &payload.session_id)
}

/// Close without adding anything. In-flight child fetches are cancelled.
pub async fn modifier_session_close(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SessionPayload = parse_payload(arg0, "modifier session")?;
    let removed = lock(&state.sessions)?.remove(&payload.session_id);
    lock(&state.ingredients)?.remove(&payload.session_id);
    if let Some(mut session) = removed {
        session.close();
    }
    Ok(json!({ "success": true }))
}

/// Confirm the modal and add the line to the order panel.
pub async fn modifier_session_confirm(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ConfirmPayload = parse_payload(arg0, "modifier confirm")?;
    let cfg = &state.config.dual_pricing;

    let mut sessions = lock(&state.sessions)?;
    let session = sessions
        .get_mut(&payload.session_id)
        .ok_or_else(|| session_not_found(&payload.session_id))?;
    let snapshot = session.snapshot(cfg);
    if !snapshot.pending_child_groups.is_empty() {
        return Err("Modifier options are still loading".into());
    }
    let mut confirmed = match session.confirm() {
        Ok(item) => item,
        Err(w) => return Ok(json!({ "confirmed": false, "warning": warning_json(&w), "state": snapshot })),
    };

    if let Some(extra) = lock(&state.ingredients)?.remove(&payload.session_id) {
        confirmed.unit_price += extra.price_delta();
        confirmed.modifiers.extend(extra.to_modifiers());
    }

    let mut panels = lock(&state.panels)?;
    let panel = panels
        .entry(payload.order_id.clone())
        .or_insert_with(|| OrderPanel::new(payload.order_id.clone()));
    let line_id = panel
        .add_line(confirmed.clone(), payload.quantity, payload.seat, payload.course)
        .map_err(|e| e.to_string())?;
    let totals = panel.totals(cfg);
    drop(panels);

    session.close();
    sessions.remove(&payload.session_id);
    info!(order_id = %payload.order_id, line_id = %line_id, item_id = %confirmed.item_id, "modifier modal confirmed");
    Ok(json!({ "confirmed": true, "lineId": line_id, "item": confirmed, "totals": totals }))
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

pub async fn modifier_toggle(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TogglePayload = parse_payload(arg0, "modifier toggle")?;
    let (outcome, loads) = {
        let mut sessions = lock(&state.sessions)?;
        let session = sessions
            .get_mut(&payload.session_id)
            .ok_or_else(|| session_not_found(&payload.session_id))?;
        let outcome = session.toggle_modifier(&payload.group_id, &payload.modifier_id, payload.pre_modifier);
        (outcome, begin_child_loads(session))
    };
    toggle_response(state, &payload.session_id, outcome, loads).await
}

/// Remove the newest instance of a stacked modifier.
pub async fn modifier_remove(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: TogglePayload = parse_payload(arg0, "modifier remove")?;
    let removed = {
        let mut sessions = lock(&state.sessions)?;
        let session = sessions
            .get_mut(&payload.session_id)
            .ok_or_else(|| session_not_found(&payload.session_id))?;
        session.remove_modifier(&payload.group_id, &payload.modifier_id)
    };
    Ok(json!({ "removed": removed, "state": session_state(state, &payload.session_id)? }))
}

pub async fn modifier_spirit_options(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SpiritPayload = parse_payload(arg0, "spirit options")?;
    let sessions = lock(&state.sessions)?;
    let session = sessions
        .get(&payload.session_id)
        .ok_or_else(|| session_not_found(&payload.session_id))?;
    let options = session.spirit_options(&payload.group_id, payload.tier);
    Ok(json!({ "tier": payload.tier, "modifiers": options }))
}

pub async fn modifier_select_spirit(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: SpiritPayload = parse_payload(arg0, "spirit selection")?;
    let modifier_id = payload.modifier_id.ok_or("Missing modifierId")?;
    let (outcome, loads) = {
        let mut sessions = lock(&state.sessions)?;
        let session = sessions
            .get_mut(&payload.session_id)
            .ok_or_else(|| session_not_found(&payload.session_id))?;
        let outcome = session.select_spirit(&payload.group_id, payload.tier, &modifier_id);
        (outcome, begin_child_loads(session))
    };
    toggle_response(state, &payload.session_id, outcome, loads).await
}

pub async fn modifier_set_pour(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: PourPayload = parse_payload(arg0, "pour size")?;
    {
        let mut sessions = lock(&state.sessions)?;
        let session = sessions
            .get_mut(&payload.session_id)
            .ok_or_else(|| session_not_found(&payload.session_id))?;
        session.set_pour_size(payload.pour_size);
    }
    session_state(state, &payload.session_id)
}

// ---------------------------------------------------------------------------
// Ingredients
// ---------------------------------------------------------------------------

fn ingredients_json(selections: &IngredientSelections) -> Value {
    let rows: Vec<Value> = selections
        .ingredients()
        .iter()
        .map(|ing| {
            let choice = selections.choice(&ing.id).cloned().unwrap_or_default();
            json!({ "ingredient": ing, "choice": choice })
        })
        .collect();
    json!({
        "ingredients": rows,
        "modifiers": selections.to_modifiers(),
        "priceDelta": selections.price_delta(),
    })
}

pub async fn ingredients_load(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: IngredientsLoadPayload = parse_payload(arg0, "ingredients")?;
    let item_id = {
        let sessions = lock(&state.sessions)?;
        let session = sessions
            .get(&payload.session_id)
            .ok_or_else(|| session_not_found(&payload.session_id))?;
        session.item().id.clone()
    };
    let list = match payload.ingredients {
        Some(list) => list,
        None => state
            .api
            .get_item_ingredients(&item_id)
            .await
            .map_err(|e| format!("Failed to load ingredients: {e}"))?,
    };
    if !lock(&state.sessions)?.contains_key(&payload.session_id) {
        return Err(session_not_found(&payload.session_id));
    }
    let selections = IngredientSelections::new(list);
    let resp = ingredients_json(&selections);
    lock(&state.ingredients)?.insert(payload.session_id, selections);
    Ok(resp)
}

pub async fn ingredient_toggle(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: IngredientTogglePayload = parse_payload(arg0, "ingredient toggle")?;
    let mut all = lock(&state.ingredients)?;
    let selections = all
        .get_mut(&payload.session_id)
        .ok_or_else(|| format!("No ingredients loaded for session {}", payload.session_id))?;
    let mut resp = match selections.toggle_pre_modifier(&payload.ingredient_id, payload.pre_modifier) {
        Ok(now) => json!({ "preModifier": now }),
        Err(w) => json!({ "warning": warning_json(&w) }),
    };
    resp["state"] = ingredients_json(selections);
    Ok(resp)
}

pub async fn ingredient_swap(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: IngredientSwapPayload = parse_payload(arg0, "ingredient swap")?;
    let mut all = lock(&state.ingredients)?;
    let selections = all
        .get_mut(&payload.session_id)
        .ok_or_else(|| format!("No ingredients loaded for session {}", payload.session_id))?;
    let mut resp = json!({});
    match payload.option_id.as_deref() {
        Some(option) => {
            if let Err(w) = selections.swap(&payload.ingredient_id, option) {
                resp["warning"] = warning_json(&w);
            }
        }
        None => selections.clear_swap(&payload.ingredient_id),
    }
    resp["state"] = ingredients_json(selections);
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::super::{dispatch, test_support::offline_state};
    use super::*;
    use rust_decimal::Decimal;

    fn dec(v: &Value) -> Decimal {
        v.as_str().unwrap().parse().unwrap()
    }

    fn burger_menu() -> Value {
        json!({
            "items": [{
                "id": "burger", "name": "Bar Burger", "price": 14.0,
                "modifierGroupIds": ["temp", "toppings"]
            }],
            "modifierGroups": [
                { "id": "temp", "name": "Temperature", "isRequired": true, "maxSelections": 1,
                  "modifiers": [
                      { "id": "mr", "name": "Medium Rare" },
                      { "id": "wd", "name": "Well Done" }
                  ] },
                { "id": "toppings", "name": "Toppings", "maxSelections": 3,
                  "modifiers": [
                      { "id": "cheese", "name": "Cheese", "price": 1.0, "childModifierGroupId": "cheese-kind" },
                      { "id": "bacon", "name": "Bacon", "price": 2.0 }
                  ] }
            ]
        })
    }

    fn cheese_kind() -> ModifierGroup {
        serde_json::from_value(json!({
            "id": "cheese-kind", "name": "Cheese Type", "isRequired": true,
            "modifiers": [{ "id": "cheddar", "name": "Cheddar" }, { "id": "swiss", "name": "Swiss", "price": 0.5 }]
        }))
        .unwrap()
    }

    async fn open(state: &AppState) -> String {
        dispatch(state, "menu_load", burger_menu()).await.unwrap();
        let opened = dispatch(state, "modifier_session_open", json!({ "itemId": "burger" }))
            .await
            .unwrap();
        opened["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn toggle_loads_child_group_lazily() {
        let state = offline_state(vec![cheese_kind()]);
        let sid = open(&state).await;

        let resp = dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "toppings", "modifierId": "cheese" }),
        )
        .await
        .unwrap();
        assert_eq!(resp["outcome"], "added");
        assert_eq!(resp["loadedGroups"][0]["id"], "cheese-kind");

        let resp = dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "cheese-kind", "modifierId": "swiss" }),
        )
        .await
        .unwrap();
        assert_eq!(resp["state"]["selections"][0]["modifierId"], "cheese");
        assert_eq!(resp["state"]["selections"][1]["modifierId"], "swiss");
        assert_eq!(resp["state"]["selections"][1]["depth"], 1);
    }

    #[tokio::test]
    async fn confirm_requires_required_groups_then_adds_line() {
        let state = offline_state(Vec::new());
        let sid = open(&state).await;

        let resp = dispatch(&state, "modifier_session_confirm", json!({ "sessionId": sid, "orderId": "o1" }))
            .await
            .unwrap();
        assert_eq!(resp["confirmed"], false);
        assert_eq!(resp["warning"]["kind"], "required_group_missing");

        dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "temp", "modifierId": "mr" }),
        )
        .await
        .unwrap();
        dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "toppings", "modifierId": "bacon" }),
        )
        .await
        .unwrap();
        let resp = dispatch(
            &state,
            "modifier_session_confirm",
            json!({ "sessionId": sid, "orderId": "o1", "quantity": 2 }),
        )
        .await
        .unwrap();
        assert_eq!(resp["confirmed"], true);
        assert_eq!(resp["totals"]["itemCount"], 2);
        assert_eq!(dec(&resp["totals"]["subtotal"]), Decimal::from(32));

        let err = dispatch(&state, "modifier_session_state", json!({ "sessionId": sid }))
            .await
            .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn single_select_warning_comes_back_ok() {
        let state = offline_state(Vec::new());
        let sid = open(&state).await;
        let resp = dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "temp", "modifierId": "nope" }),
        )
        .await
        .unwrap();
        assert_eq!(resp["outcome"], "warning");
        assert_eq!(resp["warning"]["kind"], "unknown_modifier");
    }

    #[tokio::test]
    async fn ingredient_choices_ride_along_on_confirm() {
        let state = offline_state(Vec::new());
        let sid = open(&state).await;
        dispatch(
            &state,
            "ingredients_load",
            json!({ "sessionId": sid, "ingredients": [
                { "id": "onion", "name": "Onion" },
                { "id": "egg", "name": "Fried Egg", "isDefault": false, "price": 1.5 }
            ] }),
        )
        .await
        .unwrap();
        dispatch(
            &state,
            "ingredient_toggle",
            json!({ "sessionId": sid, "ingredientId": "onion", "preModifier": "no" }),
        )
        .await
        .unwrap();
        let resp = dispatch(
            &state,
            "ingredient_toggle",
            json!({ "sessionId": sid, "ingredientId": "egg", "preModifier": "side" }),
        )
        .await
        .unwrap();
        assert_eq!(dec(&resp["state"]["priceDelta"]), Decimal::new(15, 1));

        dispatch(
            &state,
            "modifier_toggle",
            json!({ "sessionId": sid, "groupId": "temp", "modifierId": "wd" }),
        )
        .await
        .unwrap();
        let resp = dispatch(&state, "modifier_session_confirm", json!({ "sessionId": sid, "orderId": "o2" }))
            .await
            .unwrap();
        let labels: Vec<&str> = resp["item"]["modifiers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["Well Done", "Onion", "Fried Egg"]);
    }
}
