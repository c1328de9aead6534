use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{lock, parse_payload, AppState};
use crate::menu::{find_by_barcode, search_menu_items, MenuItem, ModifierGroup, ModifierGroupCache};
use crate::scanner::ScanEvent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuLoadPayload {
    #[serde(default)]
    items: Vec<MenuItem>,
    #[serde(default, alias = "modifier_groups", alias = "groups")]
    modifier_groups: Vec<ModifierGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuSearchPayload {
    #[serde(default, alias = "q", alias = "search")]
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BarcodePayload {
    #[serde(alias = "barcode", alias = "sku")]
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScannerKeyPayload {
    key: String,
    /// Milliseconds since the bridge started, as stamped by the front-end.
    #[serde(default, alias = "time_stamp", alias = "timestamp")]
    time_stamp: Option<u64>,
}

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

/// Replace the cached menu with what the front-end fetched.
pub async fn menu_load(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: MenuLoadPayload = parse_payload(arg0, "menu")?;
    let item_count = payload.items.len();
    let group_count = payload.modifier_groups.len();
    *lock(&state.menu)? = payload.items;
    *lock(&state.groups)? = ModifierGroupCache::new(payload.modifier_groups);
    info!(items = item_count, groups = group_count, "menu loaded");
    Ok(json!({ "items": item_count, "modifierGroups": group_count }))
}

pub async fn menu_search(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: MenuSearchPayload = parse_payload(arg0, "menu search")?;
    let menu = lock(&state.menu)?;
    let hits = search_menu_items(&menu, &payload.query);
    Ok(json!({ "items": hits }))
}

pub async fn menu_find_barcode(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: BarcodePayload = parse_payload(arg0, "barcode")?;
    let menu = lock(&state.menu)?;
    match find_by_barcode(&menu, &payload.code) {
        Some(item) => Ok(json!({ "item": item })),
        None => Err(format!("No menu item for barcode {}", payload.code.trim())),
    }
}

// ---------------------------------------------------------------------------
// Keyboard-wedge scanner
// ---------------------------------------------------------------------------

fn key_char(key: &str) -> Option<char> {
    match key {
        "Enter" => Some('\n'),
        "Tab" => Some('\t'),
        _ => {
            let mut chars = key.chars();
            let ch = chars.next()?;
            // Named keys ("Shift", "ArrowUp") are not part of a code.
            chars.next().is_none().then_some(ch)
        }
    }
}

/// Feed one keydown. Answers `{ event, item }`; `item` is set when a scan
/// resolved to a menu item.
pub async fn scanner_key(state: &AppState, arg0: Option<Value>) -> Result<Value, String> {
    let payload: ScannerKeyPayload = parse_payload(arg0, "scanner key")?;
    let Some(ch) = key_char(&payload.key) else {
        return Ok(json!({ "event": null, "item": null }));
    };
    let at = payload
        .time_stamp
        .map(|ms| state.started + Duration::from_millis(ms))
        .unwrap_or_else(Instant::now);

    let event = lock(&state.scanner)?.push_key(ch, at);
    let item = match &event {
        Some(ScanEvent::Barcode(code)) => {
            let menu = lock(&state.menu)?;
            let found = find_by_barcode(&menu, code).cloned();
            if found.is_none() {
                debug!(barcode = %code, "scanned barcode matches no menu item");
            }
            found
        }
        _ => None,
    };
    Ok(json!({ "event": event, "item": item }))
}

pub async fn scanner_reset(state: &AppState, _arg0: Option<Value>) -> Result<Value, String> {
    lock(&state.scanner)?.reset();
    Ok(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::super::{dispatch, test_support::offline_state};
    use super::*;

    fn menu() -> Value {
        json!({
            "items": [
                { "id": "ipa", "name": "House IPA", "price": 7.0, "barcode": "0123456789012" },
                { "id": "burger", "name": "Bar Burger", "price": 14.0, "sku": "BRG" }
            ],
            "modifierGroups": []
        })
    }

    #[tokio::test]
    async fn search_matches_name_and_sku() {
        let state = offline_state(Vec::new());
        dispatch(&state, "menu_load", menu()).await.unwrap();

        let hits = dispatch(&state, "menu_search", json!({ "query": "ipa" })).await.unwrap();
        assert_eq!(hits["items"][0]["id"], "ipa");
        let hits = dispatch(&state, "menu_search", json!({ "query": "brg" })).await.unwrap();
        assert_eq!(hits["items"][0]["id"], "burger");
    }

    #[tokio::test]
    async fn unknown_barcode_is_an_error() {
        let state = offline_state(Vec::new());
        dispatch(&state, "menu_load", menu()).await.unwrap();
        let err = dispatch(&state, "menu_find_barcode", json!({ "code": "999" }))
            .await
            .unwrap_err();
        assert!(err.contains("999"));
    }

    #[tokio::test]
    async fn scanned_barcode_resolves_menu_item() {
        let state = offline_state(Vec::new());
        dispatch(&state, "menu_load", menu()).await.unwrap();

        let mut last = Value::Null;
        for (i, key) in "0123456789012".chars().map(String::from).chain(["Enter".to_string()]).enumerate() {
            last = dispatch(&state, "scanner_key", json!({ "key": key, "timeStamp": 1000 + i as u64 * 8 }))
                .await
                .unwrap();
        }
        assert_eq!(last["event"]["type"], "barcode");
        assert_eq!(last["item"]["id"], "ipa");
    }

    #[test]
    fn named_keys_are_ignored() {
        assert_eq!(key_char("Shift"), None);
        assert_eq!(key_char("Enter"), Some('\n'));
        assert_eq!(key_char("7"), Some('7'));
    }
}
