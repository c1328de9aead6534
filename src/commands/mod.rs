//! Command bridge between the touch front-end and the terminal core.
//!
//! Every command takes an optional JSON payload and answers
//! `Result<Value, String>`: the error string is what the front-end toasts.
//! Selection warnings are not errors; they come back inside `Ok`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ApiClient, ModifierGroupSource};
use crate::config::TerminalConfig;
use crate::entertainment::{BlockTimeBackend, BlockTimeSession};
use crate::ingredients::IngredientSelections;
use crate::menu::{MenuItem, ModifierGroupCache};
use crate::modifiers::ModifierSession;
use crate::orders::OrderPanel;
use crate::payments::{PaymentFlow, PaymentTerminal};
use crate::scanner::KeystrokeScanner;
use crate::split::SplitTicketManager;
use crate::timers::CountdownTicker;

pub mod entertainment;
pub mod menu;
pub mod modifiers;
pub mod orders;
pub mod payments;
pub mod split;
pub mod system;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the bridge keeps between commands. All of it is view state:
/// nothing here outlives the process.
pub struct AppState {
    pub config: TerminalConfig,
    pub api: ApiClient,
    pub(crate) group_source: Arc<dyn ModifierGroupSource>,
    pub(crate) block_time: Arc<dyn BlockTimeBackend>,
    pub(crate) terminal: Option<Arc<dyn PaymentTerminal>>,
    pub(crate) menu: Mutex<Vec<MenuItem>>,
    pub(crate) groups: Mutex<ModifierGroupCache>,
    pub(crate) sessions: Mutex<HashMap<String, ModifierSession>>,
    pub(crate) ingredients: Mutex<HashMap<String, IngredientSelections>>,
    pub(crate) panels: Mutex<HashMap<String, OrderPanel>>,
    pub(crate) splits: Mutex<HashMap<String, SplitTicketManager>>,
    pub(crate) payments: Mutex<HashMap<String, PaymentFlow>>,
    pub(crate) block_times: Mutex<HashMap<String, BlockTimeSession>>,
    pub(crate) scanner: Mutex<KeystrokeScanner>,
    /// Countdown tickers per watched order panel.
    pub(crate) tickers: Mutex<HashMap<String, CountdownTicker>>,
    /// Pushed events (`{ "event", "payload" }`), when a bridge is attached.
    pub(crate) events: Mutex<Option<mpsc::Sender<Value>>>,
    pub(crate) started: Instant,
}

impl AppState {
    pub fn new(config: TerminalConfig) -> Result<Self, String> {
        let api = ApiClient::new(&config).map_err(|e| e.to_string())?;
        let shared = Arc::new(api.clone());
        Ok(Self::with_backends(config, api, shared.clone(), shared))
    }

    /// Build with explicit child-group and block-time backends.
    pub fn with_backends(
        config: TerminalConfig,
        api: ApiClient,
        group_source: Arc<dyn ModifierGroupSource>,
        block_time: Arc<dyn BlockTimeBackend>,
    ) -> Self {
        let scanner = KeystrokeScanner::new(config.scanner.clone());
        Self {
            config,
            api,
            group_source,
            block_time,
            terminal: None,
            menu: Mutex::new(Vec::new()),
            groups: Mutex::new(ModifierGroupCache::default()),
            sessions: Mutex::new(HashMap::new()),
            ingredients: Mutex::new(HashMap::new()),
            panels: Mutex::new(HashMap::new()),
            splits: Mutex::new(HashMap::new()),
            payments: Mutex::new(HashMap::new()),
            block_times: Mutex::new(HashMap::new()),
            scanner: Mutex::new(scanner),
            tickers: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
            started: Instant::now(),
        }
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn PaymentTerminal>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Send pushed events to `tx` from now on.
    pub fn attach_events(&self, tx: mpsc::Sender<Value>) {
        if let Ok(mut events) = self.events.lock() {
            *events = Some(tx);
        }
    }

    /// Stop every ticker and drop the event sender, so the bridge writer can
    /// drain and exit.
    pub fn detach_events(&self) {
        if let Ok(mut tickers) = self.tickers.lock() {
            tickers.clear();
        }
        if let Ok(mut events) = self.events.lock() {
            *events = None;
        }
    }

    pub(crate) fn event_sender(&self) -> Option<mpsc::Sender<Value>> {
        self.events.lock().ok().and_then(|e| e.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, String> {
    m.lock().map_err(|e| e.to_string())
}

pub(crate) fn parse_payload<T: DeserializeOwned>(arg0: Option<Value>, what: &str) -> Result<T, String> {
    let payload = arg0.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a command by name.
pub async fn dispatch(state: &AppState, cmd: &str, payload: Value) -> Result<Value, String> {
    let arg0 = (!payload.is_null()).then_some(payload);
    debug!(cmd, "dispatching command");
    let result = match cmd {
        // System
        "app_about" => system::app_about(state, arg0).await,
        "app_connection_health" => system::app_connection_health(state, arg0).await,
        "terminal_update_credentials" => system::terminal_update_credentials(state, arg0).await,
        "terminal_factory_reset" => system::terminal_factory_reset(state, arg0).await,

        // Menu, search and scanner
        "menu_load" => menu::menu_load(state, arg0).await,
        "menu_search" => menu::menu_search(state, arg0).await,
        "menu_find_barcode" => menu::menu_find_barcode(state, arg0).await,
        "scanner_key" => menu::scanner_key(state, arg0).await,
        "scanner_reset" => menu::scanner_reset(state, arg0).await,

        // Modifier modal
        "modifier_session_open" => modifiers::modifier_session_open(state, arg0).await,
        "modifier_toggle" => modifiers::modifier_toggle(state, arg0).await,
        "modifier_remove" => modifiers::modifier_remove(state, arg0).await,
        "modifier_spirit_options" => modifiers::modifier_spirit_options(state, arg0).await,
        "modifier_select_spirit" => modifiers::modifier_select_spirit(state, arg0).await,
        "modifier_set_pour" => modifiers::modifier_set_pour(state, arg0).await,
        "modifier_session_state" => modifiers::modifier_session_state(state, arg0).await,
        "modifier_session_confirm" => modifiers::modifier_session_confirm(state, arg0).await,
        "modifier_session_close" => modifiers::modifier_session_close(state, arg0).await,
        "ingredients_load" => modifiers::ingredients_load(state, arg0).await,
        "ingredient_toggle" => modifiers::ingredient_toggle(state, arg0).await,
        "ingredient_swap" => modifiers::ingredient_swap(state, arg0).await,

        // Order panel
        "order_panel_open" => orders::order_panel_open(state, arg0).await,
        "order_panel_state" => orders::order_panel_state(state, arg0).await,
        "order_panel_update_quantity" => orders::order_panel_update_quantity(state, arg0).await,
        "order_panel_remove" => orders::order_panel_remove(state, arg0).await,
        "order_panel_void" => orders::order_panel_void(state, arg0).await,
        "order_panel_set_seat" => orders::order_panel_set_seat(state, arg0).await,
        "order_panel_set_course" => orders::order_panel_set_course(state, arg0).await,
        "order_panel_hold" => orders::order_panel_hold(state, arg0).await,
        "order_panel_delay" => orders::order_panel_delay(state, arg0).await,
        "order_panel_delay_course" => orders::order_panel_delay_course(state, arg0).await,
        "order_panel_set_status" => orders::order_panel_set_status(state, arg0).await,
        "order_panel_send" => orders::order_panel_send(state, arg0).await,
        "order_panel_watch" => orders::order_panel_watch(state, arg0).await,
        "order_panel_unwatch" => orders::order_panel_unwatch(state, arg0).await,
        "order_panel_close" => orders::order_panel_close(state, arg0).await,

        // Split tickets
        "split_open" => split::split_open(state, arg0).await,
        "split_state" => split::split_state(state, arg0).await,
        "split_add_ticket" => split::split_add_ticket(state, arg0).await,
        "split_remove_ticket" => split::split_remove_ticket(state, arg0).await,
        "split_move_item" => split::split_move_item(state, arg0).await,
        "split_evenly" => split::split_evenly(state, arg0).await,
        "split_select" => split::split_select(state, arg0).await,
        "split_set_status" => split::split_set_status(state, arg0).await,
        "split_save" => split::split_save(state, arg0).await,
        "split_merge" => split::split_merge(state, arg0).await,

        // Payments
        "payment_start" => payments::payment_start(state, arg0).await,
        "payment_state" => payments::payment_state(state, arg0).await,
        "payment_choose_cash" => payments::payment_choose_cash(state, arg0).await,
        "payment_choose_card" => payments::payment_choose_card(state, arg0).await,
        "payment_back" => payments::payment_back(state, arg0).await,
        "payment_select_tip" => payments::payment_select_tip(state, arg0).await,
        "payment_card_request" => payments::payment_card_request(state, arg0).await,
        "payment_card_result" => payments::payment_card_result(state, arg0).await,
        "payment_process_card" => payments::payment_process_card(state, arg0).await,
        "payment_tender_cash" => payments::payment_tender_cash(state, arg0).await,

        // Block time
        "block_time_start" => entertainment::block_time_start(state, arg0).await,
        "block_time_extend" => entertainment::block_time_extend(state, arg0).await,
        "block_time_stop" => entertainment::block_time_stop(state, arg0).await,
        "block_time_state" => entertainment::block_time_state(state, arg0).await,

        _ => Err(format!("Unknown command: {cmd}")),
    };
    if let Err(e) = &result {
        warn!(cmd, error = %e, "command failed");
    }
    result
}
