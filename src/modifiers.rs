//! Modifier selection session.
//!
//! One session per open modifier modal. Holds `group id -> selections`, the
//! child-to-parent links between nested groups ("modifier of a modifier"),
//! and the lazily fetched child groups. Sessions live only in memory and are
//! discarded when the modal closes; closing cancels any child-group fetch
//! still in flight so a late response never lands in a dead session.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, ModifierGroupSource};
use crate::config::DualPricingConfig;
use crate::menu::{
    MenuItem, Modifier, ModifierGroup, ModifierGroupCache, PreModifier, SelectedModifier,
    SpiritTier,
};
use crate::pricing::{self, DualPrice};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Validation outcomes surfaced to the user as a toast, never as a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionWarning {
    #[error("Modifier group {0} is not available")]
    UnknownGroup(String),
    #[error("Modifier {modifier_id} is not part of {group}")]
    UnknownModifier { group: String, modifier_id: String },
    #[error("Choose the {parent} option that opens {group} first")]
    ParentNotSelected { group: String, parent: String },
    #[error("{name} is 86'd")]
    SoldOut { name: String },
    #[error("{group} allows at most {max} selection(s)")]
    MaxSelectionsReached { group: String, max: u32 },
    #[error("{name} is already selected in {other_group}")]
    ExcludedElsewhere { name: String, other_group: String },
    #[error("{pre:?} is not offered for {group}")]
    PreModifierNotAllowed { pre: PreModifier, group: String },
    #[error("{name} is not a {tier:?} spirit")]
    SpiritTierMismatch { name: String, tier: SpiritTier },
    #[error("{group} needs {needed} more selection(s)")]
    RequiredGroupMissing { group: String, needed: u32 },
}

impl SelectionWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownGroup(_) => "unknown_group",
            Self::UnknownModifier { .. } => "unknown_modifier",
            Self::ParentNotSelected { .. } => "parent_not_selected",
            Self::SoldOut { .. } => "sold_out",
            Self::MaxSelectionsReached { .. } => "max_selections_reached",
            Self::ExcludedElsewhere { .. } => "excluded_elsewhere",
            Self::PreModifierNotAllowed { .. } => "pre_modifier_not_allowed",
            Self::SpiritTierMismatch { .. } => "spirit_tier_mismatch",
            Self::RequiredGroupMissing { .. } => "required_group_missing",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "warning": { "kind": self.kind(), "message": self.to_string() } })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    /// Pre-modifier changed on an existing selection.
    Retagged,
    /// A previous selection was evicted (single-select) or a stacked
    /// duplicate was swapped out at the group maximum.
    Replaced,
    /// Another instance of an already-selected modifier was added.
    Stacked,
    Warning(SelectionWarning),
}

impl ToggleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Retagged => "retagged",
            Self::Replaced => "replaced",
            Self::Stacked => "stacked",
            Self::Warning(_) => "warning",
        }
    }
}

/// Where a child group hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub parent_group_id: String,
    pub modifier_id: String,
}

/// Handle for a child-group fetch started with [`ModifierSession::begin_child_load`].
#[derive(Debug, Clone)]
pub struct ChildLoad {
    pub group_id: String,
    pub cancel: CancellationToken,
}

/// The modal's confirmed result, ready to become an order line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedItem {
    pub item_id: String,
    pub name: String,
    pub base_price: Decimal,
    pub pour_size: Option<String>,
    pub modifiers: Vec<SelectedModifier>,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub item_id: String,
    pub pour_size: Option<String>,
    pub selections: Vec<SelectedModifier>,
    pub counts: HashMap<String, usize>,
    pub total: DualPrice,
    pub missing_required: Vec<String>,
    pub pending_child_groups: Vec<String>,
    pub complete: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct ModifierSession {
    id: String,
    item: MenuItem,
    root_group_ids: Vec<String>,
    groups: ModifierGroupCache,
    selections: HashMap<String, Vec<SelectedModifier>>,
    child_links: HashMap<String, Vec<ChildLink>>,
    loading: HashSet<String>,
    pour_size: Option<String>,
    cancel: CancellationToken,
}

impl ModifierSession {
    /// Open a session for `item` with its statically known groups. Groups
    /// listed in `item.modifier_group_ids` are the roots; any other group
    /// passed in is treated as a pre-loaded child group.
    pub fn open(item: MenuItem, groups: Vec<ModifierGroup>) -> Self {
        let root_group_ids = if item.modifier_group_ids.is_empty() {
            groups.iter().map(|g| g.id.clone()).collect()
        } else {
            item.modifier_group_ids.clone()
        };
        let mut session = Self {
            id: Uuid::new_v4().to_string(),
            item,
            root_group_ids,
            groups: ModifierGroupCache::new(groups),
            selections: HashMap::new(),
            child_links: HashMap::new(),
            loading: HashSet::new(),
            pour_size: None,
            cancel: CancellationToken::new(),
        };
        session.rebuild_child_links();
        info!(session_id = %session.id, item_id = %session.item.id, groups = session.groups.len(), "modifier session opened");
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn item(&self) -> &MenuItem {
        &self.item
    }

    pub fn group(&self, group_id: &str) -> Option<&ModifierGroup> {
        self.groups.get(group_id)
    }

    pub fn selections(&self, group_id: &str) -> &[SelectedModifier] {
        self.selections.get(group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Discard the session: cancels in-flight child-group fetches.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.loading.clear();
        debug!(session_id = %self.id, "modifier session closed");
    }

    pub fn set_pour_size(&mut self, pour: Option<String>) {
        self.pour_size = pour.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    }

    // -- Toggling -------------------------------------------------------------

    /// Add, remove or re-tag a modifier in a group.
    ///
    /// - a selected modifier tapped with a different pre-modifier is re-tagged
    /// - a selected modifier tapped again is removed, unless the group stacks
    /// - single-select groups evict the previous choice and its child selections
    /// - multi-select groups add up to `max_selections`; at the limit a stacking
    ///   group swaps out the newest duplicate, anything else is a warning
    pub fn toggle_modifier(
        &mut self,
        group_id: &str,
        modifier_id: &str,
        pre_modifier: Option<PreModifier>,
    ) -> ToggleOutcome {
        let outcome = self.toggle_inner(group_id, modifier_id, pre_modifier);
        match &outcome {
            ToggleOutcome::Warning(w) => {
                debug!(session_id = %self.id, group_id, modifier_id, warning = %w, "modifier toggle rejected")
            }
            o => {
                self.reprice_group(group_id);
                debug!(session_id = %self.id, group_id, modifier_id, outcome = o.as_str(), "modifier toggled")
            }
        }
        outcome
    }

    fn toggle_inner(
        &mut self,
        group_id: &str,
        modifier_id: &str,
        pre_modifier: Option<PreModifier>,
    ) -> ToggleOutcome {
        let Some(group) = self.groups.get(group_id).cloned() else {
            return ToggleOutcome::Warning(SelectionWarning::UnknownGroup(group_id.to_string()));
        };
        let Some(modifier) = group.modifier(modifier_id).cloned() else {
            return ToggleOutcome::Warning(SelectionWarning::UnknownModifier {
                group: group.title().to_string(),
                modifier_id: modifier_id.to_string(),
            });
        };
        if !self.active_group_ids().iter().any(|g| g == group_id) {
            let parent = self
                .child_links
                .get(group_id)
                .and_then(|links| links.first())
                .and_then(|l| self.groups.get(&l.parent_group_id))
                .map(|g| g.title().to_string())
                .unwrap_or_default();
            return ToggleOutcome::Warning(SelectionWarning::ParentNotSelected {
                group: group.title().to_string(),
                parent,
            });
        }
        if let Some(pre) = pre_modifier {
            if !group.allowed_pre_modifiers.contains(&pre) {
                return ToggleOutcome::Warning(SelectionWarning::PreModifierNotAllowed {
                    pre,
                    group: group.title().to_string(),
                });
            }
        }

        let current = self.selections(group_id);
        let count = current.len() as u32;
        let last_instance = current.iter().rposition(|s| s.modifier_id == modifier_id);
        let single = group.is_single_select() || group.is_spirit_group;

        if let Some(idx) = last_instance {
            let existing_pre = current[idx].pre_modifier;
            if pre_modifier.is_some() && pre_modifier != existing_pre {
                if let Some(list) = self.selections.get_mut(group_id) {
                    list[idx].pre_modifier = pre_modifier;
                }
                return ToggleOutcome::Retagged;
            }
            if !(group.allow_stacking && !single) {
                self.remove_at(group_id, idx);
                return ToggleOutcome::Removed;
            }
            if modifier.is_86d {
                return ToggleOutcome::Warning(SelectionWarning::SoldOut {
                    name: modifier.name.clone(),
                });
            }
            if count >= group.max_selections {
                // Swap the newest duplicate for a fresh instance.
                self.remove_at(group_id, idx);
                self.push_selection(&group, &modifier, pre_modifier);
                return ToggleOutcome::Replaced;
            }
        }

        if modifier.is_86d {
            return ToggleOutcome::Warning(SelectionWarning::SoldOut {
                name: modifier.name.clone(),
            });
        }
        if let Some(key) = group.exclusion_group.as_deref() {
            if let Some(other) = self.excluding_group(group_id, key, modifier_id) {
                return ToggleOutcome::Warning(SelectionWarning::ExcludedElsewhere {
                    name: modifier.name.clone(),
                    other_group: other,
                });
            }
        }

        if single {
            let evicted = !self.selections(group_id).is_empty();
            self.clear_group_selections(group_id);
            self.push_selection(&group, &modifier, pre_modifier);
            return if evicted {
                ToggleOutcome::Replaced
            } else {
                ToggleOutcome::Added
            };
        }

        if count < group.max_selections {
            self.push_selection(&group, &modifier, pre_modifier);
            return if last_instance.is_some() {
                ToggleOutcome::Stacked
            } else {
                ToggleOutcome::Added
            };
        }

        ToggleOutcome::Warning(SelectionWarning::MaxSelectionsReached {
            group: group.title().to_string(),
            max: group.max_selections,
        })
    }

    /// Remove the newest instance of a modifier. Used by stacking groups,
    /// where a tap adds another instance instead of deselecting.
    pub fn remove_modifier(&mut self, group_id: &str, modifier_id: &str) -> bool {
        let Some(idx) = self
            .selections(group_id)
            .iter()
            .rposition(|s| s.modifier_id == modifier_id)
        else {
            return false;
        };
        self.remove_at(group_id, idx);
        self.reprice_group(group_id);
        true
    }

    /// Spirit-group selection: the modifier must belong to the requested tier.
    pub fn select_spirit(
        &mut self,
        group_id: &str,
        tier: SpiritTier,
        modifier_id: &str,
    ) -> ToggleOutcome {
        if let Some(modifier) = self.groups.get(group_id).and_then(|g| g.modifier(modifier_id)) {
            if modifier.spirit_tier != Some(tier) {
                return ToggleOutcome::Warning(SelectionWarning::SpiritTierMismatch {
                    name: modifier.name.clone(),
                    tier,
                });
            }
        }
        self.toggle_modifier(group_id, modifier_id, None)
    }

    pub fn spirit_options(&self, group_id: &str, tier: SpiritTier) -> Vec<&Modifier> {
        self.groups
            .get(group_id)
            .map(|g| {
                g.modifiers
                    .iter()
                    .filter(|m| m.spirit_tier == Some(tier))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_selection(
        &mut self,
        group: &ModifierGroup,
        modifier: &Modifier,
        pre_modifier: Option<PreModifier>,
    ) {
        let link = self.parent_of(&group.id);
        let selection = SelectedModifier {
            modifier_id: modifier.id.clone(),
            group_id: group.id.clone(),
            name: modifier.name.clone(),
            price: modifier.price,
            pre_modifier,
            depth: self.depth_of(&group.id),
            parent_modifier_id: link.map(|l| l.modifier_id),
            spirit_tier: modifier.spirit_tier,
        };
        self.selections
            .entry(group.id.clone())
            .or_default()
            .push(selection);
    }

    fn remove_at(&mut self, group_id: &str, idx: usize) {
        let Some(list) = self.selections.get_mut(group_id) else {
            return;
        };
        let removed = list.remove(idx);
        let still_selected = list.iter().any(|s| s.modifier_id == removed.modifier_id);
        if list.is_empty() {
            self.selections.remove(group_id);
        }
        if !still_selected {
            if let Some(child) = self.child_group_of(group_id, &removed.modifier_id) {
                self.clear_subtree(&child);
            }
        }
    }

    /// Drop every selection of a group, and the subtrees hanging off them.
    fn clear_group_selections(&mut self, group_id: &str) {
        let removed = self.selections.remove(group_id).unwrap_or_default();
        for sel in removed {
            if let Some(child) = self.child_group_of(group_id, &sel.modifier_id) {
                self.clear_subtree(&child);
            }
        }
    }

    /// Clear a group and all of its descendants. Iterative; the visited set
    /// guards against cycles in server data.
    fn clear_subtree(&mut self, root: &str) {
        let mut stack = vec![root.to_string()];
        let mut visited = HashSet::new();
        while let Some(group_id) = stack.pop() {
            if !visited.insert(group_id.clone()) {
                continue;
            }
            for sel in self.selections.remove(&group_id).unwrap_or_default() {
                if let Some(child) = self.child_group_of(&group_id, &sel.modifier_id) {
                    stack.push(child);
                }
            }
        }
    }

    fn child_group_of(&self, group_id: &str, modifier_id: &str) -> Option<String> {
        self.groups
            .get(group_id)
            .and_then(|g| g.modifier(modifier_id))
            .and_then(|m| m.child_modifier_group_id.clone())
    }

    // -- Pricing --------------------------------------------------------------

    /// Price for the `selection_index`-th (zero-based) selection in a group:
    /// free under the free threshold, then the first flat tier covering the
    /// index, else the modifier's own price.
    pub fn tiered_price(group: &ModifierGroup, modifier: &Modifier, selection_index: u32) -> Decimal {
        Self::tier_price(group, selection_index).unwrap_or(modifier.price)
    }

    /// The tier rule covering `selection_index`, if any.
    fn tier_price(group: &ModifierGroup, selection_index: u32) -> Option<Decimal> {
        let tiers = group.tiered_pricing.as_ref()?;
        if tiers.free_threshold.is_some_and(|n| selection_index < n) {
            return Some(Decimal::ZERO);
        }
        tiers
            .flat_tiers
            .iter()
            .filter(|t| selection_index < t.up_to)
            .min_by_key(|t| t.up_to)
            .map(|t| t.price)
    }

    /// Recompute prices after the group changed; indices shift on removal.
    fn reprice_group(&mut self, group_id: &str) {
        let Some(group) = self.groups.get(group_id) else {
            return;
        };
        let Some(list) = self.selections.get_mut(group_id) else {
            return;
        };
        let mut seen: HashSet<String> = HashSet::new();
        for (idx, sel) in list.iter_mut().enumerate() {
            let Some(modifier) = group.modifier(&sel.modifier_id) else {
                continue;
            };
            let stacked = !seen.insert(sel.modifier_id.clone());
            // A matching tier beats the stacked price.
            let base = match Self::tier_price(group, idx as u32) {
                Some(tiered) => tiered,
                None if stacked => modifier.extra_price.unwrap_or(modifier.price),
                None => modifier.price,
            };
            sel.price = pricing::pre_modifier_price(base, modifier.extra_price, sel.pre_modifier);
        }
    }

    /// Modifier ids already chosen in sibling groups sharing `exclusion_key`.
    pub fn excluded_modifier_ids(&self, group_id: &str, exclusion_key: &str) -> HashSet<String> {
        self.selections
            .iter()
            .filter(|(gid, _)| gid.as_str() != group_id)
            .filter(|(gid, _)| {
                self.groups
                    .get(gid)
                    .and_then(|g| g.exclusion_group.as_deref())
                    == Some(exclusion_key)
            })
            .flat_map(|(_, sels)| sels.iter().map(|s| s.modifier_id.clone()))
            .collect()
    }

    fn excluding_group(&self, group_id: &str, key: &str, modifier_id: &str) -> Option<String> {
        if !self.excluded_modifier_ids(group_id, key).contains(modifier_id) {
            return None;
        }
        self.selections
            .iter()
            .filter(|(gid, sels)| {
                gid.as_str() != group_id && sels.iter().any(|s| s.modifier_id == modifier_id)
            })
            .find_map(|(gid, _)| self.groups.get(gid).map(|g| g.title().to_string()))
    }

    /// Per-unit price of the line: item (with pour) plus every selection.
    pub fn running_total(&self, cfg: &DualPricingConfig) -> DualPrice {
        let base = pricing::pour_price(&self.item, self.pour_size.as_deref());
        let modifiers: Decimal = self.selected_modifiers().iter().map(|s| s.price).sum();
        DualPrice::from_cash(base + modifiers, cfg)
    }

    // -- Tree structure -------------------------------------------------------

    fn rebuild_child_links(&mut self) {
        let mut links: HashMap<String, Vec<ChildLink>> = HashMap::new();
        let mut groups: Vec<&ModifierGroup> = self.groups.values().collect();
        groups.sort_by_key(|g| (!self.root_group_ids.contains(&g.id), g.id.clone()));
        for group in groups {
            for m in &group.modifiers {
                if let Some(child) = &m.child_modifier_group_id {
                    links.entry(child.clone()).or_default().push(ChildLink {
                        parent_group_id: group.id.clone(),
                        modifier_id: m.id.clone(),
                    });
                }
            }
        }
        self.child_links = links;
    }

    /// The parent link of a child group. When several modifiers point at the
    /// same child group, the one currently selected wins.
    pub fn parent_of(&self, group_id: &str) -> Option<ChildLink> {
        if self.root_group_ids.iter().any(|g| g == group_id) {
            return None;
        }
        let links = self.child_links.get(group_id)?;
        links
            .iter()
            .find(|l| {
                self.selections(&l.parent_group_id)
                    .iter()
                    .any(|s| s.modifier_id == l.modifier_id)
            })
            .or_else(|| links.first())
            .cloned()
    }

    /// Nesting depth: root groups are 0. Walks parent links iteratively and
    /// stops at the first repeated group.
    pub fn depth_of(&self, group_id: &str) -> u32 {
        let mut depth = 0;
        let mut current = group_id.to_string();
        let mut visited = HashSet::from([current.clone()]);
        while let Some(link) = self.parent_of(&current) {
            if !visited.insert(link.parent_group_id.clone()) {
                warn!(session_id = %self.id, group_id, "cycle in modifier group tree");
                break;
            }
            depth += 1;
            current = link.parent_group_id;
        }
        depth
    }

    // -- Lazy child groups ----------------------------------------------------

    /// The child group a tap on `modifier` would need fetched first.
    pub fn child_group_to_load<'m>(&self, modifier: &'m Modifier) -> Option<&'m str> {
        modifier
            .child_modifier_group_id
            .as_deref()
            .filter(|child| !self.groups.contains(child) && !self.loading.contains(*child))
    }

    /// Child groups of selected modifiers that are neither cached nor loading.
    pub fn pending_child_groups(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .selections
            .iter()
            .flat_map(|(gid, sels)| sels.iter().map(move |s| (gid, s)))
            .filter_map(|(gid, s)| self.child_group_of(gid, &s.modifier_id))
            .filter(|child| !self.groups.contains(child) && !self.loading.contains(child))
            .collect();
        pending.sort();
        pending.dedup();
        pending
    }

    /// Mark a child group as loading. `None` when it is cached, already
    /// loading, or the session is closed.
    pub fn begin_child_load(&mut self, group_id: &str) -> Option<ChildLoad> {
        if self.is_closed() || self.groups.contains(group_id) || !self.loading.insert(group_id.to_string()) {
            return None;
        }
        Some(ChildLoad {
            group_id: group_id.to_string(),
            cancel: self.cancel.child_token(),
        })
    }

    /// Store a fetched child group. Results for a closed session are dropped.
    pub fn finish_child_load(
        &mut self,
        load: ChildLoad,
        result: Result<ModifierGroup, ApiError>,
    ) -> Result<bool, ApiError> {
        self.loading.remove(&load.group_id);
        if self.is_closed() || load.cancel.is_cancelled() {
            debug!(session_id = %self.id, group_id = %load.group_id, "discarding child group for closed session");
            return Ok(false);
        }
        let mut group = result?;
        if group.id != load.group_id {
            warn!(requested = %load.group_id, received = %group.id, "child group id mismatch, keeping requested id");
            group.id = load.group_id.clone();
        }
        self.groups.insert(group);
        self.rebuild_child_links();
        Ok(true)
    }

    /// Fetch and cache a child group in one step.
    pub async fn load_child_group(
        &mut self,
        source: &dyn ModifierGroupSource,
        group_id: &str,
    ) -> Result<bool, ApiError> {
        let Some(load) = self.begin_child_load(group_id) else {
            return Ok(false);
        };
        let result = fetch_child_group(source, &load).await;
        self.finish_child_load(load, result)
    }

    // -- Completion -----------------------------------------------------------

    /// Groups reachable from the item (roots, plus children of selected
    /// modifiers) in tree order.
    fn active_group_ids(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<String> = self.root_group_ids.iter().rev().cloned().collect();
        while let Some(gid) = stack.pop() {
            if !visited.insert(gid.clone()) {
                continue;
            }
            let mut children = Vec::new();
            for sel in self.selections(&gid) {
                if let Some(child) = self.child_group_of(&gid, &sel.modifier_id) {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
            }
            order.push(gid);
            stack.extend(children.into_iter().rev());
        }
        order
    }

    pub fn missing_required(&self) -> Vec<SelectionWarning> {
        self.active_group_ids()
            .iter()
            .filter_map(|gid| self.groups.get(gid))
            .filter_map(|g| {
                let have = self.selections(&g.id).len() as u32;
                let need = g.required_count();
                (have < need).then(|| SelectionWarning::RequiredGroupMissing {
                    group: g.title().to_string(),
                    needed: need - have,
                })
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
            && self.loading.is_empty()
            && self.pending_child_groups().is_empty()
    }

    /// Selections in tree order: each group's selections, each followed by
    /// the selections of its child group.
    pub fn selected_modifiers(&self) -> Vec<SelectedModifier> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, usize)> = self.root_group_ids.iter().rev().map(|g| (g.clone(), 0)).collect();
        while let Some((gid, start)) = stack.pop() {
            if start == 0 && !visited.insert(gid.clone()) {
                continue;
            }
            let sels = self.selections(&gid);
            if let Some(sel) = sels.get(start) {
                out.push(sel.clone());
                stack.push((gid.clone(), start + 1));
                let first_instance = sels[..start].iter().all(|s| s.modifier_id != sel.modifier_id);
                if first_instance {
                    if let Some(child) = self.child_group_of(&gid, &sel.modifier_id) {
                        stack.push((child, 0));
                    }
                }
            }
        }
        out
    }

    pub fn confirm(&self) -> Result<ConfirmedItem, SelectionWarning> {
        if let Some(missing) = self.missing_required().into_iter().next() {
            return Err(missing);
        }
        let modifiers = self.selected_modifiers();
        let base_price = pricing::pour_price(&self.item, self.pour_size.as_deref());
        let unit_price = base_price + modifiers.iter().map(|m| m.price).sum::<Decimal>();
        Ok(ConfirmedItem {
            item_id: self.item.id.clone(),
            name: self.item.name.clone(),
            base_price,
            pour_size: self.pour_size.clone(),
            modifiers,
            unit_price,
        })
    }

    pub fn snapshot(&self, cfg: &DualPricingConfig) -> SessionSnapshot {
        let missing: Vec<String> = self.missing_required().iter().map(ToString::to_string).collect();
        let pending: Vec<String> = self
            .pending_child_groups()
            .into_iter()
            .chain(self.loading.iter().cloned())
            .collect();
        SessionSnapshot {
            session_id: self.id.clone(),
            item_id: self.item.id.clone(),
            pour_size: self.pour_size.clone(),
            selections: self.selected_modifiers(),
            counts: self
                .selections
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            total: self.running_total(cfg),
            complete: missing.is_empty() && pending.is_empty(),
            missing_required: missing,
            pending_child_groups: pending,
        }
    }
}

/// Fetch a child group, abandoning it if the owning session closes first.
pub async fn fetch_child_group(
    source: &dyn ModifierGroupSource,
    load: &ChildLoad,
) -> Result<ModifierGroup, ApiError> {
    tokio::select! {
        _ = load.cancel.cancelled() => Err(ApiError::Cancelled),
        res = source.fetch_modifier_group(&load.group_id) => res,
    }
}
