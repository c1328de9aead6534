//! Menu view-model: items, modifier groups and modifiers as the admin
//! dashboard serves them, plus local search and the child-group cache.
//!
//! Payloads arrive in camelCase from the newer endpoints and snake_case from
//! the legacy ones, so every field accepts both spellings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Qualifier applied to a modifier or ingredient selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreModifier {
    No,
    Lite,
    Extra,
    #[serde(alias = "on_side", alias = "on_the_side")]
    Side,
}

impl PreModifier {
    pub const ALL: [PreModifier; 4] = [Self::No, Self::Lite, Self::Extra, Self::Side];

    /// Ticket prefix, e.g. "EXTRA Cheese".
    pub fn label(self) -> &'static str {
        match self {
            Self::No => "NO",
            Self::Lite => "LITE",
            Self::Extra => "EXTRA",
            Self::Side => "SIDE",
        }
    }
}

/// Liquor quality tier for spirit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiritTier {
    Well,
    Call,
    Premium,
    #[serde(alias = "topshelf", alias = "top")]
    TopShelf,
}

// ---------------------------------------------------------------------------
// Menu items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PourSize {
    pub name: String,
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default, alias = "pour_sizes")]
    pub pour_sizes: Vec<PourSize>,
    #[serde(default, alias = "modifier_group_ids", alias = "modifierGroups")]
    pub modifier_group_ids: Vec<String>,
    #[serde(default, alias = "is_entertainment", alias = "entertainmentRental")]
    pub is_entertainment: bool,
    #[serde(default, alias = "block_minutes", alias = "blockTimeMinutes")]
    pub block_minutes: Option<u32>,
    #[serde(default, alias = "is_86d", alias = "is86d", alias = "eightySixed")]
    pub is_86d: bool,
}

// ---------------------------------------------------------------------------
// Modifier groups
// ---------------------------------------------------------------------------

/// A flat price for selections whose zero-based index is below `up_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatTier {
    #[serde(alias = "up_to")]
    pub up_to: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieredPricing {
    /// The first N selections are free.
    #[serde(default, alias = "free_threshold")]
    pub free_threshold: Option<u32>,
    /// Checked in ascending `up_to` order.
    #[serde(default, alias = "flat_tiers")]
    pub flat_tiers: Vec<FlatTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default, alias = "extra_price")]
    pub extra_price: Option<Decimal>,
    #[serde(default, alias = "child_modifier_group_id")]
    pub child_modifier_group_id: Option<String>,
    #[serde(default, alias = "spirit_tier")]
    pub spirit_tier: Option<SpiritTier>,
    #[serde(default, alias = "is_86d", alias = "is86d", alias = "eightySixed")]
    pub is_86d: bool,
}

fn default_max_selections() -> u32 {
    1
}

fn default_pre_modifiers() -> Vec<PreModifier> {
    PreModifier::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierGroup {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default, alias = "is_required", alias = "required")]
    pub is_required: bool,
    #[serde(default, alias = "min_selections")]
    pub min_selections: u32,
    #[serde(default = "default_max_selections", alias = "max_selections")]
    pub max_selections: u32,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default, alias = "allow_stacking")]
    pub allow_stacking: bool,
    #[serde(default, alias = "exclusion_group", alias = "exclusionGroupKey")]
    pub exclusion_group: Option<String>,
    #[serde(default, alias = "tiered_pricing", alias = "tieredPricingConfig")]
    pub tiered_pricing: Option<TieredPricing>,
    #[serde(default, alias = "is_spirit_group")]
    pub is_spirit_group: bool,
    /// Pre-modifiers offered for this group. Absent means all of them; an
    /// explicit empty list means none.
    #[serde(default = "default_pre_modifiers", alias = "allowed_pre_modifiers")]
    pub allowed_pre_modifiers: Vec<PreModifier>,
}

impl ModifierGroup {
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_single_select(&self) -> bool {
        self.max_selections <= 1
    }

    /// Minimum number of selections the group needs before the line can be
    /// confirmed. A required group with `min_selections == 0` still needs one.
    pub fn required_count(&self) -> u32 {
        if self.is_required {
            self.min_selections.max(1)
        } else {
            self.min_selections
        }
    }

    pub fn modifier(&self, modifier_id: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.id == modifier_id)
    }
}

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// A modifier chosen in a modal session, with its resolved price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedModifier {
    pub modifier_id: String,
    pub group_id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub pre_modifier: Option<PreModifier>,
    pub depth: u32,
    #[serde(default)]
    pub parent_modifier_id: Option<String>,
    #[serde(default)]
    pub spirit_tier: Option<SpiritTier>,
}

impl SelectedModifier {
    /// Kitchen ticket text, e.g. "EXTRA Bacon".
    pub fn ticket_label(&self) -> String {
        match self.pre_modifier {
            Some(pre) => format!("{} {}", pre.label(), self.name),
            None => self.name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Header search: case-insensitive substring match on the name, or an exact
/// SKU/barcode match. An empty query returns every item in menu order.
pub fn search_menu_items<'a>(items: &'a [MenuItem], query: &str) -> Vec<&'a MenuItem> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return items.iter().collect();
    }
    items
        .iter()
        .filter(|item| {
            item.name.to_lowercase().contains(&needle)
                || item.sku.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(&needle))
                || item.barcode.as_deref() == Some(query.trim())
        })
        .collect()
}

pub fn find_by_barcode<'a>(items: &'a [MenuItem], code: &str) -> Option<&'a MenuItem> {
    let code = code.trim();
    items
        .iter()
        .find(|item| item.barcode.as_deref() == Some(code) || item.sku.as_deref() == Some(code))
}

// ---------------------------------------------------------------------------
// Group cache
// ---------------------------------------------------------------------------

/// Modifier groups by id: the item's static groups plus child groups fetched
/// on demand. A group id is only ever fetched once.
#[derive(Debug, Clone, Default)]
pub struct ModifierGroupCache {
    groups: HashMap<String, ModifierGroup>,
}

impl ModifierGroupCache {
    pub fn new(groups: impl IntoIterator<Item = ModifierGroup>) -> Self {
        let mut cache = Self::default();
        for group in groups {
            cache.insert(group);
        }
        cache
    }

    pub fn insert(&mut self, group: ModifierGroup) {
        trace!(group_id = %group.id, modifiers = group.modifiers.len(), "modifier group cached");
        self.groups.insert(group.id.clone(), group);
    }

    pub fn get(&self, group_id: &str) -> Option<&ModifierGroup> {
        self.groups.get(group_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &ModifierGroup> {
        self.groups.values()
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
