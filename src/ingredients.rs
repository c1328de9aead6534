//! Ingredient customisation for a menu item: No/Lite/Extra/Side on the
//! item's own components, and swapping a component for an alternative.
//!
//! Ingredient choices become ordinary depth-0 modifier lines on the order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::menu::{PreModifier, SelectedModifier};
use crate::modifiers::SelectionWarning;

const INGREDIENT_GROUP_ID: &str = "ingredients";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOption {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "price_delta", alias = "upcharge")]
    pub price_delta: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    /// Part of the item as served. Non-default ingredients are add-ons.
    #[serde(default = "default_true", alias = "is_default", alias = "included")]
    pub is_default: bool,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default, alias = "extra_price")]
    pub extra_price: Option<Decimal>,
    #[serde(default = "default_true", alias = "allow_pre_modifiers")]
    pub allow_pre_modifiers: bool,
    #[serde(default, alias = "swap_options", alias = "swaps")]
    pub swap_options: Vec<SwapOption>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientChoice {
    pub pre_modifier: Option<PreModifier>,
    pub swap_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngredientSelections {
    ingredients: Vec<Ingredient>,
    choices: HashMap<String, IngredientChoice>,
}

impl IngredientSelections {
    pub fn new(ingredients: Vec<Ingredient>) -> Self {
        Self {
            ingredients,
            choices: HashMap::new(),
        }
    }

    pub fn ingredients(&self) -> &[Ingredient] {
        &self.ingredients
    }

    pub fn choice(&self, ingredient_id: &str) -> Option<&IngredientChoice> {
        self.choices.get(ingredient_id)
    }

    fn ingredient(&self, ingredient_id: &str) -> Result<&Ingredient, SelectionWarning> {
        self.ingredients
            .iter()
            .find(|i| i.id == ingredient_id)
            .ok_or_else(|| SelectionWarning::UnknownModifier {
                group: "Ingredients".into(),
                modifier_id: ingredient_id.to_string(),
            })
    }

    /// Set a pre-modifier; choosing the active one again clears it.
    /// Returns the pre-modifier now in effect.
    pub fn toggle_pre_modifier(
        &mut self,
        ingredient_id: &str,
        pre: PreModifier,
    ) -> Result<Option<PreModifier>, SelectionWarning> {
        let ingredient = self.ingredient(ingredient_id)?;
        let not_offered = !ingredient.allow_pre_modifiers
            || (!ingredient.is_default && pre == PreModifier::No);
        if not_offered {
            return Err(SelectionWarning::PreModifierNotAllowed {
                pre,
                group: ingredient.name.clone(),
            });
        }

        let choice = self.choices.entry(ingredient_id.to_string()).or_default();
        choice.pre_modifier = if choice.pre_modifier == Some(pre) {
            None
        } else {
            Some(pre)
        };
        // A removed ingredient cannot also be swapped.
        if choice.pre_modifier == Some(PreModifier::No) {
            choice.swap_id = None;
        }
        let now = choice.pre_modifier;
        self.prune(ingredient_id);
        Ok(now)
    }

    /// Substitute a default ingredient with one of its swap options.
    pub fn swap(&mut self, ingredient_id: &str, option_id: &str) -> Result<(), SelectionWarning> {
        let ingredient = self.ingredient(ingredient_id)?;
        if !ingredient.swap_options.iter().any(|o| o.id == option_id) {
            return Err(SelectionWarning::UnknownModifier {
                group: ingredient.name.clone(),
                modifier_id: option_id.to_string(),
            });
        }
        let choice = self.choices.entry(ingredient_id.to_string()).or_default();
        choice.swap_id = Some(option_id.to_string());
        choice.pre_modifier = None;
        Ok(())
    }

    pub fn clear_swap(&mut self, ingredient_id: &str) {
        if let Some(choice) = self.choices.get_mut(ingredient_id) {
            choice.swap_id = None;
        }
        self.prune(ingredient_id);
    }

    fn prune(&mut self, ingredient_id: &str) {
        if self
            .choices
            .get(ingredient_id)
            .is_some_and(|c| c.pre_modifier.is_none() && c.swap_id.is_none())
        {
            self.choices.remove(ingredient_id);
        }
    }

    /// Default ingredients are already in the item price: removing or
    /// lightening them is free and only "Extra" costs money. Add-ons cost
    /// their price, or the extra price when doubled.
    fn line_price(ingredient: &Ingredient, choice: &IngredientChoice) -> Decimal {
        if let Some(swap) = choice
            .swap_id
            .as_deref()
            .and_then(|id| ingredient.swap_options.iter().find(|o| o.id == id))
        {
            return swap.price_delta;
        }
        match (ingredient.is_default, choice.pre_modifier) {
            (_, None) | (_, Some(PreModifier::No)) => Decimal::ZERO,
            (true, Some(PreModifier::Extra)) => ingredient.extra_price.unwrap_or(ingredient.price),
            (true, Some(_)) => Decimal::ZERO,
            (false, Some(PreModifier::Extra)) => ingredient
                .extra_price
                .unwrap_or(ingredient.price * Decimal::TWO),
            (false, Some(_)) => ingredient.price,
        }
    }

    pub fn price_delta(&self) -> Decimal {
        self.to_modifiers().iter().map(|m| m.price).sum()
    }

    /// Order-line modifiers in menu order.
    pub fn to_modifiers(&self) -> Vec<SelectedModifier> {
        self.ingredients
            .iter()
            .filter_map(|ingredient| {
                let choice = self.choices.get(&ingredient.id)?;
                let swap = choice
                    .swap_id
                    .as_deref()
                    .and_then(|id| ingredient.swap_options.iter().find(|o| o.id == id));
                let (modifier_id, name) = match swap {
                    Some(opt) => (opt.id.clone(), format!("SUB {} for {}", opt.name, ingredient.name)),
                    None => (ingredient.id.clone(), ingredient.name.clone()),
                };
                Some(SelectedModifier {
                    modifier_id,
                    group_id: INGREDIENT_GROUP_ID.to_string(),
                    name,
                    price: Self::line_price(ingredient, choice),
                    pre_modifier: if swap.is_some() { None } else { choice.pre_modifier },
                    depth: 0,
                    parent_modifier_id: None,
                    spirit_tier: None,
                })
            })
            .collect()
    }
}
