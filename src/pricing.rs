//! Price helpers shared by the modifier modal, order panel and split checks:
//! dual (cash/card) pricing, pour-size multipliers and pre-modifier pricing.
//!
//! All money math is done in `Decimal` and rounded to cents at the edges.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::DualPricingConfig;
use crate::menu::{MenuItem, Modifier, PreModifier};

const DECIMAL_PLACES: u32 = 2;

/// Default pour multipliers used when an item carries no pour table.
const DEFAULT_POURS: &[(&str, i64, u32)] = &[
    ("shot", 1, 0),
    ("rocks", 1, 0),
    ("double", 2, 0),
    ("tall", 15, 1),
    ("short", 75, 2),
];

/// Round half away from zero to cents.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Dual pricing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DualPrice {
    pub cash: Decimal,
    pub card: Decimal,
}

impl DualPrice {
    pub fn from_cash(cash: Decimal, cfg: &DualPricingConfig) -> Self {
        let cash = round_money(cash);
        Self {
            cash,
            card: card_price(cash, cfg),
        }
    }

    pub fn zero() -> Self {
        Self {
            cash: Decimal::ZERO,
            card: Decimal::ZERO,
        }
    }

    /// Cash-discount amount shown on the receipt.
    pub fn discount(&self) -> Decimal {
        self.card - self.cash
    }
}

impl std::ops::Add for DualPrice {
    type Output = DualPrice;

    fn add(self, rhs: Self) -> Self {
        Self {
            cash: self.cash + rhs.cash,
            card: self.card + rhs.card,
        }
    }
}

impl std::iter::Sum for DualPrice {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, p| acc + p)
    }
}

/// Card price for a cash price. Never below the cash price; equal when dual
/// pricing is disabled.
pub fn card_price(cash: Decimal, cfg: &DualPricingConfig) -> Decimal {
    if !cfg.enabled || cfg.card_surcharge_percent <= Decimal::ZERO {
        return cash;
    }
    let surcharged =
        round_money(cash * (Decimal::ONE + cfg.card_surcharge_percent / Decimal::ONE_HUNDRED));
    surcharged.max(cash)
}

pub fn format_price(value: Decimal) -> String {
    let rounded = round_money(value);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-${:.2}", rounded.abs())
    } else {
        format!("${:.2}", rounded.abs())
    }
}

/// "$5.00" when both prices match, otherwise "$5.00 / $5.20 card".
pub fn format_dual_price(price: &DualPrice) -> String {
    if price.cash == price.card {
        format_price(price.cash)
    } else {
        format!("{} / {} card", format_price(price.cash), format_price(price.card))
    }
}

// ---------------------------------------------------------------------------
// Pour sizes
// ---------------------------------------------------------------------------

/// Multiplier for a pour size: the item's own table first, then the house
/// defaults. Unknown pours price as a single.
pub fn pour_multiplier(item: &MenuItem, pour: &str) -> Decimal {
    let pour = pour.trim();
    if let Some(size) = item
        .pour_sizes
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(pour))
    {
        return size.multiplier;
    }
    DEFAULT_POURS
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(pour))
        .map(|(_, num, scale)| Decimal::new(*num, *scale))
        .unwrap_or(Decimal::ONE)
}

pub fn pour_price(item: &MenuItem, pour: Option<&str>) -> Decimal {
    match pour {
        Some(p) => round_money(item.price * pour_multiplier(item, p)),
        None => item.price,
    }
}

// ---------------------------------------------------------------------------
// Pre-modifiers
// ---------------------------------------------------------------------------

/// Price of a modifier under a pre-modifier. "No" is free, "Extra" costs the
/// modifier's extra price (or double when none is set), everything else is
/// the base price.
pub fn pre_modifier_price(base: Decimal, extra_price: Option<Decimal>, pre: Option<PreModifier>) -> Decimal {
    match pre {
        Some(PreModifier::No) => Decimal::ZERO,
        Some(PreModifier::Extra) => extra_price.unwrap_or(base * Decimal::TWO),
        Some(PreModifier::Lite) | Some(PreModifier::Side) | None => base,
    }
}

pub fn modifier_price(modifier: &Modifier, pre: Option<PreModifier>) -> Decimal {
    pre_modifier_price(modifier.price, modifier.extra_price, pre)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::PourSize;

    fn dual(pct: i64) -> DualPricingConfig {
        DualPricingConfig {
            enabled: true,
            card_surcharge_percent: Decimal::new(pct, 1),
        }
    }

    fn whiskey() -> MenuItem {
        MenuItem {
            id: "w".into(),
            name: "Whiskey".into(),
            price: Decimal::new(800, 2),
            sku: None,
            barcode: None,
            pour_sizes: vec![PourSize {
                name: "Double".into(),
                multiplier: Decimal::new(175, 2),
            }],
            modifier_group_ids: vec![],
            is_entertainment: false,
            block_minutes: None,
            is_86d: false,
        }
    }

    #[test]
    fn card_price_applies_surcharge_and_rounds() {
        // 4% of 9.99 = 0.3996 -> 10.39
        assert_eq!(card_price(Decimal::new(999, 2), &dual(40)), Decimal::new(1039, 2));
        assert_eq!(card_price(Decimal::ZERO, &dual(40)), Decimal::ZERO);
    }

    #[test]
    fn card_price_is_cash_when_disabled() {
        let cfg = DualPricingConfig {
            enabled: false,
            card_surcharge_percent: Decimal::from(4),
        };
        assert_eq!(card_price(Decimal::new(500, 2), &cfg), Decimal::new(500, 2));
    }

    #[test]
    fn card_never_below_cash() {
        for cents in [1i64, 3, 49, 50, 101, 12345] {
            let p = DualPrice::from_cash(Decimal::new(cents, 2), &dual(35));
            assert!(p.card >= p.cash, "{p:?}");
        }
    }

    #[test]
    fn formats_single_and_dual_prices() {
        let same = DualPrice::from_cash(Decimal::new(500, 2), &DualPricingConfig::default());
        assert_eq!(format_dual_price(&same), "$5.00");
        let split = DualPrice::from_cash(Decimal::new(500, 2), &dual(40));
        assert_eq!(format_dual_price(&split), "$5.00 / $5.20 card");
        assert_eq!(same.discount(), Decimal::ZERO);
        assert_eq!(split.discount(), Decimal::new(20, 2));
        assert_eq!(format_price(Decimal::new(-125, 2)), "-$1.25");
    }

    #[test]
    fn pour_uses_item_table_then_defaults() {
        let item = whiskey();
        assert_eq!(pour_price(&item, Some("double")), Decimal::new(1400, 2));
        assert_eq!(pour_price(&item, Some("tall")), Decimal::new(1200, 2));
        assert_eq!(pour_price(&item, Some("short")), Decimal::new(600, 2));
        assert_eq!(pour_price(&item, Some("mystery")), Decimal::new(800, 2));
        assert_eq!(pour_price(&item, None), Decimal::new(800, 2));
    }

    #[test]
    fn pre_modifier_pricing() {
        let base = Decimal::new(150, 2);
        assert_eq!(pre_modifier_price(base, None, Some(PreModifier::No)), Decimal::ZERO);
        assert_eq!(pre_modifier_price(base, None, Some(PreModifier::Lite)), base);
        assert_eq!(pre_modifier_price(base, None, Some(PreModifier::Side)), base);
        assert_eq!(pre_modifier_price(base, None, Some(PreModifier::Extra)), Decimal::new(300, 2));
        assert_eq!(
            pre_modifier_price(base, Some(Decimal::new(100, 2)), Some(PreModifier::Extra)),
            Decimal::new(100, 2)
        );
    }
}
