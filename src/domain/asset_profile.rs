//! Per-symbol trading parameters and the registry that owns them.
//!
//! The registry is an ordinary value. Built-in profiles are seeded by
//! [`AssetRegistry::with_defaults`] and are frozen; callers may only add new
//! symbols on top of them. Share it with `Arc` where several components need
//! the same view.

use crate::domain::error::{ProfileError, ValidationError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

pub const MAX_COMMISSION_PCT: f64 = 0.1;
pub const MAX_SLIPPAGE_BPS: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetProfile {
    symbol: String,
    market: String,
    currency: String,
    multiplier: f64,
    min_lot_size: u64,
    max_position: Option<u64>,
    commission_fixed: f64,
    commission_pct: f64,
    slippage_bps: f64,
}

/// Outcome of an order-size check. Never an error; `reason` explains a
/// rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSizeCheck {
    pub ok: bool,
    pub reason: Option<String>,
}

impl OrderSizeCheck {
    fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

impl AssetProfile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        market: impl Into<String>,
        currency: impl Into<String>,
        multiplier: f64,
        min_lot_size: u64,
        max_position: Option<u64>,
        commission_fixed: f64,
        commission_pct: f64,
        slippage_bps: f64,
    ) -> Result<Self, ValidationError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(ValidationError::new("symbol", "must not be empty"));
        }
        if !(multiplier > 0.0) {
            return Err(ValidationError::new(
                "multiplier",
                format!("must be positive, got {multiplier}"),
            ));
        }
        if min_lot_size == 0 {
            return Err(ValidationError::new("min_lot_size", "must be positive"));
        }
        if max_position == Some(0) {
            return Err(ValidationError::new("max_position", "must be positive"));
        }
        if !(commission_fixed >= 0.0) {
            return Err(ValidationError::new(
                "commission_fixed",
                format!("must be non-negative, got {commission_fixed}"),
            ));
        }
        if !(0.0..=MAX_COMMISSION_PCT).contains(&commission_pct) {
            return Err(ValidationError::new(
                "commission_pct",
                format!("must be within [0, {MAX_COMMISSION_PCT}], got {commission_pct}"),
            ));
        }
        if !(0.0..=MAX_SLIPPAGE_BPS).contains(&slippage_bps) {
            return Err(ValidationError::new(
                "slippage_bps",
                format!("must be within [0, {MAX_SLIPPAGE_BPS}], got {slippage_bps}"),
            ));
        }

        Ok(Self {
            symbol,
            market: market.into(),
            currency: currency.into(),
            multiplier,
            min_lot_size,
            max_position,
            commission_fixed,
            commission_pct,
            slippage_bps,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn min_lot_size(&self) -> u64 {
        self.min_lot_size
    }

    pub fn max_position(&self) -> Option<u64> {
        self.max_position
    }

    pub fn commission_fixed(&self) -> f64 {
        self.commission_fixed
    }

    pub fn commission_pct(&self) -> f64 {
        self.commission_pct
    }

    pub fn slippage_bps(&self) -> f64 {
        self.slippage_bps
    }

    /// commission_pct * 10000 + slippage_bps
    pub fn total_cost_bps(&self) -> f64 {
        self.commission_pct * 10_000.0 + self.slippage_bps
    }

    /// fixed + trade_value * pct
    pub fn get_commission(&self, trade_value: f64) -> f64 {
        self.commission_fixed + trade_value * self.commission_pct
    }

    pub fn validate_order_size(&self, qty: u64) -> OrderSizeCheck {
        if qty < self.min_lot_size {
            return OrderSizeCheck::rejected(format!(
                "quantity {qty} is below the minimum lot size {}",
                self.min_lot_size
            ));
        }
        if qty % self.min_lot_size != 0 {
            return OrderSizeCheck::rejected(format!(
                "quantity {qty} is not a multiple of the lot size {}",
                self.min_lot_size
            ));
        }
        if let Some(max) = self.max_position {
            if qty > max {
                return OrderSizeCheck::rejected(format!(
                    "quantity {qty} exceeds the maximum position {max}"
                ));
            }
        }
        OrderSizeCheck::accepted()
    }
}

#[derive(Debug, Clone)]
pub struct AssetRegistry {
    builtin: HashMap<String, AssetProfile>,
    custom: HashMap<String, AssetProfile>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AssetRegistry {
    /// A registry without any built-in profiles.
    pub fn empty() -> Self {
        Self {
            builtin: HashMap::new(),
            custom: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let builtin = default_profiles()
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        Self {
            builtin,
            custom: HashMap::new(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetProfile> {
        self.builtin.get(symbol).or_else(|| self.custom.get(symbol))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    pub fn is_builtin(&self, symbol: &str) -> bool {
        self.builtin.contains_key(symbol)
    }

    pub fn register(&mut self, profile: AssetProfile) -> Result<(), ProfileError> {
        if self.is_builtin(&profile.symbol) {
            return Err(ProfileError::BuiltIn(profile.symbol));
        }
        if self.custom.contains_key(&profile.symbol) {
            return Err(ProfileError::AlreadyRegistered(profile.symbol));
        }
        tracing::debug!(symbol = %profile.symbol, "registered asset profile");
        self.custom.insert(profile.symbol.clone(), profile);
        Ok(())
    }

    pub fn update(&mut self, profile: AssetProfile) -> Result<(), ProfileError> {
        if self.is_builtin(&profile.symbol) {
            return Err(ProfileError::BuiltIn(profile.symbol));
        }
        match self.custom.get_mut(&profile.symbol) {
            Some(existing) => {
                *existing = profile;
                Ok(())
            }
            None => Err(ProfileError::NotRegistered(profile.symbol)),
        }
    }

    /// Drops every custom registration; built-ins survive.
    pub fn reset(&mut self) {
        self.custom.clear();
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.builtin
            .keys()
            .chain(self.custom.keys())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type BuiltinRow = (&'static str, &'static str, &'static str, f64, u64, Option<u64>, f64, f64, f64);

// (symbol, market, currency, multiplier, lot, max_position, fixed, pct, slippage_bps)
const BUILTIN_PROFILES: [BuiltinRow; 8] = [
    ("0700.HK", "HK", "HKD", 1.0, 100, None, 0.0, 0.0003, 5.0),
    ("0005.HK", "HK", "HKD", 1.0, 400, None, 0.0, 0.0003, 5.0),
    ("2800.HK", "HK", "HKD", 1.0, 500, None, 0.0, 0.0003, 3.0),
    ("AAPL", "US", "USD", 1.0, 1, None, 1.0, 0.0, 2.0),
    ("SPY", "US", "USD", 1.0, 1, None, 1.0, 0.0, 1.0),
    ("600519.SS", "CN", "CNY", 1.0, 100, None, 5.0, 0.00025, 10.0),
    ("ES", "CME", "USD", 50.0, 1, Some(100), 2.25, 0.0, 1.0),
    ("HSI", "HKFE", "HKD", 50.0, 1, Some(50), 30.0, 0.0, 2.0),
];

fn default_profiles() -> Vec<AssetProfile> {
    BUILTIN_PROFILES
        .into_iter()
        .filter_map(|(s, m, c, mult, lot, max, fixed, pct, slip)| {
            match AssetProfile::new(s, m, c, mult, lot, max, fixed, pct, slip) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(symbol = s, error = %e, "skipping invalid built-in profile");
                    None
                }
            }
        })
        .collect()
}
