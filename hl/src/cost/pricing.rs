//! Per-resource pricing
//!
//! Prices are held as integer nanodollars per usage unit so that ledger
//! arithmetic stays exact under concurrent accumulation. The default table
//! carries the Claude 4.5 family at list price (USD per million tokens).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Nanodollars per USD
pub const NANOS_PER_USD: u64 = 1_000_000_000;

/// Price of one resource, in nanodollars per usage unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub input_nanos_per_unit: u64,
    pub output_nanos_per_unit: u64,
}

impl Price {
    /// Build a price from USD-per-million-units list prices
    pub fn per_million(input_usd: f64, output_usd: f64) -> Self {
        debug!(input_usd, output_usd, "Price::per_million: called");
        // $1 per 1M units == 1000 nanodollars per unit
        Self {
            input_nanos_per_unit: usd_per_million_to_nanos(input_usd),
            output_nanos_per_unit: usd_per_million_to_nanos(output_usd),
        }
    }

    /// Cost of a usage in nanodollars
    pub fn cost_nanos(&self, input_units: u64, output_units: u64) -> u64 {
        input_units
            .saturating_mul(self.input_nanos_per_unit)
            .saturating_add(output_units.saturating_mul(self.output_nanos_per_unit))
    }
}

fn usd_per_million_to_nanos(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * 1000.0).round() as u64
    } else {
        0
    }
}

/// Convert nanodollars to USD
pub fn nanos_to_usd(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_USD as f64
}

/// Convert USD to nanodollars, rounding to the nearest nanodollar
pub fn usd_to_nanos(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * NANOS_PER_USD as f64).round() as u64
    } else {
        0
    }
}

/// Lookup of prices by resource identifier
pub trait Pricing: Send + Sync {
    /// Price for a resource, or None if the resource is unknown
    fn price(&self, resource_id: &str) -> Option<Price>;
}

/// HashMap-backed price table
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, Price>,
}

impl PriceTable {
    /// Create an empty table
    pub fn empty() -> Self {
        debug!("PriceTable::empty: called");
        Self::default()
    }

    /// Add or replace a resource price
    pub fn insert(&mut self, resource_id: impl Into<String>, price: Price) {
        let resource_id = resource_id.into();
        debug!(%resource_id, ?price, "PriceTable::insert: called");
        self.prices.insert(resource_id, price);
    }

    /// Builder-style insert
    pub fn with(mut self, resource_id: impl Into<String>, price: Price) -> Self {
        self.insert(resource_id, price);
        self
    }

    /// Build from configured entries, layered over the defaults
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a crate::config::PriceEntry>) -> Self {
        debug!("PriceTable::from_entries: called");
        let mut table = Self::default_models();
        for entry in entries {
            table.insert(
                entry.resource.clone(),
                Price::per_million(entry.input_per_million, entry.output_per_million),
            );
        }
        table
    }

    /// Table with the built-in model prices
    pub fn default_models() -> Self {
        debug!("PriceTable::default_models: called");
        Self::empty()
            .with("claude-haiku-4-5", Price::per_million(1.0, 5.0))
            .with("claude-sonnet-4-5", Price::per_million(3.0, 15.0))
            .with("claude-opus-4-5", Price::per_million(5.0, 25.0))
    }

    /// Sorted (resource, price) pairs for display
    pub fn entries(&self) -> Vec<(String, Price)> {
        let mut entries: Vec<_> = self.prices.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Pricing for PriceTable {
    fn price(&self, resource_id: &str) -> Option<Price> {
        let found = self.prices.get(resource_id).copied();
        debug!(%resource_id, found = found.is_some(), "PriceTable::price: called");
        found
    }
}
