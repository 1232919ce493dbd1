//! Cost ledger
//!
//! Converts raw usage into monetary cost and accumulates totals globally,
//! per resource and per caller. The ledger is the only state shared between
//! loop instances; hand it around as `Arc<CostLedger>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::pricing::{PriceTable, Pricing, nanos_to_usd};

/// Running totals for one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub count: u64,
    #[serde(rename = "cost")]
    pub cost_usd: f64,
    #[serde(rename = "usage_units")]
    pub units: u64,
    #[serde(skip)]
    cost_nanos: u64,
}

/// Running totals for one caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerTotals {
    pub count: u64,
    #[serde(rename = "cost")]
    pub cost_usd: f64,
    #[serde(skip)]
    cost_nanos: u64,
}

/// Serializable point-in-time copy of the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_cost: f64,
    pub total_calls: u64,
    pub by_resource: BTreeMap<String, ResourceTotals>,
    pub by_caller: BTreeMap<String, CallerTotals>,
}

/// Thread-safe cost accumulator
pub struct CostLedger {
    pricing: Arc<dyn Pricing>,
    total_nanos: AtomicU64,
    total_calls: AtomicU64,
    by_resource: RwLock<HashMap<String, ResourceTotals>>,
    by_caller: RwLock<HashMap<String, CallerTotals>>,
}

impl std::fmt::Debug for CostLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostLedger")
            .field("total_nanos", &self.total_nanos.load(Ordering::Relaxed))
            .field("total_calls", &self.total_calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(Arc::new(PriceTable::default_models()))
    }
}

impl CostLedger {
    /// Create a ledger over the given prices
    pub fn new(pricing: Arc<dyn Pricing>) -> Self {
        debug!("CostLedger::new: called");
        Self {
            pricing,
            total_nanos: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            by_resource: RwLock::new(HashMap::new()),
            by_caller: RwLock::new(HashMap::new()),
        }
    }

    /// Record one external call and return its cost in USD
    ///
    /// Unknown resources cost nothing and are not recorded.
    pub fn record_usage(&self, resource_id: &str, input_units: u64, output_units: u64, caller_id: &str) -> f64 {
        debug!(%resource_id, input_units, output_units, %caller_id, "CostLedger::record_usage: called");
        let Some(price) = self.pricing.price(resource_id) else {
            warn!(%resource_id, %caller_id, "record_usage: unknown resource, cost recorded as 0");
            return 0.0;
        };

        let nanos = price.cost_nanos(input_units, output_units);
        let units = input_units.saturating_add(output_units);

        // saturate so the total never goes down
        let _ = self
            .total_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| Some(total.saturating_add(nanos)));
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_resource) = self.by_resource.write() {
            let totals = by_resource.entry(resource_id.to_string()).or_default();
            totals.count += 1;
            totals.units = totals.units.saturating_add(units);
            totals.cost_nanos = totals.cost_nanos.saturating_add(nanos);
            totals.cost_usd = nanos_to_usd(totals.cost_nanos);
        } else {
            warn!(%resource_id, "record_usage: resource totals lock poisoned");
        }

        if let Ok(mut by_caller) = self.by_caller.write() {
            let totals = by_caller.entry(caller_id.to_string()).or_default();
            totals.count += 1;
            totals.cost_nanos = totals.cost_nanos.saturating_add(nanos);
            totals.cost_usd = nanos_to_usd(totals.cost_nanos);
        } else {
            warn!(%caller_id, "record_usage: caller totals lock poisoned");
        }

        let cost = nanos_to_usd(nanos);
        debug!(%resource_id, cost, "record_usage: recorded");
        cost
    }

    /// Total cost in USD across all callers
    pub fn total_cost(&self) -> f64 {
        nanos_to_usd(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Total cost in nanodollars
    pub fn total_nanos(&self) -> u64 {
        self.total_nanos.load(Ordering::Relaxed)
    }

    /// Number of priced calls recorded
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Totals for a single resource
    pub fn resource_totals(&self, resource_id: &str) -> Option<ResourceTotals> {
        debug!(%resource_id, "CostLedger::resource_totals: called");
        self.by_resource.read().ok()?.get(resource_id).cloned()
    }

    /// Totals for a single caller
    pub fn caller_totals(&self, caller_id: &str) -> Option<CallerTotals> {
        debug!(%caller_id, "CostLedger::caller_totals: called");
        self.by_caller.read().ok()?.get(caller_id).cloned()
    }

    /// Point-in-time copy of all totals
    pub fn snapshot(&self) -> LedgerSnapshot {
        debug!("CostLedger::snapshot: called");
        let by_resource = self
            .by_resource
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let by_caller = self
            .by_caller
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        LedgerSnapshot {
            total_cost: self.total_cost(),
            total_calls: self.total_calls(),
            by_resource,
            by_caller,
        }
    }

    /// Export the snapshot as JSON
    pub fn export_json(&self) -> serde_json::Value {
        debug!("CostLedger::export_json: called");
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}
