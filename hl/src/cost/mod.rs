//! Cost accounting for external calls
//!
//! - [`PriceTable`] - resource prices, integer nanodollars per unit
//! - [`CostLedger`] - concurrent accumulator shared by all loop instances

mod ledger;
mod pricing;

pub use ledger::{CallerTotals, CostLedger, LedgerSnapshot, ResourceTotals};
pub use pricing::{NANOS_PER_USD, Price, PriceTable, Pricing, nanos_to_usd, usd_to_nanos};
