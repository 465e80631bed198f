//! Reconciliation Service: the policy layer closing the gap
//! between the Catalog Store and each Provider Adapter's inventory.

mod diff;
mod service;

pub use diff::{diff_inventory, needs_refresh, MissingUnit};
pub use service::{DestinationRoots, ReconciliationService};
