//! Bulk ERC20 distribution library surface.
//!
//! Recipient lists are loaded by [`ledger`], split by [`partition`], funded through
//! [`guard`] and sent batch by batch by [`driver`], with [`sampling`] spot-checking
//! each confirmed batch. [`reconcile`] is the exhaustive offline pass over balance
//! snapshots captured with [`snapshot`].

pub mod chain;
pub mod driver;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod partition;
pub mod reconcile;
pub mod report;
pub mod sampling;
pub mod snapshot;
pub mod utils;

#[doc(hidden)]
pub mod runtime;
