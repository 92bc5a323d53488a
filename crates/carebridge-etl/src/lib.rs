//! The carebridge load pipeline.
//!
//! Generic over any [`WarehouseStore`]:
//!
//! - [`resolver::DimensionResolver`] finds or creates dimension rows.
//! - [`loader::FactLoader`] turns staging rows into observations.
//! - [`bridge::BridgeBuilder`] links customers and accounts to states.
//! - [`view::UnifiedView`] joins the two domains at the state code.
//! - [`pipeline::run_batch`] runs one audited batch end to end.
//!
//! [`WarehouseStore`]: carebridge_core::store::WarehouseStore

pub mod bridge;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod resolver;
pub mod view;

pub use error::{Error, Result};
pub use pipeline::{BatchOptions, BatchOutcome, run_batch};

#[cfg(test)]
mod tests;
