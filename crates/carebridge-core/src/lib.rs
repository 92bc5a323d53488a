//! Core types and trait definitions for the carebridge warehouse pipeline.
//!
//! This crate is deliberately free of database and file-format dependencies.
//! The store backend, the CDI codec and the ETL pipeline all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod bridge;
pub mod dimension;
pub mod entity;
pub mod error;
pub mod geo;
pub mod natural_key;
pub mod observation;
pub mod run;
pub mod staging;
pub mod store;

pub use error::{Error, Result};
