//! Client side of the market price sync: authenticated retrying access to the
//! market-data service, the per-market product catalog, and date-range
//! chunking.

pub mod auth;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod models;
pub mod providers;

pub use catalog::{ProductCatalog, ProductSelection};
pub use config::StreamConfig;
pub use providers::{FetchError, SeriesSource};
