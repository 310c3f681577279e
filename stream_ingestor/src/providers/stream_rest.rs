//! REST client for the market-data service.

pub mod params;
pub mod provider;
pub mod response;
