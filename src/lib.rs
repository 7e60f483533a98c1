//! eBird hotspot species ranking service
//!
//! Jobs submitted over HTTP are queued in memory and drained by a fixed
//! worker pool. Workers share one authenticated eBird session, fetch
//! barchart data through a rate-limited retrying client, rank species by
//! sample-size weighted frequency over a month/week window, and cache the
//! results for a few minutes.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
