//! Local event discovery backend for the Toronto open-data feed.
//!
//! The pipeline runs feed -> normalize -> window/dedup -> corpus cache, and
//! searches run reconcile -> filter -> rank over a cached corpus snapshot.

pub mod cache;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod feed;
pub mod filter;
pub mod geo;
pub mod llm;
pub mod logging;
pub mod normalize;
pub mod observability;
pub mod rank;
pub mod rate_limit;
pub mod reconcile;
pub mod server;
pub mod window;
