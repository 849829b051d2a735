// src/lib.rs

//! Adaptive community-post ingestion pipeline.
//!
//! Harvests posts from community sources through a rate-limited API
//! client, folds out duplicate content, and persists versioned items
//! behind watermark cursors. Sources are ranked into quality tiers that
//! drive how often and how aggressively each one is crawled, and the
//! overall sweep cadence adapts to cache efficiency.

pub mod cache;
pub mod client;
pub mod dedup;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod store;

pub use error::{AppError, Result};
