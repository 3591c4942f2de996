//! postharvest - resumable social media post acquisition.
//!
//! Drives long-running scrapes against rate-limited, credential-fragile
//! backends and checkpoints enough state to resume exactly where a run left
//! off after a crash, a network outage, an expired credential or a stop.

pub mod analytics;
pub mod cli;
pub mod config;
pub mod fetchers;
pub mod models;
pub mod policy;
pub mod rate_limiter;
pub mod session;
pub mod sink;
pub mod store;
