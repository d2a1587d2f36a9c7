//! CSV point ingestion, grouping and concave-hull polygon generation.

pub mod config;
pub mod coords;
pub mod detect;
pub mod export;
pub mod hull;
pub mod ingest;
pub mod server;
pub mod types;
pub mod worker;
