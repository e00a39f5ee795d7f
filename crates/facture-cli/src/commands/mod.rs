//! CLI command implementations.

pub mod backfill;
pub mod config;
pub mod ingest;
pub mod templates;
