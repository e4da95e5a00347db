//! Per-tenant PIM catalog synchronizer.
//!
//! Pulls categories, products and media from an upstream PIM and pushes them
//! as flat entities into a downstream ingestion service. Progress is tracked
//! in an append-only SQLite ledger; live workflow state is checkpointed per
//! page so an interrupted run resumes where it stopped.

pub mod config;
pub mod db;
pub mod ingest;
pub mod logsink;
pub mod mapping;
pub mod model;
pub mod pim;
pub mod sync;
