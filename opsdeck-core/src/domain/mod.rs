//! Core domain types
//!
//! This module contains the core domain structures of OpsDeck.
//! Repo configs and pipeline records are persisted by the server; log events
//! and system metrics only live in memory or in the metrics store.

pub mod event;
pub mod metric;
pub mod pipeline;
pub mod repo_config;
