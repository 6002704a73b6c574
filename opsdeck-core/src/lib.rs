//! OpsDeck Core
//!
//! Core types and abstractions for the OpsDeck deployment system.
//!
//! This crate contains:
//! - Domain types: Core business entities (RepoConfig, PipelineRecord, etc.)
//! - DTOs: Request and response payloads exchanged with the HTTP layer

pub mod domain;
pub mod dto;
