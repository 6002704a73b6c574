//! Data Transfer Objects
//!
//! Payloads exchanged between the HTTP layer and the services. DTOs are
//! lightweight representations of domain entities optimized for transfer.

pub mod config;
pub mod pipeline;
pub mod trigger;
