//! Service Module
//!
//! Business logic layer of the deployment server.
//! The deploy service validates triggers and hands runs to the engine; the
//! engine streams script output through the log hub.

pub mod deploy;
pub mod engine;
pub mod hub;
pub mod metrics;

// Re-export for convenience
pub use deploy::{DeployError, DeployService};
pub use engine::PipelineExecutor;
pub use hub::{LogHub, Subscription};
pub use metrics::MetricsService;
