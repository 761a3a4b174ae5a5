// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod narrative;
pub mod normalize;
pub mod orchestrator;
pub mod query;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{ApiError, FetchError, RefreshError, StoreError};
pub use crate::orchestrator::{Orchestrator, TickReport};
pub use crate::service::AttentionService;
