//! Core utilities and types shared across all Crier crates

pub mod access;
pub mod error;
pub mod error_builder;
pub mod jobs;
pub mod openapi;
pub mod pagination;
pub mod plugin;
pub mod problemdetails;
pub use problemdetails::ProblemDetails;
pub mod types;

// Re-export commonly used types
pub use access::{CallerContext, Capability, Role};
pub use error::*;
pub use error_builder::*;
pub use jobs::*;
pub use pagination::PaginationParams;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;

// Re-export standard datetime types for use across all crates
pub use types::{DateTime, UtcDateTime};
