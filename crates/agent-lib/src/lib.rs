//! Node library for the DRC-IO bandwidth controller
//!
//! This crate provides the core functionality for:
//! - Pod discovery and priority classification
//! - cgroup-v2 path resolution and `io.max` limit management
//! - Contention estimation with hysteresis
//! - The control loop tying the above together
//! - Health checks and observability

pub mod cgroup;
pub mod contention;
pub mod controller;
pub mod discovery;
pub mod health;
pub mod models;
pub mod observability;
pub mod state;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use state::StateHandle;
