//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod health_checker;

pub use health_checker::{HealthCheckConfig, HealthCheckResult, HealthChecker, HealthStatus};
