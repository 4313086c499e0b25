//! egress-proxy Library
//!
//! Outbound request routing through regional proxy endpoints. Exposed as
//! a library for the binary and the integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{RegionSelector, RequestExecutor, RequestOptions, ResponseBody, RoutedResponse};
pub use config::{load_config, load_topology, Config, Topology, TopologyError};
pub use domain::entities::{Endpoint, Region, RegionStats};
pub use domain::errors::{RouteError, TransportError};
pub use domain::ports::{EndpointRepository, Transport};
pub use domain::services::LoadBalancer;
pub use domain::value_objects::{EndpointStrategy, RegionStrategy, TransportMode};
