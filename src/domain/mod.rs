//! Domain Layer
//!
//! Entities, value objects, ports and pure services of the routing domain.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{Credentials, Endpoint, Region, RegionStats, RegistryStats, RequestHistoryEntry};
pub use errors::{RouteError, TransportError};
pub use value_objects::{
    EndpointStrategy, GeoBucket, ProxyProtocol, RegionSelection, RegionStrategy, TransportMode,
};
