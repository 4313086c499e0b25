//! Endpoint Repository Port
//!
//! Defines the interface for the endpoint inventory and the
//! endpoint-level selection inside one region.

use crate::domain::entities::{Endpoint, Region, RegistryStats};

/// Source of truth for endpoint and region configuration.
///
/// All lookups are total: absent values are reported with `None`/`false`
/// rather than errors. Implementations must be safe to share between
/// concurrently running requests.
pub trait EndpointRepository: Send + Sync {
    /// Get a specific endpoint by ID.
    fn get(&self, endpoint_id: &str) -> Option<Endpoint>;

    /// Get every configured endpoint (including disabled ones).
    fn all(&self) -> Vec<Endpoint>;

    /// Get a region by ID.
    fn region(&self, region_id: &str) -> Option<Region>;

    /// Get all regions in configuration order.
    fn regions(&self) -> Vec<Region>;

    /// Regions having at least one enabled endpoint, in configuration order.
    fn available_regions(&self) -> Vec<String>;

    /// Enabled endpoints of a region whose health is not explicitly false.
    fn healthy_endpoints(&self, region_id: &str) -> Vec<Endpoint>;

    /// Pick the next endpoint of a region using the region's strategy.
    fn next_endpoint(&self, region_id: &str) -> Option<Endpoint>;

    /// Record a health observation. Unknown endpoints are ignored.
    fn update_health(&self, endpoint_id: &str, healthy: bool, latency_ms: Option<u64>);

    /// Insert or replace an endpoint, creating its region when unknown.
    fn add(&self, endpoint: Endpoint);

    /// Insert or replace a region definition.
    fn add_region(&self, region: Region);

    /// Remove an endpoint. Returns false if it did not exist.
    fn remove(&self, endpoint_id: &str) -> bool;

    /// Enable an endpoint. Returns false if it does not exist.
    fn enable(&self, endpoint_id: &str) -> bool;

    /// Disable an endpoint. Returns false if it does not exist.
    fn disable(&self, endpoint_id: &str) -> bool;

    /// `(healthy, total)` endpoint counts of a region.
    fn endpoint_counts(&self, region_id: &str) -> (usize, usize);

    /// Inventory counters for observability.
    fn stats(&self) -> RegistryStats;
}
