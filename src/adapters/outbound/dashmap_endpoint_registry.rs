//! DashMap Endpoint Registry
//!
//! Implements EndpointRepository using DashMap for concurrent access to
//! endpoints and a read-mostly lock for region ordering.

use crate::domain::entities::{Endpoint, Region, RegistryStats};
use crate::domain::ports::EndpointRepository;
use crate::domain::services::LoadBalancer;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::time::SystemTime;

/// In-memory endpoint registry.
///
/// Endpoints live in a DashMap keyed by id. Regions are kept in
/// configuration order because that order drives round-robin and
/// tie-breaking. Each region owns an atomic round-robin cursor.
pub struct DashMapEndpointRegistry {
    endpoints: DashMap<String, Endpoint>,
    regions: RwLock<Vec<Region>>,
    cursors: DashMap<String, AtomicUsize>,
}

impl DashMapEndpointRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            regions: RwLock::new(Vec::new()),
            cursors: DashMap::new(),
        }
    }

    /// Create a registry from an already validated topology.
    pub fn from_topology(regions: Vec<Region>, endpoints: Vec<Endpoint>) -> Self {
        let registry = Self::new();
        for region in regions {
            registry.add_region(region);
        }
        for endpoint in endpoints {
            registry.add(endpoint);
        }
        tracing::info!(
            "endpoint registry loaded: regions={} endpoints={}",
            registry.regions.read().len(),
            registry.endpoints.len()
        );
        registry
    }

    fn endpoint_ids(&self, region_id: &str) -> Vec<String> {
        self.regions
            .read()
            .iter()
            .find(|r| r.id == region_id)
            .map(|r| r.endpoint_ids.clone())
            .unwrap_or_default()
    }

    fn set_enabled(&self, endpoint_id: &str, enabled: bool) -> bool {
        match self.endpoints.get_mut(endpoint_id) {
            Some(mut endpoint) => {
                endpoint.enabled = enabled;
                tracing::info!(
                    "endpoint {} {}",
                    endpoint_id,
                    if enabled { "enabled" } else { "disabled" }
                );
                true
            }
            None => false,
        }
    }
}

impl Default for DashMapEndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRepository for DashMapEndpointRegistry {
    fn get(&self, endpoint_id: &str) -> Option<Endpoint> {
        self.endpoints.get(endpoint_id).map(|e| e.value().clone())
    }

    fn all(&self) -> Vec<Endpoint> {
        let order: Vec<String> = self
            .regions
            .read()
            .iter()
            .flat_map(|r| r.endpoint_ids.clone())
            .collect();
        order.iter().filter_map(|id| self.get(id)).collect()
    }

    fn region(&self, region_id: &str) -> Option<Region> {
        self.regions
            .read()
            .iter()
            .find(|r| r.id == region_id)
            .cloned()
    }

    fn regions(&self) -> Vec<Region> {
        self.regions.read().clone()
    }

    fn available_regions(&self) -> Vec<String> {
        self.regions
            .read()
            .iter()
            .filter(|region| {
                region.endpoint_ids.iter().any(|id| {
                    self.endpoints
                        .get(id)
                        .map(|e| e.enabled)
                        .unwrap_or(false)
                })
            })
            .map(|region| region.id.clone())
            .collect()
    }

    fn healthy_endpoints(&self, region_id: &str) -> Vec<Endpoint> {
        self.endpoint_ids(region_id)
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|e| e.is_healthy())
            .collect()
    }

    fn next_endpoint(&self, region_id: &str) -> Option<Endpoint> {
        let region = self.region(region_id)?;
        let candidates = self.healthy_endpoints(region_id);
        if candidates.is_empty() {
            tracing::debug!("no healthy endpoint in region {}", region_id);
            return None;
        }

        let cursor = self.cursors.entry(region.id.clone()).or_default();
        let picked = LoadBalancer::pick_endpoint(region.strategy, &candidates, &cursor);

        if let Some(endpoint) = &picked {
            tracing::debug!(
                "region {} -> endpoint {} (strategy {:?})",
                region_id,
                endpoint.id,
                region.strategy
            );
        }
        picked
    }

    fn update_health(&self, endpoint_id: &str, healthy: bool, latency_ms: Option<u64>) {
        let Some(mut endpoint) = self.endpoints.get_mut(endpoint_id) else {
            return;
        };

        let was_healthy = endpoint.health != Some(false);
        endpoint.health = Some(healthy);
        endpoint.last_health_check = Some(SystemTime::now());
        if latency_ms.is_some() {
            endpoint.latency_ms = latency_ms;
        }

        if was_healthy && !healthy {
            tracing::warn!("endpoint {} is now unhealthy", endpoint_id);
        } else if !was_healthy && healthy {
            tracing::info!("endpoint {} is now healthy", endpoint_id);
        }
    }

    fn add(&self, endpoint: Endpoint) {
        let endpoint_id = endpoint.id.clone();
        let region_id = endpoint.region.clone();
        let previous = self.endpoints.insert(endpoint_id.clone(), endpoint);

        let mut regions = self.regions.write();

        // Moving an endpoint between regions keeps it in exactly one list
        if let Some(previous) = previous.filter(|p| p.region != region_id) {
            if let Some(old) = regions.iter_mut().find(|r| r.id == previous.region) {
                old.endpoint_ids.retain(|id| id != &endpoint_id);
            }
        }

        let region = match regions.iter().position(|r| r.id == region_id) {
            Some(index) => &mut regions[index],
            None => {
                regions.push(Region::new(region_id.clone()));
                let last = regions.len() - 1;
                &mut regions[last]
            }
        };
        if !region.endpoint_ids.contains(&endpoint_id) {
            region.endpoint_ids.push(endpoint_id);
        }
    }

    fn add_region(&self, region: Region) {
        let mut regions = self.regions.write();
        match regions.iter_mut().find(|r| r.id == region.id) {
            Some(existing) => *existing = region,
            None => regions.push(region),
        }
    }

    fn remove(&self, endpoint_id: &str) -> bool {
        let Some((_, endpoint)) = self.endpoints.remove(endpoint_id) else {
            return false;
        };

        if let Some(region) = self
            .regions
            .write()
            .iter_mut()
            .find(|r| r.id == endpoint.region)
        {
            region.endpoint_ids.retain(|id| id != endpoint_id);
        }
        tracing::info!("endpoint {} removed from region {}", endpoint_id, endpoint.region);
        true
    }

    fn enable(&self, endpoint_id: &str) -> bool {
        self.set_enabled(endpoint_id, true)
    }

    fn disable(&self, endpoint_id: &str) -> bool {
        self.set_enabled(endpoint_id, false)
    }

    fn endpoint_counts(&self, region_id: &str) -> (usize, usize) {
        let endpoints: Vec<Endpoint> = self
            .endpoint_ids(region_id)
            .iter()
            .filter_map(|id| self.get(id))
            .collect();
        let healthy = endpoints.iter().filter(|e| e.is_healthy()).count();
        (healthy, endpoints.len())
    }

    fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        let mut per_region: HashMap<String, usize> = HashMap::new();

        for entry in self.endpoints.iter() {
            let endpoint = entry.value();
            stats.total += 1;
            if endpoint.enabled {
                stats.enabled += 1;
            }
            if endpoint.is_healthy() {
                stats.healthy += 1;
            }
            *per_region.entry(endpoint.region.clone()).or_default() += 1;
        }

        stats.per_region = per_region;
        stats
    }
}
