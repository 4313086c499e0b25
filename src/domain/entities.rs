//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the egress routing domain.
//! They have no external dependencies and contain only business logic.

use crate::domain::value_objects::{EndpointStrategy, ProxyProtocol, TransportMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Smoothing weight given to a new latency sample.
pub const LATENCY_EMA_WEIGHT: f64 = 0.3;

/// Credentials presented to a proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A proxy endpoint outbound requests can be routed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier for this endpoint
    pub id: String,
    /// Display name
    pub name: String,
    /// Region this endpoint belongs to
    pub region: String,
    /// Country code (ISO 3166-1 alpha-2)
    pub country: String,
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub enabled: bool,
    /// Lower value = more preferred
    pub priority: u32,
    /// Last measured latency in milliseconds
    pub latency_ms: Option<u64>,
    pub last_health_check: Option<SystemTime>,
    /// `None` until the first probe or attempt
    pub health: Option<bool>,
    pub transport: TransportMode,
}

impl Endpoint {
    /// Whether this endpoint may receive traffic.
    ///
    /// Endpoints that were never probed are treated as healthy.
    pub fn is_healthy(&self) -> bool {
        self.enabled && self.health != Some(false)
    }

    /// `host:port` of the proxy.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A named group of endpoints sharing a geography and a selection strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    /// Ordered endpoint ids; order breaks selection ties
    pub endpoint_ids: Vec<String>,
    pub strategy: EndpointStrategy,
    pub max_retries: u32,
    pub health_check_interval: Duration,
}

impl Region {
    /// Region with default settings and no endpoints.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            endpoint_ids: Vec::new(),
            strategy: EndpointStrategy::default(),
            max_retries: 3,
            health_check_interval: Duration::from_secs(300),
        }
    }
}

/// Rolling statistics for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub region: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Exponentially smoothed latency in milliseconds
    pub average_latency_ms: f64,
    pub latency_samples: u64,
    pub last_used: Option<SystemTime>,
    pub healthy_endpoints: usize,
    pub total_endpoints: usize,
}

impl RegionStats {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_latency_ms: 0.0,
            latency_samples: 0,
            last_used: None,
            healthy_endpoints: 0,
            total_endpoints: 0,
        }
    }

    /// Fraction of successful requests; 1.0 before any request completed.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Fraction of healthy endpoints; 0.0 for an empty region.
    pub fn availability_ratio(&self) -> f64 {
        if self.total_endpoints == 0 {
            0.0
        } else {
            self.healthy_endpoints as f64 / self.total_endpoints as f64
        }
    }

    /// Record one completed request.
    pub fn record(&mut self, success: bool, latency_ms: Option<u64>) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        if let Some(latency) = latency_ms {
            self.average_latency_ms = if self.latency_samples == 0 {
                latency as f64
            } else {
                LATENCY_EMA_WEIGHT * latency as f64
                    + (1.0 - LATENCY_EMA_WEIGHT) * self.average_latency_ms
            };
            self.latency_samples += 1;
        }

        self.last_used = Some(SystemTime::now());
    }
}

/// One entry of the bounded request history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHistoryEntry {
    pub region: String,
    pub timestamp: SystemTime,
    pub success: bool,
    pub latency_ms: Option<u64>,
}

/// Inventory counters exposed for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub healthy: usize,
    /// Endpoint count per region
    pub per_region: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_endpoint(enabled: bool, health: Option<bool>) -> Endpoint {
        Endpoint {
            id: "us-1".to_string(),
            name: "US 1".to_string(),
            region: "us-east".to_string(),
            country: "US".to_string(),
            protocol: ProxyProtocol::Http,
            host: "10.0.0.1".to_string(),
            port: 3128,
            credentials: None,
            enabled,
            priority: 1,
            latency_ms: None,
            last_health_check: None,
            health,
            transport: TransportMode::Tunneled,
        }
    }

    // ===== Endpoint Tests =====

    #[test]
    fn test_endpoint_unprobed_is_healthy() {
        assert!(create_endpoint(true, None).is_healthy());
    }

    #[test]
    fn test_endpoint_explicitly_unhealthy() {
        assert!(!create_endpoint(true, Some(false)).is_healthy());
    }

    #[test]
    fn test_endpoint_disabled_is_never_healthy() {
        assert!(!create_endpoint(false, None).is_healthy());
        assert!(!create_endpoint(false, Some(true)).is_healthy());
    }

    #[test]
    fn test_endpoint_address() {
        assert_eq!(create_endpoint(true, None).address(), "10.0.0.1:3128");
    }

    // ===== Region Tests =====

    #[test]
    fn test_region_new_defaults() {
        let region = Region::new("eu-west");
        assert_eq!(region.name, "eu-west");
        assert!(region.endpoint_ids.is_empty());
        assert_eq!(region.strategy, EndpointStrategy::Priority);
        assert_eq!(region.max_retries, 3);
    }

    // ===== RegionStats Tests =====

    #[test]
    fn test_stats_first_sample_sets_average() {
        let mut stats = RegionStats::new("us-east");
        stats.record(true, Some(250));
        assert_eq!(stats.average_latency_ms, 250.0);
    }

    #[test]
    fn test_stats_ema_update() {
        let mut stats = RegionStats::new("us-east");
        stats.record(true, Some(100));
        stats.record(true, Some(200));
        // 0.3 * 200 + 0.7 * 100
        assert!((stats.average_latency_ms - 130.0).abs() < 1e-9);

        stats.record(false, Some(400));
        // 0.3 * 400 + 0.7 * 130
        assert!((stats.average_latency_ms - 211.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_sample_without_latency_keeps_average() {
        let mut stats = RegionStats::new("us-east");
        stats.record(true, Some(100));
        stats.record(false, None);
        assert_eq!(stats.average_latency_ms, 100.0);
        assert_eq!(stats.latency_samples, 1);
    }

    #[test]
    fn test_stats_counters() {
        let mut stats = RegionStats::new("us-east");
        stats.record(true, None);
        stats.record(false, None);
        stats.record(true, None);

        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert!(stats.last_used.is_some());
    }

    #[test]
    fn test_stats_success_rate() {
        let mut stats = RegionStats::new("us-east");
        assert_eq!(stats.success_rate(), 1.0);

        stats.total_requests = 10;
        stats.successful_requests = 8;
        assert!((stats.success_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_availability_ratio() {
        let mut stats = RegionStats::new("us-east");
        assert_eq!(stats.availability_ratio(), 0.0);

        stats.total_endpoints = 4;
        stats.healthy_endpoints = 1;
        assert_eq!(stats.availability_ratio(), 0.25);
    }
}
