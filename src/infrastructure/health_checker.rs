//! Active Health Checker
//!
//! Probes endpoints with a lightweight HTTP GET through the endpoint and
//! caches the outcome per endpoint for a short TTL.

use crate::application::RequestExecutor;
use crate::domain::entities::Endpoint;
use crate::domain::ports::{OutboundRequest, Transport};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Echo target requested through the endpoint
    pub target_url: String,
    /// Timeout for each probe
    pub timeout: Duration,
    /// How long a probe result is reused
    pub cache_ttl: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            target_url: "https://httpbin.org/ip".to_string(),
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Last probe outcome for an endpoint.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Instant,
    pub latency_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Probe runner and per-endpoint result cache.
pub struct HealthChecker {
    config: HealthCheckConfig,
    /// Health status per endpoint ID
    status: Arc<RwLock<HashMap<String, HealthStatus>>>,
    /// One probe at a time per endpoint
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            status: Arc::new(RwLock::new(HashMap::new())),
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Cached result if it is younger than the cache TTL.
    pub async fn cached(&self, endpoint_id: &str) -> Option<bool> {
        self.status
            .read()
            .await
            .get(endpoint_id)
            .filter(|s| s.last_check.elapsed() < self.config.cache_ttl)
            .map(|s| s.healthy)
    }

    /// Get the last probe status for an endpoint.
    pub async fn get_status(&self, endpoint_id: &str) -> Option<HealthStatus> {
        self.status.read().await.get(endpoint_id).cloned()
    }

    /// Get all probe statuses.
    pub async fn all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.status.read().await.clone()
    }

    /// Lock serializing probes of one endpoint.
    ///
    /// Holders must re-check `cached` after acquiring it.
    pub fn check_lock(&self, endpoint_id: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(endpoint_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the cached result of an endpoint.
    pub async fn invalidate(&self, endpoint_id: &str) {
        self.status.write().await.remove(endpoint_id);
    }

    /// Store a probe result.
    pub async fn record(&self, endpoint_id: &str, result: &HealthCheckResult) {
        let status = match result {
            HealthCheckResult::Success { latency_ms } => HealthStatus {
                healthy: true,
                last_check: Instant::now(),
                latency_ms: Some(*latency_ms),
                last_error: None,
            },
            HealthCheckResult::Failure { error, latency_ms } => HealthStatus {
                healthy: false,
                last_check: Instant::now(),
                latency_ms: Some(*latency_ms),
                last_error: Some(error.clone()),
            },
        };
        self.status
            .write()
            .await
            .insert(endpoint_id.to_string(), status);
    }

    /// Perform a single probe through an endpoint.
    ///
    /// Any non-2xx answer from the echo target counts as a failure.
    pub async fn probe(&self, transport: &dyn Transport, endpoint: &Endpoint) -> HealthCheckResult {
        let mut request = OutboundRequest::get(&self.config.target_url);
        request.timeout = Some(self.config.timeout);

        let start = Instant::now();
        let result = transport.send(endpoint, &request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(resp) if resp.is_success() => HealthCheckResult::Success { latency_ms },
            Ok(resp) => HealthCheckResult::Failure {
                error: format!("unhealthy status: {}", resp.status),
                latency_ms,
            },
            Err(e) => HealthCheckResult::Failure {
                error: e.to_string(),
                latency_ms,
            },
        }
    }

    /// Start the periodic probe loop.
    ///
    /// The interval is the shortest health-check interval among the
    /// configured regions.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(executor: Arc<RequestExecutor>) {
        tokio::spawn(async move {
            let interval = executor
                .registry()
                .regions()
                .iter()
                .map(|r| r.health_check_interval)
                .min()
                .unwrap_or(Duration::from_secs(300))
                .max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(interval);
            tracing::info!("periodic health checks every {:?}", interval);

            loop {
                ticker.tick().await;

                let results = executor.health_check_all().await;
                let healthy = results.values().filter(|h| **h).count();
                tracing::info!(
                    "health check round: {}/{} endpoints healthy",
                    healthy,
                    results.len()
                );
            }
        });
    }
}

/// Result of a health check.
#[derive(Debug, Clone)]
pub enum HealthCheckResult {
    Success { latency_ms: u64 },
    Failure { error: String, latency_ms: u64 },
}

impl HealthCheckResult {
    pub fn is_success(&self) -> bool {
        matches!(self, HealthCheckResult::Success { .. })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::errors::TransportError;
    use crate::domain::ports::TransportResponse;
    use crate::domain::value_objects::{ProxyProtocol, TransportMode};
    use async_trait::async_trait;

    struct FixedTransport {
        status: Option<u16>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            _endpoint: &Endpoint,
            request: &OutboundRequest,
        ) -> Result<TransportResponse, TransportError> {
            assert_eq!(request.timeout, Some(Duration::from_secs(10)));
            match self.status {
                Some(status) => Ok(TransportResponse {
                    status,
                    status_text: String::new(),
                    headers: HashMap::new(),
                    body: Vec::new(),
                }),
                None => Err(TransportError::Connect("refused".to_string())),
            }
        }
    }

    fn create_test_endpoint() -> Endpoint {
        Endpoint {
            id: "eu-1".to_string(),
            name: "eu-1".to_string(),
            region: "eu-west".to_string(),
            country: "DE".to_string(),
            protocol: ProxyProtocol::Http,
            host: "127.0.0.1".to_string(),
            port: 3128,
            credentials: None,
            enabled: true,
            priority: 1,
            latency_ms: None,
            last_health_check: None,
            health: None,
            transport: TransportMode::Tunneled,
        }
    }

    #[test]
    fn test_health_check_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_health_check_result_is_success() {
        let success = HealthCheckResult::Success { latency_ms: 10 };
        assert!(success.is_success());

        let failure = HealthCheckResult::Failure {
            error: "test".to_string(),
            latency_ms: 10,
        };
        assert!(!failure.is_success());
    }

    #[tokio::test]
    async fn test_probe_success() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        let transport = FixedTransport { status: Some(200) };

        let result = checker.probe(&transport, &create_test_endpoint()).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_probe_non_2xx_is_failure() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        let transport = FixedTransport { status: Some(502) };

        match checker.probe(&transport, &create_test_endpoint()).await {
            HealthCheckResult::Failure { error, .. } => assert!(error.contains("502")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_transport_error_is_failure() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        let transport = FixedTransport { status: None };

        let result = checker.probe(&transport, &create_test_endpoint()).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_cached_empty() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        assert!(checker.cached("unknown").await.is_none());
        assert!(checker.get_status("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_record_and_cached() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        checker
            .record(
                "eu-1",
                &HealthCheckResult::Failure {
                    error: "conn refused".to_string(),
                    latency_ms: 5,
                },
            )
            .await;

        assert_eq!(checker.cached("eu-1").await, Some(false));
        let status = checker.get_status("eu-1").await.unwrap();
        assert_eq!(status.last_error, Some("conn refused".to_string()));
        assert_eq!(checker.all_statuses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let checker = HealthChecker::new(HealthCheckConfig {
            cache_ttl: Duration::from_millis(20),
            ..Default::default()
        });
        checker
            .record("eu-1", &HealthCheckResult::Success { latency_ms: 3 })
            .await;
        assert_eq!(checker.cached("eu-1").await, Some(true));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(checker.cached("eu-1").await.is_none());
        // the status itself is kept for diagnostics
        assert!(checker.get_status("eu-1").await.is_some());
    }

    #[tokio::test]
    async fn test_check_lock_is_per_endpoint() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        let first = checker.check_lock("eu-1");
        let _guard = first.lock().await;

        assert!(checker.check_lock("eu-1").try_lock().is_err());
        assert!(checker.check_lock("eu-2").try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let checker = HealthChecker::new(HealthCheckConfig::default());
        checker
            .record("eu-1", &HealthCheckResult::Success { latency_ms: 3 })
            .await;
        checker.invalidate("eu-1").await;
        assert!(checker.cached("eu-1").await.is_none());
    }
}
