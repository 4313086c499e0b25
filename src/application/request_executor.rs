//! Request Executor
//!
//! Runs outbound requests through regional endpoints with bounded
//! retry, exponential backoff and health feedback into the registry and
//! the region selector.

use crate::application::region_selector::RegionSelector;
use crate::domain::entities::{Endpoint, RegionStats};
use crate::domain::errors::{RouteError, TransportError};
use crate::domain::ports::{EndpointRepository, OutboundRequest, Transport, TransportResponse};
use crate::domain::value_objects::{RegionSelection, RegionStrategy, TransportMode};
use crate::infrastructure::health_checker::{HealthCheckResult, HealthChecker, HealthStatus};
use futures::future::join_all;
use rand::seq::SliceRandom;
use reqwest::Method;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Attempts per request when neither the caller nor the region says otherwise
    pub default_max_retries: u32,
    /// Backoff before retry `n` is `backoff_base × 2^n`
    pub backoff_base: Duration,
    /// Echo service answering with the caller's public IP
    pub ip_echo_url: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff_base: Duration::from_secs(1),
            ip_echo_url: "https://api.ipify.org?format=json".to_string(),
        }
    }
}

/// Options of one routed request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Route through exactly this endpoint, no retries
    pub endpoint_id: Option<String>,
    /// Target region; a random available region when unset
    pub region: Option<String>,
    pub max_retries: Option<u32>,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            endpoint_id: None,
            region: None,
            max_retries: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST with a JSON body and matching content type.
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut options = Self::new(Method::POST, url);
        options.body = Some(body.to_string().into_bytes());
        options.header("content-type", "application/json")
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    fn to_outbound(&self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
        }
    }
}

/// Response body, parsed when the server declared JSON.
///
/// Non-JSON bodies are carried as text: bytes that are not valid UTF-8
/// are replaced with U+FFFD.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Structured(serde_json::Value),
    Raw(String),
}

impl ResponseBody {
    /// Parse `bytes` as JSON if `content_type` is a JSON media type.
    ///
    /// Invalid JSON is kept as raw text.
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if content_type.is_some_and(is_json_media_type) {
            if let Ok(value) = serde_json::from_slice(bytes) {
                return ResponseBody::Structured(value);
            }
        }
        ResponseBody::Raw(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Structured(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Structured(_) => None,
            ResponseBody::Raw(text) => Some(text),
        }
    }
}

fn is_json_media_type(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

/// Response of a routed request, whatever its HTTP status.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
    pub endpoint_used: String,
    pub region: String,
    pub elapsed_ms: u64,
}

impl RoutedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Public IP seen by the target when routed through a region.
#[derive(Debug, Clone, Serialize)]
pub struct ExternalIp {
    pub ip: String,
    pub region: String,
    pub endpoint: String,
    pub elapsed_ms: u64,
}

/// Outcome of a connectivity test.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub success: bool,
    /// True when the request left through a proxy tunnel
    pub vpn_used: bool,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Outbound request executor.
pub struct RequestExecutor {
    registry: Arc<dyn EndpointRepository>,
    selector: Arc<RegionSelector>,
    transport: Arc<dyn Transport>,
    health: HealthChecker,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(
        registry: Arc<dyn EndpointRepository>,
        selector: Arc<RegionSelector>,
        transport: Arc<dyn Transport>,
        health: HealthChecker,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            transport,
            health,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn EndpointRepository> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<RegionSelector> {
        &self.selector
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Execute a request.
    ///
    /// A pinned endpoint gets exactly one attempt. Otherwise attempts are
    /// made in the target region until one completes or the retry budget
    /// is spent, sleeping `backoff_delay(n)` after failed attempt `n`.
    pub async fn request(&self, options: RequestOptions) -> Result<RoutedResponse, RouteError> {
        if let Some(endpoint_id) = &options.endpoint_id {
            let endpoint = self.registry.get(endpoint_id).ok_or_else(|| {
                RouteError::Configuration(format!("endpoint {} is not configured", endpoint_id))
            })?;
            if !endpoint.enabled {
                return Err(RouteError::Configuration(format!(
                    "endpoint {} is disabled",
                    endpoint_id
                )));
            }
            return Ok(self.attempt(&endpoint, &options).await?);
        }

        let region = match &options.region {
            Some(region) => region.clone(),
            None => self.random_region().ok_or(RouteError::NoRegionAvailable)?,
        };
        let max_attempts = options
            .max_retries
            .or_else(|| self.registry.region(&region).map(|r| r.max_retries))
            .unwrap_or(self.config.default_max_retries)
            .max(1);

        let mut attempt = 1;
        let mut previous: Option<Endpoint> = None;
        loop {
            // A failed endpoint drops out of the healthy set; when it was the
            // last one the retry goes through it again.
            let endpoint = match self.registry.next_endpoint(&region) {
                Some(endpoint) => endpoint,
                None => match previous.take().and_then(|p| self.registry.get(&p.id)) {
                    Some(endpoint) if endpoint.enabled => endpoint,
                    _ => return Err(RouteError::NoHealthyEndpoint { region }),
                },
            };

            match self.attempt(&endpoint, &options).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        "request to {} failed after {} attempts in region {}: {}",
                        options.url,
                        attempt,
                        region,
                        e
                    );
                    return Err(RouteError::ExhaustedRetries {
                        region,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "attempt {}/{} via {} failed: {}, retrying in {:?}",
                        attempt,
                        max_attempts,
                        endpoint.id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    previous = Some(endpoint);
                }
            }
        }
    }

    /// Delay after failed attempt `attempt`: `base × 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// One attempt through `endpoint`, feeding the outcome back.
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> Result<RoutedResponse, TransportError> {
        let start = Instant::now();
        let result = self.transport.send(endpoint, &options.to_outbound()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                self.registry
                    .update_health(&endpoint.id, true, Some(elapsed_ms));
                self.selector
                    .update_stats(&endpoint.region, true, Some(elapsed_ms));
                tracing::debug!(
                    "{} {} via {} -> {} in {}ms",
                    options.method,
                    options.url,
                    endpoint.id,
                    response.status,
                    elapsed_ms
                );
                Ok(Self::routed(response, endpoint, elapsed_ms))
            }
            Err(e) => {
                self.registry.update_health(&endpoint.id, false, None);
                self.selector
                    .update_stats(&endpoint.region, false, Some(elapsed_ms));
                Err(e)
            }
        }
    }

    fn routed(response: TransportResponse, endpoint: &Endpoint, elapsed_ms: u64) -> RoutedResponse {
        let body = ResponseBody::parse(response.content_type(), &response.body);
        RoutedResponse {
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body,
            endpoint_used: endpoint.id.clone(),
            region: endpoint.region.clone(),
            elapsed_ms,
        }
    }

    fn random_region(&self) -> Option<String> {
        self.registry
            .available_regions()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Probe one endpoint. Never fails; unknown endpoints are unhealthy.
    ///
    /// Results are reused for the checker's cache TTL; concurrent callers
    /// for the same endpoint wait for the one probe in flight.
    pub async fn health_check(&self, endpoint_id: &str) -> bool {
        if let Some(healthy) = self.health.cached(endpoint_id).await {
            return healthy;
        }
        let Some(endpoint) = self.registry.get(endpoint_id) else {
            return false;
        };

        let lock = self.health.check_lock(endpoint_id);
        let _probing = lock.lock().await;
        if let Some(healthy) = self.health.cached(endpoint_id).await {
            return healthy;
        }

        let result = self.health.probe(self.transport.as_ref(), &endpoint).await;
        match &result {
            HealthCheckResult::Success { latency_ms } => {
                self.registry
                    .update_health(endpoint_id, true, Some(*latency_ms));
            }
            HealthCheckResult::Failure { error, .. } => {
                tracing::debug!("probe of {} failed: {}", endpoint_id, error);
                self.registry.update_health(endpoint_id, false, None);
            }
        }
        self.selector.refresh_counts(&endpoint.region);
        self.health.record(endpoint_id, &result).await;

        result.is_success()
    }

    /// Probe every enabled endpoint concurrently.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let ids: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .filter(|e| e.enabled)
            .map(|e| e.id)
            .collect();

        let probes = ids.iter().map(|id| async move {
            let healthy = self.health_check(id).await;
            (id.clone(), healthy)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Public IP seen through a region.
    pub async fn get_external_ip(&self, region: Option<&str>) -> Result<ExternalIp, RouteError> {
        let mut options = RequestOptions::get(&self.config.ip_echo_url)
            .timeout(self.health.config().timeout);
        options.region = region.map(str::to_string);

        let response = self.request(options).await?;
        let ip = match &response.body {
            ResponseBody::Structured(value) => value
                .get("ip")
                .and_then(|ip| ip.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            ResponseBody::Raw(text) => text.trim().to_string(),
        };

        Ok(ExternalIp {
            ip,
            region: response.region,
            endpoint: response.endpoint_used,
            elapsed_ms: response.elapsed_ms,
        })
    }

    /// Check that a region can reach the outside world. Never fails.
    pub async fn test_connectivity(&self, region: Option<&str>) -> ConnectivityReport {
        let start = Instant::now();
        let result = self.get_external_ip(region).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(ip) => {
                let vpn_used = self
                    .registry
                    .get(&ip.endpoint)
                    .map(|e| e.transport == TransportMode::Tunneled)
                    .unwrap_or(false);
                tracing::info!(
                    "connectivity via {} ({}) ok, external ip {}",
                    ip.endpoint,
                    ip.region,
                    ip.ip
                );
                ConnectivityReport {
                    success: true,
                    vpn_used,
                    region: Some(ip.region),
                    endpoint: Some(ip.endpoint),
                    response_time_ms,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("connectivity test failed: {}", e);
                ConnectivityReport {
                    success: false,
                    vpn_used: false,
                    region: region.map(str::to_string),
                    endpoint: None,
                    response_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn select_region(&self, strategy: RegionStrategy) -> Option<RegionSelection> {
        self.selector.select_region(strategy)
    }

    /// Stats of one region, or of all regions when `region` is None.
    pub fn get_region_stats(&self, region: Option<&str>) -> Vec<RegionStats> {
        match region {
            Some(region) => self.selector.get_stats(region).into_iter().collect(),
            None => self.selector.all_stats(),
        }
    }

    pub fn get_recommended_region(&self, exclude: &[String]) -> Option<RegionSelection> {
        self.selector.recommended_region(exclude)
    }

    /// Last probe outcome of an endpoint, cached or expired.
    pub async fn probe_status(&self, endpoint_id: &str) -> Option<HealthStatus> {
        self.health.get_status(endpoint_id).await
    }

    /// Last probe outcome of every probed endpoint.
    pub async fn probe_statuses(&self) -> HashMap<String, HealthStatus> {
        self.health.all_statuses().await
    }

    /// Add or replace an endpoint at runtime.
    ///
    /// A cached probe result under the same id is dropped.
    pub async fn add_endpoint(&self, endpoint: Endpoint) {
        let id = endpoint.id.clone();
        let region = endpoint.region.clone();
        let previous_region = self.registry.get(&id).map(|e| e.region);
        self.registry.add(endpoint);
        self.health.invalidate(&id).await;
        self.selector.refresh_counts(&region);
        if let Some(previous) = previous_region.filter(|r| *r != region) {
            self.selector.refresh_counts(&previous);
        }
    }

    pub async fn remove_endpoint(&self, endpoint_id: &str) -> bool {
        let region = self.registry.get(endpoint_id).map(|e| e.region);
        let removed = self.registry.remove(endpoint_id);
        self.health.invalidate(endpoint_id).await;
        if let Some(region) = region {
            self.selector.refresh_counts(&region);
        }
        removed
    }

    pub async fn enable_endpoint(&self, endpoint_id: &str) -> bool {
        self.set_enabled(endpoint_id, true).await
    }

    pub async fn disable_endpoint(&self, endpoint_id: &str) -> bool {
        self.set_enabled(endpoint_id, false).await
    }

    async fn set_enabled(&self, endpoint_id: &str, enabled: bool) -> bool {
        let changed = if enabled {
            self.registry.enable(endpoint_id)
        } else {
            self.registry.disable(endpoint_id)
        };
        self.health.invalidate(endpoint_id).await;
        if let Some(endpoint) = self.registry.get(endpoint_id) {
            self.selector.refresh_counts(&endpoint.region);
        }
        changed
    }
}
