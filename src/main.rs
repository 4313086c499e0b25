//! egress-proxy - Outbound request routing through regional proxy endpoints
//!
//! This is the composition root that wires together all the components.

use egress_proxy::adapters::outbound::{DashMapEndpointRegistry, ReqwestTransport};
use egress_proxy::application::{ExecutorConfig, RegionSelector, RequestExecutor};
use egress_proxy::config::{load_config, load_topology};
use egress_proxy::domain::ports::EndpointRepository;
use egress_proxy::infrastructure::{HealthCheckConfig, HealthChecker};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting egress-proxy topology={} enable_all={}",
        cfg.topology_path,
        cfg.enable_all
    );

    // ===== COMPOSITION ROOT =====

    // 1. Endpoint registry from the topology file
    let topology = load_topology(&cfg.topology_path, &cfg)?;
    let registry: Arc<dyn EndpointRepository> = Arc::new(DashMapEndpointRegistry::from_topology(
        topology.regions,
        topology.endpoints,
    ));

    // 2. Region selector and transport
    let selector = Arc::new(RegionSelector::new(registry.clone()));
    let transport = Arc::new(ReqwestTransport::new()?);

    // 3. Request executor
    let health = HealthChecker::new(HealthCheckConfig {
        target_url: cfg.health_check_url.clone(),
        timeout: cfg.probe_timeout(),
        cache_ttl: cfg.health_cache_ttl(),
    });
    let executor = Arc::new(RequestExecutor::new(
        registry.clone(),
        selector,
        transport,
        health,
        ExecutorConfig {
            default_max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base(),
            ip_echo_url: cfg.ip_echo_url.clone(),
        },
    ));

    let stats = registry.stats();
    tracing::info!(
        "{} endpoints configured, {} enabled, {} regions available",
        stats.total,
        stats.enabled,
        registry.available_regions().len()
    );

    if cfg.probe_on_start {
        let results = executor.health_check_all().await;
        for (endpoint, healthy) in &results {
            tracing::info!("endpoint {}: {}", endpoint, if *healthy { "healthy" } else { "unhealthy" });
        }
    }

    // 4. Periodic probing until shutdown
    HealthChecker::start(executor.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    Ok(())
}
