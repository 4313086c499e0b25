use crate::domain::entities::{Credentials, Endpoint, Region};
use crate::domain::value_objects::{EndpointStrategy, ProxyProtocol, TransportMode};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Topology
    pub topology_path: String,
    pub enable_all: bool,
    pub bypass_prefix: String,

    // Health probing
    pub health_check_url: String,
    pub probe_timeout_secs: u64,
    pub health_cache_ttl_secs: u64,
    pub probe_on_start: bool,

    // Request execution
    pub ip_echo_url: String,
    pub backoff_base_ms: u64,
    pub max_retries: u32,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topology_path: "egress.json".to_string(),
            enable_all: false,
            bypass_prefix: "direct".to_string(),
            health_check_url: "https://httpbin.org/ip".to_string(),
            probe_timeout_secs: 10,
            health_cache_ttl_secs: 60,
            probe_on_start: true,
            ip_echo_url: "https://api.ipify.org?format=json".to_string(),
            backoff_base_ms: 1000,
            max_retries: 3,
            debug: false,
        }
    }
}

impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.health_cache_ttl_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

pub fn load_config() -> anyhow::Result<Config> {
    let topology_path = std::env::var("EGRESS_TOPOLOGY_PATH")
        .unwrap_or_else(|_| "egress.json".to_string());

    let enable_all = env_flag("EGRESS_ENABLE_ALL", false);

    let bypass_prefix = std::env::var("EGRESS_BYPASS_PREFIX")
        .unwrap_or_else(|_| "direct".to_string());

    let health_check_url = std::env::var("EGRESS_HEALTH_CHECK_URL")
        .unwrap_or_else(|_| "https://httpbin.org/ip".to_string());

    let probe_timeout_secs = std::env::var("EGRESS_PROBE_TIMEOUT_SECS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(10);

    let health_cache_ttl_secs = std::env::var("EGRESS_HEALTH_CACHE_TTL_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .unwrap_or(60);

    let probe_on_start = env_flag("EGRESS_PROBE_ON_START", true);

    let ip_echo_url = std::env::var("EGRESS_IP_ECHO_URL")
        .unwrap_or_else(|_| "https://api.ipify.org?format=json".to_string());

    let backoff_base_ms = std::env::var("EGRESS_BACKOFF_BASE_MS")
        .unwrap_or_else(|_| "1000".to_string())
        .parse()
        .unwrap_or(1000);

    let max_retries = std::env::var("EGRESS_MAX_RETRIES")
        .unwrap_or_else(|_| "3".to_string())
        .parse()
        .unwrap_or(3);

    let debug = std::env::var("DEBUG").is_ok();

    Ok(Config {
        topology_path,
        enable_all,
        bypass_prefix,
        health_check_url,
        probe_timeout_secs,
        health_cache_ttl_secs,
        probe_on_start,
        ip_echo_url,
        backoff_base_ms,
        max_retries,
        debug,
    })
}

// ===== Topology =====

/// Topology loading failures.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid topology: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("endpoint {0} is defined more than once")]
    DuplicateEndpoint(String),
    #[error("region {0} is defined more than once")]
    DuplicateRegion(String),
    #[error("endpoint {endpoint} names unknown region {region}")]
    UnknownRegion { endpoint: String, region: String },
    #[error("region {region} lists unknown endpoint {endpoint}")]
    UnknownEndpoint { region: String, endpoint: String },
    #[error("endpoint {endpoint} is listed by region {listed_by} but belongs to {region}")]
    RegionMismatch {
        endpoint: String,
        region: String,
        listed_by: String,
    },
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    regions: Vec<RegionConfig>,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Deserialize)]
struct RegionConfig {
    id: String,
    name: Option<String>,
    #[serde(default)]
    strategy: EndpointStrategy,
    max_retries: Option<u32>,
    health_check_interval_secs: Option<u64>,
    #[serde(default)]
    endpoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointConfig {
    id: String,
    name: Option<String>,
    region: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    protocol: ProxyProtocol,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    enabled: Option<bool>,
    #[serde(default = "default_priority")]
    priority: u32,
}

fn default_priority() -> u32 {
    1
}

/// Regions and endpoints ready to seed a registry.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub regions: Vec<Region>,
    pub endpoints: Vec<Endpoint>,
}

/// Read and validate the topology file.
pub fn load_topology(path: impl AsRef<Path>, cfg: &Config) -> Result<Topology, TopologyError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_topology(&raw, cfg)
}

/// Validate a topology document.
///
/// Region endpoint lists fix the selection order; endpoints naming a
/// region without being listed are appended in file order.
pub fn parse_topology(raw: &str, cfg: &Config) -> Result<Topology, TopologyError> {
    let file: TopologyFile = serde_json::from_str(raw)?;

    let mut seen_regions = HashSet::new();
    for region in &file.regions {
        if !seen_regions.insert(region.id.as_str()) {
            return Err(TopologyError::DuplicateRegion(region.id.clone()));
        }
    }

    let mut endpoint_regions: HashMap<&str, &str> = HashMap::new();
    for endpoint in &file.endpoints {
        if !seen_regions.contains(endpoint.region.as_str()) {
            return Err(TopologyError::UnknownRegion {
                endpoint: endpoint.id.clone(),
                region: endpoint.region.clone(),
            });
        }
        if endpoint_regions
            .insert(endpoint.id.as_str(), endpoint.region.as_str())
            .is_some()
        {
            return Err(TopologyError::DuplicateEndpoint(endpoint.id.clone()));
        }
    }

    let mut regions = Vec::with_capacity(file.regions.len());
    for region in &file.regions {
        let mut endpoint_ids: Vec<String> = Vec::new();
        for id in &region.endpoints {
            match endpoint_regions.get(id.as_str()) {
                None => {
                    return Err(TopologyError::UnknownEndpoint {
                        region: region.id.clone(),
                        endpoint: id.clone(),
                    })
                }
                Some(owner) if *owner != region.id => {
                    return Err(TopologyError::RegionMismatch {
                        endpoint: id.clone(),
                        region: owner.to_string(),
                        listed_by: region.id.clone(),
                    })
                }
                Some(_) => {
                    if !endpoint_ids.contains(id) {
                        endpoint_ids.push(id.clone());
                    }
                }
            }
        }
        for endpoint in file.endpoints.iter().filter(|e| e.region == region.id) {
            if !endpoint_ids.contains(&endpoint.id) {
                endpoint_ids.push(endpoint.id.clone());
            }
        }

        regions.push(Region {
            id: region.id.clone(),
            name: region.name.clone().unwrap_or_else(|| region.id.clone()),
            endpoint_ids,
            strategy: region.strategy,
            max_retries: region.max_retries.unwrap_or(cfg.max_retries),
            health_check_interval: Duration::from_secs(
                region.health_check_interval_secs.unwrap_or(300),
            ),
        });
    }

    let endpoints = file
        .endpoints
        .into_iter()
        .map(|e| {
            let transport = if !cfg.bypass_prefix.is_empty() && e.host.starts_with(&cfg.bypass_prefix)
            {
                TransportMode::Direct
            } else {
                TransportMode::Tunneled
            };
            let credentials = e.username.map(|username| Credentials {
                username,
                password: e.password.unwrap_or_default(),
            });

            Endpoint {
                name: e.name.unwrap_or_else(|| e.id.clone()),
                id: e.id,
                region: e.region,
                country: e.country,
                protocol: e.protocol,
                host: e.host,
                port: e.port,
                credentials,
                enabled: e.enabled == Some(true) || cfg.enable_all,
                priority: e.priority,
                latency_ms: None,
                last_health_check: None,
                health: None,
                transport,
            }
        })
        .collect();

    Ok(Topology { regions, endpoints })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    const TOPOLOGY: &str = r#"{
        "regions": [
            {"id": "us-east", "name": "US East", "strategy": "round_robin", "max_retries": 5,
             "health_check_interval_secs": 60, "endpoints": ["us-2", "us-1"]},
            {"id": "eu-west", "endpoints": []}
        ],
        "endpoints": [
            {"id": "us-1", "region": "us-east", "country": "US", "protocol": "socks5",
             "host": "10.0.0.1", "port": 1080, "username": "u", "password": "p",
             "enabled": true, "priority": 2},
            {"id": "us-2", "region": "us-east", "country": "US", "host": "10.0.0.2",
             "port": 3128, "enabled": true},
            {"id": "eu-1", "region": "eu-west", "country": "DE", "host": "direct-eu",
             "port": 8080}
        ]
    }"#;

    // ===== Env Config Tests =====

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.topology_path, "egress.json");
        assert_eq!(cfg.bypass_prefix, "direct");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base(), Duration::from_secs(1));
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.health_cache_ttl(), Duration::from_secs(60));
        assert!(cfg.probe_on_start);
        assert!(!cfg.enable_all);
    }

    #[test]
    fn test_load_config_defaults() {
        std::env::remove_var("EGRESS_TOPOLOGY_PATH");
        std::env::remove_var("EGRESS_HEALTH_CHECK_URL");

        let cfg = load_config().unwrap();
        assert_eq!(cfg.topology_path, "egress.json");
        assert_eq!(cfg.health_check_url, "https://httpbin.org/ip");
    }

    #[test]
    fn test_load_config_with_enable_all() {
        std::env::set_var("EGRESS_ENABLE_ALL", "TRUE");
        let cfg = load_config().unwrap();
        assert!(cfg.enable_all);
        std::env::remove_var("EGRESS_ENABLE_ALL");
    }

    #[test]
    fn test_load_config_with_probe_on_start_disabled() {
        std::env::set_var("EGRESS_PROBE_ON_START", "false");
        let cfg = load_config().unwrap();
        assert!(!cfg.probe_on_start);
        std::env::remove_var("EGRESS_PROBE_ON_START");
    }

    #[test]
    fn test_load_config_with_retry_settings() {
        std::env::set_var("EGRESS_MAX_RETRIES", "5");
        std::env::set_var("EGRESS_BACKOFF_BASE_MS", "250");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.backoff_base(), Duration::from_millis(250));
        std::env::remove_var("EGRESS_MAX_RETRIES");
        std::env::remove_var("EGRESS_BACKOFF_BASE_MS");
    }

    #[test]
    fn test_load_config_with_probe_settings() {
        std::env::set_var("EGRESS_PROBE_TIMEOUT_SECS", "3");
        std::env::set_var("EGRESS_IP_ECHO_URL", "http://127.0.0.1:9/ip");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.probe_timeout_secs, 3);
        assert_eq!(cfg.ip_echo_url, "http://127.0.0.1:9/ip");
        std::env::remove_var("EGRESS_PROBE_TIMEOUT_SECS");
        std::env::remove_var("EGRESS_IP_ECHO_URL");
    }

    #[test]
    fn test_load_config_parse_error_uses_default() {
        std::env::set_var("EGRESS_HEALTH_CACHE_TTL_SECS", "soon");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.health_cache_ttl_secs, 60);
        std::env::remove_var("EGRESS_HEALTH_CACHE_TTL_SECS");
    }

    // ===== Topology Tests =====

    #[test]
    fn test_parse_topology() {
        let topology = parse_topology(TOPOLOGY, &Config::default()).unwrap();

        assert_eq!(topology.regions.len(), 2);
        let us = &topology.regions[0];
        assert_eq!(us.name, "US East");
        assert_eq!(us.strategy, EndpointStrategy::RoundRobin);
        assert_eq!(us.max_retries, 5);
        assert_eq!(us.health_check_interval, Duration::from_secs(60));
        assert_eq!(us.endpoint_ids, vec!["us-2", "us-1"]);

        // unlisted members are appended, defaults applied
        let eu = &topology.regions[1];
        assert_eq!(eu.name, "eu-west");
        assert_eq!(eu.endpoint_ids, vec!["eu-1"]);
        assert_eq!(eu.max_retries, 3);
        assert_eq!(eu.strategy, EndpointStrategy::Priority);
    }

    #[test]
    fn test_parse_topology_endpoint_fields() {
        let topology = parse_topology(TOPOLOGY, &Config::default()).unwrap();
        let by_id = |id: &str| topology.endpoints.iter().find(|e| e.id == id).unwrap();

        let us1 = by_id("us-1");
        assert_eq!(us1.protocol, ProxyProtocol::Socks5);
        assert_eq!(us1.priority, 2);
        assert_eq!(us1.credentials.as_ref().unwrap().password, "p");
        assert_eq!(us1.transport, TransportMode::Tunneled);

        let us2 = by_id("us-2");
        assert_eq!(us2.protocol, ProxyProtocol::Http);
        assert_eq!(us2.priority, 1);
        assert!(us2.credentials.is_none());

        let eu1 = by_id("eu-1");
        assert!(!eu1.enabled);
        assert_eq!(eu1.transport, TransportMode::Direct);
        assert!(eu1.health.is_none());
    }

    #[test]
    fn test_enable_all_overrides_missing_flag() {
        let cfg = Config {
            enable_all: true,
            ..Default::default()
        };
        let topology = parse_topology(TOPOLOGY, &cfg).unwrap();
        assert!(topology.endpoints.iter().all(|e| e.enabled));
    }

    #[test]
    fn test_empty_bypass_prefix_disables_direct() {
        let cfg = Config {
            bypass_prefix: String::new(),
            ..Default::default()
        };
        let topology = parse_topology(TOPOLOGY, &cfg).unwrap();
        assert!(topology
            .endpoints
            .iter()
            .all(|e| e.transport == TransportMode::Tunneled));
    }

    #[test]
    fn test_unknown_region_rejected() {
        let raw = r#"{"regions": [], "endpoints": [
            {"id": "x", "region": "nowhere", "host": "h", "port": 1}
        ]}"#;
        let err = parse_topology(raw, &Config::default()).unwrap_err();
        assert!(matches!(err, TopologyError::UnknownRegion { .. }));
    }

    #[test]
    fn test_endpoint_listed_by_two_regions_rejected() {
        let raw = r#"{"regions": [
            {"id": "a", "endpoints": ["x"]},
            {"id": "b", "endpoints": ["x"]}
        ], "endpoints": [
            {"id": "x", "region": "a", "host": "h", "port": 1}
        ]}"#;
        let err = parse_topology(raw, &Config::default()).unwrap_err();
        assert!(matches!(err, TopologyError::RegionMismatch { ref listed_by, .. } if listed_by == "b"));
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let raw = r#"{"regions": [{"id": "a", "endpoints": ["ghost"]}], "endpoints": []}"#;
        let err = parse_topology(raw, &Config::default()).unwrap_err();
        assert!(matches!(err, TopologyError::UnknownEndpoint { .. }));
    }

    #[test]
    fn test_duplicates_rejected() {
        let raw = r#"{"regions": [{"id": "a"}, {"id": "a"}]}"#;
        assert!(matches!(
            parse_topology(raw, &Config::default()),
            Err(TopologyError::DuplicateRegion(_))
        ));

        let raw = r#"{"regions": [{"id": "a"}], "endpoints": [
            {"id": "x", "region": "a", "host": "h", "port": 1},
            {"id": "x", "region": "a", "host": "h", "port": 2}
        ]}"#;
        assert!(matches!(
            parse_topology(raw, &Config::default()),
            Err(TopologyError::DuplicateEndpoint(_))
        ));
    }

    #[test]
    fn test_unknown_protocol_is_parse_error() {
        let raw = r#"{"regions": [{"id": "a"}], "endpoints": [
            {"id": "x", "region": "a", "protocol": "quic", "host": "h", "port": 1}
        ]}"#;
        assert!(matches!(
            parse_topology(raw, &Config::default()),
            Err(TopologyError::Parse(_))
        ));
    }

    #[test]
    fn test_load_topology_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOPOLOGY.as_bytes()).unwrap();

        let topology = load_topology(file.path(), &Config::default()).unwrap();
        assert_eq!(topology.endpoints.len(), 3);
    }

    #[test]
    fn test_load_topology_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_topology(dir.path().join("missing.json"), &Config::default()).unwrap_err();
        assert!(matches!(err, TopologyError::Io { .. }));
        assert!(err.to_string().contains("missing.json"));
    }
}
