//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Protocol spoken by a proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// Plain HTTP proxy (CONNECT for TLS targets)
    Http,
    /// HTTP proxy reached over TLS
    Https,
    /// SOCKS4 proxy
    Socks4,
    /// SOCKS5 proxy
    Socks5,
}

impl ProxyProtocol {
    /// URL scheme used when building a proxy URL.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

impl Default for ProxyProtocol {
    fn default() -> Self {
        Self::Http
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// How a request reaches its target through an endpoint.
///
/// `Direct` endpoints skip tunnel establishment entirely and are used for
/// local execution and integration testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Tunneled,
    Direct,
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Tunneled
    }
}

/// Strategy used to pick an endpoint inside one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStrategy {
    /// Lowest priority value wins, ties by list order
    Priority,
    /// Lowest recorded latency wins, unmeasured endpoints last
    Latency,
    /// Uniform choice
    Random,
    /// Per-region rotating cursor
    RoundRobin,
}

impl Default for EndpointStrategy {
    fn default() -> Self {
        Self::Priority
    }
}

/// Strategy used to pick which region a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStrategy {
    RoundRobin,
    Random,
    GeographicSpread,
    LatencyBased,
    LoadBalanced,
}

impl RegionStrategy {
    pub fn all() -> &'static [RegionStrategy] {
        &[
            RegionStrategy::RoundRobin,
            RegionStrategy::Random,
            RegionStrategy::GeographicSpread,
            RegionStrategy::LatencyBased,
            RegionStrategy::LoadBalanced,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::GeographicSpread => "geographic_spread",
            Self::LatencyBased => "latency_based",
            Self::LoadBalanced => "load_balanced",
        }
    }
}

impl std::fmt::Display for RegionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RegionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown region strategy: {}", s))
    }
}

/// Coarse geographic bucket derived from a region id prefix.
///
/// Region ids follow the `<area>-<location>` naming convention
/// (e.g. `us-east`, `eu_frankfurt`, `ap-tokyo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeoBucket {
    /// South America (sa, br, ar, cl, latam)
    SouthAmerica,
    /// North America (us, na, ca, mx)
    NorthAmerica,
    /// Europe (eu, uk, gb, de, fr, nl)
    Europe,
    /// Asia Pacific (ap, asia, jp, sg, au, in, kr, hk)
    AsiaPacific,
    /// Any other prefix forms its own bucket
    Other(String),
}

impl GeoBucket {
    /// Bucket a region id by the text before its first `-` or `_`.
    ///
    /// # Examples
    /// ```
    /// use egress_proxy::domain::value_objects::GeoBucket;
    ///
    /// assert_eq!(GeoBucket::from_region_id("us-east"), GeoBucket::NorthAmerica);
    /// assert_eq!(GeoBucket::from_region_id("EU_west"), GeoBucket::Europe);
    /// assert_eq!(GeoBucket::from_region_id("mars-1"), GeoBucket::Other("mars".to_string()));
    /// ```
    pub fn from_region_id(region_id: &str) -> Self {
        let prefix = region_id
            .split(|c| c == '-' || c == '_')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match prefix.as_str() {
            "sa" | "br" | "ar" | "cl" | "latam" => Self::SouthAmerica,
            "us" | "na" | "ca" | "mx" => Self::NorthAmerica,
            "eu" | "uk" | "gb" | "de" | "fr" | "nl" => Self::Europe,
            "ap" | "asia" | "jp" | "sg" | "au" | "in" | "kr" | "hk" => Self::AsiaPacific,
            _ => Self::Other(prefix),
        }
    }
}

/// Outcome of a region selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSelection {
    /// Selected region id
    pub region: String,
    /// Human readable explanation of the choice
    pub reason: String,
}

impl RegionSelection {
    pub fn new(region: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            reason: reason.into(),
        }
    }
}
