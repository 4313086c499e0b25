//! Load Balancer Service
//!
//! Picks an endpoint inside a region and scores regions from their
//! rolling statistics.

use crate::domain::entities::{Endpoint, RegionStats};
use crate::domain::value_objects::EndpointStrategy;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Penalty added to the load score of a region without healthy endpoints.
pub const NO_HEALTHY_ENDPOINT_PENALTY: f64 = 1000.0;

/// Average latency at which a region's latency score reaches zero.
pub const LATENCY_CEILING_MS: f64 = 5000.0;

const SUCCESS_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const AVAILABILITY_WEIGHT: f64 = 0.3;

/// Signature shared by all intra-region selection functions.
type EndpointPicker = fn(&[Endpoint], &AtomicUsize) -> Option<Endpoint>;

/// Load balancer service for endpoints and regions.
pub struct LoadBalancer;

impl LoadBalancer {
    /// Pick an endpoint among healthy `candidates` (in region list order).
    ///
    /// `cursor` is the region's round-robin cursor; only the round-robin
    /// strategy advances it.
    ///
    /// # Returns
    /// The chosen endpoint, or None if there are no candidates
    pub fn pick_endpoint(
        strategy: EndpointStrategy,
        candidates: &[Endpoint],
        cursor: &AtomicUsize,
    ) -> Option<Endpoint> {
        if candidates.is_empty() {
            return None;
        }
        Self::picker(strategy)(candidates, cursor)
    }

    fn picker(strategy: EndpointStrategy) -> EndpointPicker {
        match strategy {
            EndpointStrategy::Priority => Self::by_priority,
            EndpointStrategy::Latency => Self::by_latency,
            EndpointStrategy::Random => Self::at_random,
            EndpointStrategy::RoundRobin => Self::round_robin,
        }
    }

    /// Lowest priority value; the first one in list order on ties.
    fn by_priority(candidates: &[Endpoint], _cursor: &AtomicUsize) -> Option<Endpoint> {
        let mut best: Option<&Endpoint> = None;
        for endpoint in candidates {
            match best {
                Some(current) if endpoint.priority >= current.priority => {}
                _ => best = Some(endpoint),
            }
        }
        best.cloned()
    }

    /// Lowest recorded latency; unmeasured endpoints sort last.
    fn by_latency(candidates: &[Endpoint], _cursor: &AtomicUsize) -> Option<Endpoint> {
        let mut best: Option<(&Endpoint, u64)> = None;
        for endpoint in candidates {
            let latency = endpoint.latency_ms.unwrap_or(u64::MAX);
            match best {
                Some((_, best_latency)) if latency >= best_latency => {}
                _ => best = Some((endpoint, latency)),
            }
        }
        best.map(|(endpoint, _)| endpoint.clone())
    }

    fn at_random(candidates: &[Endpoint], _cursor: &AtomicUsize) -> Option<Endpoint> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    fn round_robin(candidates: &[Endpoint], cursor: &AtomicUsize) -> Option<Endpoint> {
        let turn = cursor.fetch_add(1, Ordering::Relaxed);
        candidates.get(turn % candidates.len()).cloned()
    }

    /// Load score of a region (lower is better).
    ///
    /// `total × (1 − success_rate) + average latency in seconds`, plus a
    /// fixed penalty when the region has no healthy endpoint.
    pub fn load_score(stats: &RegionStats) -> f64 {
        let failure_load = stats.total_requests as f64 * (1.0 - stats.success_rate());
        let latency_secs = stats.average_latency_ms / 1000.0;
        let penalty = if stats.healthy_endpoints == 0 {
            NO_HEALTHY_ENDPOINT_PENALTY
        } else {
            0.0
        };

        failure_load + latency_secs + penalty
    }

    /// Composite recommendation score of a region (higher is better).
    ///
    /// Weighted mix of success rate (40%), latency (30%) and the
    /// fraction of healthy endpoints (30%).
    pub fn recommendation_score(stats: &RegionStats) -> f64 {
        let latency_score = (1.0 - stats.average_latency_ms / LATENCY_CEILING_MS).max(0.0);

        SUCCESS_WEIGHT * stats.success_rate()
            + LATENCY_WEIGHT * latency_score
            + AVAILABILITY_WEIGHT * stats.availability_ratio()
    }

    /// Load scores for all regions (useful for debugging/metrics).
    pub fn calculate_all_scores(stats: &[RegionStats]) -> Vec<(String, f64)> {
        stats
            .iter()
            .map(|s| (s.region.clone(), Self::load_score(s)))
            .collect()
    }
}
