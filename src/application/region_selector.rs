//! Region Selector - chooses which region a logical request targets
//!
//! Keeps rolling per-region statistics and a bounded request history
//! that feed the adaptive strategies.

use crate::domain::entities::{RegionStats, RequestHistoryEntry};
use crate::domain::ports::EndpointRepository;
use crate::domain::services::LoadBalancer;
use crate::domain::value_objects::{GeoBucket, RegionSelection, RegionStrategy};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Maximum number of entries kept in the request history.
pub const HISTORY_CAPACITY: usize = 100;

/// Signature shared by all region selection functions.
///
/// Called with a non-empty list of available regions.
type RegionPicker = fn(&RegionSelector, &[String]) -> RegionSelection;

/// Region selector with adaptive statistics.
///
/// Statistics are stored per region in a DashMap so concurrent updates
/// to the same region are serialized by the entry lock and counts stay
/// exact. The round-robin cursor is a single atomic shared by all
/// strategies that fall back to round-robin.
pub struct RegionSelector {
    registry: Arc<dyn EndpointRepository>,
    stats: DashMap<String, RegionStats>,
    history: Mutex<VecDeque<RequestHistoryEntry>>,
    cursor: AtomicUsize,
    last_region: RwLock<Option<String>>,
}

impl RegionSelector {
    /// Create a selector and seed stats for every available region.
    pub fn new(registry: Arc<dyn EndpointRepository>) -> Self {
        let selector = Self {
            registry,
            stats: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            cursor: AtomicUsize::new(0),
            last_region: RwLock::new(None),
        };
        selector.seed();
        selector
    }

    /// Choose a region with the given strategy.
    ///
    /// # Returns
    /// The selection with its reason, or None if no region has an
    /// enabled endpoint
    pub fn select_region(&self, strategy: RegionStrategy) -> Option<RegionSelection> {
        let available = self.registry.available_regions();
        if available.is_empty() {
            tracing::warn!("region selection ({}): no region available", strategy);
            return None;
        }

        let selection = Self::picker(strategy)(self, &available);
        tracing::debug!(
            "region selection ({}): {} - {}",
            strategy,
            selection.region,
            selection.reason
        );
        Some(selection)
    }

    fn picker(strategy: RegionStrategy) -> RegionPicker {
        match strategy {
            RegionStrategy::RoundRobin => Self::round_robin,
            RegionStrategy::Random => Self::random,
            RegionStrategy::GeographicSpread => Self::geographic_spread,
            RegionStrategy::LatencyBased => Self::latency_based,
            RegionStrategy::LoadBalanced => Self::load_balanced,
        }
    }

    fn round_robin(&self, available: &[String]) -> RegionSelection {
        self.rotate(available, "round robin")
    }

    fn rotate(&self, candidates: &[String], reason: &str) -> RegionSelection {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let region = &candidates[turn % candidates.len()];
        RegionSelection::new(region.clone(), reason)
    }

    fn random(&self, available: &[String]) -> RegionSelection {
        let region = available
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        RegionSelection::new(region, "random choice")
    }

    fn geographic_spread(&self, available: &[String]) -> RegionSelection {
        let Some(last) = self.last_region() else {
            return self.rotate(available, "no previous region, round robin fallback");
        };

        let last_bucket = GeoBucket::from_region_id(&last);
        let elsewhere: Vec<String> = available
            .iter()
            .filter(|region| GeoBucket::from_region_id(region) != last_bucket)
            .cloned()
            .collect();

        if elsewhere.is_empty() {
            return self.rotate(
                available,
                "no region outside the last bucket, round robin fallback",
            );
        }

        let reason = format!("different geography than {}", last);
        self.rotate(&elsewhere, &reason)
    }

    fn latency_based(&self, available: &[String]) -> RegionSelection {
        let mut best: Option<(String, f64)> = None;
        for region in available {
            let Some(stats) = self.stats.get(region) else {
                continue;
            };
            if stats.total_requests == 0 {
                continue;
            }
            match &best {
                Some((_, best_latency)) if stats.average_latency_ms >= *best_latency => {}
                _ => best = Some((region.clone(), stats.average_latency_ms)),
            }
        }

        match best {
            Some((region, latency)) => {
                RegionSelection::new(region, format!("lowest average latency ({:.0}ms)", latency))
            }
            None => self.rotate(available, "no latency data, round robin fallback"),
        }
    }

    fn load_balanced(&self, available: &[String]) -> RegionSelection {
        let known: Vec<RegionStats> = available
            .iter()
            .filter_map(|region| self.stats.get(region).map(|s| s.clone()))
            .collect();
        if known.is_empty() {
            return self.rotate(available, "no statistics, round robin fallback");
        }

        let scores = LoadBalancer::calculate_all_scores(&known);
        tracing::debug!("region load scores: {:?}", scores);

        let mut best: Option<&(String, f64)> = None;
        for entry in &scores {
            match best {
                Some((_, best_score)) if entry.1 >= *best_score => {}
                _ => best = Some(entry),
            }
        }

        match best {
            Some((region, score)) => {
                RegionSelection::new(region.clone(), format!("lowest load score ({:.3})", score))
            }
            None => self.rotate(available, "no statistics, round robin fallback"),
        }
    }

    /// Best region by composite score among available regions not in `exclude`.
    ///
    /// Regions without statistics are scored from fresh stats with their
    /// current endpoint counts.
    pub fn recommended_region(&self, exclude: &[String]) -> Option<RegionSelection> {
        let mut best: Option<(String, f64, RegionStats)> = None;

        for region in self.registry.available_regions() {
            if exclude.contains(&region) {
                continue;
            }

            let mut stats = self
                .stats
                .get(&region)
                .map(|s| s.clone())
                .unwrap_or_else(|| RegionStats::new(region.clone()));
            let (healthy, total) = self.registry.endpoint_counts(&region);
            stats.healthy_endpoints = healthy;
            stats.total_endpoints = total;

            let score = LoadBalancer::recommendation_score(&stats);
            match &best {
                Some((_, best_score, _)) if score <= *best_score => {}
                _ => best = Some((region, score, stats)),
            }
        }

        best.map(|(region, score, stats)| {
            RegionSelection::new(
                region,
                format!(
                    "score {:.3} (success {:.0}%, avg {:.0}ms, {}/{} healthy)",
                    score,
                    stats.success_rate() * 100.0,
                    stats.average_latency_ms,
                    stats.healthy_endpoints,
                    stats.total_endpoints
                ),
            )
        })
    }

    /// Record one completed attempt against a region.
    pub fn update_stats(&self, region: &str, success: bool, latency_ms: Option<u64>) {
        let (healthy, total) = self.registry.endpoint_counts(region);

        {
            let mut stats = self
                .stats
                .entry(region.to_string())
                .or_insert_with(|| RegionStats::new(region));
            stats.record(success, latency_ms);
            stats.healthy_endpoints = healthy;
            stats.total_endpoints = total;
        }

        {
            let mut history = self.history.lock();
            history.push_back(RequestHistoryEntry {
                region: region.to_string(),
                timestamp: SystemTime::now(),
                success,
                latency_ms,
            });
            while history.len() > HISTORY_CAPACITY {
                history.pop_front();
            }
        }

        *self.last_region.write() = Some(region.to_string());
    }

    /// Refresh the healthy/total endpoint counts of a region's stats.
    pub fn refresh_counts(&self, region: &str) {
        let (healthy, total) = self.registry.endpoint_counts(region);
        if let Some(mut stats) = self.stats.get_mut(region) {
            stats.healthy_endpoints = healthy;
            stats.total_endpoints = total;
        }
    }

    /// Statistics of one region.
    pub fn get_stats(&self, region: &str) -> Option<RegionStats> {
        self.stats.get(region).map(|s| s.clone())
    }

    /// Statistics of all regions, in configuration order.
    pub fn all_stats(&self) -> Vec<RegionStats> {
        let order: Vec<String> = self.registry.regions().into_iter().map(|r| r.id).collect();
        let mut all: Vec<RegionStats> = self.stats.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            let pos_a = order.iter().position(|id| *id == a.region).unwrap_or(usize::MAX);
            let pos_b = order.iter().position(|id| *id == b.region).unwrap_or(usize::MAX);
            pos_a.cmp(&pos_b).then_with(|| a.region.cmp(&b.region))
        });
        all
    }

    /// Recent requests, oldest first.
    pub fn history(&self) -> Vec<RequestHistoryEntry> {
        self.history.lock().iter().cloned().collect()
    }

    /// Region of the most recently recorded request.
    pub fn last_region(&self) -> Option<String> {
        self.last_region.read().clone()
    }

    /// Reset counters, history, cursor and last region, then reseed.
    pub fn clear_stats(&self) {
        self.stats.clear();
        self.history.lock().clear();
        self.cursor.store(0, Ordering::Relaxed);
        *self.last_region.write() = None;
        self.seed();
        tracing::info!("region statistics cleared");
    }

    fn seed(&self) {
        for region in self.registry.available_regions() {
            let (healthy, total) = self.registry.endpoint_counts(&region);
            let mut stats = RegionStats::new(region.clone());
            stats.healthy_endpoints = healthy;
            stats.total_endpoints = total;
            self.stats.insert(region, stats);
        }
    }
}
