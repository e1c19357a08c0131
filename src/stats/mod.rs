//! Per-target and fleet-wide summaries computed on demand from stored results.

mod range;

pub use range::*;

use crate::db::{DbError, RegionCount, Store, TargetAggregate};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Summary for one target over a time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStats {
    /// `None` for results whose target has since been deleted.
    pub target_id: Option<i64>,
    pub region: String,
    pub public_ip: String,
    pub port: u16,
    pub business_system: Option<String>,
    pub total_probes: i64,
    pub successful_probes: i64,
    /// Mean over successful probes only; absent when there were none.
    pub avg_latency_ms: Option<f64>,
    /// Failed share of all probes, between 0 and 1.
    pub packet_loss_rate: f64,
}

impl From<TargetAggregate> for TargetStats {
    fn from(agg: TargetAggregate) -> Self {
        let avg_latency_ms = if agg.successful_probes > 0 {
            agg.avg_latency_ms.filter(|v| v.is_finite())
        } else {
            None
        };

        Self {
            packet_loss_rate: loss_rate(agg.total_probes, agg.successful_probes),
            target_id: agg.target_id,
            region: agg.region,
            public_ip: agg.public_ip,
            port: agg.port,
            business_system: agg.business_system,
            total_probes: agg.total_probes,
            successful_probes: agg.successful_probes,
            avg_latency_ms,
        }
    }
}

/// Fleet-wide overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    pub total_active_targets: usize,
    pub probes_last_24h: i64,
    pub successful_last_24h: i64,
    /// Between 0 and 1; 0 when nothing was probed.
    pub success_rate_24h: f64,
    pub region_count: usize,
    pub regions: Vec<RegionCount>,
}

fn loss_rate(total: i64, successful: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let failed = (total - successful).clamp(0, total);
    failed as f64 / total as f64
}

/// Computes summaries from the result store. Nothing is cached.
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<Store>,
}

impl StatsAggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Summarize every target within `range`, optionally limited to one region.
    ///
    /// Active targets with no results in the range are listed with zero probes.
    /// A region filter of `"all"` is the same as no filter.
    pub fn summarize(&self, range: TimeRange, region: Option<&str>) -> Result<Vec<TargetStats>, DbError> {
        let region = region.map(str::trim).filter(|r| !r.is_empty() && *r != "all");

        let mut stats: Vec<TargetStats> = self
            .store
            .aggregate_results(range.start, range.end, region)?
            .into_iter()
            .map(TargetStats::from)
            .collect();

        let seen: HashSet<i64> = stats.iter().filter_map(|s| s.target_id).collect();
        for target in self.store.list_targets(region, Some(true))? {
            if seen.contains(&target.id) {
                continue;
            }
            stats.push(TargetStats {
                target_id: Some(target.id),
                region: target.region,
                public_ip: target.public_ip,
                port: target.port,
                business_system: target.business_system,
                total_probes: 0,
                successful_probes: 0,
                avg_latency_ms: None,
                packet_loss_rate: 0.0,
            });
        }

        stats.sort_by(|a, b| {
            (&a.region, &a.public_ip, a.port, a.target_id).cmp(&(&b.region, &b.public_ip, b.port, b.target_id))
        });

        Ok(stats)
    }

    /// Active target counts and success rate over the 24 hours before `now`.
    pub fn fleet_summary(&self, now: DateTime<Utc>) -> Result<FleetSummary, DbError> {
        let regions = self.store.active_region_counts()?;
        let total_active_targets = regions.iter().map(|r| r.count as usize).sum();
        let (probes, successful) = self.store.count_results_since(now - ChronoDuration::hours(24))?;

        let success_rate_24h = if probes > 0 {
            successful as f64 / probes as f64
        } else {
            0.0
        };

        Ok(FleetSummary {
            total_active_targets,
            probes_last_24h: probes,
            successful_last_24h: successful,
            success_rate_24h,
            region_count: regions.len(),
            regions,
        })
    }
}
