//! Metrics collection and export

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time metrics for a pool.
///
/// # Examples
///
/// ```
/// use slotpool::{Pool, PoolConfig, NeverExpire};
/// use slotpool::{ObjectFactory, SlotInfo};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// struct Widgets;
/// impl ObjectFactory for Widgets {
///     type Object = u32;
///     type Error = Infallible;
///     fn create(&self, _slot: &mut SlotInfo<'_>) -> Result<u32, Infallible> {
///         Ok(7)
///     }
/// }
///
/// let pool = Pool::new(
///     Widgets,
///     PoolConfig::new().with_size(2).with_expiration(NeverExpire),
/// ).unwrap();
///
/// let handle = pool.claim(Duration::from_secs(1)).unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_claims, 1);
/// assert_eq!(metrics.claimed_objects, 1);
/// drop(handle);
/// ```
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Successful claims over the pool's lifetime.
    pub total_claims: u64,

    /// Releases back to the pool.
    pub total_releases: u64,

    /// Claims that hit their deadline without an object.
    pub total_timeouts: u64,

    /// Claims that surfaced a captured allocation failure.
    pub poisoned_claims: u64,

    /// Objects retired by the expiration policy or an explicit mark.
    pub expired_objects: u64,

    /// Successful factory allocations.
    pub objects_allocated: u64,

    /// Factory allocations that failed and were captured as poison.
    pub allocation_failures: u64,

    /// Objects passed to the factory's destroy.
    pub objects_destroyed: u64,

    /// Slots currently circulating with a captured allocation failure.
    /// Non-zero here means the factory is unhealthy right now.
    pub poisoned_slots: usize,

    /// Slots currently live and claimable.
    pub live_objects: usize,

    /// Slots currently held by claimers.
    pub claimed_objects: usize,

    /// Slots currently existing in any state.
    pub capacity: usize,

    /// The size the pool is converging toward.
    pub target_size: usize,

    /// Claimed / target, 0.0 to 1.0.
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_claims".to_string(), self.total_claims.to_string());
        metrics.insert("total_releases".to_string(), self.total_releases.to_string());
        metrics.insert("total_timeouts".to_string(), self.total_timeouts.to_string());
        metrics.insert("poisoned_claims".to_string(), self.poisoned_claims.to_string());
        metrics.insert("expired_objects".to_string(), self.expired_objects.to_string());
        metrics.insert("objects_allocated".to_string(), self.objects_allocated.to_string());
        metrics.insert(
            "allocation_failures".to_string(),
            self.allocation_failures.to_string(),
        );
        metrics.insert("objects_destroyed".to_string(), self.objects_destroyed.to_string());
        metrics.insert("poisoned_slots".to_string(), self.poisoned_slots.to_string());
        metrics.insert("live_objects".to_string(), self.live_objects.to_string());
        metrics.insert("claimed_objects".to_string(), self.claimed_objects.to_string());
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("target_size".to_string(), self.target_size.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Exporter for the Prometheus exposition format.
pub struct MetricsExporter;

impl MetricsExporter {
    /// Render metrics in the Prometheus text format.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges: [(&str, &str, String); 6] = [
            ("slotpool_objects_live", "Slots live and claimable", metrics.live_objects.to_string()),
            ("slotpool_objects_claimed", "Slots held by claimers", metrics.claimed_objects.to_string()),
            ("slotpool_objects_poisoned", "Slots circulating a captured failure", metrics.poisoned_slots.to_string()),
            ("slotpool_capacity", "Slots existing in any state", metrics.capacity.to_string()),
            ("slotpool_target_size", "Configured target size", metrics.target_size.to_string()),
            ("slotpool_utilization", "Claimed over target ratio", format!("{:.2}", metrics.utilization)),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name}{{{labels}}} {value}\n"));
        }

        let counters: [(&str, &str, u64); 8] = [
            ("slotpool_claims_total", "Successful claims", metrics.total_claims),
            ("slotpool_releases_total", "Releases back to the pool", metrics.total_releases),
            ("slotpool_timeouts_total", "Claims that timed out", metrics.total_timeouts),
            ("slotpool_poisoned_claims_total", "Claims surfacing poison", metrics.poisoned_claims),
            ("slotpool_expired_objects_total", "Objects retired by expiration", metrics.expired_objects),
            ("slotpool_allocations_total", "Successful factory allocations", metrics.objects_allocated),
            ("slotpool_allocation_failures_total", "Failed factory allocations", metrics.allocation_failures),
            ("slotpool_destructions_total", "Objects destroyed", metrics.objects_destroyed),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name}{{{labels}}} {value}\n"));
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal counter block, bumped from the claim and allocator paths.
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_claims: AtomicU64,
    pub total_releases: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub poisoned_claims: AtomicU64,
    pub expired_objects: AtomicU64,
    pub objects_allocated: AtomicU64,
    pub allocation_failures: AtomicU64,
    pub objects_destroyed: AtomicU64,
}

impl MetricsTracker {
    pub(crate) fn snapshot(
        &self,
        live: usize,
        claimed: usize,
        poisoned: usize,
        capacity: usize,
        target_size: usize,
    ) -> PoolMetrics {
        let utilization = if target_size > 0 {
            claimed as f64 / target_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_claims: self.total_claims.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            poisoned_claims: self.poisoned_claims.load(Ordering::Relaxed),
            expired_objects: self.expired_objects.load(Ordering::Relaxed),
            objects_allocated: self.objects_allocated.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            objects_destroyed: self.objects_destroyed.load(Ordering::Relaxed),
            poisoned_slots: poisoned,
            live_objects: live,
            claimed_objects: claimed,
            capacity,
            target_size,
            utilization,
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolMetrics {
        let tracker = MetricsTracker::default();
        tracker.total_claims.store(12, Ordering::Relaxed);
        tracker.objects_allocated.store(5, Ordering::Relaxed);
        tracker.snapshot(3, 2, 1, 5, 4)
    }

    #[test]
    fn snapshot_reflects_counters_and_gauges() {
        let metrics = sample();
        assert_eq!(metrics.total_claims, 12);
        assert_eq!(metrics.objects_allocated, 5);
        assert_eq!(metrics.live_objects, 3);
        assert_eq!(metrics.claimed_objects, 2);
        assert_eq!(metrics.poisoned_slots, 1);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn map_export_contains_every_counter() {
        let exported = sample().export();
        assert_eq!(exported["total_claims"], "12");
        assert_eq!(exported["capacity"], "5");
        assert_eq!(exported["utilization"], "0.50");
    }

    #[test]
    fn prometheus_export_labels_every_series() {
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());
        let output = MetricsExporter::export_prometheus(&sample(), "test_pool", Some(&tags));
        assert!(output.contains("slotpool_claims_total"));
        assert!(output.contains("pool=\"test_pool\""));
        assert!(output.contains("service=\"api\""));
        assert!(output.contains("# TYPE slotpool_objects_live gauge"));
    }
}
