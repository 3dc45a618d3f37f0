// src/pipeline/metrics.rs
//
// Pipeline observability. Counters are shared atomics so a cloned
// `PipelineMetrics` (e.g. inside a `PipelineHandle`) reads live values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_ticks: Arc<AtomicU64>,
    pub interrupted_ticks: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_removed: Arc<AtomicU64>,
    pub alerts_raised: Arc<AtomicU64>,
    pub critical_alerts: Arc<AtomicU64>,
    pub phase_changes: Arc<AtomicU64>,
    pub emergency_preemptions: Arc<AtomicU64>,
    pub metrics_gaps: Arc<AtomicU64>,
    pub layout_swaps: Arc<AtomicU64>,
    pub invariant_violations: Arc<AtomicU64>,
    pub tick_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_ticks: Arc::new(AtomicU64::new(0)),
            interrupted_ticks: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_removed: Arc::new(AtomicU64::new(0)),
            alerts_raised: Arc::new(AtomicU64::new(0)),
            critical_alerts: Arc::new(AtomicU64::new(0)),
            phase_changes: Arc::new(AtomicU64::new(0)),
            emergency_preemptions: Arc::new(AtomicU64::new(0)),
            metrics_gaps: Arc::new(AtomicU64::new(0)),
            layout_swaps: Arc::new(AtomicU64::new(0)),
            invariant_violations: Arc::new(AtomicU64::new(0)),
            tick_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    /// Wall-clock processing rate.
    pub fn ticks_per_sec(&self) -> f64 {
        let ticks = self.total_ticks.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            ticks as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_ticks: self.total_ticks.load(Ordering::Relaxed),
            ticks_per_sec: self.ticks_per_sec(),
            interrupted_ticks: self.interrupted_ticks.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_removed: self.tracks_removed.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            critical_alerts: self.critical_alerts.load(Ordering::Relaxed),
            phase_changes: self.phase_changes.load(Ordering::Relaxed),
            emergency_preemptions: self.emergency_preemptions.load(Ordering::Relaxed),
            metrics_gaps: self.metrics_gaps.load(Ordering::Relaxed),
            layout_swaps: self.layout_swaps.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            last_tick_us: self.tick_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_ticks: u64,
    pub ticks_per_sec: f64,
    pub interrupted_ticks: u64,
    pub tracks_created: u64,
    pub tracks_removed: u64,
    pub alerts_raised: u64,
    pub critical_alerts: u64,
    pub phase_changes: u64,
    pub emergency_preemptions: u64,
    pub metrics_gaps: u64,
    pub layout_swaps: u64,
    pub invariant_violations: u64,
    pub last_tick_us: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let reader = metrics.clone();
        metrics.inc(&metrics.total_ticks);
        metrics.add(&metrics.alerts_raised, 3);
        metrics.set_timing(&metrics.tick_time_us, 250);

        let summary = reader.summary();
        assert_eq!(summary.total_ticks, 1);
        assert_eq!(summary.alerts_raised, 3);
        assert_eq!(summary.last_tick_us, 250);
    }
}
