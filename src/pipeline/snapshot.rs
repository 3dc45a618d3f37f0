// src/pipeline/snapshot.rs
//
// The read-only view published once per tick. Built fully, then swapped in
// behind an Arc through a watch channel, so viewers never see a partial tick.

use crate::analysis::anomaly::{Alert, AlertKind, Severity};
use crate::analysis::lane_assigner::LaneId;
use crate::analysis::traffic_analyzer::{
    AnalysisOutput, ChartData, CongestionLevel, LaneSnapshot, VehicleTypeCounts,
};
use crate::control::{ControllerSummary, Phase, SignalState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    pub vehicle_count: usize,
    pub person_count: usize,
    pub density_ratio: f64,
    pub queue_length: usize,
    pub avg_wait_time: f64,
    pub max_wait_time: f64,
    pub congestion_level: CongestionLevel,
    pub priority_score: f64,
}

impl From<&LaneSnapshot> for LaneStats {
    fn from(lane: &LaneSnapshot) -> Self {
        Self {
            vehicle_count: lane.vehicle_count,
            person_count: lane.person_count,
            density_ratio: round2(lane.density_ratio as f64),
            queue_length: lane.queue_length,
            avg_wait_time: round2(lane.avg_wait_time),
            max_wait_time: round2(lane.max_wait_time),
            congestion_level: lane.congestion_level,
            priority_score: round2(lane.priority_score()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotMetrics {
    /// Stream frame rate measured from input timestamps
    pub fps: f64,
    pub vehicle_count: usize,
    pub person_count: usize,
    pub vehicle_types: VehicleTypeCounts,
    pub lane_stats: BTreeMap<LaneId, LaneStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalView {
    pub state: Phase,
    pub time_left: f64,
    pub group: String,
    pub emergency: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertView {
    pub severity: Severity,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub lane: Option<LaneId>,
    pub timestamp: f64,
}

impl From<&Alert> for AlertView {
    fn from(alert: &Alert) -> Self {
        Self {
            severity: alert.severity,
            message: alert.message.clone(),
            kind: alert.kind,
            lane: alert.lane.clone(),
            timestamp: alert.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedSnapshot {
    pub sequence: u64,
    pub timestamp: f64,
    /// Detector stream is interrupted; counts are not current
    pub stale: bool,
    pub metrics: SnapshotMetrics,
    /// Keyed by lane id: every lane of a group shows the group's signal
    pub signals: BTreeMap<LaneId, SignalView>,
    /// Most recent alerts, newest first
    pub alerts: Vec<AlertView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    pub controller: ControllerSummary,
    pub chart: ChartData,
}

impl PublishedSnapshot {
    /// Snapshot visible before the first tick.
    pub fn initial(signals: &[SignalState], controller: ControllerSummary) -> Self {
        Self {
            sequence: 0,
            timestamp: 0.0,
            stale: false,
            metrics: SnapshotMetrics::default(),
            signals: signal_views(signals),
            alerts: Vec::new(),
            frame: None,
            controller,
            chart: ChartData::default(),
        }
    }

    pub fn signal(&self, lane: &str) -> Option<&SignalView> {
        self.signals.get(lane)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Everything one tick contributes to a snapshot.
pub struct SnapshotParts<'a> {
    pub sequence: u64,
    pub timestamp: f64,
    pub stale: bool,
    pub fps: f64,
    pub analysis: &'a AnalysisOutput,
    pub signals: &'a [SignalState],
    pub recent_alerts: &'a [Alert],
    pub frame: Option<String>,
    pub controller: ControllerSummary,
    pub chart: ChartData,
}

impl SnapshotParts<'_> {
    pub fn build(self) -> PublishedSnapshot {
        let lane_stats = self
            .analysis
            .lanes
            .iter()
            .map(|l| (l.lane.clone(), LaneStats::from(l)))
            .collect();

        PublishedSnapshot {
            sequence: self.sequence,
            timestamp: self.timestamp,
            stale: self.stale,
            metrics: SnapshotMetrics {
                fps: round2(self.fps),
                vehicle_count: self.analysis.total_vehicles,
                person_count: self.analysis.total_persons,
                vehicle_types: self.analysis.vehicle_types,
                lane_stats,
            },
            signals: signal_views(self.signals),
            alerts: self.recent_alerts.iter().rev().map(AlertView::from).collect(),
            frame: self.frame,
            controller: self.controller,
            chart: self.chart,
        }
    }
}

fn signal_views(signals: &[SignalState]) -> BTreeMap<LaneId, SignalView> {
    let mut views = BTreeMap::new();
    for group in signals {
        for lane in &group.lanes {
            views.insert(
                lane.clone(),
                SignalView {
                    state: group.phase,
                    time_left: round2(group.time_left),
                    group: group.group.clone(),
                    emergency: group.emergency_flag,
                },
            );
        }
    }
    views
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// PUBLISHER
// ============================================================================

pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<PublishedSnapshot>>,
}

impl SnapshotPublisher {
    pub fn new(initial: PublishedSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    pub fn publish(&self, snapshot: PublishedSnapshot) -> Arc<PublishedSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    pub fn latest(&self) -> Arc<PublishedSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PublishedSnapshot>> {
        self.tx.subscribe()
    }
}
