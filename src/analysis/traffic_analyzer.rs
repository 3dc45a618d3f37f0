// src/analysis/traffic_analyzer.rs
//
// Aggregates lane-tagged tracks into per-lane metrics each tick and runs
// the anomaly policy over them.
//
// Wait time model: a vehicle starts its stationary clock the first tick its
// centroid speed drops below `stationary_speed`. The clock restarts whenever
// the vehicle changes lane (including leaving every lane) or moves again.

use crate::analysis::anomaly::{Alert, AnomalyDetector, AnomalyInput, AnomalyPolicy};
use crate::analysis::lane_assigner::{LaneAssignments, LaneId, LaneLayout};
use crate::analysis::object_tracker::{TrackId, TrackedObject};
use crate::types::ObjectClass;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Below this centroid speed (px/s) a vehicle counts as queued
    pub stationary_speed: f32,
    /// Seconds of per-lane count history kept for charts
    pub history_window: f64,
    /// Upper vehicle count of the "light" congestion band
    pub light_max: usize,
    /// Upper vehicle count of the "moderate" congestion band
    pub moderate_max: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            stationary_speed: 30.0,
            history_window: 60.0,
            light_max: 3,
            moderate_max: 8,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Free,
    Light,
    Moderate,
    Heavy,
}

impl CongestionLevel {
    pub fn from_count(count: usize, config: &AnalyzerConfig) -> Self {
        if count == 0 {
            CongestionLevel::Free
        } else if count <= config.light_max {
            CongestionLevel::Light
        } else if count <= config.moderate_max {
            CongestionLevel::Moderate
        } else {
            CongestionLevel::Heavy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionLevel::Free => "free",
            CongestionLevel::Light => "light",
            CongestionLevel::Moderate => "moderate",
            CongestionLevel::Heavy => "heavy",
        }
    }
}

/// Metrics of one lane at one tick. Rebuilt every tick.
#[derive(Debug, Clone, Serialize)]
pub struct LaneSnapshot {
    pub lane: LaneId,
    pub vehicle_count: usize,
    pub person_count: usize,
    pub ambulance_present: bool,
    /// vehicle_count / capacity, clamped to [0, 1]
    pub density_ratio: f32,
    pub queue_length: usize,
    pub avg_wait_time: f64,
    pub max_wait_time: f64,
    pub congestion_level: CongestionLevel,
    pub timestamp: f64,
}

impl LaneSnapshot {
    pub fn empty(lane: LaneId, timestamp: f64) -> Self {
        Self {
            lane,
            vehicle_count: 0,
            person_count: 0,
            ambulance_present: false,
            density_ratio: 0.0,
            queue_length: 0,
            avg_wait_time: 0.0,
            max_wait_time: 0.0,
            congestion_level: CongestionLevel::Free,
            timestamp,
        }
    }

    /// Ranking used by priority rotation. Emergencies are handled by the
    /// controller directly and add nothing here.
    pub fn priority_score(&self) -> f64 {
        self.vehicle_count as f64 * 2.0
            + self.density_ratio as f64 * 50.0
            + self.avg_wait_time * 0.5
            + self.queue_length as f64 * 3.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VehicleTypeCounts {
    pub car: usize,
    pub motorcycle: usize,
    pub bus: usize,
    pub truck: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOutput {
    /// One entry per lane, in layout order
    pub lanes: Vec<LaneSnapshot>,
    pub alerts: Vec<Alert>,
    pub vehicle_types: VehicleTypeCounts,
    pub total_vehicles: usize,
    pub total_persons: usize,
}

impl AnalysisOutput {
    pub fn lane(&self, id: &str) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|l| l.lane == id)
    }
}

#[derive(Debug, Clone)]
struct StationaryState {
    lane: Option<LaneId>,
    since: f64,
}

#[derive(Debug, Clone)]
struct ChartPoint {
    timestamp: f64,
    counts: BTreeMap<LaneId, usize>,
}

/// Rolling per-lane vehicle counts. `labels` are seconds before `now`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartData {
    pub labels: Vec<f64>,
    pub series: BTreeMap<LaneId, Vec<usize>>,
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct TrafficAnalyzer {
    config: AnalyzerConfig,
    anomaly: AnomalyDetector,
    stationary: HashMap<TrackId, StationaryState>,
    history: VecDeque<ChartPoint>,
}

impl TrafficAnalyzer {
    pub fn new(config: AnalyzerConfig, policy: AnomalyPolicy) -> Self {
        Self {
            config,
            anomaly: AnomalyDetector::new(policy),
            stationary: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn analyze(
        &mut self,
        tracks: &[TrackedObject],
        assignments: &LaneAssignments,
        layout: &LaneLayout,
        timestamp: f64,
    ) -> AnalysisOutput {
        self.update_stationary(tracks, assignments, timestamp);

        // ══════════════════════════════════════════════════════════════════
        // PER-LANE AGGREGATION
        // ══════════════════════════════════════════════════════════════════
        let index: HashMap<&str, usize> = layout
            .lanes()
            .iter()
            .enumerate()
            .map(|(i, l)| (l.id.as_str(), i))
            .collect();

        let mut lanes: Vec<LaneSnapshot> = layout
            .lanes()
            .iter()
            .map(|l| LaneSnapshot::empty(l.id.clone(), timestamp))
            .collect();
        let mut waits: Vec<Vec<f64>> = vec![Vec::new(); lanes.len()];

        let mut output = AnalysisOutput::default();

        for track in tracks {
            match track.class {
                ObjectClass::Car => output.vehicle_types.car += 1,
                ObjectClass::Motorcycle => output.vehicle_types.motorcycle += 1,
                ObjectClass::Bus => output.vehicle_types.bus += 1,
                ObjectClass::Truck => output.vehicle_types.truck += 1,
                ObjectClass::Person | ObjectClass::Ambulance => {}
            }
            if track.is_vehicle() {
                output.total_vehicles += 1;
            } else {
                output.total_persons += 1;
            }

            let idx = match assignments
                .lane_of(track.id)
                .and_then(|lane| index.get(lane.as_str()))
            {
                Some(idx) => *idx,
                None => continue,
            };
            let snapshot = &mut lanes[idx];

            if track.class.is_person() {
                snapshot.person_count += 1;
                continue;
            }

            snapshot.vehicle_count += 1;
            if track.class.is_ambulance() {
                snapshot.ambulance_present = true;
            }
            if let Some(state) = self.stationary.get(&track.id) {
                snapshot.queue_length += 1;
                waits[idx].push((timestamp - state.since).max(0.0));
            }
        }

        for (snapshot, (lane, lane_waits)) in lanes
            .iter_mut()
            .zip(layout.lanes().iter().zip(waits.iter()))
        {
            snapshot.density_ratio = if lane.capacity > 0 {
                (snapshot.vehicle_count as f32 / lane.capacity as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            if !lane_waits.is_empty() {
                snapshot.avg_wait_time = lane_waits.iter().sum::<f64>() / lane_waits.len() as f64;
                snapshot.max_wait_time = lane_waits.iter().cloned().fold(0.0, f64::max);
            }
            snapshot.congestion_level =
                CongestionLevel::from_count(snapshot.vehicle_count, &self.config);
        }

        // ══════════════════════════════════════════════════════════════════
        // ANOMALIES
        // ══════════════════════════════════════════════════════════════════
        let stationary_since: HashMap<TrackId, f64> = self
            .stationary
            .iter()
            .map(|(id, st)| (*id, st.since))
            .collect();
        output.alerts = self.anomaly.evaluate(&AnomalyInput {
            tracks,
            lanes: &lanes,
            layout,
            stationary_since: &stationary_since,
            timestamp,
        });

        self.record_history(&lanes, timestamp);
        output.lanes = lanes;
        output
    }

    fn update_stationary(
        &mut self,
        tracks: &[TrackedObject],
        assignments: &LaneAssignments,
        now: f64,
    ) {
        let live: HashSet<TrackId> = tracks.iter().map(|t| t.id).collect();
        self.stationary.retain(|id, _| live.contains(id));

        for track in tracks.iter().filter(|t| t.is_vehicle()) {
            let lane = assignments.lane_of(track.id).cloned();
            if !track.history.is_stationary(self.config.stationary_speed) {
                self.stationary.remove(&track.id);
                continue;
            }
            match self.stationary.get(&track.id) {
                Some(state) if state.lane == lane => {}
                Some(_) => {
                    debug!("⏱️  T{} changed lane while stopped, wait clock restarted", track.id);
                    self.stationary.insert(track.id, StationaryState { lane, since: now });
                }
                None => {
                    self.stationary.insert(track.id, StationaryState { lane, since: now });
                }
            }
        }
    }

    fn record_history(&mut self, lanes: &[LaneSnapshot], timestamp: f64) {
        self.history.push_back(ChartPoint {
            timestamp,
            counts: lanes
                .iter()
                .map(|l| (l.lane.clone(), l.vehicle_count))
                .collect(),
        });
        let cutoff = timestamp - self.config.history_window;
        while let Some(front) = self.history.front() {
            if front.timestamp < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Chart-ready series. Lanes missing from older points read as 0.
    pub fn chart_data(&self, now: f64) -> ChartData {
        let mut chart = ChartData::default();
        let mut lane_ids: Vec<&LaneId> = Vec::new();
        for point in &self.history {
            for lane in point.counts.keys() {
                if !lane_ids.contains(&lane) {
                    lane_ids.push(lane);
                }
            }
        }
        for point in &self.history {
            chart.labels.push(((now - point.timestamp) * 10.0).round() / 10.0);
            for lane in &lane_ids {
                chart
                    .series
                    .entry((*lane).clone())
                    .or_default()
                    .push(point.counts.get(*lane).copied().unwrap_or(0));
            }
        }
        chart
    }

    /// Drop bookkeeping for deregistered tracks.
    pub fn forget_tracks(&mut self, removed: &[TrackId]) {
        for id in removed {
            self.stationary.remove(id);
        }
        self.anomaly.forget(removed);
    }

    pub fn queued_count(&self) -> usize {
        self.stationary.len()
    }

    pub fn anomaly_stats(&self) -> (u64, u64) {
        self.anomaly.stats()
    }

    pub fn reset(&mut self) {
        self.stationary.clear();
        self.history.clear();
        self.anomaly.reset();
    }
}

// ============================================================================
// TESTS
// ============================================================================
