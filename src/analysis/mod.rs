// src/analysis/mod.rs
//
// Per-tick analysis stages.
//
// Signal flow:
//   Detections → object_tracker → lane_assigner → traffic_analyzer ─┬→ LaneSnapshot
//                                                                   └→ anomaly → Alert
//
// Driven once per tick by pipeline::orchestrator.

pub mod anomaly;
pub mod lane_assigner;
pub mod object_tracker;
pub mod traffic_analyzer;
pub mod velocity_tracker;

pub use anomaly::{Alert, AlertKind, AnomalyDetector, AnomalyPolicy, AnomalyRule, Severity};
pub use lane_assigner::{LaneAssigner, LaneAssignments, LaneId, LaneLayout, Polygon};
pub use object_tracker::{ObjectTracker, TrackId, TrackStatus, TrackedObject, TrackerUpdate};
pub use traffic_analyzer::{AnalysisOutput, CongestionLevel, LaneSnapshot, TrafficAnalyzer};
pub use velocity_tracker::CentroidHistory;
