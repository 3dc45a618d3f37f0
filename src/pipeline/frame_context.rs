// src/pipeline/frame_context.rs
//
// Everything one tick produces, in stage order. Every downstream step reads
// this tick's values from here instead of cached state from earlier ticks.

use crate::analysis::lane_assigner::{LaneAssignments, LaneLayout};
use crate::analysis::object_tracker::TrackerUpdate;
use crate::analysis::traffic_analyzer::AnalysisOutput;
use crate::control::SignalState;
use std::sync::Arc;

pub struct TickContext {
    pub tick: u64,
    pub timestamp: f64,
    /// Seconds since the previous tick, never negative
    pub dt: f64,
    /// No detector output this tick
    pub interrupted: bool,
    pub frame: Option<Vec<u8>>,
    /// Layout in force for the whole tick
    pub layout: Arc<LaneLayout>,

    pub tracker_update: TrackerUpdate,
    pub assignments: LaneAssignments,
    pub analysis: AnalysisOutput,
    pub signals: Vec<SignalState>,
}

impl TickContext {
    pub fn new(
        tick: u64,
        timestamp: f64,
        dt: f64,
        interrupted: bool,
        frame: Option<Vec<u8>>,
        layout: Arc<LaneLayout>,
    ) -> Self {
        Self {
            tick,
            timestamp,
            dt,
            interrupted,
            frame,
            layout,
            tracker_update: TrackerUpdate::default(),
            assignments: LaneAssignments::default(),
            analysis: AnalysisOutput::default(),
            signals: Vec::new(),
        }
    }

    pub fn vehicles_in_lanes(&self) -> usize {
        self.analysis.lanes.iter().map(|l| l.vehicle_count).sum()
    }
}
