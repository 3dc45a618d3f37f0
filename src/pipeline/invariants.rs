// src/pipeline/invariants.rs
//
// Post-tick safety checks. A failure here is an internal fault, never a
// data problem: the orchestrator halts and logs the full state dump.

use crate::analysis::object_tracker::TrackedObject;
use crate::control::{Phase, SignalState};
use crate::error::PipelineError;
use std::collections::HashSet;
use tracing::error;

pub fn check(tick: u64, tracks: &[TrackedObject], signals: &[SignalState]) -> Result<(), PipelineError> {
    let Some(detail) = find_violation(tracks, signals) else {
        return Ok(());
    };

    let dump = serde_json::json!({
        "tick": tick,
        "violation": detail,
        "tracks": tracks,
        "signals": signals,
    });
    let dump = serde_json::to_string_pretty(&dump)
        .unwrap_or_else(|e| format!("<state dump failed: {}>", e));

    error!("💥 Invariant violation at tick {}: {}", tick, detail);
    error!("State dump:\n{}", dump);

    Err(PipelineError::InvariantViolation { tick, detail, dump })
}

fn find_violation(tracks: &[TrackedObject], signals: &[SignalState]) -> Option<String> {
    let mut ids = HashSet::with_capacity(tracks.len());
    for track in tracks {
        if !ids.insert(track.id) {
            return Some(format!("duplicate track id {}", track.id));
        }
    }

    let active: Vec<&str> = signals
        .iter()
        .filter(|s| s.phase != Phase::Red)
        .map(|s| s.group.as_str())
        .collect();
    if active.len() > 1 {
        return Some(format!("conflicting groups not red: {}", active.join(", ")));
    }

    for signal in signals {
        if !(signal.time_left >= 0.0) {
            return Some(format!(
                "group {} has invalid time_left {}",
                signal.group, signal.time_left
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::object_tracker::{ObjectTracker, TrackerConfig};
    use crate::types::{Detection, ObjectClass};

    fn signal(group: &str, phase: Phase, time_left: f64) -> SignalState {
        SignalState {
            group: group.to_string(),
            lanes: vec![group.to_string()],
            phase,
            time_left,
            cumulative_wait: 0.0,
            emergency_flag: false,
        }
    }

    fn tracks() -> Vec<TrackedObject> {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let dets: Vec<Detection> = [100.0, 400.0]
            .iter()
            .map(|&x| Detection {
                bbox: [x, 100.0, x + 40.0, 140.0],
                class: ObjectClass::Car,
                confidence: 0.9,
                timestamp: 0.0,
            })
            .collect();
        tracker.update(&dets, 0.0);
        tracker.tracks().to_vec()
    }

    #[test]
    fn test_healthy_state_passes() {
        let signals = vec![signal("North", Phase::Green, 4.0), signal("South", Phase::Red, 0.0)];
        assert!(check(1, &tracks(), &signals).is_ok());
    }

    #[test]
    fn test_two_active_groups_rejected() {
        let signals = vec![signal("North", Phase::Yellow, 1.0), signal("South", Phase::Green, 9.0)];
        match check(3, &tracks(), &signals) {
            Err(PipelineError::InvariantViolation { tick, detail, dump }) => {
                assert_eq!(tick, 3);
                assert!(detail.contains("North, South"));
                assert!(dump.contains("\"signals\""));
            }
            other => panic!("expected violation, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_time_left_rejected() {
        let signals = vec![signal("North", Phase::Green, -0.1)];
        assert!(check(1, &[], &signals).is_err());
    }

    #[test]
    fn test_duplicate_track_id_rejected() {
        let mut tracks = tracks();
        tracks[1].id = tracks[0].id;
        let err = check(1, &tracks, &[]).unwrap_err();
        assert!(err.to_string().contains("duplicate track id"));
    }
}
