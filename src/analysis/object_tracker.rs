// src/analysis/object_tracker.rs
//
// Centroid-proximity multi-object tracker for fixed intersection cameras.
// Gives every physical object a stable id across frames so the analyzer can
// measure how long it has been waiting.
//
// Design:
//   - Greedy nearest-centroid matching (sufficient for the object counts a
//     single intersection view produces)
//   - Tracks coast through short detection gaps, then are deregistered
//   - Ids are monotonic and never reused, a returning object is a new track
//   - Each track keeps a bounded centroid history for velocity estimates

use crate::analysis::lane_assigner::{LaneAssignments, LaneId};
use crate::analysis::velocity_tracker::CentroidHistory;
use crate::types::{distance, BBox, Detection, ObjectClass, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How detections are paired with existing tracks.
///
/// Neither strategy is a globally optimal assignment. Under crossing
/// trajectories both can swap identities; they differ only in who gets
/// first pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingStrategy {
    /// Tracks in ascending id order each take their nearest unclaimed detection
    #[default]
    TrackOrderGreedy,
    /// All (track, detection) pairs sorted by distance, closest claimed first
    GlobalNearestGreedy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum centroid distance (px) for a detection to continue a track
    pub max_match_distance: f32,
    /// Ticks a track survives unmatched before deregistration
    pub max_staleness: u32,
    /// Centroid samples kept per track
    pub history_len: usize,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    pub matching: MatchingStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 80.0,
            max_staleness: 10, // ~0.3s at 30fps
            history_len: 10,
            min_confidence: 0.0,
            matching: MatchingStrategy::TrackOrderGreedy,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    New,
    Continuing,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedObject {
    pub id: TrackId,
    pub class: ObjectClass,
    pub centroid: Point,
    pub bbox: BBox,
    #[serde(skip)]
    pub history: CentroidHistory,
    /// Ticks alive
    pub age: u32,
    /// Ticks since last matched
    pub staleness: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub lane: Option<LaneId>,
    pub status: TrackStatus,
    pub last_confidence: f32,
}

impl TrackedObject {
    fn new(id: TrackId, det: &Detection, timestamp: f64, history_len: usize) -> Self {
        let centroid = det.center();
        let mut history = CentroidHistory::new(history_len);
        history.push(centroid, timestamp);
        Self {
            id,
            class: det.class,
            centroid,
            bbox: det.bbox,
            history,
            age: 1,
            staleness: 0,
            first_seen: timestamp,
            last_seen: timestamp,
            lane: None,
            status: TrackStatus::New,
            last_confidence: det.confidence,
        }
    }

    fn update_with_detection(&mut self, det: &Detection, timestamp: f64) {
        self.centroid = det.center();
        self.bbox = det.bbox;
        self.class = det.class;
        self.last_confidence = det.confidence;
        self.history.push(self.centroid, timestamp);
        self.staleness = 0;
        self.age += 1;
        self.last_seen = timestamp;
        self.status = TrackStatus::Continuing;
    }

    fn mark_missed(&mut self) {
        self.staleness += 1;
        self.age += 1;
        self.status = TrackStatus::Continuing;
    }

    pub fn is_vehicle(&self) -> bool {
        self.class.is_vehicle()
    }

    /// Seconds since first sighting
    pub fn dwell_time(&self, now: f64) -> f64 {
        (now - self.first_seen).max(0.0)
    }
}

/// What changed in one `update` call. The live set is read from the tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub new_ids: Vec<TrackId>,
    pub removed: Vec<TrackedObject>,
    pub matched: usize,
}

impl TrackerUpdate {
    pub fn removed_ids(&self) -> Vec<TrackId> {
        self.removed.iter().map(|t| t.id).collect()
    }
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

pub struct ObjectTracker {
    pub config: TrackerConfig,
    /// Always sorted by ascending id
    tracks: Vec<TrackedObject>,
    next_id: TrackId,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(64),
            next_id: 1,
        }
    }

    /// Process one tick of detections.
    pub fn update(&mut self, detections: &[Detection], timestamp: f64) -> TrackerUpdate {
        let valid: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .collect();

        // ══════════════════════════════════════════════════════════════════
        // MATCHING
        // ══════════════════════════════════════════════════════════════════
        let pairs = match self.config.matching {
            MatchingStrategy::TrackOrderGreedy => self.match_track_order(&valid),
            MatchingStrategy::GlobalNearestGreedy => self.match_global_nearest(&valid),
        };

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; valid.len()];
        for &(ti, di) in &pairs {
            matched_tracks[ti] = true;
            matched_dets[di] = true;
            self.tracks[ti].update_with_detection(valid[di], timestamp);
        }

        // ══════════════════════════════════════════════════════════════════
        // UNMATCHED TRACKS → COAST
        // ══════════════════════════════════════════════════════════════════
        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed();
            }
        }

        // ══════════════════════════════════════════════════════════════════
        // PRUNE STALE TRACKS
        // ══════════════════════════════════════════════════════════════════
        let max_staleness = self.config.max_staleness;
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.tracks.len());
        for mut track in self.tracks.drain(..) {
            if track.staleness > max_staleness {
                info!(
                    "🗑️  Track {} deregistered ({}, unmatched {} ticks)",
                    track.id, track.class, track.staleness
                );
                track.status = TrackStatus::Removed;
                removed.push(track);
            } else {
                kept.push(track);
            }
        }
        self.tracks = kept;

        // ══════════════════════════════════════════════════════════════════
        // UNMATCHED DETECTIONS → NEW TRACKS
        // ══════════════════════════════════════════════════════════════════
        let mut new_ids = Vec::new();
        for (di, matched) in matched_dets.iter().enumerate() {
            if *matched {
                continue;
            }
            let track = TrackedObject::new(
                self.next_id,
                valid[di],
                timestamp,
                self.config.history_len,
            );
            debug!(
                "🆕 New track T{} created: class={}, centroid=({:.0},{:.0})",
                track.id, track.class, track.centroid.0, track.centroid.1
            );
            new_ids.push(track.id);
            self.next_id += 1;
            self.tracks.push(track);
        }

        TrackerUpdate {
            new_ids,
            removed,
            matched: pairs.len(),
        }
    }

    /// Each track, in ascending id order, claims its nearest free detection.
    /// Equal distances keep the lower detection index.
    fn match_track_order(&self, valid: &[&Detection]) -> Vec<(usize, usize)> {
        let max_dist = self.config.max_match_distance;
        let mut claimed = vec![false; valid.len()];
        let mut pairs = Vec::new();

        for (ti, track) in self.tracks.iter().enumerate() {
            let mut best: Option<(usize, f32)> = None;
            for (di, det) in valid.iter().enumerate() {
                if claimed[di] {
                    continue;
                }
                let d = distance(track.centroid, det.center());
                if d > max_dist {
                    continue;
                }
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((di, d));
                }
            }
            if let Some((di, _)) = best {
                claimed[di] = true;
                pairs.push((ti, di));
            }
        }
        pairs
    }

    /// Closest pair over the whole frame first. Ties resolve by track then
    /// detection index so the result is deterministic.
    fn match_global_nearest(&self, valid: &[&Detection]) -> Vec<(usize, usize)> {
        let max_dist = self.config.max_match_distance;
        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in valid.iter().enumerate() {
                let d = distance(track.centroid, det.center());
                if d <= max_dist {
                    candidates.push((ti, di, d));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; valid.len()];
        let mut pairs = Vec::new();
        for (ti, di, _) in candidates {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;
            pairs.push((ti, di));
        }
        pairs
    }

    /// Write this tick's lane tags back onto the live tracks.
    pub fn record_lanes(&mut self, assignments: &LaneAssignments) {
        for track in &mut self.tracks {
            track.lane = assignments.lane_of(track.id).cloned();
        }
    }

    pub fn tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedObject> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| &self.tracks[idx])
    }

    pub fn ambulance_tracks(&self) -> Vec<&TrackedObject> {
        self.tracks
            .iter()
            .filter(|t| t.class.is_ambulance())
            .collect()
    }

    pub fn total_active(&self) -> usize {
        self.tracks.len()
    }

    /// Clears all tracks. Ids keep counting up so none is ever reused.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
