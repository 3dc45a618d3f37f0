// src/analysis/anomaly.rs
//
// Rule-based anomaly detection. Every threshold lives in an `AnomalyPolicy`
// value; rules absent from the policy never fire. Each (rule, subject) pair
// is rate-limited by the rule's cooldown so a persistent condition produces
// one alert per cooldown window instead of one per frame.

use crate::analysis::lane_assigner::{LaneId, LaneLayout};
use crate::analysis::object_tracker::{TrackId, TrackedObject};
use crate::analysis::traffic_analyzer::LaneSnapshot;
use crate::error::PipelineError;
use crate::types::iou;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Accident,
    Crowd,
    AmbulanceDwell,
    ParkingViolation,
    AmbulanceDetected,
    Congestion,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Accident => "accident",
            AlertKind::Crowd => "crowd",
            AlertKind::AmbulanceDwell => "ambulance_dwell",
            AlertKind::ParkingViolation => "parking_violation",
            AlertKind::AmbulanceDetected => "ambulance_detected",
            AlertKind::Congestion => "congestion",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub lane: Option<LaneId>,
    pub timestamp: f64,
    /// Sequence of the snapshot published on the tick that raised it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<u64>,
}

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdScope {
    /// Persons counted per lane
    Lane,
    /// Persons counted across the whole frame
    Scene,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AnomalyRule {
    /// Two stationary vehicles whose boxes overlap for longer than `min_duration`
    Accident {
        min_iou: f32,
        min_duration: f64,
        severity: Severity,
        cooldown: f64,
    },
    Crowd {
        max_persons: usize,
        scope: CrowdScope,
        severity: Severity,
        cooldown: f64,
    },
    /// An ambulance that has been in view for too long is probably stuck
    AmbulanceDwell {
        max_dwell: f64,
        severity: Severity,
        cooldown: f64,
    },
    ParkingViolation {
        min_duration: f64,
        severity: Severity,
        cooldown: f64,
    },
    AmbulanceDetected {
        severity: Severity,
        cooldown: f64,
    },
    Congestion {
        max_vehicles: usize,
        severity: Severity,
        cooldown: f64,
    },
}

impl AnomalyRule {
    pub fn accident() -> Self {
        AnomalyRule::Accident {
            min_iou: 0.15,
            min_duration: 5.0,
            severity: Severity::Critical,
            cooldown: 10.0,
        }
    }

    pub fn crowd() -> Self {
        AnomalyRule::Crowd {
            max_persons: 12,
            scope: CrowdScope::Scene,
            severity: Severity::Medium,
            cooldown: 15.0,
        }
    }

    pub fn ambulance_dwell() -> Self {
        AnomalyRule::AmbulanceDwell {
            max_dwell: 45.0,
            severity: Severity::High,
            cooldown: 30.0,
        }
    }

    pub fn parking_violation() -> Self {
        AnomalyRule::ParkingViolation {
            min_duration: 120.0, // 2 minutes
            severity: Severity::Medium,
            cooldown: 60.0,
        }
    }

    pub fn ambulance_detected() -> Self {
        AnomalyRule::AmbulanceDetected {
            severity: Severity::Critical,
            cooldown: 30.0,
        }
    }

    pub fn congestion() -> Self {
        AnomalyRule::Congestion {
            max_vehicles: 10,
            severity: Severity::Medium,
            cooldown: 15.0,
        }
    }

    pub fn kind(&self) -> AlertKind {
        match self {
            AnomalyRule::Accident { .. } => AlertKind::Accident,
            AnomalyRule::Crowd { .. } => AlertKind::Crowd,
            AnomalyRule::AmbulanceDwell { .. } => AlertKind::AmbulanceDwell,
            AnomalyRule::ParkingViolation { .. } => AlertKind::ParkingViolation,
            AnomalyRule::AmbulanceDetected { .. } => AlertKind::AmbulanceDetected,
            AnomalyRule::Congestion { .. } => AlertKind::Congestion,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AnomalyRule::Accident { severity, .. }
            | AnomalyRule::Crowd { severity, .. }
            | AnomalyRule::AmbulanceDwell { severity, .. }
            | AnomalyRule::ParkingViolation { severity, .. }
            | AnomalyRule::AmbulanceDetected { severity, .. }
            | AnomalyRule::Congestion { severity, .. } => *severity,
        }
    }

    pub fn cooldown(&self) -> f64 {
        match self {
            AnomalyRule::Accident { cooldown, .. }
            | AnomalyRule::Crowd { cooldown, .. }
            | AnomalyRule::AmbulanceDwell { cooldown, .. }
            | AnomalyRule::ParkingViolation { cooldown, .. }
            | AnomalyRule::AmbulanceDetected { cooldown, .. }
            | AnomalyRule::Congestion { cooldown, .. } => *cooldown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyPolicy {
    pub rules: Vec<AnomalyRule>,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                AnomalyRule::accident(),
                AnomalyRule::crowd(),
                AnomalyRule::ambulance_dwell(),
                AnomalyRule::parking_violation(),
                AnomalyRule::ambulance_detected(),
                AnomalyRule::congestion(),
            ],
        }
    }
}

impl AnomalyPolicy {
    /// A policy that never fires.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn only(rules: Vec<AnomalyRule>) -> Self {
        Self { rules }
    }

    pub fn rule(&self, kind: AlertKind) -> Option<&AnomalyRule> {
        self.rules.iter().find(|r| r.kind() == kind)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            let kind = rule.kind();
            if !seen.insert(kind) {
                return Err(PipelineError::config(format!(
                    "anomaly rule '{}' configured twice",
                    kind
                )));
            }
            let cooldown = rule.cooldown();
            if !cooldown.is_finite() || cooldown < 0.0 {
                return Err(PipelineError::config(format!(
                    "anomaly rule '{}' has invalid cooldown {}",
                    kind, cooldown
                )));
            }
            let threshold_ok = match rule {
                AnomalyRule::Accident {
                    min_iou,
                    min_duration,
                    ..
                } => *min_iou > 0.0 && *min_iou <= 1.0 && min_duration.is_finite() && *min_duration >= 0.0,
                AnomalyRule::AmbulanceDwell { max_dwell, .. } => {
                    max_dwell.is_finite() && *max_dwell >= 0.0
                }
                AnomalyRule::ParkingViolation { min_duration, .. } => {
                    min_duration.is_finite() && *min_duration >= 0.0
                }
                AnomalyRule::Crowd { .. }
                | AnomalyRule::AmbulanceDetected { .. }
                | AnomalyRule::Congestion { .. } => true,
            };
            if !threshold_ok {
                return Err(PipelineError::config(format!(
                    "anomaly rule '{}' has invalid thresholds",
                    kind
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Everything one evaluation looks at, all from the current tick.
pub struct AnomalyInput<'a> {
    pub tracks: &'a [TrackedObject],
    pub lanes: &'a [LaneSnapshot],
    pub layout: &'a LaneLayout,
    /// track id → time the object stopped moving
    pub stationary_since: &'a HashMap<TrackId, f64>,
    pub timestamp: f64,
}

pub struct AnomalyDetector {
    policy: AnomalyPolicy,
    /// (lower id, higher id) → first tick both were overlapping and stopped
    overlap_since: HashMap<(TrackId, TrackId), f64>,
    last_fired: HashMap<(AlertKind, String), f64>,
    announced_ambulances: HashSet<TrackId>,
    total_fired: u64,
    total_suppressed: u64,
}

impl AnomalyDetector {
    pub fn new(policy: AnomalyPolicy) -> Self {
        Self {
            policy,
            overlap_since: HashMap::new(),
            last_fired: HashMap::new(),
            announced_ambulances: HashSet::new(),
            total_fired: 0,
            total_suppressed: 0,
        }
    }

    pub fn policy(&self) -> &AnomalyPolicy {
        &self.policy
    }

    pub fn evaluate(&mut self, input: &AnomalyInput) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let rules = self.policy.rules.clone();

        for rule in &rules {
            match rule {
                AnomalyRule::Accident {
                    min_iou,
                    min_duration,
                    ..
                } => self.check_accidents(input, rule, *min_iou, *min_duration, &mut alerts),
                AnomalyRule::Crowd {
                    max_persons, scope, ..
                } => self.check_crowd(input, rule, *max_persons, *scope, &mut alerts),
                AnomalyRule::AmbulanceDwell { max_dwell, .. } => {
                    self.check_ambulance_dwell(input, rule, *max_dwell, &mut alerts)
                }
                AnomalyRule::ParkingViolation { min_duration, .. } => {
                    self.check_parking(input, rule, *min_duration, &mut alerts)
                }
                AnomalyRule::AmbulanceDetected { .. } => {
                    self.check_new_ambulances(input, rule, &mut alerts)
                }
                AnomalyRule::Congestion { max_vehicles, .. } => {
                    self.check_congestion(input, rule, *max_vehicles, &mut alerts)
                }
            }
        }

        self.expire_cooldowns(input.timestamp);
        alerts
    }

    /// Cooldowns that can no longer suppress anything are dropped, so
    /// per-track subjects do not outlive their tracks.
    fn expire_cooldowns(&mut self, now: f64) {
        let policy = &self.policy;
        self.last_fired.retain(|(kind, _), last| {
            policy
                .rule(*kind)
                .map_or(false, |rule| now - *last < rule.cooldown())
        });
    }

    fn check_accidents(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        min_iou: f32,
        min_duration: f64,
        alerts: &mut Vec<Alert>,
    ) {
        let now = input.timestamp;
        // Tracks are sorted by id, so (a, b) keys are always (lower, higher)
        let stopped: Vec<&TrackedObject> = input
            .tracks
            .iter()
            .filter(|t| t.is_vehicle() && input.stationary_since.contains_key(&t.id))
            .collect();

        let mut still_overlapping = HashSet::new();
        for (i, a) in stopped.iter().enumerate() {
            for b in &stopped[i + 1..] {
                let overlap = iou(&a.bbox, &b.bbox);
                if overlap <= min_iou {
                    continue;
                }
                let key = (a.id, b.id);
                still_overlapping.insert(key);
                let since = *self.overlap_since.entry(key).or_insert_with(|| {
                    debug!(
                        "🔍 T{} and T{} overlapping while stopped (IoU={:.2})",
                        a.id, b.id, overlap
                    );
                    now
                });
                if now - since > min_duration {
                    let message = format!(
                        "⚠ COLLISION detected between vehicle #{} and #{} ({:.0}s)",
                        a.id,
                        b.id,
                        now - since
                    );
                    self.fire(
                        rule,
                        format!("T{}-T{}", a.id, b.id),
                        a.lane.clone(),
                        message,
                        now,
                        alerts,
                    );
                }
            }
        }
        self.overlap_since.retain(|k, _| still_overlapping.contains(k));
    }

    fn check_crowd(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        max_persons: usize,
        scope: CrowdScope,
        alerts: &mut Vec<Alert>,
    ) {
        match scope {
            CrowdScope::Scene => {
                let persons = input.tracks.iter().filter(|t| t.class.is_person()).count();
                if persons > max_persons {
                    let message = format!("Large crowd of {} pedestrians crossing", persons);
                    self.fire(rule, "scene".to_string(), None, message, input.timestamp, alerts);
                }
            }
            CrowdScope::Lane => {
                for lane in input.lanes {
                    if lane.person_count > max_persons {
                        let message = format!(
                            "Large crowd of {} pedestrians in {} lane",
                            lane.person_count, lane.lane
                        );
                        self.fire(
                            rule,
                            lane.lane.clone(),
                            Some(lane.lane.clone()),
                            message,
                            input.timestamp,
                            alerts,
                        );
                    }
                }
            }
        }
    }

    fn check_ambulance_dwell(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        max_dwell: f64,
        alerts: &mut Vec<Alert>,
    ) {
        for track in input.tracks.iter().filter(|t| t.class.is_ambulance()) {
            let dwell = track.dwell_time(input.timestamp);
            if dwell > max_dwell {
                let message = format!(
                    "🚑 Ambulance #{} in view for {:.0}s, possibly blocked",
                    track.id, dwell
                );
                self.fire(
                    rule,
                    format!("T{}", track.id),
                    track.lane.clone(),
                    message,
                    input.timestamp,
                    alerts,
                );
            }
        }
    }

    fn check_parking(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        min_duration: f64,
        alerts: &mut Vec<Alert>,
    ) {
        if input.layout.restricted_zones().is_empty() {
            return;
        }
        for track in input.tracks.iter().filter(|t| t.is_vehicle()) {
            let since = match input.stationary_since.get(&track.id) {
                Some(since) => *since,
                None => continue,
            };
            let stopped_for = input.timestamp - since;
            if stopped_for <= min_duration {
                continue;
            }
            if let Some(zone) = input.layout.in_restricted_zone(track.centroid) {
                let message = format!(
                    "Vehicle #{} stationary in restricted zone '{}' for {:.0}s",
                    track.id, zone.name, stopped_for
                );
                self.fire(
                    rule,
                    format!("T{}@{}", track.id, zone.name),
                    track.lane.clone(),
                    message,
                    input.timestamp,
                    alerts,
                );
            }
        }
    }

    fn check_new_ambulances(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        alerts: &mut Vec<Alert>,
    ) {
        for track in input.tracks.iter().filter(|t| t.class.is_ambulance()) {
            if !self.announced_ambulances.insert(track.id) {
                continue;
            }
            let lane_name = track.lane.as_deref().unwrap_or("unknown");
            let message = format!("🚑 AMBULANCE detected in {} lane!", lane_name);
            // Keyed by lane so a flickering ambulance does not re-alert
            self.fire(
                rule,
                lane_name.to_string(),
                track.lane.clone(),
                message,
                input.timestamp,
                alerts,
            );
        }
    }

    fn check_congestion(
        &mut self,
        input: &AnomalyInput,
        rule: &AnomalyRule,
        max_vehicles: usize,
        alerts: &mut Vec<Alert>,
    ) {
        for lane in input.lanes {
            if lane.vehicle_count > max_vehicles {
                let message = format!(
                    "Heavy congestion in {} lane ({} vehicles)",
                    lane.lane, lane.vehicle_count
                );
                self.fire(
                    rule,
                    lane.lane.clone(),
                    Some(lane.lane.clone()),
                    message,
                    input.timestamp,
                    alerts,
                );
            }
        }
    }

    fn fire(
        &mut self,
        rule: &AnomalyRule,
        subject: String,
        lane: Option<LaneId>,
        message: String,
        now: f64,
        alerts: &mut Vec<Alert>,
    ) {
        let kind = rule.kind();
        let key = (kind, subject);
        if let Some(last) = self.last_fired.get(&key) {
            if now - last < rule.cooldown() {
                self.total_suppressed += 1;
                return;
            }
        }
        self.last_fired.insert(key, now);
        self.total_fired += 1;

        let severity = rule.severity();
        if severity >= Severity::High {
            warn!("🚨 [{}] {}: {}", severity, kind, message);
        } else {
            info!("📢 [{}] {}: {}", severity, kind, message);
        }

        alerts.push(Alert {
            kind,
            severity,
            message,
            lane,
            timestamp: now,
            snapshot: None,
        });
    }

    /// Drop per-track bookkeeping for deregistered tracks.
    pub fn forget(&mut self, removed: &[TrackId]) {
        if removed.is_empty() {
            return;
        }
        self.overlap_since
            .retain(|(a, b), _| !removed.contains(a) && !removed.contains(b));
        for id in removed {
            self.announced_ambulances.remove(id);
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.total_fired, self.total_suppressed)
    }

    pub fn reset(&mut self) {
        self.overlap_since.clear();
        self.last_fired.clear();
        self.announced_ambulances.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lane_assigner::{LaneAssigner, LayoutConfig, RestrictedZoneConfig};
    use crate::analysis::object_tracker::{ObjectTracker, TrackerConfig};
    use crate::types::{Detection, FrameConfig, ObjectClass};

    fn layout(config: &LayoutConfig) -> LaneLayout {
        LaneLayout::from_config(config, &FrameConfig::default()).unwrap()
    }

    fn det(bbox: [f32; 4], class: ObjectClass) -> Detection {
        Detection {
            bbox,
            class,
            confidence: 0.9,
            timestamp: 0.0,
        }
    }

    fn run(
        detector: &mut AnomalyDetector,
        tracks: &[TrackedObject],
        layout: &LaneLayout,
        stationary: &HashMap<TrackId, f64>,
        now: f64,
    ) -> Vec<Alert> {
        detector.evaluate(&AnomalyInput {
            tracks,
            lanes: &[],
            layout,
            stationary_since: stationary,
            timestamp: now,
        })
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.rank(), 3);
    }

    #[test]
    fn test_accident_requires_persistent_overlap() {
        let layout = layout(&LayoutConfig::default());
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(
            &[
                det([100.0, 100.0, 200.0, 200.0], ObjectClass::Car),
                det([150.0, 100.0, 250.0, 200.0], ObjectClass::Truck),
            ],
            0.0,
        );
        let assignments = LaneAssigner::new().assign_all(tracker.tracks(), &layout);
        tracker.record_lanes(&assignments);
        let stationary: HashMap<TrackId, f64> = [(1, 0.0), (2, 0.0)].into_iter().collect();
        let mut detector = AnomalyDetector::new(AnomalyPolicy::only(vec![AnomalyRule::accident()]));

        for t in 0..=5 {
            let alerts = run(&mut detector, tracker.tracks(), &layout, &stationary, t as f64);
            assert!(alerts.is_empty(), "fired too early at t={}", t);
        }
        let alerts = run(&mut detector, tracker.tracks(), &layout, &stationary, 5.5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Accident);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].lane.as_deref(), Some("North"));
    }

    #[test]
    fn test_moving_vehicles_never_collide() {
        let layout = layout(&LayoutConfig::default());
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(
            &[
                det([100.0, 100.0, 200.0, 200.0], ObjectClass::Car),
                det([150.0, 100.0, 250.0, 200.0], ObjectClass::Car),
            ],
            0.0,
        );
        let stationary = HashMap::new();
        let mut detector = AnomalyDetector::new(AnomalyPolicy::only(vec![AnomalyRule::accident()]));
        for t in 0..20 {
            assert!(run(&mut detector, tracker.tracks(), &layout, &stationary, t as f64).is_empty());
        }
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let layout = layout(&LayoutConfig::default());
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let persons: Vec<Detection> = (0..13)
            .map(|i| {
                let x = 20.0 + i as f32 * 90.0;
                det([x, 300.0, x + 20.0, 360.0], ObjectClass::Person)
            })
            .collect();
        tracker.update(&persons, 0.0);
        let stationary = HashMap::new();
        let mut detector = AnomalyDetector::new(AnomalyPolicy::only(vec![AnomalyRule::crowd()]));

        assert_eq!(run(&mut detector, tracker.tracks(), &layout, &stationary, 0.0).len(), 1);
        assert!(run(&mut detector, tracker.tracks(), &layout, &stationary, 10.0).is_empty());
        assert_eq!(run(&mut detector, tracker.tracks(), &layout, &stationary, 15.0).len(), 1);
        assert_eq!(detector.stats(), (2, 1));
    }

    #[test]
    fn test_absent_rules_never_fire() {
        let layout = layout(&LayoutConfig::default());
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det([100.0, 100.0, 140.0, 140.0], ObjectClass::Ambulance)], 0.0);
        let stationary = HashMap::new();

        let mut detector = AnomalyDetector::new(AnomalyPolicy::disabled());
        assert!(run(&mut detector, tracker.tracks(), &layout, &stationary, 100.0).is_empty());

        let mut detector = AnomalyDetector::new(AnomalyPolicy::default());
        let alerts = run(&mut detector, tracker.tracks(), &layout, &stationary, 100.0);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::AmbulanceDetected));
        assert!(kinds.contains(&AlertKind::AmbulanceDwell));
    }

    #[test]
    fn test_ambulance_announced_once_per_track() {
        let layout = layout(&LayoutConfig::default());
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(&[det([100.0, 100.0, 140.0, 140.0], ObjectClass::Ambulance)], 0.0);
        let stationary = HashMap::new();
        let mut detector =
            AnomalyDetector::new(AnomalyPolicy::only(vec![AnomalyRule::ambulance_detected()]));

        assert_eq!(run(&mut detector, tracker.tracks(), &layout, &stationary, 0.0).len(), 1);
        // Well past the cooldown, same track: no repeat
        assert!(run(&mut detector, tracker.tracks(), &layout, &stationary, 100.0).is_empty());
    }

    #[test]
    fn test_parking_violation_in_restricted_zone() {
        let mut config = LayoutConfig::default();
        config.restricted_zones.push(RestrictedZoneConfig {
            name: "bus_stop".to_string(),
            polygon: vec![(0.0, 0.0), (0.2, 0.0), (0.2, 0.2), (0.0, 0.2)],
        });
        let layout = layout(&config);
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.update(
            &[
                det([40.0, 40.0, 80.0, 80.0], ObjectClass::Car),
                det([700.0, 400.0, 740.0, 440.0], ObjectClass::Car),
            ],
            0.0,
        );
        let stationary: HashMap<TrackId, f64> = [(1, 0.0), (2, 0.0)].into_iter().collect();
        let mut detector =
            AnomalyDetector::new(AnomalyPolicy::only(vec![AnomalyRule::parking_violation()]));

        assert!(run(&mut detector, tracker.tracks(), &layout, &stationary, 100.0).is_empty());
        let alerts = run(&mut detector, tracker.tracks(), &layout, &stationary, 121.0);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("bus_stop"));
    }

    #[test]
    fn test_cooldowns_expire_for_deregistered_tracks() {
        let mut config = LayoutConfig::default();
        config.restricted_zones.push(RestrictedZoneConfig {
            name: "bus_stop".to_string(),
            polygon: vec![(0.0, 0.0), (0.2, 0.0), (0.2, 0.2), (0.0, 0.2)],
        });
        let layout = layout(&config);
        let mut detector = AnomalyDetector::new(AnomalyPolicy::only(vec![
            AnomalyRule::ParkingViolation {
                min_duration: 20.0,
                severity: Severity::Medium,
                cooldown: 60.0,
            },
        ]));
        let mut tracker = ObjectTracker::new(TrackerConfig {
            max_staleness: 0,
            ..TrackerConfig::default()
        });

        // A fresh parked car every 100s, each one fires then disappears
        let mut fired = 0;
        for round in 0..20 {
            let start = round as f64 * 100.0;
            tracker.update(&[det([40.0, 40.0, 80.0, 80.0], ObjectClass::Car)], start);
            let id = tracker.tracks()[0].id;
            let stationary: HashMap<TrackId, f64> = [(id, start)].into_iter().collect();
            fired += run(&mut detector, tracker.tracks(), &layout, &stationary, start + 25.0).len();

            let update = tracker.update(&[], start + 26.0);
            detector.forget(&update.removed_ids());
            assert!(detector.last_fired.len() <= 1);
        }
        assert_eq!(fired, 20);

        // Once the cooldown has passed nothing is retained
        let empty = HashMap::new();
        run(&mut detector, &[], &layout, &empty, 5000.0);
        assert!(detector.last_fired.is_empty());
    }

    #[test]
    fn test_policy_validation() {
        assert!(AnomalyPolicy::default().validate().is_ok());

        let dup = AnomalyPolicy::only(vec![AnomalyRule::crowd(), AnomalyRule::crowd()]);
        assert!(dup.validate().is_err());

        let bad_iou = AnomalyPolicy::only(vec![AnomalyRule::Accident {
            min_iou: 0.0,
            min_duration: 5.0,
            severity: Severity::Critical,
            cooldown: 10.0,
        }]);
        assert!(bad_iou.validate().is_err());
    }

    #[test]
    fn test_policy_from_yaml() {
        let yaml = r#"
rules:
  - rule: congestion
    max_vehicles: 4
    severity: high
    cooldown: 5.0
  - rule: ambulance_detected
    severity: critical
    cooldown: 30.0
"#;
        let policy: AnomalyPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rule(AlertKind::Congestion).unwrap().severity(), Severity::High);
        assert!(policy.rule(AlertKind::Accident).is_none());
    }
}
