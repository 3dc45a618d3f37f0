// src/control/signal_controller.rs
//
// Adaptive single-ring signal controller.
//
// State machine per lane group:
//   GREEN ──(time_left hits 0)──► YELLOW ──(yellow elapsed)──► RED
//     ▲                                                        │
//     └──────────── next group selected on the same tick ◄─────┘
//
// Exactly one group is GREEN or YELLOW at any time. A timer that reaches 0
// is published at 0 and the transition happens on the following tick.
//
// Selection precedence: emergency > fairness > rotation.

use crate::analysis::lane_assigner::{LaneId, LaneLayout};
use crate::analysis::traffic_analyzer::LaneSnapshot;
use crate::control::timing::SignalTiming;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Countdown residue below this is treated as expired.
const TIME_EPSILON: f64 = 1e-6;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Next group in configured order
    #[default]
    RoundRobin,
    /// Highest summed lane priority score among the other groups
    Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneGroupConfig {
    pub name: String,
    pub lanes: Vec<LaneId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub base_time: f64,
    pub per_vehicle_time: f64,
    pub min_green: f64,
    pub max_green: f64,
    pub yellow_time: f64,
    /// A group waiting longer than this is served next
    pub max_wait_time: f64,
    pub emergency_preemption: bool,
    /// Minimum GREEN granted to an emergency group
    pub emergency_hold: f64,
    /// Emergency clears after this long without an ambulance in the group
    pub emergency_grace: f64,
    /// Ticks a lane's last-known metrics are reused before falling back to zero
    pub metrics_stale_ticks: u32,
    pub rotation: RotationPolicy,
    /// Empty = every lane is its own group, in layout order
    pub groups: Vec<LaneGroupConfig>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            base_time: 10.0,
            per_vehicle_time: 2.0,
            min_green: 5.0,
            max_green: 45.0,
            yellow_time: 3.0,
            max_wait_time: 60.0,
            emergency_preemption: true,
            emergency_hold: 30.0,
            emergency_grace: 5.0,
            metrics_stale_ticks: 30, // ~1s at 30fps
            rotation: RotationPolicy::RoundRobin,
            groups: Vec::new(),
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Red,
    Yellow,
    Green,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Red => "red",
            Phase::Yellow => "yellow",
            Phase::Green => "green",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalState {
    pub group: String,
    pub lanes: Vec<LaneId>,
    pub phase: Phase,
    /// Seconds, never negative
    pub time_left: f64,
    /// Seconds since this group was last GREEN
    pub cumulative_wait: f64,
    pub emergency_flag: bool,
}

impl SignalState {
    fn red(group: String, lanes: Vec<LaneId>) -> Self {
        Self {
            group,
            lanes,
            phase: Phase::Red,
            time_left: 0.0,
            cumulative_wait: 0.0,
            emergency_flag: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionReason {
    Emergency,
    Fairness,
    Rotation,
    Priority,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    PhaseChanged {
        group: String,
        from: Phase,
        to: Phase,
        reason: Option<SelectionReason>,
        time_left: f64,
    },
    EmergencyStarted {
        group: String,
    },
    EmergencyCleared {
        group: String,
    },
    MetricsGap {
        lane: LaneId,
        missing_ticks: u32,
        /// true once the last-known value has expired and zero is used
        zeroed: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSummary {
    pub current_group: String,
    pub current_phase: Phase,
    pub time_left: f64,
    pub total_cycles: u64,
    pub emergency_active: bool,
    pub emergency_group: Option<String>,
    pub last_selection: Option<SelectionReason>,
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy)]
struct Emergency {
    group: usize,
    /// Controller clock of the latest ambulance sighting in the group
    last_seen: f64,
    granted: bool,
}

#[derive(Debug, Clone)]
struct LastKnown {
    snapshot: LaneSnapshot,
    missing_ticks: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupMetrics {
    vehicle_count: usize,
    ambulance: bool,
    score: f64,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct SignalController {
    config: SignalConfig,
    timing: SignalTiming,
    groups: Vec<SignalState>,
    /// Index of the group currently GREEN or YELLOW
    serving: usize,
    /// The initial GREEN is sized on the first tick, once counts exist
    initial_sizing: bool,
    emergency: Option<Emergency>,
    last_known: HashMap<LaneId, LastKnown>,
    clock: f64,
    total_cycles: u64,
    last_selection: Option<SelectionReason>,
    events: Vec<ControllerEvent>,
}

impl SignalController {
    pub fn new(config: SignalConfig, layout: &LaneLayout) -> Result<Self, PipelineError> {
        let timing = SignalTiming::from_config(&config)?;
        let groups = build_groups(&config, layout)?;

        let mut states: Vec<SignalState> = groups
            .into_iter()
            .map(|g| SignalState::red(g.name, g.lanes))
            .collect();
        states[0].phase = Phase::Green;
        states[0].time_left = timing.green_time(0);

        info!(
            "🚦 Signal controller ready: {} groups, rotation={:?}, green {:.0}-{:.0}s, yellow {:.0}s",
            states.len(),
            config.rotation,
            timing.min_green,
            timing.max_green,
            timing.yellow_time
        );

        Ok(Self {
            config,
            timing,
            groups: states,
            serving: 0,
            initial_sizing: true,
            emergency: None,
            last_known: HashMap::new(),
            clock: 0.0,
            total_cycles: 0,
            last_selection: None,
            events: Vec::new(),
        })
    }

    /// Advance the controller by `dt` seconds given this tick's lane metrics.
    pub fn tick(&mut self, lanes: &[LaneSnapshot], dt: f64) -> Vec<SignalState> {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        self.clock += dt;

        let metrics = self.group_metrics(lanes);

        if self.initial_sizing {
            self.initial_sizing = false;
            let green = self.timing.green_time(metrics[self.serving].vehicle_count);
            self.groups[self.serving].time_left = green;
            debug!(
                "🟢 Initial green for {} sized to {:.1}s",
                self.groups[self.serving].group, green
            );
        }

        for group in self.groups.iter_mut().filter(|g| g.phase != Phase::Green) {
            group.cumulative_wait += dt;
        }

        let expired = self.groups[self.serving].time_left <= 0.0;

        let granted_in_place =
            self.config.emergency_preemption && self.update_emergency(&metrics);

        let held = self.emergency_hold_active();
        if expired && !held {
            self.advance(&metrics);
        } else {
            let grace = self.timing.emergency_grace;
            let hold = self.timing.emergency_hold;
            let serving = &mut self.groups[self.serving];
            let left = serving.time_left - dt;
            serving.time_left = if left <= TIME_EPSILON { 0.0 } else { left };
            if granted_in_place {
                serving.time_left = serving.time_left.max(hold);
                info!(
                    "🚑 Emergency granted in place for {} ({:.1}s green)",
                    serving.group, serving.time_left
                );
            } else if held {
                serving.time_left = serving.time_left.max(grace);
            }
        }

        self.groups.clone()
    }

    // ========================================================================
    // METRICS
    // ========================================================================

    /// Per-group totals. Lanes missing this tick reuse their last-known
    /// snapshot for `metrics_stale_ticks`, then count as empty.
    fn group_metrics(&mut self, lanes: &[LaneSnapshot]) -> Vec<GroupMetrics> {
        let fresh: HashMap<&str, &LaneSnapshot> =
            lanes.iter().map(|l| (l.lane.as_str(), l)).collect();
        let stale_limit = self.config.metrics_stale_ticks;

        let mut out = vec![GroupMetrics::default(); self.groups.len()];
        for (gi, group) in self.groups.iter().enumerate() {
            for lane in &group.lanes {
                if let Some(snapshot) = fresh.get(lane.as_str()) {
                    if let Some(prev) = self.last_known.get(lane) {
                        if prev.missing_ticks > 0 {
                            info!(
                                "✅ Metrics for lane {} restored after {} ticks",
                                lane, prev.missing_ticks
                            );
                        }
                    }
                    self.last_known.insert(
                        lane.clone(),
                        LastKnown {
                            snapshot: (*snapshot).clone(),
                            missing_ticks: 0,
                        },
                    );
                    out[gi].vehicle_count += snapshot.vehicle_count;
                    out[gi].ambulance |= snapshot.ambulance_present;
                    out[gi].score += snapshot.priority_score();
                    continue;
                }

                let entry = self
                    .last_known
                    .entry(lane.clone())
                    .or_insert_with(|| LastKnown {
                        snapshot: LaneSnapshot::empty(lane.clone(), 0.0),
                        missing_ticks: 0,
                    });
                entry.missing_ticks += 1;
                let zeroed = entry.missing_ticks > stale_limit;

                if entry.missing_ticks == 1 {
                    warn!(
                        "⚠️  No metrics for lane {}, reusing last-known count {}",
                        lane, entry.snapshot.vehicle_count
                    );
                    self.events.push(ControllerEvent::MetricsGap {
                        lane: lane.clone(),
                        missing_ticks: 1,
                        zeroed: false,
                    });
                } else if entry.missing_ticks == stale_limit + 1 {
                    warn!(
                        "⚠️  Lane {} metrics missing for {} ticks, treating as empty",
                        lane, entry.missing_ticks
                    );
                    self.events.push(ControllerEvent::MetricsGap {
                        lane: lane.clone(),
                        missing_ticks: entry.missing_ticks,
                        zeroed: true,
                    });
                }

                // Last-known ambulance sightings are not reused
                if !zeroed {
                    out[gi].vehicle_count += entry.snapshot.vehicle_count;
                    out[gi].score += entry.snapshot.priority_score();
                }
            }
        }
        out
    }

    // ========================================================================
    // EMERGENCY
    // ========================================================================

    /// Returns true when the emergency starts in the group already GREEN.
    fn update_emergency(&mut self, metrics: &[GroupMetrics]) -> bool {
        let ambulance_groups: Vec<usize> = metrics
            .iter()
            .enumerate()
            .filter(|(_, m)| m.ambulance)
            .map(|(i, _)| i)
            .collect();

        match self.emergency {
            None => {
                let target = if ambulance_groups.contains(&self.serving) {
                    Some(self.serving)
                } else {
                    ambulance_groups.first().copied()
                };
                let Some(target) = target else {
                    return false;
                };

                warn!(
                    "🚑 Emergency preemption requested for group {}",
                    self.groups[target].group
                );
                self.events.push(ControllerEvent::EmergencyStarted {
                    group: self.groups[target].group.clone(),
                });
                self.groups[target].emergency_flag = true;

                let mut emergency = Emergency {
                    group: target,
                    last_seen: self.clock,
                    granted: false,
                };

                let serving = &mut self.groups[self.serving];
                if target == self.serving {
                    emergency.granted = serving.phase == Phase::Green;
                } else if serving.phase == Phase::Green {
                    // Cut the running green short; the full yellow still runs
                    info!(
                        "✂️  Truncating green of {} ({:.1}s left) for emergency",
                        serving.group, serving.time_left
                    );
                    serving.time_left = 0.0;
                }
                self.emergency = Some(emergency);
                emergency.granted
            }
            Some(mut emergency) => {
                if ambulance_groups.contains(&emergency.group) {
                    emergency.last_seen = self.clock;
                    self.emergency = Some(emergency);
                } else if self.clock - emergency.last_seen >= self.timing.emergency_grace {
                    let group = &mut self.groups[emergency.group];
                    group.emergency_flag = false;
                    info!(
                        "✅ Emergency cleared for group {} ({:.1}s green left)",
                        group.group, group.time_left
                    );
                    self.events.push(ControllerEvent::EmergencyCleared {
                        group: group.group.clone(),
                    });
                    self.emergency = None;
                }
                false
            }
        }
    }

    /// The emergency group is GREEN and its ambulance was seen this tick,
    /// so its green cannot drop below the grace window.
    fn emergency_hold_active(&self) -> bool {
        self.emergency.map_or(false, |e| {
            e.granted
                && e.group == self.serving
                && e.last_seen == self.clock
                && self.groups[e.group].phase == Phase::Green
        })
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    fn advance(&mut self, metrics: &[GroupMetrics]) {
        let current = self.serving;
        match self.groups[current].phase {
            Phase::Green => {
                let group = &mut self.groups[current];
                group.phase = Phase::Yellow;
                group.time_left = self.timing.yellow_time;
                debug!("🟡 {} → yellow", group.group);
                self.events.push(ControllerEvent::PhaseChanged {
                    group: group.group.clone(),
                    from: Phase::Green,
                    to: Phase::Yellow,
                    reason: None,
                    time_left: self.timing.yellow_time,
                });
            }
            Phase::Yellow => {
                let group = &mut self.groups[current];
                group.phase = Phase::Red;
                group.time_left = 0.0;
                debug!("🔴 {} → red", group.group);
                self.events.push(ControllerEvent::PhaseChanged {
                    group: group.group.clone(),
                    from: Phase::Yellow,
                    to: Phase::Red,
                    reason: None,
                    time_left: 0.0,
                });
                let (next, reason) = self.select_next(current, metrics);
                self.enter_green(next, reason, metrics);
            }
            Phase::Red => {
                let (next, reason) = self.select_next(current, metrics);
                self.enter_green(next, reason, metrics);
            }
        }
    }

    /// Candidate groups in rotation order after `outgoing`. The outgoing
    /// group is only a candidate when it is the only group.
    fn rotation_order(&self, outgoing: usize) -> Vec<usize> {
        let n = self.groups.len();
        if n == 1 {
            return vec![0];
        }
        (1..n).map(|step| (outgoing + step) % n).collect()
    }

    fn select_next(&self, outgoing: usize, metrics: &[GroupMetrics]) -> (usize, SelectionReason) {
        if let Some(emergency) = self.emergency {
            return (emergency.group, SelectionReason::Emergency);
        }

        let order = self.rotation_order(outgoing);

        // Fairness: longest wait above the limit; rotation order breaks ties
        let mut overdue: Option<usize> = None;
        for &idx in &order {
            let wait = self.groups[idx].cumulative_wait;
            if wait <= self.timing.max_wait_time {
                continue;
            }
            if overdue.map_or(true, |best| wait > self.groups[best].cumulative_wait) {
                overdue = Some(idx);
            }
        }
        if let Some(idx) = overdue {
            return (idx, SelectionReason::Fairness);
        }

        match self.config.rotation {
            RotationPolicy::RoundRobin => (order[0], SelectionReason::Rotation),
            RotationPolicy::Priority => {
                let mut best = order[0];
                for &idx in &order[1..] {
                    if metrics[idx].score > metrics[best].score {
                        best = idx;
                    }
                }
                (best, SelectionReason::Priority)
            }
        }
    }

    fn enter_green(&mut self, next: usize, reason: SelectionReason, metrics: &[GroupMetrics]) {
        let mut green = self.timing.green_time(metrics[next].vehicle_count);
        if let Some(emergency) = self.emergency.as_mut() {
            if emergency.group == next {
                green = green.max(self.timing.emergency_hold);
                emergency.granted = true;
            }
        }

        let waited = self.groups[next].cumulative_wait;
        let group = &mut self.groups[next];
        group.phase = Phase::Green;
        group.time_left = green;
        group.cumulative_wait = 0.0;

        self.serving = next;
        self.total_cycles += 1;
        self.last_selection = Some(reason);

        info!(
            "🟢 {} → green for {:.1}s ({:?}, waited {:.1}s)",
            group.group, green, reason, waited
        );
        self.events.push(ControllerEvent::PhaseChanged {
            group: group.group.clone(),
            from: Phase::Red,
            to: Phase::Green,
            reason: Some(reason),
            time_left: green,
        });
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn states(&self) -> &[SignalState] {
        &self.groups
    }

    pub fn signal_for_lane(&self, lane: &str) -> Option<&SignalState> {
        self.groups
            .iter()
            .find(|g| g.lanes.iter().any(|l| l == lane))
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency.is_some()
    }

    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn summary(&self) -> ControllerSummary {
        let serving = &self.groups[self.serving];
        ControllerSummary {
            current_group: serving.group.clone(),
            current_phase: serving.phase,
            time_left: serving.time_left,
            total_cycles: self.total_cycles,
            emergency_active: self.emergency.is_some(),
            emergency_group: self.emergency.map(|e| self.groups[e.group].group.clone()),
            last_selection: self.last_selection,
            rotation: self.config.rotation,
        }
    }
}

fn build_groups(
    config: &SignalConfig,
    layout: &LaneLayout,
) -> Result<Vec<LaneGroupConfig>, PipelineError> {
    if config.groups.is_empty() {
        if layout.lanes().is_empty() {
            return Err(PipelineError::config("no lanes to control"));
        }
        return Ok(layout
            .lanes()
            .iter()
            .map(|l| LaneGroupConfig {
                name: l.id.clone(),
                lanes: vec![l.id.clone()],
            })
            .collect());
    }

    let mut names = HashSet::new();
    let mut claimed: HashMap<&str, &str> = HashMap::new();
    for group in &config.groups {
        if !names.insert(group.name.as_str()) {
            return Err(PipelineError::config(format!(
                "duplicate signal group '{}'",
                group.name
            )));
        }
        if group.lanes.is_empty() {
            return Err(PipelineError::config(format!(
                "signal group '{}' has no lanes",
                group.name
            )));
        }
        for lane in &group.lanes {
            if layout.lane(lane).is_none() {
                return Err(PipelineError::config(format!(
                    "signal group '{}' references unknown lane '{}'",
                    group.name, lane
                )));
            }
            if let Some(other) = claimed.insert(lane.as_str(), group.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "lane '{}' is in both '{}' and '{}'",
                    lane, other, group.name
                )));
            }
        }
    }

    for lane in layout.lanes() {
        if !claimed.contains_key(lane.id.as_str()) {
            warn!("⚠️  Lane {} is not in any signal group", lane.id);
        }
    }

    Ok(config.groups.clone())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lane_assigner::{LaneConfig, LaneSetConfig, LayoutConfig};
    use crate::types::FrameConfig;

    fn layout_with(lanes: &[&str]) -> LaneLayout {
        let width = 1.0 / lanes.len() as f32;
        let config = LayoutConfig {
            lane_sets: vec![LaneSetConfig {
                name: "test".to_string(),
                lanes: lanes
                    .iter()
                    .enumerate()
                    .map(|(i, id)| {
                        let x1 = i as f32 * width;
                        let x2 = x1 + width;
                        LaneConfig {
                            id: id.to_string(),
                            polygon: vec![(x1, 0.0), (x2, 0.0), (x2, 1.0), (x1, 1.0)],
                            capacity: 12,
                        }
                    })
                    .collect(),
            }],
            ..LayoutConfig::default()
        };
        LaneLayout::from_config(&config, &FrameConfig::default()).unwrap()
    }

    fn controller(lanes: &[&str], config: SignalConfig) -> SignalController {
        SignalController::new(config, &layout_with(lanes)).unwrap()
    }

    fn snapshots(lanes: &[&str]) -> Vec<LaneSnapshot> {
        lanes
            .iter()
            .map(|l| LaneSnapshot::empty(l.to_string(), 0.0))
            .collect()
    }

    fn green_group(states: &[SignalState]) -> Option<&str> {
        states
            .iter()
            .find(|s| s.phase == Phase::Green)
            .map(|s| s.group.as_str())
    }

    fn assert_single_active(states: &[SignalState]) {
        let active = states.iter().filter(|s| s.phase != Phase::Red).count();
        assert_eq!(active, 1, "states: {:?}", states);
        assert!(states.iter().all(|s| s.time_left >= 0.0));
    }

    const NSEW: [&str; 4] = ["North", "South", "East", "West"];

    #[test]
    fn test_initial_green_sized_from_first_tick() {
        let mut c = controller(&["North", "South"], SignalConfig::default());
        let mut lanes = snapshots(&["North", "South"]);
        lanes[0].vehicle_count = 20;
        let states = c.tick(&lanes, 0.0);
        assert_eq!(states[0].phase, Phase::Green);
        assert_eq!(states[0].time_left, 45.0);
        assert_eq!(states[1].phase, Phase::Red);
    }

    #[test]
    fn test_round_robin_cycle_with_zero_before_transition() {
        let mut c = controller(&NSEW, SignalConfig::default());
        let lanes = snapshots(&NSEW);
        let mut prev = c.tick(&lanes, 0.0);
        let mut greens = vec![green_group(&prev).unwrap().to_string()];

        for _ in 0..2000 {
            let states = c.tick(&lanes, 0.1);
            assert_single_active(&states);
            for (before, after) in prev.iter().zip(states.iter()) {
                if before.phase != after.phase {
                    assert_eq!(before.time_left, 0.0, "{} left {} early", before.group, before.phase);
                }
            }
            if let Some(g) = green_group(&states) {
                if greens.last().map(String::as_str) != Some(g) {
                    greens.push(g.to_string());
                }
            }
            prev = states;
        }
        assert_eq!(&greens[..5], &["North", "South", "East", "West", "North"]);
    }

    #[test]
    fn test_yellow_runs_full_duration() {
        let mut c = controller(&["North", "South"], SignalConfig::default());
        let lanes = snapshots(&["North", "South"]);
        c.tick(&lanes, 0.0);
        let mut yellow_ticks = 0;
        for _ in 0..200 {
            let states = c.tick(&lanes, 0.1);
            if states[0].phase == Phase::Yellow {
                yellow_ticks += 1;
            }
            if states[1].phase == Phase::Green {
                break;
            }
        }
        // 3.0 published, then 30 countdown ticks down to 0
        assert_eq!(yellow_ticks, 31);
    }

    #[test]
    fn test_fairness_forces_overdue_group_next() {
        let mut c = controller(&NSEW, SignalConfig::default());
        let lanes = snapshots(&NSEW);
        c.tick(&lanes, 0.0);
        for _ in 0..20 {
            c.tick(&lanes, 0.1);
        }
        // North is mid-green; East has been waiting past the limit
        assert_eq!(green_group(c.states()), Some("North"));
        c.groups[2].cumulative_wait = 61.0;

        let mut next = None;
        for _ in 0..200 {
            let states = c.tick(&lanes, 0.1);
            match green_group(&states) {
                Some("North") | None => continue,
                Some(g) => {
                    next = Some(g.to_string());
                    break;
                }
            }
        }
        assert_eq!(next.as_deref(), Some("East"));
        assert_eq!(c.summary().last_selection, Some(SelectionReason::Fairness));
        assert_eq!(c.states()[2].cumulative_wait, 0.0);
    }

    #[test]
    fn test_cumulative_wait_grows_while_not_green() {
        let mut c = controller(&["North", "South"], SignalConfig::default());
        let lanes = snapshots(&["North", "South"]);
        c.tick(&lanes, 0.0);
        for _ in 0..10 {
            c.tick(&lanes, 0.5);
        }
        assert_eq!(c.states()[0].cumulative_wait, 0.0);
        assert!((c.states()[1].cumulative_wait - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_preempts_within_one_yellow() {
        let mut c = controller(&NSEW, SignalConfig::default());
        let mut lanes = snapshots(&NSEW);
        c.tick(&lanes, 0.0);
        for _ in 0..10 {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(green_group(c.states()), Some("North"));

        // Ambulance appears in West, which rotation would serve last
        lanes[3].vehicle_count = 1;
        lanes[3].ambulance_present = true;

        let mut elapsed = 0.0;
        let mut granted = false;
        for _ in 0..100 {
            let states = c.tick(&lanes, 0.1);
            assert_single_active(&states);
            elapsed += 0.1;
            if green_group(&states) == Some("West") {
                granted = true;
                assert!(states[3].emergency_flag);
                assert!(states[3].time_left >= 30.0);
                break;
            }
        }
        assert!(granted);
        assert!(elapsed <= 3.0 + 0.3 + 1e-9, "took {:.1}s", elapsed);
        assert_eq!(c.summary().last_selection, Some(SelectionReason::Emergency));

        let events = c.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ControllerEvent::EmergencyStarted { group } if group == "West")));
    }

    #[test]
    fn test_emergency_holds_then_clears() {
        let mut c = controller(&["North", "South"], SignalConfig::default());
        let mut lanes = snapshots(&["North", "South"]);
        c.tick(&lanes, 0.0);
        lanes[1].ambulance_present = true;
        lanes[1].vehicle_count = 1;

        for _ in 0..40 {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(green_group(c.states()), Some("South"));
        assert!(c.emergency_active());

        // Ambulance keeps appearing: green never drops below the grace window
        for _ in 0..400 {
            let states = c.tick(&lanes, 0.1);
            assert_eq!(states[1].phase, Phase::Green);
            assert!(states[1].time_left >= 5.0 - 1e-9);
        }

        // Ambulance gone: clears after the grace period
        lanes[1].ambulance_present = false;
        for _ in 0..49 {
            c.tick(&lanes, 0.1);
        }
        assert!(c.emergency_active());
        for _ in 0..2 {
            c.tick(&lanes, 0.1);
        }
        assert!(!c.emergency_active());
        assert!(!c.states()[1].emergency_flag);

        // Normal rotation resumes
        for _ in 0..100 {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(green_group(c.states()), Some("North"));
        assert_eq!(c.summary().last_selection, Some(SelectionReason::Rotation));
    }

    #[test]
    fn test_emergency_in_serving_group_extends_green_to_hold() {
        let mut c = controller(&["North", "South"], SignalConfig::default());
        let mut lanes = snapshots(&["North", "South"]);
        c.tick(&lanes, 0.0);
        while c.states()[0].time_left > 1.0 {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(c.states()[0].phase, Phase::Green);

        // One sighting in the group already GREEN
        lanes[0].ambulance_present = true;
        lanes[0].vehicle_count = 1;
        let states = c.tick(&lanes, 0.1);
        assert!(c.emergency_active());
        assert_eq!(states[0].phase, Phase::Green);
        assert!(states[0].time_left >= 30.0 - 1e-9);

        lanes[0].ambulance_present = false;
        let mut green_ticks = 1;
        while c.tick(&lanes, 0.1)[0].phase == Phase::Green {
            green_ticks += 1;
        }
        assert!(green_ticks as f64 * 0.1 >= 30.0 - 1e-6, "green lasted {} ticks", green_ticks);
        assert!(!c.emergency_active());
    }

    #[test]
    fn test_yellow_not_cut_short_by_emergency() {
        let mut c = controller(&["North", "South", "East"], SignalConfig::default());
        let mut lanes = snapshots(&["North", "South", "East"]);
        c.tick(&lanes, 0.0);
        // Run North into yellow
        while c.states()[0].phase == Phase::Green {
            c.tick(&lanes, 0.1);
        }
        c.tick(&lanes, 0.1);
        let left = c.states()[0].time_left;
        assert!(left > 0.0 && left < 3.0);

        lanes[2].ambulance_present = true;
        let states = c.tick(&lanes, 0.1);
        assert_eq!(states[0].phase, Phase::Yellow);
        assert!((states[0].time_left - (left - 0.1)).abs() < 1e-9);

        while c.states()[0].phase == Phase::Yellow {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(green_group(c.states()), Some("East"));
    }

    #[test]
    fn test_priority_rotation_picks_busiest_group() {
        let config = SignalConfig {
            rotation: RotationPolicy::Priority,
            ..SignalConfig::default()
        };
        let mut c = controller(&["North", "South", "East"], config);
        let mut lanes = snapshots(&["North", "South", "East"]);
        lanes[2].vehicle_count = 8;
        lanes[2].queue_length = 5;
        c.tick(&lanes, 0.0);
        while green_group(c.states()) == Some("North") || c.states()[0].phase == Phase::Yellow {
            c.tick(&lanes, 0.1);
        }
        assert_eq!(green_group(c.states()), Some("East"));
        assert_eq!(c.summary().last_selection, Some(SelectionReason::Priority));
        // 10 + 8*2
        assert_eq!(c.states()[2].time_left, 26.0);
    }

    #[test]
    fn test_missing_metrics_reuse_then_zero() {
        let config = SignalConfig {
            metrics_stale_ticks: 3,
            ..SignalConfig::default()
        };
        let mut c = controller(&["North", "South"], config);
        let mut lanes = snapshots(&["North", "South"]);
        lanes[1].vehicle_count = 7;
        c.tick(&lanes, 0.0);
        c.drain_events();

        let only_north = &lanes[..1];
        let m = c.group_metrics(only_north);
        assert_eq!(m[1].vehicle_count, 7);
        let events = c.drain_events();
        assert!(matches!(
            events.as_slice(),
            [ControllerEvent::MetricsGap { zeroed: false, .. }]
        ));

        c.group_metrics(only_north);
        c.group_metrics(only_north);
        let m = c.group_metrics(only_north);
        assert_eq!(m[1].vehicle_count, 0);
        let events = c.drain_events();
        assert!(matches!(
            events.as_slice(),
            [ControllerEvent::MetricsGap { zeroed: true, missing_ticks: 4, .. }]
        ));

        // Rotation never blocks on the gap
        for _ in 0..200 {
            c.tick(only_north, 0.1);
        }
        assert!(c.summary().total_cycles >= 1);
    }

    #[test]
    fn test_explicit_groups_validated() {
        let layout = layout_with(&NSEW);
        let grouped = |groups: Vec<(&str, Vec<&str>)>| SignalConfig {
            groups: groups
                .into_iter()
                .map(|(name, lanes)| LaneGroupConfig {
                    name: name.to_string(),
                    lanes: lanes.into_iter().map(String::from).collect(),
                })
                .collect(),
            ..SignalConfig::default()
        };

        let ok = grouped(vec![("NS", vec!["North", "South"]), ("EW", vec!["East", "West"])]);
        let c = SignalController::new(ok, &layout).unwrap();
        assert_eq!(c.states().len(), 2);
        assert_eq!(c.signal_for_lane("West").unwrap().group, "EW");

        let unknown = grouped(vec![("NS", vec!["North", "Up"])]);
        assert!(SignalController::new(unknown, &layout).is_err());

        let twice = grouped(vec![("A", vec!["North"]), ("B", vec!["North", "South"])]);
        assert!(SignalController::new(twice, &layout).is_err());
    }
}
