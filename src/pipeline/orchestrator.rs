// src/pipeline/orchestrator.rs
//
// Runs the four stages once per tick, strictly downstream:
//
//   FrameInput → ObjectTracker → LaneAssigner → TrafficAnalyzer → SignalController
//                                                                      │
//   snapshot + incident log ◄── invariants ◄───────────────────────────┘
//
// All mutable state is owned here and touched by one tick at a time.
// Layout swaps are queued and applied at the start of the next tick.

use crate::analysis::anomaly::{Alert, Severity};
use crate::analysis::lane_assigner::{LaneAssigner, LaneLayout};
use crate::analysis::object_tracker::ObjectTracker;
use crate::analysis::traffic_analyzer::{LaneSnapshot, TrafficAnalyzer};
use crate::control::{ControllerEvent, ControllerSummary, SignalController, SignalState};
use crate::error::PipelineError;
use crate::pipeline::event_bus::{EventBus, PipelineEvent};
use crate::pipeline::frame_context::TickContext;
use crate::pipeline::incident_log::{IncidentList, IncidentLog, IncidentRecord, SnapshotRef};
use crate::pipeline::invariants;
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::pipeline::snapshot::{PublishedSnapshot, SnapshotParts, SnapshotPublisher};
use crate::pipeline::state::PipelineState;
use crate::types::{Config, FrameInput};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Rebuild the layout with `assignment[source] = lane_set`
    SwapLayout(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub sequence: u64,
    pub timestamp: f64,
    pub stale: bool,
    pub layout_version: u64,
    pub lanes: Vec<LaneSnapshot>,
    pub signals: Vec<SignalState>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub ticks: u64,
    pub last_sequence: u64,
    pub incidents: usize,
    pub halted: bool,
    pub metrics: MetricsSummary,
    pub controller: ControllerSummary,
}

/// Read side for viewers. Cheap to clone; never blocks the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    snapshots: watch::Receiver<Arc<PublishedSnapshot>>,
    incidents: watch::Receiver<IncidentList>,
    metrics: PipelineMetrics,
}

impl PipelineHandle {
    pub fn latest_snapshot(&self) -> Arc<PublishedSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Incident log in append order.
    pub fn incidents(&self) -> IncidentList {
        Arc::clone(&self.incidents.borrow())
    }

    pub fn snapshots(&self) -> watch::Receiver<Arc<PublishedSnapshot>> {
        self.snapshots.clone()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct PipelineOrchestrator {
    config: Config,
    layout: Arc<LaneLayout>,
    pending_layout: Option<Arc<LaneLayout>>,

    tracker: ObjectTracker,
    assigner: LaneAssigner,
    analyzer: TrafficAnalyzer,
    controller: SignalController,

    state: PipelineState,
    event_bus: EventBus,
    metrics: PipelineMetrics,
    snapshots: SnapshotPublisher,
    incidents: IncidentLog,
    recent_alerts: VecDeque<Alert>,
}

impl PipelineOrchestrator {
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;

        let layout = Arc::new(LaneLayout::from_config(&config.layout, &config.frame)?);
        let controller = SignalController::new(config.signal.clone(), &layout)?;
        let snapshots = SnapshotPublisher::new(PublishedSnapshot::initial(
            controller.states(),
            controller.summary(),
        ));

        info!(
            "🚦 Pipeline ready: {} lanes, {} signal groups, {} anomaly rules",
            layout.lanes().len(),
            controller.states().len(),
            config.anomaly.rules.len()
        );

        Ok(Self {
            tracker: ObjectTracker::new(config.tracker.clone()),
            assigner: LaneAssigner::new(),
            analyzer: TrafficAnalyzer::new(config.analyzer.clone(), config.anomaly.clone()),
            controller,
            state: PipelineState::new(),
            event_bus: EventBus::new(config.pipeline.event_bus_capacity),
            metrics: PipelineMetrics::new(),
            snapshots,
            incidents: IncidentLog::new(),
            recent_alerts: VecDeque::new(),
            layout,
            pending_layout: None,
            config,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            snapshots: self.snapshots.subscribe(),
            incidents: self.incidents.subscribe(),
            metrics: self.metrics.clone(),
        }
    }

    /// Layout currently in force.
    pub fn layout(&self) -> Arc<LaneLayout> {
        Arc::clone(&self.layout)
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.event_bus.drain()
    }

    /// Validate and queue a new source → lane-set assignment. It takes
    /// effect at the start of the next tick; a later request replaces an
    /// earlier one that has not been applied yet.
    pub fn request_layout_swap(&mut self, assignment: Vec<usize>) -> Result<(), PipelineError> {
        let base = self
            .pending_layout
            .as_ref()
            .unwrap_or(&self.layout)
            .version();
        let layout = LaneLayout::build(
            &self.config.layout,
            &self.config.frame,
            &assignment,
            base + 1,
        )?;
        info!(
            "🔀 Layout swap queued: v{} assignment={:?}",
            layout.version(),
            assignment
        );
        self.pending_layout = Some(Arc::new(layout));
        Ok(())
    }

    fn apply_pending_layout(&mut self) {
        let Some(layout) = self.pending_layout.take() else {
            return;
        };
        info!(
            "🗺️  Layout v{} → v{} active",
            self.layout.version(),
            layout.version()
        );
        self.event_bus.publish(PipelineEvent::LayoutSwapped {
            version: layout.version(),
            assignment: layout.assignment().to_vec(),
        });
        self.metrics.inc(&self.metrics.layout_swaps);
        self.layout = layout;
    }

    // ========================================================================
    // TICK
    // ========================================================================

    pub fn tick(&mut self, input: FrameInput) -> Result<TickReport, PipelineError> {
        if self.state.halted() {
            return Err(PipelineError::Halted);
        }
        let started = Instant::now();
        self.apply_pending_layout();

        let FrameInput {
            timestamp,
            detections,
            frame,
        } = input;
        let dt = self.state.begin_tick(timestamp);
        let mut ctx = TickContext::new(
            self.state.tick(),
            timestamp,
            dt,
            detections.is_none(),
            frame,
            Arc::clone(&self.layout),
        );

        let detections = match detections {
            Some(detections) => {
                if let Some(missed) = self.state.mark_live() {
                    info!("📶 Detector stream restored after {} ticks", missed);
                    self.event_bus.publish(PipelineEvent::StreamRestored {
                        tick: ctx.tick,
                        timestamp,
                        missed_ticks: missed,
                    });
                }
                detections
            }
            None => {
                if self.state.mark_interrupted() {
                    warn!(
                        "📵 Detector stream interrupted at {:.2}s, treating as zero detections",
                        timestamp
                    );
                    self.event_bus.publish(PipelineEvent::StreamInterrupted {
                        tick: ctx.tick,
                        timestamp,
                    });
                }
                self.metrics.inc(&self.metrics.interrupted_ticks);
                Vec::new()
            }
        };

        // ══════════════════════════════════════════════════════════════════
        // STAGE 1: TRACKING
        // ══════════════════════════════════════════════════════════════════
        ctx.tracker_update = self.tracker.update(&detections, timestamp);
        self.metrics.add(
            &self.metrics.tracks_created,
            ctx.tracker_update.new_ids.len() as u64,
        );
        if !ctx.tracker_update.removed.is_empty() {
            let ids = ctx.tracker_update.removed_ids();
            self.analyzer.forget_tracks(&ids);
            self.metrics.add(&self.metrics.tracks_removed, ids.len() as u64);
            self.event_bus.publish(PipelineEvent::TracksRemoved { ids });
        }

        // ══════════════════════════════════════════════════════════════════
        // STAGE 2: LANE ASSIGNMENT
        // ══════════════════════════════════════════════════════════════════
        ctx.assignments = self.assigner.assign_all(self.tracker.tracks(), &ctx.layout);
        self.tracker.record_lanes(&ctx.assignments);

        // ══════════════════════════════════════════════════════════════════
        // STAGE 3: ANALYSIS
        // ══════════════════════════════════════════════════════════════════
        ctx.analysis = self.analyzer.analyze(
            self.tracker.tracks(),
            &ctx.assignments,
            &ctx.layout,
            timestamp,
        );

        // ══════════════════════════════════════════════════════════════════
        // STAGE 4: SIGNAL CONTROL
        // ══════════════════════════════════════════════════════════════════
        ctx.signals = self.controller.tick(&ctx.analysis.lanes, dt);
        for event in self.controller.drain_events() {
            match &event {
                ControllerEvent::PhaseChanged { .. } => {
                    self.metrics.inc(&self.metrics.phase_changes)
                }
                ControllerEvent::EmergencyStarted { .. } => {
                    self.metrics.inc(&self.metrics.emergency_preemptions)
                }
                ControllerEvent::MetricsGap { .. } => self.metrics.inc(&self.metrics.metrics_gaps),
                ControllerEvent::EmergencyCleared { .. } => {}
            }
            self.event_bus.publish(PipelineEvent::Controller(event));
        }

        if let Err(err) = invariants::check(ctx.tick, self.tracker.tracks(), &ctx.signals) {
            // Nothing is published for this tick, but its alerts still reach
            // the incident log on shutdown.
            self.record_alerts(&mut ctx, None);
            self.state.halt();
            self.metrics.inc(&self.metrics.invariant_violations);
            return Err(err);
        }

        let sequence = self.state.next_sequence();
        self.record_alerts(&mut ctx, Some(sequence));
        self.publish_snapshot(&ctx, sequence);
        self.incidents.flush();

        self.metrics.inc(&self.metrics.total_ticks);
        self.metrics
            .set_timing(&self.metrics.tick_time_us, started.elapsed().as_micros() as u64);

        let every = self.config.pipeline.diagnostics_every_n_ticks;
        if every > 0 && ctx.tick % every == 0 {
            self.log_diagnostics(&ctx);
        }

        Ok(TickReport {
            tick: ctx.tick,
            sequence,
            timestamp,
            stale: self.state.stale(),
            layout_version: ctx.layout.version(),
            lanes: ctx.analysis.lanes,
            signals: ctx.signals,
            alerts: ctx.analysis.alerts,
        })
    }

    /// A tick with no detector output.
    pub fn interrupted_tick(&mut self, timestamp: f64) -> Result<TickReport, PipelineError> {
        self.tick(FrameInput::interrupted(timestamp))
    }

    fn record_alerts(&mut self, ctx: &mut TickContext, sequence: Option<u64>) {
        let attach_min = self.config.pipeline.attach_frame_min_severity;
        for alert in &mut ctx.analysis.alerts {
            alert.snapshot = sequence;
            let snapshot = sequence.map(|seq| {
                let frame = ctx
                    .frame
                    .as_deref()
                    .filter(|_| alert.severity >= attach_min);
                SnapshotRef::new(seq, frame)
            });
            self.incidents
                .append(IncidentRecord::from_alert(alert, snapshot));

            self.metrics.inc(&self.metrics.alerts_raised);
            if alert.severity == Severity::Critical {
                self.metrics.inc(&self.metrics.critical_alerts);
            }
            self.recent_alerts.push_back(alert.clone());
        }
        while self.recent_alerts.len() > self.config.pipeline.max_published_alerts {
            self.recent_alerts.pop_front();
        }
    }

    fn publish_snapshot(&mut self, ctx: &TickContext, sequence: u64) {
        let snapshot = SnapshotParts {
            sequence,
            timestamp: ctx.timestamp,
            stale: self.state.stale(),
            fps: self.state.fps(),
            analysis: &ctx.analysis,
            signals: &ctx.signals,
            recent_alerts: self.recent_alerts.make_contiguous(),
            frame: ctx.frame.as_deref().map(|bytes| BASE64.encode(bytes)),
            controller: self.controller.summary(),
            chart: self.analyzer.chart_data(ctx.timestamp),
        }
        .build();
        self.snapshots.publish(snapshot);
    }

    fn log_diagnostics(&self, ctx: &TickContext) {
        let summary = self.controller.summary();
        let (fired, suppressed) = self.analyzer.anomaly_stats();
        info!(
            "📊 Tick {} | t={:.1}s | {} tracks ({} unzoned) | {} vehicles in lanes | {} queued | {:.1} fps{}",
            ctx.tick,
            ctx.timestamp,
            self.tracker.total_active(),
            ctx.assignments.unzoned.len(),
            ctx.vehicles_in_lanes(),
            self.analyzer.queued_count(),
            self.state.fps(),
            if self.state.stale() { " | STALE" } else { "" }
        );
        info!(
            "   🚦 {} {} ({:.1}s left) | cycles={} | emergency={}",
            summary.current_group,
            summary.current_phase,
            summary.time_left,
            summary.total_cycles,
            summary
                .emergency_group
                .as_deref()
                .unwrap_or("none")
        );
        info!(
            "   🚨 alerts fired={} suppressed={} | incidents={} | events pending={} dropped={}",
            fired,
            suppressed,
            self.incidents.len(),
            self.event_bus.pending_count(),
            self.event_bus.dropped_count()
        );
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Flush pending incidents and publish a final stale snapshot.
    pub fn shutdown(&mut self) -> PipelineReport {
        let flushed = self.incidents.flush();
        if flushed > 0 {
            debug!("📝 Flushed {} pending incidents on shutdown", flushed);
        }

        let mut last = (*self.snapshots.latest()).clone();
        last.sequence = self.state.next_sequence();
        last.stale = true;
        last.controller = self.controller.summary();
        self.snapshots.publish(last);

        let report = PipelineReport {
            ticks: self.state.tick(),
            last_sequence: self.state.sequence(),
            incidents: self.incidents.len(),
            halted: self.state.halted(),
            metrics: self.metrics.summary(),
            controller: self.controller.summary(),
        };

        info!(
            "🏁 Pipeline stopped after {} ticks: {} incidents ({} critical), {} signal cycles{}",
            report.ticks,
            report.incidents,
            self.incidents.count_at_least(Severity::Critical),
            report.controller.total_cycles,
            if report.halted { ", HALTED" } else { "" }
        );
        report
    }

    /// Pull frames until the input closes or shutdown is signalled. A frame
    /// gap longer than `interruption_timeout_ms` runs an interrupted tick.
    /// A dropped shutdown sender counts as a shutdown request.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<FrameInput>,
        mut commands: mpsc::Receiver<PipelineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineReport, PipelineError> {
        let wait = Duration::from_millis(self.config.pipeline.interruption_timeout_ms.max(1));
        let mut commands_open = true;
        info!("▶️  Pipeline running (interruption timeout {:?})", wait);

        loop {
            if *shutdown.borrow() {
                info!("🛑 Shutdown requested");
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("🛑 Shutdown channel closed");
                        break;
                    }
                }

                command = commands.recv(), if commands_open => match command {
                    Some(PipelineCommand::SwapLayout(assignment)) => {
                        if let Err(e) = self.request_layout_swap(assignment) {
                            warn!("❌ Layout swap rejected: {}", e);
                        }
                    }
                    None => commands_open = false,
                },

                next = tokio::time::timeout(wait, frames.recv()) => {
                    let result = match next {
                        Ok(Some(input)) => self.tick(input),
                        Ok(None) => {
                            info!("📭 Input channel closed");
                            break;
                        }
                        Err(_) => {
                            let timestamp = self.state.last_timestamp().unwrap_or(0.0)
                                + wait.as_secs_f64();
                            self.interrupted_tick(timestamp)
                        }
                    };
                    if let Err(err) = result {
                        error!("❌ Pipeline halted: {}", err);
                        self.shutdown();
                        return Err(err);
                    }
                }
            }

            for event in self.event_bus.drain() {
                debug!("📣 {:?}", event);
            }
        }

        Ok(self.shutdown())
    }
}

// ============================================================================
// TESTS
// ============================================================================
