// src/main.rs
//
// Replay runner: feeds a JSON-lines detection recording through the
// pipeline, logs the outcome and optionally writes the incident log.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use traffic_signal_control::pipeline::{PipelineCommand, PipelineHandle, PipelineReport};
use traffic_signal_control::types::ReplayConfig;
use traffic_signal_control::{Config, FrameInput, PipelineOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("traffic_signal_control={}", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Traffic Signal Control starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Signal timing: base={:.0}s +{:.1}s/vehicle, green {:.0}-{:.0}s, yellow {:.0}s, max wait {:.0}s",
        config.signal.base_time,
        config.signal.per_vehicle_time,
        config.signal.min_green,
        config.signal.max_green,
        config.signal.yellow_time,
        config.signal.max_wait_time
    );

    let orchestrator = PipelineOrchestrator::new(config.clone())?;
    let handle = orchestrator.handle();

    let (frame_tx, frame_rx) = mpsc::channel::<FrameInput>(64);
    let (command_tx, command_rx) = mpsc::channel::<PipelineCommand>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = tokio::spawn(orchestrator.run(frame_rx, command_rx, shutdown_rx));
    let mut replay = tokio::spawn(replay_file(config.replay.clone(), frame_tx, command_tx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Ctrl-C received, stopping pipeline");
            replay.abort();
            shutdown_tx.send_replace(true);
        }
        result = &mut replay => match result {
            Ok(Ok(frames)) => info!("📼 Replay finished: {} frames sent", frames),
            Ok(Err(e)) => {
                error!("❌ Replay failed: {:#}", e);
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                error!("❌ Replay task aborted: {}", e);
                shutdown_tx.send_replace(true);
            }
        },
    }

    let report = pipeline.await.context("pipeline task panicked")??;
    print_report(&report, &handle);

    if let Some(path) = &config.replay.incident_output {
        let incidents = handle.incidents();
        let json = serde_json::to_string_pretty(incidents.as_ref())?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing incident log {}", path))?;
        info!("💾 {} incidents written to {}", incidents.len(), path);
    }

    Ok(())
}

async fn replay_file(
    replay: ReplayConfig,
    frames: mpsc::Sender<FrameInput>,
    commands: mpsc::Sender<PipelineCommand>,
) -> Result<u64> {
    let file = tokio::fs::File::open(&replay.input_path)
        .await
        .with_context(|| format!("opening replay {}", replay.input_path))?;
    info!(
        "📼 Replaying {} ({})",
        replay.input_path,
        if replay.realtime { "recorded pace" } else { "as fast as possible" }
    );

    let mut lines = BufReader::new(file).lines();
    let mut line_no: u64 = 0;
    let mut sent: u64 = 0;
    let mut clock: Option<(f64, tokio::time::Instant)> = None;

    let mut swaps = replay.layout_swaps.clone();
    swaps.sort_by(|a, b| a.at.total_cmp(&b.at));
    let mut swaps = swaps.into_iter().peekable();

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let input: FrameInput = match serde_json::from_str(line) {
            Ok(input) => input,
            Err(e) => {
                warn!("⚠️  Skipping malformed replay line {}: {}", line_no, e);
                continue;
            }
        };

        if replay.realtime {
            let (t0, started) =
                *clock.get_or_insert((input.timestamp, tokio::time::Instant::now()));
            let offset = (input.timestamp - t0).max(0.0);
            tokio::time::sleep_until(started + Duration::from_secs_f64(offset)).await;
        }

        // Due swaps are sent ahead of the frame that reaches their time
        while let Some(swap) = swaps.next_if(|s| s.at <= input.timestamp) {
            info!("🗺️  Requesting layout swap {:?} at t={:.1}s", swap.assignment, swap.at);
            if commands
                .send(PipelineCommand::SwapLayout(swap.assignment))
                .await
                .is_err()
            {
                warn!("Pipeline stopped accepting commands at line {}", line_no);
            }
        }

        if frames.send(input).await.is_err() {
            warn!("Pipeline stopped accepting frames at line {}", line_no);
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

fn print_report(report: &PipelineReport, handle: &PipelineHandle) {
    let m = &report.metrics;
    info!("\n========================================");
    info!("✓ Pipeline finished{}", if report.halted { " (HALTED)" } else { "" });
    info!("  Ticks processed: {}", report.ticks);
    info!(
        "  Interrupted ticks: {} ({:.1}%)",
        m.interrupted_ticks,
        100.0 * m.interrupted_ticks as f64 / report.ticks.max(1) as f64
    );
    info!(
        "  🚗 Tracks created: {} | removed: {}",
        m.tracks_created, m.tracks_removed
    );
    info!(
        "  🚦 Signal cycles: {} | phase changes: {} | current: {} {}",
        report.controller.total_cycles,
        m.phase_changes,
        report.controller.current_group,
        report.controller.current_phase
    );
    info!("  🚑 Emergency preemptions: {}", m.emergency_preemptions);
    info!(
        "  🚨 Alerts: {} ({} critical) | incidents logged: {}",
        m.alerts_raised, m.critical_alerts, report.incidents
    );
    if m.metrics_gaps > 0 {
        info!("  ⚠️  Lane metric gaps: {}", m.metrics_gaps);
    }
    if m.layout_swaps > 0 {
        info!("  🗺️  Layout swaps: {}", m.layout_swaps);
    }
    info!("  ⏱️  {:.0} ticks/s over {:.1}s", m.ticks_per_sec, m.elapsed_secs);

    let snapshot = handle.latest_snapshot();
    for (lane, stats) in &snapshot.metrics.lane_stats {
        let signal = snapshot
            .signal(lane)
            .map(|s| s.state.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            "  {:<8} {:>2} vehicles | queue {:>2} | wait {:>5.1}s | {:?} | signal {}",
            lane,
            stats.vehicle_count,
            stats.queue_length,
            stats.avg_wait_time,
            stats.congestion_level,
            signal
        );
    }
    info!("========================================\n");
}
