// src/pipeline/state.rs
//
// Ambient per-run bookkeeping: tick counter, stream clock, fps window and
// interruption status. Owned by the orchestrator and passed nowhere else.

use std::collections::VecDeque;
use tracing::warn;

const FPS_WINDOW: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    tick: u64,
    sequence: u64,
    last_timestamp: Option<f64>,
    recent_timestamps: VecDeque<f64>,
    /// Ticks since the detector last produced output (0 = live)
    missed_ticks: u64,
    halted: bool,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a tick at `timestamp` and return the controller's `dt`.
    /// The first tick, and any timestamp that goes backwards, yield 0.
    pub fn begin_tick(&mut self, timestamp: f64) -> f64 {
        self.tick += 1;
        let dt = match self.last_timestamp {
            None => 0.0,
            Some(prev) if timestamp >= prev => timestamp - prev,
            Some(prev) => {
                warn!(
                    "⏪ Timestamp went backwards ({:.3}s → {:.3}s), holding clock",
                    prev, timestamp
                );
                0.0
            }
        };
        if dt.is_finite() && timestamp.is_finite() {
            let clock = self.last_timestamp.map_or(timestamp, |prev| prev.max(timestamp));
            self.last_timestamp = Some(clock);
            self.recent_timestamps.push_back(clock);
            if self.recent_timestamps.len() > FPS_WINDOW {
                self.recent_timestamps.pop_front();
            }
            dt
        } else {
            0.0
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Returns true when this starts an interruption.
    pub fn mark_interrupted(&mut self) -> bool {
        self.missed_ticks += 1;
        self.missed_ticks == 1
    }

    /// Returns the length of the interruption that just ended, if any.
    pub fn mark_live(&mut self) -> Option<u64> {
        let missed = std::mem::take(&mut self.missed_ticks);
        (missed > 0).then_some(missed)
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    pub fn stale(&self) -> bool {
        self.missed_ticks > 0
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Frame rate over the recent stream timestamps.
    pub fn fps(&self) -> f64 {
        match (self.recent_timestamps.front(), self.recent_timestamps.back()) {
            (Some(first), Some(last)) if last - first > 1e-3 => {
                (self.recent_timestamps.len() - 1) as f64 / (last - first)
            }
            _ => 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dt_from_timestamps() {
        let mut state = PipelineState::new();
        assert_eq!(state.begin_tick(10.0), 0.0);
        assert!((state.begin_tick(10.5) - 0.5).abs() < 1e-12);
        assert_eq!(state.tick(), 2);
    }

    #[test]
    fn test_backwards_timestamp_holds_clock() {
        let mut state = PipelineState::new();
        state.begin_tick(5.0);
        assert_eq!(state.begin_tick(4.0), 0.0);
        assert_eq!(state.last_timestamp(), Some(5.0));
        assert!((state.begin_tick(5.2) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_fps_window() {
        let mut state = PipelineState::new();
        for i in 0..61 {
            state.begin_tick(i as f64 / 30.0);
        }
        assert!((state.fps() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_interruption_lifecycle() {
        let mut state = PipelineState::new();
        assert!(state.mark_interrupted());
        assert!(!state.mark_interrupted());
        assert!(state.stale());
        assert_eq!(state.mark_live(), Some(2));
        assert!(!state.stale());
        assert_eq!(state.mark_live(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = PipelineState::new();
        state.begin_tick(1.0);
        state.next_sequence();
        state.halt();
        state.reset();
        assert_eq!(state.tick(), 0);
        assert_eq!(state.sequence(), 0);
        assert!(!state.halted());
        assert_eq!(state.last_timestamp(), None);
    }
}
