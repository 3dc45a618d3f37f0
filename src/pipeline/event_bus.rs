// src/pipeline/event_bus.rs
//
// Decoupled event system. Stages publish events instead of reaching into
// each other's state; the run loop drains them once per tick.

use crate::analysis::object_tracker::TrackId;
use crate::control::ControllerEvent;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    Controller(ControllerEvent),

    StreamInterrupted {
        tick: u64,
        timestamp: f64,
    },

    StreamRestored {
        tick: u64,
        timestamp: f64,
        /// Consecutive ticks without detector output
        missed_ticks: u64,
    },

    LayoutSwapped {
        version: u64,
        assignment: Vec<usize>,
    },

    TracksRemoved {
        ids: Vec<TrackId>,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
