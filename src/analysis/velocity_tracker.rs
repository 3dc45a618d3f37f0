// src/analysis/velocity_tracker.rs

use crate::types::Point;
use std::collections::VecDeque;

/// Bounded (centroid, timestamp_s) history of one tracked object.
#[derive(Debug, Clone)]
pub struct CentroidHistory {
    samples: VecDeque<(Point, f64)>,
    history_size: usize,
}

impl CentroidHistory {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            samples: VecDeque::with_capacity(history_size),
            history_size,
        }
    }

    pub fn push(&mut self, centroid: Point, timestamp: f64) {
        self.samples.push_back((centroid, timestamp));

        if self.samples.len() > self.history_size {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<(Point, f64)> {
        self.samples.back().copied()
    }

    pub fn samples(&self) -> impl Iterator<Item = &(Point, f64)> {
        self.samples.iter()
    }

    /// Velocity over the entire history window, px/s.
    /// None until two samples at least 10ms apart exist.
    pub fn velocity(&self) -> Option<(f32, f32)> {
        if self.samples.len() < 2 {
            return None;
        }

        let (first_pt, first_ts) = *self.samples.front()?;
        let (last_pt, last_ts) = *self.samples.back()?;

        let delta_time = last_ts - first_ts;
        if delta_time > 0.01 {
            // Avoid division by near-zero
            let dt = delta_time as f32;
            Some(((last_pt.0 - first_pt.0) / dt, (last_pt.1 - first_pt.1) / dt))
        } else {
            None
        }
    }

    pub fn speed(&self) -> Option<f32> {
        self.velocity().map(|(vx, vy)| (vx * vx + vy * vy).sqrt())
    }

    /// Objects without enough history to estimate motion are not queued.
    pub fn is_stationary(&self, max_speed_px_per_sec: f32) -> bool {
        match self.speed() {
            Some(speed) => speed < max_speed_px_per_sec,
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_needs_two_samples() {
        let mut history = CentroidHistory::new(10);
        assert!(history.velocity().is_none());
        history.push((100.0, 100.0), 0.0);
        assert!(history.velocity().is_none());
        history.push((130.0, 100.0), 1.0);
        let (vx, vy) = history.velocity().unwrap();
        assert!((vx - 30.0).abs() < 1e-4);
        assert_eq!(vy, 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = CentroidHistory::new(3);
        for i in 0..10 {
            history.push((i as f32, 0.0), i as f64);
        }
        assert_eq!(history.len(), 3);
        // Window spans samples 7..=9
        let (vx, _) = history.velocity().unwrap();
        assert!((vx - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_stationary_detection() {
        let mut history = CentroidHistory::new(10);
        history.push((200.0, 200.0), 0.0);
        history.push((201.0, 200.0), 0.5);
        history.push((202.0, 201.0), 1.0);
        assert!(history.is_stationary(30.0));

        history.reset();
        history.push((200.0, 200.0), 0.0);
        history.push((300.0, 200.0), 1.0);
        assert!(!history.is_stationary(30.0));
    }

    #[test]
    fn test_near_zero_time_span_has_no_velocity() {
        let mut history = CentroidHistory::new(10);
        history.push((0.0, 0.0), 1.0);
        history.push((50.0, 0.0), 1.005);
        assert!(history.velocity().is_none());
        assert!(!history.is_stationary(30.0));
    }
}
