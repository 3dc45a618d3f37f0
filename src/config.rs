// src/config.rs

use crate::analysis::lane_assigner::LaneLayout;
use crate::control::{SignalController, SignalTiming};
use crate::error::PipelineError;
use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Every startup check. Nothing here is retried: a bad config never
    /// reaches the first tick.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.frame.width > 0.0 && self.frame.height > 0.0) {
            return Err(PipelineError::config(format!(
                "frame size must be positive, got {}x{}",
                self.frame.width, self.frame.height
            )));
        }

        if !(self.tracker.max_match_distance > 0.0) {
            return Err(PipelineError::config(
                "tracker.max_match_distance must be positive",
            ));
        }
        if self.tracker.history_len < 2 {
            return Err(PipelineError::config(
                "tracker.history_len must be at least 2 to estimate velocity",
            ));
        }
        if self.analyzer.light_max > self.analyzer.moderate_max {
            return Err(PipelineError::config(
                "analyzer.light_max must not exceed analyzer.moderate_max",
            ));
        }

        self.anomaly.validate()?;
        SignalTiming::from_config(&self.signal)?;

        let layout = LaneLayout::from_config(&self.layout, &self.frame)?;
        SignalController::new(self.signal.clone(), &layout)?;

        for swap in &self.replay.layout_swaps {
            if !swap.at.is_finite() {
                return Err(PipelineError::config("replay.layout_swaps: `at` must be finite"));
            }
            LaneLayout::build(&self.layout, &self.frame, &swap.assignment, 0).map_err(|e| {
                PipelineError::config(format!("replay.layout_swaps at {}s: {}", swap.at, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_green_bounds_rejected() {
        let mut config = Config::default();
        config.signal.min_green = 50.0;
        config.signal.max_green = 45.0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_yaml_partial_sections_fall_back_to_defaults() {
        let yaml = r#"
signal:
  base_time: 12.0
  yellow_time: 4.0
tracker:
  max_match_distance: 60.0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.signal.base_time, 12.0);
        assert_eq!(config.signal.max_green, 45.0);
        assert_eq!(config.tracker.max_staleness, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_config_loads() {
        let config = Config::load("config.yaml").unwrap();
        let layout = LaneLayout::from_config(&config.layout, &config.frame).unwrap();
        assert_eq!(layout.lane_ids(), vec!["North", "South", "East", "West"]);
        assert_eq!(layout.restricted_zones().len(), 1);
        assert_eq!(config.anomaly.rules.len(), 6);
        assert_eq!(config.replay.layout_swaps.len(), 1);
    }

    #[test]
    fn test_scheduled_layout_swaps_validated() {
        let config = Config::load("config.yaml").unwrap();
        assert_eq!(config.replay.layout_swaps[0].assignment, vec![1, 0, 2, 3]);

        let mut bad = config.clone();
        bad.replay.layout_swaps[0].assignment = vec![0, 0, 1, 2];
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.replay.layout_swaps[0].at = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load("/nonexistent/config.yaml").is_err());
    }
}
