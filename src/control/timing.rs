// src/control/timing.rs

use crate::control::signal_controller::SignalConfig;
use crate::error::PipelineError;

/// Validated timing parameters, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalTiming {
    pub base_time: f64,
    pub per_vehicle_time: f64,
    pub min_green: f64,
    pub max_green: f64,
    pub yellow_time: f64,
    pub max_wait_time: f64,
    pub emergency_hold: f64,
    pub emergency_grace: f64,
}

impl SignalTiming {
    pub fn from_config(config: &SignalConfig) -> Result<Self, PipelineError> {
        let timing = Self {
            base_time: config.base_time,
            per_vehicle_time: config.per_vehicle_time,
            min_green: config.min_green,
            max_green: config.max_green,
            yellow_time: config.yellow_time,
            max_wait_time: config.max_wait_time,
            emergency_hold: config.emergency_hold,
            emergency_grace: config.emergency_grace,
        };
        timing.validate()?;
        Ok(timing)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let fields = [
            ("base_time", self.base_time),
            ("per_vehicle_time", self.per_vehicle_time),
            ("min_green", self.min_green),
            ("max_green", self.max_green),
            ("yellow_time", self.yellow_time),
            ("max_wait_time", self.max_wait_time),
            ("emergency_hold", self.emergency_hold),
            ("emergency_grace", self.emergency_grace),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::config(format!(
                    "signal.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.min_green <= 0.0 {
            return Err(PipelineError::config("signal.min_green must be positive"));
        }
        if self.min_green > self.max_green {
            return Err(PipelineError::config(format!(
                "signal.min_green ({}) exceeds signal.max_green ({})",
                self.min_green, self.max_green
            )));
        }
        if self.yellow_time <= 0.0 {
            return Err(PipelineError::config("signal.yellow_time must be positive"));
        }
        if self.max_wait_time <= 0.0 {
            return Err(PipelineError::config("signal.max_wait_time must be positive"));
        }
        if self.emergency_grace <= 0.0 {
            return Err(PipelineError::config("signal.emergency_grace must be positive"));
        }
        Ok(())
    }

    /// Green duration for a phase starting with `vehicle_count` vehicles.
    pub fn green_time(&self, vehicle_count: usize) -> f64 {
        (self.base_time + vehicle_count as f64 * self.per_vehicle_time)
            .clamp(self.min_green, self.max_green)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> SignalTiming {
        SignalTiming::from_config(&SignalConfig::default()).unwrap()
    }

    #[test]
    fn test_green_time_base_and_clamp() {
        let t = timing();
        assert_eq!(t.green_time(0), 10.0);
        assert_eq!(t.green_time(5), 20.0);
        // 10 + 20*2 = 50, capped
        assert_eq!(t.green_time(20), 45.0);
    }

    #[test]
    fn test_green_time_respects_min() {
        let config = SignalConfig {
            base_time: 2.0,
            ..SignalConfig::default()
        };
        let t = SignalTiming::from_config(&config).unwrap();
        assert_eq!(t.green_time(0), 5.0);
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let inverted = SignalConfig {
            min_green: 30.0,
            max_green: 20.0,
            ..SignalConfig::default()
        };
        assert!(SignalTiming::from_config(&inverted).is_err());

        let no_yellow = SignalConfig {
            yellow_time: 0.0,
            ..SignalConfig::default()
        };
        assert!(SignalTiming::from_config(&no_yellow).is_err());

        let nan = SignalConfig {
            base_time: f64::NAN,
            ..SignalConfig::default()
        };
        assert!(SignalTiming::from_config(&nan).is_err());
    }
}
