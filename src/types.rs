// src/types.rs

use crate::analysis::anomaly::AnomalyPolicy;
use crate::analysis::lane_assigner::LayoutConfig;
use crate::analysis::object_tracker::TrackerConfig;
use crate::analysis::traffic_analyzer::AnalyzerConfig;
use crate::analysis::Severity;
use crate::control::SignalConfig;
use serde::{Deserialize, Serialize};

/// (x, y) in pixels of the (composite) frame.
pub type Point = (f32, f32);

/// [x1, y1, x2, y2] pixels
pub type BBox = [f32; 4];

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub anomaly: AnomalyPolicy,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            layout: LayoutConfig::default(),
            tracker: TrackerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            anomaly: AnomalyPolicy::default(),
            signal: SignalConfig::default(),
            pipeline: PipelineConfig::default(),
            replay: ReplayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pending observability events kept before the oldest is dropped
    pub event_bus_capacity: usize,
    /// No frame for this long counts as a detector stream interruption
    pub interruption_timeout_ms: u64,
    /// Emit a diagnostic summary every N ticks (0 disables)
    pub diagnostics_every_n_ticks: u64,
    /// Most recent alerts carried in each published snapshot
    pub max_published_alerts: usize,
    /// Incidents at or above this severity capture the current frame
    pub attach_frame_min_severity: Severity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: 256,
            interruption_timeout_ms: 2000,
            diagnostics_every_n_ticks: 150, // ~5s at 30fps
            max_published_alerts: 5,
            attach_frame_min_severity: Severity::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// JSON-lines file of FrameInput records fed to the pipeline by the binary
    pub input_path: String,
    /// Where the incident log is written on shutdown (None = not written)
    pub incident_output: Option<String>,
    /// Pace the replay by the recorded timestamps instead of as-fast-as-possible
    pub realtime: bool,
    /// Layout swaps sent to the pipeline as the replay clock passes `at`
    pub layout_swaps: Vec<ScheduledLayoutSwap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledLayoutSwap {
    /// Frame timestamp (seconds) at which the swap is requested
    pub at: f64,
    /// `assignment[source] = lane_set`
    pub assignment: Vec<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input_path: "detections.jsonl".to_string(),
            incident_output: None,
            realtime: false,
            layout_swaps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// DETECTOR INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Person,
    Ambulance,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Bus => "bus",
            Self::Truck => "truck",
            Self::Person => "person",
            Self::Ambulance => "ambulance",
        }
    }

    /// Everything that occupies a lane as traffic. Ambulances count.
    pub fn is_vehicle(&self) -> bool {
        !matches!(self, Self::Person)
    }

    pub fn is_person(&self) -> bool {
        matches!(self, Self::Person)
    }

    pub fn is_ambulance(&self) -> bool {
        matches!(self, Self::Ambulance)
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detector output box. Confidence filtering happens upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class: ObjectClass,
    pub confidence: f32,
    /// Frame timestamp, seconds
    #[serde(default)]
    pub timestamp: f64,
}

impl Detection {
    pub fn center(&self) -> Point {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }

    pub fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

/// One tick of pipeline input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInput {
    /// Seconds, monotonic within a stream
    pub timestamp: f64,
    /// None when the detector produced nothing usable for this frame
    pub detections: Option<Vec<Detection>>,
    /// Encoded frame (JPEG) forwarded to the snapshot and incident captures
    #[serde(default, skip_serializing)]
    pub frame: Option<Vec<u8>>,
}

impl FrameInput {
    pub fn new(timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections: Some(detections),
            frame: None,
        }
    }

    pub fn interrupted(timestamp: f64) -> Self {
        Self {
            timestamp,
            detections: None,
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = Some(frame);
        self
    }
}

pub fn distance(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_overlap() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        let score = iou(&a, &b);
        assert!((score - 2500.0 / 17500.0).abs() < 0.01);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = [0.0, 0.0, 50.0, 50.0];
        let b = [100.0, 100.0, 200.0, 200.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_detection_center() {
        let det = Detection {
            bbox: [10.0, 20.0, 30.0, 60.0],
            class: ObjectClass::Car,
            confidence: 0.9,
            timestamp: 0.0,
        };
        assert_eq!(det.center(), (20.0, 40.0));
        assert_eq!(det.area(), 800.0);
    }

    #[test]
    fn test_ambulance_counts_as_vehicle() {
        assert!(ObjectClass::Ambulance.is_vehicle());
        assert!(!ObjectClass::Person.is_vehicle());
    }

    #[test]
    fn test_frame_input_parses_without_frame() {
        let json = r#"{"timestamp":1.5,"detections":[{"bbox":[0,0,10,10],"class":"bus","confidence":0.8,"timestamp":1.5}]}"#;
        let input: FrameInput = serde_json::from_str(json).unwrap();
        assert!(input.frame.is_none());
        assert_eq!(input.detections.unwrap()[0].class, ObjectClass::Bus);
    }
}
