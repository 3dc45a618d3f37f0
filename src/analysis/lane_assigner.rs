// src/analysis/lane_assigner.rs
//
// Virtual lane polygons and centroid → lane assignment.
//
// A layout is built from the configured sources (pixel regions of the
// composite frame) and lane sets (named lanes, polygons normalized to the
// region they are placed in). `assignment[source] = lane_set` decides which
// lane set is drawn into which region. Layouts are immutable once built;
// a swap builds a new one and replaces the `Arc` between ticks.

use crate::analysis::object_tracker::{TrackId, TrackedObject};
use crate::error::PipelineError;
use crate::types::{FrameConfig, Point};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type LaneId = String;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Regions of the composite frame, normalized. Empty = one full-frame
    /// source per lane set.
    pub sources: Vec<SourceConfig>,
    pub lane_sets: Vec<LaneSetConfig>,
    /// `assignment[source] = lane_set index`. None = identity.
    pub assignment: Option<Vec<usize>>,
    /// No-parking zones, normalized to the full frame
    pub restricted_zones: Vec<RestrictedZoneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// [x1, y1, x2, y2] normalized to the composite frame
    pub region: [f32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneSetConfig {
    pub name: String,
    pub lanes: Vec<LaneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub id: LaneId,
    /// Vertices normalized to the source region
    pub polygon: Vec<Point>,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_capacity() -> u32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedZoneConfig {
    pub name: String,
    pub polygon: Vec<Point>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        // Two approaches split down the middle of a single camera view
        Self {
            sources: Vec::new(),
            lane_sets: vec![LaneSetConfig {
                name: "intersection".to_string(),
                lanes: vec![
                    LaneConfig {
                        id: "North".to_string(),
                        polygon: vec![(0.0, 0.0), (0.5, 0.0), (0.5, 1.0), (0.0, 1.0)],
                        capacity: default_capacity(),
                    },
                    LaneConfig {
                        id: "South".to_string(),
                        polygon: vec![(0.5, 0.0), (1.0, 0.0), (1.0, 1.0), (0.5, 1.0)],
                        capacity: default_capacity(),
                    },
                ],
            }],
            assignment: None,
            restricted_zones: Vec::new(),
        }
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Result<Self, PipelineError> {
        if vertices.len() < 3 {
            return Err(PipelineError::config(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(PipelineError::config("polygon has non-finite vertex"));
        }
        let polygon = Self { vertices };
        if polygon.area() <= f32::EPSILON {
            return Err(PipelineError::config("polygon has zero area"));
        }
        Ok(polygon)
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Half-open crossing-number test.
    ///
    /// An edge counts when `min(yi, yj) <= py < max(yi, yj)` and the point
    /// lies strictly left of the edge. For an axis-aligned rectangle the
    /// min-x and min-y edges are inside, the max-x and max-y edges are not,
    /// so neighbours sharing an edge never both claim a point on it.
    pub fn contains(&self, point: Point) -> bool {
        let px = point.0 as f64;
        let py = point.1 as f64;
        let n = self.vertices.len();
        let mut inside = false;

        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            // Orient low → high so a shared edge yields the same intersection
            // from both polygons
            let (lo, hi) = if a.1 <= b.1 { (a, b) } else { (b, a) };
            let (lx, ly) = (lo.0 as f64, lo.1 as f64);
            let (hx, hy) = (hi.0 as f64, hi.1 as f64);

            if ly <= py && py < hy {
                let x_int = lx + (py - ly) * (hx - lx) / (hy - ly);
                if px < x_int {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Shoelace area, px²
    pub fn area(&self) -> f32 {
        let n = self.vertices.len();
        let mut twice = 0.0f64;
        for i in 0..n {
            let (x1, y1) = self.vertices[i];
            let (x2, y2) = self.vertices[(i + 1) % n];
            twice += x1 as f64 * y2 as f64 - x2 as f64 * y1 as f64;
        }
        (twice.abs() * 0.5) as f32
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Lane {
    pub id: LaneId,
    pub polygon: Polygon,
    pub capacity: u32,
    /// Source region the lane was drawn into
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestrictedZone {
    pub name: String,
    pub polygon: Polygon,
}

/// Immutable lane set for one layout generation.
#[derive(Debug, Clone, Serialize)]
pub struct LaneLayout {
    lanes: Vec<Lane>,
    restricted_zones: Vec<RestrictedZone>,
    assignment: Vec<usize>,
    version: u64,
}

impl LaneLayout {
    /// Layout from the configured (or identity) assignment, version 0.
    pub fn from_config(config: &LayoutConfig, frame: &FrameConfig) -> Result<Self, PipelineError> {
        let assignment = match &config.assignment {
            Some(a) => a.clone(),
            None => (0..effective_sources(config).len()).collect(),
        };
        Self::build(config, frame, &assignment, 0)
    }

    pub fn build(
        config: &LayoutConfig,
        frame: &FrameConfig,
        assignment: &[usize],
        version: u64,
    ) -> Result<Self, PipelineError> {
        if config.lane_sets.is_empty() {
            return Err(PipelineError::config("layout has no lane sets"));
        }
        let sources = effective_sources(config);
        validate_permutation(assignment, sources.len(), config.lane_sets.len())?;

        let mut lanes = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (source, &set_idx) in sources.iter().zip(assignment) {
            let region = source_region(source, frame)?;
            let lane_set = &config.lane_sets[set_idx];
            if lane_set.lanes.is_empty() {
                return Err(PipelineError::config(format!(
                    "lane set '{}' is empty",
                    lane_set.name
                )));
            }

            for lane in &lane_set.lanes {
                if !seen.insert(lane.id.as_str()) {
                    return Err(PipelineError::config(format!(
                        "duplicate lane id '{}'",
                        lane.id
                    )));
                }
                if lane.capacity == 0 {
                    return Err(PipelineError::config(format!(
                        "lane '{}' has zero capacity",
                        lane.id
                    )));
                }
                let pixels = lane
                    .polygon
                    .iter()
                    .map(|&(x, y)| {
                        (
                            region[0] + x * (region[2] - region[0]),
                            region[1] + y * (region[3] - region[1]),
                        )
                    })
                    .collect();
                let polygon = Polygon::new(pixels).map_err(|e| {
                    PipelineError::config(format!("lane '{}': {}", lane.id, e))
                })?;
                lanes.push(Lane {
                    id: lane.id.clone(),
                    polygon,
                    capacity: lane.capacity,
                    source: source.name.clone(),
                });
            }
        }

        let mut restricted_zones = Vec::with_capacity(config.restricted_zones.len());
        for zone in &config.restricted_zones {
            let pixels = zone
                .polygon
                .iter()
                .map(|&(x, y)| (x * frame.width, y * frame.height))
                .collect();
            let polygon = Polygon::new(pixels).map_err(|e| {
                PipelineError::config(format!("restricted zone '{}': {}", zone.name, e))
            })?;
            restricted_zones.push(RestrictedZone {
                name: zone.name.clone(),
                polygon,
            });
        }

        debug!(
            "🗺️  Layout v{} built: {} lanes from {} sources, assignment={:?}",
            version,
            lanes.len(),
            sources.len(),
            assignment
        );

        Ok(Self {
            lanes,
            restricted_zones,
            assignment: assignment.to_vec(),
            version,
        })
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane_ids(&self) -> Vec<LaneId> {
        self.lanes.iter().map(|l| l.id.clone()).collect()
    }

    pub fn lane(&self, id: &str) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.id == id)
    }

    /// First lane in configured order containing the point.
    pub fn lane_at(&self, point: Point) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.polygon.contains(point))
    }

    pub fn restricted_zones(&self) -> &[RestrictedZone] {
        &self.restricted_zones
    }

    pub fn in_restricted_zone(&self, point: Point) -> Option<&RestrictedZone> {
        self.restricted_zones
            .iter()
            .find(|z| z.polygon.contains(point))
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

fn effective_sources(config: &LayoutConfig) -> Vec<SourceConfig> {
    if !config.sources.is_empty() {
        return config.sources.clone();
    }
    config
        .lane_sets
        .iter()
        .map(|set| SourceConfig {
            name: set.name.clone(),
            region: [0.0, 0.0, 1.0, 1.0],
        })
        .collect()
}

fn source_region(source: &SourceConfig, frame: &FrameConfig) -> Result<[f32; 4], PipelineError> {
    let [x1, y1, x2, y2] = source.region;
    let in_unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
    if !(in_unit(x1) && in_unit(y1) && in_unit(x2) && in_unit(y2)) || x1 >= x2 || y1 >= y2 {
        return Err(PipelineError::config(format!(
            "source '{}' has invalid region {:?}",
            source.name, source.region
        )));
    }
    Ok([
        x1 * frame.width,
        y1 * frame.height,
        x2 * frame.width,
        y2 * frame.height,
    ])
}

fn validate_permutation(
    assignment: &[usize],
    sources: usize,
    lane_sets: usize,
) -> Result<(), PipelineError> {
    if sources != lane_sets {
        return Err(PipelineError::config(format!(
            "{} sources but {} lane sets",
            sources, lane_sets
        )));
    }
    if assignment.len() != sources {
        return Err(PipelineError::config(format!(
            "assignment has {} entries for {} sources",
            assignment.len(),
            sources
        )));
    }
    let mut used = vec![false; lane_sets];
    for &idx in assignment {
        if idx >= lane_sets || used[idx] {
            return Err(PipelineError::config(format!(
                "assignment {:?} is not a permutation of 0..{}",
                assignment, lane_sets
            )));
        }
        used[idx] = true;
    }
    Ok(())
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Track → lane mapping for one tick.
#[derive(Debug, Clone, Default)]
pub struct LaneAssignments {
    by_track: HashMap<TrackId, LaneId>,
    pub unzoned: Vec<TrackId>,
    pub layout_version: u64,
}

impl LaneAssignments {
    pub fn lane_of(&self, id: TrackId) -> Option<&LaneId> {
        self.by_track.get(&id)
    }

    pub fn zoned_count(&self) -> usize {
        self.by_track.len()
    }
}

/// Stateless: the answer depends only on the centroid and the layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneAssigner;

impl LaneAssigner {
    pub fn new() -> Self {
        Self
    }

    pub fn assign(&self, centroid: Point, layout: &LaneLayout) -> Option<LaneId> {
        layout.lane_at(centroid).map(|l| l.id.clone())
    }

    pub fn assign_all(&self, tracks: &[TrackedObject], layout: &LaneLayout) -> LaneAssignments {
        let mut out = LaneAssignments {
            by_track: HashMap::with_capacity(tracks.len()),
            unzoned: Vec::new(),
            layout_version: layout.version(),
        };
        for track in tracks {
            match self.assign(track.centroid, layout) {
                Some(lane) => {
                    out.by_track.insert(track.id, lane);
                }
                None => out.unzoned.push(track.id),
            }
        }
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================
