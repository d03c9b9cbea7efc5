//! Synthesis of the driving-angle distribution from one classified frame.
//!
//! Exactly one strategy is chosen per tick, in priority order:
//! 1. **Sample-seek** when any sample pixel is visible.
//! 2. **Obstacle-avoid** when the near-field center band is dominated by
//!    obstacle pixels.
//! 3. **Explore** otherwise, with navigable pixels re-weighted toward
//!    terrain the map has not yet confirmed.

use std::collections::HashSet;

use image::GrayImage;

use crate::classify::{count_in_window, ClassifiedFrame};
use crate::config::{NavigationConfig, ObstacleBands, TerrainThresholds};
use crate::geometry::{
    rover_coords_where, rover_to_pixel, to_polar, to_rover_from_world, to_world, WorldPose,
};
use crate::worldmap::{FrameEvidence, WorldMap};

/// Parallel distances and angles (radians) in the rover frame.
///
/// Both sequences always have the same length. An empty distribution is
/// valid and means no usable terrain.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NavDistribution {
    dists: Vec<f64>,
    angles: Vec<f64>,
}

impl NavDistribution {
    /// Polar distribution of rover-frame points.
    pub fn from_points(points: &[[f64; 2]]) -> Self {
        let (dists, angles) = to_polar(points);
        Self { dists, angles }
    }

    /// Distribution with every angle set to `angle_rad` at unit distance.
    pub fn uniform(n: usize, angle_rad: f64) -> Self {
        Self {
            dists: vec![1.0; n],
            angles: vec![angle_rad; n],
        }
    }

    /// Build from parallel sequences. Returns `None` on length mismatch.
    pub fn from_parts(dists: Vec<f64>, angles: Vec<f64>) -> Option<Self> {
        (dists.len() == angles.len()).then_some(Self { dists, angles })
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn dists(&self) -> &[f64] {
        &self.dists
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Mean angle in degrees, `None` when empty.
    pub fn mean_angle_deg(&self) -> Option<f64> {
        if self.angles.is_empty() {
            return None;
        }
        let mean = self.angles.iter().sum::<f64>() / self.angles.len() as f64;
        Some(mean.to_degrees())
    }
}

/// Which strategy produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SampleSeek,
    ObstacleAvoid,
    Explore,
}

/// Output of the synthesizer: the chosen strategy and its distribution.
#[derive(Debug, Clone, PartialEq)]
pub enum NavPlan {
    /// Drive toward visible sample pixels regardless of terrain density.
    SampleSeek(NavDistribution),
    /// Steer off an obstacle directly ahead using the left obstacle field.
    ObstacleAvoid(NavDistribution),
    /// Free driving over navigable terrain, biased toward unmapped cells.
    Explore(NavDistribution),
}

impl NavPlan {
    pub fn kind(&self) -> StrategyKind {
        match self {
            NavPlan::SampleSeek(_) => StrategyKind::SampleSeek,
            NavPlan::ObstacleAvoid(_) => StrategyKind::ObstacleAvoid,
            NavPlan::Explore(_) => StrategyKind::Explore,
        }
    }

    pub fn distribution(&self) -> &NavDistribution {
        match self {
            NavPlan::SampleSeek(d) | NavPlan::ObstacleAvoid(d) | NavPlan::Explore(d) => d,
        }
    }

    pub fn into_distribution(self) -> NavDistribution {
        match self {
            NavPlan::SampleSeek(d) | NavPlan::ObstacleAvoid(d) | NavPlan::Explore(d) => d,
        }
    }

    /// Terrain thresholds the controller should apply for this plan.
    ///
    /// Sample-seek disables them, explore restores `normal`, and
    /// obstacle-avoid keeps whatever was active on the previous tick.
    pub fn thresholds(
        &self,
        normal: TerrainThresholds,
        previous: TerrainThresholds,
    ) -> TerrainThresholds {
        match self {
            NavPlan::SampleSeek(_) => TerrainThresholds::ZERO,
            NavPlan::ObstacleAvoid(_) => previous,
            NavPlan::Explore(_) => normal,
        }
    }
}

/// Obstacle pixel counts in the near-field bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandCounts {
    pub left: usize,
    pub center: usize,
    pub right: usize,
}

impl BandCounts {
    pub fn measure(obstacle: &GrayImage, bands: &ObstacleBands) -> Self {
        let count = |b: crate::config::ColumnBand| {
            count_in_window(obstacle, bands.row_start, (b.start, b.end))
        };
        Self {
            left: count(bands.left),
            center: count(bands.center),
            right: count(bands.right),
        }
    }

    /// Center band exceeds `dominance ×` both side bands.
    pub fn obstacle_ahead(&self, dominance: f64) -> bool {
        let c = self.center as f64;
        c > self.left as f64 * dominance && c > self.right as f64 * dominance
    }
}

/// Everything the synthesizer reads about the current tick.
pub struct NavInputs<'a> {
    pub classified: &'a ClassifiedFrame,
    pub evidence: &'a FrameEvidence,
    pub map: &'a WorldMap,
    pub pose: &'a WorldPose,
    pub scale: f64,
    pub confirmed_threshold: u32,
}

/// Choose a strategy and build its distribution.
pub fn synthesize(inputs: &NavInputs<'_>, config: &NavigationConfig) -> NavPlan {
    if !inputs.evidence.sample.is_empty() {
        tracing::debug!("sample-seek: {} sample pixels", inputs.evidence.sample.len());
        return NavPlan::SampleSeek(NavDistribution::from_points(&inputs.evidence.sample));
    }

    let bands = &config.obstacle_bands;
    let counts = BandCounts::measure(&inputs.classified.obstacle, bands);
    if counts.obstacle_ahead(bands.dominance) {
        let cut = bands.cut_column;
        let scale = bands.avoid_scale;
        let points: Vec<[f64; 2]> = rover_coords_where(&inputs.classified.obstacle, |col, _| col < cut)
            .into_iter()
            .map(|p| [p[0] * scale, p[1] * scale])
            .collect();
        tracing::debug!(
            "obstacle ahead (left={}, center={}, right={}); avoiding with {} pixels",
            counts.left,
            counts.center,
            counts.right,
            points.len()
        );
        return NavPlan::ObstacleAvoid(NavDistribution::from_points(&points));
    }

    let (w, h) = inputs.classified.navigable.dimensions();
    let mapped = confirmed_footprint(inputs, w, h);
    let points: Vec<[f64; 2]> = inputs
        .evidence
        .navigable
        .iter()
        .map(|p| {
            let s = if mapped.contains(*p) {
                config.mapped_scale
            } else {
                config.unmapped_scale
            };
            [p[0] * s, p[1] * s]
        })
        .collect();
    tracing::debug!(
        "explore: {} navigable pixels, {} over confirmed cells",
        points.len(),
        mapped.count
    );
    NavPlan::Explore(NavDistribution::from_points(&points))
}

/// Rover-frame pixels lying over confirmed-obstacle cells in view.
struct Footprint {
    width: u32,
    height: u32,
    marked: Vec<bool>,
    count: usize,
}

impl Footprint {
    fn contains(&self, p: [f64; 2]) -> bool {
        let px = rover_to_pixel(p, self.width, self.height);
        let (col, row) = (px[0].round(), px[1].round());
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return false;
        }
        self.marked[row as usize * self.width as usize + col as usize]
    }
}

/// Re-derive, in the rover frame, the cells this frame sees that the map
/// already confirms, and mark the pixels within half a cell of each.
fn confirmed_footprint(inputs: &NavInputs<'_>, width: u32, height: u32) -> Footprint {
    let size = inputs.map.size();
    let cells: HashSet<[usize; 2]> = inputs
        .evidence
        .navigable
        .iter()
        .chain(&inputs.evidence.obstacle)
        .map(|p| to_world(*p, inputs.pose, size, inputs.scale))
        .filter(|c| inputs.map.is_confirmed_obstacle(c[0], c[1], inputs.confirmed_threshold))
        .collect();

    let mut marked = vec![false; (width * height) as usize];
    let half = inputs.scale / 2.0;
    for cell in &cells {
        let center = [cell[0] as f64 + 0.5, cell[1] as f64 + 0.5];
        let rover = to_rover_from_world(center, inputs.pose, inputs.scale);
        let px = rover_to_pixel(rover, width, height);
        let c0 = (px[0] - half).ceil().max(0.0);
        let c1 = (px[0] + half).floor().min(width as f64 - 1.0);
        let r0 = (px[1] - half).ceil().max(0.0);
        let r1 = (px[1] + half).floor().min(height as f64 - 1.0);
        if c0 > c1 || r0 > r1 {
            continue;
        }
        for row in r0 as usize..=r1 as usize {
            for col in c0 as usize..=c1 as usize {
                marked[row * width as usize + col] = true;
            }
        }
    }
    let mut footprint = Footprint {
        width,
        height,
        marked,
        count: 0,
    };
    let count = inputs
        .evidence
        .navigable
        .iter()
        .filter(|p| footprint.contains(**p))
        .count();
    footprint.count = count;
    footprint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rover_coords;
    use crate::worldmap::Channel;
    use approx::assert_abs_diff_eq;
    use image::Luma;

    fn blank_frame() -> ClassifiedFrame {
        ClassifiedFrame {
            navigable: GrayImage::new(320, 160),
            obstacle: GrayImage::new(320, 160),
            sample: GrayImage::new(320, 160),
        }
    }

    fn fill(mask: &mut GrayImage, cols: std::ops::Range<u32>, rows: std::ops::Range<u32>) {
        for r in rows {
            for c in cols.clone() {
                mask.put_pixel(c, r, Luma([1]));
            }
        }
    }

    fn evidence_of(frame: &ClassifiedFrame) -> FrameEvidence {
        FrameEvidence {
            obstacle: rover_coords(&frame.obstacle),
            sample: rover_coords(&frame.sample),
            navigable: rover_coords(&frame.navigable),
        }
    }

    fn plan(frame: &ClassifiedFrame, map: &WorldMap) -> NavPlan {
        let evidence = evidence_of(frame);
        let pose = WorldPose::new(100.0, 100.0, 0.0);
        let inputs = NavInputs {
            classified: frame,
            evidence: &evidence,
            map,
            pose: &pose,
            scale: 10.0,
            confirmed_threshold: 250,
        };
        synthesize(&inputs, &NavigationConfig::default())
    }

    #[test]
    fn sample_pixels_take_priority() {
        let mut frame = blank_frame();
        fill(&mut frame.navigable, 0..320, 100..160);
        fill(&mut frame.obstacle, 140..180, 70..160);
        fill(&mut frame.sample, 200..202, 120..121);
        let p = plan(&frame, &WorldMap::new(200));
        assert_eq!(p.kind(), StrategyKind::SampleSeek);
        assert_eq!(p.distribution().len(), 2);
        // Samples sit to the right of the rover.
        assert!(p.distribution().mean_angle_deg().expect("non-empty") < 0.0);
        let normal = TerrainThresholds::default();
        assert_eq!(p.thresholds(normal, normal), TerrainThresholds::ZERO);
    }

    #[test]
    fn dominant_center_band_triggers_avoidance_to_the_left() {
        let mut frame = blank_frame();
        fill(&mut frame.obstacle, 140..180, 70..160);
        fill(&mut frame.obstacle, 0..40, 0..160);
        fill(&mut frame.navigable, 200..320, 100..160);
        let p = plan(&frame, &WorldMap::new(200));
        assert_eq!(p.kind(), StrategyKind::ObstacleAvoid);
        // Only pixels left of column 150: 0..40 full height plus 140..150 below row 70.
        assert_eq!(p.distribution().len(), 40 * 160 + 10 * 90);
        assert!(p.distribution().mean_angle_deg().expect("non-empty") > 0.0);
        // Distances reflect the 4× scaling.
        let max_d = p.distribution().dists().iter().cloned().fold(0.0, f64::max);
        assert!(max_d > 4.0 * 160.0);

        let prev = TerrainThresholds {
            stop_forward: 0,
            go_forward: 0,
        };
        assert_eq!(p.thresholds(TerrainThresholds::default(), prev), prev);
    }

    #[test]
    fn balanced_bands_fall_through_to_explore() {
        let mut frame = blank_frame();
        fill(&mut frame.obstacle, 120..200, 70..160);
        fill(&mut frame.navigable, 0..100, 50..160);
        let p = plan(&frame, &WorldMap::new(200));
        assert_eq!(p.kind(), StrategyKind::Explore);
        assert_eq!(p.distribution().len(), 100 * 110);
        let normal = TerrainThresholds::default();
        assert_eq!(p.thresholds(normal, TerrainThresholds::ZERO), normal);
    }

    #[test]
    fn empty_frame_explores_with_empty_distribution() {
        let p = plan(&blank_frame(), &WorldMap::new(200));
        assert_eq!(p.kind(), StrategyKind::Explore);
        assert!(p.distribution().is_empty());
        assert_eq!(p.distribution().mean_angle_deg(), None);
    }

    #[test]
    fn unmapped_terrain_is_doubled_and_mapped_terrain_halved() {
        let mut frame = blank_frame();
        // Single navigable pixel 30 px ahead, centered.
        frame.navigable.put_pixel(160, 130, Luma([1]));
        let fresh = plan(&frame, &WorldMap::new(200));
        assert_abs_diff_eq!(fresh.distribution().dists()[0], 60.0, epsilon = 1e-9);

        let mut map = WorldMap::new(200);
        // Cell under that pixel: (100 + 30/10, 100) = (103, 100).
        map.add(Channel::Obstacle, 103, 100, 251).expect("fits");
        let biased = plan(&frame, &map);
        assert_abs_diff_eq!(biased.distribution().dists()[0], 15.0, epsilon = 1e-9);
    }

    #[test]
    fn distribution_parts_must_match() {
        assert!(NavDistribution::from_parts(vec![1.0], vec![]).is_none());
        let d = NavDistribution::uniform(3, 0.0);
        assert_eq!(d.dists().len(), d.angles().len());
        assert_eq!(d.mean_angle_deg(), Some(0.0));
    }
}
