//! Runtime configuration for the perception and decision core.
//!
//! All defaults reproduce the reference rover setup (320×160 camera,
//! 200×200 world grid at 10 px per world unit). A config can be loaded from
//! JSON; omitted sections and fields fall back to their defaults.

use std::path::Path;

use crate::error::PilotError;

/// Camera raster and ground-plane rectification geometry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Four image points outlining a one-world-unit ground square, in order
    /// bottom-left, bottom-right, top-right, top-left.
    pub source_quad: [[f64; 2]; 4],
    /// Half-size in pixels of the destination square in the rectified view.
    pub dst_size: f64,
    /// Gap between the destination square and the bottom image edge.
    pub bottom_offset: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 160,
            source_quad: [[14.0, 140.0], [301.0, 140.0], [200.0, 96.0], [118.0, 96.0]],
            dst_size: 5.0,
            bottom_offset: 5.0,
        }
    }
}

impl CameraConfig {
    /// Destination square matching `source_quad` point order.
    pub fn destination_quad(&self) -> [[f64; 2]; 4] {
        let cx = self.width as f64 / 2.0;
        let bottom = self.height as f64 - self.bottom_offset;
        let top = bottom - 2.0 * self.dst_size;
        [
            [cx - self.dst_size, bottom],
            [cx + self.dst_size, bottom],
            [cx + self.dst_size, top],
            [cx - self.dst_size, top],
        ]
    }

    /// Rectified pixels per world unit.
    pub fn pixels_per_unit(&self) -> f64 {
        2.0 * self.dst_size
    }
}

/// Fixed color thresholds for pixel classification.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// A pixel is navigable when every channel is strictly above these.
    pub navigable_rgb: [u8; 3],
    /// Sample test: green above `[0]` and `[1]`, blue below `[2]`.
    pub sample_rgb: [u8; 3],
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            navigable_rgb: [160, 160, 160],
            sample_rgb: [110, 110, 50],
        }
    }
}

/// Accepted band around level for one attitude axis, in degrees.
///
/// With the angle wrapped to `[0, 360)`, the axis is level when
/// `angle <= up` (`angle < up` with `up_exclusive`) or `360 - angle <= down`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelBand {
    pub up: f64,
    pub down: f64,
    #[serde(default)]
    pub up_exclusive: bool,
}

impl LevelBand {
    pub fn contains(&self, angle_deg: f64) -> bool {
        if !angle_deg.is_finite() {
            return false;
        }
        let a = angle_deg.rem_euclid(360.0);
        let within_up = if self.up_exclusive {
            a < self.up
        } else {
            a <= self.up
        };
        within_up || 360.0 - a <= self.down
    }
}

/// Attitude confidence gate for map accumulation.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AttitudeGate {
    pub pitch: LevelBand,
    pub roll: LevelBand,
}

impl Default for AttitudeGate {
    fn default() -> Self {
        Self {
            pitch: LevelBand {
                up: 0.05,
                down: 0.5,
                up_exclusive: false,
            },
            roll: LevelBand {
                up: 1.5,
                down: 1.5,
                up_exclusive: true,
            },
        }
    }
}

impl AttitudeGate {
    /// Whether a frame taken at this attitude may be projected into the map.
    pub fn admits(&self, pitch_deg: f64, roll_deg: f64) -> bool {
        self.pitch.contains(pitch_deg) && self.roll.contains(roll_deg)
    }
}

/// World map geometry and evidence weighting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Side length of the square grid, in cells (one cell per world unit).
    pub world_size: usize,
    pub navigable_increment: u32,
    pub obstacle_increment: u32,
    pub sample_increment: u32,
    /// Obstacle evidence strictly above this marks a confirmed obstacle.
    pub confirmed_obstacle_threshold: u32,
    pub attitude_gate: AttitudeGate,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            world_size: 200,
            navigable_increment: 10,
            obstacle_increment: 1,
            sample_increment: 1,
            confirmed_obstacle_threshold: 250,
            attitude_gate: AttitudeGate::default(),
        }
    }
}

/// Half-open column range `[start, end)` in the rectified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnBand {
    pub start: u32,
    pub end: u32,
}

impl ColumnBand {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Near-field obstacle bands used to detect an obstacle straight ahead.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ObstacleBands {
    /// First row of the near-field window (rows below it are counted).
    pub row_start: u32,
    pub left: ColumnBand,
    pub center: ColumnBand,
    pub right: ColumnBand,
    /// Center must exceed `dominance ×` each side band count.
    pub dominance: f64,
    /// Only obstacle pixels left of this column steer the avoidance turn.
    pub cut_column: u32,
    /// Rover-frame scale applied to the avoidance pixels.
    pub avoid_scale: f64,
}

impl Default for ObstacleBands {
    fn default() -> Self {
        Self {
            row_start: 70,
            left: ColumnBand::new(120, 140),
            center: ColumnBand::new(140, 180),
            right: ColumnBand::new(180, 200),
            dominance: 3.0,
            cut_column: 150,
            avoid_scale: 4.0,
        }
    }
}

/// Minimum navigable-pixel counts the controller needs to keep or resume
/// driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TerrainThresholds {
    /// Below this count Forward mode stops.
    pub stop_forward: usize,
    /// At or above this count Stop mode resumes driving.
    pub go_forward: usize,
}

impl TerrainThresholds {
    /// Thresholds that any distribution satisfies.
    pub const ZERO: Self = Self {
        stop_forward: 0,
        go_forward: 0,
    };
}

impl Default for TerrainThresholds {
    fn default() -> Self {
        Self {
            stop_forward: 150,
            go_forward: 1000,
        }
    }
}

/// Navigation synthesizer tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub obstacle_bands: ObstacleBands,
    /// Scale applied to navigable pixels over already-confirmed cells.
    pub mapped_scale: f64,
    /// Scale applied to navigable pixels over unconfirmed cells.
    pub unmapped_scale: f64,
    /// Thresholds restored by the exploration strategy.
    pub thresholds: TerrainThresholds,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            obstacle_bands: ObstacleBands::default(),
            mapped_scale: 0.5,
            unmapped_scale: 2.0,
            thresholds: TerrainThresholds::default(),
        }
    }
}

/// Actuator set-points.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub max_vel: f64,
    pub throttle_set: f64,
    pub brake_set: f64,
    /// Steering limit in degrees, applied symmetrically.
    pub max_steer_deg: f64,
    /// Stop mode keeps braking above this speed.
    pub stop_creep_vel: f64,
    /// The recovery turn is re-learned only above this speed.
    pub turn_learn_vel: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_vel: 2.0,
            throttle_set: 0.2,
            brake_set: 10.0,
            max_steer_deg: 15.0,
            stop_creep_vel: 0.2,
            turn_learn_vel: 1.0,
        }
    }
}

/// Stuck detection sampling and recovery.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StuckConfig {
    /// Tick-count period of the sampling schedule.
    pub period: u64,
    pub yaw_offset: u64,
    pub position_offset: u64,
    pub history_len: usize,
    /// Per-axis displacement under which two position samples count as stationary.
    pub position_tolerance: f64,
    /// Yaw change in degrees that completes a recovery turn.
    pub recovery_yaw_deg: f64,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            period: 116,
            yaw_offset: 31,
            position_offset: 115,
            history_len: 2,
            position_tolerance: 0.4,
            recovery_yaw_deg: 30.0,
        }
    }
}

/// Complete control-core configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub camera: CameraConfig,
    pub classifier: ClassifierConfig,
    pub map: MapConfig,
    pub navigation: NavigationConfig,
    pub drive: DriveConfig,
    pub stuck: StuckConfig,
}

impl PilotConfig {
    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, PilotError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self, PilotError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Rover-frame scale used for map projection (pixels per world unit).
    pub fn scale(&self) -> f64 {
        self.camera.pixels_per_unit()
    }

    /// Reject values the core cannot run with. Quad degeneracy is checked
    /// separately when the rectifier is built.
    pub fn validate(&self) -> Result<(), PilotError> {
        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(PilotError::invalid("camera", "frame dimensions must be non-zero"));
        }
        if !(cam.dst_size.is_finite() && cam.dst_size > 0.0) {
            return Err(PilotError::invalid("camera.dst_size", "must be finite and positive"));
        }
        if !(cam.bottom_offset.is_finite() && cam.bottom_offset >= 0.0) {
            return Err(PilotError::invalid("camera.bottom_offset", "must be finite and non-negative"));
        }
        if self.map.world_size == 0 {
            return Err(PilotError::invalid("map.world_size", "must be non-zero"));
        }

        let bands = &self.navigation.obstacle_bands;
        for (field, band) in [
            ("navigation.obstacle_bands.left", bands.left),
            ("navigation.obstacle_bands.center", bands.center),
            ("navigation.obstacle_bands.right", bands.right),
        ] {
            if band.start >= band.end || band.end > cam.width {
                return Err(PilotError::invalid(
                    field,
                    format!("[{}, {}) is empty or exceeds frame width {}", band.start, band.end, cam.width),
                ));
            }
        }
        if bands.row_start >= cam.height {
            return Err(PilotError::invalid(
                "navigation.obstacle_bands.row_start",
                format!("must be below frame height {}", cam.height),
            ));
        }
        if !(bands.dominance.is_finite() && bands.dominance > 0.0) {
            return Err(PilotError::invalid("navigation.obstacle_bands.dominance", "must be positive"));
        }
        if !(bands.avoid_scale.is_finite() && bands.avoid_scale > 0.0) {
            return Err(PilotError::invalid("navigation.obstacle_bands.avoid_scale", "must be positive"));
        }
        if !(self.navigation.mapped_scale > 0.0 && self.navigation.unmapped_scale > 0.0) {
            return Err(PilotError::invalid("navigation", "bias scales must be positive"));
        }

        let drive = &self.drive;
        if !(drive.max_steer_deg.is_finite() && drive.max_steer_deg > 0.0) {
            return Err(PilotError::invalid("drive.max_steer_deg", "must be finite and positive"));
        }

        let stuck = &self.stuck;
        if stuck.period == 0 {
            return Err(PilotError::invalid("stuck.period", "must be non-zero"));
        }
        if stuck.yaw_offset >= stuck.period || stuck.position_offset >= stuck.period {
            return Err(PilotError::invalid(
                "stuck",
                format!("sampling offsets must be below the period {}", stuck.period),
            ));
        }
        if stuck.history_len < 2 {
            return Err(PilotError::invalid("stuck.history_len", "at least two samples are compared"));
        }
        Ok(())
    }
}
