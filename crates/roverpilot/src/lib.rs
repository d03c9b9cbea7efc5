//! roverpilot — perception-to-action control core for a camera-guided
//! ground rover.
//!
//! Each control tick consumes one forward camera frame plus telemetry and
//! produces throttle, brake, steer and pickup commands. The stages are:
//!
//! 1. **Rectify** – fixed perspective warp of the oblique camera view onto a
//!    top-down ground raster, with a validity mask for border fill.
//! 2. **Classify** – color thresholds split the raster into navigable,
//!    obstacle and sample masks.
//! 3. **Map** – attitude-gated accumulation of the masks into a persistent
//!    world evidence grid.
//! 4. **Navigate** – one of three strategies (sample-seek, obstacle-avoid,
//!    explore) turns the masks into a driving-angle distribution.
//! 5. **Decide** – a Forward/Stop state machine with stuck detection
//!    converts the distribution into actuator commands.
//!
//! # Public API
//! - [`Pilot`] owns all cross-tick state; call [`Pilot::tick`] once per frame.
//! - [`PilotConfig`] holds every tunable, loadable from JSON.
//! - [`RoverState`] is the caller-owned telemetry and command record.
//!
//! The stage modules are public for offline tooling and inspection.

pub mod classify;
pub mod config;
pub mod controller;
mod error;
pub mod geometry;
pub mod history;
pub mod homography;
pub mod navigation;
mod pilot;
pub mod rectify;
pub mod worldmap;

#[cfg(test)]
pub(crate) mod test_utils;

pub use classify::ClassifiedFrame;
pub use config::{
    AttitudeGate, CameraConfig, ClassifierConfig, DriveConfig, LevelBand, MapConfig,
    NavigationConfig, PilotConfig, StuckConfig, TerrainThresholds,
};
pub use controller::{Controller, DriveMode, RoverState, StuckTracker};
pub use error::PilotError;
pub use geometry::WorldPose;
pub use homography::HomographyError;
pub use navigation::{NavDistribution, NavPlan, StrategyKind};
pub use pilot::{Dropout, Pilot, TickReport};
pub use rectify::{Rectified, Rectifier};
pub use worldmap::{Channel, WorldMap};
