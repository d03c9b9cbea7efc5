//! Per-tick orchestration of perception, mapping and decision.
//!
//! [`Pilot`] owns every piece of state that persists across ticks: the
//! precomputed rectifier, the world map and the controller with its stuck
//! tracker. Create once at session start, then call [`Pilot::tick`] with
//! each camera frame and the caller-owned [`RoverState`].

use image::RgbImage;

use crate::classify::{classify, ClassifiedFrame};
use crate::config::PilotConfig;
use crate::controller::{Controller, RoverState};
use crate::error::PilotError;
use crate::geometry::rover_coords;
use crate::navigation::{synthesize, NavInputs, StrategyKind};
use crate::rectify::Rectifier;
use crate::worldmap::{FrameEvidence, WorldMap};

/// Why perception was skipped on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dropout {
    NoFrame,
    FrameSize,
    Telemetry,
}

/// Summary of one tick for logging and visualization.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Strategy chosen by the synthesizer, `None` on dropout.
    pub strategy: Option<StrategyKind>,
    pub dropout: Option<Dropout>,
    /// Whether the attitude gate admitted this frame into the map.
    pub map_updated: bool,
    pub stuck: bool,
    /// Obstacle / sample / navigable masks as R / G / B.
    pub vision: Option<RgbImage>,
}

/// Result of a successful perception pass.
struct Perception {
    classified: ClassifiedFrame,
    strategy: StrategyKind,
    map_updated: bool,
}

/// Control-core context carried across ticks.
#[derive(Debug, Clone)]
pub struct Pilot {
    config: PilotConfig,
    rectifier: Rectifier,
    map: WorldMap,
    controller: Controller,
}

impl Pilot {
    /// Validate `config`, build the rectifier and allocate the map.
    ///
    /// Degenerate camera geometry is rejected here.
    pub fn new(config: PilotConfig) -> Result<Self, PilotError> {
        config.validate()?;
        let rectifier = Rectifier::new(&config.camera)?;
        let map = WorldMap::new(config.map.world_size);
        let controller = Controller::new(config.drive, config.stuck);
        tracing::info!(
            "pilot ready: camera {}x{}, world {}x{}, scale {}",
            config.camera.width,
            config.camera.height,
            config.map.world_size,
            config.map.world_size,
            config.scale()
        );
        Ok(Self {
            config,
            rectifier,
            map,
            controller,
        })
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    pub fn map(&self) -> &WorldMap {
        &self.map
    }

    pub fn rectifier(&self) -> &Rectifier {
        &self.rectifier
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run one control tick.
    ///
    /// Sensor dropout (no frame, wrong frame size, non-finite telemetry)
    /// skips perception and mapping; the controller then takes its fallback
    /// path. The only error is an evidence counter overflow; the map is then
    /// unchanged and `rover` keeps the previous tick's commands.
    pub fn tick(
        &mut self,
        rover: &mut RoverState,
        frame: Option<&RgbImage>,
    ) -> Result<TickReport, PilotError> {
        let outcome = match frame {
            None => Err(Dropout::NoFrame),
            Some(_) if !rover.telemetry_is_finite() => Err(Dropout::Telemetry),
            Some(f) => self.perceive(rover, f)?.ok_or(Dropout::FrameSize),
        };

        let report = match outcome {
            Ok(p) => {
                self.controller.decide(rover);
                TickReport {
                    strategy: Some(p.strategy),
                    dropout: None,
                    map_updated: p.map_updated,
                    stuck: self.controller.is_stuck(),
                    vision: Some(p.classified.vision_image()),
                }
            }
            Err(reason) => {
                tracing::warn!("sensor dropout ({:?}); using fallback command", reason);
                rover.nav = None;
                self.controller.decide(rover);
                TickReport {
                    strategy: None,
                    dropout: Some(reason),
                    map_updated: false,
                    stuck: self.controller.is_stuck(),
                    vision: None,
                }
            }
        };
        Ok(report)
    }

    /// Rectify, classify, accumulate and synthesize. `Ok(None)` when the
    /// frame does not match the camera raster.
    fn perceive(
        &mut self,
        rover: &mut RoverState,
        frame: &RgbImage,
    ) -> Result<Option<Perception>, PilotError> {
        let Some(rectified) = self.rectifier.rectify(frame) else {
            return Ok(None);
        };
        let classified = classify(&rectified, &self.config.classifier);
        let evidence = FrameEvidence {
            obstacle: rover_coords(&classified.obstacle),
            sample: rover_coords(&classified.sample),
            navigable: rover_coords(&classified.navigable),
        };

        let pose = rover.pose();
        let scale = self.config.scale();
        let map_updated = self.map.update(
            &evidence,
            &pose,
            rover.pitch,
            rover.roll,
            scale,
            &self.config.map,
        )?;

        let inputs = NavInputs {
            classified: &classified,
            evidence: &evidence,
            map: &self.map,
            pose: &pose,
            scale,
            confirmed_threshold: self.config.map.confirmed_obstacle_threshold,
        };
        let plan = synthesize(&inputs, &self.config.navigation);
        let strategy = plan.kind();
        rover.thresholds = plan.thresholds(self.config.navigation.thresholds, rover.thresholds);
        rover.nav = Some(plan.into_distribution());

        Ok(Some(Perception {
            classified,
            strategy,
            map_updated,
        }))
    }
}
