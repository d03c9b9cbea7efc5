//! Supervisory decision controller.
//!
//! Turns the navigation distribution and telemetry into throttle, brake,
//! steer and pickup commands. Two drive modes (Forward, Stop) plus an
//! orthogonal stuck flag that overrides both while a recovery turn runs.

use crate::config::{DriveConfig, StuckConfig, TerrainThresholds};
use crate::geometry::WorldPose;
use crate::history::History;
use crate::navigation::NavDistribution;

/// Drive mode of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    #[default]
    Forward,
    Stop,
}

/// Rover telemetry and actuator outputs, owned by the caller and mutated
/// in place once per tick.
#[derive(Debug, Clone, Default)]
pub struct RoverState {
    /// World position in map units.
    pub pos: [f64; 2],
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub vel: f64,
    pub mode: DriveMode,
    pub near_sample: bool,
    pub picking_up: bool,

    pub throttle: f64,
    pub brake: f64,
    /// Steering angle in degrees, always within the configured limit.
    pub steer: f64,
    /// Set when a pickup should be requested. Cleared by the caller.
    pub send_pickup: bool,

    /// `None` when perception produced nothing this tick.
    pub nav: Option<NavDistribution>,
    pub thresholds: TerrainThresholds,
}

impl RoverState {
    pub fn pose(&self) -> WorldPose {
        WorldPose::new(self.pos[0], self.pos[1], self.yaw)
    }

    /// Whether every telemetry value the core reads is finite.
    pub fn telemetry_is_finite(&self) -> bool {
        self.pose().is_finite()
            && self.pitch.is_finite()
            && self.roll.is_finite()
            && self.vel.is_finite()
    }
}

/// Signed shortest difference `to - from` in degrees, in `(-180, 180]`.
pub fn wrapped_yaw_delta(from: f64, to: f64) -> f64 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Stationary-episode detection and recovery-turn bookkeeping.
#[derive(Debug, Clone)]
pub struct StuckTracker {
    config: StuckConfig,
    tick: u64,
    yaws: History<f64>,
    positions: History<[f64; 2]>,
    stuck: bool,
    recovery_turn: f64,
}

impl StuckTracker {
    pub fn new(config: StuckConfig, max_steer_deg: f64) -> Self {
        Self {
            config,
            tick: 0,
            yaws: History::new(config.history_len),
            positions: History::new(config.history_len),
            stuck: false,
            recovery_turn: -max_steer_deg,
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    /// Steering angle used for in-place turns.
    pub fn recovery_turn(&self) -> f64 {
        self.recovery_turn
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn yaw_history(&self) -> &History<f64> {
        &self.yaws
    }

    pub fn position_history(&self) -> &History<[f64; 2]> {
        &self.positions
    }

    /// Turn away from the side the rover was last steering toward.
    fn learn_turn(&mut self, prev_steer: f64, vel: f64, drive: &DriveConfig) {
        if prev_steer != 0.0 && vel > drive.turn_learn_vel {
            self.recovery_turn = if prev_steer > 0.0 {
                -drive.max_steer_deg
            } else {
                drive.max_steer_deg
            };
        }
    }

    /// Advance the sampling schedule and update the stuck flag.
    ///
    /// Non-finite telemetry on a sampling tick is skipped so a dropout never
    /// evicts a real sample.
    fn observe(&mut self, rover: &RoverState) {
        self.tick = self.tick.wrapping_add(1);
        let phase = self.tick % self.config.period;
        if phase == self.config.yaw_offset {
            if rover.yaw.is_finite() {
                self.yaws.push(rover.yaw);
            } else {
                tracing::debug!("tick {}: yaw sample skipped (non-finite)", self.tick);
            }
        }
        if phase == self.config.position_offset {
            if rover.pos.iter().all(|v| v.is_finite()) {
                self.positions.push(rover.pos);
            } else {
                tracing::debug!("tick {}: position sample skipped (non-finite)", self.tick);
            }
        }

        if self.stuck || rover.near_sample || self.positions.len() < 2 {
            return;
        }
        if let (Some(first), Some(last)) = (self.positions.oldest(), self.positions.latest()) {
            let tol = self.config.position_tolerance;
            if (last[0] - first[0]).abs() < tol && (last[1] - first[1]).abs() < tol {
                tracing::info!(
                    "rover stuck near ({:.2}, {:.2}); turning {:+.0} deg",
                    last[0],
                    last[1],
                    self.recovery_turn
                );
                self.stuck = true;
            }
        }
    }

    /// Whether the sampled yaw has swung far enough to end the recovery.
    fn turned_enough(&self) -> bool {
        match (self.yaws.oldest(), self.yaws.latest()) {
            (Some(first), Some(last)) => {
                wrapped_yaw_delta(*first, *last).abs() > self.config.recovery_yaw_deg
            }
            _ => false,
        }
    }

    fn finish_recovery(&mut self) {
        self.yaws.clear();
        self.positions.pop_oldest();
        self.stuck = false;
        tracing::info!("stuck recovery complete after {} ticks", self.tick);
    }
}

/// The decision state machine with its persistent stuck tracker.
#[derive(Debug, Clone)]
pub struct Controller {
    drive: DriveConfig,
    stuck: StuckTracker,
}

impl Controller {
    pub fn new(drive: DriveConfig, stuck: StuckConfig) -> Self {
        Self {
            drive,
            stuck: StuckTracker::new(stuck, drive.max_steer_deg),
        }
    }

    pub fn stuck_tracker(&self) -> &StuckTracker {
        &self.stuck
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.is_stuck()
    }

    /// Run one decision tick, writing commands into `rover`.
    pub fn decide(&mut self, rover: &mut RoverState) {
        let drive = self.drive;
        self.stuck.learn_turn(rover.steer, rover.vel, &drive);
        self.stuck.observe(rover);

        if self.stuck.is_stuck() {
            rover.throttle = 0.0;
            rover.brake = 0.0;
            rover.steer = self.stuck.recovery_turn();
            if self.stuck.turned_enough() {
                self.stuck.finish_recovery();
                rover.steer = 0.0;
            }
        } else if let Some(nav) = rover.nav.take() {
            match rover.mode {
                DriveMode::Forward => self.forward(rover, &nav),
                DriveMode::Stop => self.stop(rover, &nav),
            }
            rover.nav = Some(nav);
        } else {
            rover.throttle = drive.throttle_set;
            rover.steer = 0.0;
            rover.brake = 0.0;
        }

        if rover.near_sample && rover.vel == 0.0 && !rover.picking_up {
            rover.send_pickup = true;
        }
        rover.steer = self.clamp_steer(rover.steer);
    }

    fn forward(&self, rover: &mut RoverState, nav: &NavDistribution) {
        let enough = nav.len() >= rover.thresholds.stop_forward;
        if rover.near_sample {
            self.set_mode(rover, DriveMode::Stop);
        } else if enough {
            rover.throttle = if rover.vel < self.drive.max_vel {
                self.drive.throttle_set
            } else {
                0.0
            };
            rover.brake = 0.0;
            rover.steer = self.mean_steer(nav);
        } else {
            rover.throttle = 0.0;
            rover.brake = self.drive.brake_set;
            rover.steer = 0.0;
            self.set_mode(rover, DriveMode::Stop);
        }
    }

    fn stop(&self, rover: &mut RoverState, nav: &NavDistribution) {
        if rover.vel > self.drive.stop_creep_vel {
            rover.throttle = 0.0;
            rover.brake = self.drive.brake_set;
            rover.steer = 0.0;
            return;
        }
        if nav.len() >= rover.thresholds.go_forward {
            rover.throttle = self.drive.throttle_set;
            rover.brake = 0.0;
            rover.steer = self.mean_steer(nav);
            self.set_mode(rover, DriveMode::Forward);
        } else if rover.near_sample {
            rover.steer = 0.0;
            rover.brake = self.drive.brake_set;
        } else {
            rover.throttle = 0.0;
            rover.brake = 0.0;
            rover.steer = self.stuck.recovery_turn();
        }
    }

    fn set_mode(&self, rover: &mut RoverState, mode: DriveMode) {
        if rover.mode != mode {
            tracing::debug!("drive mode {:?} -> {:?}", rover.mode, mode);
            rover.mode = mode;
        }
    }

    fn mean_steer(&self, nav: &NavDistribution) -> f64 {
        self.clamp_steer(nav.mean_angle_deg().unwrap_or(0.0))
    }

    fn clamp_steer(&self, steer: f64) -> f64 {
        if steer.is_finite() {
            steer.clamp(-self.drive.max_steer_deg, self.drive.max_steer_deg)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn controller() -> Controller {
        Controller::new(DriveConfig::default(), StuckConfig::default())
    }

    fn rover_with(nav: NavDistribution) -> RoverState {
        RoverState {
            nav: Some(nav),
            thresholds: TerrainThresholds::default(),
            ..RoverState::default()
        }
    }

    #[test]
    fn forward_with_enough_terrain_steers_to_mean_angle() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 10f64.to_radians()));
        rover.vel = 0.5;
        c.decide(&mut rover);
        assert_eq!(rover.mode, DriveMode::Forward);
        assert_eq!(rover.throttle, 0.2);
        assert_eq!(rover.brake, 0.0);
        assert_abs_diff_eq!(rover.steer, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn forward_at_max_velocity_coasts() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.vel = 2.0;
        c.decide(&mut rover);
        assert_eq!(rover.throttle, 0.0);
        assert_eq!(rover.brake, 0.0);
    }

    #[test]
    fn steer_is_clamped() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 1.2));
        c.decide(&mut rover);
        assert_eq!(rover.steer, 15.0);
        let mut rover = rover_with(NavDistribution::uniform(500, -1.2));
        c.decide(&mut rover);
        assert_eq!(rover.steer, -15.0);
    }

    #[test]
    fn near_sample_in_forward_only_switches_mode() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.near_sample = true;
        rover.throttle = 0.2;
        rover.vel = 1.0;
        c.decide(&mut rover);
        assert_eq!(rover.mode, DriveMode::Stop);
        assert_eq!(rover.throttle, 0.2);
    }

    #[test]
    fn stopped_without_terrain_turns_in_place() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(10, 0.0));
        rover.mode = DriveMode::Stop;
        rover.vel = 0.1;
        c.decide(&mut rover);
        assert_eq!(rover.mode, DriveMode::Stop);
        assert_eq!(rover.brake, 0.0);
        assert_eq!(rover.throttle, 0.0);
        assert_eq!(rover.steer, -15.0);
    }

    #[test]
    fn stopped_and_moving_keeps_braking() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(2000, 0.3));
        rover.mode = DriveMode::Stop;
        rover.vel = 0.8;
        c.decide(&mut rover);
        assert_eq!(rover.mode, DriveMode::Stop);
        assert_eq!(rover.brake, 10.0);
        assert_eq!(rover.steer, 0.0);
    }

    #[test]
    fn stopped_near_sample_holds_brake() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::default());
        rover.mode = DriveMode::Stop;
        rover.near_sample = true;
        rover.steer = 4.0;
        c.decide(&mut rover);
        assert_eq!(rover.brake, 10.0);
        assert_eq!(rover.steer, 0.0);
        assert!(rover.send_pickup);
    }

    #[test]
    fn pickup_waits_for_full_stop_and_idle_arm() {
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::default());
        rover.mode = DriveMode::Stop;
        rover.near_sample = true;
        rover.vel = 0.05;
        c.decide(&mut rover);
        assert!(!rover.send_pickup);
        rover.vel = 0.0;
        rover.picking_up = true;
        c.decide(&mut rover);
        assert!(!rover.send_pickup);
    }

    #[test]
    fn dropout_drives_straight() {
        let mut c = controller();
        let mut rover = RoverState {
            steer: 7.0,
            brake: 10.0,
            ..RoverState::default()
        };
        c.decide(&mut rover);
        assert_eq!(rover.throttle, 0.2);
        assert_eq!(rover.brake, 0.0);
        assert_eq!(rover.steer, 0.0);
    }

    #[test]
    fn recovery_turn_is_learned_from_fast_steering() {
        let mut c = controller();
        let mut rover = RoverState {
            steer: 8.0,
            vel: 1.5,
            ..RoverState::default()
        };
        c.decide(&mut rover);
        assert_eq!(c.stuck_tracker().recovery_turn(), -15.0);

        rover.steer = -3.0;
        rover.vel = 1.2;
        c.decide(&mut rover);
        assert_eq!(c.stuck_tracker().recovery_turn(), 15.0);

        // Too slow to learn from.
        rover.steer = 6.0;
        rover.vel = 0.9;
        c.decide(&mut rover);
        assert_eq!(c.stuck_tracker().recovery_turn(), 15.0);
    }

    #[test]
    fn yaw_delta_wraps_shortest_way() {
        assert_abs_diff_eq!(wrapped_yaw_delta(350.0, 10.0), 20.0);
        assert_abs_diff_eq!(wrapped_yaw_delta(10.0, 350.0), -20.0);
        assert_abs_diff_eq!(wrapped_yaw_delta(0.0, 45.0), 45.0);
    }

    #[test]
    fn stuck_episode_turns_until_yaw_swings() {
        let cfg = StuckConfig::default();
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.pos = [50.0, 60.0];
        rover.yaw = 100.0;

        // Two position samples at the same spot: ticks 115 and 231.
        for _ in 0..(cfg.period + cfg.position_offset) {
            c.decide(&mut rover);
        }
        assert!(c.is_stuck());
        assert_eq!(rover.throttle, 0.0);
        assert_eq!(rover.brake, 0.0);
        assert_eq!(rover.steer, -15.0);

        // Yaw samples so far: 100 at tick 31 and 147. Swing to 140 for the next one.
        rover.yaw = 140.0;
        let mut ticks = 0;
        while c.is_stuck() {
            c.decide(&mut rover);
            ticks += 1;
            assert!(ticks <= cfg.period, "recovery must finish within one period");
        }
        assert_eq!(rover.steer, 0.0);
        assert!(c.stuck_tracker().yaw_history().is_empty());
        assert_eq!(c.stuck_tracker().position_history().len(), 1);
    }

    #[test]
    fn non_finite_yaw_sample_keeps_turn_reference() {
        let cfg = StuckConfig::default();
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.pos = [50.0, 60.0];
        rover.yaw = 100.0;
        for _ in 0..(cfg.period + cfg.position_offset) {
            c.decide(&mut rover);
        }
        assert!(c.is_stuck());

        // Turned to 140, but the next yaw sample (tick 263) is lost.
        rover.yaw = 140.0;
        for tick in (cfg.period + cfg.position_offset + 1)..=(2 * cfg.period + cfg.yaw_offset) {
            rover.yaw = if tick == 2 * cfg.period + cfg.yaw_offset {
                f64::NAN
            } else {
                140.0
            };
            c.decide(&mut rover);
        }
        assert!(c.is_stuck());
        assert_eq!(c.stuck_tracker().tick_count(), 2 * cfg.period + cfg.yaw_offset);
        assert_eq!(c.stuck_tracker().yaw_history().latest(), Some(&100.0));

        // The following sample (tick 379) still compares against 100.
        rover.yaw = 140.0;
        let mut ticks = 0;
        while c.is_stuck() {
            c.decide(&mut rover);
            ticks += 1;
            assert!(ticks <= cfg.period);
        }
        assert_eq!(c.stuck_tracker().tick_count(), 3 * cfg.period + cfg.yaw_offset);
    }

    #[test]
    fn non_finite_position_sample_is_skipped() {
        let cfg = StuckConfig::default();
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.pos = [50.0, 60.0];
        // Position slots are ticks 115 and 231; lose the second one.
        for tick in 1..=(cfg.period + cfg.position_offset) {
            rover.pos = if tick == cfg.period + cfg.position_offset {
                [f64::NAN, f64::NAN]
            } else {
                [50.0, 60.0]
            };
            c.decide(&mut rover);
        }
        assert!(!c.is_stuck());
        assert_eq!(c.stuck_tracker().position_history().len(), 1);
        assert_eq!(c.stuck_tracker().position_history().latest(), Some(&[50.0, 60.0]));
    }

    #[test]
    fn near_sample_suppresses_stuck() {
        let cfg = StuckConfig::default();
        let mut c = controller();
        let mut rover = rover_with(NavDistribution::uniform(500, 0.0));
        rover.near_sample = true;
        for _ in 0..(cfg.period + cfg.position_offset) {
            c.decide(&mut rover);
        }
        assert!(!c.is_stuck());
    }
}
