//! Persistent world-frame evidence grid.
//!
//! Three independent channels (obstacle, sample, navigable) of unsigned
//! counts, indexed `(ix, iy)` with `iy` as the row. Counts only grow;
//! nothing in the core resets or decrements them.

use std::collections::HashMap;

use image::{Rgb, RgbImage};

use crate::config::MapConfig;
use crate::error::PilotError;
use crate::geometry::{to_world, WorldPose};

/// Evidence channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Obstacle,
    Sample,
    Navigable,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Obstacle, Channel::Sample, Channel::Navigable];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Obstacle => "obstacle",
            Channel::Sample => "sample",
            Channel::Navigable => "navigable",
        }
    }
}

/// Rover-frame pixel sets for one tick, ready for projection.
#[derive(Debug, Clone, Default)]
pub struct FrameEvidence {
    pub obstacle: Vec<[f64; 2]>,
    pub sample: Vec<[f64; 2]>,
    pub navigable: Vec<[f64; 2]>,
}

/// Square evidence grid.
#[derive(Debug, Clone)]
pub struct WorldMap {
    size: usize,
    obstacle: Vec<u32>,
    sample: Vec<u32>,
    navigable: Vec<u32>,
}

impl WorldMap {
    /// All-zero map of `size × size` cells.
    pub fn new(size: usize) -> Self {
        let n = size * size;
        Self {
            size,
            obstacle: vec![0; n],
            sample: vec![0; n],
            navigable: vec![0; n],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn idx(&self, ix: usize, iy: usize) -> usize {
        iy * self.size + ix
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut [u32] {
        match channel {
            Channel::Obstacle => &mut self.obstacle,
            Channel::Sample => &mut self.sample,
            Channel::Navigable => &mut self.navigable,
        }
    }

    /// Read-only row-major view of one channel.
    pub fn channel(&self, channel: Channel) -> &[u32] {
        match channel {
            Channel::Obstacle => &self.obstacle,
            Channel::Sample => &self.sample,
            Channel::Navigable => &self.navigable,
        }
    }

    /// Count at a cell, or `None` outside the grid.
    pub fn get(&self, channel: Channel, ix: usize, iy: usize) -> Option<u32> {
        if ix >= self.size || iy >= self.size {
            return None;
        }
        Some(self.channel(channel)[self.idx(ix, iy)])
    }

    /// Add `amount` to one cell. Indices must already be clamped.
    pub fn add(
        &mut self,
        channel: Channel,
        ix: usize,
        iy: usize,
        amount: u32,
    ) -> Result<(), PilotError> {
        debug_assert!(ix < self.size && iy < self.size);
        let i = self.idx(ix, iy);
        let cell = &mut self.channel_mut(channel)[i];
        *cell = cell
            .checked_add(amount)
            .ok_or(PilotError::EvidenceOverflow {
                ix,
                iy,
                channel: channel.name(),
            })?;
        Ok(())
    }

    /// Whether obstacle evidence at a cell exceeds `threshold`.
    pub fn is_confirmed_obstacle(&self, ix: usize, iy: usize, threshold: u32) -> bool {
        self.get(Channel::Obstacle, ix, iy)
            .is_some_and(|v| v > threshold)
    }

    /// Project every rover-frame pixel of `points` and add `amount` to the
    /// cell it lands in. On overflow the channel is left unchanged.
    pub fn accumulate(
        &mut self,
        channel: Channel,
        points: &[[f64; 2]],
        pose: &WorldPose,
        scale: f64,
        amount: u32,
    ) -> Result<(), PilotError> {
        let staged = self.stage(channel, points, pose, scale, amount)?;
        self.commit(channel, staged);
        Ok(())
    }

    /// New values of every cell `points` touch, without writing them.
    fn stage(
        &self,
        channel: Channel,
        points: &[[f64; 2]],
        pose: &WorldPose,
        scale: f64,
        amount: u32,
    ) -> Result<HashMap<usize, u32>, PilotError> {
        let values = self.channel(channel);
        let mut staged: HashMap<usize, u32> = HashMap::new();
        for p in points {
            let [ix, iy] = to_world(*p, pose, self.size, scale);
            let i = self.idx(ix, iy);
            let cell = staged.entry(i).or_insert(values[i]);
            *cell = cell
                .checked_add(amount)
                .ok_or(PilotError::EvidenceOverflow {
                    ix,
                    iy,
                    channel: channel.name(),
                })?;
        }
        Ok(staged)
    }

    fn commit(&mut self, channel: Channel, staged: HashMap<usize, u32>) {
        let values = self.channel_mut(channel);
        for (i, v) in staged {
            values[i] = v;
        }
    }

    /// Run the attitude-gated update for one tick.
    ///
    /// Returns `Ok(false)` without touching the map when the attitude is
    /// outside the confidence gate. The update is all-or-nothing: if any
    /// counter would overflow, no channel is written.
    pub fn update(
        &mut self,
        evidence: &FrameEvidence,
        pose: &WorldPose,
        pitch_deg: f64,
        roll_deg: f64,
        scale: f64,
        config: &MapConfig,
    ) -> Result<bool, PilotError> {
        if !config.attitude_gate.admits(pitch_deg, roll_deg) {
            tracing::trace!(
                "attitude gate closed (pitch={:.2}, roll={:.2}); map not updated",
                pitch_deg,
                roll_deg
            );
            return Ok(false);
        }
        let obstacle = self.stage(
            Channel::Obstacle,
            &evidence.obstacle,
            pose,
            scale,
            config.obstacle_increment,
        )?;
        let navigable = self.stage(
            Channel::Navigable,
            &evidence.navigable,
            pose,
            scale,
            config.navigable_increment,
        )?;
        let sample = self.stage(
            Channel::Sample,
            &evidence.sample,
            pose,
            scale,
            config.sample_increment,
        )?;
        self.commit(Channel::Obstacle, obstacle);
        self.commit(Channel::Navigable, navigable);
        self.commit(Channel::Sample, sample);
        Ok(true)
    }

    /// Render the channels into R (obstacle), G (sample), B (navigable),
    /// saturating at 255. Row 0 of the image is grid row 0.
    pub fn to_rgb_image(&self) -> RgbImage {
        let n = self.size as u32;
        let sat = |v: u32| v.min(255) as u8;
        RgbImage::from_fn(n, n, |x, y| {
            let i = self.idx(x as usize, y as usize);
            Rgb([sat(self.obstacle[i]), sat(self.sample[i]), sat(self.navigable[i])])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttitudeGate;

    fn level_config() -> MapConfig {
        MapConfig::default()
    }

    fn evidence() -> FrameEvidence {
        FrameEvidence {
            obstacle: vec![[25.0, 0.0], [25.0, 1.0]],
            sample: vec![[5.0, 5.0]],
            navigable: vec![[15.0, -3.0], [16.0, -4.0], [40.0, 0.0]],
        }
    }

    #[test]
    fn update_applies_weighted_increments() {
        let mut map = WorldMap::new(200);
        let pose = WorldPose::new(100.0, 100.0, 0.0);
        let updated = map
            .update(&evidence(), &pose, 0.0, 0.0, 10.0, &level_config())
            .expect("no overflow");
        assert!(updated);
        // Two obstacle pixels land in cell (102, 100).
        assert_eq!(map.get(Channel::Obstacle, 102, 100), Some(2));
        // Both near navigable pixels land in (101, 99): 2 × 10.
        assert_eq!(map.get(Channel::Navigable, 101, 99), Some(20));
        assert_eq!(map.get(Channel::Navigable, 104, 100), Some(10));
        assert_eq!(map.get(Channel::Sample, 100, 100), Some(1));
    }

    #[test]
    fn tilted_attitude_skips_update() {
        let mut map = WorldMap::new(50);
        let pose = WorldPose::new(25.0, 25.0, 90.0);
        let updated = map
            .update(&evidence(), &pose, 4.0, 0.0, 10.0, &level_config())
            .expect("no overflow");
        assert!(!updated);
        assert!(Channel::ALL
            .iter()
            .all(|&c| map.channel(c).iter().all(|&v| v == 0)));
    }

    #[test]
    fn repeated_updates_are_monotone() {
        let mut map = WorldMap::new(200);
        let pose = WorldPose::new(60.0, 140.0, 217.0);
        let cfg = MapConfig {
            attitude_gate: AttitudeGate::default(),
            ..MapConfig::default()
        };
        let mut prev = map.clone();
        for _ in 0..5 {
            map.update(&evidence(), &pose, 359.8, 0.4, 10.0, &cfg)
                .expect("no overflow");
            for c in Channel::ALL {
                assert!(map
                    .channel(c)
                    .iter()
                    .zip(prev.channel(c))
                    .all(|(now, before)| now >= before));
            }
            prev = map.clone();
        }
        assert!(map.channel(Channel::Navigable).iter().sum::<u32>() > 0);
    }

    #[test]
    fn confirmed_obstacle_is_strictly_above_threshold() {
        let mut map = WorldMap::new(10);
        map.add(Channel::Obstacle, 3, 4, 250).expect("fits");
        assert!(!map.is_confirmed_obstacle(3, 4, 250));
        map.add(Channel::Obstacle, 3, 4, 1).expect("fits");
        assert!(map.is_confirmed_obstacle(3, 4, 250));
        assert!(!map.is_confirmed_obstacle(30, 4, 250));
    }

    #[test]
    fn overflow_is_reported() {
        let mut map = WorldMap::new(4);
        map.add(Channel::Navigable, 1, 2, u32::MAX).expect("fits");
        let err = map.add(Channel::Navigable, 1, 2, 1).unwrap_err();
        assert!(matches!(
            err,
            PilotError::EvidenceOverflow { ix: 1, iy: 2, channel: "navigable" }
        ));
    }

    #[test]
    fn overflowing_update_leaves_every_channel_untouched() {
        let mut map = WorldMap::new(200);
        let pose = WorldPose::new(100.0, 100.0, 0.0);
        // Room for one navigable increment at (101, 99), but two pixels land there.
        map.add(Channel::Navigable, 101, 99, u32::MAX - 15).expect("fits");
        let before = map.clone();

        let err = map
            .update(&evidence(), &pose, 0.0, 0.0, 10.0, &level_config())
            .unwrap_err();
        assert!(matches!(
            err,
            PilotError::EvidenceOverflow { ix: 101, iy: 99, channel: "navigable" }
        ));
        for c in Channel::ALL {
            assert_eq!(map.channel(c), before.channel(c));
        }
        assert_eq!(map.get(Channel::Obstacle, 102, 100), Some(0));
    }

    #[test]
    fn off_grid_projections_clamp_to_edges() {
        let mut map = WorldMap::new(20);
        let pose = WorldPose::new(19.5, 0.5, 0.0);
        let far = FrameEvidence {
            obstacle: vec![[1.0e5, -1.0e5]],
            ..FrameEvidence::default()
        };
        map.update(&far, &pose, 0.0, 0.0, 10.0, &level_config())
            .expect("no overflow");
        assert_eq!(map.get(Channel::Obstacle, 19, 0), Some(1));
    }

    #[test]
    fn rgb_export_saturates() {
        let mut map = WorldMap::new(3);
        map.add(Channel::Navigable, 2, 1, 4000).expect("fits");
        map.add(Channel::Obstacle, 2, 1, 7).expect("fits");
        let img = map.to_rgb_image();
        assert_eq!(*img.get_pixel(2, 1), Rgb([7, 0, 255]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }
}
