//! Coordinate-frame math between image pixels, the rover frame and the
//! world grid.
//!
//! Rover frame: origin at the bottom-center of the rectified image, `x`
//! forward (up the image), `y` to the left. Units are rectified pixels.
//! World frame: map units, `scale` rectified pixels per unit.
//!
//! Every forward transform has an exact algebraic inverse; the only lossy
//! step is the clamp-and-truncate in [`to_world`].

use image::GrayImage;

/// Rover position and heading in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorldPose {
    pub x: f64,
    pub y: f64,
    /// Heading in degrees, counter-clockwise from the world x axis.
    pub yaw_deg: f64,
}

impl WorldPose {
    pub fn new(x: f64, y: f64, yaw_deg: f64) -> Self {
        Self { x, y, yaw_deg }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.yaw_deg.is_finite()
    }
}

// ── Image → rover frame ──────────────────────────────────────────────────

/// Rover-frame position of the pixel at `(col, row)` in a `width × height` image.
#[inline]
pub fn pixel_to_rover(col: u32, row: u32, width: u32, height: u32) -> [f64; 2] {
    [
        height as f64 - row as f64,
        width as f64 / 2.0 - col as f64,
    ]
}

/// Inverse of [`pixel_to_rover`], returning fractional `(col, row)`.
#[inline]
pub fn rover_to_pixel(p: [f64; 2], width: u32, height: u32) -> [f64; 2] {
    [width as f64 / 2.0 - p[1], height as f64 - p[0]]
}

/// Rover-frame coordinates of every nonzero mask pixel, in row-major order.
pub fn rover_coords(mask: &GrayImage) -> Vec<[f64; 2]> {
    rover_coords_where(mask, |_, _| true)
}

/// Like [`rover_coords`] but only for pixels accepted by `keep(col, row)`.
pub fn rover_coords_where<F>(mask: &GrayImage, mut keep: F) -> Vec<[f64; 2]>
where
    F: FnMut(u32, u32) -> bool,
{
    let (w, h) = mask.dimensions();
    mask.enumerate_pixels()
        .filter(|(col, row, px)| px[0] != 0 && keep(*col, *row))
        .map(|(col, row, _)| pixel_to_rover(col, row, w, h))
        .collect()
}

/// Distance and `atan2(y, x)` angle (radians) for each rover-frame point.
pub fn to_polar(points: &[[f64; 2]]) -> (Vec<f64>, Vec<f64>) {
    points
        .iter()
        .map(|p| (p[0].hypot(p[1]), p[1].atan2(p[0])))
        .unzip()
}

// ── Rotation ─────────────────────────────────────────────────────────────

/// Rotate a point counter-clockwise by `yaw_deg`.
#[inline]
pub fn rotate(p: [f64; 2], yaw_deg: f64) -> [f64; 2] {
    let (s, c) = yaw_deg.to_radians().sin_cos();
    [p[0] * c - p[1] * s, p[0] * s + p[1] * c]
}

/// Exact inverse of [`rotate`].
#[inline]
pub fn rotate_inverse(p: [f64; 2], yaw_deg: f64) -> [f64; 2] {
    let (s, c) = yaw_deg.to_radians().sin_cos();
    [p[0] * c + p[1] * s, -p[0] * s + p[1] * c]
}

// ── Translation and scaling ──────────────────────────────────────────────

/// `p / scale + origin`.
#[inline]
pub fn translate_and_scale(p: [f64; 2], origin: [f64; 2], scale: f64) -> [f64; 2] {
    [p[0] / scale + origin[0], p[1] / scale + origin[1]]
}

/// Exact inverse of [`translate_and_scale`].
#[inline]
pub fn translate_and_scale_inverse(p: [f64; 2], origin: [f64; 2], scale: f64) -> [f64; 2] {
    [(p[0] - origin[0]) * scale, (p[1] - origin[1]) * scale]
}

// ── Composite rover ⇄ world ──────────────────────────────────────────────

/// Continuous world position of a rover-frame point.
#[inline]
pub fn rover_to_world(p: [f64; 2], pose: &WorldPose, scale: f64) -> [f64; 2] {
    translate_and_scale(rotate(p, pose.yaw_deg), [pose.x, pose.y], scale)
}

/// Rover-frame position of a world point; exact inverse of [`rover_to_world`].
#[inline]
pub fn to_rover_from_world(world: [f64; 2], pose: &WorldPose, scale: f64) -> [f64; 2] {
    rotate_inverse(
        translate_and_scale_inverse(world, [pose.x, pose.y], scale),
        pose.yaw_deg,
    )
}

/// Saturate a world coordinate onto `[0, map_size - 1]` and truncate.
///
/// Non-finite input saturates to the nearest bound (NaN to 0).
#[inline]
pub fn clamp_to_grid(v: f64, map_size: usize) -> usize {
    let max = map_size.saturating_sub(1);
    if v.is_nan() || v <= 0.0 {
        0
    } else if v >= max as f64 {
        max
    } else {
        v as usize
    }
}

/// Grid cell `[ix, iy]` a rover-frame point projects onto.
#[inline]
pub fn to_world(p: [f64; 2], pose: &WorldPose, map_size: usize, scale: f64) -> [usize; 2] {
    let w = rover_to_world(p, pose, scale);
    [clamp_to_grid(w[0], map_size), clamp_to_grid(w[1], map_size)]
}
