//! Perspective rectification of the oblique camera view onto a top-down
//! ground-plane raster.
//!
//! The warp is fixed for the lifetime of the rover, so the inverse mapping
//! (output pixel → source sample position) is tabulated once at
//! construction. Output pixels whose source position falls outside the
//! camera frame are border fill: they are black in the warped image and
//! zero in the validity mask.

use image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};

use crate::config::CameraConfig;
use crate::error::PilotError;
use crate::homography::fit_quad_homography;

/// Slack (pixels) for source positions that land on the frame border.
const EDGE_EPS: f64 = 1e-6;

/// Warped frame plus the mask of pixels populated by real source content.
#[derive(Debug, Clone)]
pub struct Rectified {
    pub image: RgbImage,
    /// 1 where the output pixel was sampled from inside the source frame.
    pub valid: GrayImage,
}

/// Precomputed ground-plane warp for one camera geometry.
#[derive(Debug, Clone)]
pub struct Rectifier {
    width: u32,
    height: u32,
    h: Matrix3<f64>,
    /// Source sample position per output pixel (row-major), `None` outside.
    lut: Vec<Option<[f32; 2]>>,
}

impl Rectifier {
    /// Build the warp from the camera's source and destination quads.
    ///
    /// Degenerate quads (collinear points, non-invertible or orientation
    /// flipping maps) are rejected here so they never surface per tick.
    pub fn new(camera: &CameraConfig) -> Result<Self, PilotError> {
        if camera.width == 0 || camera.height == 0 {
            return Err(PilotError::DegenerateGeometry(
                "frame dimensions must be non-zero".into(),
            ));
        }
        let src = camera.source_quad;
        let dst = camera.destination_quad();
        Self::from_quads(&src, &dst, camera.width, camera.height)
    }

    /// Build a warp from explicit quads for a `width × height` raster.
    pub fn from_quads(
        src: &[[f64; 2]; 4],
        dst: &[[f64; 2]; 4],
        width: u32,
        height: u32,
    ) -> Result<Self, PilotError> {
        check_convex(src, "source")?;
        check_convex(dst, "destination")?;

        let h = fit_quad_homography(src, dst)?;
        let h_inv = h.try_inverse().ok_or_else(|| {
            PilotError::DegenerateGeometry("rectification homography is singular".into())
        })?;

        // Homogeneous scale on the camera side of the ground plane; output
        // pixels with the opposite sign lie behind the camera.
        let c = dst.iter().fold([0.0, 0.0], |acc, p| [acc[0] + p[0] / 4.0, acc[1] + p[1] / 4.0]);
        let w_ref = (h_inv * Vector3::new(c[0], c[1], 1.0))[2].signum();

        let max_x = (width - 1) as f64;
        let max_y = (height - 1) as f64;
        let mut lut = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            for col in 0..width {
                let p = h_inv * Vector3::new(col as f64, row as f64, 1.0);
                if p[2] * w_ref <= 1e-12 {
                    lut.push(None);
                    continue;
                }
                let s = [p[0] / p[2], p[1] / p[2]];
                let inside = s[0].is_finite()
                    && s[1].is_finite()
                    && s[0] >= -EDGE_EPS
                    && s[1] >= -EDGE_EPS
                    && s[0] <= max_x + EDGE_EPS
                    && s[1] <= max_y + EDGE_EPS;
                lut.push(inside.then(|| {
                    [s[0].clamp(0.0, max_x) as f32, s[1].clamp(0.0, max_y) as f32]
                }));
            }
        }

        let n_valid = lut.iter().filter(|s| s.is_some()).count();
        if n_valid == 0 {
            return Err(PilotError::DegenerateGeometry(
                "no rectified pixel maps back into the camera frame".into(),
            ));
        }
        tracing::debug!(
            "rectifier ready: {}x{}, {} of {} output pixels valid",
            width,
            height,
            n_valid,
            lut.len()
        );

        Ok(Self {
            width,
            height,
            h,
            lut,
        })
    }

    /// Camera-to-rectified homography.
    pub fn homography(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Warp a frame. Returns `None` if its size differs from the configured
    /// camera raster.
    pub fn rectify(&self, frame: &RgbImage) -> Option<Rectified> {
        if frame.dimensions() != (self.width, self.height) {
            return None;
        }
        let mut image = RgbImage::new(self.width, self.height);
        let mut valid = GrayImage::new(self.width, self.height);
        for (i, sample) in self.lut.iter().enumerate() {
            let Some(s) = sample else {
                continue;
            };
            let col = i as u32 % self.width;
            let row = i as u32 / self.width;
            image.put_pixel(col, row, sample_bilinear(frame, s[0], s[1]));
            valid.put_pixel(col, row, Luma([1]));
        }
        Some(Rectified { image, valid })
    }
}

/// Reject quads that are self-intersecting or have collinear corners.
fn check_convex(quad: &[[f64; 2]; 4], side: &str) -> Result<(), PilotError> {
    let mut sign = 0.0f64;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let c = quad[(i + 2) % 4];
        let z = (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0]);
        if !z.is_finite() || z.abs() < 1e-9 {
            return Err(PilotError::DegenerateGeometry(format!(
                "{} quad has collinear corners",
                side
            )));
        }
        if sign != 0.0 && z.signum() != sign {
            return Err(PilotError::DegenerateGeometry(format!(
                "{} quad is not convex",
                side
            )));
        }
        sign = z.signum();
    }
    Ok(())
}

/// Bilinear RGB sample at a fractional position inside the frame.
fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = (x.floor() as u32).min(w - 1);
    let y0 = (y.floor() as u32).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, o) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *o = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
