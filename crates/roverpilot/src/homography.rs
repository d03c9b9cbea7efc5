//! Four-point plane-to-plane homography.
//!
//! The rectification warp is fixed by exactly four ground correspondences,
//! so the homography is the solution of an 8×8 linear system (with
//! `H[(2, 2)] = 1`) in Hartley-conditioned coordinates.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use thiserror::Error;

/// Four image points in drawing order.
pub type Quad = [[f64; 2]; 4];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomographyError {
    /// Three corners of one quad lie on a common line.
    #[error("{side} points are collinear")]
    Collinear { side: &'static str },
    #[error("non-finite {side} point")]
    NonFinite { side: &'static str },
    /// The correspondence system has no unique solution.
    #[error("correspondence system is singular")]
    Singular,
}

/// Map a point through `h`. `None` on the line at infinity.
pub fn apply(h: &Matrix3<f64>, p: [f64; 2]) -> Option<[f64; 2]> {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    if q[2].abs() < 1e-15 {
        return None;
    }
    Some([q[0] / q[2], q[1] / q[2]])
}

/// Twice the signed area of triangle `(a, b, c)`.
fn signed_area2(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn check_quad(q: &Quad, side: &'static str) -> Result<(), HomographyError> {
    if q.iter().flatten().any(|v| !v.is_finite()) {
        return Err(HomographyError::NonFinite { side });
    }
    // Each triple is three corners with one left out.
    for skip in 0..4 {
        let t: Vec<[f64; 2]> = (0..4).filter(|&i| i != skip).map(|i| q[i]).collect();
        if signed_area2(t[0], t[1], t[2]).abs() <= 1e-9 {
            return Err(HomographyError::Collinear { side });
        }
    }
    Ok(())
}

/// Similarity moving the centroid to the origin with mean radius √2.
fn conditioning(q: &Quad) -> Matrix3<f64> {
    let c = q
        .iter()
        .fold([0.0, 0.0], |acc, p| [acc[0] + p[0] / 4.0, acc[1] + p[1] / 4.0]);
    let mean_r = q
        .iter()
        .map(|p| (p[0] - c[0]).hypot(p[1] - c[1]))
        .sum::<f64>()
        / 4.0;
    let s = std::f64::consts::SQRT_2 / mean_r;
    Matrix3::new(s, 0.0, -s * c[0], 0.0, s, -s * c[1], 0.0, 0.0, 1.0)
}

fn condition_quad(t: &Matrix3<f64>, q: &Quad) -> Quad {
    q.map(|p| {
        let v = t * Vector3::new(p[0], p[1], 1.0);
        [v[0], v[1]]
    })
}

/// Homography `H` with `dst ≈ apply(H, src)` for each corner, scaled so that
/// `H[(2, 2)] == 1`.
pub fn fit_quad_homography(src: &Quad, dst: &Quad) -> Result<Matrix3<f64>, HomographyError> {
    check_quad(src, "source")?;
    check_quad(dst, "destination")?;

    let t_src = conditioning(src);
    let t_dst = conditioning(dst);
    let s = condition_quad(&t_src, src);
    let d = condition_quad(&t_dst, dst);

    // u = (h0 x + h1 y + h2) / (h6 x + h7 y + 1), likewise v with h3..h5.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let [x, y] = s[i];
        let [u, v] = d[i];
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b).ok_or(HomographyError::Singular)?;
    let h_cond = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Singular)?;
    let full = t_dst_inv * h_cond * t_src;
    let w = full[(2, 2)];
    if !w.is_finite() || w.abs() < 1e-15 {
        return Err(HomographyError::Singular);
    }
    Ok(full / w)
}
