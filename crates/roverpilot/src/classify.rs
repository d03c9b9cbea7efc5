//! Color-threshold classification of a rectified frame into navigable
//! ground, obstacles and target samples.

use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::config::ClassifierConfig;
use crate::rectify::Rectified;

/// Binary masks (0/1) aligned with the rectified frame.
#[derive(Debug, Clone)]
pub struct ClassifiedFrame {
    pub navigable: GrayImage,
    pub obstacle: GrayImage,
    pub sample: GrayImage,
}

impl ClassifiedFrame {
    /// Debug raster: obstacle in red, sample in green, navigable in blue,
    /// each scaled to full intensity.
    pub fn vision_image(&self) -> RgbImage {
        let (w, h) = self.navigable.dimensions();
        RgbImage::from_fn(w, h, |x, y| {
            let on = |m: &GrayImage| if m.get_pixel(x, y)[0] != 0 { 255 } else { 0 };
            Rgb([on(&self.obstacle), on(&self.sample), on(&self.navigable)])
        })
    }
}

/// Navigable iff every channel strictly exceeds its threshold.
pub fn classify_navigable(frame: &RgbImage, rgb_thresh: [u8; 3]) -> GrayImage {
    threshold_mask(frame, |p| {
        p[0] > rgb_thresh[0] && p[1] > rgb_thresh[1] && p[2] > rgb_thresh[2]
    })
}

/// Sample iff green exceeds both `[0]` and `[1]` and blue is below `[2]`.
pub fn classify_sample(frame: &RgbImage, thresh: [u8; 3]) -> GrayImage {
    threshold_mask(frame, |p| {
        p[1] > thresh[0] && p[1] > thresh[1] && p[2] < thresh[2]
    })
}

/// `valid AND NOT navigable`.
pub fn obstacle_mask(valid: &GrayImage, navigable: &GrayImage) -> GrayImage {
    let (w, h) = valid.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let v = valid.get_pixel(x, y)[0] != 0 && navigable.get_pixel(x, y)[0] == 0;
        Luma([v as u8])
    })
}

/// Classify a rectified frame with the configured thresholds.
pub fn classify(rectified: &Rectified, config: &ClassifierConfig) -> ClassifiedFrame {
    let navigable = classify_navigable(&rectified.image, config.navigable_rgb);
    let obstacle = obstacle_mask(&rectified.valid, &navigable);
    let sample = classify_sample(&rectified.image, config.sample_rgb);
    ClassifiedFrame {
        navigable,
        obstacle,
        sample,
    }
}

/// Number of nonzero mask pixels in rows `rows.0..` and columns `[cols.0, cols.1)`.
pub fn count_in_window(mask: &GrayImage, row_start: u32, cols: (u32, u32)) -> usize {
    let (w, h) = mask.dimensions();
    let c1 = cols.1.min(w);
    let mut n = 0;
    for row in row_start.min(h)..h {
        for col in cols.0.min(c1)..c1 {
            if mask.get_pixel(col, row)[0] != 0 {
                n += 1;
            }
        }
    }
    n
}

fn threshold_mask<F>(frame: &RgbImage, pred: F) -> GrayImage
where
    F: Fn(&Rgb<u8>) -> bool,
{
    let (w, h) = frame.dimensions();
    GrayImage::from_fn(w, h, |x, y| Luma([pred(frame.get_pixel(x, y)) as u8]))
}
