//! Synthetic camera frames for unit tests.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

/// Light sand: navigable under the default thresholds.
pub(crate) const GROUND_RGB: Rgb<u8> = Rgb([200, 200, 200]);
/// Dark rock: neither navigable nor sample.
pub(crate) const ROCK_RGB: Rgb<u8> = Rgb([60, 50, 40]);
/// Yellow sample.
pub(crate) const SAMPLE_RGB: Rgb<u8> = Rgb([200, 180, 20]);

/// Camera frame showing nothing but open ground.
pub(crate) fn ground_frame(w: u32, h: u32) -> RgbImage {
    RgbImage::from_pixel(w, h, GROUND_RGB)
}

/// Fill an axis-aligned rectangle in camera pixels.
pub(crate) fn paint_rect(img: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), color);
}
