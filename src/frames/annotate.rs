//! Overlays for live preview frames, drawn with `imageproc`.

use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};

use crate::geometry::{PixelPoint, PixelRect};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

pub const RAISED_WRIST_RADIUS: i32 = 20;

/// Offsets that spread a one-pixel stroke to `thickness` pixels.
fn stroke_offsets(thickness: i32) -> std::ops::RangeInclusive<i32> {
    let half = thickness.max(1) / 2;
    -half..=half
}

/// Line segment; pixels outside the image are clipped.
pub fn draw_line(image: &mut RgbImage, from: PixelPoint, to: PixelPoint, thickness: i32, color: Rgb<u8>) {
    for dy in stroke_offsets(thickness) {
        for dx in stroke_offsets(thickness) {
            draw_line_segment_mut(
                image,
                ((from.x + dx) as f32, (from.y + dy) as f32),
                ((to.x + dx) as f32, (to.y + dy) as f32),
                color,
            );
        }
    }
}

/// Circle outline, thickened with concentric rings.
pub fn draw_circle(image: &mut RgbImage, center: PixelPoint, radius: i32, thickness: i32, color: Rgb<u8>) {
    for offset in stroke_offsets(thickness) {
        let ring = radius + offset;
        if ring >= 0 {
            draw_hollow_circle_mut(image, (center.x, center.y), ring, color);
        }
    }
}

/// Rectangle outline covering both the left/top and right/bottom edges.
pub fn draw_rect(image: &mut RgbImage, rect: &PixelRect, thickness: i32, color: Rgb<u8>) {
    let left = rect.x as i32;
    let top = rect.y as i32;
    let right = rect.right() as i32;
    let bottom = rect.bottom() as i32;

    for inset in stroke_offsets(thickness) {
        let width = right - left - 2 * inset + 1;
        let height = bottom - top - 2 * inset + 1;
        if width < 1 || height < 1 {
            continue;
        }
        let outline = Rect::at(left + inset, top + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, outline, color);
    }
}
