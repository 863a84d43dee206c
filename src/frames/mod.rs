pub mod annotate;

use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, imageops, ImageFormat, RgbImage};
use serde::Serialize;

const MJPEG_BOUNDARY: &str = "frame";

/// One preview frame published by a monitor run.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedFrame {
    pub run_id: String,
    pub index: u64,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    /// The frame as one part of a `multipart/x-mixed-replace` stream.
    pub fn mjpeg_part(&self) -> Vec<u8> {
        mjpeg_part(&self.jpeg)
    }
}

pub fn mjpeg_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
}

pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(image)
        .context("failed to encode frame as jpeg")?;
    Ok(bytes)
}

/// Selfie view, so that a student's left hand appears on the left.
pub fn mirror(image: &mut RgbImage) {
    imageops::flip_horizontal_in_place(image);
}

pub fn is_jpeg(bytes: &[u8]) -> bool {
    matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg))
}
