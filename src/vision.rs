//! Camera and model seams. Implementations wrap whatever capture device and
//! inference runtime the deployment has; the monitor loops only see these traits.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{db::KnownFace, geometry::PixelRect, gesture::PoseDetection};

pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream has ended.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub trait PoseEstimator: Send {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<PoseDetection>>;
}

pub trait FaceEncoder: Send {
    fn encode_faces(&mut self, frame: &RgbImage) -> Result<Vec<FaceObservation>>;
}

/// Opens the collaborators a monitor run needs. Each call gets fresh handles,
/// so a backend can be shared across runs.
pub trait VisionBackend: Send + Sync {
    fn open_camera(&self, index: i32) -> Result<Box<dyn FrameSource>>;
    fn pose_estimator(&self) -> Result<Box<dyn PoseEstimator>>;
    fn face_encoder(&self) -> Result<Box<dyn FaceEncoder>>;
}

/// A face found in a frame, with its location and 128-d style encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bbox: PixelRect,
    pub embedding: Vec<f32>,
}

pub fn face_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Nearest enrolled face within `tolerance`, if any.
pub fn closest_face<'a>(embedding: &[f32], known: &'a [KnownFace], tolerance: f32) -> Option<&'a KnownFace> {
    known
        .iter()
        .map(|face| (face, face_distance(embedding, &face.embedding)))
        .filter(|(_, distance)| *distance <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(face, _)| face)
}
