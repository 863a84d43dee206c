//! Headless vision backend that plays back recorded detections.
//!
//! Each line of a replay file is one frame. A line is either a JSON array of
//! pose detections, or an object `{"poses": [...], "faces": [...]}` when the
//! recording also carries face observations. Frames themselves are blank.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use crate::{
    geometry::FrameSize,
    gesture::PoseDetection,
    vision::{FaceEncoder, FaceObservation, FrameSource, PoseEstimator, VisionBackend},
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReplayFrame {
    #[serde(default)]
    pub poses: Vec<PoseDetection>,
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Poses(Vec<PoseDetection>),
    Frame(ReplayFrame),
}

impl From<ReplayLine> for ReplayFrame {
    fn from(line: ReplayLine) -> Self {
        match line {
            ReplayLine::Poses(poses) => ReplayFrame {
                poses,
                faces: Vec::new(),
            },
            ReplayLine::Frame(frame) => frame,
        }
    }
}

struct Script {
    frames: Vec<ReplayFrame>,
    /// Index of the frame most recently handed out by the camera.
    cursor: AtomicUsize,
}

impl Script {
    fn current(&self) -> Option<&ReplayFrame> {
        let position = self.cursor.load(Ordering::Acquire);
        position.checked_sub(1).and_then(|i| self.frames.get(i))
    }
}

#[derive(Clone)]
pub struct ReplayBackend {
    script: Arc<Script>,
    frame_size: FrameSize,
    camera_available: bool,
}

impl ReplayBackend {
    pub fn new(frames: Vec<ReplayFrame>, frame_size: FrameSize) -> Self {
        Self {
            script: Arc::new(Script {
                frames,
                cursor: AtomicUsize::new(0),
            }),
            frame_size,
            camera_available: true,
        }
    }

    pub fn from_poses(frames: Vec<Vec<PoseDetection>>, frame_size: FrameSize) -> Self {
        Self::new(
            frames
                .into_iter()
                .map(|poses| ReplayFrame {
                    poses,
                    faces: Vec::new(),
                })
                .collect(),
            frame_size,
        )
    }

    pub fn from_file(path: &Path, frame_size: FrameSize) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;

        let mut frames = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: ReplayLine = serde_json::from_str(line).with_context(|| {
                format!("invalid replay frame at {}:{}", path.display(), number + 1)
            })?;
            frames.push(parsed.into());
        }

        if frames.is_empty() {
            bail!("replay file {} contains no frames", path.display());
        }
        Ok(Self::new(frames, frame_size))
    }

    /// A backend whose camera refuses to open.
    pub fn without_camera(mut self) -> Self {
        self.camera_available = false;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.script.frames.len()
    }

    /// How many frames the camera has handed out so far.
    pub fn frames_read(&self) -> usize {
        self.script.cursor.load(Ordering::Acquire)
    }
}

struct ReplayCamera {
    script: Arc<Script>,
    frame_size: FrameSize,
}

impl FrameSource for ReplayCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let position = self.script.cursor.load(Ordering::Acquire);
        if position >= self.script.frames.len() {
            return Ok(None);
        }
        self.script.cursor.store(position + 1, Ordering::Release);
        Ok(Some(RgbImage::new(
            self.frame_size.width,
            self.frame_size.height,
        )))
    }
}

struct ReplayPoses {
    script: Arc<Script>,
}

impl PoseEstimator for ReplayPoses {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<PoseDetection>> {
        Ok(self
            .script
            .current()
            .map(|frame| frame.poses.clone())
            .unwrap_or_default())
    }
}

struct ReplayFaces {
    script: Arc<Script>,
}

impl FaceEncoder for ReplayFaces {
    fn encode_faces(&mut self, _frame: &RgbImage) -> Result<Vec<FaceObservation>> {
        Ok(self
            .script
            .current()
            .map(|frame| frame.faces.clone())
            .unwrap_or_default())
    }
}

impl VisionBackend for ReplayBackend {
    fn open_camera(&self, index: i32) -> Result<Box<dyn FrameSource>> {
        if !self.camera_available {
            bail!("camera {index} could not be opened");
        }
        // Replays restart from the first frame for every run.
        self.script.cursor.store(0, Ordering::Release);
        Ok(Box::new(ReplayCamera {
            script: Arc::clone(&self.script),
            frame_size: self.frame_size,
        }))
    }

    fn pose_estimator(&self) -> Result<Box<dyn PoseEstimator>> {
        Ok(Box::new(ReplayPoses {
            script: Arc::clone(&self.script),
        }))
    }

    fn face_encoder(&self) -> Result<Box<dyn FaceEncoder>> {
        Ok(Box::new(ReplayFaces {
            script: Arc::clone(&self.script),
        }))
    }
}
