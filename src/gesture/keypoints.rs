use serde::{Deserialize, Serialize};

/// The 17 body keypoints of a single-person pose, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

pub const KEYPOINT_COUNT: usize = 17;

impl KeypointKind {
    pub fn index(self) -> usize {
        self as usize
    }
}

pub const SKELETON_EDGES: [(KeypointKind, KeypointKind); 18] = [
    (KeypointKind::Nose, KeypointKind::LeftEye),
    (KeypointKind::Nose, KeypointKind::RightEye),
    (KeypointKind::LeftEye, KeypointKind::LeftEar),
    (KeypointKind::RightEye, KeypointKind::RightEar),
    (KeypointKind::Nose, KeypointKind::LeftShoulder),
    (KeypointKind::Nose, KeypointKind::RightShoulder),
    (KeypointKind::LeftShoulder, KeypointKind::LeftElbow),
    (KeypointKind::LeftElbow, KeypointKind::LeftWrist),
    (KeypointKind::RightShoulder, KeypointKind::RightElbow),
    (KeypointKind::RightElbow, KeypointKind::RightWrist),
    (KeypointKind::LeftShoulder, KeypointKind::RightShoulder),
    (KeypointKind::LeftShoulder, KeypointKind::LeftHip),
    (KeypointKind::RightShoulder, KeypointKind::RightHip),
    (KeypointKind::LeftHip, KeypointKind::RightHip),
    (KeypointKind::LeftHip, KeypointKind::LeftKnee),
    (KeypointKind::LeftKnee, KeypointKind::LeftAnkle),
    (KeypointKind::RightHip, KeypointKind::RightKnee),
    (KeypointKind::RightKnee, KeypointKind::RightAnkle),
];

/// One keypoint; `y` and `x` are fractions of frame height and width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Keypoint {
    pub y: f32,
    pub x: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(y: f32, x: f32, score: f32) -> Self {
        Self { y, x, score }
    }
}

impl From<[f32; 3]> for Keypoint {
    fn from([y, x, score]: [f32; 3]) -> Self {
        Self { y, x, score }
    }
}

impl From<Keypoint> for [f32; 3] {
    fn from(kp: Keypoint) -> Self {
        [kp.y, kp.x, kp.score]
    }
}

/// A single detected person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseDetection {
    pub keypoints: [Keypoint; KEYPOINT_COUNT],
    pub score: f32,
}

/// Length of one person row in MoveNet MultiPose output: 17 keypoint
/// triples, a 4-value bounding box, then the person score.
pub const MOVENET_ROW_LEN: usize = 56;
const MOVENET_SCORE_INDEX: usize = 55;

impl PoseDetection {
    pub fn keypoint(&self, kind: KeypointKind) -> Keypoint {
        self.keypoints[kind.index()]
    }

    pub fn from_movenet_row(row: &[f32]) -> Option<Self> {
        if row.len() < MOVENET_ROW_LEN {
            return None;
        }
        let mut keypoints = [Keypoint::default(); KEYPOINT_COUNT];
        for (i, slot) in keypoints.iter_mut().enumerate() {
            let base = i * 3;
            *slot = Keypoint::new(row[base], row[base + 1], row[base + 2]);
        }
        Some(Self {
            keypoints,
            score: row[MOVENET_SCORE_INDEX],
        })
    }
}
