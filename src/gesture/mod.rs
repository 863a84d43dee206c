//! Hand-raise detection from multi-person pose keypoints.

pub mod interpreter;
pub mod keypoints;

pub use interpreter::{FrameGestures, GestureInterpreter, HandSide, RaisedHand};
pub use keypoints::{Keypoint, KeypointKind, PoseDetection, KEYPOINT_COUNT, SKELETON_EDGES};
