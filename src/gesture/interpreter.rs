use serde::Serialize;

use crate::{
    config::GestureThresholds,
    geometry::{FrameSize, PixelPoint},
};

use super::keypoints::{KeypointKind, PoseDetection, SKELETON_EDGES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    fn joints(self) -> (KeypointKind, KeypointKind) {
        match self {
            HandSide::Left => (KeypointKind::LeftWrist, KeypointKind::LeftShoulder),
            HandSide::Right => (KeypointKind::RightWrist, KeypointKind::RightShoulder),
        }
    }
}

/// A wrist above its shoulder, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaisedHand {
    pub person: usize,
    pub side: HandSide,
    pub point: PixelPoint,
}

/// Everything the pose loop needs from one frame of detections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameGestures {
    /// Topmost raised hand across all retained persons.
    pub hand_event: Option<PixelPoint>,
    pub raised: Vec<RaisedHand>,
    /// Skeleton segments whose endpoints both cleared the keypoint threshold.
    pub segments: Vec<(PixelPoint, PixelPoint)>,
}

/// Stateless per-frame hand-raise detector.
#[derive(Debug, Clone)]
pub struct GestureInterpreter {
    thresholds: GestureThresholds,
}

impl GestureInterpreter {
    pub fn new(thresholds: GestureThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GestureThresholds {
        &self.thresholds
    }

    fn is_retained(&self, person: &PoseDetection) -> bool {
        person.score >= self.thresholds.person_min_score
    }

    pub fn hand_up(&self, person: &PoseDetection, side: HandSide) -> bool {
        let (wrist, shoulder) = side.joints();
        let wrist = person.keypoint(wrist);
        let shoulder = person.keypoint(shoulder);
        let min = self.thresholds.keypoint_min_score;
        wrist.score > min && shoulder.score > min && wrist.y < shoulder.y
    }

    pub fn interpret(&self, detections: &[PoseDetection], frame: FrameSize) -> FrameGestures {
        let mut gestures = FrameGestures::default();
        let min = self.thresholds.keypoint_min_score;

        for (index, person) in detections.iter().enumerate() {
            if !self.is_retained(person) {
                continue;
            }

            for (a, b) in SKELETON_EDGES {
                let (ka, kb) = (person.keypoint(a), person.keypoint(b));
                if ka.score > min && kb.score > min {
                    gestures
                        .segments
                        .push((frame.to_pixel(ka.x, ka.y), frame.to_pixel(kb.x, kb.y)));
                }
            }

            for side in [HandSide::Left, HandSide::Right] {
                if !self.hand_up(person, side) {
                    continue;
                }
                let wrist = person.keypoint(side.joints().0);
                let point = frame.to_pixel(wrist.x, wrist.y);
                gestures.raised.push(RaisedHand {
                    person: index,
                    side,
                    point,
                });

                // Strictly smaller only: on a tie the earlier hand stays.
                let higher = gestures
                    .hand_event
                    .map_or(true, |best| point.y < best.y);
                if higher {
                    gestures.hand_event = Some(point);
                }
            }
        }

        gestures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::keypoints::{Keypoint, KEYPOINT_COUNT};

    const FRAME: FrameSize = FrameSize {
        width: 640,
        height: 480,
    };

    fn interpreter() -> GestureInterpreter {
        GestureInterpreter::new(GestureThresholds::default())
    }

    fn person(score: f32) -> PoseDetection {
        PoseDetection {
            keypoints: [Keypoint::new(0.5, 0.5, 0.0); KEYPOINT_COUNT],
            score,
        }
    }

    fn set(person: &mut PoseDetection, kind: KeypointKind, y: f32, x: f32, score: f32) {
        person.keypoints[kind.index()] = Keypoint::new(y, x, score);
    }

    fn with_left_hand(score: f32, wrist_y: f32, shoulder_y: f32) -> PoseDetection {
        let mut p = person(score);
        set(&mut p, KeypointKind::LeftShoulder, shoulder_y, 0.25, 0.9);
        set(&mut p, KeypointKind::LeftWrist, wrist_y, 0.25, 0.9);
        p
    }

    #[test]
    fn wrist_above_shoulder_is_raised() {
        let gestures = interpreter().interpret(&[with_left_hand(0.8, 0.2, 0.5)], FRAME);
        assert_eq!(gestures.hand_event, Some(PixelPoint::new(160, 96)));
        assert_eq!(gestures.raised.len(), 1);
        assert_eq!(gestures.raised[0].side, HandSide::Left);
    }

    #[test]
    fn wrist_below_shoulder_is_not_raised() {
        let gestures = interpreter().interpret(&[with_left_hand(0.8, 0.7, 0.5)], FRAME);
        assert!(gestures.hand_event.is_none());
        assert!(gestures.raised.is_empty());
    }

    #[test]
    fn low_confidence_person_is_ignored() {
        let gestures = interpreter().interpret(&[with_left_hand(0.34, 0.2, 0.5)], FRAME);
        assert!(gestures.hand_event.is_none());
        assert!(gestures.segments.is_empty());

        let gestures = interpreter().interpret(&[with_left_hand(0.35, 0.2, 0.5)], FRAME);
        assert!(gestures.hand_event.is_some());
    }

    #[test]
    fn keypoint_threshold_is_exclusive() {
        let mut p = with_left_hand(0.8, 0.2, 0.5);
        set(&mut p, KeypointKind::LeftWrist, 0.2, 0.25, 0.3);
        assert!(!interpreter().hand_up(&p, HandSide::Left));

        set(&mut p, KeypointKind::LeftWrist, 0.2, 0.25, 0.31);
        set(&mut p, KeypointKind::LeftShoulder, 0.5, 0.25, 0.3);
        assert!(!interpreter().hand_up(&p, HandSide::Left));
    }

    #[test]
    fn topmost_hand_across_persons_wins() {
        let low = with_left_hand(0.8, 0.4, 0.6);
        let mut high = person(0.9);
        set(&mut high, KeypointKind::RightShoulder, 0.5, 0.75, 0.9);
        set(&mut high, KeypointKind::RightWrist, 0.1, 0.75, 0.9);

        let gestures = interpreter().interpret(&[low, high], FRAME);
        assert_eq!(gestures.raised.len(), 2);
        assert_eq!(gestures.hand_event, Some(PixelPoint::new(480, 48)));
    }

    #[test]
    fn tie_keeps_first_hand() {
        let mut p = with_left_hand(0.8, 0.2, 0.5);
        set(&mut p, KeypointKind::RightShoulder, 0.5, 0.75, 0.9);
        set(&mut p, KeypointKind::RightWrist, 0.2, 0.75, 0.9);

        let gestures = interpreter().interpret(&[p], FRAME);
        assert_eq!(gestures.raised.len(), 2);
        assert_eq!(gestures.hand_event, Some(PixelPoint::new(160, 96)));
    }

    #[test]
    fn segments_need_both_endpoints() {
        let mut p = person(0.8);
        set(&mut p, KeypointKind::LeftShoulder, 0.5, 0.25, 0.9);
        set(&mut p, KeypointKind::LeftElbow, 0.6, 0.25, 0.9);
        set(&mut p, KeypointKind::LeftWrist, 0.7, 0.25, 0.2);

        let gestures = interpreter().interpret(&[p], FRAME);
        assert_eq!(
            gestures.segments,
            vec![(PixelPoint::new(160, 240), PixelPoint::new(160, 288))]
        );
    }

    #[test]
    fn empty_frame_has_no_event() {
        assert_eq!(interpreter().interpret(&[], FRAME), FrameGestures::default());
    }
}
