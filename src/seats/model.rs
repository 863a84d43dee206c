//! Seat calibration records as they are stored on disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{FrameSize, PixelRect};

pub const SEAT_ID_PREFIX: &str = "Pupitre";

/// A calibrated region of the camera frame belonging to one desk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatBox {
    pub seat_id: String,
    /// `[x, y, w, h]`, either pixels or fractions of the frame depending on `normalized`.
    pub rect: [f64; 4],
    #[serde(default)]
    pub normalized: bool,
}

impl SeatBox {
    pub fn new(seat_id: impl Into<String>, x: f64, y: f64, w: f64, h: f64, normalized: bool) -> Self {
        Self {
            seat_id: seat_id.into(),
            rect: [x, y, w, h],
            normalized,
        }
    }

    /// Absolute pixel rectangle for a frame of the given size.
    pub fn pixel_rect(&self, frame: FrameSize) -> PixelRect {
        let [x, y, w, h] = self.rect;
        if self.normalized {
            let fw = f64::from(frame.width);
            let fh = f64::from(frame.height);
            PixelRect {
                x: x * fw,
                y: y * fh,
                w: w * fw,
                h: h * fh,
            }
        } else {
            PixelRect { x, y, w, h }
        }
    }
}

pub fn sequential_seat_id(position: usize) -> String {
    format!("{SEAT_ID_PREFIX} {position}")
}

/// `seat_id -> student_id`; `None` marks a seat with no student yet.
pub type SeatAssignments = BTreeMap<String, Option<String>>;

/// Seat boxes in calibration order plus their student assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeatMap {
    pub seats: Vec<SeatBox>,
    pub assignments: SeatAssignments,
}

impl SeatMap {
    pub fn contains(&self, seat_id: &str) -> bool {
        self.seats.iter().any(|seat| seat.seat_id == seat_id)
    }

    pub fn student_for(&self, seat_id: &str) -> Option<&str> {
        self.assignments
            .get(seat_id)
            .and_then(|student| student.as_deref())
            .filter(|student| !student.is_empty())
    }
}
