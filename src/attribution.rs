//! Maps a raised-hand position to the seat it belongs to.
//!
//! A hand is attributed to a seat when it lies within the seat's column
//! (`x <= hx <= x + w`) and at or above the seat's bottom edge
//! (`hy <= y + h`). There is no lower bound on `hy`: a hand above the top of
//! the box still counts, since a raised hand usually leaves the desk region.

use crate::{
    geometry::{FrameSize, PixelPoint},
    seats::SeatBox,
};

pub fn hand_in_seat(hand: PixelPoint, seat: &SeatBox, frame: FrameSize) -> bool {
    let rect = seat.pixel_rect(frame);
    let hx = f64::from(hand.x);
    let hy = f64::from(hand.y);
    rect.x <= hx && hx <= rect.right() && hy <= rect.bottom()
}

/// First seat, in configuration order, that claims the hand.
pub fn attribute<'a>(hand: PixelPoint, frame: FrameSize, seats: &'a [SeatBox]) -> Option<&'a SeatBox> {
    seats.iter().find(|seat| hand_in_seat(hand, seat, frame))
}
