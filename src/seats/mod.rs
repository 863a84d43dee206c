pub mod model;
pub mod store;

pub use model::{SeatAssignments, SeatBox, SeatMap};
pub use store::{LoadReport, SeatMapStore};
