pub mod student;
pub mod summary;

pub use student::{KnownFace, Student};
pub use summary::{PeriodAttendance, PeriodParticipation};
