mod controller;
mod state;
mod worker;

pub use controller::{FrameStream, MonitorController, MonitorServices};
pub use state::{MonitorMode, MonitorStatus};
