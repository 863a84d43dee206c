use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorMode {
    Attendance,
    Pose,
    Calibration,
}

impl MonitorMode {
    pub const ALL: [MonitorMode; 3] = [
        MonitorMode::Attendance,
        MonitorMode::Pose,
        MonitorMode::Calibration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorMode::Attendance => "attendance",
            MonitorMode::Pose => "pose",
            MonitorMode::Calibration => "calibration",
        }
    }

    pub fn active_status(self) -> MonitorStatus {
        match self {
            MonitorMode::Attendance => MonitorStatus::AttendanceActive,
            MonitorMode::Pose => MonitorStatus::PoseActive,
            MonitorMode::Calibration => MonitorStatus::CalibrationActive,
        }
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MonitorMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MonitorMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown monitor mode '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    #[default]
    Idle,
    AttendanceActive,
    PoseActive,
    CalibrationActive,
}

impl MonitorStatus {
    pub fn active_mode(self) -> Option<MonitorMode> {
        match self {
            MonitorStatus::Idle => None,
            MonitorStatus::AttendanceActive => Some(MonitorMode::Attendance),
            MonitorStatus::PoseActive => Some(MonitorMode::Pose),
            MonitorStatus::CalibrationActive => Some(MonitorMode::Calibration),
        }
    }
}
