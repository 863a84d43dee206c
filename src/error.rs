use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::monitor::MonitorMode;

/// Failure categories surfaced to callers of the classroom core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ConfigurationMissing,
    Validation,
    Conflict,
    ResourceUnavailable,
    Persistence,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration missing at {path}: {reason}")]
    ConfigurationMissing { path: PathBuf, reason: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("seat '{0}' does not exist")]
    UnknownSeat(String),

    #[error("student '{0}' is not enrolled")]
    UnknownStudent(String),

    #[error("seat id '{0}' is already in use")]
    SeatIdInUse(String),

    #[error("cannot start {requested} monitor while {active} monitor is active")]
    MonitorBusy {
        requested: MonitorMode,
        active: MonitorMode,
    },

    #[error("{0} monitor is not active")]
    MonitorInactive(MonitorMode),

    #[error("{0} monitor already has an attached frame stream")]
    StreamAttached(MonitorMode),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::ConfigurationMissing { .. } => ErrorKind::ConfigurationMissing,
            MonitorError::Validation(_) => ErrorKind::Validation,
            MonitorError::UnknownSeat(_)
            | MonitorError::UnknownStudent(_)
            | MonitorError::SeatIdInUse(_)
            | MonitorError::MonitorBusy { .. }
            | MonitorError::MonitorInactive(_)
            | MonitorError::StreamAttached(_) => ErrorKind::Conflict,
            MonitorError::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            MonitorError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Wraps an internal `anyhow` chain as a persistence failure, keeping the full context.
    pub fn persistence(err: anyhow::Error) -> Self {
        MonitorError::Persistence(format!("{err:#}"))
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
