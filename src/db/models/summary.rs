use serde::{Deserialize, Serialize};

/// Distinct students marked present in one period today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodAttendance {
    pub periodo: String,
    pub total: u64,
}

/// Participation totals for one period today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodParticipation {
    pub periodo: String,
    pub total_participantes: u64,
    pub total_participaciones: u64,
}
