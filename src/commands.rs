//! Request-shaped entry points for the surrounding web layer.
//!
//! Nothing here returns `Err`: every outcome becomes a [`CommandResponse`]
//! (or a plain read model) carrying a message a person can act on.

use std::{collections::BTreeMap, fs, io};

use chrono::NaiveDate;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::{PeriodAttendance, PeriodParticipation, Student},
    error::{ErrorKind, MonitorError, MonitorResult},
    monitor::{MonitorMode, MonitorStatus},
    seats::{SeatAssignments, SeatBox},
    ClassroomContext,
};

pub const OUTSIDE_CLASS_HOURS: &str = "Fuera de horario de clase";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            seat_id: None,
            kind: None,
        }
    }

    fn with_seat(mut self, seat_id: String) -> Self {
        self.seat_id = Some(seat_id);
        self
    }

    fn from_result<T>(result: MonitorResult<T>, message: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self::ok(message(value)),
            Err(err) => err.into(),
        }
    }
}

impl From<MonitorError> for CommandResponse {
    fn from(err: MonitorError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            seat_id: None,
            kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddSeatRequest {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub w: Option<f64>,
    pub h: Option<f64>,
    #[serde(default)]
    pub normalized: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignSeatRequest {
    pub seat_id: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenameSeatRequest {
    pub old_id: Option<String>,
    pub new_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmAttendanceRequest {
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteStudentRequest {
    pub student_id: Option<String>,
}

/// One row of the enrolled-students list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentListing {
    pub id: String,
    pub nombre: String,
    pub apellido: String,
    pub registro_fecha: Option<NaiveDate>,
}

impl From<Student> for StudentListing {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            nombre: student.nombre,
            apellido: student.apellido,
            registro_fecha: student.registro_fecha,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatusView {
    pub attendance_active: bool,
    pub pose_active: bool,
    pub calibration_active: bool,
    pub period: String,
}

fn required(value: Option<String>, field: &str) -> MonitorResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MonitorError::Validation(format!("{field} is required")))
}

// --- Monitors ---

async fn start_monitor(ctx: &ClassroomContext, mode: MonitorMode) -> CommandResponse {
    CommandResponse::from_result(ctx.monitor.start(mode).await, |_| {
        format!("{mode} monitor started")
    })
}

async fn stop_monitor(ctx: &ClassroomContext, mode: MonitorMode) -> CommandResponse {
    CommandResponse::from_result(ctx.monitor.stop(mode).await, |_| {
        format!("{mode} monitor stopped")
    })
}

pub async fn start_attendance_monitor(ctx: &ClassroomContext) -> CommandResponse {
    start_monitor(ctx, MonitorMode::Attendance).await
}

pub async fn stop_attendance_monitor(ctx: &ClassroomContext) -> CommandResponse {
    stop_monitor(ctx, MonitorMode::Attendance).await
}

pub async fn start_pose_monitor(ctx: &ClassroomContext) -> CommandResponse {
    start_monitor(ctx, MonitorMode::Pose).await
}

pub async fn stop_pose_monitor(ctx: &ClassroomContext) -> CommandResponse {
    stop_monitor(ctx, MonitorMode::Pose).await
}

pub async fn start_calibration_monitor(ctx: &ClassroomContext) -> CommandResponse {
    start_monitor(ctx, MonitorMode::Calibration).await
}

pub async fn stop_calibration_monitor(ctx: &ClassroomContext) -> CommandResponse {
    stop_monitor(ctx, MonitorMode::Calibration).await
}

pub async fn status(ctx: &ClassroomContext) -> MonitorStatusView {
    let current = ctx.monitor.status().await;
    MonitorStatusView {
        attendance_active: current == MonitorStatus::AttendanceActive,
        pose_active: current == MonitorStatus::PoseActive,
        calibration_active: current == MonitorStatus::CalibrationActive,
        period: ctx
            .periods
            .current_period()
            .unwrap_or_else(|| OUTSIDE_CLASS_HOURS.to_string()),
    }
}

// --- Seats ---

pub fn seat_boxes(ctx: &ClassroomContext) -> Vec<SeatBox> {
    ctx.seats.seats()
}

pub fn seat_assignments(ctx: &ClassroomContext) -> SeatAssignments {
    ctx.seats.assignments()
}

pub fn participation_tallies(ctx: &ClassroomContext) -> BTreeMap<String, u64> {
    ctx.ledger.counts()
}

pub fn add_seat(ctx: &ClassroomContext, request: AddSeatRequest) -> CommandResponse {
    let (Some(x), Some(y), Some(w), Some(h)) = (request.x, request.y, request.w, request.h) else {
        return MonitorError::Validation("x, y, w and h are required".into()).into();
    };

    match ctx.seats.add_seat(x, y, w, h, request.normalized) {
        Ok(seat_id) => CommandResponse::ok(format!("Added {seat_id}")).with_seat(seat_id),
        Err(err) => err.into(),
    }
}

pub fn remove_last_seat(ctx: &ClassroomContext) -> CommandResponse {
    match ctx.seats.remove_last_seat() {
        Ok(true) => CommandResponse::ok("Removed last seat"),
        Ok(false) => CommandResponse {
            success: false,
            message: "There are no seats to remove".into(),
            seat_id: None,
            kind: None,
        },
        Err(err) => err.into(),
    }
}

pub fn assign_seat(ctx: &ClassroomContext, request: AssignSeatRequest) -> CommandResponse {
    let seat_id = match required(request.seat_id, "seat_id") {
        Ok(seat_id) => seat_id,
        Err(err) => return err.into(),
    };
    let student_id = request.student_id.filter(|id| !id.is_empty());

    let message = match &student_id {
        Some(student_id) => format!("Assigned {student_id} to {seat_id}"),
        None => format!("Cleared assignment for {seat_id}"),
    };
    match ctx.seats.assign(student_id.as_deref(), &seat_id) {
        Ok(()) => CommandResponse::ok(message).with_seat(seat_id),
        Err(err) => err.into(),
    }
}

pub fn rename_seat(ctx: &ClassroomContext, request: RenameSeatRequest) -> CommandResponse {
    let ids = required(request.old_id, "old_id").and_then(|old_id| {
        required(request.new_id, "new_id").map(|new_id| (old_id, new_id))
    });
    let (old_id, new_id) = match ids {
        Ok(ids) => ids,
        Err(err) => return err.into(),
    };

    match ctx.seats.rename(&old_id, &new_id) {
        Ok(()) => CommandResponse::ok(format!("Renamed {old_id} to {new_id}")).with_seat(new_id),
        Err(err) => err.into(),
    }
}

// --- Students ---

pub async fn students_list(ctx: &ClassroomContext) -> Vec<StudentListing> {
    match ctx.db.list_students().await {
        Ok(students) => students.into_iter().map(StudentListing::from).collect(),
        Err(err) => {
            error!("Failed to list students: {err:#}");
            Vec::new()
        }
    }
}

/// Removes the student's records, frees any seat assigned to them and
/// deletes their enrollment photo.
pub async fn delete_student(ctx: &ClassroomContext, request: DeleteStudentRequest) -> CommandResponse {
    match try_delete_student(ctx, request).await {
        Ok(response) => response,
        Err(err) => err.into(),
    }
}

async fn try_delete_student(
    ctx: &ClassroomContext,
    request: DeleteStudentRequest,
) -> MonitorResult<CommandResponse> {
    let student_id = required(request.student_id, "student_id")?;

    let removed = ctx
        .db
        .delete_student(&student_id)
        .await
        .map_err(MonitorError::persistence)?
        .ok_or_else(|| MonitorError::UnknownStudent(student_id.clone()))?;

    let mut message = format!("Student {student_id} deleted");

    // The database row is already gone; later steps only tidy up around it.
    match ctx.seats.release_student(&student_id) {
        Ok(released) if !released.is_empty() => {
            message.push_str(&format!(", freed {}", released.join(", ")));
        }
        Ok(_) => {}
        Err(err) => {
            error!("Failed to clear seats held by {student_id}: {err}");
            message.push_str(&format!(", but its seat assignment could not be cleared: {err}"));
        }
    }

    if let Some(image) = removed.imagen_path.as_deref() {
        let path = ctx.config.resolve(image);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove face image {}: {err}", path.display()),
        }
    }

    info!("Deleted student {student_id} ({})", removed.full_name());
    Ok(CommandResponse::ok(message))
}

// --- Attendance ---

pub async fn confirm_attendance(ctx: &ClassroomContext, request: ConfirmAttendanceRequest) -> CommandResponse {
    match try_confirm_attendance(ctx, request).await {
        Ok(response) => response,
        Err(err) => err.into(),
    }
}

async fn try_confirm_attendance(
    ctx: &ClassroomContext,
    request: ConfirmAttendanceRequest,
) -> MonitorResult<CommandResponse> {
    let student_id = required(request.student_id, "student_id")?;

    let student = ctx
        .db
        .get_student_by_id(&student_id)
        .await
        .map_err(MonitorError::persistence)?
        .ok_or_else(|| MonitorError::UnknownStudent(student_id.clone()))?;

    let Some(period) = ctx.periods.current_period() else {
        return Ok(CommandResponse {
            success: false,
            message: OUTSIDE_CLASS_HOURS.to_string(),
            seat_id: None,
            kind: None,
        });
    };

    let recorded = ctx
        .db
        .mark_present(&student_id, &period)
        .await
        .map_err(MonitorError::persistence)?;
    if !recorded {
        return Ok(CommandResponse::ok(format!(
            "{} was already marked present for {period}",
            student.full_name()
        )));
    }
    info!("Manual attendance confirmed for {student_id} in {period}");

    Ok(CommandResponse::ok(format!(
        "Attendance recorded for {} in {period}",
        student.full_name()
    )))
}

pub async fn attendance_summary_today(ctx: &ClassroomContext) -> Vec<PeriodAttendance> {
    ctx.db.attendance_summary_today().await.unwrap_or_else(|err| {
        error!("Failed to load today's attendance summary: {err:#}");
        Vec::new()
    })
}

pub async fn participation_summary_today(ctx: &ClassroomContext) -> Vec<PeriodParticipation> {
    ctx.db.participation_summary_today().await.unwrap_or_else(|err| {
        error!("Failed to load today's participation summary: {err:#}");
        Vec::new()
    })
}
