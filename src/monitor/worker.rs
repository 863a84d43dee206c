use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbImage;
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;

use crate::{
    attribution::attribute,
    frames::{
        annotate::{draw_circle, draw_line, draw_rect, CYAN, GREEN, RAISED_WRIST_RADIUS, RED, YELLOW},
        encode_jpeg, mirror, EncodedFrame,
    },
    geometry::{FrameSize, PixelRect},
    gesture::GestureInterpreter,
    participation::AwardOutcome,
    vision::{closest_face, FrameSource},
};

use super::{controller::MonitorServices, MonitorMode};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything one monitor run's blocking loop owns.
pub(crate) struct RunContext {
    pub mode: MonitorMode,
    pub run_id: String,
    pub services: Arc<MonitorServices>,
    pub cancel_token: CancellationToken,
    pub frames: mpsc::Sender<EncodedFrame>,
    pub runtime: Handle,
}

/// Entry point for `spawn_blocking`. Failures end the run's stream and are
/// logged; they never reach the caller.
pub(crate) fn run_monitor(ctx: RunContext) {
    log_info!("{} loop starting (run {})", ctx.mode, ctx.run_id);

    let result = match ctx.mode {
        MonitorMode::Attendance => attendance_loop(&ctx),
        MonitorMode::Pose => pose_loop(&ctx),
        MonitorMode::Calibration => calibration_loop(&ctx),
    };

    match result {
        Ok(frames) => log_info!(
            "{} loop stopped after {} frames (run {})",
            ctx.mode,
            frames,
            ctx.run_id
        ),
        Err(err) => log_error!("{} loop aborted (run {}): {err:#}", ctx.mode, ctx.run_id),
    }
}

fn open_camera(ctx: &RunContext) -> Result<Box<dyn FrameSource>> {
    let index = ctx.services.config.camera_index;
    ctx.services
        .vision
        .open_camera(index)
        .with_context(|| format!("camera {index} unavailable"))
}

/// Reads, mirrors, annotates and publishes frames until cancelled, the camera
/// runs dry, or the receiver goes away. Returns the number of frames read.
fn pump_frames<F>(ctx: &RunContext, mut camera: Box<dyn FrameSource>, mut annotate: F) -> Result<u64>
where
    F: FnMut(&mut RgbImage, u64),
{
    let config = &ctx.services.config;
    let mut index = 0u64;

    while !ctx.cancel_token.is_cancelled() {
        let Some(mut frame) = camera.read_frame().context("camera read failed")? else {
            log_info!("{} frame source ended (run {})", ctx.mode, ctx.run_id);
            break;
        };
        if config.mirror_frames {
            mirror(&mut frame);
        }

        annotate(&mut frame, index);

        let jpeg = encode_jpeg(&frame, config.jpeg_quality)?;
        let encoded = EncodedFrame {
            run_id: ctx.run_id.clone(),
            index,
            jpeg,
        };
        index += 1;

        match ctx.frames.try_send(encoded) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log_debug!("{} stream is behind, dropping frame {}", ctx.mode, index - 1);
            }
            Err(TrySendError::Closed(_)) => {
                log_info!("{} stream receiver closed (run {})", ctx.mode, ctx.run_id);
                break;
            }
        }
    }

    Ok(index)
}

fn pose_loop(ctx: &RunContext) -> Result<u64> {
    let services = &ctx.services;
    let mut estimator = services
        .vision
        .pose_estimator()
        .context("pose model unavailable")?;
    let camera = open_camera(ctx)?;
    let interpreter = GestureInterpreter::new(services.config.gesture.clone());

    pump_frames(ctx, camera, |frame, index| {
        let size = FrameSize::of(frame);
        let detections = match estimator.infer(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log_warn!("pose inference failed on frame {index}: {err:#}");
                return;
            }
        };
        let gestures = interpreter.interpret(&detections, size);

        for (from, to) in &gestures.segments {
            draw_line(frame, *from, *to, 2, CYAN);
        }
        for hand in &gestures.raised {
            draw_circle(frame, hand.point, RAISED_WRIST_RADIUS, 5, YELLOW);
        }

        let Some(hand) = gestures.hand_event else {
            return;
        };
        let seats = services.seats.seats();
        let Some(seat) = attribute(hand, size, &seats) else {
            return;
        };
        draw_rect(frame, &seat.pixel_rect(size), 3, YELLOW);

        let outcome = ctx.runtime.block_on(services.ledger.award(&seat.seat_id));
        if let AwardOutcome::Counted { count, .. } = outcome {
            log_info!("{} participated (total {count})", seat.seat_id);
        }
    })
}

fn calibration_loop(ctx: &RunContext) -> Result<u64> {
    let camera = open_camera(ctx)?;
    let seats = &ctx.services.seats;

    pump_frames(ctx, camera, |frame, _| {
        let size = FrameSize::of(frame);
        for seat in seats.seats() {
            draw_rect(frame, &seat.pixel_rect(size), 2, GREEN);
        }
    })
}

struct FaceMark {
    bbox: PixelRect,
    recognised: bool,
}

fn attendance_loop(ctx: &RunContext) -> Result<u64> {
    let services = &ctx.services;
    let known = ctx
        .runtime
        .block_on(services.db.known_faces())
        .context("failed to load enrolled faces")?;
    if known.is_empty() {
        log_warn!("no enrolled students, attendance monitor has nothing to match");
        return Ok(0);
    }

    let mut encoder = services
        .vision
        .face_encoder()
        .context("face model unavailable")?;
    let camera = open_camera(ctx)?;
    let settings = services.config.attendance.clone();
    let every = u64::from(settings.detect_every_n_frames.max(1));
    let mut marks: Vec<FaceMark> = Vec::new();

    pump_frames(ctx, camera, |frame, index| {
        if index % every == 0 {
            match encoder.encode_faces(frame) {
                Ok(faces) => {
                    marks = faces
                        .iter()
                        .map(|face| {
                            let matched = closest_face(&face.embedding, &known, settings.face_match_tolerance);
                            if let Some(student) = matched {
                                record_attendance(ctx, &student.student_id, &student.nombre);
                            }
                            FaceMark {
                                bbox: face.bbox,
                                recognised: matched.is_some(),
                            }
                        })
                        .collect();
                }
                Err(err) => log_warn!("face encoding failed on frame {index}: {err:#}"),
            }
        }

        for mark in &marks {
            let color = if mark.recognised { GREEN } else { RED };
            draw_rect(frame, &mark.bbox, 2, color);
        }
    })
}

fn record_attendance(ctx: &RunContext, student_id: &str, nombre: &str) {
    let Some(period) = ctx.services.periods.current_period() else {
        return;
    };
    let result = ctx
        .runtime
        .block_on(ctx.services.db.mark_present(student_id, &period));

    match result {
        Ok(true) => log_info!("attendance recorded for {nombre} ({student_id}) in {period}"),
        Ok(false) => {}
        Err(err) => log_error!("failed to record attendance for {student_id}: {err:#}"),
    }
}
