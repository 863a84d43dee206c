use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};
use tokio::{
    runtime::Handle,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::{AppConfig, PeriodResolver},
    db::Database,
    error::{MonitorError, MonitorResult},
    frames::EncodedFrame,
    participation::ParticipationLedger,
    seats::SeatMapStore,
    vision::VisionBackend,
};

use super::{
    worker::{run_monitor, RunContext},
    MonitorMode, MonitorStatus,
};

/// Shared collaborators handed to every monitor run.
pub struct MonitorServices {
    pub config: AppConfig,
    pub db: Database,
    pub seats: Arc<SeatMapStore>,
    pub ledger: Arc<ParticipationLedger>,
    pub periods: Arc<dyn PeriodResolver>,
    pub vision: Arc<dyn VisionBackend>,
}

struct ActiveRun {
    mode: MonitorMode,
    run_id: String,
    cancel_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

/// Receiving end of a run's preview frames.
pub struct FrameStream {
    pub mode: MonitorMode,
    pub run_id: String,
    pub frames: mpsc::Receiver<EncodedFrame>,
}

impl FrameStream {
    pub async fn next(&mut self) -> Option<EncodedFrame> {
        self.frames.recv().await
    }
}

/// Mutually exclusive attendance, pose and calibration monitoring.
///
/// At most one run exists at a time. A run starts without a worker; the
/// frame loop is spawned when a consumer attaches with [`open_stream`], and
/// polls the run's cancellation token once per frame.
///
/// [`open_stream`]: MonitorController::open_stream
#[derive(Clone)]
pub struct MonitorController {
    active: Arc<Mutex<Option<ActiveRun>>>,
    services: Arc<MonitorServices>,
}

impl MonitorController {
    pub fn new(services: Arc<MonitorServices>) -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            services,
        }
    }

    pub fn services(&self) -> &Arc<MonitorServices> {
        &self.services
    }

    pub async fn status(&self) -> MonitorStatus {
        self.active
            .lock()
            .await
            .as_ref()
            .map_or(MonitorStatus::Idle, |run| run.mode.active_status())
    }

    pub async fn start_attendance(&self) -> MonitorResult<MonitorStatus> {
        self.start(MonitorMode::Attendance).await
    }

    pub async fn start_pose(&self) -> MonitorResult<MonitorStatus> {
        self.start(MonitorMode::Pose).await
    }

    pub async fn start_calibration(&self) -> MonitorResult<MonitorStatus> {
        self.start(MonitorMode::Calibration).await
    }

    pub async fn stop_attendance(&self) -> MonitorResult<MonitorStatus> {
        self.stop(MonitorMode::Attendance).await
    }

    pub async fn stop_pose(&self) -> MonitorResult<MonitorStatus> {
        self.stop(MonitorMode::Pose).await
    }

    pub async fn stop_calibration(&self) -> MonitorResult<MonitorStatus> {
        self.stop(MonitorMode::Calibration).await
    }

    pub async fn start(&self, mode: MonitorMode) -> MonitorResult<MonitorStatus> {
        let mut active = self.active.lock().await;

        if let Some(run) = active.as_ref() {
            warn!("Refusing to start {mode} monitor: {} monitor is active", run.mode);
            return Err(MonitorError::MonitorBusy {
                requested: mode,
                active: run.mode,
            });
        }

        if mode == MonitorMode::Pose {
            // Seat edits made while idle take effect, and tallies start at zero.
            let report = self.services.seats.load();
            info!(
                "Pose monitor loaded {} seats ({} assignments)",
                report.seats, report.assignments
            );
        }

        let run_id = Uuid::new_v4().to_string();
        info!("Started {mode} monitor (run {run_id})");
        *active = Some(ActiveRun {
            mode,
            run_id,
            cancel_token: CancellationToken::new(),
            worker: None,
        });

        Ok(mode.active_status())
    }

    /// Stopping a mode that is not running is a no-op, not an error.
    pub async fn stop(&self, mode: MonitorMode) -> MonitorResult<MonitorStatus> {
        let mut active = self.active.lock().await;

        match active.as_ref() {
            Some(run) if run.mode == mode => {}
            other => return Ok(other.map_or(MonitorStatus::Idle, |run| run.mode.active_status())),
        }
        let Some(run) = active.take() else {
            return Ok(MonitorStatus::Idle);
        };

        run.cancel_token.cancel();
        if let Some(worker) = run.worker {
            // Held under the lock so no other run can open the camera until this one has let go.
            if let Err(err) = worker.await.context("monitor worker failed to join") {
                error!("{mode} monitor (run {}) did not shut down cleanly: {err:#}", run.run_id);
            }
        }
        info!("Stopped {mode} monitor (run {})", run.run_id);

        Ok(MonitorStatus::Idle)
    }

    /// Spawns the frame loop for the active run of `mode` and returns its
    /// frame receiver. A run has at most one live stream; once its loop has
    /// ended (viewer gone, camera exhausted) a new stream can attach to the
    /// same run.
    pub async fn open_stream(&self, mode: MonitorMode) -> MonitorResult<FrameStream> {
        let mut active = self.active.lock().await;

        let run = match active.as_mut() {
            Some(run) if run.mode == mode => run,
            _ => return Err(MonitorError::MonitorInactive(mode)),
        };
        if let Some(previous) = run.worker.take() {
            if !previous.is_finished() {
                run.worker = Some(previous);
                return Err(MonitorError::StreamAttached(mode));
            }
            if let Err(err) = previous.await.context("monitor worker failed to join") {
                error!("{mode} monitor (run {}) loop ended badly: {err:#}", run.run_id);
            }
            info!("Reattaching {mode} stream to run {}", run.run_id);
        }

        let capacity = self.services.config.frame_buffer.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = RunContext {
            mode,
            run_id: run.run_id.clone(),
            services: Arc::clone(&self.services),
            cancel_token: run.cancel_token.clone(),
            frames: tx,
            runtime: Handle::current(),
        };
        run.worker = Some(tokio::task::spawn_blocking(move || run_monitor(ctx)));

        Ok(FrameStream {
            mode,
            run_id: run.run_id.clone(),
            frames: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::Student,
        error::ErrorKind,
        geometry::FrameSize,
        gesture::{Keypoint, KeypointKind, PoseDetection, KEYPOINT_COUNT},
        participation::{ledger::tests::FixedPeriod, Tallies},
        replay::ReplayBackend,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    const SIZE: FrameSize = FrameSize {
        width: 320,
        height: 240,
    };

    struct Fixture {
        _dir: TempDir,
        controller: MonitorController,
    }

    fn fixture_with(backend: ReplayBackend) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::rooted_at(dir.path());
        let seats = Arc::new(SeatMapStore::new(
            config.seats_path(),
            config.assignments_path(),
            Arc::new(Tallies::new()),
        ));
        seats.load();
        let db = Database::new(config.database_path()).unwrap();
        let periods: Arc<dyn PeriodResolver> = Arc::new(FixedPeriod(Some("Clase 1")));
        let ledger = Arc::new(ParticipationLedger::new(
            Arc::clone(&seats),
            db.clone(),
            Arc::clone(&periods),
            Duration::from_secs(config.participation_cooldown_secs),
        ));
        let services = Arc::new(MonitorServices {
            config,
            db,
            seats,
            ledger,
            periods,
            vision: Arc::new(backend),
        });
        Fixture {
            _dir: dir,
            controller: MonitorController::new(services),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ReplayBackend::from_poses(vec![Vec::new(); 3], SIZE))
    }

    fn raised_right_hand(x: f32) -> PoseDetection {
        let mut keypoints = [Keypoint::new(0.5, 0.5, 0.0); KEYPOINT_COUNT];
        keypoints[KeypointKind::RightShoulder.index()] = Keypoint::new(0.6, x, 0.9);
        keypoints[KeypointKind::RightWrist.index()] = Keypoint::new(0.2, x, 0.9);
        PoseDetection {
            keypoints,
            score: 0.8,
        }
    }

    #[tokio::test]
    async fn every_pair_of_modes_is_exclusive() {
        let f = fixture();
        for active in MonitorMode::ALL {
            f.controller.start(active).await.unwrap();
            for other in MonitorMode::ALL {
                let err = f.controller.start(other).await.unwrap_err();
                assert_eq!(err.kind(), ErrorKind::Conflict);
                assert_eq!(f.controller.status().await, active.active_status());
            }
            f.controller.stop(active).await.unwrap();
            assert_eq!(f.controller.status().await, MonitorStatus::Idle);
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_mode_scoped() {
        let f = fixture();
        assert_eq!(f.controller.stop_pose().await.unwrap(), MonitorStatus::Idle);

        f.controller.start_attendance().await.unwrap();
        let status = f.controller.stop_pose().await.unwrap();
        assert_eq!(status, MonitorStatus::AttendanceActive);

        f.controller.stop_attendance().await.unwrap();
        f.controller.stop_attendance().await.unwrap();
        assert_eq!(f.controller.status().await, MonitorStatus::Idle);
    }

    #[tokio::test]
    async fn start_pose_reloads_seats_and_resets_tallies() {
        let f = fixture();
        let services = f.controller.services();
        let seat = services.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        services.ledger.award(&seat).await;
        assert_eq!(services.ledger.count(&seat), 1);

        f.controller.start_pose().await.unwrap();
        assert_eq!(services.ledger.count(&seat), 0);
        assert!(services.seats.snapshot().contains(&seat));
    }

    #[tokio::test]
    async fn stream_requires_matching_active_mode() {
        // Long enough that the first loop is still running when the second attach comes in.
        let f = fixture_with(ReplayBackend::from_poses(vec![Vec::new(); 10_000], SIZE));
        let err = f.controller.open_stream(MonitorMode::Pose).await.err().unwrap();
        assert!(matches!(err, MonitorError::MonitorInactive(MonitorMode::Pose)));

        f.controller.start_calibration().await.unwrap();
        assert!(f.controller.open_stream(MonitorMode::Pose).await.is_err());

        let _stream = f.controller.open_stream(MonitorMode::Calibration).await.unwrap();
        let err = f
            .controller
            .open_stream(MonitorMode::Calibration)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::StreamAttached(MonitorMode::Calibration)));

        f.controller.stop_calibration().await.unwrap();
    }

    async fn reopen_when_idle(controller: &MonitorController, mode: MonitorMode) -> FrameStream {
        for _ in 0..100 {
            match controller.open_stream(mode).await {
                Ok(stream) => return stream,
                Err(MonitorError::StreamAttached(_)) => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                Err(err) => panic!("unexpected error reopening {mode} stream: {err}"),
            }
        }
        panic!("{mode} stream never became available again");
    }

    #[tokio::test]
    async fn stream_can_reattach_after_viewer_leaves() {
        let f = fixture_with(ReplayBackend::from_poses(vec![Vec::new(); 50], SIZE));
        f.controller.start_calibration().await.unwrap();

        let mut first = f.controller.open_stream(MonitorMode::Calibration).await.unwrap();
        assert!(first.next().await.is_some());
        let run_id = first.run_id.clone();
        drop(first);

        let mut second = reopen_when_idle(&f.controller, MonitorMode::Calibration).await;
        assert_eq!(second.run_id, run_id);
        assert!(second.next().await.is_some());
        assert_eq!(f.controller.status().await, MonitorStatus::CalibrationActive);

        drop(second);
        f.controller.stop_calibration().await.unwrap();
    }

    #[tokio::test]
    async fn pose_counting_resumes_on_a_new_stream_after_source_ends() {
        let frames = vec![vec![raised_right_hand(0.25)]; 2];
        let f = fixture_with(ReplayBackend::from_poses(frames, SIZE));
        let services = Arc::clone(f.controller.services());
        let seat = services.seats.add_seat(0.0, 0.5, 1.0, 0.5, true).unwrap();

        f.controller.start_pose().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Pose).await.unwrap();
        while stream.next().await.is_some() {}
        assert_eq!(services.ledger.count(&seat), 1);

        let mut again = reopen_when_idle(&f.controller, MonitorMode::Pose).await;
        let mut received = 0;
        while again.next().await.is_some() {
            received += 1;
        }
        assert!(received >= 1);
        // Same run, still inside the cooldown.
        assert_eq!(services.ledger.count(&seat), 1);
        f.controller.stop_pose().await.unwrap();
    }

    #[tokio::test]
    async fn calibration_stream_publishes_jpeg_frames_until_source_ends() {
        let f = fixture();
        f.controller.start_calibration().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Calibration).await.unwrap();

        let mut received = 0;
        while let Some(frame) = stream.next().await {
            assert_eq!(frame.run_id, stream.run_id);
            assert!(crate::frames::is_jpeg(&frame.jpeg));
            received += 1;
        }
        assert!(received >= 1 && received <= 3);
        assert_eq!(f.controller.status().await, MonitorStatus::CalibrationActive);
        f.controller.stop_calibration().await.unwrap();
    }

    #[tokio::test]
    async fn pose_stream_awards_attributed_seat_once_per_cooldown() {
        // Seat covers the lower half of the frame; a raised wrist is above it.
        let frames = vec![vec![raised_right_hand(0.25)]; 5];
        let f = fixture_with(ReplayBackend::from_poses(frames, SIZE));
        let services = Arc::clone(f.controller.services());
        services
            .db
            .insert_student(&Student::new("s7", "Ana", "Pérez"), &[])
            .await
            .unwrap();
        let seat = services.seats.add_seat(0.0, 0.5, 1.0, 0.5, true).unwrap();
        services.seats.assign(Some("s7"), &seat).unwrap();

        f.controller.start_pose().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Pose).await.unwrap();
        while stream.next().await.is_some() {}
        f.controller.stop_pose().await.unwrap();

        assert_eq!(services.ledger.count(&seat), 1);
        assert_eq!(services.db.participation_count_for("s7").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn attendance_records_recognised_student_once() {
        use crate::{geometry::PixelRect, replay::ReplayFrame, vision::FaceObservation};

        let face = FaceObservation {
            bbox: PixelRect {
                x: 10.0,
                y: 10.0,
                w: 40.0,
                h: 40.0,
            },
            embedding: vec![0.1, 0.2, 0.3],
        };
        let frames = (0..12)
            .map(|_| ReplayFrame {
                poses: Vec::new(),
                faces: vec![face.clone()],
            })
            .collect();
        let f = fixture_with(ReplayBackend::new(frames, SIZE));
        let services = Arc::clone(f.controller.services());
        services
            .db
            .insert_student(&Student::new("s1", "Luis", "Gómez"), &[vec![0.1, 0.2, 0.35]])
            .await
            .unwrap();

        f.controller.start_attendance().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Attendance).await.unwrap();
        while stream.next().await.is_some() {}
        f.controller.stop_attendance().await.unwrap();

        assert!(services.db.has_attended_today("s1", "Clase 1").await.unwrap());
        let summary = services.db.attendance_summary_today().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].total, 1);
    }

    #[tokio::test]
    async fn attendance_without_students_ends_immediately() {
        let f = fixture();
        f.controller.start_attendance().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Attendance).await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(f.controller.status().await, MonitorStatus::AttendanceActive);
        f.controller.stop_attendance().await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_camera_ends_stream_without_failing_stop() {
        let backend = ReplayBackend::from_poses(vec![Vec::new()], SIZE).without_camera();
        let f = fixture_with(backend);
        f.controller.start_pose().await.unwrap();
        let mut stream = f.controller.open_stream(MonitorMode::Pose).await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(f.controller.stop_pose().await.unwrap(), MonitorStatus::Idle);
    }
}
