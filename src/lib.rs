pub mod attribution;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod frames;
pub mod geometry;
pub mod gesture;
pub mod monitor;
pub mod participation;
pub mod replay;
pub mod seats;
pub mod utils;
pub mod vision;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{info, warn};

use config::{AppConfig, PeriodResolver};
use db::Database;
use monitor::{MonitorController, MonitorServices};
use participation::{ParticipationLedger, Tallies};
use seats::SeatMapStore;
use vision::VisionBackend;

/// Process-wide state, constructed once and shared by every entry point.
pub struct ClassroomContext {
    pub config: AppConfig,
    pub db: Database,
    pub seats: Arc<SeatMapStore>,
    pub ledger: Arc<ParticipationLedger>,
    pub periods: Arc<dyn PeriodResolver>,
    pub monitor: MonitorController,
}

impl ClassroomContext {
    /// Opens the database, loads the seat map and resolves class periods
    /// from the configured schedule.
    pub fn open(config: AppConfig, vision: Arc<dyn VisionBackend>) -> Result<Self> {
        let periods: Arc<dyn PeriodResolver> = Arc::new(config.schedule());
        Self::with_periods(config, vision, periods)
    }

    pub fn with_periods(
        config: AppConfig,
        vision: Arc<dyn VisionBackend>,
        periods: Arc<dyn PeriodResolver>,
    ) -> Result<Self> {
        let db = Database::new(config.database_path())?;

        let seats = Arc::new(SeatMapStore::new(
            config.seats_path(),
            config.assignments_path(),
            Arc::new(Tallies::new()),
        ));
        let report = seats.load();
        if !report.issues.is_empty() {
            warn!("Seat map loaded with {} issue(s)", report.issues.len());
        }
        info!(
            "Classroom context ready: {} seats, {} assignments",
            report.seats, report.assignments
        );

        let ledger = Arc::new(ParticipationLedger::new(
            Arc::clone(&seats),
            db.clone(),
            Arc::clone(&periods),
            Duration::from_secs(config.participation_cooldown_secs),
        ));

        let monitor = MonitorController::new(Arc::new(MonitorServices {
            config: config.clone(),
            db: db.clone(),
            seats: Arc::clone(&seats),
            ledger: Arc::clone(&ledger),
            periods: Arc::clone(&periods),
            vision,
        }));

        Ok(Self {
            config,
            db,
            seats,
            ledger,
            periods,
            monitor,
        })
    }
}
