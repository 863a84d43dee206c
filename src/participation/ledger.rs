use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{error, info};
use serde::Serialize;

use crate::{config::PeriodResolver, db::Database, seats::SeatMapStore};

use super::{AwardRefusal, Tallies};

/// What happened to the durable record of a counted participation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PersistOutcome {
    Recorded { student_id: String, period: String },
    NoStudent,
    OutsidePeriod,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// Rejected by the per-seat debounce; nothing changed.
    Cooldown { remaining: Duration },
    /// The seat left the map between the frame snapshot and the award.
    UnknownSeat,
    Counted {
        count: u64,
        persistence: PersistOutcome,
    },
}

impl AwardOutcome {
    pub fn is_awarded(&self) -> bool {
        matches!(self, AwardOutcome::Counted { .. })
    }
}

/// Counts hand-raise participations per seat with a cooldown, and records
/// them durably for the assigned student during class periods.
pub struct ParticipationLedger {
    tallies: Arc<Tallies>,
    seats: Arc<SeatMapStore>,
    db: Database,
    periods: Arc<dyn PeriodResolver>,
    cooldown: Duration,
}

impl ParticipationLedger {
    pub fn new(
        seats: Arc<SeatMapStore>,
        db: Database,
        periods: Arc<dyn PeriodResolver>,
        cooldown: Duration,
    ) -> Self {
        Self {
            tallies: Arc::clone(seats.tallies()),
            seats,
            db,
            periods,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub async fn award(&self, seat_id: &str) -> AwardOutcome {
        self.award_at(seat_id, Instant::now()).await
    }

    pub async fn award_at(&self, seat_id: &str, now: Instant) -> AwardOutcome {
        let count = match self.tallies.try_award(seat_id, now, self.cooldown) {
            Ok(count) => count,
            Err(AwardRefusal::CoolingDown(remaining)) => {
                return AwardOutcome::Cooldown { remaining }
            }
            Err(AwardRefusal::UnknownSeat) => {
                info!("Ignoring participation for {seat_id}: seat no longer exists");
                return AwardOutcome::UnknownSeat;
            }
        };

        let persistence = self.persist(seat_id).await;
        info!("Participation on {seat_id}: count={count}, durable={persistence:?}");

        AwardOutcome::Counted { count, persistence }
    }

    async fn persist(&self, seat_id: &str) -> PersistOutcome {
        let Some(student_id) = self.seats.student_for(seat_id) else {
            return PersistOutcome::NoStudent;
        };
        let Some(period) = self.periods.current_period() else {
            return PersistOutcome::OutsidePeriod;
        };

        match self.db.record_participation(&student_id, &period).await {
            Ok(()) => PersistOutcome::Recorded { student_id, period },
            Err(err) => {
                error!("Failed to record participation for {student_id} in {period}: {err:#}");
                PersistOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    pub fn count(&self, seat_id: &str) -> u64 {
        self.tallies.count(seat_id)
    }

    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.tallies.counts()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Student;
    use tempfile::TempDir;

    pub(crate) struct FixedPeriod(pub Option<&'static str>);

    impl PeriodResolver for FixedPeriod {
        fn current_period(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    struct Fixture {
        _dir: TempDir,
        seats: Arc<SeatMapStore>,
        db: Database,
        ledger: ParticipationLedger,
    }

    fn fixture(period: Option<&'static str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let seats = Arc::new(SeatMapStore::new(
            dir.path().join("seats.json"),
            dir.path().join("assignments.json"),
            Arc::new(Tallies::new()),
        ));
        seats.load();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        let ledger = ParticipationLedger::new(
            Arc::clone(&seats),
            db.clone(),
            Arc::new(FixedPeriod(period)),
            Duration::from_secs(3),
        );
        Fixture {
            _dir: dir,
            seats,
            db,
            ledger,
        }
    }

    #[tokio::test]
    async fn cooldown_counts_once_then_releases() {
        let f = fixture(None);
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        let t0 = Instant::now();

        assert!(f.ledger.award_at(&seat, t0).await.is_awarded());
        let second = f.ledger.award_at(&seat, t0 + Duration::from_secs(1)).await;
        assert!(matches!(second, AwardOutcome::Cooldown { .. }));
        assert_eq!(f.ledger.count(&seat), 1);

        let third = f
            .ledger
            .award_at(&seat, t0 + Duration::from_millis(3_001))
            .await;
        assert!(third.is_awarded());
        assert_eq!(f.ledger.count(&seat), 2);
    }

    #[tokio::test]
    async fn unassigned_seat_counts_without_record() {
        let f = fixture(Some("Clase 1"));
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();

        let outcome = f.ledger.award(&seat).await;
        assert_eq!(
            outcome,
            AwardOutcome::Counted {
                count: 1,
                persistence: PersistOutcome::NoStudent
            }
        );
    }

    #[tokio::test]
    async fn outside_period_counts_without_record() {
        let f = fixture(None);
        f.db.insert_student(&Student::new("s1", "Ana", "Pérez"), &[])
            .await
            .unwrap();
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        f.seats.assign(Some("s1"), &seat).unwrap();

        let outcome = f.ledger.award(&seat).await;
        assert!(matches!(
            outcome,
            AwardOutcome::Counted {
                persistence: PersistOutcome::OutsidePeriod,
                ..
            }
        ));
        assert_eq!(f.db.participation_count_for("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn assigned_seat_in_period_is_recorded() {
        let f = fixture(Some("Clase 2"));
        f.db.insert_student(&Student::new("s1", "Ana", "Pérez"), &[])
            .await
            .unwrap();
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        f.seats.assign(Some("s1"), &seat).unwrap();

        let outcome = f.ledger.award(&seat).await;
        assert_eq!(
            outcome,
            AwardOutcome::Counted {
                count: 1,
                persistence: PersistOutcome::Recorded {
                    student_id: "s1".into(),
                    period: "Clase 2".into()
                }
            }
        );
        assert_eq!(f.db.participation_count_for("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn award_for_a_seat_renamed_mid_frame_leaves_no_trace() {
        let f = fixture(Some("Clase 1"));
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        f.seats.rename(&seat, "Ventana").unwrap();

        assert_eq!(f.ledger.award(&seat).await, AwardOutcome::UnknownSeat);
        let counts = f.ledger.counts();
        assert!(!counts.contains_key(&seat));
        assert_eq!(counts.get("Ventana"), Some(&0));
    }

    #[tokio::test]
    async fn persistence_failure_still_counts() {
        let f = fixture(Some("Clase 1"));
        let seat = f.seats.add_seat(0.0, 0.0, 1.0, 1.0, true).unwrap();
        // No such student row: the foreign key rejects the insert.
        f.seats.assign(Some("ghost"), &seat).unwrap();

        let outcome = f.ledger.award(&seat).await;
        match outcome {
            AwardOutcome::Counted {
                count,
                persistence: PersistOutcome::Failed { .. },
            } => assert_eq!(count, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(f.ledger.counts().get(&seat), Some(&1));
    }
}
