use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Per-seat participation counter for the life of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipationState {
    pub count: u64,
    pub last_award: Option<Instant>,
}

/// Why an award did not count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardRefusal {
    /// The seat's last award is younger than the cooldown; carries the time left.
    CoolingDown(Duration),
    /// The seat was removed or renamed after the frame that produced the award.
    UnknownSeat,
}

/// In-memory participation state keyed by seat id.
///
/// The seat map store drives the structural hooks (`reset`, `seed`,
/// `remove`, `rename`) while holding its own lock; the ledger only calls
/// `try_award`. Each method takes the inner lock exactly once, so a
/// cooldown check and its increment are a single atomic step.
#[derive(Debug, Default)]
pub struct Tallies {
    states: Mutex<HashMap<String, ParticipationState>>,
}

impl Tallies {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ParticipationState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops all state and starts every listed seat at zero.
    pub fn reset<'a>(&self, seat_ids: impl IntoIterator<Item = &'a str>) {
        let mut states = self.lock();
        states.clear();
        for seat_id in seat_ids {
            states.insert(seat_id.to_string(), ParticipationState::default());
        }
    }

    pub fn seed(&self, seat_id: &str) {
        self.lock()
            .insert(seat_id.to_string(), ParticipationState::default());
    }

    pub fn remove(&self, seat_id: &str) {
        self.lock().remove(seat_id);
    }

    /// Moves the counter and cooldown timestamp from `old_id` to `new_id`.
    pub fn rename(&self, old_id: &str, new_id: &str) {
        let mut states = self.lock();
        let state = states.remove(old_id).unwrap_or_default();
        states.insert(new_id.to_string(), state);
    }

    /// Increments the seat's counter unless its last award is younger than
    /// `cooldown`. Only seats known to the seat map (seeded, reset or renamed
    /// in) are counted; an award never recreates a seat.
    pub fn try_award(
        &self,
        seat_id: &str,
        now: Instant,
        cooldown: Duration,
    ) -> Result<u64, AwardRefusal> {
        let mut states = self.lock();
        let state = states.get_mut(seat_id).ok_or(AwardRefusal::UnknownSeat)?;

        if let Some(last) = state.last_award {
            let elapsed = now.checked_duration_since(last).unwrap_or_default();
            if elapsed < cooldown {
                return Err(AwardRefusal::CoolingDown(cooldown - elapsed));
            }
        }

        state.last_award = Some(now);
        state.count += 1;
        Ok(state.count)
    }

    pub fn state(&self, seat_id: &str) -> Option<ParticipationState> {
        self.lock().get(seat_id).copied()
    }

    pub fn count(&self, seat_id: &str) -> u64 {
        self.state(seat_id).map(|state| state.count).unwrap_or(0)
    }

    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.lock()
            .iter()
            .map(|(seat_id, state)| (seat_id.clone(), state.count))
            .collect()
    }
}
