use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::{MonitorError, MonitorResult},
    participation::Tallies,
};

use super::model::{sequential_seat_id, SeatAssignments, SeatBox, SeatMap};

/// What a (re)load found on disk. Problems are reported, never fatal.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub seats: usize,
    pub assignments: usize,
    pub issues: Vec<MonitorError>,
}

/// Single source of truth for seat boxes and seat assignments.
///
/// Every mutation runs read-modify-write-persist under the write lock and
/// commits to memory only after both files were written.
pub struct SeatMapStore {
    seats_path: PathBuf,
    assignments_path: PathBuf,
    map: RwLock<SeatMap>,
    tallies: Arc<Tallies>,
}

impl SeatMapStore {
    pub fn new(seats_path: PathBuf, assignments_path: PathBuf, tallies: Arc<Tallies>) -> Self {
        Self {
            seats_path,
            assignments_path,
            map: RwLock::new(SeatMap::default()),
            tallies,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SeatMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SeatMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the in-memory map with what is on disk and zeroes every
    /// participation counter.
    pub fn load(&self) -> LoadReport {
        let mut issues = Vec::new();

        let seats: Vec<SeatBox> = match read_json(&self.seats_path) {
            Ok(Some(seats)) => seats,
            Ok(None) => {
                issues.push(MonitorError::ConfigurationMissing {
                    path: self.seats_path.clone(),
                    reason: "file not found".into(),
                });
                Vec::new()
            }
            Err(err) => {
                issues.push(MonitorError::ConfigurationMissing {
                    path: self.seats_path.clone(),
                    reason: format!("{err:#}"),
                });
                Vec::new()
            }
        };

        let assignments: SeatAssignments = match read_json(&self.assignments_path) {
            Ok(found) => found.unwrap_or_default(),
            Err(err) => {
                issues.push(MonitorError::ConfigurationMissing {
                    path: self.assignments_path.clone(),
                    reason: format!("{err:#}"),
                });
                SeatAssignments::new()
            }
        };

        for issue in &issues {
            warn!("Seat configuration fallback to empty: {issue}");
        }

        let mut map = self.write();
        *map = SeatMap { seats, assignments };
        self.tallies
            .reset(map.seats.iter().map(|seat| seat.seat_id.as_str()));

        info!(
            "Loaded {} seats and {} assignments",
            map.seats.len(),
            map.assignments.len()
        );

        LoadReport {
            seats: map.seats.len(),
            assignments: map.assignments.len(),
            issues,
        }
    }

    /// Appends a seat with the next `"Pupitre N"` id and persists it.
    pub fn add_seat(&self, x: f64, y: f64, w: f64, h: f64, normalized: bool) -> MonitorResult<String> {
        if ![x, y, w, h].iter().all(|value| value.is_finite()) {
            return Err(MonitorError::Validation(
                "seat coordinates must be finite numbers".into(),
            ));
        }
        if w < 0.0 || h < 0.0 {
            return Err(MonitorError::Validation(
                "seat width and height must not be negative".into(),
            ));
        }

        let mut map = self.write();
        let mut next = map.clone();

        let mut position = next.seats.len() + 1;
        let mut seat_id = sequential_seat_id(position);
        // A renamed seat may already hold the natural id.
        while next.contains(&seat_id) {
            position += 1;
            seat_id = sequential_seat_id(position);
        }

        next.seats
            .push(SeatBox::new(seat_id.clone(), x, y, w, h, normalized));
        next.assignments.insert(seat_id.clone(), None);

        self.persist(&next)?;
        *map = next;
        self.tallies.seed(&seat_id);

        info!("Added seat {seat_id}");
        Ok(seat_id)
    }

    /// Pops the most recently added seat. `Ok(false)` when there is none.
    pub fn remove_last_seat(&self) -> MonitorResult<bool> {
        let mut map = self.write();
        let mut next = map.clone();

        let Some(removed) = next.seats.pop() else {
            return Ok(false);
        };
        next.assignments.remove(&removed.seat_id);

        self.persist(&next)?;
        *map = next;
        self.tallies.remove(&removed.seat_id);

        info!("Removed seat {}", removed.seat_id);
        Ok(true)
    }

    /// Assigns `student_id` to `seat_id`; an absent or empty student clears the seat.
    pub fn assign(&self, student_id: Option<&str>, seat_id: &str) -> MonitorResult<()> {
        if seat_id.trim().is_empty() {
            return Err(MonitorError::Validation("seat_id is required".into()));
        }

        let mut map = self.write();
        if !map.contains(seat_id) {
            return Err(MonitorError::UnknownSeat(seat_id.to_string()));
        }

        let mut next = map.clone();
        match student_id.filter(|student| !student.trim().is_empty()) {
            Some(student) => {
                next.assignments
                    .insert(seat_id.to_string(), Some(student.to_string()));
            }
            None => {
                next.assignments.remove(seat_id);
            }
        }

        self.persist_assignments(&next.assignments)?;
        *map = next;

        match student_id {
            Some(student) if !student.trim().is_empty() => {
                info!("Assigned student {student} to {seat_id}")
            }
            _ => info!("Cleared assignment for {seat_id}"),
        }
        Ok(())
    }

    /// Renames a seat and migrates its assignment, counter and cooldown.
    pub fn rename(&self, old_id: &str, new_id: &str) -> MonitorResult<()> {
        if old_id.trim().is_empty() || new_id.trim().is_empty() {
            return Err(MonitorError::Validation(
                "old_id and new_id are required".into(),
            ));
        }

        let mut map = self.write();
        if map.contains(new_id) {
            return Err(MonitorError::SeatIdInUse(new_id.to_string()));
        }

        let mut next = map.clone();
        let seat = next
            .seats
            .iter_mut()
            .find(|seat| seat.seat_id == old_id)
            .ok_or_else(|| MonitorError::UnknownSeat(old_id.to_string()))?;
        seat.seat_id = new_id.to_string();

        if let Some(student) = next.assignments.remove(old_id) {
            next.assignments.insert(new_id.to_string(), student);
        }

        self.persist(&next)?;
        *map = next;
        self.tallies.rename(old_id, new_id);

        info!("Renamed seat {old_id} -> {new_id}");
        Ok(())
    }

    /// Clears every seat assigned to `student_id` and returns the seats released.
    pub fn release_student(&self, student_id: &str) -> MonitorResult<Vec<String>> {
        let mut map = self.write();
        let released: Vec<String> = map
            .assignments
            .iter()
            .filter(|(_, student)| student.as_deref() == Some(student_id))
            .map(|(seat_id, _)| seat_id.clone())
            .collect();
        if released.is_empty() {
            return Ok(released);
        }

        let mut next = map.clone();
        for seat_id in &released {
            next.assignments.remove(seat_id);
        }

        self.persist_assignments(&next.assignments)?;
        *map = next;

        info!("Released seats {released:?} held by student {student_id}");
        Ok(released)
    }

    pub fn seats(&self) -> Vec<SeatBox> {
        self.read().seats.clone()
    }

    pub fn assignments(&self) -> SeatAssignments {
        self.read().assignments.clone()
    }

    /// A consistent copy of seats and assignments for one frame.
    pub fn snapshot(&self) -> SeatMap {
        self.read().clone()
    }

    pub fn student_for(&self, seat_id: &str) -> Option<String> {
        self.read().student_for(seat_id).map(str::to_string)
    }

    pub fn tallies(&self) -> &Arc<Tallies> {
        &self.tallies
    }

    /// Both files are staged before either is replaced, so a serialization or
    /// disk-full failure leaves the previous pair intact. The two renames are
    /// not one atomic step; a crash between them can still pair new seats
    /// with old assignments, which the next successful write repairs.
    fn persist(&self, map: &SeatMap) -> MonitorResult<()> {
        let seats = stage_json(&self.seats_path, &map.seats).map_err(MonitorError::persistence)?;
        let assignments = match stage_json(&self.assignments_path, &map.assignments) {
            Ok(staged) => staged,
            Err(err) => {
                discard(&seats);
                return Err(MonitorError::persistence(err));
            }
        };

        if let Err(err) = commit_staged(&seats, &self.seats_path) {
            discard(&seats);
            discard(&assignments);
            return Err(MonitorError::persistence(err));
        }
        commit_staged(&assignments, &self.assignments_path).map_err(|err| {
            discard(&assignments);
            MonitorError::persistence(err)
        })
    }

    fn persist_assignments(&self, assignments: &SeatAssignments) -> MonitorResult<()> {
        let staged =
            stage_json(&self.assignments_path, assignments).map_err(MonitorError::persistence)?;
        commit_staged(&staged, &self.assignments_path).map_err(|err| {
            discard(&staged);
            MonitorError::persistence(err)
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `value` next to `path` and returns the staged file.
fn stage_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(value)?;
    let staged = staging_path(path);
    fs::write(&staged, serialized)
        .with_context(|| format!("failed to write {}", staged.display()))?;
    Ok(staged)
}

fn commit_staged(staged: &Path, path: &Path) -> Result<()> {
    fs::rename(staged, path).with_context(|| format!("failed to replace {}", path.display()))
}

fn discard(staged: &Path) {
    if let Err(err) = fs::remove_file(staged) {
        warn!("Failed to remove staged file {}: {err}", staged.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::{
        collections::BTreeSet,
        thread,
        time::{Duration, Instant},
    };
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SeatMapStore {
        SeatMapStore::new(
            dir.path().join("data/seats.json"),
            dir.path().join("data/seat_assignments.json"),
            Arc::new(Tallies::new()),
        )
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let report = store.load();

        assert_eq!(report.seats, 0);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind(), ErrorKind::ConfigurationMissing);
        assert!(store.seats().is_empty());
        assert!(store.assignments().is_empty());
    }

    #[test]
    fn corrupt_seat_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/seats.json"), "{not json").unwrap();

        let store = store_in(&dir);
        let report = store.load();
        assert_eq!(report.seats, 0);
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn sequential_ids_without_removal() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.load();

        let ids: Vec<String> = (0..5)
            .map(|i| store.add_seat(i as f64, 0.0, 10.0, 10.0, false).unwrap())
            .collect();
        let expected: Vec<String> = (1..=5).map(|n| format!("Pupitre {n}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn add_persists_seat_and_empty_assignment() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_seat(0.1, 0.2, 0.3, 0.4, true).unwrap();

        let seats_raw = fs::read_to_string(dir.path().join("data/seats.json")).unwrap();
        let seats: Vec<SeatBox> = serde_json::from_str(&seats_raw).unwrap();
        assert_eq!(seats, vec![SeatBox::new("Pupitre 1", 0.1, 0.2, 0.3, 0.4, true)]);

        let assignments_raw =
            fs::read_to_string(dir.path().join("data/seat_assignments.json")).unwrap();
        let assignments: SeatAssignments = serde_json::from_str(&assignments_raw).unwrap();
        assert_eq!(assignments.get("Pupitre 1"), Some(&None));
        assert_eq!(store.tallies().count("Pupitre 1"), 0);
    }

    #[test]
    fn invalid_coordinates_do_not_mutate() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let err = store.add_seat(f64::NAN, 0.0, 1.0, 1.0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.add_seat(0.0, 0.0, -1.0, 1.0, false).is_err());
        assert!(store.seats().is_empty());
        assert!(!dir.path().join("data/seats.json").exists());
    }

    #[test]
    fn remove_last_pops_only_newest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        let newest = store.add_seat(5.0, 0.0, 1.0, 1.0, false).unwrap();
        store.assign(Some("s2"), &newest).unwrap();

        assert!(store.remove_last_seat().unwrap());
        let seats = store.seats();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].seat_id, "Pupitre 1");
        assert!(!store.assignments().contains_key(&newest));
        assert!(store.tallies().state(&newest).is_none());
    }

    #[test]
    fn remove_on_empty_returns_false() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.load();
        assert!(!store.remove_last_seat().unwrap());
        assert!(!dir.path().join("data/seats.json").exists());
    }

    #[test]
    fn assign_requires_existing_seat() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let err = store.assign(Some("s1"), "Pupitre 9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.assignments().is_empty());
    }

    #[test]
    fn empty_student_unassigns() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let seat = store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        store.assign(Some("s1"), &seat).unwrap();
        assert_eq!(store.student_for(&seat).as_deref(), Some("s1"));

        store.assign(Some(""), &seat).unwrap();
        assert!(!store.assignments().contains_key(&seat));
        store.assign(Some("s1"), &seat).unwrap();
        store.assign(None, &seat).unwrap();
        assert_eq!(store.student_for(&seat), None);
    }

    #[test]
    fn rename_migrates_every_association() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let seat = store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        store.assign(Some("s1"), &seat).unwrap();
        let t0 = Instant::now();
        store
            .tallies()
            .try_award(&seat, t0, Duration::from_secs(3))
            .unwrap();

        store.rename(&seat, "Ventana").unwrap();

        assert!(store.seats().iter().all(|s| s.seat_id != seat));
        assert_eq!(store.seats()[0].seat_id, "Ventana");
        assert!(!store.assignments().contains_key(&seat));
        assert_eq!(store.student_for("Ventana").as_deref(), Some("s1"));
        assert!(store.tallies().state(&seat).is_none());
        let state = store.tallies().state("Ventana").unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.last_award, Some(t0));

        // Survives a reload from disk, counters aside.
        store.load();
        assert_eq!(store.student_for("Ventana").as_deref(), Some("s1"));
        assert_eq!(store.tallies().count("Ventana"), 0);
    }

    #[test]
    fn rename_rejects_collisions_and_unknown_seats() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        let b = store.add_seat(5.0, 0.0, 1.0, 1.0, false).unwrap();
        store.assign(Some("s1"), &a).unwrap();
        let before = store.snapshot();

        let err = store.rename(&a, &b).unwrap_err();
        assert!(matches!(err, MonitorError::SeatIdInUse(_)));
        let err = store.rename("Pupitre 42", "Nuevo").unwrap_err();
        assert!(matches!(err, MonitorError::UnknownSeat(_)));
        let err = store.rename(&a, "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn add_after_rename_skips_taken_id() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        store.rename("Pupitre 1", "Pupitre 2").unwrap();

        let id = store.add_seat(5.0, 0.0, 1.0, 1.0, false).unwrap();
        assert_eq!(id, "Pupitre 3");
    }

    #[test]
    fn load_reads_legacy_calibration_file_and_resets_counters() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(
            dir.path().join("data/seats.json"),
            r#"[{"seat_id": "Pupitre 1", "rect": [10, 10, 50, 50]}]"#,
        )
        .unwrap();

        let store = store_in(&dir);
        store.tallies().seed("Pupitre 1");
        store
            .tallies()
            .try_award("Pupitre 1", Instant::now(), Duration::from_secs(3))
            .unwrap();

        let report = store.load();
        assert_eq!(report.seats, 1);
        assert!(report.issues.is_empty());
        assert!(!store.seats()[0].normalized);
        assert_eq!(store.tallies().count("Pupitre 1"), 0);
    }

    #[test]
    fn concurrent_adds_get_unique_sequential_ids() {
        const WRITERS: usize = 16;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));
        store.load();

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.add_seat(i as f64, 0.0, 1.0, 1.0, false).unwrap())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let expected: BTreeSet<String> = (1..=WRITERS).map(sequential_seat_id).collect();
        let unique: BTreeSet<String> = ids.iter().cloned().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(unique, expected);

        let in_memory: BTreeSet<String> =
            store.seats().into_iter().map(|seat| seat.seat_id).collect();
        assert_eq!(in_memory, expected);

        let on_disk: Vec<SeatBox> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("data/seats.json")).unwrap())
                .unwrap();
        let on_disk: BTreeSet<String> =
            on_disk.into_iter().map(|seat| seat.seat_id).collect();
        assert_eq!(on_disk, expected);

        let assignments: SeatAssignments = serde_json::from_str(
            &fs::read_to_string(dir.path().join("data/seat_assignments.json")).unwrap(),
        )
        .unwrap();
        let assigned: BTreeSet<String> = assignments.keys().cloned().collect();
        assert_eq!(assigned, expected);
    }

    #[test]
    fn release_student_clears_only_their_seats() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        let b = store.add_seat(5.0, 0.0, 1.0, 1.0, false).unwrap();
        let c = store.add_seat(9.0, 0.0, 1.0, 1.0, false).unwrap();
        store.assign(Some("s1"), &a).unwrap();
        store.assign(Some("s2"), &b).unwrap();
        store.assign(Some("s1"), &c).unwrap();

        let mut released = store.release_student("s1").unwrap();
        released.sort();
        assert_eq!(released, vec![a.clone(), c.clone()]);
        assert_eq!(store.student_for(&a), None);
        assert_eq!(store.student_for(&b).as_deref(), Some("s2"));
        assert!(store.release_student("ghost").unwrap().is_empty());

        store.load();
        assert_eq!(store.student_for(&c), None);
        assert_eq!(store.student_for(&b).as_deref(), Some("s2"));
    }

    #[test]
    fn failed_second_file_leaves_first_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap();
        let seats_before = fs::read_to_string(dir.path().join("data/seats.json")).unwrap();

        // Blocks staging of the assignment file.
        fs::create_dir_all(dir.path().join("data/seat_assignments.json.tmp")).unwrap();
        let err = store.add_seat(5.0, 0.0, 1.0, 1.0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let seats_after = fs::read_to_string(dir.path().join("data/seats.json")).unwrap();
        assert_eq!(seats_after, seats_before);
        assert!(!dir.path().join("data/seats.json.tmp").exists());
        assert_eq!(store.seats().len(), 1);
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        // A directory where the seat file should be makes every write fail.
        fs::create_dir_all(dir.path().join("data/seats.json")).unwrap();
        let store = store_in(&dir);

        let err = store.add_seat(0.0, 0.0, 1.0, 1.0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(store.seats().is_empty());
        assert!(store.tallies().counts().is_empty());
    }
}
