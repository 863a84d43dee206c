use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// A named, time-of-day-bounded window in which attendance and participation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPeriod {
    pub name: String,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl ClassPeriod {
    pub fn new(name: &str, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureThresholds {
    /// Persons below this overall detection score are ignored.
    pub person_min_score: f32,
    /// Wrist and shoulder keypoints must exceed this score to count.
    pub keypoint_min_score: f32,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            person_min_score: 0.35,
            keypoint_min_score: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceSettings {
    pub face_match_tolerance: f32,
    pub detect_every_n_frames: u32,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            face_match_tolerance: 0.6,
            detect_every_n_frames: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub seats_file: PathBuf,
    pub assignments_file: PathBuf,
    pub database_file: PathBuf,
    pub camera_index: i32,
    pub mirror_frames: bool,
    pub jpeg_quality: u8,
    pub frame_buffer: usize,
    pub participation_cooldown_secs: u64,
    pub gesture: GestureThresholds,
    pub attendance: AttendanceSettings,
    pub class_periods: Vec<ClassPeriod>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            seats_file: PathBuf::from("data/seats.json"),
            assignments_file: PathBuf::from("data/seat_assignments.json"),
            database_file: PathBuf::from("asistencia_ia.db"),
            camera_index: 0,
            mirror_frames: true,
            jpeg_quality: 80,
            frame_buffer: 4,
            participation_cooldown_secs: 3,
            gesture: GestureThresholds::default(),
            attendance: AttendanceSettings::default(),
            class_periods: default_periods(),
        }
    }
}

fn default_periods() -> Vec<ClassPeriod> {
    let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
    vec![
        ClassPeriod::new("Clase 1", at(6, 0), at(7, 50)),
        ClassPeriod::new("Clase 2", at(8, 0), at(9, 40)),
    ]
}

impl AppConfig {
    /// Reads the config at `path`, or returns defaults rooted at the file's directory when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.data_dir = parent.to_path_buf();
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// A config rooted at `dir` with every other value defaulted.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            data_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn seats_path(&self) -> PathBuf {
        self.data_dir.join(&self.seats_file)
    }

    pub fn assignments_path(&self) -> PathBuf {
        self.data_dir.join(&self.assignments_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Resolves a stored file path against `data_dir`; absolute paths are kept.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(path)
    }

    pub fn schedule(&self) -> ClassSchedule {
        ClassSchedule::new(self.class_periods.clone())
    }
}

/// Answers which class period, if any, is running right now.
pub trait PeriodResolver: Send + Sync {
    fn current_period(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct ClassSchedule {
    periods: Vec<ClassPeriod>,
}

impl ClassSchedule {
    pub fn new(periods: Vec<ClassPeriod>) -> Self {
        Self { periods }
    }

    pub fn period_at(&self, time: NaiveTime) -> Option<&ClassPeriod> {
        self.periods.iter().find(|period| period.contains(time))
    }

    pub fn periods(&self) -> &[ClassPeriod] {
        &self.periods
    }
}

impl PeriodResolver for ClassSchedule {
    fn current_period(&self) -> Option<String> {
        self.period_at(Local::now().time())
            .map(|period| period.name.clone())
    }
}
