use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const STATE_FILE: &str = "session_state.json";
/// The one-time unlock permission lives under its own key so a state write
/// can never clear it.
const UNLOCK_FILE: &str = "audio_unlocked";

/// Mutations are frequent (sliders); writes coalesce behind this window and
/// are flushed explicitly on pause/stop/background/drop.
pub const WRITE_DEBOUNCE: Duration = Duration::from_millis(500);

/// The durable subset of session state. Transient playback flags are never
/// written - a reloaded session always comes back stopped.
///
/// `active_mode` is stored as its string id so the store stays decoupled
/// from the preset enum; an unknown id on load falls back to the default
/// mode upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub active_mode: String,
    pub master_volume: f32,
    pub neural_volume: f32,
    pub binaural_volume: f32,
    pub ambient_brown: f32,
    pub ambient_pink: f32,
    pub ambient_rain: f32,
    pub ambient_ocean: f32,
    pub duration_hours: f64,
    pub last_active_epoch_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed key-value store for the session record and the unlock flag.
pub struct StateStore {
    dir: PathBuf,
    pending: Option<PersistedState>,
    last_write: Option<Instant>,
}

impl StateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: None,
            last_write: None,
        })
    }

    /// Platform data directory for the app, falling back to the working
    /// directory when the platform offers none.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lull")
    }

    /// Read the persisted record. Missing file means a fresh install;
    /// malformed content is logged and treated the same - initialization
    /// never fails on bad storage.
    pub fn load(&self) -> Option<PersistedState> {
        let path = self.dir.join(STATE_FILE);
        let file = File::open(&path).ok()?;
        let reader = BufReader::new(file);
        match serde_json::from_reader(reader) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt session state, using defaults");
                None
            }
        }
    }

    /// Write the record immediately.
    pub fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let file = File::create(self.dir.join(STATE_FILE))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, state)?;
        self.pending = None;
        self.last_write = Some(Instant::now());
        Ok(())
    }

    /// Write the record if the debounce window has passed, otherwise hold
    /// it as pending for the next `flush`. Write failures are logged and
    /// swallowed; persistence must never disturb playback.
    pub fn save_debounced(&mut self, state: &PersistedState, now: Instant) {
        let due = match self.last_write {
            Some(at) => now.duration_since(at) >= WRITE_DEBOUNCE,
            None => true,
        };
        if due {
            if let Err(e) = self.save(state) {
                tracing::warn!(error = %e, "failed to persist session state");
            }
        } else {
            self.pending = Some(state.clone());
        }
    }

    /// Write any held record now.
    pub fn flush(&mut self) {
        if let Some(state) = self.pending.take() {
            if let Err(e) = self.save(&state) {
                tracing::warn!(error = %e, "failed to flush session state");
            }
        }
    }

    /// Write any held record once the debounce window has passed. Called
    /// from the owner's periodic tick.
    pub fn flush_due(&mut self, now: Instant) {
        if self.pending.is_none() {
            return;
        }
        let due = match self.last_write {
            Some(at) => now.duration_since(at) >= WRITE_DEBOUNCE,
            None => true,
        };
        if due {
            self.flush();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the user has ever completed the audio unlock gesture.
    pub fn load_unlock_flag(&self) -> bool {
        self.dir.join(UNLOCK_FILE).exists()
    }

    /// Record the unlock permanently. Sticky: nothing in this crate ever
    /// removes the key.
    pub fn set_unlock_flag(&mut self) -> Result<(), StoreError> {
        std::fs::write(self.dir.join(UNLOCK_FILE), b"1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state() -> PersistedState {
        PersistedState {
            active_mode: "CONCENTRAZIONE".to_string(),
            master_volume: 0.8,
            neural_volume: 0.85,
            binaural_volume: 0.18,
            ambient_brown: 0.0,
            ambient_pink: 0.25,
            ambient_rain: 0.5,
            ambient_ocean: 0.0,
            duration_hours: 1.0,
            last_active_epoch_secs: Some(1_750_000_000),
        }
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");

        let state = sample_state();
        store.save(&state).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::open(dir.path()).expect("open");
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_state_falls_back_to_none() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");
        store.save(&sample_state()).expect("save");

        std::fs::write(dir.path().join(STATE_FILE), b"{ definitely not json").expect("write");
        assert!(store.load().is_none());
    }

    #[test]
    fn test_unlock_flag_is_separate_from_state_writes() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");

        assert!(!store.load_unlock_flag());
        store.set_unlock_flag().expect("set flag");
        assert!(store.load_unlock_flag());

        // A state write must not touch the flag.
        store.save(&sample_state()).expect("save");
        assert!(store.load_unlock_flag());
    }

    #[test]
    fn test_debounce_holds_rapid_writes() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");
        let now = Instant::now();

        let mut state = sample_state();
        store.save_debounced(&state, now);
        assert!(!store.has_pending(), "first write goes straight through");

        state.master_volume = 0.1;
        store.save_debounced(&state, now + Duration::from_millis(10));
        assert!(store.has_pending(), "second write inside the window waits");
        assert_ne!(store.load().expect("load").master_volume, 0.1);

        store.flush();
        assert!(!store.has_pending());
        assert_eq!(store.load().expect("load").master_volume, 0.1);
    }

    #[test]
    fn test_flush_due_respects_window() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");
        let now = Instant::now();

        let mut state = sample_state();
        store.save_debounced(&state, now);
        state.master_volume = 0.3;
        store.save_debounced(&state, now + Duration::from_millis(10));
        assert!(store.has_pending());

        store.flush_due(now + Duration::from_millis(20));
        assert!(store.has_pending(), "still inside the window");

        store.flush_due(now + WRITE_DEBOUNCE + Duration::from_millis(1));
        assert!(!store.has_pending());
        assert_eq!(store.load().expect("load").master_volume, 0.3);
    }

    #[test]
    fn test_debounced_write_goes_through_after_window() {
        let dir = tempdir().expect("tempdir");
        let mut store = StateStore::open(dir.path()).expect("open");
        let now = Instant::now();

        let mut state = sample_state();
        store.save_debounced(&state, now);

        state.duration_hours = 2.0;
        store.save_debounced(&state, now + WRITE_DEBOUNCE);
        assert!(!store.has_pending());
        assert_eq!(store.load().expect("load").duration_hours, 2.0);
    }
}
