use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use lull_dsp::{AmbientChannelId, clamp_volume};
use lull_store::PersistedState;

/// The fixed entrainment modes. Each selects a beat/carrier pair and the
/// volumes for the binaural path as one unit; ambient levels are the
/// user's own and no preset touches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    Concentrazione,
    Calma,
    Blocco,
    Quiete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetParams {
    pub beat_hz: f32,
    pub carrier_hz: f32,
    pub binaural_volume: f32,
    pub neural_volume: f32,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Concentrazione,
        Preset::Calma,
        Preset::Blocco,
        Preset::Quiete,
    ];

    pub fn params(self) -> PresetParams {
        match self {
            // Beta focus.
            Preset::Concentrazione => PresetParams {
                beat_hz: 16.0,
                carrier_hz: 220.0,
                binaural_volume: 0.18,
                neural_volume: 0.85,
            },
            // Alpha calm.
            Preset::Calma => PresetParams {
                beat_hz: 10.0,
                carrier_hz: 210.0,
                binaural_volume: 0.16,
                neural_volume: 0.80,
            },
            // Gamma masking.
            Preset::Blocco => PresetParams {
                beat_hz: 40.0,
                carrier_hz: 240.0,
                binaural_volume: 0.20,
                neural_volume: 0.90,
            },
            // Theta wind-down.
            Preset::Quiete => PresetParams {
                beat_hz: 6.0,
                carrier_hz: 190.0,
                binaural_volume: 0.14,
                neural_volume: 0.75,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Concentrazione => "CONCENTRAZIONE",
            Preset::Calma => "CALMA",
            Preset::Blocco => "BLOCCO",
            Preset::Quiete => "QUIETE",
        }
    }
}

impl FromStr for Preset {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// The user's ambient mix, one slider per channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmbientLevels {
    pub brown: f32,
    pub pink: f32,
    pub rain: f32,
    pub ocean: f32,
}

impl AmbientLevels {
    pub fn get(&self, channel: AmbientChannelId) -> f32 {
        match channel {
            AmbientChannelId::Brown => self.brown,
            AmbientChannelId::Pink => self.pink,
            AmbientChannelId::Rain => self.rain,
            AmbientChannelId::Ocean => self.ocean,
        }
    }

    pub fn set(&mut self, channel: AmbientChannelId, value: f32) {
        match channel {
            AmbientChannelId::Brown => self.brown = value,
            AmbientChannelId::Pink => self.pink = value,
            AmbientChannelId::Rain => self.rain = value,
            AmbientChannelId::Ocean => self.ocean = value,
        }
    }
}

/// The immutable snapshot published to subscribers on every mutation.
/// Mutated only through [`crate::AudioSession`] methods.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub is_playing: bool,
    pub is_paused: bool,
    pub active_mode: Preset,
    pub master_volume: f32,
    pub neural_volume: f32,
    pub binaural_volume: f32,
    pub ambient: AmbientLevels,
    pub duration_hours: f64,
    pub time_left_seconds: u64,
    /// Sticky once true; restored from its own storage key.
    pub user_unlocked_audio: bool,
    pub last_active_epoch_secs: Option<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        let mode = Preset::Concentrazione;
        let params = mode.params();
        Self {
            is_playing: false,
            is_paused: false,
            active_mode: mode,
            master_volume: 0.8,
            neural_volume: params.neural_volume,
            binaural_volume: params.binaural_volume,
            ambient: AmbientLevels::default(),
            duration_hours: 1.0,
            time_left_seconds: 0,
            user_unlocked_audio: false,
            last_active_epoch_secs: None,
        }
    }
}

impl SessionState {
    /// The durable subset. Playback flags and the countdown are transient;
    /// the unlock flag travels on its own key.
    pub(crate) fn to_persisted(&self) -> PersistedState {
        PersistedState {
            active_mode: self.active_mode.as_str().to_string(),
            master_volume: self.master_volume,
            neural_volume: self.neural_volume,
            binaural_volume: self.binaural_volume,
            ambient_brown: self.ambient.brown,
            ambient_pink: self.ambient.pink,
            ambient_rain: self.ambient.rain,
            ambient_ocean: self.ambient.ocean,
            duration_hours: self.duration_hours,
            last_active_epoch_secs: self.last_active_epoch_secs,
        }
    }

    /// Rebuild state from a persisted record. Sessions never come back
    /// playing; every volume is re-clamped and an unknown mode or bad
    /// duration falls back to the default.
    pub(crate) fn hydrate(record: &PersistedState) -> Self {
        let defaults = Self::default();
        let active_mode = record
            .active_mode
            .parse::<Preset>()
            .unwrap_or(defaults.active_mode);
        let duration_hours = if record.duration_hours > 0.0 && record.duration_hours.is_finite() {
            record.duration_hours
        } else {
            defaults.duration_hours
        };
        Self {
            is_playing: false,
            is_paused: false,
            active_mode,
            master_volume: clamp_volume(record.master_volume),
            neural_volume: clamp_volume(record.neural_volume),
            binaural_volume: clamp_volume(record.binaural_volume),
            ambient: AmbientLevels {
                brown: clamp_volume(record.ambient_brown),
                pink: clamp_volume(record.ambient_pink),
                rain: clamp_volume(record.ambient_rain),
                ocean: clamp_volume(record.ambient_ocean),
            },
            duration_hours,
            time_left_seconds: 0,
            user_unlocked_audio: false,
            last_active_epoch_secs: record.last_active_epoch_secs,
        }
    }
}

pub(crate) fn epoch_secs_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}
