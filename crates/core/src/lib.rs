pub mod session;
pub mod state;
pub mod timer;

pub use session::{
    AudioSession, BackendFactory, MediaIntent, SessionConfig, Subscription, TICK_INTERVAL,
};
pub use state::{AmbientLevels, Preset, PresetParams, SessionState};
pub use timer::{SessionTimer, TimerState, TimerTick};

pub use lull_dsp::{AmbientChannelId, AudioBackend, EngineCommand, EngineStatus};
pub use lull_engine::EngineConfig;
pub use lull_render::{MixSettings, render_mix, write_wav};
pub use lull_store::{PersistedState, StateStore, StoreError};
