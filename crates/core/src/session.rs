use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

use lull_dsp::{AmbientChannelId, AudioBackend, EngineCommand, EngineStatus, clamp_volume};
use lull_store::StateStore;

use crate::state::{Preset, SessionState, epoch_secs_now};
use crate::timer::{SessionTimer, TimerTick};

/// Countdown poll cadence. Well under the one-second display granularity
/// so the UI countdown never visibly stalls.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period after a foreground transition before touching the audio
/// context again.
const FOREGROUND_SETTLE: Duration = Duration::from_millis(300);

const RENDER_SEED: u64 = 0x5EED;

/// Builds the audio backend on demand. Invoked at most once per session
/// lifetime, from the first successful unlock.
pub type BackendFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn AudioBackend>> + Send>;

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Platform media-control intents, forwarded to the ordinary commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaIntent {
    Play,
    Pause,
    Stop,
}

pub struct SessionConfig {
    /// Where the persisted record and the unlock flag live.
    pub store_dir: PathBuf,
    pub engine: lull_engine::EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_dir: StateStore::default_dir(),
            engine: lull_engine::EngineConfig::default(),
        }
    }
}

struct Inner {
    state: SessionState,
    timer: SessionTimer,
    store: StateStore,
    backend: Option<Box<dyn AudioBackend>>,
    factory: BackendFactory,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    ticker_stop: Option<Sender<()>>,
}

impl Inner {
    /// Construct the backend if absent and resume it. On success the sticky
    /// unlock flag is set and persisted under its own key. Any refusal is
    /// logged and reported as `false` - never thrown.
    fn unlock(&mut self) -> bool {
        if self.backend.is_none() {
            match (self.factory)() {
                Ok(backend) => self.backend = Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "audio unlock denied by platform");
                    return false;
                }
            }
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        if let Err(e) = backend.resume() {
            tracing::warn!(error = %e, "audio context resume refused");
            return false;
        }
        if !self.state.user_unlocked_audio {
            self.state.user_unlocked_audio = true;
            if let Err(e) = self.store.set_unlock_flag() {
                tracing::warn!(error = %e, "failed to persist unlock flag");
            }
        }
        true
    }

    fn send(&mut self, cmd: EngineCommand) {
        if let Some(backend) = self.backend.as_mut() {
            backend.send(cmd);
        }
    }

    fn suspend_backend(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.suspend() {
                tracing::warn!(error = %e, "audio context suspend refused");
            }
        }
    }

    /// Stamp activity and queue a debounced write of the durable record.
    fn touch_and_persist(&mut self) {
        self.state.last_active_epoch_secs = epoch_secs_now();
        let record = self.state.to_persisted();
        self.store.save_debounced(&record, Instant::now());
    }

    fn cancel_ticker(&mut self) {
        if let Some(stop) = self.ticker_stop.take() {
            let _ = stop.try_send(());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_ticker();
        self.store.flush();
    }
}

/// The audio session manager: sole owner of the audio backend and its
/// graph, the countdown timer, and the persisted state. One instance per
/// application, passed explicitly to whoever needs to issue commands.
///
/// Cloning shares the same session. Every mutation publishes a fresh
/// [`SessionState`] snapshot to subscribers, strictly after the underlying
/// graph command was issued.
#[derive(Clone)]
pub struct AudioSession {
    inner: Arc<Mutex<Inner>>,
}

impl AudioSession {
    /// Wire the real cpal engine behind the session. The engine itself is
    /// not built here - that happens at the first successful unlock.
    pub fn new(config: SessionConfig) -> anyhow::Result<Self> {
        let engine_config = config.engine.clone();
        let factory: BackendFactory = Box::new(move || {
            lull_engine::start(engine_config.clone())
                .map(|engine| Box::new(engine) as Box<dyn AudioBackend>)
        });
        Self::with_backend_factory(config.store_dir, factory)
    }

    /// Construct with an explicit backend factory. This is the seam the
    /// tests use; `new` is a thin wrapper around it.
    pub fn with_backend_factory(
        store_dir: impl Into<PathBuf>,
        factory: BackendFactory,
    ) -> anyhow::Result<Self> {
        let store = StateStore::open(store_dir)?;
        let mut state = match store.load() {
            Some(record) => SessionState::hydrate(&record),
            None => SessionState::default(),
        };
        state.user_unlocked_audio = store.load_unlock_flag();

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                timer: SessionTimer::new(),
                store,
                backend: None,
                factory,
                listeners: Vec::new(),
                next_listener_id: 0,
                ticker_stop: None,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pass the platform unlock gate: lazily construct the audio backend
    /// and resume it. Returns `false` when the platform refuses; the UI is
    /// expected to prompt again. Once it has returned `true` the permission
    /// is permanent.
    pub fn unlock_audio(&self) -> bool {
        let ok = {
            let mut inner = self.lock();
            let ok = inner.unlock();
            if ok {
                inner.touch_and_persist();
            }
            ok
        };
        if ok {
            self.publish();
        }
        ok
    }

    /// Begin (or resume) playback. Runs the unlock gate first and fails
    /// without side effects if it does not pass. Builds a fresh tone pair
    /// from the active preset, applies the current ambient mix, and starts
    /// the countdown - a fresh start counts the full configured duration, a
    /// resume from pause continues the preserved remainder.
    pub fn start(&self) -> bool {
        let started = {
            let mut inner = self.lock();
            if inner.state.is_playing {
                return true;
            }
            if !inner.unlock() {
                return false;
            }

            let params = inner.state.active_mode.params();
            let binaural = inner.state.binaural_volume;
            let neural = inner.state.neural_volume;
            let master = inner.state.master_volume;
            let levels = inner.state.ambient;
            let resuming = inner.state.is_paused;

            inner.send(EngineCommand::StartTone {
                beat_hz: params.beat_hz,
                carrier_hz: params.carrier_hz,
                gain: binaural,
            });
            inner.send(EngineCommand::SetNeuralGain(neural));
            for channel in AmbientChannelId::ALL {
                inner.send(EngineCommand::SetAmbientGain {
                    channel,
                    gain: levels.get(channel) * master,
                });
            }
            inner.send(EngineCommand::ResumeAmbient);

            let now = Instant::now();
            if resuming {
                inner.timer.resume(now);
            } else {
                let total = Duration::from_secs_f64(inner.state.duration_hours * 3600.0);
                inner.timer.start(total, now);
            }
            inner.state.time_left_seconds = inner.timer.time_left();
            inner.state.is_playing = true;
            inner.state.is_paused = false;
            inner.touch_and_persist();
            true
        };
        if started {
            self.spawn_ticker();
            self.publish();
        }
        started
    }

    /// Freeze playback: fade the tone pair out, pause ambient sources in
    /// place, suspend the context, and stop the countdown ticking without
    /// clearing the remainder. The next `start` rebuilds the oscillators -
    /// a stopped pair is never resumed.
    pub fn pause(&self) {
        let changed = {
            let mut inner = self.lock();
            if !inner.state.is_playing {
                false
            } else {
                inner.send(EngineCommand::StopTone { fast: true });
                inner.send(EngineCommand::PauseAmbient);
                inner.suspend_backend();

                inner.timer.pause(Instant::now());
                inner.state.time_left_seconds = inner.timer.time_left();
                inner.state.is_playing = false;
                inner.state.is_paused = true;
                inner.cancel_ticker();
                inner.touch_and_persist();
                inner.store.flush();
                true
            }
        };
        if changed {
            self.publish();
        }
    }

    /// Tear down playback: fast-fade the tone pair, rewind and pause every
    /// ambient source, suspend the context, clear the countdown. Safe to
    /// call in any state, any number of times.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            inner.send(EngineCommand::StopTone { fast: true });
            inner.send(EngineCommand::RewindAmbient);
            inner.suspend_backend();

            inner.timer.stop();
            inner.state.time_left_seconds = 0;
            inner.state.is_playing = false;
            inner.state.is_paused = false;
            inner.cancel_ticker();
            inner.touch_and_persist();
            inner.store.flush();
        }
        self.publish();
    }

    /// Switch the entrainment mode. Updates the neural path only - the
    /// user's ambient mix always survives a mode change. While playing,
    /// the tone pair is rebuilt at the new frequencies in place; ambient
    /// sources and the countdown are untouched.
    pub fn apply_preset(&self, mode: Preset) {
        {
            let mut inner = self.lock();
            let params = mode.params();
            inner.state.active_mode = mode;
            inner.state.neural_volume = clamp_volume(params.neural_volume);
            inner.state.binaural_volume = clamp_volume(params.binaural_volume);

            if inner.state.is_playing {
                let binaural = inner.state.binaural_volume;
                let neural = inner.state.neural_volume;
                inner.send(EngineCommand::SetNeuralGain(neural));
                inner.send(EngineCommand::RetuneTone {
                    beat_hz: params.beat_hz,
                    carrier_hz: params.carrier_hz,
                });
                inner.send(EngineCommand::SetToneGain(binaural));
            }
            inner.touch_and_persist();
        }
        self.publish();
    }

    /// String-keyed preset switch for UI command surfaces. Unrecognized
    /// names are silently ignored.
    pub fn apply_preset_named(&self, name: &str) {
        match name.parse::<Preset>() {
            Ok(mode) => self.apply_preset(mode),
            Err(()) => tracing::debug!(name, "ignoring unknown preset"),
        }
    }

    /// Master volume scales every ambient channel (`channel * master`); the
    /// binaural path has its own master.
    pub fn set_master_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        {
            let mut inner = self.lock();
            inner.state.master_volume = volume;
            let levels = inner.state.ambient;
            for channel in AmbientChannelId::ALL {
                inner.send(EngineCommand::SetAmbientGain {
                    channel,
                    gain: levels.get(channel) * volume,
                });
            }
            inner.touch_and_persist();
        }
        self.publish();
    }

    pub fn set_neural_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        {
            let mut inner = self.lock();
            inner.state.neural_volume = volume;
            inner.send(EngineCommand::SetNeuralGain(volume));
            inner.touch_and_persist();
        }
        self.publish();
    }

    /// Binaural volume changes ramp smoothly in the graph; the others apply
    /// immediately.
    pub fn set_binaural_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        {
            let mut inner = self.lock();
            inner.state.binaural_volume = volume;
            inner.send(EngineCommand::SetToneGain(volume));
            inner.touch_and_persist();
        }
        self.publish();
    }

    pub fn set_ambient_volume(&self, channel: AmbientChannelId, volume: f32) {
        let volume = clamp_volume(volume);
        {
            let mut inner = self.lock();
            inner.state.ambient.set(channel, volume);
            let gain = volume * inner.state.master_volume;
            inner.send(EngineCommand::SetAmbientGain { channel, gain });
            inner.touch_and_persist();
        }
        self.publish();
    }

    /// Zero the whole ambient mix. The one reset target; `stop` never
    /// touches ambient volumes.
    pub fn reset_ambient(&self) {
        {
            let mut inner = self.lock();
            for channel in AmbientChannelId::ALL {
                inner.state.ambient.set(channel, 0.0);
                inner.send(EngineCommand::SetAmbientGain { channel, gain: 0.0 });
            }
            inner.touch_and_persist();
        }
        self.publish();
    }

    /// Update the configured session length. A running countdown keeps its
    /// current deadline; the new duration applies from the next start.
    pub fn set_duration(&self, hours: f64) {
        if !(hours > 0.0 && hours.is_finite()) {
            tracing::warn!(hours, "ignoring non-positive session duration");
            return;
        }
        {
            let mut inner = self.lock();
            inner.state.duration_hours = hours;
            inner.touch_and_persist();
        }
        self.publish();
    }

    /// Best-effort re-entry after a foreground transition: resume the
    /// context, restart ambient sources that should be sounding, and bring
    /// the countdown poller back if a session is running. Does nothing at
    /// all before the unlock gate has been passed.
    pub fn resume_all(&self) {
        let respawn_ticker = {
            let mut inner = self.lock();
            if !inner.state.user_unlocked_audio {
                return;
            }
            if let Some(backend) = inner.backend.as_mut() {
                if let Err(e) = backend.resume() {
                    tracing::warn!(error = %e, "audio context resume refused");
                }
            }
            if inner.state.is_playing {
                inner.send(EngineCommand::ResumeAmbient);
                if !inner.timer.is_running() {
                    let left = inner.state.time_left_seconds;
                    if left > 0 {
                        inner.timer.start(Duration::from_secs(left), Instant::now());
                    }
                }
                true
            } else {
                false
            }
        };
        if respawn_ticker {
            self.spawn_ticker();
        }
    }

    /// Visibility loss: only the countdown poller is suspended - audio
    /// keeps sounding, the deadline stands, and the record is flushed in
    /// case the process dies in the background.
    pub fn on_hidden(&self) {
        let mut inner = self.lock();
        inner.cancel_ticker();
        inner.state.last_active_epoch_secs = epoch_secs_now();
        let record = inner.state.to_persisted();
        if let Err(e) = inner.store.save(&record) {
            tracing::warn!(error = %e, "failed to persist state on background transition");
        }
    }

    /// Visibility regained: after a short settle delay, resume the context
    /// and whatever should be running.
    pub fn on_visible(&self) {
        if !self.get_state().user_unlocked_audio {
            return;
        }
        let session = self.clone();
        let spawned = std::thread::Builder::new()
            .name("lull-foreground".into())
            .spawn(move || {
                std::thread::sleep(FOREGROUND_SETTLE);
                session.resume_all();
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn foreground settle thread");
            self.resume_all();
        }
    }

    /// Forward a platform now-playing intent to the ordinary commands.
    pub fn handle_media_intent(&self, intent: MediaIntent) {
        match intent {
            MediaIntent::Play => {
                if !self.start() {
                    tracing::debug!("media play intent ignored, unlock gate not passed");
                }
            }
            MediaIntent::Pause => self.pause(),
            MediaIntent::Stop => self.stop(),
        }
    }

    /// Register a listener invoked with a snapshot after every mutation.
    /// Dropping the returned subscription deregisters it. A panicking
    /// listener is logged and skipped; it never blocks the others.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionState) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Defensive copy of the current state.
    pub fn get_state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// True until the unlock gate has been passed once.
    pub fn needs_user_interaction(&self) -> bool {
        !self.lock().state.user_unlocked_audio
    }

    /// True when a previous session already passed the gate, so playback
    /// may be offered without a fresh gesture prompt.
    pub fn can_auto_resume(&self) -> bool {
        self.lock().state.user_unlocked_audio
    }

    /// Most recent post-limiter peak reported by the engine, if any.
    pub fn poll_peak_level(&self) -> Option<f32> {
        let mut inner = self.lock();
        let backend = inner.backend.as_mut()?;
        match backend.poll_status() {
            Some(EngineStatus::Peak(peak)) => Some(peak),
            None => None,
        }
    }

    /// Bounce the current mix to a WAV file, offline and deterministic.
    pub fn render_to_file(&self, path: &Path, seconds: f32) -> anyhow::Result<()> {
        let (settings, sample_rate) = {
            let inner = self.lock();
            let params = inner.state.active_mode.params();
            let state = &inner.state;
            let settings = lull_render::MixSettings {
                beat_hz: params.beat_hz,
                carrier_hz: params.carrier_hz,
                binaural_volume: state.binaural_volume,
                neural_volume: state.neural_volume,
                brown: state.ambient.brown * state.master_volume,
                pink: state.ambient.pink * state.master_volume,
                rain: state.ambient.rain * state.master_volume,
                ocean: state.ambient.ocean * state.master_volume,
            };
            let sample_rate = inner
                .backend
                .as_ref()
                .map(|b| b.sample_rate())
                .unwrap_or(44_100);
            (settings, sample_rate)
        };
        let samples = lull_render::render_mix(&settings, seconds, sample_rate, RENDER_SEED);
        lull_render::write_wav(&samples, sample_rate, path)
    }

    /// Snapshot the state and fan it out. Listeners run outside the lock,
    /// so one may re-enter the session from its callback.
    fn publish(&self) {
        let (snapshot, listeners) = {
            let inner = self.lock();
            let listeners: Vec<Listener> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (inner.state.clone(), listeners)
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                tracing::warn!("state listener panicked, continuing");
            }
        }
    }

    /// One countdown poll. Returns `false` when the poller should exit -
    /// the timer left Running, or the countdown expired (which runs the
    /// full stop sequence).
    fn tick(&self, now: Instant) -> bool {
        enum After {
            Continue,
            Publish,
            Expire,
            Exit,
        }
        let after = {
            let mut inner = self.lock();
            inner.store.flush_due(now);
            match inner.timer.tick(now) {
                TimerTick::Inactive => After::Exit,
                TimerTick::Running(left) => {
                    if left != inner.state.time_left_seconds {
                        inner.state.time_left_seconds = left;
                        After::Publish
                    } else {
                        After::Continue
                    }
                }
                TimerTick::Expired => After::Expire,
            }
        };
        match after {
            After::Continue => true,
            After::Publish => {
                self.publish();
                true
            }
            After::Expire => {
                self.stop();
                false
            }
            After::Exit => {
                // The timer left Running without a cancel (should not
                // happen, but a stale handle would block the next spawn).
                self.lock().ticker_stop = None;
                false
            }
        }
    }

    /// Bring up the countdown poller thread if it is not already running.
    /// The poller holds only a weak reference; it dies with the session or
    /// on the first tick after cancellation.
    fn spawn_ticker(&self) {
        let stop_rx = {
            let mut inner = self.lock();
            if inner.ticker_stop.is_some() {
                return;
            }
            let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
            inner.ticker_stop = Some(stop_tx);
            stop_rx
        };

        let weak = Arc::downgrade(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("lull-ticker".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(TICK_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let session = AudioSession { inner };
                    if !session.tick(Instant::now()) {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn countdown poller");
            self.lock().ticker_stop = None;
        }
    }
}

/// RAII deregistration for a state listener.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Explicit form of dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let id = self.id;
            inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct MockBackend {
        commands: Arc<Mutex<Vec<EngineCommand>>>,
        resumes: Arc<AtomicU32>,
        suspends: Arc<AtomicU32>,
    }

    impl AudioBackend for MockBackend {
        fn send(&mut self, cmd: EngineCommand) {
            self.commands.lock().unwrap().push(cmd);
        }

        fn resume(&mut self) -> anyhow::Result<()> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn suspend(&mut self) -> anyhow::Result<()> {
            self.suspends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            44_100
        }

        fn poll_status(&mut self) -> Option<EngineStatus> {
            None
        }
    }

    struct Harness {
        session: AudioSession,
        commands: Arc<Mutex<Vec<EngineCommand>>>,
        resumes: Arc<AtomicU32>,
        _dir: Option<tempfile::TempDir>,
    }

    fn harness() -> Harness {
        let dir = tempdir().expect("tempdir");
        let mut h = harness_in(dir.path());
        h._dir = Some(dir);
        h
    }

    /// Harness over a caller-owned store directory, for tests that reopen
    /// the same store with a second session.
    fn harness_in(path: &std::path::Path) -> Harness {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let resumes = Arc::new(AtomicU32::new(0));
        let suspends = Arc::new(AtomicU32::new(0));

        let c = commands.clone();
        let r = resumes.clone();
        let factory: BackendFactory = Box::new(move || {
            Ok(Box::new(MockBackend {
                commands: c.clone(),
                resumes: r.clone(),
                suspends: suspends.clone(),
            }))
        });

        let session = AudioSession::with_backend_factory(path, factory).expect("session");
        Harness {
            session,
            commands,
            resumes,
            _dir: None,
        }
    }

    fn denied_session(dir: &std::path::Path) -> AudioSession {
        let factory: BackendFactory =
            Box::new(|| Err(anyhow::anyhow!("no user gesture yet")));
        AudioSession::with_backend_factory(dir, factory).expect("session")
    }

    fn sent(h: &Harness) -> Vec<EngineCommand> {
        h.commands.lock().unwrap().clone()
    }

    #[test]
    fn test_start_before_unlock_fails_without_side_effects() {
        let dir = tempdir().expect("tempdir");
        let session = denied_session(dir.path());

        assert!(!session.start());
        let state = session.get_state();
        assert!(!state.is_playing);
        assert!(!state.is_paused);
        assert!(!state.user_unlocked_audio);
        assert!(session.needs_user_interaction());
        assert!(!session.can_auto_resume());
    }

    #[test]
    fn test_unlock_is_sticky_and_persists() {
        let dir = tempdir().expect("tempdir");
        {
            let h = harness_in(dir.path());
            assert!(h.session.unlock_audio());
            assert!(h.session.get_state().user_unlocked_audio);
        }
        // A new session over the same store restores the flag.
        let factory: BackendFactory = Box::new(|| Err(anyhow::anyhow!("unused")));
        let session = AudioSession::with_backend_factory(dir.path(), factory).expect("session");
        assert!(session.can_auto_resume());
        assert!(!session.needs_user_interaction());
    }

    #[test]
    fn test_start_builds_tone_from_active_preset() {
        let h = harness();
        assert!(h.session.start());

        let state = h.session.get_state();
        assert!(state.is_playing);
        assert!(!state.is_paused);
        assert!(state.user_unlocked_audio);

        // Default mode is CONCENTRAZIONE: left 220 Hz, right 236 Hz.
        let commands = sent(&h);
        assert!(commands.contains(&EngineCommand::StartTone {
            beat_hz: 16.0,
            carrier_hz: 220.0,
            gain: 0.18,
        }));
        assert!(commands.contains(&EngineCommand::SetNeuralGain(0.85)));
        assert!(commands.contains(&EngineCommand::ResumeAmbient));
    }

    #[test]
    fn test_playing_and_paused_never_both_true() {
        let h = harness();
        let flags = |s: &AudioSession| {
            let st = s.get_state();
            assert!(!(st.is_playing && st.is_paused));
            (st.is_playing, st.is_paused)
        };

        flags(&h.session);
        h.session.start();
        assert_eq!(flags(&h.session), (true, false));
        h.session.pause();
        assert_eq!(flags(&h.session), (false, true));
        h.session.start();
        assert_eq!(flags(&h.session), (true, false));
        h.session.stop();
        assert_eq!(flags(&h.session), (false, false));
        h.session.pause();
        assert_eq!(flags(&h.session), (false, false), "pause when stopped is a no-op");
        h.session.stop();
        assert_eq!(flags(&h.session), (false, false));
    }

    #[test]
    fn test_pause_freezes_time_and_stop_clears_it() {
        let h = harness();
        h.session.set_duration(2.0);
        h.session.start();
        let left = h.session.get_state().time_left_seconds;
        assert!((7195..=7200).contains(&left), "left {left}");

        h.session.pause();
        let paused_left = h.session.get_state().time_left_seconds;
        assert!(paused_left > 0);
        std::thread::sleep(Duration::from_millis(450));
        assert_eq!(h.session.get_state().time_left_seconds, paused_left);

        h.session.stop();
        assert_eq!(h.session.get_state().time_left_seconds, 0);
    }

    #[test]
    fn test_pause_stops_oscillators_and_start_rebuilds() {
        let h = harness();
        h.session.start();
        h.session.pause();

        let commands = sent(&h);
        assert!(commands.contains(&EngineCommand::StopTone { fast: true }));
        assert!(commands.contains(&EngineCommand::PauseAmbient));

        h.session.start();
        let start_tones = sent(&h)
            .iter()
            .filter(|c| matches!(c, EngineCommand::StartTone { .. }))
            .count();
        assert_eq!(start_tones, 2, "a stopped pair is never resumed, always rebuilt");
    }

    #[test]
    fn test_apply_preset_is_idempotent_for_ambient() {
        let h = harness();
        h.session.set_ambient_volume(AmbientChannelId::Rain, 0.3);
        h.session.set_ambient_volume(AmbientChannelId::Brown, 0.6);
        let before = h.session.get_state().ambient;

        h.session.apply_preset(Preset::Calma);
        let mid = h.session.get_state();
        assert_eq!(mid.active_mode, Preset::Calma);
        assert_eq!(mid.binaural_volume, 0.16);
        assert_eq!(mid.neural_volume, 0.80);
        assert_eq!(mid.ambient, before);

        h.session.apply_preset(Preset::Calma);
        let after = h.session.get_state();
        assert_eq!(after.active_mode, Preset::Calma);
        assert_eq!(after.binaural_volume, 0.16);
        assert_eq!(after.ambient, before);
    }

    #[test]
    fn test_apply_preset_while_playing_retunes_in_place() {
        let h = harness();
        h.session.start();
        h.commands.lock().unwrap().clear();

        h.session.apply_preset(Preset::Quiete);
        let commands = sent(&h);
        assert!(commands.contains(&EngineCommand::RetuneTone {
            beat_hz: 6.0,
            carrier_hz: 190.0,
        }));
        assert!(commands.contains(&EngineCommand::SetToneGain(0.14)));
        // No ambient restart, no timer restart.
        assert!(!commands.iter().any(|c| matches!(
            c,
            EngineCommand::ResumeAmbient | EngineCommand::RewindAmbient
        )));
        assert!(h.session.get_state().is_playing);
    }

    #[test]
    fn test_unknown_preset_name_is_silently_ignored() {
        let h = harness();
        let before = h.session.get_state();
        h.session.apply_preset_named("TURBO_FOCUS");
        assert_eq!(h.session.get_state(), before);

        h.session.apply_preset_named("quiete");
        assert_eq!(h.session.get_state().active_mode, Preset::Quiete);
    }

    #[test]
    fn test_volume_setters_clamp_to_unit_range() {
        let h = harness();
        h.session.set_master_volume(1.7);
        h.session.set_neural_volume(-0.4);
        h.session.set_binaural_volume(2.0);
        h.session.set_ambient_volume(AmbientChannelId::Ocean, 9.0);

        let state = h.session.get_state();
        assert_eq!(state.master_volume, 1.0);
        assert_eq!(state.neural_volume, 0.0);
        assert_eq!(state.binaural_volume, 1.0);
        assert_eq!(state.ambient.ocean, 1.0);
    }

    #[test]
    fn test_ambient_gain_is_product_of_channel_and_master() {
        let h = harness();
        h.session.unlock_audio();
        h.session.set_master_volume(0.5);
        h.session.set_ambient_volume(AmbientChannelId::Rain, 0.3);

        let commands = sent(&h);
        assert!(commands.contains(&EngineCommand::SetAmbientGain {
            channel: AmbientChannelId::Rain,
            gain: 0.15,
        }));

        // Changing the master rescales every channel.
        h.commands.lock().unwrap().clear();
        h.session.set_master_volume(1.0);
        let commands = sent(&h);
        assert!(commands.contains(&EngineCommand::SetAmbientGain {
            channel: AmbientChannelId::Rain,
            gain: 0.3,
        }));
    }

    #[test]
    fn test_rain_to_zero_sends_zero_gain() {
        let h = harness();
        h.session.start();
        h.session.set_ambient_volume(AmbientChannelId::Rain, 0.3);
        h.session.set_ambient_volume(AmbientChannelId::Rain, 0.0);

        let commands = sent(&h);
        let rain_gains: Vec<f32> = commands
            .iter()
            .filter_map(|c| match c {
                EngineCommand::SetAmbientGain {
                    channel: AmbientChannelId::Rain,
                    gain,
                } => Some(*gain),
                _ => None,
            })
            .collect();
        // Start applies the stored 0.0, then 0.24 (0.3 * master 0.8), then 0.
        assert_eq!(rain_gains.last(), Some(&0.0));
        assert!(rain_gains.contains(&(0.3 * 0.8)));
        assert_eq!(h.session.get_state().ambient.rain, 0.0);
    }

    #[test]
    fn test_reset_ambient_zeroes_every_channel() {
        let h = harness();
        for channel in AmbientChannelId::ALL {
            h.session.set_ambient_volume(channel, 0.5);
        }
        h.session.reset_ambient();
        let state = h.session.get_state();
        assert_eq!(state.ambient, crate::state::AmbientLevels::default());
    }

    #[test]
    fn test_set_duration_validates_and_defers() {
        let h = harness();
        h.session.set_duration(0.0);
        h.session.set_duration(-2.0);
        h.session.set_duration(f64::NAN);
        assert_eq!(h.session.get_state().duration_hours, 1.0);

        h.session.set_duration(2.0);
        assert_eq!(h.session.get_state().duration_hours, 2.0);

        h.session.start();
        let left = h.session.get_state().time_left_seconds;
        assert!((7195..=7200).contains(&left), "left {left}");
        // A change mid-session does not move the running deadline.
        h.session.set_duration(0.5);
        let left = h.session.get_state().time_left_seconds;
        assert!((7195..=7200).contains(&left), "left {left}");
    }

    #[test]
    fn test_state_round_trips_through_store() {
        let dir = tempdir().expect("tempdir");
        {
            let h = harness_in(dir.path());
            h.session.apply_preset(Preset::Blocco);
            h.session.set_master_volume(0.6);
            h.session.set_ambient_volume(AmbientChannelId::Ocean, 0.45);
            h.session.set_duration(3.0);
            h.session.start();
            // Stop flushes the record synchronously.
            h.session.stop();
        }

        let factory: BackendFactory = Box::new(|| Err(anyhow::anyhow!("unused")));
        let session = AudioSession::with_backend_factory(dir.path(), factory).expect("session");
        let state = session.get_state();
        assert!(!state.is_playing, "sessions never auto-resume across a reload");
        assert!(!state.is_paused);
        assert_eq!(state.active_mode, Preset::Blocco);
        assert_eq!(state.master_volume, 0.6);
        assert_eq!(state.ambient.ocean, 0.45);
        assert_eq!(state.duration_hours, 3.0);
        assert_eq!(state.time_left_seconds, 0);
    }

    #[test]
    fn test_countdown_expiry_stops_exactly_once() {
        let h = harness();
        // 1/120 hour = 30 seconds.
        h.session.set_duration(1.0 / 120.0);
        assert!(h.session.start());
        let left = h.session.get_state().time_left_seconds;
        assert!((29..=30).contains(&left), "left {left}");

        let now = Instant::now();
        // Simulated clock: one tick past the deadline expires and stops.
        assert!(!h.session.tick(now + Duration::from_secs(31)));
        let state = h.session.get_state();
        assert!(!state.is_playing);
        assert!(!state.is_paused);
        assert_eq!(state.time_left_seconds, 0);

        // The timer is idle now; nothing fires again.
        assert!(!h.session.tick(now + Duration::from_secs(32)));
        let suspends_after = sent(&h)
            .iter()
            .filter(|c| matches!(c, EngineCommand::RewindAmbient))
            .count();
        assert_eq!(suspends_after, 1, "stop ran once");
    }

    #[test]
    fn test_countdown_ticks_down_on_wall_clock() {
        let h = harness();
        h.session.set_duration(1.0 / 120.0);
        h.session.start();

        let now = Instant::now();
        assert!(h.session.tick(now + Duration::from_secs(4)));
        let left = h.session.get_state().time_left_seconds;
        assert!((25..=29).contains(&left), "left {left}");
    }

    #[test]
    fn test_subscribers_receive_snapshots_and_panics_are_isolated() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::<SessionState>::new()));

        let _panicky = h.session.subscribe(|_s| panic!("listener bug"));
        let seen_clone = seen.clone();
        let _sub = h.session.subscribe(move |s| {
            seen_clone.lock().unwrap().push(s.clone());
        });

        h.session.set_master_volume(0.33);
        let snapshots = seen.lock().unwrap();
        assert!(!snapshots.is_empty(), "well-behaved listener still ran");
        assert_eq!(snapshots.last().unwrap().master_volume, 0.33);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let h = harness();
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let sub = h.session.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        h.session.set_master_volume(0.5);
        let after_first = count.load(Ordering::SeqCst);
        assert!(after_first > 0);

        sub.unsubscribe();
        h.session.set_master_volume(0.7);
        assert_eq!(count.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_resume_all_is_noop_before_unlock() {
        let h = harness();
        h.session.resume_all();
        assert!(sent(&h).is_empty());
        assert_eq!(h.resumes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resume_all_restarts_ambient_while_playing() {
        let h = harness();
        h.session.start();
        h.commands.lock().unwrap().clear();

        h.session.resume_all();
        assert!(sent(&h).contains(&EngineCommand::ResumeAmbient));
    }

    #[test]
    fn test_media_intents_forward_to_commands() {
        let h = harness();
        h.session.handle_media_intent(MediaIntent::Play);
        assert!(h.session.get_state().is_playing);

        h.session.handle_media_intent(MediaIntent::Pause);
        let state = h.session.get_state();
        assert!(!state.is_playing && state.is_paused);

        h.session.handle_media_intent(MediaIntent::Stop);
        let state = h.session.get_state();
        assert!(!state.is_playing && !state.is_paused);
    }

    #[test]
    fn test_hidden_keeps_audio_and_deadline() {
        let h = harness();
        h.session.set_duration(1.0 / 120.0);
        h.session.start();
        let before = sent(&h).len();

        h.session.on_hidden();
        // No suspend, no pause commands: audio keeps sounding.
        assert_eq!(sent(&h).len(), before);
        assert!(h.session.get_state().is_playing);

        // The deadline stands: a later tick still counts down in wall time.
        let now = Instant::now();
        assert!(h.session.tick(now + Duration::from_secs(10)));
        let left = h.session.get_state().time_left_seconds;
        assert!((19..=23).contains(&left), "left {left}");
    }

    #[test]
    fn test_render_to_file_writes_wav(){
        let h = harness();
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("mix.wav");
        h.session
            .render_to_file(&path, 0.25)
            .expect("render");
        assert!(path.exists());
    }
}
