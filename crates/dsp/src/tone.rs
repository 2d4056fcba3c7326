use std::f32::consts::TAU;

use crate::smooth::SmoothedGain;

/// Fade applied to a pair being replaced or fast-stopped.
pub const FAST_FADE_SECS: f32 = 0.2;
/// The replaced pair is discarded slightly after its fade so the ramp is
/// truncated inaudibly rather than clipped.
pub const FAST_STOP_DELAY_SECS: f32 = 0.25;
/// Slow fade used by a non-fast stop.
pub const SLOW_FADE_SECS: f32 = 2.5;
pub const SLOW_STOP_DELAY_SECS: f32 = 2.6;
/// A freshly built pair ramps from silence to its target over this long.
pub const START_RAMP_SECS: f32 = 2.5;
/// Volume changes on a live pair ramp over this long.
pub const VOLUME_RAMP_SECS: f32 = 0.4;

/// Phase-accumulator sine oscillator.
#[derive(Debug, Clone, Copy)]
struct Oscillator {
    phase: f32,
    phase_inc: f32,
}

impl Oscillator {
    fn new(freq_hz: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            phase_inc: freq_hz / sample_rate as f32,
        }
    }

    #[inline]
    fn next(&mut self) -> f32 {
        let s = (self.phase * TAU).sin();
        self.phase += self.phase_inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        s
    }
}

/// A left/right oscillator pair sharing one gain stage. Left runs at the
/// carrier, right at carrier + beat; panning is hard left/right.
#[derive(Debug, Clone, Copy)]
struct TonePair {
    left: Oscillator,
    right: Oscillator,
    gain: SmoothedGain,
}

impl TonePair {
    #[inline]
    fn next_frame(&mut self) -> (f32, f32) {
        let g = self.gain.next();
        (self.left.next() * g, self.right.next() * g)
    }
}

/// A pair that has been stopped: it keeps rendering its fade until the
/// discard deadline on the render sample clock, then is dropped. Once here
/// it can never be restarted - start and retune always build fresh pairs.
#[derive(Debug, Clone, Copy)]
struct FadingPair {
    pair: TonePair,
    discard_at: u64,
}

/// Owner of the binaural oscillators.
///
/// All scheduling runs on the monotonic render sample clock, so repeated
/// stop/fade calls reschedule instead of conflicting, and stopping with no
/// live pair is an idempotent no-op.
#[derive(Debug)]
pub struct ToneGraph {
    sample_rate: u32,
    clock: u64,
    live: Option<TonePair>,
    fading: Vec<FadingPair>,
    target_volume: f32,
}

impl ToneGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            live: None,
            fading: Vec::new(),
            target_volume: 0.0,
        }
    }

    /// Tear down any live pair with the fast fade and bring up a fresh one
    /// at the given frequencies, ramping from silence to `volume`.
    pub fn start(&mut self, beat_hz: f32, carrier_hz: f32, volume: f32) {
        self.retire_live(FAST_FADE_SECS, FAST_STOP_DELAY_SECS);

        let mut gain = SmoothedGain::new(0.0);
        gain.ramp_to(volume, START_RAMP_SECS, self.sample_rate);
        self.live = Some(TonePair {
            left: Oscillator::new(carrier_hz, self.sample_rate),
            right: Oscillator::new(carrier_hz + beat_hz, self.sample_rate),
            gain,
        });
        self.target_volume = volume;
    }

    /// Rebuild the pair at new frequencies, keeping the current target
    /// volume. Oscillators are never re-pitched in place.
    pub fn retune(&mut self, beat_hz: f32, carrier_hz: f32) {
        self.start(beat_hz, carrier_hz, self.target_volume);
    }

    /// Ramp the live pair to a new volume. No-op when nothing is live.
    pub fn set_volume(&mut self, volume: f32) {
        if let Some(pair) = self.live.as_mut() {
            pair.gain.ramp_to(volume, VOLUME_RAMP_SECS, self.sample_rate);
            self.target_volume = volume;
        }
    }

    /// Fade the live pair out and schedule its discard. Safe to call with
    /// nothing live, and safe to call repeatedly.
    pub fn stop(&mut self, fast: bool) {
        let (fade, delay) = if fast {
            (FAST_FADE_SECS, FAST_STOP_DELAY_SECS)
        } else {
            (SLOW_FADE_SECS, SLOW_STOP_DELAY_SECS)
        };
        self.retire_live(fade, delay);
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn target_volume(&self) -> f32 {
        self.target_volume
    }

    fn retire_live(&mut self, fade_secs: f32, delay_secs: f32) {
        if let Some(mut pair) = self.live.take() {
            pair.gain.ramp_to(0.0, fade_secs, self.sample_rate);
            self.fading.push(FadingPair {
                pair,
                discard_at: self.clock + (delay_secs * self.sample_rate as f32) as u64,
            });
        }
    }

    /// Render one frame and advance the sample clock.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        let mut l = 0.0;
        let mut r = 0.0;
        if let Some(pair) = self.live.as_mut() {
            let (pl, pr) = pair.next_frame();
            l += pl;
            r += pr;
        }
        for f in self.fading.iter_mut() {
            let (pl, pr) = f.pair.next_frame();
            l += pl;
            r += pr;
        }
        self.clock += 1;
        let clock = self.clock;
        self.fading.retain(|f| f.discard_at > clock);
        (l, r)
    }
}
