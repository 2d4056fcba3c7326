/// Stereo-linked peak limiter on the summed output bus.
///
/// An envelope follower tracks the frame peak with a fast attack and slow
/// release; whenever the envelope exceeds the threshold, both channels are
/// scaled by `threshold / envelope`. A final hard clamp guarantees the
/// output never leaves full scale regardless of how hot the mix runs.
#[derive(Debug, Clone, Copy)]
pub struct Limiter {
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

/// -1 dBFS ceiling.
const DEFAULT_THRESHOLD: f32 = 0.89;
const ATTACK_SECS: f32 = 0.003;
const RELEASE_SECS: f32 = 0.25;

impl Limiter {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_threshold(sample_rate, DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(sample_rate: u32, threshold: f32) -> Self {
        let coeff = |secs: f32| (-1.0 / (secs * sample_rate as f32)).exp();
        Self {
            threshold,
            attack_coeff: coeff(ATTACK_SECS),
            release_coeff: coeff(RELEASE_SECS),
            envelope: 0.0,
        }
    }

    /// Process one stereo frame in place.
    #[inline]
    pub fn process(&mut self, left: &mut f32, right: &mut f32) {
        let peak = left.abs().max(right.abs());
        let coeff = if peak > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = peak + coeff * (self.envelope - peak);

        if self.envelope > self.threshold {
            let gain = self.threshold / self.envelope;
            *left *= gain;
            *right *= gain;
        }
        *left = left.clamp(-1.0, 1.0);
        *right = right.clamp(-1.0, 1.0);
    }
}
