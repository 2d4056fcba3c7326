/// Ramp durations shorter than this collapse into an effectively instant
/// step; the floor keeps every transition long enough to stay click-free.
pub const MIN_TIME_CONSTANT_SECS: f32 = 0.03;

/// One-pole exponential-approach gain.
///
/// Each sample moves the current value a fixed fraction of the way toward
/// the target, so the gain approaches exponentially with the configured
/// time constant and never steps. Retargeting mid-ramp simply redirects the
/// approach; there is no schedule to cancel.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    coeff: f32,
}

impl SmoothedGain {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            coeff: 1.0,
        }
    }

    /// Ramp toward `target` over roughly `seconds`. The underlying time
    /// constant is `seconds / 5` (the approach reaches ~99.3% of the way in
    /// five time constants), floored at [`MIN_TIME_CONSTANT_SECS`].
    pub fn ramp_to(&mut self, target: f32, seconds: f32, sample_rate: u32) {
        let tau = (seconds / 5.0).max(MIN_TIME_CONSTANT_SECS);
        self.coeff = 1.0 - (-1.0 / (tau * sample_rate as f32)).exp();
        self.target = target;
    }

    /// Jump to `value` with no ramp.
    pub fn snap(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advance one sample and return the new gain.
    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current += (self.target - self.current) * self.coeff;
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}
