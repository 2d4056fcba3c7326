use crate::ambient::{AmbientBuffers, AmbientMixer};
use crate::limiter::Limiter;
use crate::tone::ToneGraph;
use crate::{EngineCommand, clamp_volume};

/// The full mixing topology: the binaural pair through the neural gain,
/// the ambient bus beside it, both into the shared limiter.
///
/// This is the object the realtime callback owns; the offline renderer
/// drives an identical instance. Commands mutate it, `next_frame` pulls
/// audio out of it.
pub struct MixGraph {
    tone: ToneGraph,
    ambient: AmbientMixer,
    neural_gain: f32,
    limiter: Limiter,
}

impl MixGraph {
    pub fn new(sample_rate: u32, buffers: AmbientBuffers, droplet_seed: u64) -> Self {
        Self {
            tone: ToneGraph::new(sample_rate),
            ambient: AmbientMixer::new(sample_rate, buffers, droplet_seed),
            neural_gain: 1.0,
            limiter: Limiter::new(sample_rate),
        }
    }

    /// Apply one command. Gains are clamped again here so nothing out of
    /// range can reach a gain stage regardless of the caller.
    pub fn apply(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::StartTone {
                beat_hz,
                carrier_hz,
                gain,
            } => self.tone.start(beat_hz, carrier_hz, clamp_volume(gain)),
            EngineCommand::RetuneTone {
                beat_hz,
                carrier_hz,
            } => self.tone.retune(beat_hz, carrier_hz),
            EngineCommand::SetToneGain(gain) => self.tone.set_volume(clamp_volume(gain)),
            EngineCommand::StopTone { fast } => self.tone.stop(fast),
            EngineCommand::SetNeuralGain(gain) => self.neural_gain = clamp_volume(gain),
            EngineCommand::SetAmbientGain { channel, gain } => {
                self.ambient.set_gain(channel, clamp_volume(gain))
            }
            EngineCommand::PauseAmbient => self.ambient.pause_all(),
            EngineCommand::ResumeAmbient => self.ambient.resume_nonzero(),
            EngineCommand::RewindAmbient => self.ambient.rewind_all(),
        }
    }

    /// Render one limited stereo frame.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        let (tl, tr) = self.tone.next_frame();
        let (al, ar) = self.ambient.next_frame();
        let mut l = tl * self.neural_gain + al;
        let mut r = tr * self.neural_gain + ar;
        self.limiter.process(&mut l, &mut r);
        (l, r)
    }

    pub fn tone(&self) -> &ToneGraph {
        &self.tone
    }

    pub fn ambient(&self) -> &AmbientMixer {
        &self.ambient
    }
}
