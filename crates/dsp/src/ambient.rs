use biquad::{Biquad, Coefficients, DirectForm2Transposed, Q_BUTTERWORTH_F32, ToHertz, Type};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Rain shaping: highpass cutoff over the pink bed.
pub const RAIN_HIGHPASS_HZ: f32 = 1500.0;
/// Ocean shaping: lowpass center cutoff and its LFO.
pub const OCEAN_LOWPASS_HZ: f32 = 400.0;
pub const OCEAN_LFO_HZ: f32 = 0.06;
pub const OCEAN_LFO_DEPTH_HZ: f32 = 180.0;
/// Recompute the swept ocean coefficients every this many frames; a 0.06 Hz
/// sweep moves far too slowly to need per-sample updates.
const OCEAN_LFO_UPDATE_FRAMES: u32 = 64;

/// Droplet pulse timing, from onset: linear attack to the pulse amplitude
/// over 10 ms, hold, then a 30 ms decay beginning 50 ms after onset.
const DROPLET_ATTACK_SECS: f32 = 0.01;
const DROPLET_DECAY_START_SECS: f32 = 0.05;
const DROPLET_DECAY_SECS: f32 = 0.03;
/// Pulse amplitude is uniform in [0, this); the gap to the next droplet is
/// uniform in [200, 500) ms.
const DROPLET_MAX_AMP: f32 = 0.08;
const DROPLET_MIN_GAP_SECS: f32 = 0.2;
const DROPLET_MAX_GAP_SECS: f32 = 0.5;

/// The four ambient channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmbientChannelId {
    Brown,
    Pink,
    Rain,
    Ocean,
}

impl AmbientChannelId {
    pub const ALL: [AmbientChannelId; 4] = [
        AmbientChannelId::Brown,
        AmbientChannelId::Pink,
        AmbientChannelId::Rain,
        AmbientChannelId::Ocean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AmbientChannelId::Brown => "brown",
            AmbientChannelId::Pink => "pink",
            AmbientChannelId::Rain => "rain",
            AmbientChannelId::Ocean => "ocean",
        }
    }
}

/// One channel's loop source: mono samples at the output rate, flagged when
/// they came from a decoded asset rather than the synthesizer.
#[derive(Debug, Clone)]
pub struct ChannelSource {
    pub samples: Vec<f32>,
    pub file_backed: bool,
}

impl ChannelSource {
    pub fn synthesized(samples: Vec<f32>) -> Self {
        Self {
            samples,
            file_backed: false,
        }
    }

    pub fn decoded(samples: Vec<f32>) -> Self {
        Self {
            samples,
            file_backed: true,
        }
    }
}

/// The prepared loop buffers for all four channels.
#[derive(Debug, Clone)]
pub struct AmbientBuffers {
    pub brown: ChannelSource,
    pub pink: ChannelSource,
    pub rain: ChannelSource,
    pub ocean: ChannelSource,
}

/// Stochastic droplet amplitude modulator: an irregular gain pulse layered
/// on top of the steady rain gain so the texture never flattens out.
#[derive(Debug)]
struct Droplets {
    rng: StdRng,
    sample_rate: f32,
    /// Frames until the next pulse onset.
    gap_left: u32,
    /// Frames since onset of the active pulse, if any.
    pulse_age: Option<u32>,
    pulse_amp: f32,
}

impl Droplets {
    fn new(sample_rate: u32, seed: u64) -> Self {
        let mut d = Self {
            rng: StdRng::seed_from_u64(seed),
            sample_rate: sample_rate as f32,
            gap_left: 0,
            pulse_age: None,
            pulse_amp: 0.0,
        };
        d.gap_left = d.next_gap();
        d
    }

    fn next_gap(&mut self) -> u32 {
        let secs = self
            .rng
            .random_range(DROPLET_MIN_GAP_SECS..DROPLET_MAX_GAP_SECS);
        (secs * self.sample_rate) as u32
    }

    /// Advance one frame and return the extra gain to add this frame.
    /// The gap runs onset-to-onset; it is always longer than a pulse.
    #[inline]
    fn next(&mut self) -> f32 {
        if self.gap_left == 0 {
            self.pulse_age = Some(0);
            self.pulse_amp = self.rng.random::<f32>() * DROPLET_MAX_AMP;
            self.gap_left = self.next_gap();
        } else {
            self.gap_left -= 1;
        }

        let Some(age) = self.pulse_age else {
            return 0.0;
        };
        let t = age as f32 / self.sample_rate;
        let env = if t < DROPLET_ATTACK_SECS {
            t / DROPLET_ATTACK_SECS
        } else if t < DROPLET_DECAY_START_SECS {
            1.0
        } else if t < DROPLET_DECAY_START_SECS + DROPLET_DECAY_SECS {
            1.0 - (t - DROPLET_DECAY_START_SECS) / DROPLET_DECAY_SECS
        } else {
            self.pulse_age = None;
            return 0.0;
        };
        self.pulse_age = Some(age + 1);
        self.pulse_amp * env
    }
}

/// Spectral shaping applied on top of a synthesized pink bed.
enum Shaping {
    None,
    /// Rain: fixed highpass.
    Highpass(DirectForm2Transposed<f32>),
    /// Ocean: lowpass whose cutoff breathes with a slow sine LFO.
    SweptLowpass {
        filter: DirectForm2Transposed<f32>,
        lfo_frame: u64,
    },
}

struct AmbientChannel {
    samples: Vec<f32>,
    file_backed: bool,
    pos: usize,
    gain: f32,
    playing: bool,
    shaping: Shaping,
    droplets: Option<Droplets>,
}

fn lowpass_coeffs(sample_rate: u32, cutoff_hz: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(
        Type::LowPass,
        (sample_rate as f32).hz(),
        cutoff_hz.hz(),
        Q_BUTTERWORTH_F32,
    )
    .expect("cutoff below Nyquist")
}

fn highpass_coeffs(sample_rate: u32, cutoff_hz: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(
        Type::HighPass,
        (sample_rate as f32).hz(),
        cutoff_hz.hz(),
        Q_BUTTERWORTH_F32,
    )
    .expect("cutoff below Nyquist")
}

/// Owner of the four looping ambient sources, summed into the ambient bus.
///
/// Channels are constructed once per stream lifetime and never recreated
/// for a volume change. Gains arrive pre-multiplied by the master factor;
/// a gain of zero pauses the source in place. A channel renders only while
/// the transport is running (`resume_nonzero`) - a gain written while
/// paused or stopped takes effect on the next resume.
pub struct AmbientMixer {
    sample_rate: u32,
    running: bool,
    channels: [AmbientChannel; 4],
}

impl AmbientMixer {
    pub fn new(sample_rate: u32, buffers: AmbientBuffers, droplet_seed: u64) -> Self {
        let make = |id: AmbientChannelId, src: ChannelSource| {
            let shaping = if src.file_backed {
                Shaping::None
            } else {
                match id {
                    AmbientChannelId::Rain => Shaping::Highpass(DirectForm2Transposed::<f32>::new(
                        highpass_coeffs(sample_rate, RAIN_HIGHPASS_HZ),
                    )),
                    AmbientChannelId::Ocean => Shaping::SweptLowpass {
                        filter: DirectForm2Transposed::<f32>::new(lowpass_coeffs(
                            sample_rate,
                            OCEAN_LOWPASS_HZ,
                        )),
                        lfo_frame: 0,
                    },
                    _ => Shaping::None,
                }
            };
            let droplets = match id {
                AmbientChannelId::Rain if !src.file_backed => {
                    Some(Droplets::new(sample_rate, droplet_seed))
                }
                _ => None,
            };
            AmbientChannel {
                samples: src.samples,
                file_backed: src.file_backed,
                pos: 0,
                gain: 0.0,
                playing: false,
                shaping,
                droplets,
            }
        };

        Self {
            sample_rate,
            running: false,
            channels: [
                make(AmbientChannelId::Brown, buffers.brown),
                make(AmbientChannelId::Pink, buffers.pink),
                make(AmbientChannelId::Rain, buffers.rain),
                make(AmbientChannelId::Ocean, buffers.ocean),
            ],
        }
    }

    fn index(id: AmbientChannelId) -> usize {
        match id {
            AmbientChannelId::Brown => 0,
            AmbientChannelId::Pink => 1,
            AmbientChannelId::Rain => 2,
            AmbientChannelId::Ocean => 3,
        }
    }

    fn channel_mut(&mut self, id: AmbientChannelId) -> &mut AmbientChannel {
        &mut self.channels[Self::index(id)]
    }

    /// Write one channel's effective gain. Zero pauses the source (position
    /// kept); non-zero marks it playing, provided the transport is running.
    pub fn set_gain(&mut self, id: AmbientChannelId, gain: f32) {
        let running = self.running;
        let ch = self.channel_mut(id);
        ch.gain = gain;
        ch.playing = gain > 0.0 && running;
    }

    pub fn gain(&self, id: AmbientChannelId) -> f32 {
        self.channels[Self::index(id)].gain
    }

    pub fn is_playing(&self, id: AmbientChannelId) -> bool {
        self.channels[Self::index(id)].playing
    }

    pub fn is_file_backed(&self, id: AmbientChannelId) -> bool {
        self.channels[Self::index(id)].file_backed
    }

    /// Stop the transport: pause every source, keeping loop positions.
    pub fn pause_all(&mut self) {
        self.running = false;
        for ch in self.channels.iter_mut() {
            ch.playing = false;
        }
    }

    /// Run the transport: resume every source with a non-zero gain.
    pub fn resume_nonzero(&mut self) {
        self.running = true;
        for ch in self.channels.iter_mut() {
            ch.playing = ch.gain > 0.0;
        }
    }

    /// Stop the transport, rewinding loop positions to the start.
    pub fn rewind_all(&mut self) {
        self.running = false;
        for ch in self.channels.iter_mut() {
            ch.playing = false;
            ch.pos = 0;
        }
    }

    /// Render one frame of the ambient bus. Mono sources feed both sides
    /// equally.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        let mut sum = 0.0;
        for ch in self.channels.iter_mut() {
            if !ch.playing || ch.samples.is_empty() {
                continue;
            }
            let mut s = ch.samples[ch.pos];
            ch.pos += 1;
            if ch.pos >= ch.samples.len() {
                ch.pos = 0;
            }

            match &mut ch.shaping {
                Shaping::None => {}
                Shaping::Highpass(filter) => s = filter.run(s),
                Shaping::SweptLowpass { filter, lfo_frame } => {
                    if *lfo_frame % OCEAN_LFO_UPDATE_FRAMES as u64 == 0 {
                        let t = *lfo_frame as f32 / self.sample_rate as f32;
                        let cutoff = OCEAN_LOWPASS_HZ
                            + OCEAN_LFO_DEPTH_HZ
                                * (std::f32::consts::TAU * OCEAN_LFO_HZ * t).sin();
                        filter.update_coefficients(lowpass_coeffs(self.sample_rate, cutoff));
                    }
                    *lfo_frame += 1;
                    s = filter.run(s);
                }
            }

            let droplet = ch.droplets.as_mut().map(|d| d.next()).unwrap_or(0.0);
            sum += s * (ch.gain + droplet);
        }
        (sum, sum)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
