use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;

use lull_dsp::{
    AmbientBuffers, AmbientChannelId, ChannelSource, EngineCommand, MixGraph, brown_loop,
    pink_loop,
};

/// Everything needed to reproduce a session mix offline.
#[derive(Debug, Clone, Copy)]
pub struct MixSettings {
    pub beat_hz: f32,
    pub carrier_hz: f32,
    pub binaural_volume: f32,
    pub neural_volume: f32,
    /// Effective per-channel gains (already scaled by the master factor).
    pub brown: f32,
    pub pink: f32,
    pub rain: f32,
    pub ocean: f32,
}

/// Render `seconds` of the mix to interleaved stereo, deterministically for
/// a given seed. The same graph the realtime engine runs, driven without a
/// device - the tone ramps in from silence exactly as live playback does.
pub fn render_mix(settings: &MixSettings, seconds: f32, sample_rate: u32, seed: u64) -> Vec<f32> {
    let buffers = synth_buffers(sample_rate, seed);
    let mut graph = MixGraph::new(sample_rate, buffers, seed);

    graph.apply(EngineCommand::SetNeuralGain(settings.neural_volume));
    graph.apply(EngineCommand::StartTone {
        beat_hz: settings.beat_hz,
        carrier_hz: settings.carrier_hz,
        gain: settings.binaural_volume,
    });
    for (channel, gain) in [
        (AmbientChannelId::Brown, settings.brown),
        (AmbientChannelId::Pink, settings.pink),
        (AmbientChannelId::Rain, settings.rain),
        (AmbientChannelId::Ocean, settings.ocean),
    ] {
        graph.apply(EngineCommand::SetAmbientGain { channel, gain });
    }
    graph.apply(EngineCommand::ResumeAmbient);

    let frames = (seconds * sample_rate as f32) as usize;
    let mut samples = Vec::with_capacity(frames * 2);
    for _ in 0..frames {
        let (l, r) = graph.next_frame();
        samples.push(l);
        samples.push(r);
    }
    samples
}

fn synth_buffers(sample_rate: u32, seed: u64) -> AmbientBuffers {
    let loop_for = |offset: u64, brown: bool| {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(offset));
        if brown {
            ChannelSource::synthesized(brown_loop(sample_rate, &mut rng))
        } else {
            ChannelSource::synthesized(pink_loop(sample_rate, &mut rng))
        }
    };
    AmbientBuffers {
        brown: loop_for(0, true),
        pink: loop_for(1, false),
        rain: loop_for(2, false),
        ocean: loop_for(3, false),
    }
}

/// Write interleaved stereo samples as 32-bit float WAV.
pub fn write_wav(samples: &[f32], sample_rate: u32, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in samples {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}
