use std::fs::File;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// The fixed directory the four ambient assets live under.
const ASSETS_ROOT: &str = "assets/ambient";

/// Interleaved decoded audio.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Resolve an ambient channel name (`brown`, `pink`, `rain`, `ocean`) to
/// its fixed asset path, if the asset exists. `base` is the directory the
/// assets root sits under - the working directory for a running app, a
/// tempdir in tests.
pub fn resolve_asset_path(base: &Path, channel: &str) -> Option<PathBuf> {
    let path = base.join(ASSETS_ROOT).join(format!("{channel}.wav"));
    if path.exists() { Some(path) } else { None }
}

pub fn decode_file(path: &Path) -> anyhow::Result<DecodedAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Resample to a target rate with sinc interpolation. Already-matching
/// audio is returned as-is.
pub fn resample(audio: &DecodedAudio, target_sample_rate: u32) -> anyhow::Result<DecodedAudio> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }

    let channels = audio.channels as usize;
    let input_frames = audio.samples.len() / channels;

    let resample_ratio = target_sample_rate as f64 / audio.sample_rate as f64;

    let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
    for frame_idx in 0..input_frames {
        for ch in 0..channels {
            input_channels[ch].push(audio.samples[frame_idx * channels + ch]);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;

    let output_channels = resampler.process(&input_channels, None)?;

    let output_frames = output_channels[0].len();
    let mut output_samples = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for ch in 0..channels {
            output_samples.push(output_channels[ch][frame_idx]);
        }
    }

    Ok(DecodedAudio {
        samples: output_samples,
        sample_rate: target_sample_rate,
        channels: audio.channels,
    })
}

/// Mix interleaved audio down to one channel by averaging.
pub fn downmix_mono(audio: &DecodedAudio) -> Vec<f32> {
    let channels = audio.channels.max(1) as usize;
    audio
        .samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Load one ambient asset as a mono loop at the output rate: decode,
/// resample, downmix. Any failure bubbles up for the caller to log and
/// fall back on.
pub fn load_loop_mono(path: &Path, target_sample_rate: u32) -> anyhow::Result<Vec<f32>> {
    let decoded = decode_file(path)?;
    if decoded.samples.is_empty() {
        anyhow::bail!("decoded no samples from {}", path.display());
    }
    let resampled = resample(&decoded, target_sample_rate)?;
    Ok(downmix_mono(&resampled))
}
