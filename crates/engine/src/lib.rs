use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Sender, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use lull_dsp::{
    AmbientBuffers, AmbientChannelId, AudioBackend, ChannelSource, EngineCommand, EngineStatus,
    MixGraph,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory the fixed ambient asset paths are resolved under. `None`
    /// skips asset lookup and synthesizes every channel.
    pub assets_base: Option<PathBuf>,
    /// Seed for the synthesized noise loops and the rain droplet scheduler.
    pub noise_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets_base: Some(PathBuf::from(".")),
            noise_seed: 0x5EED,
        }
    }
}

enum StreamControl {
    Resume(Sender<Result<(), String>>),
    Suspend(Sender<Result<(), String>>),
    Shutdown,
}

/// Handle to the realtime engine.
///
/// The cpal stream is not `Send`, so it lives on a dedicated control
/// thread; this handle talks to it over channels and to the callback over
/// lock-free rings. The stream is built suspended - nothing sounds until
/// `resume()`.
pub struct Engine {
    commands: rtrb::Producer<EngineCommand>,
    status: rtrb::Consumer<EngineStatus>,
    sample_rate: u32,
    control: Sender<StreamControl>,
    thread: Option<JoinHandle<()>>,
}

/// Build the output stream and its graph, returning a handle once audio is
/// ready. Fails when no output device exists or the platform refuses the
/// stream - the caller surfaces that as an unlock failure.
pub fn start(config: EngineConfig) -> anyhow::Result<Engine> {
    let (command_tx, command_rx) = rtrb::RingBuffer::<EngineCommand>::new(64);
    let (status_tx, status_rx) = rtrb::RingBuffer::<EngineStatus>::new(64);
    let (control_tx, control_rx) = crossbeam_channel::unbounded::<StreamControl>();
    let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);

    let thread = std::thread::Builder::new()
        .name("lull-audio".into())
        .spawn(move || {
            let (stream, sample_rate) =
                match build_device_stream(&config, command_rx, status_tx) {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
            let _ = ready_tx.send(Ok(sample_rate));

            loop {
                match control_rx.recv() {
                    Ok(StreamControl::Resume(ack)) => {
                        let _ = ack.send(stream.play().map_err(|e| e.to_string()));
                    }
                    Ok(StreamControl::Suspend(ack)) => {
                        let _ = ack.send(stream.pause().map_err(|e| e.to_string()));
                    }
                    Ok(StreamControl::Shutdown) | Err(_) => break,
                }
            }
        })?;

    let sample_rate = ready_rx
        .recv()
        .map_err(|_| anyhow::anyhow!("audio thread died before the stream came up"))?
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(Engine {
        commands: command_tx,
        status: status_rx,
        sample_rate,
        control: control_tx,
        thread: Some(thread),
    })
}

fn build_device_stream(
    config: &EngineConfig,
    command_rx: rtrb::Consumer<EngineCommand>,
    status_tx: rtrb::Producer<EngineStatus>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let device_config = device.default_output_config()?;
    let sample_rate = device_config.sample_rate().0;

    let buffers = prepare_ambient_buffers(
        config.assets_base.as_deref(),
        sample_rate,
        config.noise_seed,
    );
    let graph = MixGraph::new(sample_rate, buffers, config.noise_seed);

    let stream = match device_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &device_config.into(), graph, command_rx, status_tx)?
        }
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut graph: MixGraph,
    mut command_rx: rtrb::Consumer<EngineCommand>,
    mut status_tx: rtrb::Producer<EngineStatus>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(cmd) = command_rx.pop() {
                graph.apply(cmd);
            }

            let mut peak = 0.0f32;
            for frame in data.chunks_mut(output_channels) {
                let (l, r) = graph.next_frame();
                peak = peak.max(l.abs()).max(r.abs());
                for (ch, sample) in frame.iter_mut().enumerate() {
                    let value = if ch % 2 == 0 { l } else { r };
                    *sample = T::from_sample(value);
                }
            }

            let _ = status_tx.push(EngineStatus::Peak(peak));
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )?;

    Ok(stream)
}

/// Prepare the four loop buffers, decoding fixed-path assets where they
/// exist and synthesizing the rest. Channels are independent: a failed
/// asset only affects its own channel.
pub fn prepare_ambient_buffers(
    assets_base: Option<&Path>,
    sample_rate: u32,
    noise_seed: u64,
) -> AmbientBuffers {
    let mut sources: Vec<ChannelSource> = AmbientChannelId::ALL
        .par_iter()
        .enumerate()
        .map(|(idx, id)| {
            if let Some(base) = assets_base {
                if let Some(path) = lull_decode::resolve_asset_path(base, id.as_str()) {
                    match lull_decode::load_loop_mono(&path, sample_rate) {
                        Ok(samples) => return ChannelSource::decoded(samples),
                        Err(e) => tracing::warn!(
                            channel = id.as_str(),
                            error = %e,
                            "ambient asset failed to load, falling back to synthesis"
                        ),
                    }
                }
            }

            let mut rng = StdRng::seed_from_u64(noise_seed.wrapping_add(idx as u64));
            let samples = match id {
                AmbientChannelId::Brown => lull_dsp::brown_loop(sample_rate, &mut rng),
                // Pink is the bed for rain and ocean too; their shaping is
                // applied by the mixer.
                _ => lull_dsp::pink_loop(sample_rate, &mut rng),
            };
            ChannelSource::synthesized(samples)
        })
        .collect();

    let ocean = sources.pop().expect("four channels");
    let rain = sources.pop().expect("four channels");
    let pink = sources.pop().expect("four channels");
    let brown = sources.pop().expect("four channels");
    AmbientBuffers {
        brown,
        pink,
        rain,
        ocean,
    }
}

impl AudioBackend for Engine {
    fn send(&mut self, cmd: EngineCommand) {
        if self.commands.push(cmd).is_err() {
            tracing::warn!(?cmd, "command ring full, dropping command");
        }
    }

    fn resume(&mut self) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.control
            .send(StreamControl::Resume(ack_tx))
            .map_err(|_| anyhow::anyhow!("audio control thread is gone"))?;
        ack_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("audio control thread is gone"))?
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn suspend(&mut self) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.control
            .send(StreamControl::Suspend(ack_tx))
            .map_err(|_| anyhow::anyhow!("audio control thread is gone"))?;
        ack_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("audio control thread is gone"))?
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn poll_status(&mut self) -> Option<EngineStatus> {
        let mut latest = None;
        while let Ok(status) = self.status.pop() {
            latest = Some(status);
        }
        latest
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.control.send(StreamControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
