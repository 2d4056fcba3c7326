use std::time::Duration;

use lull_core::{AmbientChannelId, AudioSession, Preset, SessionConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let session = AudioSession::new(SessionConfig::default())?;

    let _sub = session.subscribe(|state| {
        println!(
            "{:?} playing={} paused={} left={}s",
            state.active_mode, state.is_playing, state.is_paused, state.time_left_seconds
        );
    });

    session.apply_preset(Preset::Calma);
    session.set_duration(1.0 / 120.0); // 30 second demo session

    if !session.start() {
        anyhow::bail!("audio unlock refused; is an output device available?");
    }

    session.set_ambient_volume(AmbientChannelId::Rain, 0.35);
    session.set_ambient_volume(AmbientChannelId::Ocean, 0.25);

    std::thread::sleep(Duration::from_secs(20));

    session.stop();
    Ok(())
}
