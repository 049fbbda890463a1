//! ZG01 streaming simulator
//!
//! Attaches a device to the simulated transport, plays a tone on Game-Out,
//! records Voice-In and prints per-channel statistics on exit.
//!
//! Usage: `zg01-sim [seconds]`

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zg01_stream::{
    transport::sim::SimTransport, ChannelKind, DeviceRegistry, EventQueue, HostEvent, HostStream,
    HwParams, StreamConfig, Trigger,
};

const TONE_HZ: f64 = 440.0;
const TONE_LEVEL: f64 = 0.25;

/// Sine generator writing straight into a host ring
struct Tone {
    phase: f64,
    step: f64,
}

impl Tone {
    fn new(rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TONE_HZ * std::f64::consts::TAU / rate as f64,
        }
    }

    fn fill(&mut self, stream: &HostStream, frame: usize, count: usize) {
        let samples: Vec<(i32, i32)> = (0..count)
            .map(|_| {
                let value = (self.phase.sin() * TONE_LEVEL * i32::MAX as f64) as i32;
                self.phase = (self.phase + self.step) % std::f64::consts::TAU;
                (value, value)
            })
            .collect();
        stream.write_samples(frame, &samples);
    }
}

fn peak(samples: &[(i32, i32)]) -> i64 {
    samples
        .iter()
        .map(|&(l, r)| (l as i64).abs().max((r as i64).abs()))
        .max()
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ZG01 stream simulator");

    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("duration must be a whole number of seconds")?,
        None => 2,
    };
    let config = StreamConfig::load_or_default().context("loading configuration")?;
    let packets = config.packets_per_transfer;

    let registry = DeviceRegistry::new();
    let sim = Arc::new(SimTransport::new("sim-bus-1"));
    let events = Arc::new(EventQueue::new(4096));
    let device = registry
        .attach(sim.clone(), events.clone(), config)
        .context("attaching simulated device")?;

    println!("{}", serde_json::to_string_pretty(&device.info())?);

    let game = device.channel(ChannelKind::GameOut);
    game.open(ChannelKind::GameOut.direction())?;
    let game_stream = game.configure(HwParams::new(48000, 384, 1536))?;
    game.prepare()?;

    let mut tone = Tone::new(game_stream.rate());
    tone.fill(&game_stream, 0, game_stream.buffer_frames());

    let voice = device.channel(ChannelKind::VoiceIn);
    voice.open(ChannelKind::VoiceIn.direction())?;
    let voice_stream = voice.configure(HwParams::new(48000, 96, 384))?;
    voice.prepare()?;

    game.trigger(Trigger::Start)?;
    voice.trigger(Trigger::Start)?;

    // one transfer per channel per tick; eight packets per millisecond
    let mut ticker = tokio::time::interval(Duration::from_micros(125 * packets as u64));
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    let mut periods = [0u64; 3];
    let mut loudest = 0i64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                sim.pump_n(2);
                for event in events.drain() {
                    match event {
                        HostEvent::PeriodElapsed(kind) => {
                            periods[kind.index()] += 1;
                            match kind {
                                ChannelKind::GameOut => {
                                    // refill the period the device just consumed
                                    let period = game_stream.period_frames();
                                    let buffer = game_stream.buffer_frames();
                                    let done = (game.position() / period * period + buffer - period) % buffer;
                                    tone.fill(&game_stream, done, period);
                                }
                                ChannelKind::VoiceIn => {
                                    let period = voice_stream.period_frames();
                                    let buffer = voice_stream.buffer_frames();
                                    let done = (voice.position() / period * period + buffer - period) % buffer;
                                    loudest = loudest.max(peak(&voice_stream.read_samples(done, period)));
                                }
                                ChannelKind::VoiceOut => {}
                            }
                        }
                        HostEvent::XRun(kind) => {
                            tracing::warn!("{} underrun, stopping", kind);
                            device.trigger(kind, Trigger::Stop)?;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        "Periods elapsed: game-out {}, voice-in {}; loudest capture sample {}",
        periods[ChannelKind::GameOut.index()],
        periods[ChannelKind::VoiceIn.index()],
        loudest
    );
    if events.dropped() > 0 {
        tracing::warn!("{} host events dropped", events.dropped());
    }

    game.close();
    voice.close();
    device.detach();

    println!("{}", serde_json::to_string_pretty(&device.stats())?);
    Ok(())
}
