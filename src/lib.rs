//! # ZG01 Stream
//!
//! Isochronous streaming core for a USB audio peripheral exposing three
//! independent channels: Game-Out (playback), Voice-In (capture) and
//! Voice-Out (playback, game wire format).
//!
//! ## Architecture Overview
//!
//! ```text
//!  HOST AUDIO SUBSYSTEM
//!    open / configure / prepare / trigger / position / close
//!        │                              ▲ period_elapsed / stop_xrun
//!        ▼ control path (may block)     │ (HostEvents)
//!  ┌──────────────────────────────────────────────────────────────────┐
//!  │ Device (audio::device)                                           │
//!  │   ┌────────────┐    ┌────────────┐    ┌────────────┐             │
//!  │   │ Game-Out   │    │ Voice-In   │    │ Voice-Out  │  Channel    │
//!  │   └─────┬──────┘    └─────┬──────┘    └─────┬──────┘  (stream)   │
//!  │         │ first prepare   │                 │                    │
//!  │         ▼                 ▼                 ▼                    │
//!  │   Rate negotiation (negotiate): blocking control requests       │
//!  │         │ start / close                                          │
//!  │         ▼                                                        │
//!  │   Transfer pool (stream::pool) ──cancel──▶ Cleanup worker        │
//!  │         │ submit                           (stream::cleanup)     │
//!  └─────────┼────────────────────────────────────────────────────────┘
//!            ▼                         ▲ on_complete (never blocks)
//!  ┌──────────────────────────────────┴───────────────────────────────┐
//!  │ USB transport (transport::Transport)                             │
//!  └──────────────────────────────────────────────────────────────────┘
//!            completion dispatcher (stream::dispatch)
//!              → frame codec (codec) → ring cursor (audio::position)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod negotiate;
pub mod protocol;
pub mod stream;
pub mod transport;

pub use audio::{Device, DeviceInfo, DeviceRegistry, EventQueue, HostEvent, HostEvents, HostStream, StreamState};
pub use config::StreamConfig;
pub use error::{Error, Result};
pub use negotiate::Negotiated;
pub use protocol::{ChannelKind, Direction, SampleFormat};
pub use stream::{Capabilities, Channel, ChannelState, ChannelStatsSnapshot, HwParams, Trigger};
pub use transport::Transport;

/// Device-wide constants
pub mod constants {
    /// Default sample rate for every channel
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Rates the capture channel may run at
    pub const VOICE_IN_RATES: [u32; 2] = [16000, 48000];

    /// Rates the playback channels may run at
    pub const PLAYBACK_RATES: [u32; 1] = [48000];

    /// Fixed channel count (stereo)
    pub const CHANNELS: u16 = 2;

    /// Bytes per sample container
    pub const BYTES_PER_SAMPLE: usize = 4;

    /// Bytes per interleaved host frame
    pub const BYTES_PER_FRAME: usize = BYTES_PER_SAMPLE * CHANNELS as usize;

    /// Audio frames carried by every wire packet
    pub const FRAMES_PER_PACKET: usize = 6;

    /// Outstanding transfers per channel
    pub const TRANSFERS_PER_CHANNEL: usize = 16;

    /// Largest pool whose slot numbers fit a transfer id
    pub const MAX_TRANSFERS_PER_CHANNEL: usize = u16::MAX as usize + 1;

    /// Isochronous packets per transfer (4 ms of micro-frames)
    pub const PACKETS_PER_TRANSFER: usize = 32;

    /// Periods per host buffer
    pub const PERIODS_MIN: usize = 2;
    pub const PERIODS_MAX: usize = 64;
}
