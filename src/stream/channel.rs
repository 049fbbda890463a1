//! Channel state machine
//!
//! ```text
//!  Closed ─open─▶ Opened ─configure─▶ Configured ─prepare─▶ Prepared
//!     ▲                                                      │ start
//!     │                                        stop          ▼
//!     └──────────────close (any state)────── Muted ◀──────▶ Active
//!                                                    start
//! ```
//!
//! Two locks guard a channel. `hot` is a spin lock shared with the
//! completion path and only ever held for a handful of field updates or a
//! single packet copy. `control` is a sleeping lock held across whole
//! control operations, which may block on the transport.

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::cleanup::{self, CleanupQueue};
use super::params::{Capabilities, HwParams};
use super::pool;
use super::stats::{ChannelStats, ChannelStatsSnapshot};
use crate::audio::{HostEvents, HostStream, RingState, StreamState};
use crate::codec::PacketLayout;
use crate::config::StreamConfig;
use crate::error::{ChannelError, Error, Result};
use crate::negotiate::{Negotiated, Negotiator};
use crate::protocol::{alt, interface, ChannelKind, Direction};
use crate::transport::{Transfer, TransferId, Transport, TransportHandle};

/// Host trigger commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Start,
    Stop,
}

/// Control-path state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Closed,
    Opened,
    Configured,
    /// `first` is set when this prepare ran negotiation
    Prepared { first: bool },
    Active,
    /// Pool keeps running, payload is silence
    Muted,
}

impl ChannelState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::Closed => "closed",
            ChannelState::Opened => "opened",
            ChannelState::Configured => "configured",
            ChannelState::Prepared { .. } => "prepared",
            ChannelState::Active => "active",
            ChannelState::Muted => "muted",
        }
    }
}

/// State shared with the completion path
#[derive(Debug, Default)]
pub(super) struct HotState {
    /// Generation of the current pool's identities
    pub generation: u32,
    /// Slots in the current pool; zero when no pool exists
    pub pool_len: usize,
    /// Descriptors submitted from the current pool
    pub active_count: usize,
    pub ring: RingState,
    /// False while muted
    pub audible: bool,
    pub stream: Option<Arc<HostStream>>,
    pub cleanup_in_progress: bool,
}

impl HotState {
    /// Whether `id` is one of the current pool's identities
    pub fn owns(&self, id: TransferId) -> bool {
        id.generation == self.generation && (id.slot as usize) < self.pool_len
    }
}

/// Counts opens that arrive in quick succession
#[derive(Debug, Default)]
struct ProbeTracker {
    last: Option<Instant>,
    burst: u32,
}

impl ProbeTracker {
    fn record(&mut self, now: Instant, window: Duration) -> bool {
        self.burst = match self.last {
            Some(last) if now.duration_since(last) < window => self.burst + 1,
            _ => 1,
        };
        self.last = Some(now);
        self.is_rapid()
    }

    /// Beyond the second open in the window
    fn is_rapid(&self) -> bool {
        self.burst > 2
    }
}

#[derive(Debug)]
struct ControlState {
    state: ChannelState,
    initialized: bool,
    current_rate: Option<u32>,
    negotiated: Option<Negotiated>,
    params: Option<HwParams>,
    probe: ProbeTracker,
}

/// One streaming channel of the device
pub struct Channel {
    pub(super) kind: ChannelKind,
    pub(super) layout: &'static PacketLayout,
    pub(super) config: Arc<StreamConfig>,
    pub(super) transport: Arc<TransportHandle>,
    pub(super) events: Arc<dyn HostEvents>,
    pub(super) hot: spin::Mutex<HotState>,
    control: Mutex<ControlState>,
    /// Descriptors handed back by the completion path, awaiting release
    pub(super) retired: ArrayQueue<Box<Transfer>>,
    pub(super) cleanup: CleanupQueue,
    pub(super) stats: ChannelStats,
}

impl Channel {
    pub(crate) fn new(
        kind: ChannelKind,
        config: Arc<StreamConfig>,
        transport: Arc<TransportHandle>,
        events: Arc<dyn HostEvents>,
        cleanup: CleanupQueue,
    ) -> Self {
        // room for a torn-down pool plus one that failed to start
        let retired = ArrayQueue::new(config.transfers_per_channel.max(1) * 2);
        Self {
            kind,
            layout: PacketLayout::for_kind(kind),
            config,
            transport,
            events,
            hot: spin::Mutex::new(HotState::default()),
            control: Mutex::new(ControlState {
                state: ChannelState::Closed,
                initialized: false,
                current_rate: None,
                negotiated: None,
                params: None,
                probe: ProbeTracker::default(),
            }),
            retired,
            cleanup,
            stats: ChannelStats::default(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_kind(self.kind)
    }

    pub fn state(&self) -> ChannelState {
        self.control.lock().state
    }

    /// Negotiation has run for this channel
    pub fn is_initialized(&self) -> bool {
        self.control.lock().initialized
    }

    pub fn current_rate(&self) -> Option<u32> {
        self.control.lock().current_rate
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.control.lock().negotiated
    }

    pub fn params(&self) -> Option<HwParams> {
        self.control.lock().params
    }

    pub fn active_count(&self) -> usize {
        self.hot.lock().active_count
    }

    pub fn is_cleanup_in_progress(&self) -> bool {
        self.hot.lock().cleanup_in_progress
    }

    pub fn stream(&self) -> Option<Arc<HostStream>> {
        self.hot.lock().stream.clone()
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot(self.kind)
    }

    /// Claim the channel for one opener
    pub fn open(&self, direction: Direction) -> Result<Capabilities> {
        let transport = self.transport.get()?;
        if direction != self.kind.direction() {
            return Err(ChannelError::DirectionMismatch {
                kind: self.kind,
                requested: direction,
            }
            .into());
        }

        let mut control = self.control.lock();
        let rapid = control.probe.record(Instant::now(), self.config.probe_window());
        if control.state != ChannelState::Closed {
            return Err(ChannelError::AlreadyOpen(self.kind).into());
        }

        self.activate_interfaces(transport.as_ref())?;
        control.state = ChannelState::Opened;

        if rapid {
            debug!("{} channel opened (rapid reopen #{})", self.kind, control.probe.burst);
        } else {
            info!("{} channel opened", self.kind);
        }
        Ok(self.capabilities())
    }

    /// Validate host parameters and attach a fresh host stream
    pub fn configure(&self, params: HwParams) -> Result<Arc<HostStream>> {
        let transport = self.transport.get()?;
        let mut control = self.control.lock();
        match control.state {
            ChannelState::Closed => return Err(ChannelError::NotOpen(self.kind).into()),
            ChannelState::Active => return Err(self.invalid("configure", control.state)),
            _ => {}
        }

        self.capabilities().check(&params)?;

        let negotiator = Negotiator::new(transport.as_ref(), &self.config.negotiation);
        match negotiator.read_rate(self.config.negotiation.readback_timeout()) {
            Ok(rate) if rate != params.rate => {
                warn!(
                    "{} channel: device runs at {} Hz, host requested {} Hz",
                    self.kind, rate, params.rate
                );
                return Err(ChannelError::UnsupportedParameter(format!(
                    "device runs at {} Hz, requested {} Hz",
                    rate, params.rate
                ))
                .into());
            }
            Ok(_) => {}
            Err(e) => debug!(
                "{} channel: rate read-back failed ({}), accepting {} Hz",
                self.kind, e, params.rate
            ),
        }

        let stream = Arc::new(HostStream::new(self.kind, params));
        let previous = {
            let mut hot = self.hot.lock();
            hot.ring.configure(params.buffer_frames, params.period_frames);
            hot.stream.replace(Arc::clone(&stream))
        };
        drop(previous);

        control.current_rate = Some(params.rate);
        control.params = Some(params);
        control.state = ChannelState::Configured;
        info!(
            "{} channel configured: {} Hz, period {} frames, buffer {} frames",
            self.kind, params.rate, params.period_frames, params.buffer_frames
        );
        Ok(stream)
    }

    /// Negotiate on first use, then ready the interface and cursor
    pub fn prepare(&self) -> Result<()> {
        let transport = self.transport.get()?;
        let mut control = self.control.lock();
        match control.state {
            ChannelState::Closed => return Err(ChannelError::NotOpen(self.kind).into()),
            ChannelState::Opened => return Err(self.invalid("prepare", control.state)),
            _ => {}
        }

        let first = !control.initialized;
        if first {
            info!("First prepare for {} channel - running negotiation", self.kind);
            control.initialized = true;
            let negotiated = Negotiator::new(transport.as_ref(), &self.config.negotiation)
                .negotiate(self.kind, control.current_rate);
            control.current_rate = Some(negotiated.rate);
            control.negotiated = Some(negotiated);
        } else {
            debug!("{} channel already initialized, skipping negotiation", self.kind);
        }

        // leave live transfers undisturbed
        let running = self.hot.lock().active_count > 0;
        if !running {
            debug!(
                "Switching interface {} to alt {} for streaming",
                self.kind.interface(),
                alt::ACTIVE
            );
            transport.set_interface(self.kind.interface(), alt::ACTIVE)?;
        }

        let stream = {
            let mut hot = self.hot.lock();
            if hot.active_count == 0 {
                hot.ring.reset();
            }
            hot.stream.clone()
        };
        if let Some(stream) = stream {
            stream.set_state(StreamState::Prepared);
        }

        control.state = ChannelState::Prepared { first };
        Ok(())
    }

    /// Start streaming, or mute while keeping the pool alive
    pub fn trigger(&self, trigger: Trigger) -> Result<()> {
        let mut control = self.control.lock();
        match trigger {
            Trigger::Start => {
                match control.state {
                    ChannelState::Closed => return Err(ChannelError::NotOpen(self.kind).into()),
                    ChannelState::Opened | ChannelState::Configured => {
                        return Err(self.invalid("start", control.state))
                    }
                    _ => {}
                }

                pool::start(self)?;

                let stream = {
                    let mut hot = self.hot.lock();
                    hot.audible = true;
                    hot.stream.clone()
                };
                if let Some(stream) = stream {
                    stream.set_state(StreamState::Running);
                }
                if control.state != ChannelState::Active {
                    info!("{} channel started", self.kind);
                }
                control.state = ChannelState::Active;
            }
            Trigger::Stop => {
                if control.state == ChannelState::Closed {
                    return Err(ChannelError::NotOpen(self.kind).into());
                }

                let stream = {
                    let mut hot = self.hot.lock();
                    hot.audible = false;
                    hot.stream.clone()
                };
                if let Some(stream) = stream {
                    if stream.state() == StreamState::Running {
                        stream.set_state(StreamState::Stopped);
                    }
                }
                if control.state == ChannelState::Active {
                    debug!("{} channel muted, transfers keep running", self.kind);
                    control.state = ChannelState::Muted;
                }
            }
        }
        Ok(())
    }

    /// Frames into the host buffer; 0 when no stream is attached
    pub fn position(&self) -> usize {
        let hot = self.hot.lock();
        if hot.stream.is_none() {
            return 0;
        }
        hot.ring.position()
    }

    /// Tear down the pool and release the opener. Negotiation state survives.
    pub fn close(self: &Arc<Self>) {
        let mut control = self.control.lock();
        cleanup::begin(self);

        let stream = {
            let mut hot = self.hot.lock();
            hot.audible = false;
            hot.stream.take()
        };
        if let Some(stream) = stream {
            stream.set_state(StreamState::Stopped);
        }

        if control.state == ChannelState::Closed {
            return;
        }
        control.state = ChannelState::Closed;
        control.params = None;

        if control.probe.is_rapid() {
            debug!("{} channel closed", self.kind);
        } else {
            info!("{} channel closed", self.kind);
        }
    }

    fn activate_interfaces(&self, transport: &dyn Transport) -> Result<()> {
        match self.kind {
            ChannelKind::GameOut => transport.set_interface(interface::PLAYBACK, alt::ACTIVE)?,
            ChannelKind::VoiceIn => transport.set_interface(interface::CAPTURE, alt::ACTIVE)?,
            ChannelKind::VoiceOut => {
                if let Err(e) = transport.set_interface(interface::CAPTURE, alt::IDLE) {
                    warn!("Voice Out open: interface 2 alt 0 failed: {}", e);
                }
                transport.set_interface(interface::PLAYBACK, alt::ACTIVE)?;
                if let Err(e) = transport.set_interface(interface::CAPTURE, alt::ACTIVE) {
                    warn!("Voice Out open: interface 2 alt 1 failed: {}", e);
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str, state: ChannelState) -> Error {
        ChannelError::InvalidState {
            kind: self.kind,
            operation,
            state: state.name(),
        }
        .into()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
