//! Host ring buffer shared with the completion path
//!
//! The host reads and writes the linear ring directly (like a mapped DMA
//! area); the completion path copies one packet's worth of frames at a
//! time. Both sides take the same short spin lock, so no critical section
//! is longer than a single packet copy.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::codec::{
    copy_from_ring, copy_into_ring, frames_from_samples, samples_from_frames, PACKET_HOST_BYTES,
};
use crate::constants::BYTES_PER_FRAME;
use crate::protocol::ChannelKind;
use crate::stream::HwParams;

/// Host-visible run state of an opened stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Open,
    Setup,
    Prepared,
    Running,
    XRun,
    Stopped,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Open,
            1 => StreamState::Setup,
            2 => StreamState::Prepared,
            3 => StreamState::Running,
            4 => StreamState::XRun,
            _ => StreamState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StreamState::Open => 0,
            StreamState::Setup => 1,
            StreamState::Prepared => 2,
            StreamState::Running => 3,
            StreamState::XRun => 4,
            StreamState::Stopped => 5,
        }
    }
}

/// Runtime of one configured channel: ring bytes, geometry and run state
pub struct HostStream {
    kind: ChannelKind,
    params: HwParams,
    area: spin::Mutex<Box<[u8]>>,
    state: AtomicU8,
}

impl HostStream {
    /// Allocate a silent ring for the given parameters
    pub fn new(kind: ChannelKind, params: HwParams) -> Self {
        let bytes = params.buffer_frames * BYTES_PER_FRAME;
        Self {
            kind,
            params,
            area: spin::Mutex::new(vec![0u8; bytes].into_boxed_slice()),
            state: AtomicU8::new(StreamState::Setup.as_u8()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn params(&self) -> &HwParams {
        &self.params
    }

    pub fn rate(&self) -> u32 {
        self.params.rate
    }

    pub fn buffer_frames(&self) -> usize {
        self.params.buffer_frames
    }

    pub fn period_frames(&self) -> usize {
        self.params.period_frames
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Write interleaved frame bytes at `frame` (wrapping).
    ///
    /// The ring lock is taken once per packet's worth of frames.
    pub fn write_frames(&self, frame: usize, bytes: &[u8]) {
        let start = frame * BYTES_PER_FRAME;
        for (index, chunk) in bytes.chunks(PACKET_HOST_BYTES).enumerate() {
            let mut area = self.area.lock();
            copy_into_ring(&mut area, start + index * PACKET_HOST_BYTES, chunk);
        }
    }

    /// Read interleaved frame bytes at `frame` (wrapping), one packet per lock
    pub fn read_frames(&self, frame: usize, out: &mut [u8]) {
        let start = frame * BYTES_PER_FRAME;
        for (index, chunk) in out.chunks_mut(PACKET_HOST_BYTES).enumerate() {
            let area = self.area.lock();
            copy_from_ring(&area, start + index * PACKET_HOST_BYTES, chunk);
        }
    }

    /// Write (left, right) sample pairs at `frame`
    pub fn write_samples(&self, frame: usize, samples: &[(i32, i32)]) {
        self.write_frames(frame, &frames_from_samples(samples));
    }

    /// Read `count` (left, right) sample pairs at `frame`
    pub fn read_samples(&self, frame: usize, count: usize) -> Vec<(i32, i32)> {
        let mut bytes = vec![0u8; count * BYTES_PER_FRAME];
        self.read_frames(frame, &mut bytes);
        samples_from_frames(&bytes)
    }

    /// Run `f` with exclusive access to the ring bytes
    pub(crate) fn with_area<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut area = self.area.lock();
        f(&mut area)
    }
}

impl std::fmt::Debug for HostStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStream")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("state", &self.state())
            .finish()
    }
}
