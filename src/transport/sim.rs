//! In-process transport for tests and the simulator binary
//!
//! Transfers queue up in submission order and complete only when the test
//! (or the simulator clock) calls [`SimTransport::pump`]. Completions run on
//! the pumping thread with no simulator lock held, so handlers may resubmit.

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::{CompletionHandler, CompletionStatus, SubmitError, Transfer, TransferId, Transport};
use crate::codec::{PacketLayout, CAPTURE_LAYOUT};
use crate::constants::{DEFAULT_SAMPLE_RATE, FRAMES_PER_PACKET};
use crate::error::TransportError;
use crate::protocol::{ChannelKind, ControlRequest};

/// Packets kept for inspection of outbound traffic
const PLAYED_CAPACITY: usize = 8192;

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Fail the submission with this zero-based index
    pub fail_submit_at: Option<usize>,
    /// Fail every submission
    pub fail_all_submits: bool,
    /// Fail the allocation with this zero-based index
    pub fail_allocation_at: Option<usize>,
    /// GET_CUR reports this rate instead of the one last set
    pub readback_rate: Option<u32>,
    /// GET_CUR times out
    pub readback_fails: bool,
    /// SET_CUR stalls
    pub set_rate_fails: bool,
    /// `set_interface` fails on this interface
    pub interface_fails: Option<u8>,
    /// Inbound packets arrive with this length instead of a full packet
    pub capture_length: Option<usize>,
    /// Inbound packets arrive flagged with this per-packet error
    pub capture_error: Option<TransportError>,
}

struct InFlight {
    transfer: Box<Transfer>,
    cancelled: bool,
}

struct SimDevice {
    rate: u32,
    alt: [u8; 3],
}

/// Scriptable stand-in for a host controller with one attached peripheral
pub struct SimTransport {
    identity: String,
    handler: Mutex<Option<Arc<dyn CompletionHandler>>>,
    queue: Mutex<VecDeque<InFlight>>,
    device: Mutex<SimDevice>,
    faults: Mutex<SimFaults>,
    controls: Mutex<Vec<ControlRequest>>,
    interfaces: Mutex<Vec<(u8, u8)>>,
    played: ArrayQueue<Vec<u8>>,
    submissions: AtomicUsize,
    allocations: AtomicUsize,
    capture_frame: AtomicU64,
    kills_held: Mutex<bool>,
    kills_released: Condvar,
}

impl SimTransport {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            handler: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            device: Mutex::new(SimDevice {
                rate: DEFAULT_SAMPLE_RATE,
                alt: [0; 3],
            }),
            faults: Mutex::new(SimFaults::default()),
            controls: Mutex::new(Vec::new()),
            interfaces: Mutex::new(Vec::new()),
            played: ArrayQueue::new(PLAYED_CAPACITY),
            submissions: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            capture_frame: AtomicU64::new(0),
            kills_held: Mutex::new(false),
            kills_released: Condvar::new(),
        }
    }

    /// Adjust injected failures
    pub fn set_faults(&self, f: impl FnOnce(&mut SimFaults)) {
        f(&mut self.faults.lock());
    }

    /// Rate the device is currently clocked at
    pub fn rate(&self) -> u32 {
        self.device.lock().rate
    }

    pub fn set_rate(&self, rate: u32) {
        self.device.lock().rate = rate;
    }

    pub fn alt_setting(&self, interface: u8) -> u8 {
        self.device.lock().alt.get(interface as usize).copied().unwrap_or(0)
    }

    /// Every control request seen so far, in order
    pub fn control_log(&self) -> Vec<ControlRequest> {
        self.controls.lock().clone()
    }

    /// Every `set_interface` call seen so far, in order
    pub fn interface_log(&self) -> Vec<(u8, u8)> {
        self.interfaces.lock().clone()
    }

    pub fn clear_logs(&self) {
        self.controls.lock().clear();
        self.interfaces.lock().clear();
    }

    /// Take the outbound packets delivered so far
    pub fn take_played(&self) -> Vec<Vec<u8>> {
        let mut packets = Vec::with_capacity(self.played.len());
        while let Some(packet) = self.played.pop() {
            packets.push(packet);
        }
        packets
    }

    pub fn in_flight(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn in_flight_for(&self, kind: ChannelKind) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|entry| entry.transfer.id().kind == kind)
            .count()
    }

    /// Total submissions attempted
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Complete the oldest in-flight transfer
    pub fn pump(&self) -> Option<TransferId> {
        let entry = self.queue.lock().pop_front()?;
        let status = if entry.cancelled {
            CompletionStatus::Cancelled
        } else {
            CompletionStatus::Completed
        };
        Some(self.deliver(entry.transfer, status))
    }

    /// Complete up to `count` transfers; returns how many completed
    pub fn pump_n(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.pump().is_some()).count()
    }

    /// Complete the oldest in-flight transfer with an explicit status
    pub fn complete_next(&self, status: CompletionStatus) -> Option<TransferId> {
        let entry = self.queue.lock().pop_front()?;
        Some(self.deliver(entry.transfer, status))
    }

    /// Make `kill` block until [`release_kills`](Self::release_kills)
    pub fn hold_kills(&self) {
        *self.kills_held.lock() = true;
    }

    pub fn release_kills(&self) {
        *self.kills_held.lock() = false;
        self.kills_released.notify_all();
    }

    fn deliver(&self, mut transfer: Box<Transfer>, status: CompletionStatus) -> TransferId {
        let id = transfer.id();
        if matches!(status, CompletionStatus::Completed | CompletionStatus::Partial) {
            if transfer.is_in() {
                self.fill_capture(&mut transfer);
            } else {
                self.record_playback(&mut transfer);
            }
        }

        trace!("sim completion {} ({:?})", id, status);
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_complete(transfer, status);
        }
        id
    }

    /// Synthesize capture packets: a ramp of frame numbers, right channel negated
    fn fill_capture(&self, transfer: &mut Transfer) {
        let (length, error) = {
            let faults = self.faults.lock();
            (faults.capture_length, faults.capture_error)
        };
        let layout = &CAPTURE_LAYOUT;
        for index in 0..transfer.packet_count() {
            let sequence = self.capture_frame.load(Ordering::Relaxed) as u32;
            let slot = transfer.packet_mut(index);
            slot[..4].copy_from_slice(&sequence.to_le_bytes());
            slot[4..8].copy_from_slice(&[0x60, 0, 0, 0]);
            for frame in 0..FRAMES_PER_PACKET {
                let n = self.capture_frame.fetch_add(1, Ordering::Relaxed) as i32;
                let at = layout.frame_offset(frame);
                slot[at..at + 4].copy_from_slice(&n.to_le_bytes());
                slot[at + 4..at + 8].copy_from_slice(&(-n).to_le_bytes());
            }
            let trailer = layout.packet_bytes - layout.trailer_bytes;
            slot[trailer..layout.packet_bytes].copy_from_slice(&sequence.to_le_bytes());

            let packet = &mut transfer.packets_mut()[index];
            packet.actual_length = length.unwrap_or(layout.packet_bytes).min(packet.length);
            packet.status = error;
        }
    }

    fn record_playback(&self, transfer: &mut Transfer) {
        for index in 0..transfer.packet_count() {
            let bytes = transfer.packet(index).to_vec();
            if self.played.is_full() {
                self.played.pop();
            }
            let _ = self.played.push(bytes);
            let packet = &mut transfer.packets_mut()[index];
            packet.actual_length = packet.length;
        }
    }
}

impl Transport for SimTransport {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn register(&self, handler: Arc<dyn CompletionHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn unregister(&self) {
        self.handler.lock().take();
    }

    fn allocate(
        &self,
        id: TransferId,
        endpoint: u8,
        layout: &PacketLayout,
        count: usize,
    ) -> Result<Box<Transfer>, TransportError> {
        let index = self.allocations.fetch_add(1, Ordering::Relaxed);
        if self.faults.lock().fail_allocation_at == Some(index) {
            return Err(TransportError::OutOfMemory);
        }
        Ok(Box::new(Transfer::new(id, endpoint, layout, count)))
    }

    fn submit(&self, transfer: Box<Transfer>) -> Result<(), SubmitError> {
        let index = self.submissions.fetch_add(1, Ordering::Relaxed);
        let fail = {
            let faults = self.faults.lock();
            faults.fail_all_submits || faults.fail_submit_at == Some(index)
        };
        if fail {
            return Err(SubmitError {
                error: TransportError::NoDevice,
                transfer,
            });
        }
        self.queue.lock().push_back(InFlight {
            transfer,
            cancelled: false,
        });
        Ok(())
    }

    fn cancel(&self, id: TransferId) {
        if let Some(entry) = self.queue.lock().iter_mut().find(|entry| entry.transfer.id() == id) {
            entry.cancelled = true;
        }
    }

    fn kill(&self, id: TransferId) {
        {
            let mut held = self.kills_held.lock();
            while *held {
                self.kills_released.wait(&mut held);
            }
        }

        let entry = {
            let mut queue = self.queue.lock();
            queue
                .iter()
                .position(|entry| entry.transfer.id() == id)
                .and_then(|at| queue.remove(at))
        };
        if let Some(entry) = entry {
            self.deliver(entry.transfer, CompletionStatus::Cancelled);
        }
    }

    fn control(
        &self,
        request: ControlRequest,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.controls.lock().push(request);
        let faults = self.faults.lock().clone();
        let length = (request.length as usize).min(data.len());

        if request == ControlRequest::get_sampling_freq() {
            if faults.readback_fails {
                return Err(TransportError::Timeout);
            }
            let rate = faults.readback_rate.unwrap_or_else(|| self.rate());
            let bytes = rate.to_le_bytes();
            data[..length].copy_from_slice(&bytes[..length]);
            return Ok(length);
        }

        if request == ControlRequest::set_sampling_freq() {
            if faults.set_rate_fails {
                return Err(TransportError::Stall);
            }
            if length < 4 {
                return Err(TransportError::ShortTransfer {
                    expected: 4,
                    actual: length,
                });
            }
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[..4]);
            self.set_rate(u32::from_le_bytes(bytes));
            return Ok(4);
        }

        if request.is_in() {
            data[..length].fill(0);
            if request.request == 0x07 && length >= 3 {
                data[..3].copy_from_slice(&[0x80, 0xbb, 0x00]);
            }
            return Ok(length);
        }

        Ok(0)
    }

    fn set_interface(&self, interface: u8, alt_setting: u8) -> Result<(), TransportError> {
        self.interfaces.lock().push((interface, alt_setting));
        if self.faults.lock().interface_fails == Some(interface) {
            return Err(TransportError::Stall);
        }
        let mut device = self.device.lock();
        match device.alt.get_mut(interface as usize) {
            Some(alt) => {
                *alt = alt_setting;
                Ok(())
            }
            None => Err(TransportError::Protocol(-22)),
        }
    }
}
