//! USB transport abstraction
//!
//! The streaming core never talks to a host controller directly. A
//! [`Transport`] accepts isochronous transfer descriptors, hands them back
//! through a registered [`CompletionHandler`], and carries control requests
//! and alternate-setting changes.
//!
//! Descriptor ownership moves with the box: `submit` gives it to the
//! transport, the completion gives it back. A failed submit returns it to
//! the caller inside [`SubmitError`].

#[cfg(any(test, feature = "sim"))]
pub mod sim;

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::PacketLayout;
use crate::error::{ChannelError, TransportError};
use crate::protocol::{ChannelKind, ControlRequest};

/// Identity of one descriptor: channel, pool generation, slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    pub kind: ChannelKind,
    pub generation: u32,
    pub slot: u16,
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}.{}", self.kind, self.generation, self.slot)
    }
}

/// Per-packet sub-descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoPacket {
    /// Offset of the packet slot in the transfer buffer
    pub offset: usize,
    /// Bytes to send, or bytes reserved for reception
    pub length: usize,
    /// Bytes actually moved
    pub actual_length: usize,
    /// Per-packet error, if any
    pub status: Option<TransportError>,
}

/// Outcome of a whole transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    /// Some packets moved fewer bytes than requested
    Partial,
    /// Transient failure; the transfer may be resubmitted
    Error(TransportError),
    /// Cancelled by `cancel` or `kill`
    Cancelled,
    /// Endpoint or device going away
    Shutdown,
}

impl CompletionStatus {
    /// Terminal completions must not be resubmitted
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionStatus::Cancelled | CompletionStatus::Shutdown)
    }
}

/// An isochronous transfer descriptor with its data buffer
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    endpoint: u8,
    buffer: BytesMut,
    packets: Vec<IsoPacket>,
}

impl Transfer {
    /// Allocate a zero-filled descriptor with `count` packets laid out per `layout`
    pub fn new(id: TransferId, endpoint: u8, layout: &PacketLayout, count: usize) -> Self {
        let slot = layout.slot_bytes;
        let packets = (0..count)
            .map(|index| IsoPacket {
                offset: index * slot,
                length: slot,
                ..IsoPacket::default()
            })
            .collect();
        Self {
            id,
            endpoint,
            buffer: BytesMut::zeroed(slot * count),
            packets,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    /// Device-to-host transfer
    pub fn is_in(&self) -> bool {
        self.endpoint & 0x80 != 0
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn packets(&self) -> &[IsoPacket] {
        &self.packets
    }

    pub fn packets_mut(&mut self) -> &mut [IsoPacket] {
        &mut self.packets
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Configured bytes of packet `index`
    pub fn packet(&self, index: usize) -> &[u8] {
        let p = self.packets[index];
        &self.buffer[p.offset..p.offset + p.length]
    }

    pub fn packet_mut(&mut self, index: usize) -> &mut [u8] {
        let p = self.packets[index];
        &mut self.buffer[p.offset..p.offset + p.length]
    }

    /// Bytes actually received in packet `index`; empty if the packet errored
    pub fn received(&self, index: usize) -> &[u8] {
        let p = self.packets[index];
        if p.status.is_some() {
            return &[];
        }
        let len = p.actual_length.min(p.length);
        &self.buffer[p.offset..p.offset + len]
    }

    /// Clear per-packet results before resubmission
    pub fn reset_packets(&mut self) {
        for packet in &mut self.packets {
            packet.actual_length = 0;
            packet.status = None;
        }
    }
}

/// Submission failure; ownership of the descriptor returns to the caller
#[derive(Debug)]
pub struct SubmitError {
    pub error: TransportError,
    pub transfer: Box<Transfer>,
}

/// Receives every transfer completion. Called on the completion path: must
/// not block or sleep.
pub trait CompletionHandler: Send + Sync {
    fn on_complete(&self, transfer: Box<Transfer>, status: CompletionStatus);
}

/// Host-controller services used by the streaming core
pub trait Transport: Send + Sync {
    /// Stable identity of the attached peripheral (bus path or serial)
    fn identity(&self) -> String;

    /// Install the completion handler; replaces any previous one
    fn register(&self, handler: Arc<dyn CompletionHandler>);

    /// Remove the completion handler
    fn unregister(&self);

    /// Allocate a descriptor for `count` packets of `layout`
    fn allocate(
        &self,
        id: TransferId,
        endpoint: u8,
        layout: &PacketLayout,
        count: usize,
    ) -> Result<Box<Transfer>, TransportError> {
        Ok(Box::new(Transfer::new(id, endpoint, layout, count)))
    }

    /// Queue a transfer. Non-blocking; callable from the completion path.
    fn submit(&self, transfer: Box<Transfer>) -> std::result::Result<(), SubmitError>;

    /// Request asynchronous cancellation. Non-blocking.
    fn cancel(&self, id: TransferId);

    /// Cancel and wait until the transfer's completion has been delivered.
    /// Blocks; never call from the completion path.
    fn kill(&self, id: TransferId);

    /// Synchronous control transfer; returns bytes moved in the data stage
    fn control(
        &self,
        request: ControlRequest,
        data: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError>;

    /// Select an alternate setting on an interface
    fn set_interface(&self, interface: u8, alt_setting: u8) -> std::result::Result<(), TransportError>;
}

/// Detachable reference to the device's transport
pub struct TransportHandle {
    inner: spin::RwLock<Option<Arc<dyn Transport>>>,
}

impl TransportHandle {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: spin::RwLock::new(Some(transport)),
        }
    }

    /// Current transport, or `DeviceAbsent` once detached
    pub fn get(&self) -> std::result::Result<Arc<dyn Transport>, ChannelError> {
        self.inner.read().clone().ok_or(ChannelError::DeviceAbsent)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Detach, returning the transport if it was still attached
    pub fn take(&self) -> Option<Arc<dyn Transport>> {
        self.inner.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CAPTURE_LAYOUT, PLAYBACK_LAYOUT};

    fn id(kind: ChannelKind) -> TransferId {
        TransferId {
            kind,
            generation: 1,
            slot: 0,
        }
    }

    #[test]
    fn test_transfer_layout() {
        let transfer = Transfer::new(id(ChannelKind::VoiceIn), 0x81, &CAPTURE_LAYOUT, 4);
        assert!(transfer.is_in());
        assert_eq!(transfer.buffer().len(), 4 * 124);
        assert_eq!(transfer.packets()[3].offset, 3 * 124);
        assert_eq!(transfer.packet(1).len(), 124);
        assert!(transfer.received(1).is_empty());
    }

    #[test]
    fn test_outbound_starts_silent() {
        let transfer = Transfer::new(id(ChannelKind::GameOut), 0x01, &PLAYBACK_LAYOUT, 2);
        assert!(!transfer.is_in());
        assert!(transfer.buffer().iter().all(|&b| b == 0));
        assert_eq!(transfer.packet(1).len(), 240);
    }

    #[test]
    fn test_reset_packets() {
        let mut transfer = Transfer::new(id(ChannelKind::VoiceIn), 0x81, &CAPTURE_LAYOUT, 2);
        transfer.packets_mut()[0].actual_length = 108;
        transfer.packets_mut()[1].actual_length = 108;
        transfer.packets_mut()[1].status = Some(TransportError::Stall);
        assert_eq!(transfer.received(0).len(), 108);
        assert!(transfer.received(1).is_empty());

        transfer.reset_packets();
        assert!(transfer.packets().iter().all(|p| p.actual_length == 0 && p.status.is_none()));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CompletionStatus::Cancelled.is_terminal());
        assert!(CompletionStatus::Shutdown.is_terminal());
        assert!(!CompletionStatus::Partial.is_terminal());
        assert!(!CompletionStatus::Error(TransportError::Protocol(-71)).is_terminal());
    }
}
