//! Wire packet codec
//!
//! Byte-exact packing between interleaved host frames (two 32-bit sample
//! containers per frame) and the peripheral's padded isochronous packets.
//! Every packet carries exactly [`FRAMES_PER_PACKET`] frames.
//!
//! ```text
//! Game-Out / Voice-Out (240 bytes):
//!   6 × [ 8 × 0x00 | L (4) | R (4) | 24 × 0x00 ]
//!
//! Voice-In (108 bytes):
//!   [ header (8) | 6 × [ L (4) | R (4) | pad (8) ] | trailer (4) ]
//! ```

pub mod decoder;
pub mod encoder;

pub use decoder::decode_packet;
pub use encoder::{encode_packet, fill_silence};

use crate::constants::{BYTES_PER_FRAME, BYTES_PER_SAMPLE, FRAMES_PER_PACKET};
use crate::protocol::ChannelKind;

/// Host bytes carried by one wire packet
pub const PACKET_HOST_BYTES: usize = FRAMES_PER_PACKET * BYTES_PER_FRAME;

/// Fixed placement of samples inside a wire packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// Exact length of a valid packet
    pub packet_bytes: usize,
    /// Bytes reserved per packet in a transfer buffer
    pub slot_bytes: usize,
    /// Opaque leading bytes
    pub header_bytes: usize,
    /// Opaque trailing bytes
    pub trailer_bytes: usize,
    /// Distance between consecutive frames
    pub frame_stride: usize,
    /// Offset of the left sample within a frame
    pub sample_offset: usize,
}

/// Game-Out and Voice-Out packets
pub const PLAYBACK_LAYOUT: PacketLayout = PacketLayout {
    packet_bytes: 240,
    slot_bytes: 240,
    header_bytes: 0,
    trailer_bytes: 0,
    frame_stride: 40,
    sample_offset: 8,
};

/// Voice-In packets; slots are sized to the endpoint's max packet size
pub const CAPTURE_LAYOUT: PacketLayout = PacketLayout {
    packet_bytes: 108,
    slot_bytes: 124,
    header_bytes: 8,
    trailer_bytes: 4,
    frame_stride: 16,
    sample_offset: 0,
};

impl PacketLayout {
    pub const fn for_kind(kind: ChannelKind) -> &'static PacketLayout {
        match kind {
            ChannelKind::GameOut | ChannelKind::VoiceOut => &PLAYBACK_LAYOUT,
            ChannelKind::VoiceIn => &CAPTURE_LAYOUT,
        }
    }

    /// Byte offset of frame `index`'s left sample
    pub const fn frame_offset(&self, index: usize) -> usize {
        self.header_bytes + index * self.frame_stride + self.sample_offset
    }

    /// Scatter six interleaved host frames into a zeroed wire packet
    pub fn pack(&self, frames: &[u8; PACKET_HOST_BYTES], packet: &mut [u8]) {
        packet[..self.packet_bytes].fill(0);
        for (index, frame) in frames.chunks_exact(BYTES_PER_FRAME).enumerate() {
            let at = self.frame_offset(index);
            packet[at..at + BYTES_PER_FRAME].copy_from_slice(frame);
        }
    }

    /// Gather six interleaved host frames out of a wire packet
    pub fn unpack(&self, packet: &[u8], frames: &mut [u8; PACKET_HOST_BYTES]) {
        for (index, frame) in frames.chunks_exact_mut(BYTES_PER_FRAME).enumerate() {
            let at = self.frame_offset(index);
            frame.copy_from_slice(&packet[at..at + BYTES_PER_FRAME]);
        }
    }
}

/// Copy `dst.len()` bytes out of a ring starting at `offset`.
///
/// A read that straddles the end of the ring is split in two copies.
pub fn copy_from_ring(ring: &[u8], offset: usize, dst: &mut [u8]) {
    if ring.is_empty() {
        return;
    }
    let offset = offset % ring.len();
    let first = dst.len().min(ring.len() - offset);
    dst[..first].copy_from_slice(&ring[offset..offset + first]);
    let rest = dst.len() - first;
    if rest > 0 {
        dst[first..].copy_from_slice(&ring[..rest]);
    }
}

/// Copy `src` into a ring starting at `offset`, splitting at the wrap point
pub fn copy_into_ring(ring: &mut [u8], offset: usize, src: &[u8]) {
    if ring.is_empty() {
        return;
    }
    let offset = offset % ring.len();
    let first = src.len().min(ring.len() - offset);
    ring[offset..offset + first].copy_from_slice(&src[..first]);
    let rest = src.len() - first;
    if rest > 0 {
        ring[..rest].copy_from_slice(&src[first..]);
    }
}

/// Build interleaved host frame bytes from sample pairs
pub fn frames_from_samples(samples: &[(i32, i32)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_FRAME);
    for (left, right) in samples {
        bytes.extend_from_slice(&left.to_le_bytes());
        bytes.extend_from_slice(&right.to_le_bytes());
    }
    bytes
}

/// Split interleaved host frame bytes into sample pairs
pub fn samples_from_frames(bytes: &[u8]) -> Vec<(i32, i32)> {
    bytes
        .chunks_exact(BYTES_PER_FRAME)
        .map(|frame| {
            let mut left = [0u8; BYTES_PER_SAMPLE];
            let mut right = [0u8; BYTES_PER_SAMPLE];
            left.copy_from_slice(&frame[..BYTES_PER_SAMPLE]);
            right.copy_from_slice(&frame[BYTES_PER_SAMPLE..]);
            (i32::from_le_bytes(left), i32::from_le_bytes(right))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_sizes() {
        let playback = PLAYBACK_LAYOUT;
        assert_eq!(playback.frame_offset(FRAMES_PER_PACKET), playback.packet_bytes + playback.sample_offset);

        let capture = CAPTURE_LAYOUT;
        let end = capture.header_bytes + FRAMES_PER_PACKET * capture.frame_stride + capture.trailer_bytes;
        assert_eq!(end, capture.packet_bytes);
        assert!(capture.slot_bytes >= capture.packet_bytes);
    }

    #[test]
    fn test_ring_copy_wraps() {
        let mut ring = vec![0u8; 16];
        copy_into_ring(&mut ring, 12, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&ring[12..], &[1, 2, 3, 4]);
        assert_eq!(&ring[..4], &[5, 6, 7, 8]);

        let mut out = [0u8; 8];
        copy_from_ring(&ring, 12, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_ring_offset_is_modular() {
        let ring: Vec<u8> = (0..8).collect();
        let mut out = [0u8; 3];
        copy_from_ring(&ring, 8 + 6, &mut out);
        assert_eq!(out, [6, 7, 0]);
    }

    proptest! {
        #[test]
        fn prop_ring_copy_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            offset in 0usize..256,
        ) {
            let mut ring = vec![0u8; 64];
            copy_into_ring(&mut ring, offset, &data);
            let mut back = vec![0u8; data.len()];
            copy_from_ring(&ring, offset, &mut back);
            prop_assert_eq!(back, data);
        }
    }
}
