//! Inbound unpacking: wire packets to host ring frames

use super::{copy_into_ring, PacketLayout, PACKET_HOST_BYTES};
use crate::constants::{BYTES_PER_FRAME, FRAMES_PER_PACKET};

/// Unpack the six frames of `packet` into `ring` at `start_frame`.
///
/// Header and trailer bytes are ignored. A packet that is not exactly the
/// layout's size is discarded and moves no frames.
///
/// Returns the number of frames written.
pub fn decode_packet(
    layout: &PacketLayout,
    packet: &[u8],
    ring: &mut [u8],
    start_frame: usize,
) -> usize {
    if packet.len() != layout.packet_bytes {
        return 0;
    }

    let mut frames = [0u8; PACKET_HOST_BYTES];
    layout.unpack(packet, &mut frames);
    copy_into_ring(ring, start_frame * BYTES_PER_FRAME, &frames);
    FRAMES_PER_PACKET
}
