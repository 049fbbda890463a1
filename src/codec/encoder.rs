//! Outbound packing: host ring frames to wire packets

use super::{copy_from_ring, PacketLayout, PACKET_HOST_BYTES};
use crate::constants::{BYTES_PER_FRAME, FRAMES_PER_PACKET};

/// Pack the six frames at `start_frame` of `ring` into `packet`.
///
/// Samples are copied verbatim. When `audible` is false the frames are
/// consumed but written as silence. A packet whose length is not the
/// layout's exact size is left untouched and moves no frames.
///
/// Returns the number of frames consumed from the ring.
pub fn encode_packet(
    layout: &PacketLayout,
    ring: &[u8],
    start_frame: usize,
    packet: &mut [u8],
    audible: bool,
) -> usize {
    if packet.len() != layout.packet_bytes {
        return 0;
    }

    let mut frames = [0u8; PACKET_HOST_BYTES];
    if audible {
        copy_from_ring(ring, start_frame * BYTES_PER_FRAME, &mut frames);
    }
    layout.pack(&frames, packet);
    FRAMES_PER_PACKET
}

/// Zero a whole outbound payload
pub fn fill_silence(payload: &mut [u8]) {
    payload.fill(0);
}
