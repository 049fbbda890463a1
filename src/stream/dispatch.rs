//! Completion dispatcher
//!
//! Runs on the transport's completion path for every finished transfer.
//! Nothing here blocks or sleeps: the hot lock is a spin lock held for one
//! packet copy at a time, host notifications go out after it is released,
//! and returned descriptors are parked in a lock-free queue for the cleanup
//! worker to free.

use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use super::channel::Channel;
use crate::audio::{HostStream, StreamState};
use crate::codec::{decode_packet, encode_packet, fill_silence};
use crate::transport::{CompletionHandler, CompletionStatus, SubmitError, Transfer};

/// Routes completions to the owning channel by the kind tag in the id
pub struct CompletionRouter {
    channels: [Weak<Channel>; 3],
}

impl CompletionRouter {
    pub fn new<'a>(channels: impl IntoIterator<Item = &'a Arc<Channel>>) -> Self {
        let mut slots = [Weak::new(), Weak::new(), Weak::new()];
        for channel in channels {
            slots[channel.kind().index()] = Arc::downgrade(channel);
        }
        Self { channels: slots }
    }
}

impl CompletionHandler for CompletionRouter {
    fn on_complete(&self, transfer: Box<Transfer>, status: CompletionStatus) {
        let kind = transfer.id().kind;
        match self.channels[kind.index()].upgrade() {
            Some(channel) => channel.complete(transfer, status),
            None => trace!("{} completion with no channel, dropped", transfer.id()),
        }
    }
}

impl Channel {
    /// Handle one finished transfer
    pub(crate) fn complete(&self, mut transfer: Box<Transfer>, status: CompletionStatus) {
        self.stats.completion();
        let id = transfer.id();

        let (owned, stream) = {
            let hot = self.hot.lock();
            (hot.owns(id), hot.stream.clone())
        };
        if !owned {
            self.stats.stale();
            trace!("{} is stale, handing to cleanup", id);
            self.retire(transfer);
            return;
        }
        if status.is_terminal() {
            trace!("{} ended ({:?})", id, status);
            self.retire(transfer);
            return;
        }
        if let CompletionStatus::Error(e) = status {
            self.stats.transient_error();
            warn!("{} completed with error: {}", id, e);
        }

        // errored transfers carry no usable audio; keep the slot scheduled
        let running = match status {
            CompletionStatus::Error(_) => None,
            _ => stream.as_ref().filter(|s| s.is_running()),
        };
        let elapsed = match running {
            Some(stream) => self.transfer_frames(&mut transfer, stream),
            None => {
                if !transfer.is_in() {
                    fill_silence(transfer.buffer_mut());
                }
                false
            }
        };

        if elapsed {
            self.stats.period();
            self.events.period_elapsed(self.kind);
        }

        transfer.reset_packets();
        self.resubmit(transfer, stream.as_ref());
    }

    /// Run the codec over every packet; returns true when a period elapsed
    fn transfer_frames(&self, transfer: &mut Transfer, stream: &Arc<HostStream>) -> bool {
        let inbound = transfer.is_in();
        let mut elapsed = false;
        let mut skipped = 0;
        let mut moved = 0;

        for index in 0..transfer.packet_count() {
            let mut hot = self.hot.lock();
            // reconfigured underneath us
            if !hot.stream.as_ref().map_or(false, |s| Arc::ptr_eq(s, stream)) {
                break;
            }

            let start = hot.ring.position();
            let frames = if inbound {
                let packet = transfer.received(index);
                stream.with_area(|area| decode_packet(self.layout, packet, area, start))
            } else {
                let audible = hot.audible;
                let packet = transfer.packet_mut(index);
                stream.with_area(|area| encode_packet(self.layout, area, start, packet, audible))
            };

            if frames == 0 {
                skipped += 1;
                continue;
            }
            elapsed |= hot.ring.advance(frames);
            moved += frames;
        }

        if skipped > 0 {
            self.stats.skipped(skipped);
        }
        self.stats.moved(moved);
        elapsed
    }

    fn resubmit(&self, transfer: Box<Transfer>, stream: Option<&Arc<HostStream>>) {
        let id = transfer.id();
        if !self.hot.lock().owns(id) {
            self.retire(transfer);
            return;
        }
        let transport = match self.transport.get() {
            Ok(transport) => transport,
            Err(_) => {
                self.retire(transfer);
                return;
            }
        };

        if let Err(SubmitError { error, transfer }) = transport.submit(transfer) {
            self.stats.resubmit_failure();
            self.retire(transfer);
            match stream {
                Some(stream) if stream.is_running() => {
                    warn!("{} resubmit failed while running: {}", id, error);
                    stream.set_state(StreamState::XRun);
                    self.stats.xrun();
                    self.events.stop_xrun(self.kind);
                }
                _ => warn!("{} resubmit failed: {}", id, error),
            }
        }
    }

    /// Park a descriptor that left the schedule
    pub(super) fn retire(&self, transfer: Box<Transfer>) {
        if let Err(transfer) = self.retired.push(transfer) {
            trace!("retired queue full, releasing {} inline", transfer.id());
        }
    }

    /// Release every parked descriptor; returns how many there were
    pub(super) fn drain_retired(&self) -> usize {
        let mut released = 0;
        while self.retired.pop().is_some() {
            released += 1;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::HostEvent;
    use crate::codec::{samples_from_frames, PLAYBACK_LAYOUT};
    use crate::error::TransportError;
    use crate::protocol::ChannelKind;
    use crate::stream::harness::{rig, test_config};
    use crate::stream::{HwParams, Trigger};

    fn periods(events: &[HostEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, HostEvent::PeriodElapsed(_)))
            .count()
    }

    #[test]
    fn test_position_after_100_completions() {
        let rig = rig(ChannelKind::GameOut, test_config(16));
        rig.start(HwParams::new(48000, 192, 768));

        assert_eq!(rig.sim.pump_n(100), 100);
        assert_eq!(rig.channel.position(), (100 * 6) % 768);
        assert_eq!(rig.sim.in_flight(), 16);
    }

    #[test]
    fn test_period_elapsed_every_32_completions() {
        let rig = rig(ChannelKind::GameOut, test_config(4));
        rig.start(HwParams::new(48000, 192, 768));

        rig.sim.pump_n(31);
        assert_eq!(periods(&rig.events.drain()), 0);
        rig.sim.pump();
        assert_eq!(rig.events.drain(), vec![HostEvent::PeriodElapsed(ChannelKind::GameOut)]);
        rig.sim.pump_n(64);
        assert_eq!(periods(&rig.events.drain()), 2);
    }

    #[test]
    fn test_outbound_carries_host_samples() {
        let rig = rig(ChannelKind::GameOut, test_config(2));
        let stream = rig.start(HwParams::new(48000, 192, 384));
        let samples: Vec<(i32, i32)> = (0..12).map(|i| (i + 1, -(i + 1))).collect();
        stream.write_samples(0, &samples);

        // first completions carry the silent initial buffers and fill the next ones
        rig.sim.pump_n(2);
        let played = rig.sim.take_played();
        assert!(played.iter().all(|p| p.iter().all(|&b| b == 0)));

        rig.sim.pump_n(2);
        let played = rig.sim.take_played();
        assert_eq!(played.len(), 2);
        let mut decoded = Vec::new();
        for packet in &played {
            for frame in 0..6 {
                let at = PLAYBACK_LAYOUT.frame_offset(frame);
                decoded.extend(samples_from_frames(&packet[at..at + 8]));
            }
        }
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_inbound_fills_host_ring() {
        let rig = rig(ChannelKind::VoiceIn, test_config(2));
        let stream = rig.start(HwParams::new(48000, 48, 96));

        rig.sim.pump_n(2);
        assert_eq!(rig.channel.position(), 12);
        let expected: Vec<(i32, i32)> = (0..12).map(|n| (n, -n)).collect();
        assert_eq!(stream.read_samples(0, 12), expected);
    }

    #[test]
    fn test_short_capture_packets_are_skipped() {
        let rig = rig(ChannelKind::VoiceIn, test_config(2));
        rig.start(HwParams::new(48000, 48, 96));
        rig.sim.set_faults(|f| f.capture_length = Some(100));

        rig.sim.pump_n(3);
        assert_eq!(rig.channel.position(), 0);
        assert_eq!(rig.channel.stats().skipped_packets, 3);
    }

    #[test]
    fn test_not_running_sends_silence_and_holds_cursor() {
        let rig = rig(ChannelKind::GameOut, test_config(2));
        let stream = rig.start(HwParams::new(48000, 192, 384));
        stream.write_samples(0, &vec![(7, 7); 384]);
        rig.sim.pump_n(2);

        rig.channel.trigger(Trigger::Stop).unwrap();
        rig.sim.take_played();
        // buffers filled while running still go out once
        rig.sim.pump_n(2);
        assert!(rig.sim.take_played().iter().all(|p| p.iter().any(|&b| b != 0)));

        rig.sim.pump_n(2);
        assert!(rig.sim.take_played().iter().all(|p| p.iter().all(|&b| b == 0)));
        assert_eq!(rig.channel.position(), 12);
        assert_eq!(rig.sim.in_flight(), 2);
    }

    #[test]
    fn test_muted_while_running_consumes_silently() {
        let rig = rig(ChannelKind::GameOut, test_config(2));
        let stream = rig.start(HwParams::new(48000, 192, 384));
        stream.write_samples(0, &vec![(7, 7); 384]);
        rig.channel.hot.lock().audible = false;

        rig.sim.pump_n(4);
        assert!(rig.sim.take_played().iter().all(|p| p.iter().all(|&b| b == 0)));
        assert_eq!(rig.channel.position(), 24);
    }

    #[test]
    fn test_terminal_status_is_not_resubmitted() {
        let rig = rig(ChannelKind::GameOut, test_config(4));
        rig.start(HwParams::default());

        rig.sim.complete_next(CompletionStatus::Shutdown);
        assert_eq!(rig.sim.in_flight(), 3);
        assert_eq!(rig.sim.submissions(), 4);
    }

    #[test]
    fn test_transient_error_is_resubmitted() {
        let rig = rig(ChannelKind::GameOut, test_config(4));
        rig.start(HwParams::default());

        rig.sim.complete_next(CompletionStatus::Error(TransportError::Protocol(-71)));
        assert_eq!(rig.channel.position(), 0);
        rig.sim.complete_next(CompletionStatus::Partial);
        assert_eq!(rig.sim.in_flight(), 4);
        assert_eq!(rig.channel.stats().transient_errors, 1);
        assert_eq!(rig.channel.position(), 6);
    }

    #[test]
    fn test_errored_transfer_moves_no_audio() {
        let rig = rig(ChannelKind::GameOut, test_config(2));
        let stream = rig.start(HwParams::new(48000, 192, 384));
        stream.write_samples(0, &vec![(7, 7); 384]);
        rig.sim.pump_n(2);
        rig.sim.take_played();

        rig.sim.complete_next(CompletionStatus::Error(TransportError::Protocol(-18)));
        assert_eq!(rig.channel.position(), 12);
        assert_eq!(rig.channel.stats().frames, 12);

        // the re-armed slot goes out silent instead of replaying stale audio
        rig.sim.pump();
        rig.sim.pump();
        let played = rig.sim.take_played();
        assert_eq!(played.len(), 2);
        assert!(played[1].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_errored_capture_packets_are_skipped() {
        let rig = rig(ChannelKind::VoiceIn, test_config(2));
        rig.start(HwParams::new(48000, 48, 96));
        rig.sim.set_faults(|f| f.capture_error = Some(TransportError::Protocol(-84)));

        rig.sim.pump_n(2);
        assert_eq!(rig.channel.position(), 0);
        assert_eq!(rig.channel.stats().skipped_packets, 2);

        rig.sim.set_faults(|f| f.capture_error = None);
        rig.sim.pump_n(2);
        assert_eq!(rig.channel.position(), 12);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let rig = rig(ChannelKind::GameOut, test_config(4));
        rig.start(HwParams::default());
        let submissions = rig.sim.submissions();

        // pool identities move on; everything in flight is now stale
        {
            let mut hot = rig.channel.hot.lock();
            hot.generation = hot.generation.wrapping_add(1);
        }
        rig.sim.pump_n(4);

        assert_eq!(rig.sim.in_flight(), 0);
        assert_eq!(rig.sim.submissions(), submissions);
        assert_eq!(rig.channel.stats().stale, 4);
        assert_eq!(rig.channel.position(), 0);
    }

    #[test]
    fn test_resubmit_failure_while_running_signals_xrun() {
        let rig = rig(ChannelKind::GameOut, test_config(4));
        let stream = rig.start(HwParams::default());
        rig.sim.set_faults(|f| f.fail_all_submits = true);

        rig.sim.pump();
        assert_eq!(stream.state(), StreamState::XRun);
        assert_eq!(rig.events.drain(), vec![HostEvent::XRun(ChannelKind::GameOut)]);

        // no longer running: reported, not signalled again
        rig.sim.pump();
        assert!(rig.events.drain().is_empty());
        assert_eq!(rig.channel.stats().resubmit_failures, 2);
        assert_eq!(rig.channel.stats().xruns, 1);
    }
}
