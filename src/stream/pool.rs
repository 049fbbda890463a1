//! Transfer pool start-up
//!
//! A pool is `transfers_per_channel` descriptors kept permanently queued on
//! the channel's endpoint; the dispatcher re-arms each one as it completes.
//! Teardown lives in [`super::cleanup`].

use tracing::{debug, info, warn};

use super::channel::Channel;
use crate::error::{ChannelError, Result};
use crate::transport::{SubmitError, TransferId};

/// Build and submit a fresh pool. Succeeds immediately if one is running.
pub(super) fn start(channel: &Channel) -> Result<()> {
    let transport = channel.transport.get()?;
    let kind = channel.kind;
    let count = channel.config.transfers_per_channel;
    let packets = channel.config.packets_per_transfer;

    let generation = {
        let mut hot = channel.hot.lock();
        if hot.active_count > 0 {
            drop(hot);
            debug!("{} pool already running", kind);
            return Ok(());
        }
        if hot.cleanup_in_progress {
            drop(hot);
            warn!("{} pool start rejected, cleanup in progress", kind);
            return Err(ChannelError::Busy(kind).into());
        }
        hot.generation = hot.generation.wrapping_add(1);
        hot.pool_len = count;
        hot.generation
    };

    let mut transfers = Vec::with_capacity(count);
    for slot in 0..count {
        let id = TransferId {
            kind,
            generation,
            slot: slot as u16,
        };
        match transport.allocate(id, kind.endpoint(), channel.layout, packets) {
            Ok(transfer) => transfers.push(transfer),
            Err(e) => {
                warn!("{} pool: allocation of {} failed: {}", kind, id, e);
                abandon(channel);
                return Err(ChannelError::OutOfMemory.into());
            }
        }
    }

    let mut submitted = Vec::with_capacity(count);
    for transfer in transfers {
        let id = transfer.id();
        match transport.submit(transfer) {
            Ok(()) => {
                channel.hot.lock().active_count += 1;
                submitted.push(id);
            }
            Err(SubmitError { error, transfer }) => {
                warn!("{} pool: submit of {} failed: {}", kind, id, error);
                drop(transfer);
                abandon(channel);
                for id in &submitted {
                    transport.kill(*id);
                }
                let released = channel.drain_retired();
                debug!("{} pool: rolled back {} transfers", kind, released);
                return Err(error.into());
            }
        }
    }

    info!(
        "{} pool started: {} transfers x {} packets",
        kind, count, packets
    );
    Ok(())
}

/// Forget the half-built pool; anything still in flight becomes stale
fn abandon(channel: &Channel) {
    let mut hot = channel.hot.lock();
    hot.generation = hot.generation.wrapping_add(1);
    hot.pool_len = 0;
    hot.active_count = 0;
}

#[cfg(test)]
mod tests {
    use crate::error::{ChannelError, Error, TransportError};
    use crate::protocol::ChannelKind;
    use crate::stream::harness::{rig, test_config};
    use crate::stream::{HwParams, Trigger};

    #[test]
    fn test_start_submits_whole_pool() {
        let rig = rig(ChannelKind::VoiceIn, test_config(16));
        rig.sim.set_rate(16000);
        rig.start(HwParams::new(16000, 48, 192));

        assert_eq!(rig.channel.active_count(), 16);
        assert_eq!(rig.sim.in_flight_for(ChannelKind::VoiceIn), 16);
    }

    #[test]
    fn test_submit_failure_rolls_back() {
        let rig = rig(ChannelKind::GameOut, test_config(8));
        rig.prepare(HwParams::default());
        rig.sim.set_faults(|f| f.fail_submit_at = Some(3));

        let err = rig.channel.trigger(Trigger::Start).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::NoDevice)));
        assert_eq!(rig.channel.active_count(), 0);
        assert_eq!(rig.sim.in_flight(), 0);
        assert!(!rig.channel.is_cleanup_in_progress());

        // a later start builds a new pool
        rig.sim.set_faults(|f| f.fail_submit_at = None);
        rig.channel.trigger(Trigger::Start).unwrap();
        assert_eq!(rig.channel.active_count(), 8);
    }

    #[test]
    fn test_allocation_failure_is_out_of_memory() {
        let rig = rig(ChannelKind::GameOut, test_config(8));
        rig.prepare(HwParams::default());
        rig.sim.set_faults(|f| f.fail_allocation_at = Some(5));

        let err = rig.channel.trigger(Trigger::Start).unwrap_err();
        assert!(matches!(err, Error::Channel(ChannelError::OutOfMemory)));
        assert_eq!(rig.sim.submissions(), 0);
        assert_eq!(rig.channel.active_count(), 0);
    }
}
