//! Per-channel streaming engine
//!
//! A [`Channel`] owns one transfer pool, one host ring cursor and the state
//! machine the host drives through open / configure / prepare / trigger /
//! close. Completions reach it through a [`CompletionRouter`].

pub mod channel;
mod cleanup;
mod dispatch;
mod params;
mod pool;
pub mod stats;

pub use channel::{Channel, ChannelState, Trigger};
pub use cleanup::{CleanupQueue, CleanupWorker};
pub use dispatch::CompletionRouter;
pub use params::{Capabilities, HwParams};
pub use stats::{ChannelStats, ChannelStatsSnapshot};

#[cfg(test)]
pub(crate) mod harness {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{Channel, CleanupWorker, CompletionRouter, HwParams, Trigger};
    use crate::audio::{EventQueue, HostStream};
    use crate::config::{NegotiationConfig, StreamConfig};
    use crate::protocol::ChannelKind;
    use crate::transport::sim::SimTransport;
    use crate::transport::{Transport, TransportHandle};

    /// One channel wired to a simulated transport
    pub struct Rig {
        pub channel: Arc<Channel>,
        pub sim: Arc<SimTransport>,
        pub handle: Arc<TransportHandle>,
        pub events: Arc<EventQueue>,
        pub _worker: CleanupWorker,
    }

    /// One packet per transfer so each completion moves exactly six frames
    pub fn test_config(transfers: usize) -> StreamConfig {
        StreamConfig {
            transfers_per_channel: transfers,
            packets_per_transfer: 1,
            negotiation: NegotiationConfig::immediate(),
            cleanup_timeout_ms: 500,
            ..StreamConfig::default()
        }
    }

    pub fn rig(kind: ChannelKind, config: StreamConfig) -> Rig {
        let sim = Arc::new(SimTransport::new("sim-bus-1"));
        let handle = Arc::new(TransportHandle::new(sim.clone()));
        let events = Arc::new(EventQueue::new(4096));
        let worker = CleanupWorker::spawn("test-cleanup").unwrap();
        let channel = Arc::new(Channel::new(
            kind,
            Arc::new(config),
            handle.clone(),
            events.clone(),
            worker.queue(),
        ));
        sim.register(Arc::new(CompletionRouter::new([&channel])));
        Rig {
            channel,
            sim,
            handle,
            events,
            _worker: worker,
        }
    }

    impl Rig {
        pub fn prepare(&self, params: HwParams) -> Arc<HostStream> {
            self.channel.open(self.channel.kind().direction()).unwrap();
            let stream = self.channel.configure(params).unwrap();
            self.channel.prepare().unwrap();
            stream
        }

        pub fn start(&self, params: HwParams) -> Arc<HostStream> {
            let stream = self.prepare(params);
            self.channel.trigger(Trigger::Start).unwrap();
            stream
        }
    }

    /// Poll `condition` for up to two seconds
    pub fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }
}
