//! Notifications from the completion path to the host
//!
//! Both callbacks are invoked from the completion path and must return
//! without blocking.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::ChannelKind;

/// Host audio subsystem callbacks
pub trait HostEvents: Send + Sync {
    /// A period boundary was crossed
    fn period_elapsed(&self, kind: ChannelKind);

    /// Streaming broke down while running; the host must restart
    fn stop_xrun(&self, kind: ChannelKind);
}

/// Event delivered through an [`EventQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostEvent {
    PeriodElapsed(ChannelKind),
    XRun(ChannelKind),
}

/// Bounded, non-blocking event queue
pub struct EventQueue {
    tx: Sender<HostEvent>,
    rx: Receiver<HostEvent>,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Receiver handle for consumers on other threads
    pub fn receiver(&self) -> Receiver<HostEvent> {
        self.rx.clone()
    }

    pub fn try_next(&self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<HostEvent> {
        self.rx.try_iter().collect()
    }

    /// Events lost because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn push(&self, event: HostEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl HostEvents for EventQueue {
    fn period_elapsed(&self, kind: ChannelKind) {
        self.push(HostEvent::PeriodElapsed(kind));
    }

    fn stop_xrun(&self, kind: ChannelKind) {
        self.push(HostEvent::XRun(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_delivers_in_order() {
        let queue = EventQueue::new(4);
        queue.period_elapsed(ChannelKind::GameOut);
        queue.stop_xrun(ChannelKind::VoiceIn);

        assert_eq!(
            queue.drain(),
            vec![HostEvent::PeriodElapsed(ChannelKind::GameOut), HostEvent::XRun(ChannelKind::VoiceIn)]
        );
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn test_receiver_consumes_on_another_thread() {
        let queue = EventQueue::new(16);
        let rx = queue.receiver();
        let consumer = std::thread::spawn(move || rx.recv().ok());

        queue.stop_xrun(ChannelKind::VoiceOut);
        assert_eq!(consumer.join().unwrap(), Some(HostEvent::XRun(ChannelKind::VoiceOut)));
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let queue = EventQueue::new(1);
        queue.period_elapsed(ChannelKind::GameOut);
        queue.period_elapsed(ChannelKind::GameOut);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain().len(), 1);
    }
}
