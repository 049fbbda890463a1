//! Two-phase pool teardown
//!
//! Phase one runs on the control path and never blocks: it flags the
//! channel, moves the pool identities to a new generation so every
//! outstanding completion is treated as stale, and asks the transport to
//! cancel each transfer. Phase two runs on the cleanup worker thread: it
//! kills each transfer, collects the descriptors the dispatcher parked,
//! releases them and clears the flag. `start` answers Busy in between.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::channel::Channel;
use crate::error::Result;
use crate::transport::TransferId;

/// Descriptors of one torn-down pool awaiting release
pub(crate) struct CleanupJob {
    channel: Arc<Channel>,
    generation: u32,
    count: usize,
}

/// Handle for scheduling phase-two work
#[derive(Clone)]
pub struct CleanupQueue {
    tx: Sender<Option<CleanupJob>>,
}

impl CleanupQueue {
    /// Hand a job to the worker; runs it here if the worker is gone
    fn schedule(&self, job: CleanupJob) {
        if let Err(err) = self.tx.send(Some(job)) {
            if let Some(job) = err.into_inner() {
                debug!("cleanup worker stopped, releasing inline");
                release(job);
            }
        }
    }
}

/// Thread that performs phase two for every channel of a device
pub struct CleanupWorker {
    queue: CleanupQueue,
    handle: Option<JoinHandle<()>>,
}

impl CleanupWorker {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(rx))?;
        Ok(Self {
            queue: CleanupQueue { tx },
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> CleanupQueue {
        self.queue.clone()
    }

    /// Finish the queued jobs, then stop the thread
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.queue.tx.send(None);
            if handle.join().is_err() {
                error!("Cleanup worker panicked");
            }
        }
    }
}

impl Drop for CleanupWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<Option<CleanupJob>>) {
    debug!("Cleanup worker started");
    while let Ok(Some(job)) = rx.recv() {
        release(job);
    }
    debug!("Cleanup worker stopped");
}

/// Phase one. Returns without waiting for any transfer.
pub(super) fn begin(channel: &Arc<Channel>) {
    let kind = channel.kind;
    let (generation, count) = {
        let mut hot = channel.hot.lock();
        if hot.pool_len == 0 {
            return;
        }
        hot.cleanup_in_progress = true;
        let torn_down = (hot.generation, hot.pool_len);
        hot.generation = hot.generation.wrapping_add(1);
        hot.pool_len = 0;
        hot.active_count = 0;
        torn_down
    };

    if let Ok(transport) = channel.transport.get() {
        for slot in 0..count {
            transport.cancel(TransferId {
                kind,
                generation,
                slot: slot as u16,
            });
        }
    }
    info!("{} pool stopping, {} transfers cancelled", kind, count);

    channel.cleanup.schedule(CleanupJob {
        channel: Arc::clone(channel),
        generation,
        count,
    });
}

/// Phase two. Blocks until every descriptor is back or the timeout passes.
fn release(job: CleanupJob) {
    let CleanupJob {
        channel,
        generation,
        count,
    } = job;
    let kind = channel.kind;

    if let Ok(transport) = channel.transport.get() {
        for slot in 0..count {
            transport.kill(TransferId {
                kind,
                generation,
                slot: slot as u16,
            });
        }
    }

    let deadline = Instant::now() + channel.config.cleanup_timeout();
    let mut released = 0;
    loop {
        while let Some(transfer) = channel.retired.pop() {
            if transfer.id().generation == generation {
                released += 1;
            }
        }
        if released >= count || !channel.transport.is_attached() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    if released < count {
        warn!(
            "{} cleanup: {} of {} transfers never came back",
            kind,
            count - released,
            count
        );
    }
    channel.stats.released(released);
    channel.hot.lock().cleanup_in_progress = false;
    info!("{} cleanup complete, {} transfers released", kind, released);
}
