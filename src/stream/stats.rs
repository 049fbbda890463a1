//! Per-channel streaming counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::ChannelKind;

/// Counters updated from the completion path
#[derive(Debug, Default)]
pub struct ChannelStats {
    completions: AtomicU64,
    frames: AtomicU64,
    periods: AtomicU64,
    stale: AtomicU64,
    transient_errors: AtomicU64,
    skipped_packets: AtomicU64,
    resubmit_failures: AtomicU64,
    xruns: AtomicU64,
    released: AtomicU64,
}

impl ChannelStats {
    pub(crate) fn completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn moved(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn period(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skipped(&self, packets: usize) {
        self.skipped_packets.fetch_add(packets as u64, Ordering::Relaxed);
    }

    pub(crate) fn resubmit_failure(&self) {
        self.resubmit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn released(&self, transfers: usize) {
        self.released.fetch_add(transfers as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, kind: ChannelKind) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            kind,
            completions: self.completions.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            periods: self.periods.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            skipped_packets: self.skipped_packets.load(Ordering::Relaxed),
            resubmit_failures: self.resubmit_failures.load(Ordering::Relaxed),
            xruns: self.xruns.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub kind: ChannelKind,
    pub completions: u64,
    pub frames: u64,
    pub periods: u64,
    pub stale: u64,
    pub transient_errors: u64,
    pub skipped_packets: u64,
    pub resubmit_failures: u64,
    pub xruns: u64,
    /// Descriptors released by the cleanup worker
    pub released: u64,
}

impl ChannelStatsSnapshot {
    /// Share of completions that were transient errors
    pub fn error_rate(&self) -> f32 {
        if self.completions == 0 {
            0.0
        } else {
            self.transient_errors as f32 / self.completions as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = ChannelStats::default();
        stats.completion();
        stats.completion();
        stats.transient_error();
        stats.moved(12);

        let snap = stats.snapshot(ChannelKind::VoiceIn);
        assert_eq!(snap.completions, 2);
        assert_eq!(snap.frames, 12);
        assert!((snap.error_rate() - 0.5).abs() < f32::EPSILON);
    }
}
