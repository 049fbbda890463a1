//! Ring position tracking
//!
//! The cursor counts frames moved since the stream was last reset and only
//! ever grows; buffer addressing uses it modulo the buffer size.

/// Cursor and geometry of one channel's host ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingState {
    cursor: u64,
    buffer_frames: usize,
    period_frames: usize,
}

impl RingState {
    pub fn new(buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            cursor: 0,
            buffer_frames,
            period_frames,
        }
    }

    /// Change geometry without touching the cursor
    pub fn configure(&mut self, buffer_frames: usize, period_frames: usize) {
        self.buffer_frames = buffer_frames;
        self.period_frames = period_frames;
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    /// Ring frame index `offset` frames past the cursor
    pub fn frame_at(&self, offset: usize) -> usize {
        if self.buffer_frames == 0 {
            return 0;
        }
        ((self.cursor + offset as u64) % self.buffer_frames as u64) as usize
    }

    /// Position within the buffer, as reported to the host
    pub fn position(&self) -> usize {
        self.frame_at(0)
    }

    /// Advance by `frames`; returns true when a period boundary was reached
    pub fn advance(&mut self, frames: usize) -> bool {
        if frames == 0 {
            return false;
        }
        let before = self.cursor;
        self.cursor += frames as u64;
        if self.period_frames == 0 {
            return false;
        }
        let period = self.period_frames as u64;
        before / period != self.cursor / period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_period_every_32_packets() {
        let mut ring = RingState::new(768, 192);
        let mut elapsed = Vec::new();
        for completion in 1..=96 {
            if ring.advance(6) {
                elapsed.push(completion);
            }
        }
        assert_eq!(elapsed, vec![32, 64, 96]);
    }

    #[test]
    fn test_position_wraps() {
        let mut ring = RingState::new(768, 192);
        for _ in 0..100 {
            ring.advance(6);
        }
        assert_eq!(ring.cursor(), 600);
        assert_eq!(ring.position(), 600);
        for _ in 0..100 {
            ring.advance(6);
        }
        assert_eq!(ring.position(), 1200 % 768);
    }

    #[test]
    fn test_unconfigured_ring_reports_zero() {
        let mut ring = RingState::default();
        assert!(!ring.advance(6));
        assert_eq!(ring.position(), 0);
    }

    #[test]
    fn test_reset_keeps_geometry() {
        let mut ring = RingState::new(384, 192);
        ring.advance(200);
        ring.reset();
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.buffer_frames(), 384);
    }

    proptest! {
        #[test]
        fn prop_cursor_monotonic_and_position_consistent(
            steps in proptest::collection::vec(0usize..400, 1..200),
            periods in 2usize..16,
        ) {
            let period = 192;
            let mut ring = RingState::new(period * periods, period);
            let mut last = 0u64;
            for step in steps {
                let elapsed = ring.advance(step);
                prop_assert!(ring.cursor() >= last);
                prop_assert_eq!(ring.position() as u64, ring.cursor() % (period * periods) as u64);
                prop_assert_eq!(elapsed, last / period as u64 != ring.cursor() / period as u64);
                last = ring.cursor();
            }
        }
    }
}
