//! Host buffer constraints and hardware parameters

use serde::{Deserialize, Serialize};

use crate::constants::{
    BYTES_PER_FRAME, CHANNELS, DEFAULT_SAMPLE_RATE, PERIODS_MAX, PERIODS_MIN, PLAYBACK_RATES,
    VOICE_IN_RATES,
};
use crate::error::ChannelError;
use crate::protocol::{ChannelKind, Direction, SampleFormat};

/// Constraints advertised to the host on open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub kind: ChannelKind,
    pub direction: Direction,
    pub rates: Vec<u32>,
    pub channels: u16,
    pub format: SampleFormat,
    pub period_bytes_min: usize,
    pub period_bytes_max: usize,
    pub period_bytes_step: usize,
    pub buffer_bytes_max: usize,
    pub buffer_bytes_step: usize,
    pub periods_min: usize,
    pub periods_max: usize,
}

impl Capabilities {
    pub fn for_kind(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::GameOut | ChannelKind::VoiceOut => Self {
                kind,
                direction: kind.direction(),
                rates: PLAYBACK_RATES.to_vec(),
                channels: CHANNELS,
                format: SampleFormat::S32Le,
                period_bytes_min: 1536,
                period_bytes_max: 12288,
                period_bytes_step: 1536,
                buffer_bytes_max: 49152,
                buffer_bytes_step: 96,
                periods_min: PERIODS_MIN,
                periods_max: PERIODS_MAX,
            },
            ChannelKind::VoiceIn => Self {
                kind,
                direction: kind.direction(),
                rates: VOICE_IN_RATES.to_vec(),
                channels: CHANNELS,
                format: SampleFormat::S32Le,
                period_bytes_min: 48,
                period_bytes_max: 768,
                period_bytes_step: 48,
                buffer_bytes_max: 98304,
                buffer_bytes_step: 48,
                periods_min: PERIODS_MIN,
                periods_max: PERIODS_MAX,
            },
        }
    }

    /// Reject parameters outside the fixed set
    pub fn check(&self, params: &HwParams) -> Result<(), ChannelError> {
        let unsupported = |what: String| Err(ChannelError::UnsupportedParameter(what));

        if !self.rates.contains(&params.rate) {
            return unsupported(format!("{} Hz on {} channel", params.rate, self.kind));
        }
        if params.channels != self.channels {
            return unsupported(format!("{} channels", params.channels));
        }
        if params.format != self.format {
            return unsupported(format!("format {:?}", params.format));
        }

        let period = match params.period_bytes() {
            Some(period) => period,
            None => return unsupported(format!("period of {} frames", params.period_frames)),
        };
        if period < self.period_bytes_min
            || period > self.period_bytes_max
            || period % self.period_bytes_step != 0
        {
            return unsupported(format!("period of {} bytes", period));
        }

        let buffer = match params.buffer_bytes() {
            Some(buffer) => buffer,
            None => return unsupported(format!("buffer of {} frames", params.buffer_frames)),
        };
        if buffer == 0 || buffer > self.buffer_bytes_max || buffer % self.buffer_bytes_step != 0 {
            return unsupported(format!("buffer of {} bytes", buffer));
        }
        if buffer % period != 0 {
            return unsupported(format!(
                "buffer of {} bytes is not a whole number of periods",
                buffer
            ));
        }

        let periods = params.periods();
        if periods < self.periods_min || periods > self.periods_max {
            return unsupported(format!("{} periods", periods));
        }
        Ok(())
    }
}

/// Hardware parameters chosen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    pub rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

impl HwParams {
    /// Stereo S32LE parameters
    pub fn new(rate: u32, period_frames: usize, buffer_frames: usize) -> Self {
        Self {
            rate,
            channels: CHANNELS,
            format: SampleFormat::S32Le,
            period_frames,
            buffer_frames,
        }
    }

    /// None when the frame count does not fit in bytes
    pub fn period_bytes(&self) -> Option<usize> {
        self.period_frames.checked_mul(BYTES_PER_FRAME)
    }

    pub fn buffer_bytes(&self) -> Option<usize> {
        self.buffer_frames.checked_mul(BYTES_PER_FRAME)
    }

    pub fn periods(&self) -> usize {
        if self.period_frames == 0 {
            0
        } else {
            self.buffer_frames / self.period_frames
        }
    }
}

impl Default for HwParams {
    /// 4 ms periods, four periods deep
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, 192, 768)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_fit_playback() {
        let caps = Capabilities::for_kind(ChannelKind::GameOut);
        assert!(caps.check(&HwParams::default()).is_ok());
        assert_eq!(caps.direction, Direction::Playback);
    }

    #[test]
    fn test_steps_align_to_packets() {
        let packet_bytes = 6 * BYTES_PER_FRAME;
        for kind in ChannelKind::ALL {
            let caps = Capabilities::for_kind(kind);
            assert_eq!(caps.period_bytes_step % packet_bytes, 0);
            assert_eq!(caps.buffer_bytes_step % packet_bytes, 0);
        }
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        let game = Capabilities::for_kind(ChannelKind::GameOut);
        let voice = Capabilities::for_kind(ChannelKind::VoiceIn);
        let params = HwParams::new(16000, 192, 768);

        assert!(matches!(game.check(&params), Err(ChannelError::UnsupportedParameter(_))));
        assert!(voice.check(&HwParams::new(16000, 48, 96)).is_ok());
        assert!(voice.check(&HwParams::new(44100, 48, 96)).is_err());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let caps = Capabilities::for_kind(ChannelKind::GameOut);
        // period not a multiple of 1536 bytes
        assert!(caps.check(&HwParams::new(48000, 100, 400)).is_err());
        // one period only
        assert!(caps.check(&HwParams::new(48000, 192, 192)).is_err());
        // buffer too large
        assert!(caps.check(&HwParams::new(48000, 192, 192 * 33)).is_err());
        // buffer not a whole number of periods
        assert!(caps.check(&HwParams::new(48000, 192, 396)).is_err());
    }

    #[test]
    fn test_rejects_oversized_geometry() {
        let caps = Capabilities::for_kind(ChannelKind::GameOut);
        let huge = HwParams::new(48000, usize::MAX / 4, 768);
        assert!(huge.period_bytes().is_none());
        assert!(matches!(caps.check(&huge), Err(ChannelError::UnsupportedParameter(_))));

        // products that would wrap to valid-looking byte counts
        let wrapping = HwParams::new(48000, (1 << 61) + 192, (1 << 63) + 768);
        assert!(matches!(caps.check(&wrapping), Err(ChannelError::UnsupportedParameter(_))));

        let voice = Capabilities::for_kind(ChannelKind::VoiceIn);
        assert!(voice.check(&HwParams::new(48000, 48, usize::MAX)).is_err());
    }

    #[test]
    fn test_rejects_format_and_channels() {
        let caps = Capabilities::for_kind(ChannelKind::VoiceOut);
        let mut params = HwParams::default();
        params.channels = 1;
        assert!(caps.check(&params).is_err());

        let mut params = HwParams::default();
        params.format = SampleFormat::S16Le;
        assert!(caps.check(&params).is_err());
    }
}
