//! Sample-rate negotiation handshake
//!
//! Runs once per channel, on its first prepare, in the blocking control
//! path. The peripheral only unlocks its streaming endpoints after this
//! exact exchange:
//!
//! ```text
//!  wake probes (vendor IN) ─▶ alt 0 on both interfaces
//!    ─▶ SET_CUR / GET_CUR  (up to `attempts`, `retry_delay` apart)
//!    ─▶ commit reads + zero-length vendor write
//!    ─▶ alt 1 on both interfaces ─▶ settle delay
//! ```
//!
//! Individual step failures are logged and tolerated. The device's GET_CUR
//! answer is authoritative over the requested rate.

use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::constants::{DEFAULT_SAMPLE_RATE, VOICE_IN_RATES};
use crate::error::TransportError;
use crate::protocol::{alt, interface, ChannelKind, ControlRequest, COMMIT_READS, MAX_CONTROL_DATA, WAKE_PROBES};
use crate::transport::Transport;

/// Outcome of one full handshake at a single rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateReport {
    pub requested: u32,
    /// Last rate the device reported, if any read-back succeeded
    pub reported: Option<u32>,
    pub attempts: u32,
}

impl RateReport {
    pub fn verified(&self) -> bool {
        self.reported == Some(self.requested)
    }
}

/// Rate a channel ends up with after first-prepare negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Negotiated {
    pub rate: u32,
    /// Device read-back matched the requested rate
    pub confirmed: bool,
}

/// Drives the handshake over a transport
pub struct Negotiator<'a> {
    transport: &'a dyn Transport,
    config: &'a NegotiationConfig,
}

impl<'a> Negotiator<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a NegotiationConfig) -> Self {
        Self { transport, config }
    }

    /// First-prepare negotiation for `kind`.
    ///
    /// Game-Out and Voice-In negotiate at `current` when it is a supported
    /// rate, otherwise at the default rate; a failed handshake is retried
    /// once at the default rate, after which the last reported rate wins.
    /// Voice-Out never sends rate requests and only cycles alt settings.
    pub fn negotiate(&self, kind: ChannelKind, current: Option<u32>) -> Negotiated {
        if !kind.carries_rate_control() {
            info!("{} - skipping sample rate control", kind);
            self.cycle_voice_out();
            return Negotiated {
                rate: DEFAULT_SAMPLE_RATE,
                confirmed: false,
            };
        }

        let target = match current {
            Some(rate) if VOICE_IN_RATES.contains(&rate) => rate,
            _ => self.config.default_rate,
        };

        let first = self.set_rate(target);
        if first.verified() {
            return Negotiated {
                rate: target,
                confirmed: true,
            };
        }

        warn!(
            "Rate handshake at {} Hz not confirmed, falling back to {} Hz",
            target, self.config.default_rate
        );
        let second = self.set_rate(self.config.default_rate);
        if second.verified() {
            return Negotiated {
                rate: self.config.default_rate,
                confirmed: true,
            };
        }

        let rate = second
            .reported
            .or(first.reported)
            .unwrap_or(self.config.default_rate);
        warn!("Rate negotiation failed, proceeding at {} Hz", rate);
        Negotiated {
            rate,
            confirmed: false,
        }
    }

    /// Full handshake at `rate`
    pub fn set_rate(&self, rate: u32) -> RateReport {
        info!("Starting rate handshake for {} Hz", rate);
        let timeout = self.config.control_timeout();

        self.wake();
        self.set_both_interfaces(alt::IDLE);

        let attempts = self.config.attempts.max(1);
        let mut reported = None;
        let mut made = 0;
        for attempt in 1..=attempts {
            made = attempt;
            let mut data = rate.to_le_bytes();
            match self
                .transport
                .control(ControlRequest::set_sampling_freq(), &mut data, timeout)
            {
                Ok(_) => debug!("Attempt {}: rate request sent", attempt),
                Err(e) => warn!("Attempt {}: failed to set rate: {}", attempt, e),
            }

            match self.read_rate(timeout) {
                Ok(device_rate) if device_rate == rate => {
                    reported = Some(device_rate);
                    info!("Verified device rate {} Hz", device_rate);
                    break;
                }
                Ok(device_rate) => {
                    reported = Some(device_rate);
                    warn!(
                        "Attempt {}: device reported {} Hz, requested {} Hz",
                        attempt, device_rate, rate
                    );
                }
                Err(e) => warn!("Attempt {}: failed to read back rate: {}", attempt, e),
            }

            if attempt < attempts {
                debug!("Retrying rate set (attempt {}/{})", attempt + 1, attempts);
                thread::sleep(self.config.retry_delay());
            }
        }

        self.commit();
        self.set_both_interfaces(alt::ACTIVE);
        thread::sleep(self.config.settle_delay());

        RateReport {
            requested: rate,
            reported,
            attempts: made,
        }
    }

    /// Read the device's current sampling frequency (GET_CUR)
    pub fn read_rate(&self, timeout: Duration) -> Result<u32, TransportError> {
        let mut data = [0u8; 4];
        let n = self
            .transport
            .control(ControlRequest::get_sampling_freq(), &mut data, timeout)?;
        if n != data.len() {
            return Err(TransportError::ShortTransfer {
                expected: data.len(),
                actual: n,
            });
        }
        Ok(u32::from_le_bytes(data))
    }

    /// Voice-Out activation: capture idle, playback active, capture active
    pub fn cycle_voice_out(&self) {
        for (iface, setting) in [
            (interface::CAPTURE, alt::IDLE),
            (interface::PLAYBACK, alt::ACTIVE),
            (interface::CAPTURE, alt::ACTIVE),
        ] {
            if let Err(e) = self.transport.set_interface(iface, setting) {
                warn!("Interface {} alt {} failed: {}", iface, setting, e);
            }
        }
    }

    fn wake(&self) {
        for request in WAKE_PROBES {
            self.vendor_read(request);
        }
    }

    fn commit(&self) {
        debug!("Committing rate configuration");
        for request in COMMIT_READS {
            self.vendor_read(request);
        }
        if let Err(e) =
            self.transport
                .control(ControlRequest::vendor_commit(), &mut [], self.config.control_timeout())
        {
            warn!("Commit write failed: {}", e);
        }
    }

    fn vendor_read(&self, request: ControlRequest) {
        let mut data = [0u8; MAX_CONTROL_DATA];
        let len = (request.length as usize).min(MAX_CONTROL_DATA);
        if let Err(e) = self
            .transport
            .control(request, &mut data[..len], self.config.control_timeout())
        {
            debug!("Vendor request {:#04x} failed: {}", request.request, e);
        }
    }

    fn set_both_interfaces(&self, setting: u8) {
        for iface in [interface::PLAYBACK, interface::CAPTURE] {
            if let Err(e) = self.transport.set_interface(iface, setting) {
                warn!("Interface {} alt {} failed: {}", iface, setting, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::SimTransport;

    fn count(sim: &SimTransport, request: ControlRequest) -> usize {
        sim.control_log().iter().filter(|r| **r == request).count()
    }

    #[test]
    fn test_handshake_sequence() {
        let sim = SimTransport::new("sim");
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::GameOut, None);

        assert_eq!(result, Negotiated { rate: 48000, confirmed: true });

        let log = sim.control_log();
        assert_eq!(log.len(), 5 + 2 + 3 + 1);
        assert_eq!(&log[..5], &WAKE_PROBES[..]);
        assert_eq!(log[5], ControlRequest::set_sampling_freq());
        assert_eq!(log[6], ControlRequest::get_sampling_freq());
        assert_eq!(&log[7..10], &COMMIT_READS[..]);
        assert_eq!(log[10], ControlRequest::vendor_commit());

        assert_eq!(sim.interface_log(), vec![(1, 0), (2, 0), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_negotiates_at_current_capture_rate() {
        let sim = SimTransport::new("sim");
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::VoiceIn, Some(16000));

        assert_eq!(result.rate, 16000);
        assert!(result.confirmed);
        assert_eq!(sim.rate(), 16000);
    }

    #[test]
    fn test_unsupported_current_rate_uses_default() {
        let sim = SimTransport::new("sim");
        sim.set_rate(16000);
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::GameOut, Some(44100));

        assert_eq!(result.rate, 48000);
        assert_eq!(sim.rate(), 48000);
    }

    #[test]
    fn test_mismatched_readback_is_authoritative() {
        let sim = SimTransport::new("sim");
        sim.set_faults(|f| f.readback_rate = Some(44100));
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::GameOut, Some(48000));

        assert_eq!(result, Negotiated { rate: 44100, confirmed: false });
        // three attempts at the requested rate, three more after fallback
        assert_eq!(count(&sim, ControlRequest::set_sampling_freq()), 6);
        assert_eq!(count(&sim, ControlRequest::vendor_commit()), 2);
    }

    #[test]
    fn test_failed_readback_proceeds_at_default() {
        let sim = SimTransport::new("sim");
        sim.set_faults(|f| {
            f.readback_fails = true;
            f.set_rate_fails = true;
        });
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::VoiceIn, Some(16000));

        assert_eq!(result, Negotiated { rate: 48000, confirmed: false });
        assert_eq!(count(&sim, ControlRequest::get_sampling_freq()), 6);
    }

    #[test]
    fn test_voice_out_sends_no_rate_requests() {
        let sim = SimTransport::new("sim");
        let config = NegotiationConfig::immediate();
        let result = Negotiator::new(&sim, &config).negotiate(ChannelKind::VoiceOut, Some(16000));

        assert_eq!(result.rate, 48000);
        assert!(sim.control_log().is_empty());
        assert_eq!(sim.interface_log(), vec![(2, 0), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_read_rate() {
        let sim = SimTransport::new("sim");
        sim.set_rate(16000);
        let config = NegotiationConfig::immediate();
        let rate = Negotiator::new(&sim, &config)
            .read_rate(config.readback_timeout())
            .unwrap();
        assert_eq!(rate, 16000);
    }
}
