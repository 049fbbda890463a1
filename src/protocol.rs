//! Device protocol definitions
//!
//! Channel identities, USB interface/endpoint mapping and the control
//! requests exchanged with the peripheral. Request codes and values are
//! fixed by the device firmware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical streaming channel exposed by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// High-bandwidth playback channel
    GameOut,
    /// Low-bandwidth capture channel
    VoiceIn,
    /// Second playback channel sharing the game wire format
    VoiceOut,
}

impl ChannelKind {
    /// All channels in device order
    pub const ALL: [ChannelKind; 3] = [ChannelKind::GameOut, ChannelKind::VoiceIn, ChannelKind::VoiceOut];

    /// Index into the device's channel array
    pub fn index(self) -> usize {
        match self {
            ChannelKind::GameOut => 0,
            ChannelKind::VoiceIn => 1,
            ChannelKind::VoiceOut => 2,
        }
    }

    /// The only direction this channel accepts
    pub fn direction(self) -> Direction {
        match self {
            ChannelKind::GameOut | ChannelKind::VoiceOut => Direction::Playback,
            ChannelKind::VoiceIn => Direction::Capture,
        }
    }

    /// Streaming interface number
    pub fn interface(self) -> u8 {
        match self {
            ChannelKind::GameOut | ChannelKind::VoiceOut => interface::PLAYBACK,
            ChannelKind::VoiceIn => interface::CAPTURE,
        }
    }

    /// Isochronous endpoint address
    pub fn endpoint(self) -> u8 {
        match self {
            ChannelKind::GameOut | ChannelKind::VoiceOut => endpoint::PLAYBACK_OUT,
            ChannelKind::VoiceIn => endpoint::CAPTURE_IN,
        }
    }

    /// Whether first preparation sends sampling-frequency requests.
    ///
    /// Voice-Out only cycles alternate settings; the reference capture of
    /// the vendor driver never shows a rate request for it.
    pub fn carries_rate_control(self) -> bool {
        !matches!(self, ChannelKind::VoiceOut)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::GameOut => "Game",
            ChannelKind::VoiceIn => "Voice In",
            ChannelKind::VoiceOut => "Voice Out",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stream direction as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Playback,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Playback => f.write_str("playback"),
            Direction::Capture => f.write_str("capture"),
        }
    }
}

/// Host sample container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 32-bit little-endian container
    S32Le,
    /// Signed 24-bit in a 32-bit container
    S24Le,
    /// Signed 16-bit little-endian
    S16Le,
    /// 32-bit float
    F32Le,
}

/// Peripheral identity
pub const VENDOR_ID: u16 = 0x0499;
pub const PRODUCT_ID: u16 = 0x1513;

/// Streaming interface numbers
pub mod interface {
    pub const PLAYBACK: u8 = 1;
    pub const CAPTURE: u8 = 2;
}

/// Alternate settings of the streaming interfaces
pub mod alt {
    /// Zero-bandwidth setting
    pub const IDLE: u8 = 0;
    /// Streaming setting
    pub const ACTIVE: u8 = 1;
}

/// Isochronous endpoint addresses
pub mod endpoint {
    pub const PLAYBACK_OUT: u8 = 0x01;
    pub const CAPTURE_IN: u8 = 0x81;
}

/// bmRequestType bits
pub mod request_type {
    pub const DIR_OUT: u8 = 0x00;
    pub const DIR_IN: u8 = 0x80;
    pub const TYPE_CLASS: u8 = 0x20;
    pub const TYPE_VENDOR: u8 = 0x40;
    pub const RECIP_DEVICE: u8 = 0x00;
    pub const RECIP_INTERFACE: u8 = 0x01;
}

/// Audio class request codes and selectors
pub mod uac2 {
    /// CUR attribute; direction selects SET or GET
    pub const CUR: u8 = 0x01;
    /// SAM_FREQ_CONTROL selector in the high byte of wValue
    pub const SAMPLING_FREQ_CONTROL: u16 = 0x0100;
    /// Clock source entity 1 on interface 0
    pub const CLOCK_SOURCE_INDEX: u16 = 0x0100;
}

/// A single control-pipe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    pub fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    /// Vendor device-to-host read
    pub fn vendor_read(request: u8, value: u16, length: u16) -> Self {
        Self::new(
            request_type::DIR_IN | request_type::TYPE_VENDOR | request_type::RECIP_DEVICE,
            request,
            value,
            0,
            length,
        )
    }

    /// Vendor zero-length host-to-device write addressed to an interface
    pub fn vendor_commit() -> Self {
        Self::new(
            request_type::DIR_OUT | request_type::TYPE_VENDOR | request_type::RECIP_INTERFACE,
            0x00,
            0,
            0,
            0,
        )
    }

    /// Class SET_CUR on the sampling frequency control
    pub fn set_sampling_freq() -> Self {
        Self::new(
            request_type::DIR_OUT | request_type::TYPE_CLASS | request_type::RECIP_INTERFACE,
            uac2::CUR,
            uac2::SAMPLING_FREQ_CONTROL,
            uac2::CLOCK_SOURCE_INDEX,
            4,
        )
    }

    /// Class GET_CUR on the sampling frequency control
    pub fn get_sampling_freq() -> Self {
        Self::new(
            request_type::DIR_IN | request_type::TYPE_CLASS | request_type::RECIP_INTERFACE,
            uac2::CUR,
            uac2::SAMPLING_FREQ_CONTROL,
            uac2::CLOCK_SOURCE_INDEX,
            4,
        )
    }

    pub fn is_in(&self) -> bool {
        self.request_type & request_type::DIR_IN != 0
    }

    pub fn is_vendor(&self) -> bool {
        self.request_type & 0x60 == request_type::TYPE_VENDOR
    }

    pub fn is_class(&self) -> bool {
        self.request_type & 0x60 == request_type::TYPE_CLASS
    }
}

/// Vendor reads that wake the device out of standby, in capture order
pub const WAKE_PROBES: [ControlRequest; 5] = [
    ControlRequest { request_type: 0xc0, request: 0x07, value: 0x0000, index: 0, length: 3 },
    ControlRequest { request_type: 0xc0, request: 0x04, value: 0x0000, index: 0, length: 1 },
    ControlRequest { request_type: 0xc0, request: 0x0a, value: 0x0000, index: 0, length: 4 },
    ControlRequest { request_type: 0xc0, request: 0x0c, value: 0x8000, index: 0, length: 72 },
    ControlRequest { request_type: 0xc0, request: 0x0c, value: 0x0000, index: 0, length: 72 },
];

/// Vendor reads preceding the commit write
pub const COMMIT_READS: [ControlRequest; 3] = [
    ControlRequest { request_type: 0xc0, request: 0x02, value: 0x0002, index: 0, length: 1 },
    ControlRequest { request_type: 0xc0, request: 0x02, value: 0x0001, index: 0, length: 1 },
    ControlRequest { request_type: 0xc0, request: 0x08, value: 0x0000, index: 0, length: 1 },
];

/// Largest data stage used by the handshake
pub const MAX_CONTROL_DATA: usize = 72;
