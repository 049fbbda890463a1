//! Error types for the streaming core

use thiserror::Error;

use crate::protocol::{ChannelKind, Direction};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the caller may retry once cleanup has finished
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::Busy(_)))
    }

    /// True when the device has been detached
    pub fn is_device_absent(&self) -> bool {
        matches!(
            self,
            Error::Channel(ChannelError::DeviceAbsent) | Error::Transport(TransportError::NoDevice)
        )
    }
}

/// Control-path errors raised by the channel state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Device is not attached")]
    DeviceAbsent,

    #[error("{kind} channel does not support {requested}")]
    DirectionMismatch { kind: ChannelKind, requested: Direction },

    #[error("{0} channel is already open")]
    AlreadyOpen(ChannelKind),

    #[error("{0} channel is busy")]
    Busy(ChannelKind),

    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Out of memory while building transfer pool")]
    OutOfMemory,

    #[error("{0} channel is not open")]
    NotOpen(ChannelKind),

    #[error("{kind} channel cannot {operation} while {state}")]
    InvalidState {
        kind: ChannelKind,
        operation: &'static str,
        state: &'static str,
    },

    #[error("Device {0} is already attached")]
    AlreadyAttached(String),
}

/// Errors reported by the USB transport
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("No such device")]
    NoDevice,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Timed out")]
    Timeout,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Transport shutting down")]
    Shutdown,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Protocol error (code {0})")]
    Protocol(i32),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let busy: Error = ChannelError::Busy(ChannelKind::GameOut).into();
        assert!(busy.is_busy());
        assert!(!busy.is_device_absent());

        let absent: Error = TransportError::NoDevice.into();
        assert!(absent.is_device_absent());
    }

    #[test]
    fn test_error_messages() {
        let err = ChannelError::DirectionMismatch {
            kind: ChannelKind::VoiceIn,
            requested: Direction::Playback,
        };
        assert_eq!(err.to_string(), "Voice In channel does not support playback");
    }
}
