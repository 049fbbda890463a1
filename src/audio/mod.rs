//! Host audio side of the streaming core

pub mod buffer;
pub mod device;
pub mod events;
pub mod position;

pub use buffer::{HostStream, StreamState};
pub use device::{ChannelInfo, Device, DeviceInfo, DeviceRegistry};
pub use events::{EventQueue, HostEvent, HostEvents};
pub use position::RingState;
