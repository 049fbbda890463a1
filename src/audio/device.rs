//! Attached peripherals
//!
//! A [`Device`] is created when a ZG01 shows up on the bus and owns its
//! three channels, the shared transport handle and the cleanup worker.
//! [`DeviceRegistry`] keeps one live device per peripheral identity.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::audio::{HostEvents, HostStream};
use crate::config::StreamConfig;
use crate::error::{ChannelError, Result};
use crate::protocol::{alt, interface, ChannelKind, Direction, PRODUCT_ID, VENDOR_ID};
use crate::stream::{
    Capabilities, Channel, ChannelStatsSnapshot, CleanupWorker, CompletionRouter, HwParams, Trigger,
};
use crate::transport::{Transport, TransportHandle};

type Entries = Mutex<HashMap<String, Entry>>;

struct Entry {
    handle: Arc<TransportHandle>,
    device: Weak<Device>,
}

/// Summary of one attached device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identity: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub attached: bool,
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub kind: ChannelKind,
    pub direction: Direction,
    pub state: &'static str,
    pub rate: Option<u32>,
}

/// One attached ZG01
pub struct Device {
    identity: String,
    transport: Arc<TransportHandle>,
    channels: [Arc<Channel>; 3],
    worker: Mutex<Option<CleanupWorker>>,
    registry: Option<Weak<Entries>>,
    detached: AtomicBool,
}

impl Device {
    /// Attach outside any registry
    pub fn attach(
        transport: Arc<dyn Transport>,
        events: Arc<dyn HostEvents>,
        config: StreamConfig,
    ) -> Result<Arc<Self>> {
        Self::build(transport, events, config, None)
    }

    fn build(
        transport: Arc<dyn Transport>,
        events: Arc<dyn HostEvents>,
        config: StreamConfig,
        registry: Option<Weak<Entries>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let identity = transport.identity();
        let worker = CleanupWorker::spawn("zg01-cleanup")?;
        let handle = Arc::new(TransportHandle::new(Arc::clone(&transport)));
        let config = Arc::new(config);

        let channels = ChannelKind::ALL.map(|kind| {
            Arc::new(Channel::new(
                kind,
                Arc::clone(&config),
                Arc::clone(&handle),
                Arc::clone(&events),
                worker.queue(),
            ))
        });
        transport.register(Arc::new(CompletionRouter::new(&channels)));

        for iface in [interface::PLAYBACK, interface::CAPTURE] {
            if let Err(e) = transport.set_interface(iface, alt::IDLE) {
                warn!("Device {}: interface {} alt 0 failed: {}", identity, iface, e);
            }
        }

        info!("Device {} attached", identity);
        Ok(Arc::new(Self {
            identity,
            transport: handle,
            channels,
            worker: Mutex::new(Some(worker)),
            registry,
            detached: AtomicBool::new(false),
        }))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_attached(&self) -> bool {
        self.transport.is_attached()
    }

    pub fn channel(&self, kind: ChannelKind) -> &Arc<Channel> {
        &self.channels[kind.index()]
    }

    pub fn channels(&self) -> &[Arc<Channel>; 3] {
        &self.channels
    }

    pub fn open(&self, kind: ChannelKind, direction: Direction) -> Result<Capabilities> {
        self.channel(kind).open(direction)
    }

    pub fn configure(&self, kind: ChannelKind, params: HwParams) -> Result<Arc<HostStream>> {
        self.channel(kind).configure(params)
    }

    pub fn prepare(&self, kind: ChannelKind) -> Result<()> {
        self.channel(kind).prepare()
    }

    pub fn trigger(&self, kind: ChannelKind, trigger: Trigger) -> Result<()> {
        self.channel(kind).trigger(trigger)
    }

    pub fn position(&self, kind: ChannelKind) -> usize {
        self.channel(kind).position()
    }

    pub fn close(&self, kind: ChannelKind) {
        self.channel(kind).close()
    }

    pub fn stats(&self) -> Vec<ChannelStatsSnapshot> {
        self.channels.iter().map(|c| c.stats()).collect()
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            identity: self.identity.clone(),
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            attached: self.is_attached(),
            channels: self
                .channels
                .iter()
                .map(|c| ChannelInfo {
                    kind: c.kind(),
                    direction: c.kind().direction(),
                    state: c.state().name(),
                    rate: c.current_rate(),
                })
                .collect(),
        }
    }

    /// Tear everything down. Later calls do nothing.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Detaching device {}", self.identity);

        for channel in &self.channels {
            channel.close();
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.shutdown();
        }
        if let Some(transport) = self.transport.take() {
            transport.unregister();
        }

        if let Some(entries) = self.registry.as_ref().and_then(Weak::upgrade) {
            let mut entries = entries.lock();
            let ours = entries
                .get(&self.identity)
                .map_or(false, |e| Arc::ptr_eq(&e.handle, &self.transport));
            if ours {
                entries.remove(&self.identity);
            }
        }
        debug!("Device {} detached", self.identity);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .field("attached", &self.is_attached())
            .field("channels", &self.channels)
            .finish()
    }
}

/// Live devices keyed by peripheral identity
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Arc<Entries>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device unless one is already live for the same identity
    pub fn attach(
        &self,
        transport: Arc<dyn Transport>,
        events: Arc<dyn HostEvents>,
        config: StreamConfig,
    ) -> Result<Arc<Device>> {
        let identity = transport.identity();
        let mut entries = self.entries.lock();
        if entries
            .get(&identity)
            .map_or(false, |e| e.handle.is_attached())
        {
            warn!("Device {} is already attached", identity);
            return Err(ChannelError::AlreadyAttached(identity).into());
        }

        let device = Device::build(transport, events, config, Some(Arc::downgrade(&self.entries)))?;
        entries.insert(
            identity,
            Entry {
                handle: Arc::clone(&device.transport),
                device: Arc::downgrade(&device),
            },
        );
        Ok(device)
    }

    /// Detach by identity; false if nothing live was registered under it
    pub fn detach(&self, identity: &str) -> bool {
        let entry = self.entries.lock().remove(identity);
        match entry.and_then(|e| e.device.upgrade()) {
            Some(device) => {
                device.detach();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Device>> {
        let device = self.entries.lock().get(identity).map(|e| e.device.clone());
        device.and_then(|d| d.upgrade())
    }

    /// Number of attached devices
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.handle.is_attached())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
