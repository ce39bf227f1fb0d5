//! [`Peripheral`] backed by btleplug.
//!
//! Wraps a platform peripheral that the caller already scanned for. Value
//! notifications and adapter disconnect events are forwarded onto the
//! peripheral event channel by a task started on `connect`.
//!
//! btleplug exposes no MTU exchange; the platform negotiates it on connect,
//! so `request_mtu` reports the smaller of the request and an assumed MTU.
//! CCCD writes become subscribe/unsubscribe calls.

use std::sync::{Mutex, MutexGuard, PoisonError};

use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peripheral::{Peripheral, PeripheralEvent, ServiceInfo};
use super::uuids::CCCD;
use crate::types::Lens;
use crate::{LinkError, Result};

/// MTU assumed when the caller does not set one.
pub const ASSUMED_MTU: u16 = 247;

const EVENT_CAPACITY: usize = 256;

/// Whether a CCCD value enables notifications or indications.
fn cccd_enables(value: &[u8]) -> bool {
    value.first().is_some_and(|bits| bits & 0x03 != 0)
}

fn link_error(lens: Lens, reason: &'static str) -> impl FnOnce(btleplug::Error) -> LinkError {
    move |err| LinkError::connection_failed_with_source(lens, reason, Box::new(err))
}

/// One lens reached through a btleplug adapter.
pub struct BtlePeripheral {
    lens: Lens,
    adapter: Adapter,
    peripheral: PlatformPeripheral,
    assumed_mtu: u16,
    events: broadcast::Sender<PeripheralEvent>,
    forwarder: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for BtlePeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtlePeripheral")
            .field("lens", &self.lens)
            .field("id", &self.peripheral.id())
            .field("assumed_mtu", &self.assumed_mtu)
            .finish_non_exhaustive()
    }
}

impl BtlePeripheral {
    pub fn new(lens: Lens, adapter: Adapter, peripheral: PlatformPeripheral) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { lens, adapter, peripheral, assumed_mtu: ASSUMED_MTU, events, forwarder: Mutex::new(None) }
    }

    /// Override the MTU reported back from `request_mtu`.
    pub fn with_assumed_mtu(mut self, mtu: u16) -> Self {
        self.assumed_mtu = mtu;
        self
    }

    fn forwarder(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.forwarder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_forwarding(&self) {
        if let Some(token) = self.forwarder().take() {
            token.cancel();
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(LinkError::MissingCharacteristic { lens: self.lens, uuid })
    }

    async fn start_forwarding(&self) -> Result<()> {
        let lens = self.lens;
        let mut notifications =
            self.peripheral.notifications().await.map_err(link_error(lens, "notification stream unavailable"))?;
        let mut central = self.adapter.events().await.map_err(link_error(lens, "adapter events unavailable"))?;

        let token = CancellationToken::new();
        if let Some(previous) = self.forwarder().replace(token.clone()) {
            previous.cancel();
        }
        let id = self.peripheral.id();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = notifications.next() => match notification {
                        Some(n) => {
                            let _ = events.send(PeripheralEvent::Notification { characteristic: n.uuid, bytes: n.value });
                        }
                        None => {
                            debug!(lens = %lens, "Notification stream ended");
                            break;
                        }
                    },
                    event = central.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                            warn!(lens = %lens, "Adapter reported disconnect");
                            let _ = events.send(PeripheralEvent::Disconnected);
                            break;
                        }
                        Some(_) => {}
                        None => {
                            debug!(lens = %lens, "Adapter event stream ended");
                            break;
                        }
                    },
                }
            }
            debug!(lens = %lens, "Event forwarding stopped");
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl Peripheral for BtlePeripheral {
    async fn connect(&self) -> Result<()> {
        let lens = self.lens;
        let connected = self.peripheral.is_connected().await.map_err(link_error(lens, "link state unavailable"))?;
        if !connected {
            self.peripheral.connect().await.map_err(link_error(lens, "platform connect failed"))?;
        }
        info!(lens = %lens, id = ?self.peripheral.id(), "Platform link up");
        self.start_forwarding().await
    }

    async fn discover(&self) -> Result<Vec<ServiceInfo>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|err| LinkError::Discovery { lens: self.lens, reason: err.to_string() })?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        Ok(mtu.min(self.assumed_mtu))
    }

    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<()> {
        let lens = self.lens;
        let target = self.characteristic(characteristic)?;
        if descriptor == CCCD {
            return if cccd_enables(value) {
                self.peripheral.subscribe(&target).await.map_err(link_error(lens, "subscribe failed"))
            } else {
                self.peripheral.unsubscribe(&target).await.map_err(link_error(lens, "unsubscribe failed"))
            };
        }
        let Some(found) = target.descriptors.iter().find(|d| d.uuid == descriptor) else {
            return Err(LinkError::MissingCharacteristic { lens, uuid: descriptor });
        };
        self.peripheral.write_descriptor(found, value).await.map_err(link_error(lens, "descriptor write failed"))
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8], with_response: bool) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        let kind = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };
        self.peripheral.write(&target, bytes, kind).await.map_err(|err| LinkError::Write {
            lens: self.lens,
            len: bytes.len(),
            source: Some(err.into()),
        })
    }

    async fn read_rssi(&self) -> Result<i16> {
        let lens = self.lens;
        let properties = self.peripheral.properties().await.map_err(link_error(lens, "properties unavailable"))?;
        properties
            .and_then(|p| p.rssi)
            .ok_or_else(|| LinkError::connection_failed(lens, "RSSI not reported"))
    }

    fn events(&self) -> broadcast::Receiver<PeripheralEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_forwarding();
        self.peripheral.disconnect().await.map_err(link_error(self.lens, "platform disconnect failed"))
    }
}

impl Drop for BtlePeripheral {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
