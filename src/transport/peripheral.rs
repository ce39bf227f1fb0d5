//! GATT peripheral abstraction
//!
//! The engine never talks to a Bluetooth stack directly. A platform adapter
//! implements [`Peripheral`] for one physical lens; tests use
//! `test_utils::FakePeripheral`.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::Result;

/// A discovered GATT service and its characteristic UUIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Asynchronous link events raised by the platform stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// Notification on `characteristic`
    Notification { characteristic: Uuid, bytes: Vec<u8> },
    /// The link dropped
    Disconnected,
}

/// One BLE peripheral, as seen by a transport client.
///
/// Implementations report failures as [`crate::LinkError`]; they never retry
/// on their own.
#[async_trait::async_trait]
pub trait Peripheral: Send + Sync + 'static {
    /// Establish the link.
    async fn connect(&self) -> Result<()>;

    /// Discover services and characteristics.
    async fn discover(&self) -> Result<Vec<ServiceInfo>>;

    /// Request an ATT MTU; returns the negotiated value.
    async fn request_mtu(&self, mtu: u16) -> Result<u16>;

    /// Write a descriptor of `characteristic`.
    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<()>;

    /// Write a characteristic value.
    async fn write(&self, characteristic: Uuid, bytes: &[u8], with_response: bool) -> Result<()>;

    async fn read_rssi(&self) -> Result<i16>;

    /// Subscribe to link events. Called before `connect`.
    fn events(&self) -> broadcast::Receiver<PeripheralEvent>;

    async fn disconnect(&self) -> Result<()>;
}
