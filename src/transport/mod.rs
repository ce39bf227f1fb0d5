//! BLE transport: the GATT peripheral seam and the per-lens UART client

#[cfg(feature = "btleplug")]
pub mod btle;
pub mod client;
pub mod peripheral;
pub mod uuids;

#[cfg(feature = "btleplug")]
pub use btle::BtlePeripheral;
pub use client::UartClient;
pub use peripheral::{Peripheral, PeripheralEvent, ServiceInfo};
