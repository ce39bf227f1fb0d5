//! Protocol and telemetry engine for two-lens BLE smart glasses.
//!
//! Each lens is a separate BLE peripheral exposing a Nordic UART service.
//! LensLink keeps both links armed, pings them on a jittered heartbeat,
//! decodes every notification into typed [`TelemetryEvent`]s and folds them
//! into a merged [`Snapshot`](telemetry::Snapshot) of the headset.
//!
//! # Features
//!
//! - **Links**: connect, MTU negotiation and notification arming with retries
//! - **Typed telemetry**: battery, case, vitals, gestures and acks per lens
//! - **Commands**: acked writes, paginated send-text and chunked bursts
//! - **Streams**: events, throttled snapshots and a console of warnings
//!
//! The BLE stack is abstracted behind [`Peripheral`]; plug in any GATT
//! client that can connect, discover, write and notify.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use lenslink::{EngineConfig, LensLink, PerLens, Peripheral, Target, UpdateRate};
//!
//! # async fn run(left: Arc<dyn Peripheral>, right: Arc<dyn Peripheral>) -> lenslink::Result<()> {
//! let glasses = LensLink::connect(PerLens::new(left, right), EngineConfig::default()).await?;
//! glasses.send_text("Hello from the phone", Target::Both).await?;
//!
//! let mut snapshots = glasses.snapshots(UpdateRate::Max(2));
//! while let Some(snapshot) = snapshots.next().await {
//!     println!("left battery: {:?}", snapshot.lens(lenslink::Lens::Left).battery_percent);
//! }
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod logging;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire level
pub mod protocol;
pub mod text;
pub mod transport;

// Engine tasks
pub mod burst;
pub mod connection;
pub mod driver;
pub mod heartbeat;
pub mod stream;
pub mod telemetry;

// Core exports
pub use config::EngineConfig;
pub use error::*;
pub use types::*;

// Main API exports
pub use connection::{CommandReply, GlassesConnection};
pub use telemetry::Snapshot;
pub use transport::{Peripheral, PeripheralEvent, ServiceInfo};

use std::path::Path;
use std::sync::Arc;

/// Entry point for glasses connections.
///
/// Builds a [`GlassesConnection`] and brings both links up.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lenslink::{LensLink, PerLens, Peripheral};
///
/// # async fn run(left: Arc<dyn Peripheral>, right: Arc<dyn Peripheral>) -> lenslink::Result<()> {
/// let glasses = LensLink::connect_with_config_file(PerLens::new(left, right), "glasses.yaml").await?;
/// # Ok(())
/// # }
/// ```
pub struct LensLink;

impl LensLink {
    /// Build the engine and connect both lenses.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or either lens fails
    /// to connect. Both links are closed before a connect error is returned.
    pub async fn connect(
        peripherals: PerLens<Arc<dyn Peripheral>>,
        config: EngineConfig,
    ) -> Result<GlassesConnection> {
        let connection = GlassesConnection::new(peripherals, config)?;
        connection.connect().await?;
        Ok(connection)
    }

    /// Like [`connect`](Self::connect) with configuration read from a YAML file.
    pub async fn connect_with_config_file(
        peripherals: PerLens<Arc<dyn Peripheral>>,
        path: impl AsRef<Path>,
    ) -> Result<GlassesConnection> {
        let config = EngineConfig::from_yaml_file(path)?;
        Self::connect(peripherals, config).await
    }
}
