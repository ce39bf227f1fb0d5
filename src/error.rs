//! Error types for the lens link engine.
//!
//! Link-level failures are the only errors that surface as `Err` values.
//! Malformed or unrecognised frames are never errors: decoders return `None`
//! or an empty event list and log a diagnostic instead, since firmware builds
//! disagree on layouts.
//!
//! ## Error Categories
//!
//! - **Link Errors**: connect, discovery, notification arming and write failures
//! - **Command Errors**: ack rejection, busy devices and timeouts
//! - **Engine Errors**: closed channels, full queues, invalid configuration
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use lenslink::{LinkError, Lens};
//!
//! let error = LinkError::connection_failed(Lens::Left, "peripheral out of range");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Lens;

/// Result type alias for engine operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for engine operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Failed to connect {lens} lens: {reason}")]
    Connection {
        lens: Lens,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Service discovery failed on {lens} lens: {reason}")]
    Discovery { lens: Lens, reason: String },

    #[error("Characteristic {uuid} missing on {lens} lens")]
    MissingCharacteristic { lens: Lens, uuid: Uuid },

    #[error("Failed to arm notifications on {lens} lens after {attempts} attempts")]
    Arming { lens: Lens, attempts: u32 },

    #[error("Write of {len} bytes to {lens} lens failed")]
    Write {
        lens: Lens,
        len: usize,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{lens} lens is not connected")]
    NotConnected { lens: Lens },

    #[error("Command {opcode:#04x} rejected by {lens} lens")]
    Rejected { lens: Lens, opcode: u8, busy: bool },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{queue} queue is full")]
    QueueFull { queue: &'static str },

    #[error("{channel} channel closed")]
    ChannelClosed { channel: &'static str },

    #[error("Invalid configuration: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Discovery { .. } => true,
            LinkError::Arming { .. } => true,
            LinkError::Write { .. } => true,
            LinkError::NotConnected { .. } => true,
            LinkError::Rejected { busy, .. } => *busy,
            LinkError::Timeout { .. } => true,
            LinkError::QueueFull { .. } => true,
            LinkError::MissingCharacteristic { .. } => false,
            LinkError::ChannelClosed { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::ConfigFile { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } => vec![
                "Ensure the lens is powered on and out of the case",
                "Move the host closer to the glasses",
                "Retry connect() after a short delay",
            ],
            LinkError::Discovery { .. } => vec![
                "Disconnect and reconnect to refresh the GATT cache",
                "Check the lens firmware exposes the Nordic UART service",
            ],
            LinkError::MissingCharacteristic { .. } => vec![
                "Verify the peripheral is a supported lens",
                "Update the lens firmware",
            ],
            LinkError::Arming { .. } => vec![
                "Reconnect the lens to retry notification arming",
                "Remove and re-pair the bond if arming keeps failing",
            ],
            LinkError::Write { .. } => vec![
                "Check the lens is still connected",
                "Reduce write rate or payload size",
            ],
            LinkError::NotConnected { .. } => vec![
                "Call connect() before sending commands",
                "Wait for the connection state to become Connected",
            ],
            LinkError::Rejected { .. } => vec![
                "Retry the command once the lens is idle",
                "Verify the command is supported by the lens firmware",
            ],
            LinkError::Timeout { .. } => vec![
                "Increase the ack timeout",
                "Check the lens is awake and not in the case",
            ],
            LinkError::QueueFull { .. } => vec![
                "Slow down the producer",
                "Increase the queue capacity in the configuration",
            ],
            LinkError::ChannelClosed { .. } => vec![
                "The engine was shut down; create a new connection",
            ],
            LinkError::Config { .. } => vec![
                "Check configuration values are positive",
                "Compare against the defaults in EngineConfig::default()",
            ],
            LinkError::ConfigFile { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(lens: Lens, reason: impl Into<String>) -> Self {
        LinkError::Connection { lens, reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        lens: Lens,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { lens, reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for write failures.
    pub fn write_failed(lens: Lens, len: usize) -> Self {
        LinkError::Write { lens, len, source: None }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for timeouts.
    pub fn timeout(duration: Duration) -> Self {
        LinkError::Timeout { duration }
    }
}

impl From<serde_yaml_ng::Error> for LinkError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        LinkError::Config { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            opcode in any::<u8>(),
            attempts in 1u32..10u32,
            duration_ms in 1u64..60000u64
          ) {
            let connection = LinkError::connection_failed(Lens::Left, reason.clone());
            prop_assert!(connection.to_string().contains(&reason));
            prop_assert!(connection.to_string().contains("left"));

            let rejected = LinkError::Rejected { lens: Lens::Right, opcode, busy: false };
            let opcode_hex = format!("{:#04x}", opcode);
            prop_assert!(rejected.to_string().contains(&opcode_hex));

            let arming = LinkError::Arming { lens: Lens::Right, attempts };
            prop_assert!(arming.to_string().contains(&attempts.to_string()));

            let timeout = LinkError::timeout(Duration::from_millis(duration_ms));
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn busy_rejections_are_retryable_and_hard_rejections_are_not(
            opcode in any::<u8>(),
            busy in any::<bool>()
          ) {
            let error = LinkError::Rejected { lens: Lens::Left, opcode, busy };
            prop_assert_eq!(error.is_retryable(), busy);
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::connection_failed(Lens::Left, "test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let connection_error = LinkError::connection_failed(Lens::Left, "test");
        let missing = LinkError::MissingCharacteristic { lens: Lens::Right, uuid: crate::transport::uuids::NUS_RX };

        assert!(connection_error.is_retryable());
        assert!(!missing.is_retryable());

        for suggestion in connection_error.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!missing.recovery_suggestions().is_empty());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("adapter unplugged");
        let error = LinkError::connection_failed_with_source(Lens::Right, "link lost", Box::new(io));
        let source = std::error::Error::source(&error).expect("source should be kept");
        assert_eq!(source.to_string(), "adapter unplugged");
    }

    #[test]
    fn yaml_errors_convert_to_config_errors() {
        let err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let converted: LinkError = err.into();
        assert!(matches!(converted, LinkError::Config { .. }));
        assert!(!converted.is_retryable());
    }
}
