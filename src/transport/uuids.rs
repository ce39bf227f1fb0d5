//! GATT identifiers for the Nordic UART service

use uuid::Uuid;

/// Nordic UART service.
pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
/// Host → lens writes (RX on the lens side).
pub const NUS_RX: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
/// Lens → host notifications (TX on the lens side).
pub const NUS_TX: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);
/// Client characteristic configuration descriptor.
pub const CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Notification enable value.
pub const CCCD_NOTIFY: [u8; 2] = [0x01, 0x00];
/// Notify + indicate, accepted by some firmware builds that reject the plain
/// notify value.
pub const CCCD_NOTIFY_INDICATE: [u8; 2] = [0x03, 0x00];

/// Default ATT MTU before negotiation.
pub const DEFAULT_MTU: u16 = 23;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_published_identifiers() {
        assert_eq!(NUS_SERVICE, Uuid::parse_str("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap());
        assert_eq!(NUS_TX.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(CCCD, Uuid::parse_str("00002902-0000-1000-8000-00805F9B34FB").unwrap());
        assert_ne!(NUS_RX, NUS_TX);
    }
}
