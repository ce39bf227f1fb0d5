//! Wire opcodes and status codes

pub const OP_BITMAP_CHUNK: u8 = 0x15;
pub const OP_BITMAP_CRC: u8 = 0x16;
pub const OP_BURST: u8 = 0x06;
pub const OP_BURST_TEXT: u8 = 0x09;
pub const OP_MIC_CONTROL: u8 = 0x0E;
pub const OP_EXIT: u8 = 0x18;
pub const OP_BITMAP_END: u8 = 0x20;
pub const OP_SYSTEM_COMMAND: u8 = 0x23;
pub const OP_HEARTBEAT: u8 = 0x25;
pub const OP_DISPLAY: u8 = 0x26;
pub const OP_DEVICE_STATUS: u8 = 0x2B;
pub const OP_BATTERY: u8 = 0x2C;
pub const OP_ENV_FIRST: u8 = 0x32;
pub const OP_ENV_LAST: u8 = 0x36;
pub const OP_LENS_SERIAL: u8 = 0x33;
pub const OP_FRAME_SERIAL: u8 = 0x34;
pub const OP_UPTIME: u8 = 0x37;
pub const OP_SYSTEM_STATUS: u8 = 0x39;
pub const OP_HELLO: u8 = 0x4D;
pub const OP_SEND_TEXT: u8 = 0x4E;
pub const OP_AUDIO: u8 = 0xF1;
pub const OP_EVENT: u8 = 0xF5;

/// Dashboard clear uses the heartbeat opcode with a zero argument.
pub const OP_CLEAR: u8 = OP_HEARTBEAT;

pub const STATUS_OK: u8 = 0xC9;
pub const STATUS_BUSY: u8 = 0xCA;
pub const STATUS_CONTINUE: u8 = 0xCB;
pub const STATUS_COMPLETE: u8 = 0xC0;

/// Alternate single-byte ack head used by some firmware builds.
pub const ACK_ALT_HEAD: u8 = 0x04;

pub const SUB_FIRMWARE: u8 = 0x74;
pub const SUB_SILENT_STATE: u8 = 0x69;
pub const SUB_BATTERY: u8 = 0x0A;
pub const SUB_CHARGING: u8 = 0x09;

/// Magic byte opening a binary vitals TLV block.
pub const VITALS_TLV_MAGIC: u8 = 0xF1;

/// Opcodes we send that the lens acknowledges with `[op, C9|CA, ...]`.
pub const ACKED_COMMANDS: &[u8] = &[
    OP_SEND_TEXT,
    OP_HEARTBEAT,
    OP_DISPLAY,
    OP_MIC_CONTROL,
    OP_EXIT,
    OP_HELLO,
    OP_BURST_TEXT,
    OP_BURST,
    OP_BITMAP_CHUNK,
    OP_BITMAP_CRC,
    OP_BITMAP_END,
];

/// Label for an `0x32..=0x36` environment reading.
pub fn environment_key(opcode: u8) -> Option<&'static str> {
    match opcode {
        0x32 => Some("activation_angle"),
        0x33 => Some("lens_serial"),
        0x34 => Some("device_serial"),
        0x35 => Some("esb_channel"),
        0x36 => Some("esb_notification_count"),
        _ => None,
    }
}
