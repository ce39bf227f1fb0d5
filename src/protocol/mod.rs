//! Wire protocol: frame decoding, typed decoders, dispatch and outbound
//! command builders.

pub mod bitmap;
pub mod codec;
pub mod commands;
pub mod decoders;
pub mod dispatcher;
pub mod opcodes;
pub mod send_text;
pub mod vitals;

pub use codec::{Reply, classify_reply, decode_frame, detect_ack, looks_like_ack};
pub use commands::HeartbeatSequencer;
pub use dispatcher::{DispatchTable, Dispatcher};
pub use send_text::{ScreenStatus, SendTextBuilder};
pub use vitals::decode_vitals;
