//! Core types shared across the engine.
//!
//! - [`Lens`], [`Target`] and [`PerLens`] identify and key per-lens state
//! - [`RawFrame`] is what a transport client emits; [`Frame`] is its decoded form
//! - [`TelemetryEvent`] is the typed output of the dispatcher
//! - [`Clock`] abstracts "now" so loops can be driven deterministically in tests

mod clock;
mod connection_state;
mod event;
mod frame;
mod lens;
pub mod telemetry;
mod update_rate;

pub use clock::{Clock, SystemClock, TokioClock};
pub use connection_state::ConnectionState;
pub use event::{ConsoleLine, EventKind, TelemetryEvent};
pub use frame::{Frame, RawFrame, to_hex};
pub use lens::{Lens, PerLens, Target};
pub use telemetry::{
    Ack, AckType, AudioPacket, BatteryInfo, CaseUpdate, DeviceVitals, DisplaySettings,
    EnvironmentSnapshot, EvenAiEvent, F5EventType, Gesture, SerialKind, SerialNumber, StateFlags,
    SystemCommand, SystemEvent,
};
pub use update_rate::UpdateRate;
