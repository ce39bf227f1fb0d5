//! Per-lens liveness pings.
//!
//! [`HeartbeatSchedule`] holds the state machine; [`HeartbeatSupervisor`]
//! runs it on a single task and writes through a [`HeartbeatSender`].

mod schedule;
mod supervisor;

pub use schedule::{
    GateReason, HeartbeatEvent, HeartbeatResult, HeartbeatSchedule, LensHeartbeatState, TickPlan,
};
pub use supervisor::{HeartbeatSender, HeartbeatSupervisor, JitterSource, RandomJitter};
