//! Telemetry state and its consistency checks.

mod repository;
mod validator;

pub use repository::{
    CaseStatus, LensTelemetry, SleepPhase, Snapshot, TelemetryRepository, VITALS_SLEEP_TIMEOUT_MS,
};
pub use validator::{ConsistencyValidator, ValidatorHandle};
