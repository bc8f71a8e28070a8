use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms, Window};

/// Expected outcomes (everything except `Storage`) are returned to the
/// caller for user-facing messaging and never logged as errors. `Storage`
/// is fatal to the enclosing operation and propagates unchanged.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Capacity exhausted — an expected outcome, not a fault.
    SlotFull(Ulid),
    SlotInactive(Ulid),
    /// The slot's window has already started; no new reservations.
    SlotExpired(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// Mark-missed requested before the slot window ended.
    WindowNotElapsed {
        ends_at: Ms,
    },
    Unauthorized(&'static str),
    NoCoveringShift {
        window: Window,
    },
    DurationMismatch {
        expected: Ms,
        got: Ms,
    },
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotFull(id) => write!(f, "slot {id} is no longer available: fully booked"),
            EngineError::SlotInactive(id) => {
                write!(f, "slot {id} is no longer available: withdrawn")
            }
            EngineError::SlotExpired(id) => {
                write!(f, "slot {id} is no longer available: already started")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {} -> {}", from.as_str(), to.as_str())
            }
            EngineError::WindowNotElapsed { ends_at } => {
                write!(f, "slot window has not ended yet (ends at {ends_at})")
            }
            EngineError::Unauthorized(what) => write!(f, "unauthorized: {what}"),
            EngineError::NoCoveringShift { window } => {
                write!(
                    f,
                    "no active shift covers [{}, {})",
                    window.start, window.end
                )
            }
            EngineError::DurationMismatch { expected, got } => {
                write!(
                    f,
                    "slot window is {got}ms but the service takes {expected}ms"
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
