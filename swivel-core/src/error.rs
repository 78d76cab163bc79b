use thiserror::Error;

use crate::slots::{Direction, SlotState};

/// All errors produced by swivel-core.
///
/// Violations are surfaced synchronously as `Result` values to the caller of
/// the operation that triggered them — never as unwinding control flow across
/// the real-time boundary.
#[derive(Debug, Error)]
pub enum SwivelError {
    /// A caller acted on a slot it does not currently own. Fatal to the
    /// session: the stream is force-stopped because continuing risks a data
    /// race on the buffer contents.
    #[error(
        "ownership violation on {direction:?} slot {index}: \
         expected {expected:?}, found {found:?} (generation {generation})"
    )]
    OwnershipViolation {
        direction: Direction,
        index: usize,
        expected: SlotState,
        found: SlotState,
        generation: u64,
    },

    /// An output-ready acknowledgment referenced a generation already
    /// superseded by two or more switches. Counted and ignored, non-fatal.
    #[error(
        "stale output-ready acknowledgment for slot {index}: \
         acknowledged generation {acknowledged}, current {current}"
    )]
    StaleAcknowledgment {
        index: usize,
        acknowledged: u64,
        current: u64,
    },

    /// The host callback did not return within the period budget. Counted
    /// and reported; the session continues.
    #[error("callback overrun: dispatch took {elapsed_us} µs, budget {budget_us} µs")]
    CallbackOverrun { elapsed_us: u128, budget_us: u128 },

    /// `start()` was called without the required output pre-fill.
    #[error("priming precondition failed: {0}")]
    PrimingPrecondition(String),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("slot index {0} out of range (double buffering: 0 or 1)")]
    InvalidSlotIndex(usize),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not streaming")]
    NotRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SwivelError>;
