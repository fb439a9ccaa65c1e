//! Error kinds for the pose tracking core.
//!
//! Most gating outcomes (late measurement, cold start, uninitialised, low
//! confidence) are not represented here — they are expected admission-gate
//! drops, handled internally and surfaced only through [`TrackerStats`]
//! counters (see `stats.rs`). Only the two failure kinds that represent a
//! genuine operation failure reach the public API as a `Result::Err`.
//!
//! [`TrackerStats`]: crate::stats::TrackerStats

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("filter diverged and was reset")]
    Divergence,
}
