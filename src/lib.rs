//! Pose tracking core: an extended Kalman filter (nominal- and error-state)
//! fusing raw inertial samples, optical sweep observations, and pre-solved
//! poses into a continuously updated 6-DoF pose estimate.
//!
//! Grounded in the sensor-fusion core of `libsurvive`
//! (`survive_kalman_tracker.c`/`.h`), re-expressed with a typed
//! `Default`-driven config struct, `log`-facade instrumentation,
//! `thiserror` for the handful of genuine failure kinds, and inline
//! `#[cfg(test)]` modules rather than a separate `tests/` tree.
//!
//! Device I/O, sweep-timecode decoding, lighthouse calibration storage, and
//! the symbolic base-station reprojection math are out of scope — they are
//! the sensor front-end's job. This crate starts at "I already have a
//! timestamped accel/gyro triple, sweep angle sample, or solved pose" and
//! ends at "here is the filtered pose/velocity."

pub mod config;
pub mod ekf;
pub mod error;
pub mod light_batcher;
pub mod linalg;
pub mod measurement;
pub mod pid;
pub mod process;
pub mod process_noise;
pub mod state;
pub mod stats;
pub mod tracker;

pub use config::{JacobianMode, MeasurementTuning, NoiseModel, TrackerConfig};
pub use error::TrackerError;
pub use measurement::light::{Axis, Generation};
pub use stats::TrackerStats;
pub use tracker::{NoopReporter, Pose, Reporter, Tracker, TrackerReport, TrackerState};
