//! Measurement models: four pluggable predictors sharing one contract
//! — `predict(x) -> (h(x), H)` plus per-model tuning and (optionally) an
//! internally tracked adaptive R. Grounded in the original tracker's
//! `cnkalman_meas_model_t`, reimagined as a trait instead of the C source's
//! callback + user-pointer indirection.

pub mod imu;
pub mod light;
pub mod pose;
pub mod zvu;

use nalgebra::{DMatrix, DVector};

use crate::config::MeasurementTuning;
use crate::state::State;

/// Per-model tuning plus (for adaptive models) the online R estimate.
/// Separate from [`crate::config::TrackerConfig`] because each measurement
/// model owns exactly one of these, mutated as residuals come in, whereas
/// `TrackerConfig` is shared read-only tuning.
#[derive(Clone, Debug)]
pub struct MeasurementConfig {
    pub tuning: MeasurementTuning,
    /// Present only when `tuning.adaptive` is set; seeded from the model's
    /// first explicit R and updated thereafter by the EKF core's adaptive-R
    /// rule.
    adaptive_r: Option<DMatrix<f64>>,
}

impl MeasurementConfig {
    pub fn new(tuning: MeasurementTuning) -> Self {
        Self { tuning, adaptive_r: None }
    }

    pub fn tuning(&self) -> &MeasurementTuning {
        &self.tuning
    }

    /// Seeds the adaptive R store from `r` the first time an adaptive model
    /// is updated (the C source does the analogous one-shot `IMU_R`/`Obs_R`
    /// initialisation in `survive_kalman_tracker_reinit`).
    pub fn ensure_adaptive_r(&mut self, seed: &DMatrix<f64>) -> &mut DMatrix<f64> {
        if self.adaptive_r.is_none() {
            self.adaptive_r = Some(seed.clone());
        }
        self.adaptive_r.as_mut().unwrap()
    }

    pub fn adaptive_r_mut(&mut self) -> Option<&mut DMatrix<f64>> {
        if self.tuning.adaptive {
            self.adaptive_r.as_mut()
        } else {
            None
        }
    }
}

pub trait MeasurementModel {
    /// `(h(x), H)` — predicted measurement and its Jacobian w.r.t. the
    /// nominal state. The EKF core converts `H` to tangent space via
    /// [`crate::state::StateLayout::tangent_basis`] when running in
    /// error-state mode.
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>);

    fn config(&self) -> &MeasurementConfig;
    fn config_mut(&mut self) -> &mut MeasurementConfig;

    /// `Some` only for adaptive models that have seen at least one update.
    fn adaptive_r(&mut self) -> Option<&mut DMatrix<f64>>;

    /// Iteration cap used when `tuning.max_iterations` is the "-1" sentinel.
    /// 1 (a plain non-iterated EKF update) for every model except light,
    /// which defaults to 10 (see `DESIGN.md`).
    fn default_max_iterations(&self) -> u32 {
        1
    }
}
