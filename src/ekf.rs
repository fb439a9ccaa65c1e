//! EKF core: owns `x`, `P`, `t`; predicts forward in time and applies
//! measurement updates, in either nominal-state or error-state mode.
//! Grounded in `cnkalman_predict_update_state`/`cnkalman_meas_model_predict_update`
//! and `survive_kalman_tracker_reinit` in the original C tracker.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::{MeasurementTuning, TrackerConfig};
use crate::error::TrackerError;
use crate::linalg::{all_finite_mat, pseudo_inverse_sym, sandwich, symmetrize};
use crate::measurement::MeasurementModel;
use crate::process::{f, jacobian_f, jacobian_f_error_state};
use crate::process_noise::build_process_noise;
use crate::state::{lift, retract, Group, State, StateLayout};

/// The 7 leading diagonal entries re-seeded by [`Ekf::reset`], matching
/// `survive_kalman_tracker_reinit`'s literal `for (i = 0; i < 7; i++)` loop
/// over `P`'s diagonal — applied to the first 7 rows regardless of whether
/// the filter runs in nominal or error-state mode (the original does the
/// same, since the error-state pose block is only 6-wide and the loop was
/// written for the nominal layout; preserved here for fidelity).
const POSE_RESEED_ROWS: usize = 7;
const POSE_RESEED_VARIANCE: f64 = 10.0;

pub struct Ekf {
    pub x: State,
    pub p: DMatrix<f64>,
    pub layout: StateLayout,
    config: TrackerConfig,
}

impl Ekf {
    pub fn new(config: TrackerConfig) -> Self {
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let dim = Self::filter_dim(&layout, &config);
        let mut p = DMatrix::<f64>::zeros(dim, dim);
        Self::seed_initial_covariance(&mut p, &layout, &config);
        Self { x, p, layout, config }
    }

    fn filter_dim(layout: &StateLayout, config: &TrackerConfig) -> usize {
        if config.kalman_use_error_space {
            layout.error_dim()
        } else {
            layout.nominal_dim()
        }
    }

    fn seed_initial_covariance(p: &mut DMatrix<f64>, layout: &StateLayout, config: &TrackerConfig) {
        let dim = p.nrows();
        let rows = POSE_RESEED_ROWS.min(dim);
        for i in 0..rows {
            p[(i, i)] += POSE_RESEED_VARIANCE;
        }
        if config.kalman_initial_imu_correction_variance != 0.0 {
            if let Some((off, len)) = Self::group_range(layout, config, Group::ImuCorrection) {
                for i in off..off + len {
                    p[(i, i)] = config.kalman_initial_imu_correction_variance;
                }
            }
        }
        if config.kalman_initial_acc_scale_variance != 0.0 {
            if let Some((off, _)) = Self::group_range(layout, config, Group::AccScale) {
                p[(off, off)] = config.kalman_initial_acc_scale_variance;
            }
        }
    }

    fn group_range(layout: &StateLayout, config: &TrackerConfig, group: Group) -> Option<(usize, usize)> {
        if config.kalman_use_error_space {
            layout.error_range(group)
        } else {
            layout.nominal_range(group)
        }
    }

    pub fn t(&self) -> f64 {
        self.x.t
    }

    pub fn dim(&self) -> usize {
        self.p.nrows()
    }

    /// Propagates `x` and `P` forward by `dt = t_target - t`. No-op (besides
    /// normalisation) if `dt <= 0`.
    pub fn predict_to(&mut self, t_target: f64) -> Result<(), TrackerError> {
        let dt = t_target - self.x.t;
        if dt <= 0.0 {
            self.x.normalize(&self.layout);
            return Ok(());
        }
        self.advance(dt)
    }

    /// Forward-propagated state copy, without mutating filter state.
    pub fn extrapolate(&self, t_target: f64) -> State {
        let dt = t_target - self.x.t;
        if dt <= 0.0 {
            return self.x.clone();
        }
        let mut x1 = f(&self.x, dt, &self.config, &self.layout);
        x1.normalize(&self.layout);
        x1
    }

    fn advance(&mut self, dt: f64) -> Result<(), TrackerError> {
        let x1 = f(&self.x, dt, &self.config, &self.layout);
        let f_err = if self.config.kalman_use_error_space {
            jacobian_f_error_state(dt, &self.config, &self.layout)
        } else {
            jacobian_f(&self.x, dt, &self.config, &self.layout, &self.config.obs_tuning)
        };

        let q = build_process_noise(dt, &self.config, &self.layout, &self.x);
        let p_pred = symmetrize(&(sandwich(&f_err, &self.p) + q));

        if !all_finite_mat(&p_pred) {
            return Err(TrackerError::NumericalInstability("covariance non-finite after predict".into()));
        }

        self.x = x1;
        self.p = p_pred;
        self.x.normalize(&self.layout);
        Ok(())
    }

    /// Applies one measurement. `model.predict` supplies `h(x)`/`H`; `z` and
    /// `r` are the observation and its noise covariance (or `None` to use
    /// the model's tracked adaptive R).
    pub fn update<M: MeasurementModel>(
        &mut self,
        model: &mut M,
        z: &DVector<f64>,
        r: Option<&DMatrix<f64>>,
    ) -> Result<f64, TrackerError> {
        let tuning = *model.config().tuning();
        let error_state = self.config.kalman_use_error_space && tuning.error_state_model;
        let max_iter = tuning.resolved_max_iterations(model.default_max_iterations()).max(1);

        let mut best_norm = f64::INFINITY;
        let mut last_norm = f64::INFINITY;

        for iter in 0..max_iter {
            let (h_x, mut h) = model.predict(&self.x);
            if error_state {
                let g = self.layout.tangent_basis(&self.x.x);
                h = h * g;
            }
            if !all_finite_mat(&h) {
                warn!("measurement update skipped: non-finite H on iteration {iter}");
                return Err(TrackerError::NumericalInstability("non-finite measurement Jacobian".into()));
            }

            let y = z - &h_x;
            let r_use = match r {
                Some(r) => r.clone(),
                None => model
                    .adaptive_r()
                    .map(|m| m.clone())
                    .expect("measurement model without adaptive R requires an explicit R"),
            };

            let s = symmetrize(&(sandwich(&h, &self.p) + &r_use));
            let s_inv = match pseudo_inverse_sym(&s) {
                Some(inv) => inv,
                None => {
                    warn!("measurement update skipped: innovation covariance singular");
                    return Err(TrackerError::NumericalInstability("singular innovation covariance".into()));
                }
            };

            let k = &self.p * h.transpose() * &s_inv;
            let correction = &k * &y;

            if error_state {
                self.x = retract(&self.x, &correction, &self.layout);
            } else {
                self.x.x += &correction;
            }
            self.x.normalize(&self.layout);

            let i_minus_kh = DMatrix::<f64>::identity(self.p.nrows(), self.p.ncols()) - &k * &h;
            self.p = symmetrize(&(sandwich(&i_minus_kh, &self.p) + sandwich(&k, &r_use)));

            if let Some(adaptive_r) = model.adaptive_r() {
                let alpha = 0.02;
                let innovation = &y * y.transpose();
                let predicted = sandwich(&h, &self.p);
                *adaptive_r = symmetrize(&(&*adaptive_r * (1.0 - alpha) + (innovation - predicted) * alpha));
            }

            let norm = y.norm();
            best_norm = best_norm.min(norm);
            let converged = iter > 0 && (last_norm - norm).abs() < 1e-6 * last_norm.max(1e-12);
            last_norm = norm;
            if converged {
                debug!("measurement update converged after {} iterations (residual {norm:e})", iter + 1);
                break;
            }
        }

        Ok(best_norm)
    }

    /// Zeroes `P` then re-seeds the diagonal exactly as at construction; `x`
    /// becomes the identity pose. `t` is left untouched — callers decide
    /// whether to also reset filter time.
    pub fn reset(&mut self) {
        self.p = DMatrix::<f64>::zeros(self.p.nrows(), self.p.ncols());
        Self::seed_initial_covariance(&mut self.p, &self.layout, &self.config);
        let t = self.x.t;
        self.x = State::identity(&self.layout);
        self.x.t = t;
    }

    pub fn covariance_snapshot(&self) -> &DMatrix<f64> {
        &self.p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::pose::PoseQuaternionModel;

    #[test]
    fn predict_with_zero_dt_is_a_no_op() {
        let config = TrackerConfig::default();
        let mut ekf = Ekf::new(config);
        let p0 = ekf.p.clone();
        ekf.predict_to(ekf.t()).unwrap();
        assert!((ekf.p.clone() - p0).norm() < 1e-12);
    }

    #[test]
    fn predict_is_idempotent_to_same_target() {
        let config = TrackerConfig::default();
        let mut ekf = Ekf::new(config);
        ekf.predict_to(1.0).unwrap();
        let p1 = ekf.p.clone();
        let x1 = ekf.x.x.clone();
        ekf.predict_to(1.0).unwrap();
        assert!((ekf.p.clone() - p1).norm() < 1e-9);
        assert!((ekf.x.x.clone() - x1).norm() < 1e-12);
    }

    #[test]
    fn reset_reseeds_pose_block_and_zeroes_state() {
        let config = TrackerConfig::default();
        let mut ekf = Ekf::new(config);
        ekf.predict_to(1.0).unwrap();
        ekf.reset();
        for i in 0..POSE_RESEED_ROWS.min(ekf.dim()) {
            assert!(ekf.p[(i, i)] >= POSE_RESEED_VARIANCE);
        }
        let pos = ekf.x.vector3(&ekf.layout, Group::Position);
        assert!(pos.norm() < 1e-12);
    }

    #[test]
    fn update_drives_residual_toward_zero() {
        let config = TrackerConfig::default();
        let mut ekf = Ekf::new(config);
        ekf.x.set_group(&ekf.layout, Group::Position, &nalgebra::DVector::from_vec(vec![0.0, 0.0, 0.0]));

        let mut model = PoseQuaternionModel::new(Default::default());
        let z = DVector::from_vec(vec![1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0]);
        let r = DMatrix::<f64>::from_diagonal(&nalgebra::DVector::from_element(7, 1e-6));

        let mut last = f64::INFINITY;
        for _ in 0..5 {
            let norm = ekf.update(&mut model, &z, Some(&r)).unwrap();
            assert!(norm <= last + 1e-9);
            last = norm;
        }
        let pos = ekf.x.vector3(&ekf.layout, Group::Position);
        assert!((pos - nalgebra::Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-2);
    }
}
