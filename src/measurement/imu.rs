//! IMU measurement model, grounded in
//! `survive_kalman_tracker_imu_measurement_model`/`survive_kalman_tracker_correct_imu`.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::MeasurementTuning;
use crate::measurement::{MeasurementConfig, MeasurementModel};
use crate::state::{quat_conjugate, quat_normalize, Group, State, StateLayout};

const GRAVITY: f64 = 9.80665;

pub struct ImuModel {
    config: MeasurementConfig,
    layout: StateLayout,
    /// Variance inflation applied to the accel rows when `‖a‖` is far from
    /// 1g: `acc_norm_penalty * (1 - ‖a‖)²`. Computed by `build_r` from the
    /// raw (uncorrected) accel sample.
    pub acc_norm_penalty: f64,
}

impl ImuModel {
    pub fn new(tuning: MeasurementTuning, layout: StateLayout, acc_norm_penalty: f64) -> Self {
        Self { config: MeasurementConfig::new(tuning), layout, acc_norm_penalty }
    }

    /// `Z = [(accel/AccScale - AccBias), gyro]`, the correction the C
    /// source applies before feeding raw IMU samples to the filter.
    pub fn corrected_measurement(&self, x: &State, accel: Vector3<f64>, gyro: Vector3<f64>) -> DVector<f64> {
        let acc_scale = if self.layout.has(Group::AccScale) {
            x.x[self.layout.nominal_range(Group::AccScale).unwrap().0]
        } else {
            1.0
        };
        let acc_bias = if self.layout.has(Group::AccBias) {
            x.vector3(&self.layout, Group::AccBias)
        } else {
            Vector3::zeros()
        };
        let corrected_accel = accel / acc_scale - acc_bias;

        let mut z = DVector::<f64>::zeros(6);
        z[0] = corrected_accel.x;
        z[1] = corrected_accel.y;
        z[2] = corrected_accel.z;
        z[3] = gyro.x;
        z[4] = gyro.y;
        z[5] = gyro.z;
        z
    }

    /// Per-sample diagonal R: `acc_var` (optionally inflated by the
    /// norm penalty) on the accel rows, `gyro_var` on the gyro rows.
    pub fn build_r(&self, acc_var: f64, gyro_var: f64, raw_accel_norm: f64) -> DMatrix<f64> {
        let mut diag = [acc_var; 6];
        if self.acc_norm_penalty > 0.0 {
            let ndiff = 1.0 - raw_accel_norm;
            let inflate = self.acc_norm_penalty * ndiff * ndiff;
            for d in diag.iter_mut().take(3) {
                *d += inflate;
            }
        }
        diag[3] = gyro_var;
        diag[4] = gyro_var;
        diag[5] = gyro_var;
        DMatrix::<f64>::from_diagonal(&DVector::from_row_slice(&diag))
    }
}

impl MeasurementModel for ImuModel {
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        let q = x.quaternion(&self.layout, Group::Orientation);
        let q_inv = quat_conjugate(&quat_normalize(&q));
        let acc = x.vector3(&self.layout, Group::LinearAcceleration);
        let ang_vel = x.vector3(&self.layout, Group::AngularVelocity);
        let gyro_bias = if self.layout.has(Group::GyroBias) {
            x.vector3(&self.layout, Group::GyroBias)
        } else {
            Vector3::zeros()
        };

        let specific_force = acc / GRAVITY + Vector3::new(0.0, 0.0, 1.0);
        let acc_pred = rotate_by_quat(&q_inv, &specific_force);
        let gyro_pred = rotate_by_quat(&q_inv, &ang_vel) + gyro_bias;

        let mut h_x = DVector::<f64>::zeros(6);
        h_x[0] = acc_pred.x;
        h_x[1] = acc_pred.y;
        h_x[2] = acc_pred.z;
        h_x[3] = gyro_pred.x;
        h_x[4] = gyro_pred.y;
        h_x[5] = gyro_pred.z;

        let n = x.x.len();
        let mut h = DMatrix::<f64>::zeros(6, n);
        let rot = rotation_matrix_from_quat(&q_inv) / GRAVITY;
        if let Some((off, _)) = self.layout.nominal_range(Group::LinearAcceleration) {
            for r in 0..3 {
                for c in 0..3 {
                    h[(r, off + c)] = rot[(r, c)];
                }
            }
        }
        let rot_unscaled = rotation_matrix_from_quat(&q_inv);
        if let Some((off, _)) = self.layout.nominal_range(Group::AngularVelocity) {
            for r in 0..3 {
                for c in 0..3 {
                    h[(3 + r, off + c)] = rot_unscaled[(r, c)];
                }
            }
        }
        if let Some((off, _)) = self.layout.nominal_range(Group::GyroBias) {
            for i in 0..3 {
                h[(3 + i, off + i)] = 1.0;
            }
        }
        (h_x, h)
    }

    fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut MeasurementConfig {
        &mut self.config
    }

    fn adaptive_r(&mut self) -> Option<&mut DMatrix<f64>> {
        self.config.adaptive_r_mut()
    }
}

fn rotation_matrix_from_quat(q: &nalgebra::Quaternion<f64>) -> nalgebra::Matrix3<f64> {
    nalgebra::UnitQuaternion::new_normalize(*q).to_rotation_matrix().into_inner()
}

fn rotate_by_quat(q: &nalgebra::Quaternion<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    nalgebra::UnitQuaternion::new_normalize(*q) * v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    #[test]
    fn predicts_gravity_when_stationary_at_identity() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let model = ImuModel::new(config.imu_tuning, layout, 0.0);
        let (h_x, _h) = model.predict(&x);
        assert!((h_x[2] - 1.0).abs() < 1e-9);
        assert!(h_x.rows(3, 3).norm() < 1e-9);
    }

    #[test]
    fn corrected_measurement_applies_scale_and_bias() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let model = ImuModel::new(config.imu_tuning, layout, 0.0);
        let z = model.corrected_measurement(&x, Vector3::new(0.0, 0.0, 1.0), Vector3::zeros());
        assert!((z[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn acc_norm_penalty_inflates_accel_variance() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let model = ImuModel::new(config.imu_tuning, layout, 1.0);
        let r = model.build_r(1e-3, 1e-5, 2.0);
        assert!(r[(0, 0)] > 1e-3);
    }
}
