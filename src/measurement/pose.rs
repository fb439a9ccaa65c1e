//! Pose observation model: two variants, grounded in
//! `map_obs_data`/`map_obs_data_axisangle` in the original C tracker.

use nalgebra::{DMatrix, DVector, Quaternion, Vector3};

use crate::config::MeasurementTuning;
use crate::measurement::{MeasurementConfig, MeasurementModel};
use crate::state::{quat_conjugate, quat_log, quat_mul, quat_normalize, State};

/// `h(x) = x[0..7]` (position + orientation), identity `H` on the pose
/// block. The straightforward variant; used whenever
/// `kalman_obs_axisangle == false`. Position and orientation are always at
/// nominal offsets `0` and `3` — those two groups are never truncated.
pub struct PoseQuaternionModel {
    config: MeasurementConfig,
}

impl PoseQuaternionModel {
    pub fn new(tuning: MeasurementTuning) -> Self {
        Self { config: MeasurementConfig::new(tuning) }
    }
}

impl MeasurementModel for PoseQuaternionModel {
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        let h_x = DVector::from_row_slice(&x.x.as_slice()[0..7]);
        let mut h = DMatrix::<f64>::zeros(7, x.x.len());
        for i in 0..7 {
            h[(i, i)] = 1.0;
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

/// 6-DoF tangent-space variant: the residual is a position delta plus an
/// axis-angle rotation delta computed with a "no-flip" mapping, reflected
/// to its `2π` complement when its magnitude exceeds `π` so the filter
/// never has to cross the antipodal quaternion discontinuity.
///
/// The rotation residual cannot be expressed as a plain `Z - h(x)`
/// subtraction (it needs quaternion composition against the *current*
/// predicted orientation), so the model is primed with the observed pose
/// via [`PoseAxisAngleModel::observe`] immediately before each
/// [`crate::ekf::Ekf::update`] call: `observe` returns the `Z` to pass in
/// (position only — the rotation residual is folded directly into `h(x)`
/// as its negation, so the generic `y = Z - h(x)` subtraction still comes
/// out right).
pub struct PoseAxisAngleModel {
    config: MeasurementConfig,
    pending_obs_quat: Quaternion<f64>,
}

impl PoseAxisAngleModel {
    pub fn new(tuning: MeasurementTuning) -> Self {
        Self {
            config: MeasurementConfig::new(tuning),
            pending_obs_quat: Quaternion::new(1.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn observe(&mut self, obs_pos: Vector3<f64>, obs_quat: Quaternion<f64>) -> DVector<f64> {
        self.pending_obs_quat = quat_normalize(&obs_quat);
        let mut z = DVector::<f64>::zeros(6);
        z[0] = obs_pos.x;
        z[1] = obs_pos.y;
        z[2] = obs_pos.z;
        z
    }

    /// Tangent-space rotation delta from the predicted orientation to the
    /// primed observation, with the `|axis-angle| > π` flip applied.
    /// Returns `(delta, has_flip)`.
    fn rotation_residual(&self, q_pred: &Quaternion<f64>) -> (Vector3<f64>, bool) {
        let delta = quat_mul(&quat_conjugate(q_pred), &self.pending_obs_quat);
        let mut rot_err = quat_log(&quat_normalize(&delta));
        let mag2 = rot_err.norm_squared();
        let has_flip = mag2 > std::f64::consts::PI * std::f64::consts::PI;
        if has_flip {
            let mag = mag2.sqrt();
            rot_err *= (mag - 2.0 * std::f64::consts::PI) / mag;
        }
        (rot_err, has_flip)
    }
}

impl MeasurementModel for PoseAxisAngleModel {
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        let q_pred = quat_normalize(&Quaternion::new(x.x[3], x.x[4], x.x[5], x.x[6]));
        let (rot_err, has_flip) = self.rotation_residual(&q_pred);

        let mut h_x = DVector::<f64>::zeros(6);
        h_x[0] = x.x[0];
        h_x[1] = x.x[1];
        h_x[2] = x.x[2];
        h_x[3] = -rot_err.x;
        h_x[4] = -rot_err.y;
        h_x[5] = -rot_err.z;

        let n = x.x.len();
        let mut h = DMatrix::<f64>::zeros(6, n);
        for i in 0..3 {
            h[(i, i)] = 1.0;
        }
        // Orientation occupies nominal columns 3..7 as (qw,qx,qy,qz); the
        // rotation residual's sensitivity lives in the qx,qy,qz columns (4,5,6)
        // — qw's column is the tangent-basis row that vanishes to first order
        // at a renormalized quaternion, so the diagonal is offset by one.
        let rot_sign = if has_flip { 1.0 } else { -1.0 };
        for i in 0..3 {
            h[(3 + i, 4 + i)] = rot_sign;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::state::StateLayout;

    #[test]
    fn quaternion_variant_predicts_pose_block_identity() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let model = PoseQuaternionModel::new(config.obs_tuning);
        let (h_x, h) = model.predict(&x);
        assert_eq!(h_x.len(), 7);
        assert!((h_x[3] - 1.0).abs() < 1e-12);
        assert!((h[(0, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn axis_angle_no_flip_matches_small_rotation() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let mut model = PoseAxisAngleModel::new(config.obs_tuning);
        let obs_quat = crate::state::quat_exp(&Vector3::new(0.1, 0.0, 0.0));
        let z = model.observe(Vector3::zeros(), obs_quat);
        let (h_x, _h) = model.predict(&x);
        let y = &z - &h_x;
        assert!((y[3] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn axis_angle_flips_for_antipodal_quaternion() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let mut model = PoseAxisAngleModel::new(config.obs_tuning);
        // Just past the antipode: axis-angle magnitude would exceed π without the flip branch.
        let near_antipode = crate::state::quat_exp(&Vector3::new(std::f64::consts::PI + 0.1, 0.0, 0.0));
        let z = model.observe(Vector3::zeros(), near_antipode);
        let (h_x, _h) = model.predict(&x);
        let y = &z - &h_x;
        assert!(y.rows(3, 3).norm() < std::f64::consts::PI);
    }

    #[test]
    fn axis_angle_update_drives_orientation_residual_toward_zero() {
        // Wires PoseAxisAngleModel through Ekf::update (rather than just
        // inspecting predict()'s residual) so a wrong H actually fails this
        // test via a non-shrinking or divergent correction.
        let mut config = TrackerConfig::default();
        config.kalman_obs_axisangle = true;
        let mut ekf = crate::ekf::Ekf::new(config.clone());

        let mut model = PoseAxisAngleModel::new(config.obs_tuning);
        let target_quat = crate::state::quat_exp(&Vector3::new(0.2, -0.1, 0.05));
        let r = DMatrix::<f64>::from_diagonal(&nalgebra::DVector::from_element(6, 1e-6));

        let mut last = f64::INFINITY;
        for _ in 0..8 {
            let z = model.observe(Vector3::zeros(), target_quat);
            let norm = ekf.update(&mut model, &z, Some(&r)).unwrap();
            assert!(norm <= last + 1e-9);
            last = norm;
        }

        let q_final = ekf.x.quaternion(&ekf.layout, crate::state::Group::Orientation);
        let delta = quat_mul(&quat_conjugate(&q_final), &target_quat);
        let residual = quat_log(&quat_normalize(&delta));
        assert!(residual.norm() < 1e-2);
    }
}
