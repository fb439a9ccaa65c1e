//! Tunable configuration: one struct, one `Default` impl with every knob
//! spelled out, mirroring `STRUCT_CONFIG_SECTION(SurviveKalmanTracker)`
//! in the original C tracker.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseModel {
    /// Mixed jerk/accel/velocity/position polynomial (the default).
    Polynomial,
    /// Fixed per-axis variance multiplied by `dt`.
    FlatPerDt,
}

/// How a measurement model computes its Jacobian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JacobianMode {
    Analytical,
    Numeric,
    /// Computes both and asserts they agree; logs and falls back to the
    /// analytical result on disagreement. Exists purely for cross-checking
    /// the hand-derived analytical Jacobians against finite differences.
    Debug,
}

/// Per-measurement-model tuning, applied identically to the pose, IMU,
/// light and ZVU models (`kalman-<model>-{adaptive,iterations,jacobian-mode,
/// step-size,error-state-model}` in the original tuning surface).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MeasurementTuning {
    pub adaptive: bool,
    /// `-1` means "use the model's own default" (10 for light, 1 otherwise).
    pub max_iterations: i32,
    pub jacobian_mode: JacobianMode,
    /// `-1` means "use the model's own default step".
    pub numeric_step_size: f64,
    pub error_state_model: bool,
}

impl Default for MeasurementTuning {
    fn default() -> Self {
        Self {
            adaptive: false,
            max_iterations: -1,
            jacobian_mode: JacobianMode::Analytical,
            numeric_step_size: -1.0,
            error_state_model: true,
        }
    }
}

impl MeasurementTuning {
    pub fn resolved_max_iterations(&self, model_default: u32) -> u32 {
        if self.max_iterations < 0 {
            model_default
        } else {
            self.max_iterations as u32
        }
    }

    pub fn resolved_step_size(&self, model_default: f64) -> f64 {
        if self.numeric_step_size < 0.0 {
            model_default
        } else {
            self.numeric_step_size
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    // --- reporting / validity ---
    pub light_error_threshold: f64,
    pub min_report_time: f64,
    pub report_covariance: bool,
    pub report_sampled_cloud: bool,
    pub report_ignore_start: u32,
    pub report_ignore_threshold: f64,

    // --- light admission ---
    pub light_ignore_threshold: f64,
    pub light_required_obs: u32,
    pub light_max_error: f64,
    pub kalman_light_variance: f64,
    pub light_batch_size: usize,
    pub light_error_for_lh_confidence: bool,

    // --- pose observation ---
    pub obs_cov_scale: f64,
    pub obs_pos_variance: f64,
    pub obs_rot_variance: f64,
    pub kalman_obs_axisangle: bool,
    pub use_raw_obs: bool,

    // --- state space shape ---
    pub kalman_minimize_state_space: bool,
    pub kalman_use_error_space: bool,
    pub kalman_initial_imu_correction_variance: f64,
    pub kalman_initial_acc_scale_variance: f64,

    // --- process noise weights ---
    pub process_weight_jerk: f64,
    pub process_weight_acc: f64,
    pub process_weight_ang_vel: f64,
    pub process_weight_vel: f64,
    pub process_weight_pos: f64,
    pub process_weight_rot: f64,
    pub process_weight_acc_bias: f64,
    pub process_weight_gyro_bias: f64,
    pub kalman_noise_model: NoiseModel,
    /// Only used when `kalman_noise_model == FlatPerDt`.
    pub flat_noise_pos: f64,
    pub flat_noise_rot: f64,
    pub flat_noise_vel: f64,
    pub flat_noise_ang_vel: f64,
    pub flat_noise_acc: f64,

    // --- IMU measurement ---
    pub imu_acc_variance: f64,
    pub imu_gyro_variance: f64,
    pub imu_acc_norm_penalty: f64,

    // --- ZVU ---
    pub kalman_zvu_moving: f64,
    pub kalman_zvu_stationary: f64,
    pub kalman_zvu_no_light: f64,
    pub zvu_stationary_time_s: f64,
    pub zvu_no_light_time_s: f64,

    // --- per-model tuning ---
    pub obs_tuning: MeasurementTuning,
    pub imu_tuning: MeasurementTuning,
    pub light_tuning: MeasurementTuning,
    pub zvu_tuning: MeasurementTuning,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            light_error_threshold: -1.0,
            min_report_time: -1.0,
            report_covariance: false,
            report_sampled_cloud: false,
            report_ignore_start: 0,
            report_ignore_threshold: 1e-1,

            light_ignore_threshold: 1.0,
            light_required_obs: 16,
            light_max_error: -1.0,
            kalman_light_variance: -1.0,
            light_batch_size: 32,
            light_error_for_lh_confidence: false,

            obs_cov_scale: 1.0,
            obs_pos_variance: 1e-6,
            obs_rot_variance: 1e-7,
            kalman_obs_axisangle: false,
            use_raw_obs: false,

            kalman_minimize_state_space: true,
            kalman_use_error_space: true,
            kalman_initial_imu_correction_variance: 0.0,
            kalman_initial_acc_scale_variance: 0.0,

            process_weight_jerk: 1_874_161.0,
            process_weight_acc: 0.0,
            process_weight_ang_vel: 60.0,
            process_weight_vel: 0.0,
            process_weight_pos: 0.0,
            process_weight_rot: 0.0,
            process_weight_acc_bias: 0.0,
            process_weight_gyro_bias: 0.0,
            kalman_noise_model: NoiseModel::Polynomial,
            flat_noise_pos: 1e-3,
            flat_noise_rot: 1e-4,
            flat_noise_vel: 1e-2,
            flat_noise_ang_vel: 1e-2,
            flat_noise_acc: 1e-1,

            imu_acc_variance: 1e-3,
            imu_gyro_variance: 3.04617e-5,
            imu_acc_norm_penalty: 0.0,

            kalman_zvu_moving: -1.0,
            kalman_zvu_stationary: 1e-2,
            kalman_zvu_no_light: 1e-4,
            zvu_stationary_time_s: 4.8,
            zvu_no_light_time_s: 0.1,

            obs_tuning: MeasurementTuning::default(),
            imu_tuning: MeasurementTuning::default(),
            light_tuning: MeasurementTuning::default(),
            zvu_tuning: MeasurementTuning::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = TrackerConfig::default();
        assert_eq!(c.light_required_obs, 16);
        assert_eq!(c.light_batch_size, 32);
        assert!((c.imu_gyro_variance - 3.04617e-5).abs() < 1e-10);
        assert_eq!(c.kalman_noise_model, NoiseModel::Polynomial);
    }
}
