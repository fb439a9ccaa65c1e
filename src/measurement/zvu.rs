//! Zero-velocity update, grounded in
//! `survive_kalman_tracker_zvu_measurement_model` in the original C tracker.
//! A pseudo-measurement: `Z` is always zero, `h(x)` projects linear velocity,
//! acceleration, and (unless disabled) angular velocity straight out of the
//! state.

use nalgebra::{DMatrix, DVector};

use crate::config::{MeasurementTuning, TrackerConfig};
use crate::measurement::{MeasurementConfig, MeasurementModel};
use crate::state::{Group, State, StateLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZvuVarianceMode {
    Stationary,
    NoLight,
    Moving,
}

pub struct ZvuModel {
    config: MeasurementConfig,
    layout: StateLayout,
    /// `no_light && !stationary`: angular-velocity rows are dropped from H.
    disable_ang_vel: bool,
    mode: ZvuVarianceMode,
}

impl ZvuModel {
    pub fn new(tuning: MeasurementTuning, layout: StateLayout) -> Self {
        Self { config: MeasurementConfig::new(tuning), layout, disable_ang_vel: false, mode: ZvuVarianceMode::Moving }
    }

    /// Primes the model for the next update; called by the orchestrator
    /// with the current stationarity/light-visibility state.
    pub fn set_mode(&mut self, stationary: bool, no_light_seen: bool) {
        self.disable_ang_vel = no_light_seen && !stationary;
        self.mode = if stationary {
            ZvuVarianceMode::Stationary
        } else if no_light_seen {
            ZvuVarianceMode::NoLight
        } else {
            ZvuVarianceMode::Moving
        };
    }

    fn rows(&self) -> usize {
        if self.disable_ang_vel {
            6
        } else {
            9
        }
    }

    /// Variance for this update from `{kalman_zvu_stationary,
    /// kalman_zvu_no_light, kalman_zvu_moving}`. A negative value (the
    /// `kalman_zvu_moving` default) means the orchestrator should skip the
    /// update entirely rather than call this.
    pub fn variance(&self, config: &TrackerConfig) -> f64 {
        match self.mode {
            ZvuVarianceMode::Stationary => config.kalman_zvu_stationary,
            ZvuVarianceMode::NoLight => config.kalman_zvu_no_light,
            ZvuVarianceMode::Moving => config.kalman_zvu_moving,
        }
    }

    pub fn build_r(&self, config: &TrackerConfig) -> DMatrix<f64> {
        let v = self.variance(config).max(0.0);
        DMatrix::<f64>::from_diagonal(&DVector::from_element(self.rows(), v))
    }

    pub fn z(&self) -> DVector<f64> {
        DVector::<f64>::zeros(self.rows())
    }
}

impl MeasurementModel for ZvuModel {
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        let n = x.x.len();
        let m = self.rows();
        let mut h_x = DVector::<f64>::zeros(m);
        let mut h = DMatrix::<f64>::zeros(m, n);

        let vel = x.vector3(&self.layout, Group::LinearVelocity);
        h_x[0] = vel.x;
        h_x[1] = vel.y;
        h_x[2] = vel.z;
        if let Some((off, _)) = self.layout.nominal_range(Group::LinearVelocity) {
            for i in 0..3 {
                h[(i, off + i)] = 1.0;
            }
        }

        let acc = x.vector3(&self.layout, Group::LinearAcceleration);
        h_x[3] = acc.x;
        h_x[4] = acc.y;
        h_x[5] = acc.z;
        if let Some((off, _)) = self.layout.nominal_range(Group::LinearAcceleration) {
            for i in 0..3 {
                h[(3 + i, off + i)] = 1.0;
            }
        }

        if !self.disable_ang_vel {
            let ang_vel = x.vector3(&self.layout, Group::AngularVelocity);
            h_x[6] = ang_vel.x;
            h_x[7] = ang_vel.y;
            h_x[8] = ang_vel.z;
            if let Some((off, _)) = self.layout.nominal_range(Group::AngularVelocity) {
                for i in 0..3 {
                    h[(6 + i, off + i)] = 1.0;
                }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_drop_angular_velocity_when_no_light_and_moving() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut model = ZvuModel::new(config.zvu_tuning, layout);
        model.set_mode(false, true);
        assert_eq!(model.rows(), 6);
        model.set_mode(true, true);
        assert_eq!(model.rows(), 9);
        model.set_mode(false, false);
        assert_eq!(model.rows(), 9);
    }

    #[test]
    fn predict_echoes_velocity_and_acceleration() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut x = State::identity(&layout);
        x.set_group(&layout, Group::LinearVelocity, &DVector::from_vec(vec![1.0, 2.0, 3.0]));
        let model = ZvuModel::new(config.zvu_tuning, layout);
        let (h_x, _h) = model.predict(&x);
        assert!((h_x[0] - 1.0).abs() < 1e-12);
        assert!((h_x[1] - 2.0).abs() < 1e-12);
        assert!((h_x[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn variance_selects_by_mode() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut model = ZvuModel::new(config.zvu_tuning, layout);
        model.set_mode(true, false);
        assert!((model.variance(&config) - config.kalman_zvu_stationary).abs() < 1e-12);
        model.set_mode(false, true);
        assert!((model.variance(&config) - config.kalman_zvu_no_light).abs() < 1e-12);
        model.set_mode(false, false);
        assert!((model.variance(&config) - config.kalman_zvu_moving).abs() < 1e-12);
    }
}
