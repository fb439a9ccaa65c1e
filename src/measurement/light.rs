//! Optical sweep (light) measurement model, grounded in
//! `survive_kalman_tracker_lighthouse_model`/`map_light_data` in the
//! original C tracker. The symbolic base-station reprojection geometry
//! (pose + per-sensor calibration) is supplied externally and out of scope
//! here — the model is parameterised over a narrow 2x2 function-pointer
//! table indexed by `(Generation, Axis)` rather than open-ended virtual
//! dispatch (see the Design Notes "function-pointer tables" item).

use nalgebra::{DMatrix, DVector, Quaternion, Vector3};

use crate::config::MeasurementTuning;
use crate::linalg::numeric_jacobian;
use crate::measurement::{MeasurementConfig, MeasurementModel};
use crate::state::{Group, State, StateLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    Gen1,
    Gen2,
}

impl Generation {
    fn index(self) -> usize {
        match self {
            Generation::Gen1 => 0,
            Generation::Gen2 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LightSample {
    pub lighthouse_id: u32,
    pub sensor_id: u32,
    pub generation: Generation,
    pub axis: Axis,
    pub value: f64,
    pub timecode: f64,
}

/// `(world_position, world_orientation, lighthouse_id, sensor_id) ->
/// predicted sweep angle`. One entry per `(Generation, Axis)`; the host
/// supplies the table since base-station pose/calibration storage lives
/// outside this core.
pub type Projector = fn(&Vector3<f64>, &Quaternion<f64>, u32, u32) -> f64;

/// A flat-plane stand-in projector: angle between the sensor's position
/// relative to the lighthouse origin and the respective axis, ignoring
/// calibration entirely. Useful as a default for hosts that haven't wired a
/// real base-station model yet, and in tests.
pub fn identity_projector_x(pos: &Vector3<f64>, _q: &Quaternion<f64>, _lh: u32, _sensor: u32) -> f64 {
    (pos.x / pos.z.max(1e-6)).atan()
}

pub fn identity_projector_y(pos: &Vector3<f64>, _q: &Quaternion<f64>, _lh: u32, _sensor: u32) -> f64 {
    (pos.y / pos.z.max(1e-6)).atan()
}

pub fn default_projectors() -> [[Projector; 2]; 2] {
    [
        [identity_projector_x, identity_projector_y],
        [identity_projector_x, identity_projector_y],
    ]
}

pub struct LightModel {
    config: MeasurementConfig,
    layout: StateLayout,
    projectors: [[Projector; 2]; 2],
    numeric_step: f64,
    staged: Vec<LightSample>,
}

impl LightModel {
    pub fn new(tuning: MeasurementTuning, layout: StateLayout, projectors: [[Projector; 2]; 2]) -> Self {
        Self { config: MeasurementConfig::new(tuning), layout, projectors, numeric_step: 1e-6, staged: Vec::new() }
    }

    fn project_one(&self, x: &State, sample: &LightSample) -> f64 {
        let pos = x.vector3(&self.layout, Group::Position);
        let q = x.quaternion(&self.layout, Group::Orientation);
        let f = self.projectors[sample.generation.index()][sample.axis.index()];
        f(&pos, &q, sample.lighthouse_id, sample.sensor_id)
    }

    /// Primes the model with a flushed batch (from [`crate::light_batcher`])
    /// and returns `Z`, clamping each sample's residual against the
    /// *current* state prediction to `±max_error` (0 disables clamping) —
    /// grounded in the admission rule "clamp each residual to
    /// ±lightcap_max_error if configured". Clamping here, rather than in the
    /// EKF core, keeps the clamp specific to this one model.
    pub fn stage(&mut self, x: &State, samples: Vec<LightSample>, max_error: f64) -> DVector<f64> {
        let mut z = DVector::<f64>::zeros(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            let predicted = self.project_one(x, sample);
            let mut residual = sample.value - predicted;
            if max_error > 0.0 {
                residual = residual.clamp(-max_error, max_error);
            }
            z[i] = predicted + residual;
        }
        self.staged = samples;
        z
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Stacks residual/Jacobian rows for the staged batch; the Jacobian is
    /// numeric since the projector is an opaque injected function.
    fn predict_batch(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        let n = x.x.len();
        let m = self.staged.len();
        let mut h_x = DVector::<f64>::zeros(m);
        let mut h = DMatrix::<f64>::zeros(m, n);
        let base_t = x.t;
        for (row, sample) in self.staged.iter().enumerate() {
            h_x[row] = self.project_one(x, sample);
            let sample = *sample;
            let layout = self.layout.clone();
            let projectors = self.projectors;
            let step = self.numeric_step;
            let jac_row = numeric_jacobian(
                move |xv| {
                    let s = State { x: xv.clone(), t: base_t };
                    let pos = s.vector3(&layout, Group::Position);
                    let q = s.quaternion(&layout, Group::Orientation);
                    let f = projectors[sample.generation.index()][sample.axis.index()];
                    DVector::from_vec(vec![f(&pos, &q, sample.lighthouse_id, sample.sensor_id)])
                },
                &x.x,
                step,
            );
            h.set_row(row, &jac_row.row(0));
        }
        (h_x, h)
    }
}

impl MeasurementModel for LightModel {
    fn predict(&self, x: &State) -> (DVector<f64>, DMatrix<f64>) {
        self.predict_batch(x)
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

    /// Light iterates a Gauss-Newton refinement by default, every other
    /// model is a single EKF pass.
    fn default_max_iterations(&self) -> u32 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn sample(value: f64) -> LightSample {
        LightSample { lighthouse_id: 0, sensor_id: 0, generation: Generation::Gen1, axis: Axis::X, value, timecode: 0.0 }
    }

    #[test]
    fn stage_returns_one_row_per_sample() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut x = State::identity(&layout);
        x.set_group(&layout, Group::Position, &DVector::from_vec(vec![0.0, 0.0, 1.0]));
        let mut model = LightModel::new(config.light_tuning, layout, default_projectors());
        let z = model.stage(&x, vec![sample(0.1), sample(-0.2)], 0.0);
        assert_eq!(z.len(), 2);
        assert_eq!(model.staged_len(), 2);
    }

    #[test]
    fn clamp_limits_residual_magnitude() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut x = State::identity(&layout);
        x.set_group(&layout, Group::Position, &DVector::from_vec(vec![0.0, 0.0, 1.0]));
        let mut model = LightModel::new(config.light_tuning, layout, default_projectors());
        let predicted = model.project_one(&x, &sample(0.0));
        let z = model.stage(&x, vec![sample(predicted + 10.0)], 0.05);
        assert!((z[0] - predicted).abs() <= 0.05 + 1e-9);
    }

    #[test]
    fn predict_dimension_matches_staged_batch() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let mut model = LightModel::new(config.light_tuning, layout, default_projectors());
        model.stage(&x, vec![sample(0.0), sample(0.0), sample(0.0)], 0.0);
        let (h_x, h) = model.predict(&x);
        assert_eq!(h_x.len(), 3);
        assert_eq!(h.nrows(), 3);
    }

    #[test]
    fn default_max_iterations_is_ten() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let model = LightModel::new(config.light_tuning, layout, default_projectors());
        assert_eq!(model.default_max_iterations(), 10);
    }
}
