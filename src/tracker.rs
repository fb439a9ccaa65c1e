//! Tracker orchestrator: admission gating, back-date handling,
//! light-sample batching, reporting cadence, divergence detection and
//! reset, and the small state machine over the lifetime of one tracked
//! object. Grounded in `survive_kalman_tracker_integrate_{imu,light,
//! observation}` / `survive_kalman_tracker_report_state` /
//! `survive_kalman_tracker_check_valid` / `survive_kalman_tracker_lost_tracking`
//! in the original C tracker.
//!
//! Stationarity (used to gate ZVU variance selection and the bias
//! variance trackers) is computed locally from gyro/accel-norm deviation
//! held below threshold for `zvu_stationary_time_s` seconds: the original's
//! `SurviveSensorActivations_stationary_time` lives in the sensor front-end
//! (out of scope here), so this is a from-scratch but equivalent
//! local reconstruction (see `DESIGN.md` for the reasoning).

use std::collections::HashSet;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Quaternion, Vector3};

use crate::config::TrackerConfig;
use crate::ekf::Ekf;
use crate::light_batcher::LightBatcher;
use crate::measurement::imu::ImuModel;
use crate::measurement::light::{default_projectors, Axis, Generation, LightModel, LightSample, Projector};
use crate::measurement::pose::{PoseAxisAngleModel, PoseQuaternionModel};
use crate::measurement::zvu::ZvuModel;
use crate::measurement::MeasurementModel;
use crate::stats::TrackerStats;
use crate::state::{quat_conjugate, quat_log, quat_mul, Group, State};

const GRAVITY: f64 = 9.80665;
const STATIONARY_GYRO_THRESHOLD: f64 = 0.05;
const STATIONARY_ACCEL_DEVIATION: f64 = 0.05;
const MAX_LIGHT_BUFFER: usize = 64;
const COLD_START_OBS: u64 = 16;

/// Per-tracker lifecycle state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialised,
    Cold,
    Warmup,
    Running,
    Reset,
}

#[derive(Clone, Copy, Debug)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: Quaternion<f64>,
}

/// Emitted by the orchestrator to `Reporter::{on_imu_pose,on_velocity}`,
/// grounded in `survive_kalman_tracker_report_state`'s `SurvivePose`
/// broadcast plus its finite-difference velocity computation.
#[derive(Clone, Copy, Debug)]
pub struct TrackerReport {
    pub t: f64,
    pub pose: Pose,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity_axis_angle: Vector3<f64>,
}

/// Host callback surface. Invoked only for validated reports, never for
/// cold-start or gated-out measurements.
pub trait Reporter {
    fn on_imu_pose(&mut self, report: &TrackerReport);
    fn on_velocity(&mut self, report: &TrackerReport);
}

/// A [`Reporter`] that discards every report; useful when a host only
/// wants to poll [`Tracker::stats`]/[`Tracker::ekf`] directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn on_imu_pose(&mut self, _report: &TrackerReport) {}
    fn on_velocity(&mut self, _report: &TrackerReport) {}
}

enum ObsModel {
    Quaternion(PoseQuaternionModel),
    AxisAngle(PoseAxisAngleModel),
}

pub struct Tracker<R: Reporter> {
    pub ekf: Ekf,
    config: TrackerConfig,
    stats: TrackerStats,
    state: TrackerState,
    obs_model: ObsModel,
    imu_model: ImuModel,
    light_model: LightModel,
    zvu_model: ZvuModel,
    light_batcher: LightBatcher,
    known_base_stations: HashSet<u32>,
    last_light_time: f64,
    last_report_time: Option<f64>,
    previous_report: Option<(f64, State)>,
    report_ignore_start_cnt: u32,
    imu_hz_estimate: f64,
    last_imu_time: Option<f64>,
    stationary_since: Option<f64>,
    reporter: R,
}

impl<R: Reporter> Tracker<R> {
    pub fn new(config: TrackerConfig, reporter: R) -> Self {
        Self::with_projectors(config, default_projectors(), reporter)
    }

    /// As [`Tracker::new`], but with a host-supplied base-station
    /// reprojection table instead of the flat-plane stand-in (the real
    /// symbolic projection math is out of scope here).
    pub fn with_projectors(config: TrackerConfig, projectors: [[Projector; 2]; 2], reporter: R) -> Self {
        let ekf = Ekf::new(config.clone());
        let layout = ekf.layout.clone();
        let obs_model = if config.kalman_obs_axisangle {
            ObsModel::AxisAngle(PoseAxisAngleModel::new(config.obs_tuning))
        } else {
            ObsModel::Quaternion(PoseQuaternionModel::new(config.obs_tuning))
        };
        let imu_model = ImuModel::new(config.imu_tuning, layout.clone(), config.imu_acc_norm_penalty);
        let light_model = LightModel::new(config.light_tuning, layout.clone(), projectors);
        let zvu_model = ZvuModel::new(config.zvu_tuning, layout);
        let light_batcher = LightBatcher::new(config.light_batch_size, MAX_LIGHT_BUFFER.max(config.light_batch_size));

        Self {
            ekf,
            config,
            stats: TrackerStats::new(),
            state: TrackerState::Uninitialised,
            obs_model,
            imu_model,
            light_model,
            zvu_model,
            light_batcher,
            known_base_stations: HashSet::new(),
            last_light_time: 0.0,
            last_report_time: None,
            previous_report: None,
            report_ignore_start_cnt: 0,
            imu_hz_estimate: 1000.0,
            last_imu_time: None,
            stationary_since: None,
            reporter,
        }
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The sensor front-end informs the core when a base station's pose
    /// becomes known (or is invalidated); light samples from unknown base
    /// stations are dropped at admission.
    pub fn set_base_station_known(&mut self, lighthouse_id: u32, known: bool) {
        if known {
            self.known_base_stations.insert(lighthouse_id);
        } else {
            self.known_base_stations.remove(&lighthouse_id);
        }
    }

    /// Marks every base station as unset, mirroring `lost_tracking`'s
    /// `ctx->bsd[lh].PositionSet = 0` sweep when no tracked object in the
    /// system remains valid; callers drive this decision since it depends
    /// on state outside a single tracker.
    pub fn mark_all_base_stations_unset(&mut self) {
        self.known_base_stations.clear();
    }

    /// Explicit host-triggered reset (distinct from the internal
    /// divergence-triggered reset, which additionally may clear base
    /// stations per `light_error_for_lh_confidence`).
    pub fn reset(&mut self) {
        self.do_reset(false);
    }

    fn do_reset(&mut self, clear_base_stations: bool) {
        self.ekf.reset();
        self.stats = TrackerStats::new();
        self.light_batcher = LightBatcher::new(
            self.config.light_batch_size,
            MAX_LIGHT_BUFFER.max(self.config.light_batch_size),
        );
        self.last_light_time = 0.0;
        self.stationary_since = None;
        self.report_ignore_start_cnt = 0;
        self.last_report_time = None;
        self.previous_report = None;
        self.state = TrackerState::Reset;
        if clear_base_stations {
            self.known_base_stations.clear();
        }
        debug!("tracker state -> Reset");
    }

    fn is_stationary(&self) -> bool {
        self.stationary_since
            .map_or(false, |t0| self.ekf.t() - t0 >= self.config.zvu_stationary_time_s)
    }

    fn update_stationary(&mut self, t: f64, accel: &Vector3<f64>, gyro: &Vector3<f64>) {
        let moving =
            gyro.norm() > STATIONARY_GYRO_THRESHOLD || (accel.norm() / GRAVITY - 1.0).abs() > STATIONARY_ACCEL_DEVIATION;
        if moving {
            self.stationary_since = None;
        } else if self.stationary_since.is_none() {
            self.stationary_since = Some(t);
        }
    }

    /// `‖diag(P)[pose block]‖²`, used by both the light admission gate and
    /// the report validity gate.
    fn positional_variance(&self) -> f64 {
        let layout = &self.ekf.layout;
        let use_err = self.config.kalman_use_error_space;
        let mut sumsq = 0.0;
        for group in [Group::Position, Group::Orientation] {
            let range = if use_err { layout.error_range(group) } else { layout.nominal_range(group) };
            if let Some((off, dim)) = range {
                for i in off..off + dim {
                    sumsq += self.ekf.p[(i, i)] * self.ekf.p[(i, i)];
                }
            }
        }
        sumsq
    }

    fn transition_on_valid_pose(&mut self) {
        if matches!(self.state, TrackerState::Uninitialised | TrackerState::Reset) {
            self.state = TrackerState::Cold;
        }
        if self.state == TrackerState::Cold && self.ekf.t() > 0.0 {
            self.state = TrackerState::Warmup;
            debug!("tracker state -> Warmup");
        }
        if self.state == TrackerState::Warmup && self.stats.obs_count >= COLD_START_OBS {
            self.state = TrackerState::Running;
            debug!("tracker state -> Running");
        }
    }

    /// Divergence check: rolling light-residual average over threshold
    /// while not stationary, or any position component exceeding ±20m.
    /// Triggers `do_reset` and returns `false` on trip.
    fn check_valid(&mut self) -> bool {
        let residual_trip = self.config.light_error_threshold > 0.0
            && self.stats.light_residual_avg > self.config.light_error_threshold
            && !self.is_stationary();
        let pos = self.ekf.x.vector3(&self.ekf.layout, Group::Position);
        let bounds_trip = pos.iter().any(|c| c.abs() > 20.0);
        if residual_trip || bounds_trip {
            warn!(
                "tracker diverged (light_residual_avg={:.4e}, position={:?}); resetting",
                self.stats.light_residual_avg,
                pos.as_slice()
            );
            self.do_reset(self.config.light_error_for_lh_confidence);
            return false;
        }
        true
    }

    fn effective_min_report_time(&self) -> f64 {
        if self.config.min_report_time < 0.0 {
            1.0 / self.imu_hz_estimate.max(1.0)
        } else {
            self.config.min_report_time
        }
    }

    fn velocity_from_diff(&self, t: f64, x: &State) -> (Vector3<f64>, Vector3<f64>) {
        match &self.previous_report {
            Some((t_prev, x_prev)) if t > *t_prev + 1e-12 => {
                let dt = t - t_prev;
                let lin = (x.vector3(&self.ekf.layout, Group::Position)
                    - x_prev.vector3(&self.ekf.layout, Group::Position))
                    / dt;
                let q0 = x_prev.quaternion(&self.ekf.layout, Group::Orientation);
                let q1 = x.quaternion(&self.ekf.layout, Group::Orientation);
                let dq = quat_mul(&quat_conjugate(&q0), &q1);
                let ang = quat_log(&dq) / dt;
                (lin, ang)
            }
            _ => (
                x.vector3(&self.ekf.layout, Group::LinearVelocity),
                x.vector3(&self.ekf.layout, Group::AngularVelocity),
            ),
        }
    }

    /// Reporting cadence and validity: normalise, extrapolate to `t`,
    /// check divergence, then gate on `report_ignore_start` and
    /// `report_ignore_threshold` before invoking the reporter.
    fn try_report(&mut self, t: f64) {
        if let Some(last) = self.last_report_time {
            if t - last < self.effective_min_report_time() {
                return;
            }
        }
        if !self.check_valid() {
            return;
        }
        let extrapolated = self.ekf.extrapolate(t);

        self.report_ignore_start_cnt += 1;
        if self.report_ignore_start_cnt <= self.config.report_ignore_start {
            return;
        }

        if self.positional_variance() > self.config.report_ignore_threshold {
            self.stats.dropped_poses += 1;
            return;
        }

        let (linear_velocity, angular_velocity_axis_angle) = self.velocity_from_diff(t, &extrapolated);
        let report = TrackerReport {
            t,
            pose: Pose {
                position: extrapolated.vector3(&self.ekf.layout, Group::Position),
                orientation: extrapolated.quaternion(&self.ekf.layout, Group::Orientation),
            },
            linear_velocity,
            angular_velocity_axis_angle,
        };
        self.reporter.on_imu_pose(&report);
        self.reporter.on_velocity(&report);
        self.stats.reported_poses += 1;
        self.previous_report = Some((t, extrapolated));
        self.last_report_time = Some(t);
    }

    /// Integrates one IMU sample. Uninitialised (before any pose obs) or
    /// cold-start (`obs_count < 16`) drop silently; more than
    /// 10ms in the past drops and counts `late_imu_dropped`; more than
    /// 0.5s in the past only warns. Runs ZVU (if configured) then the
    /// accel/gyro correction, then attempts a report.
    pub fn integrate_imu(&mut self, t: f64, accel: Vector3<f64>, gyro: Vector3<f64>) {
        if self.config.use_raw_obs {
            return;
        }
        if self.ekf.t() == 0.0 {
            return;
        }
        if self.stats.obs_count < COLD_START_OBS && self.config.obs_pos_variance > -1.0 {
            return;
        }

        if let Some(last) = self.last_imu_time {
            let dt = t - last;
            if dt > 1e-6 {
                self.imu_hz_estimate = 0.9 * self.imu_hz_estimate + 0.1 * (1.0 / dt);
            }
        }
        self.last_imu_time = Some(t);

        let time_diff = t - self.ekf.t();
        if time_diff < -0.01 {
            self.stats.late_imu_dropped += 1;
            return;
        }
        if time_diff > 0.5 {
            warn!("probable dropped IMU packets: {time_diff:.3}s gap");
        }

        if self.ekf.predict_to(t).is_err() {
            warn!("imu predict skipped: numerical instability");
            return;
        }

        self.update_stationary(t, &accel, &gyro);
        let is_stationary = self.is_stationary();
        let no_light = (t - self.last_light_time) > self.config.zvu_no_light_time_s;

        self.zvu_model.set_mode(is_stationary, no_light);
        let zvu_var = self.zvu_model.variance(&self.config);
        if zvu_var >= 0.0 {
            let z = self.zvu_model.z();
            let r = self.zvu_model.build_r(&self.config);
            let zvu_result = if self.config.zvu_tuning.adaptive {
                self.zvu_model.config_mut().ensure_adaptive_r(&r);
                self.ekf.update(&mut self.zvu_model, &z, None)
            } else {
                self.ekf.update(&mut self.zvu_model, &z, Some(&r))
            };
            if let Err(e) = zvu_result {
                warn!("zvu update skipped: {e}");
            }
        }

        let z = self.imu_model.corrected_measurement(&self.ekf.x, accel, gyro);
        let r = self.imu_model.build_r(self.config.imu_acc_variance, self.config.imu_gyro_variance, accel.norm());
        let result = if self.config.imu_tuning.adaptive {
            self.imu_model.config_mut().ensure_adaptive_r(&r);
            self.ekf.update(&mut self.imu_model, &z, None)
        } else {
            self.ekf.update(&mut self.imu_model, &z, Some(&r))
        };
        match result {
            Ok(norm) => {
                let accelgyro = [accel.x, accel.y, accel.z, gyro.x, gyro.y, gyro.z];
                self.stats.record_imu(norm, &accelgyro, accel.norm(), is_stationary);
            }
            Err(e) => warn!("imu update skipped: {e}"),
        }

        self.try_report(t);
    }

    /// Integrates one pre-solved pose observation. `use_raw_obs` bypasses
    /// the filter entirely; otherwise late observations within 100ms are
    /// clamped to filter time (the provided `R` is never augmented for the
    /// clamp — see `DESIGN.md`), older ones are dropped and counted.
    pub fn integrate_observation(&mut self, t: f64, position: Vector3<f64>, orientation: Quaternion<f64>, r7: Option<DMatrix<f64>>) {
        if self.config.use_raw_obs {
            let report = TrackerReport {
                t,
                pose: Pose { position, orientation },
                linear_velocity: Vector3::zeros(),
                angular_velocity_axis_angle: Vector3::zeros(),
            };
            self.reporter.on_imu_pose(&report);
            return;
        }

        if self.ekf.t() == 0.0 {
            self.ekf.x.t = t;
        }

        let mut t_use = t;
        let diff = t - self.ekf.t();
        if diff < 0.0 {
            if diff > -0.1 {
                t_use = self.ekf.t();
            } else {
                self.stats.late_light_dropped += 1;
                return;
            }
        }

        if self.ekf.predict_to(t_use).is_err() {
            warn!("observation predict skipped: numerical instability");
            return;
        }

        let mut r = match &r7 {
            Some(r_in) => r_in * self.config.obs_cov_scale,
            None => DMatrix::<f64>::zeros(7, 7),
        };
        for i in 0..3 {
            r[(i, i)] += self.config.obs_pos_variance;
        }
        for i in 3..7 {
            r[(i, i)] += self.config.obs_rot_variance;
        }

        let adaptive = self.config.obs_tuning.adaptive;
        let result = match &mut self.obs_model {
            ObsModel::Quaternion(model) => {
                let mut z = DVector::<f64>::zeros(7);
                z[0] = position.x;
                z[1] = position.y;
                z[2] = position.z;
                z[3] = orientation.w;
                z[4] = orientation.i;
                z[5] = orientation.j;
                z[6] = orientation.k;
                if adaptive {
                    model.config_mut().ensure_adaptive_r(&r);
                    self.ekf.update(model, &z, None)
                } else {
                    self.ekf.update(model, &z, Some(&r))
                }
            }
            ObsModel::AxisAngle(model) => {
                let z = model.observe(position, orientation);
                let r6 = r.view((0, 0), (6, 6)).clone_owned();
                if adaptive {
                    model.config_mut().ensure_adaptive_r(&r6);
                    self.ekf.update(model, &z, None)
                } else {
                    self.ekf.update(model, &z, Some(&r6))
                }
            }
        };

        match result {
            Ok(norm) => {
                let pose_arr = [
                    position.x,
                    position.y,
                    position.z,
                    orientation.w,
                    orientation.i,
                    orientation.j,
                    orientation.k,
                ];
                self.stats.record_obs(norm, &pose_arr, self.is_stationary());
                self.transition_on_valid_pose();
                self.try_report(t_use);
            }
            Err(e) => warn!("observation update skipped: {e}"),
        }
    }

    /// Integrates one light sample. Drops samples from base stations with
    /// no known pose before they ever reach the batcher. Flushes on
    /// batch-size/capacity (handled by [`LightBatcher::push`]) or on a
    /// SYNC boundary.
    pub fn integrate_light(
        &mut self,
        t: f64,
        lighthouse_id: u32,
        sensor_id: u32,
        generation: Generation,
        axis: Axis,
        value: f64,
        is_sync: bool,
    ) {
        if self.config.use_raw_obs {
            return;
        }
        if !self.known_base_stations.contains(&lighthouse_id) {
            return;
        }

        let sample = LightSample { lighthouse_id, sensor_id, generation, axis, value, timecode: t };
        let flushed = self.light_batcher.push(sample);
        let batch = if is_sync {
            self.light_batcher.flush_on_sync().or(flushed)
        } else {
            flushed
        };

        if let Some(batch) = batch {
            self.process_light_batch(batch, t);
        }
    }

    fn process_light_batch(&mut self, batch: Vec<LightSample>, t: f64) {
        if self.stats.obs_count < self.config.light_required_obs as u64 {
            return;
        }
        if self.config.kalman_light_variance < 0.0 {
            return;
        }
        if self.positional_variance() > self.config.light_ignore_threshold {
            return;
        }

        let is_stationary = self.is_stationary();
        for sample in &batch {
            self.stats.record_light_channel_hit(
                sample.lighthouse_id,
                sample.sensor_id,
                sample.axis as u8,
                sample.value,
                is_stationary,
            );
        }

        let t_use = if t < self.ekf.t() { self.ekf.t() } else { t };
        if self.ekf.predict_to(t_use).is_err() {
            warn!("light predict skipped: numerical instability");
            return;
        }
        self.last_light_time = t_use;

        let batch_len = batch.len();
        let z = self.light_model.stage(&self.ekf.x, batch, self.config.light_max_error);
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(batch_len, self.config.kalman_light_variance));
        let result = if self.config.light_tuning.adaptive {
            self.light_model.config_mut().ensure_adaptive_r(&r);
            self.ekf.update(&mut self.light_model, &z, None)
        } else {
            self.ekf.update(&mut self.light_model, &z, Some(&r))
        };
        match result {
            Ok(norm) => {
                self.stats.record_light(norm);
                self.try_report(t_use);
            }
            Err(e) => warn!("light update skipped: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    #[derive(Default)]
    struct CollectingReporter {
        poses: Vec<TrackerReport>,
    }

    impl Reporter for CollectingReporter {
        fn on_imu_pose(&mut self, report: &TrackerReport) {
            self.poses.push(*report);
        }
        fn on_velocity(&mut self, _report: &TrackerReport) {}
    }

    fn identity_quat() -> Quaternion<f64> {
        Quaternion::new(1.0, 0.0, 0.0, 0.0)
    }

    #[test]
    fn cold_start_converges_after_sixteen_observations() {
        let config = TrackerConfig::default();
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(7, 1e-6));
        let target = Vector3::new(1.0, 2.0, 3.0);

        for i in 1..=20 {
            let t = i as f64 * 0.01;
            tracker.integrate_observation(t, target, identity_quat(), Some(r.clone()));
        }

        assert_eq!(tracker.state(), TrackerState::Running);
        let pos = tracker.ekf.x.vector3(&tracker.ekf.layout, Group::Position);
        assert!((pos - target).norm() < 1e-2);
    }

    #[test]
    fn late_observation_within_window_is_clamped_not_dropped() {
        let config = TrackerConfig::default();
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(7, 1e-6));
        tracker.integrate_observation(10.0, Vector3::zeros(), identity_quat(), Some(r.clone()));
        assert!((tracker.ekf.t() - 10.0).abs() < 1e-12);

        tracker.integrate_observation(9.95, Vector3::new(1.0, 0.0, 0.0), identity_quat(), Some(r.clone()));
        assert_eq!(tracker.stats().late_light_dropped, 0);

        tracker.integrate_observation(9.80, Vector3::new(2.0, 0.0, 0.0), identity_quat(), Some(r));
        assert_eq!(tracker.stats().late_light_dropped, 1);
    }

    #[test]
    fn light_sample_with_unknown_base_station_never_reaches_batcher() {
        let config = TrackerConfig::default();
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        tracker.integrate_light(0.1, 0, 0, Generation::Gen1, Axis::X, 0.1, false);
        assert_eq!(tracker.stats().lightcap_count, 0);
    }

    #[test]
    fn high_positional_variance_blocks_light_admission() {
        let mut config = TrackerConfig::default();
        config.light_ignore_threshold = 1.0;
        config.kalman_light_variance = 1e-4;
        config.light_required_obs = 0;
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        tracker.set_base_station_known(0, true);
        // Default initial P has pose-block diagonal entries >= 10, so
        // positional_variance() (sum of squares) is already far above 1.0.
        tracker.integrate_light(0.01, 0, 0, Generation::Gen1, Axis::X, 0.1, true);
        assert_eq!(tracker.stats().lightcap_count, 0);
    }

    #[test]
    fn divergence_resets_tracker_to_identity() {
        let mut config = TrackerConfig::default();
        config.light_error_threshold = 1e-2;
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(7, 1e-6));
        tracker.integrate_observation(0.01, Vector3::new(1.0, 2.0, 3.0), identity_quat(), Some(r));
        tracker.stats = TrackerStats::new();
        // force the rolling light-residual average above threshold
        for _ in 0..5 {
            tracker.stats.record_light(1.0);
        }
        assert!(!tracker.check_valid());
        assert_eq!(tracker.state(), TrackerState::Reset);
        let pos = tracker.ekf.x.vector3(&tracker.ekf.layout, Group::Position);
        assert!(pos.norm() < 1e-12);
    }

    #[test]
    fn state_machine_progresses_cold_warmup_running() {
        let config = TrackerConfig::default();
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        assert_eq!(tracker.state(), TrackerState::Uninitialised);
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(7, 1e-6));
        for i in 1..16 {
            tracker.integrate_observation(i as f64 * 0.01, Vector3::zeros(), identity_quat(), Some(r.clone()));
        }
        assert_eq!(tracker.state(), TrackerState::Warmup);
        tracker.integrate_observation(0.16, Vector3::zeros(), identity_quat(), Some(r));
        assert_eq!(tracker.state(), TrackerState::Running);
    }

    #[test]
    fn imu_cold_start_gate_is_disabled_when_obs_pos_variance_is_sentinel() {
        let mut config = TrackerConfig::default();
        config.obs_pos_variance = -1.0;
        let mut tracker = Tracker::new(config, CollectingReporter::default());
        let r = DMatrix::<f64>::from_diagonal(&DVector::from_element(7, 1e-6));
        tracker.integrate_observation(0.01, Vector3::zeros(), identity_quat(), Some(r));
        assert!(tracker.stats().obs_count < COLD_START_OBS);

        tracker.integrate_imu(0.02, Vector3::new(0.0, 0.0, GRAVITY), Vector3::zeros());
        assert_eq!(tracker.stats().imu_count, 1);
    }
}
