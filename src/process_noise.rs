//! Continuous-time process-noise assembly.
//!
//! Coefficients and matrix layout transcribed verbatim from
//! `survive_kalman_tracker_process_noise` in the original C tracker. Two
//! parameterisations are supported: full-state (quaternion-aware
//! rotational block) and error-state (plain axis-angle rotational block).

use nalgebra::DMatrix;

use crate::config::{NoiseModel, TrackerConfig};
use crate::linalg::symmetrize;
use crate::state::{Group, State, StateLayout};

struct JerkAccVel {
    // Q_jerk / Q_acc share layout [pp, pv, pa, vv, va, aa]; Q_vel is [pp, pv, vv].
    jerk: [f64; 6],
    acc: [f64; 6],
    vel: [f64; 3],
}

fn polynomial_terms(t: f64) -> JerkAccVel {
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;
    let t6 = t5 * t;
    let t7 = t6 * t;
    JerkAccVel {
        jerk: [t7 / 252.0, t6 / 72.0, t5 / 30.0, t5 / 20.0, t4 / 8.0, t3 / 3.0],
        acc: [t5 / 20.0, t4 / 8.0, t3 / 6.0, t3 / 3.0, t2 / 2.0, t],
        vel: [t3 / 3.0, t2 / 2.0, t],
    }
}

/// Builds `Q(dt)` in the error-state dimension (or nominal, if
/// `kalman_use_error_space` is false — the polynomial coefficients are
/// identical, only the rotational block layout differs).
pub fn build_process_noise(dt: f64, config: &TrackerConfig, layout: &StateLayout, x: &State) -> DMatrix<f64> {
    let dim = if config.kalman_use_error_space {
        layout.error_dim()
    } else {
        layout.nominal_dim()
    };
    let mut q = DMatrix::<f64>::zeros(dim, dim);

    if config.kalman_noise_model == NoiseModel::FlatPerDt {
        return build_flat_noise(dt, config, layout, q, dim);
    }

    let terms = polynomial_terms(dt);
    let pw_jerk = config.process_weight_jerk;
    let pw_acc = config.process_weight_acc;
    let pw_vel = config.process_weight_vel;
    let pw_pos = config.process_weight_pos;
    let pw_ang_vel = config.process_weight_ang_vel;
    let pw_rot = config.process_weight_rot;

    let p_p = pw_jerk * terms.jerk[0] + pw_acc * terms.acc[0] + pw_vel * terms.vel[0] + pw_pos * dt * dt;
    let p_v = pw_jerk * terms.jerk[1] + pw_acc * terms.acc[1] + pw_vel * terms.vel[1];
    let p_a = pw_jerk * terms.jerk[3] + pw_acc * terms.acc[3];
    let v_v = pw_jerk * terms.jerk[2] + pw_acc * terms.acc[2] + pw_vel * terms.vel[2];
    let v_a = pw_jerk * terms.jerk[4] + pw_acc * terms.acc[4];
    let a_a = pw_jerk * terms.jerk[5] + pw_acc * terms.acc[5];
    let s_w = pw_ang_vel;
    let rv = pw_ang_vel * terms.vel[0] + pw_rot * dt;
    let r_av = pw_ang_vel * terms.vel[1];

    let use_err = config.kalman_use_error_space;
    let pos_off = group_offset(layout, Group::Position, use_err);
    let rot_off = group_offset(layout, Group::Orientation, use_err);
    let vel_off = group_offset(layout, Group::LinearVelocity, use_err);
    let ang_off = group_offset(layout, Group::AngularVelocity, use_err);
    let acc_off = group_offset(layout, Group::LinearAcceleration, use_err);

    if let Some(p) = pos_off {
        set_block_diag(&mut q, p, 3, p_p);
        if let Some(v) = vel_off {
            set_cross(&mut q, p, v, 3, p_v);
        }
        if let Some(a) = acc_off {
            set_cross(&mut q, p, a, 3, p_a);
        }
    }
    if let Some(v) = vel_off {
        set_block_diag(&mut q, v, 3, v_v);
        if let Some(a) = acc_off {
            set_cross(&mut q, v, a, 3, v_a);
        }
    }
    if let Some(a) = acc_off {
        set_block_diag(&mut q, a, 3, a_a);
    }
    if let Some(w) = ang_off {
        set_block_diag(&mut q, w, 3, s_w * dt);
    }

    if use_err {
        if let Some(r) = rot_off {
            set_block_diag(&mut q, r, 3, rv);
            if let Some(w) = ang_off {
                set_cross(&mut q, r, w, 3, r_av);
            }
        }
    } else if let Some(r) = rot_off {
        build_quaternion_rotational_block(&mut q, x, layout, r, ang_off, rv, r_av, pw_ang_vel, dt);
    }

    add_bias_random_walk(&mut q, config, layout, use_err, dt);

    symmetrize(&q)
}

fn group_offset(layout: &StateLayout, group: Group, use_err: bool) -> Option<usize> {
    if use_err {
        layout.error_range(group).map(|(off, _)| off)
    } else {
        layout.nominal_range(group).map(|(off, _)| off)
    }
}

fn set_block_diag(q: &mut DMatrix<f64>, off: usize, dim: usize, value: f64) {
    for i in 0..dim {
        q[(off + i, off + i)] = value;
    }
}

fn set_cross(q: &mut DMatrix<f64>, off_a: usize, off_b: usize, dim: usize, value: f64) {
    for i in 0..dim {
        q[(off_a + i, off_b + i)] = value;
        q[(off_b + i, off_a + i)] = value;
    }
}

/// Quaternion-aware rotational block, used only in full-state (non
/// error-state) mode. Diagonal `rv + s_f*(qs - q_i^2)`, off-diagonal
/// `-s_f*q_i*q_j`; cross terms to angular velocity scaled by `s_s` with
/// the sign pattern the generated C Jacobian produces for `d(q⊗dq)/dw`.
fn build_quaternion_rotational_block(
    q_out: &mut DMatrix<f64>,
    x: &State,
    layout: &StateLayout,
    rot_off: usize,
    ang_off: Option<usize>,
    rv: f64,
    _r_av_unused: f64,
    pw_ang_vel: f64,
    dt: f64,
) {
    let t2 = dt * dt;
    let t3 = t2 * dt;
    let s_f = pw_ang_vel / 12.0 * t3;
    let s_s = pw_ang_vel / 4.0 * t2;

    let quat = x.quaternion(layout, Group::Orientation);
    let comps = [quat.w, quat.i, quat.j, quat.k];
    let qs: f64 = comps.iter().map(|c| c * c).sum();

    for i in 0..4 {
        for j in 0..4 {
            let value = if i == j {
                rv + s_f * (qs - comps[i] * comps[i])
            } else {
                -s_f * comps[i] * comps[j]
            };
            q_out[(rot_off + i, rot_off + j)] = value;
        }
    }

    if let Some(w_off) = ang_off {
        // Antisymmetric-like cross terms between quaternion rows and the
        // angular-velocity block, one column per angular-velocity axis.
        let cross = [
            [-comps[1], -comps[2], -comps[3]], // row w
            [comps[0], -comps[3], comps[2]],   // row x
            [comps[3], comps[0], -comps[1]],   // row y
            [-comps[2], comps[1], comps[0]],   // row z
        ];
        for r in 0..4 {
            for c in 0..3 {
                let v = s_s * cross[r][c];
                q_out[(rot_off + r, w_off + c)] = v;
                q_out[(w_off + c, rot_off + r)] = v;
            }
        }
    }
}

fn add_bias_random_walk(q: &mut DMatrix<f64>, config: &TrackerConfig, layout: &StateLayout, use_err: bool, dt: f64) {
    let ga = config.process_weight_acc_bias * dt;
    let gb = config.process_weight_gyro_bias * dt;
    if let Some(off) = group_offset(layout, Group::AccBias, use_err) {
        set_block_diag(q, off, 3, ga);
    }
    if let Some(off) = group_offset(layout, Group::GyroBias, use_err) {
        set_block_diag(q, off, 3, gb);
    }
}

fn build_flat_noise(dt: f64, config: &TrackerConfig, layout: &StateLayout, mut q: DMatrix<f64>, _dim: usize) -> DMatrix<f64> {
    let use_err = config.kalman_use_error_space;
    if let Some(off) = group_offset(layout, Group::Position, use_err) {
        set_block_diag(&mut q, off, 3, config.flat_noise_pos * dt);
    }
    if let Some(off) = group_offset(layout, Group::Orientation, use_err) {
        let dim = if use_err { 3 } else { 4 };
        set_block_diag(&mut q, off, dim, config.flat_noise_rot * dt);
    }
    if let Some(off) = group_offset(layout, Group::LinearVelocity, use_err) {
        set_block_diag(&mut q, off, 3, config.flat_noise_vel * dt);
    }
    if let Some(off) = group_offset(layout, Group::AngularVelocity, use_err) {
        set_block_diag(&mut q, off, 3, config.flat_noise_ang_vel * dt);
    }
    if let Some(off) = group_offset(layout, Group::LinearAcceleration, use_err) {
        set_block_diag(&mut q, off, 3, config.flat_noise_acc * dt);
    }
    symmetrize(&q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    #[test]
    fn process_noise_is_symmetric_for_any_dt() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        for dt in [0.0, 0.001, 0.01, 0.1, 1.0] {
            let q = build_process_noise(dt, &config, &layout, &x);
            assert!(crate::linalg::is_symmetric(&q, 1e-9), "dt={dt}");
        }
    }

    #[test]
    fn zero_dt_gives_zero_process_noise() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let q = build_process_noise(0.0, &config, &layout, &x);
        assert!(q.norm() < 1e-12);
    }

    #[test]
    fn flat_noise_model_scales_with_dt() {
        let mut config = TrackerConfig::default();
        config.kalman_noise_model = NoiseModel::FlatPerDt;
        let layout = StateLayout::new(&config);
        let x = State::identity(&layout);
        let q1 = build_process_noise(0.1, &config, &layout, &x);
        let q2 = build_process_noise(0.2, &config, &layout, &x);
        assert!((q2[(0, 0)] - 2.0 * q1[(0, 0)]).abs() < 1e-12);
    }
}
