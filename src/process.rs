//! State transition `f(x, dt)` and its Jacobian.
//!
//! Kinematics: position advances by `velocity·dt + 0.5·accel·dt²`, velocity
//! by `accel·dt`, orientation by the quaternion exponential of
//! `angular_velocity·dt`; biases, scale and the IMU-correction quaternion
//! are held constant by `f` itself (their drift is modelled purely as
//! process noise in `process_noise.rs`). When a process weight is zero the
//! corresponding state contribution is zeroed before integration — "physics
//! pinned by Q alone" per the governing tuning.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::{JacobianMode, MeasurementTuning, TrackerConfig};
use crate::linalg::numeric_jacobian;
use crate::state::{quat_exp, quat_mul, quat_normalize, Group, State, StateLayout};

pub fn f(x: &State, dt: f64, config: &TrackerConfig, layout: &StateLayout) -> State {
    let mut out = x.clone();
    out.t = x.t + dt;

    let vel = if config.process_weight_vel == 0.0 {
        Vector3::zeros()
    } else {
        x.vector3(layout, Group::LinearVelocity)
    };
    let acc = if config.process_weight_acc == 0.0 {
        Vector3::zeros()
    } else {
        x.vector3(layout, Group::LinearAcceleration)
    };
    let ang_vel = if config.process_weight_vel == 0.0 {
        Vector3::zeros()
    } else {
        x.vector3(layout, Group::AngularVelocity)
    };

    let pos = x.vector3(layout, Group::Position) + vel * dt + acc * (0.5 * dt * dt);
    out.set_group(
        layout,
        Group::Position,
        &DVector::from_vec(vec![pos.x, pos.y, pos.z]),
    );

    let new_vel = x.vector3(layout, Group::LinearVelocity) + acc * dt;
    out.set_group(
        layout,
        Group::LinearVelocity,
        &DVector::from_vec(vec![new_vel.x, new_vel.y, new_vel.z]),
    );

    let q0 = x.quaternion(layout, Group::Orientation);
    let dq = quat_exp(&(ang_vel * dt));
    let q1 = quat_normalize(&quat_mul(&q0, &dq));
    out.set_quaternion(layout, Group::Orientation, &q1);

    out
}

/// Analytical Jacobian `∂f/∂x` (nominal mode). Rotational cross-terms use
/// the standard small-angle approximation `∂exp(ωdt)/∂ω ≈ 0.5·dt·I3`
/// (exact in [`crate::state::StateLayout::tangent_basis`]'s sense at
/// `ε = 0`); cross-checked numerically via [`JacobianMode::Debug`].
fn jacobian_f_analytical(x: &State, dt: f64, config: &TrackerConfig, layout: &StateLayout) -> DMatrix<f64> {
    let n = layout.nominal_dim();
    let mut jac = DMatrix::<f64>::identity(n, n);
    if dt == 0.0 {
        return jac;
    }

    let vel_on = config.process_weight_vel != 0.0;
    let acc_on = config.process_weight_acc != 0.0;

    if let (Some((p_off, _)), Some((v_off, _))) = (
        layout.nominal_range(Group::Position),
        layout.nominal_range(Group::LinearVelocity),
    ) {
        if vel_on {
            for k in 0..3 {
                jac[(p_off + k, v_off + k)] = dt;
            }
        }
    }
    if let (Some((p_off, _)), Some((a_off, _))) = (
        layout.nominal_range(Group::Position),
        layout.nominal_range(Group::LinearAcceleration),
    ) {
        if acc_on {
            for k in 0..3 {
                jac[(p_off + k, a_off + k)] = 0.5 * dt * dt;
            }
        }
    }
    if let (Some((v_off, _)), Some((a_off, _))) = (
        layout.nominal_range(Group::LinearVelocity),
        layout.nominal_range(Group::LinearAcceleration),
    ) {
        if acc_on {
            for k in 0..3 {
                jac[(v_off + k, a_off + k)] = dt;
            }
        }
    }
    // Orientation ~ angular velocity coupling, first-order in dt.
    if let (Some((q_off, _)), Some((w_off, _))) = (
        layout.nominal_range(Group::Orientation),
        layout.nominal_range(Group::AngularVelocity),
    ) {
        if vel_on {
            let q = x.quaternion(layout, Group::Orientation);
            let half_dt = 0.5 * dt;
            // d(q ⊗ exp(w dt))/dw|0 = L(q) * [0; 0.5 dt I3]
            let rows = [
                [-q.i, -q.j, -q.k],
                [q.w, -q.k, q.j],
                [q.k, q.w, -q.i],
                [-q.j, q.i, q.w],
            ];
            for r in 0..4 {
                for c in 0..3 {
                    jac[(q_off + r, w_off + c)] = rows[r][c] * half_dt;
                }
            }
        }
    }
    jac
}

/// Error-state transition Jacobian `∂ε₁/∂ε₀`, evaluated directly in tangent
/// coordinates rather than by conjugating the nominal Jacobian through
/// [`crate::state::StateLayout::tangent_basis`]: in the tangent
/// parameterisation the quaternion wrapping drops out and the
/// orientation/angular-velocity coupling is the same linear `dt·I3` term as
/// the other first-order blocks (standard error-state EKF kinematics).
pub fn jacobian_f_error_state(dt: f64, config: &TrackerConfig, layout: &StateLayout) -> DMatrix<f64> {
    let n = layout.error_dim();
    let mut jac = DMatrix::<f64>::identity(n, n);
    if dt == 0.0 {
        return jac;
    }

    let vel_on = config.process_weight_vel != 0.0;
    let acc_on = config.process_weight_acc != 0.0;

    if let (Some((p_off, _)), Some((v_off, _))) = (
        layout.error_range(Group::Position),
        layout.error_range(Group::LinearVelocity),
    ) {
        if vel_on {
            for k in 0..3 {
                jac[(p_off + k, v_off + k)] = dt;
            }
        }
    }
    if let (Some((p_off, _)), Some((a_off, _))) = (
        layout.error_range(Group::Position),
        layout.error_range(Group::LinearAcceleration),
    ) {
        if acc_on {
            for k in 0..3 {
                jac[(p_off + k, a_off + k)] = 0.5 * dt * dt;
            }
        }
    }
    if let (Some((v_off, _)), Some((a_off, _))) = (
        layout.error_range(Group::LinearVelocity),
        layout.error_range(Group::LinearAcceleration),
    ) {
        if acc_on {
            for k in 0..3 {
                jac[(v_off + k, a_off + k)] = dt;
            }
        }
    }
    if let (Some((r_off, _)), Some((w_off, _))) = (
        layout.error_range(Group::Orientation),
        layout.error_range(Group::AngularVelocity),
    ) {
        if vel_on {
            for k in 0..3 {
                jac[(r_off + k, w_off + k)] = dt;
            }
        }
    }
    jac
}

pub fn jacobian_f(
    x: &State,
    dt: f64,
    config: &TrackerConfig,
    layout: &StateLayout,
    tuning: &MeasurementTuning,
) -> DMatrix<f64> {
    match tuning.jacobian_mode {
        JacobianMode::Analytical => jacobian_f_analytical(x, dt, config, layout),
        JacobianMode::Numeric => numeric_f_jacobian(x, dt, config, layout),
        JacobianMode::Debug => {
            let analytical = jacobian_f_analytical(x, dt, config, layout);
            let numeric = numeric_f_jacobian(x, dt, config, layout);
            if (&analytical - &numeric).norm() > 1e-4 {
                log::warn!("process Jacobian mismatch: analytical vs numeric disagree");
            }
            analytical
        }
    }
}

fn numeric_f_jacobian(x: &State, dt: f64, config: &TrackerConfig, layout: &StateLayout) -> DMatrix<f64> {
    if dt == 0.0 {
        return DMatrix::identity(layout.nominal_dim(), layout.nominal_dim());
    }
    let layout2 = layout.clone();
    let config2 = config.clone();
    let base_t = x.t;
    numeric_jacobian(
        move |xv| {
            let s = State { x: xv.clone(), t: base_t };
            f(&s, dt, &config2, &layout2).x
        },
        &x.x,
        1e-6,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    #[test]
    fn dt_zero_predict_is_identity() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let x0 = State::identity(&layout);
        let x1 = f(&x0, 0.0, &config, &layout);
        assert!((x1.x - x0.x).norm() < 1e-15);
        let jac = jacobian_f(&x0, 0.0, &config, &layout, &config.obs_tuning);
        assert!((jac - DMatrix::<f64>::identity(layout.nominal_dim(), layout.nominal_dim())).norm() < 1e-15);
    }

    #[test]
    fn zero_weights_pin_velocity_and_acceleration() {
        let mut config = TrackerConfig::default();
        config.process_weight_acc = 0.0;
        config.process_weight_vel = 0.0;
        let layout = StateLayout::new(&config);
        let mut x0 = State::identity(&layout);
        x0.set_group(
            &layout,
            Group::LinearVelocity,
            &DVector::from_vec(vec![1.0, 2.0, 3.0]),
        );
        let x1 = f(&x0, 0.1, &config, &layout);
        // velocity weight zero => velocity treated as zero during integration
        let pos = x1.vector3(&layout, Group::Position);
        assert!(pos.norm() < 1e-12);
    }

    #[test]
    fn analytical_matches_numeric_jacobian() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let mut x0 = State::identity(&layout);
        x0.set_group(
            &layout,
            Group::AngularVelocity,
            &DVector::from_vec(vec![0.1, -0.2, 0.05]),
        );
        let analytical = jacobian_f_analytical(&x0, 0.05, &config, &layout);
        let numeric = numeric_f_jacobian(&x0, 0.05, &config, &layout);
        assert!((analytical - numeric).norm() < 1e-3);
    }

    #[test]
    fn error_state_jacobian_is_identity_at_zero_dt() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let jac = jacobian_f_error_state(0.0, &config, &layout);
        assert!((jac - DMatrix::<f64>::identity(layout.error_dim(), layout.error_dim())).norm() < 1e-15);
    }

    #[test]
    fn error_state_jacobian_couples_rotation_to_angular_velocity() {
        let config = TrackerConfig::default();
        let layout = StateLayout::new(&config);
        let jac = jacobian_f_error_state(0.1, &config, &layout);
        let (r_off, _) = layout.error_range(Group::Orientation).unwrap();
        let (w_off, _) = layout.error_range(Group::AngularVelocity).unwrap();
        assert!((jac[(r_off, w_off)] - 0.1).abs() < 1e-12);
    }
}
