//! The nominal state vector, its layout (including tail truncation), and
//! the quaternion machinery used by the error-state lift/retract maps.
//!
//! State groups, in fixed order: Position(3), Orientation(4, quaternion
//! w,x,y,z), LinearVelocity(3), AngularVelocity(3), LinearAcceleration(3),
//! IMUCorrection(4, quaternion), AccScale(1), AccBias(3), GyroBias(3).
//! The last four groups may be truncated from the tail when
//! `kalman_minimize_state_space` is set and their driving process weight
//! is zero — grounded in `survive_kalman_tracker.c`'s state-space
//! minimisation, which drops trailing zero-weight groups rather than
//! carrying dead dimensions through every matrix op.

use nalgebra::{DMatrix, DVector, Matrix4, Quaternion, Vector3};

use crate::config::TrackerConfig;

const EPS_NORM: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    Position,
    Orientation,
    LinearVelocity,
    AngularVelocity,
    LinearAcceleration,
    ImuCorrection,
    AccScale,
    AccBias,
    GyroBias,
}

#[derive(Clone, Copy, Debug)]
struct GroupSpan {
    group: Group,
    nominal_offset: usize,
    nominal_dim: usize,
    error_offset: usize,
    error_dim: usize,
}

/// Fixed offsets into the nominal state vector `x` and the error state
/// vector `ε`, computed once from [`TrackerConfig`] at tracker construction.
#[derive(Clone, Debug)]
pub struct StateLayout {
    spans: Vec<GroupSpan>,
    nominal_dim: usize,
    error_dim: usize,
}

impl StateLayout {
    pub fn new(config: &TrackerConfig) -> Self {
        let all = [
            (Group::Position, 3, 3),
            (Group::Orientation, 4, 3),
            (Group::LinearVelocity, 3, 3),
            (Group::AngularVelocity, 3, 3),
            (Group::LinearAcceleration, 3, 3),
            (Group::ImuCorrection, 4, 3),
            (Group::AccScale, 1, 1),
            (Group::AccBias, 3, 3),
            (Group::GyroBias, 3, 3),
        ];

        // Trailing groups are droppable only if their driving weight is
        // zero and minimisation is enabled; walk from the tail inward and
        // stop at the first group that must stay.
        let droppable_from_tail = |group: Group| -> bool {
            if !config.kalman_minimize_state_space {
                return false;
            }
            match group {
                Group::GyroBias => config.process_weight_gyro_bias == 0.0,
                Group::AccBias => config.process_weight_acc_bias == 0.0,
                Group::AccScale => config.kalman_initial_acc_scale_variance == 0.0,
                Group::ImuCorrection => config.kalman_initial_imu_correction_variance == 0.0,
                _ => false,
            }
        };

        let mut active_count = all.len();
        for (group, _, _) in all.iter().rev() {
            if droppable_from_tail(*group) {
                active_count -= 1;
            } else {
                break;
            }
        }

        let mut spans = Vec::with_capacity(active_count);
        let mut nominal_offset = 0;
        let mut error_offset = 0;
        for (group, nominal_dim, error_dim) in all.into_iter().take(active_count) {
            spans.push(GroupSpan {
                group,
                nominal_offset,
                nominal_dim,
                error_offset,
                error_dim,
            });
            nominal_offset += nominal_dim;
            error_offset += error_dim;
        }

        Self {
            spans,
            nominal_dim: nominal_offset,
            error_dim: error_offset,
        }
    }

    pub fn nominal_dim(&self) -> usize {
        self.nominal_dim
    }

    pub fn error_dim(&self) -> usize {
        self.error_dim
    }

    pub fn has(&self, group: Group) -> bool {
        self.spans.iter().any(|s| s.group == group)
    }

    fn span(&self, group: Group) -> Option<&GroupSpan> {
        self.spans.iter().find(|s| s.group == group)
    }

    pub fn nominal_range(&self, group: Group) -> Option<(usize, usize)> {
        self.span(group).map(|s| (s.nominal_offset, s.nominal_dim))
    }

    pub fn error_range(&self, group: Group) -> Option<(usize, usize)> {
        self.span(group).map(|s| (s.error_offset, s.error_dim))
    }

    /// `G = ∂x/∂ε` evaluated at `ε = 0`: identity for translational/scalar
    /// groups, and the local quaternion parameterisation Jacobian for the
    /// two rotation groups. Used to convert a nominal-state Jacobian `H_x`
    /// into the error-state Jacobian `H_ε = H_x · G` and to linearise
    /// retraction for the EKF error-state update.
    pub fn tangent_basis(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut g = DMatrix::<f64>::zeros(self.nominal_dim, self.error_dim);
        for s in &self.spans {
            match s.group {
                Group::Orientation | Group::ImuCorrection => {
                    let q = Quaternion::new(
                        x[s.nominal_offset],
                        x[s.nominal_offset + 1],
                        x[s.nominal_offset + 2],
                        x[s.nominal_offset + 3],
                    );
                    let block = quat_left_multiply_matrix(&q) * half_imaginary_basis();
                    for r in 0..4 {
                        for c in 0..3 {
                            g[(s.nominal_offset + r, s.error_offset + c)] = block[(r, c)];
                        }
                    }
                }
                _ => {
                    for k in 0..s.nominal_dim {
                        g[(s.nominal_offset + k, s.error_offset + k)] = 1.0;
                    }
                }
            }
        }
        g
    }
}

/// The 4x4 matrix `L(q)` such that `L(q) * r = q ⊗ r` (quaternion
/// left-multiplication as a linear map on the 4-vector of `r`).
fn quat_left_multiply_matrix(q: &Quaternion<f64>) -> Matrix4<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Matrix4::new(
        w, -x, -y, -z, //
        x, w, -z, y, //
        y, z, w, -x, //
        z, -y, x, w,
    )
}

/// `∂exp(ε)/∂ε` at `ε = 0`, i.e. the derivative of the quaternion
/// exponential map restricted to its imaginary part: `exp(ε) ≈ [1, ε/2]`.
fn half_imaginary_basis() -> nalgebra::Matrix4x3<f64> {
    nalgebra::Matrix4x3::new(
        0.0, 0.0, 0.0, //
        0.5, 0.0, 0.0, //
        0.0, 0.5, 0.0, //
        0.0, 0.0, 0.5,
    )
}

/// Axis-angle exponential map: 3-vector tangent rotation to unit
/// quaternion, via the standard half-angle/sinc construction.
pub fn quat_exp(w: &Vector3<f64>) -> Quaternion<f64> {
    let angle = w.norm();
    if angle < 1e-12 {
        return Quaternion::new(1.0, w.x * 0.5, w.y * 0.5, w.z * 0.5);
    }
    let half = 0.5 * angle;
    let scale = half.sin() / angle;
    Quaternion::new(half.cos(), w.x * scale, w.y * scale, w.z * scale)
}

/// Inverse of [`quat_exp`]: unit quaternion to axis-angle 3-vector.
pub fn quat_log(q: &Quaternion<f64>) -> Vector3<f64> {
    let v = Vector3::new(q.i, q.j, q.k);
    let vn = v.norm();
    if vn < 1e-12 {
        return v * 2.0;
    }
    let angle = 2.0 * vn.atan2(q.w);
    v * (angle / vn)
}

pub fn quat_normalize(q: &Quaternion<f64>) -> Quaternion<f64> {
    let n = (q.w * q.w + q.i * q.i + q.j * q.j + q.k * q.k).sqrt();
    if n < 1e-12 {
        Quaternion::new(1.0, 0.0, 0.0, 0.0)
    } else {
        Quaternion::new(q.w / n, q.i / n, q.j / n, q.k / n)
    }
}

pub fn quat_conjugate(q: &Quaternion<f64>) -> Quaternion<f64> {
    Quaternion::new(q.w, -q.i, -q.j, -q.k)
}

pub fn quat_mul(a: &Quaternion<f64>, b: &Quaternion<f64>) -> Quaternion<f64> {
    Quaternion::new(
        a.w * b.w - a.i * b.i - a.j * b.j - a.k * b.k,
        a.w * b.i + a.i * b.w + a.j * b.k - a.k * b.j,
        a.w * b.j - a.i * b.k + a.j * b.w + a.k * b.i,
        a.w * b.k + a.i * b.j - a.j * b.i + a.k * b.w,
    )
}

pub fn quat_identity() -> Quaternion<f64> {
    Quaternion::new(1.0, 0.0, 0.0, 0.0)
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// The nominal state, plus the filter time it is valid at.
#[derive(Clone, Debug)]
pub struct State {
    pub x: DVector<f64>,
    pub t: f64,
}

impl State {
    pub fn identity(layout: &StateLayout) -> Self {
        let mut x = DVector::<f64>::zeros(layout.nominal_dim());
        if let Some((off, _)) = layout.nominal_range(Group::Orientation) {
            x[off] = 1.0;
        }
        if let Some((off, _)) = layout.nominal_range(Group::ImuCorrection) {
            x[off] = 1.0;
        }
        if let Some((off, _)) = layout.nominal_range(Group::AccScale) {
            x[off] = 1.0;
        }
        Self { x, t: 0.0 }
    }

    pub fn group(&self, layout: &StateLayout, group: Group) -> Option<nalgebra::DVectorView<f64>> {
        layout
            .nominal_range(group)
            .map(|(off, dim)| self.x.rows(off, dim))
    }

    pub fn set_group(&mut self, layout: &StateLayout, group: Group, value: &DVector<f64>) {
        if let Some((off, dim)) = layout.nominal_range(group) {
            self.x.rows_mut(off, dim).copy_from(value);
        }
    }

    pub fn quaternion(&self, layout: &StateLayout, group: Group) -> Quaternion<f64> {
        let (off, _) = layout.nominal_range(group).expect("group present");
        Quaternion::new(self.x[off], self.x[off + 1], self.x[off + 2], self.x[off + 3])
    }

    pub fn set_quaternion(&mut self, layout: &StateLayout, group: Group, q: &Quaternion<f64>) {
        let (off, _) = layout.nominal_range(group).expect("group present");
        self.x[off] = q.w;
        self.x[off + 1] = q.i;
        self.x[off + 2] = q.j;
        self.x[off + 3] = q.k;
    }

    pub fn vector3(&self, layout: &StateLayout, group: Group) -> Vector3<f64> {
        let (off, _) = layout.nominal_range(group).expect("group present");
        Vector3::new(self.x[off], self.x[off + 1], self.x[off + 2])
    }

    /// Restores invariants I1 (unit quaternions), I3 (AccScale/bias
    /// clamping), I4 (finiteness). Invoked after every predict and every
    /// update, and between iterations of an iterated update.
    pub fn normalize(&mut self, layout: &StateLayout) {
        for group in [Group::Orientation, Group::ImuCorrection] {
            if layout.has(group) {
                let q = quat_normalize(&self.quaternion(layout, group));
                self.set_quaternion(layout, group, &q);
            }
        }
        if let Some((off, _)) = layout.nominal_range(Group::AccScale) {
            self.x[off] = clamp(self.x[off], 0.95, 1.05);
        }
        if let Some((off, dim)) = layout.nominal_range(Group::AccBias) {
            for i in off..off + dim {
                self.x[i] = clamp(self.x[i], -0.1, 0.1);
            }
        }
        if let Some((off, dim)) = layout.nominal_range(Group::GyroBias) {
            for i in off..off + dim {
                self.x[i] = clamp(self.x[i], -0.1, 0.1);
            }
        }
        debug_assert!(self.x.iter().all(|v| v.is_finite()));
    }

    pub fn is_finite(&self) -> bool {
        self.x.iter().all(|v| v.is_finite())
    }
}

/// Retraction: `x1 = x0 ⊕ ε`. Quaternion groups compose via right
/// multiplication by `exp(ε_rot)`; everything else is a direct add.
pub fn retract(x0: &State, eps: &DVector<f64>, layout: &StateLayout) -> State {
    let mut x1 = x0.clone();
    for (group, nominal_is_quat) in [
        (Group::Position, false),
        (Group::Orientation, true),
        (Group::LinearVelocity, false),
        (Group::AngularVelocity, false),
        (Group::LinearAcceleration, false),
        (Group::ImuCorrection, true),
        (Group::AccScale, false),
        (Group::AccBias, false),
        (Group::GyroBias, false),
    ] {
        let Some((n_off, n_dim)) = layout.nominal_range(group) else {
            continue;
        };
        let (e_off, _e_dim) = layout.error_range(group).unwrap();
        if nominal_is_quat {
            let dq = quat_exp(&Vector3::new(eps[e_off], eps[e_off + 1], eps[e_off + 2]));
            let q0 = x0.quaternion(layout, group);
            let q1 = quat_normalize(&quat_mul(&q0, &dq));
            x1.set_quaternion(layout, group, &q1);
        } else {
            for k in 0..n_dim {
                x1.x[n_off + k] += eps[e_off + k];
            }
        }
    }
    x1
}

/// Lift: `ε = ErrorModel(x1, x0)`, the tangent-space delta from `x0` to
/// `x1`. Inverse of [`retract`] near `ε = 0` (property P4).
pub fn lift(x1: &State, x0: &State, layout: &StateLayout) -> DVector<f64> {
    let mut eps = DVector::<f64>::zeros(layout.error_dim());
    for (group, nominal_is_quat) in [
        (Group::Position, false),
        (Group::Orientation, true),
        (Group::LinearVelocity, false),
        (Group::AngularVelocity, false),
        (Group::LinearAcceleration, false),
        (Group::ImuCorrection, true),
        (Group::AccScale, false),
        (Group::AccBias, false),
        (Group::GyroBias, false),
    ] {
        let Some((n_off, n_dim)) = layout.nominal_range(group) else {
            continue;
        };
        let (e_off, _) = layout.error_range(group).unwrap();
        if nominal_is_quat {
            let q0 = x0.quaternion(layout, group);
            let q1 = x1.quaternion(layout, group);
            let dq = quat_mul(&quat_conjugate(&q0), &q1);
            let w = quat_log(&dq);
            eps[e_off] = w.x;
            eps[e_off + 1] = w.y;
            eps[e_off + 2] = w.z;
        } else {
            for k in 0..n_dim {
                eps[e_off + k] = x1.x[n_off + k] - x0.x[n_off + k];
            }
        }
    }
    eps
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn full_layout() -> StateLayout {
        StateLayout::new(&TrackerConfig::default())
    }

    #[test]
    fn layout_dims_match_spec() {
        let layout = full_layout();
        // process_weight_acc_bias/gyro_bias default to 0, minimize_state_space
        // defaults true, so AccBias/GyroBias truncate; AccScale/ImuCorrection
        // also default-zero variance so they truncate too, leaving the core
        // pose/velocity/accel/angvel block.
        assert_eq!(layout.nominal_dim(), 3 + 4 + 3 + 3 + 3);
        assert_eq!(layout.error_dim(), 3 + 3 + 3 + 3 + 3);
    }

    #[test]
    fn full_state_space_when_minimize_disabled() {
        let mut config = TrackerConfig::default();
        config.kalman_minimize_state_space = false;
        let layout = StateLayout::new(&config);
        assert_eq!(layout.nominal_dim(), 3 + 4 + 3 + 3 + 3 + 4 + 1 + 3 + 3);
        assert_eq!(layout.error_dim(), 3 + 3 + 3 + 3 + 3 + 3 + 1 + 3 + 3);
    }

    #[test]
    fn retract_lift_roundtrip_small_angle() {
        let layout = full_layout();
        let x0 = State::identity(&layout);
        let mut eps = DVector::<f64>::zeros(layout.error_dim());
        let (off, _) = layout.error_range(Group::Orientation).unwrap();
        eps[0] = 0.01;
        eps[1] = -0.02;
        eps[2] = 0.03;
        eps[off] = 0.3;
        eps[off + 1] = -0.2;
        eps[off + 2] = 0.1;
        let x1 = retract(&x0, &eps, &layout);
        let recovered = lift(&x1, &x0, &layout);
        assert_relative_eq!(recovered, eps, epsilon = 1e-10);
    }

    #[test]
    fn quat_exp_log_roundtrip() {
        let w = Vector3::new(0.2, -0.1, 0.05);
        let q = quat_exp(&w);
        let w2 = quat_log(&q);
        assert_relative_eq!(w, w2, epsilon = 1e-10);
    }

    #[test]
    fn identity_state_has_unit_quaternions() {
        let layout = full_layout();
        let x = State::identity(&layout);
        let q = x.quaternion(&layout, Group::Orientation);
        assert_relative_eq!(q.w, 1.0, epsilon = 1e-12);
    }
}
