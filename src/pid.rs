//! Scalar PID controller, transcribed from `pid_update` in the
//! original C tracker. Used by adaptive measurement-noise loops that want a
//! smoothed correction rather than reacting to raw residuals directly.

#[derive(Clone, Copy, Debug)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    err: f64,
    integration: f64,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd, err: 0.0, integration: 0.0 }
    }

    /// `output = Kp*err + Ki*integration*dt + Kd*(err - prev_err)/dt`.
    /// `dt == 0` is a caller error (division by zero); the original assumes
    /// a nonzero sample period and so does this port.
    pub fn update(&mut self, err: f64, dt: f64) -> f64 {
        let der = err - self.err;
        self.integration += err;
        let output = self.kp * err + self.ki * self.integration * dt + self.kd * der / dt;
        self.err = err;
        output
    }

    pub fn reset(&mut self) {
        self.err = 0.0;
        self.integration = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only_matches_kp_times_err() {
        let mut pid = Pid::new(2.0, 0.0, 0.0);
        let out = pid.update(1.5, 0.01);
        assert!((out - 3.0).abs() < 1e-12);
    }

    #[test]
    fn integral_accumulates_across_updates() {
        let mut pid = Pid::new(0.0, 1.0, 0.0);
        let first = pid.update(1.0, 0.1);
        let second = pid.update(1.0, 0.1);
        assert!((first - 0.1).abs() < 1e-12);
        assert!((second - 0.2).abs() < 1e-12);
    }

    #[test]
    fn derivative_term_responds_to_change_in_error() {
        let mut pid = Pid::new(0.0, 0.0, 1.0);
        pid.update(1.0, 0.1);
        let second = pid.update(2.0, 0.1);
        assert!((second - 10.0).abs() < 1e-9);
    }
}
