//! Proportional-integral-derivative regulator.
//!
//! Output is `kp*e + ki*sum(e) + kd*(e - e_prev)` with `e = target - measured`.
//! The integral accumulates every call's error with no anti-windup clamp and
//! the output is not limited here; the caller clamps it to what the
//! actuator accepts. Under sustained saturation the integral keeps growing,
//! so a later setpoint change overshoots until it unwinds.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    integral: f64,
    prev_error: f64,
    target: f64,
    measured: f64,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: 0.0,
            target: 0.0,
            measured: 0.0,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn measured(&self) -> f64 {
        self.measured
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn set_target(&mut self, value: f64) {
        self.target = value;
    }

    pub fn set_measured(&mut self, value: f64) {
        self.measured = value;
    }

    pub fn calculate(&mut self) -> f64 {
        let error = self.target - self.measured;
        self.integral += error;
        let derivative = error - self.prev_error;
        self.prev_error = error;

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    /// Forgets all history, target and measurement included.
    pub fn clear(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.target = 0.0;
        self.measured = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAINS: PidGains = PidGains { kp: 1.0, ki: 1.0, kd: 0.5 };

    fn first_output(target: f64, measured: f64) -> f64 {
        let mut pid = PidController::new(GAINS);
        pid.set_target(target);
        pid.set_measured(measured);
        pid.calculate()
    }

    #[test]
    fn test_first_call_combines_all_terms() {
        // e = 2: p = 2, i = 2, d = 0.5 * 2
        assert_eq!(first_output(5.0, 3.0), 5.0);
    }

    #[test]
    fn test_first_output_is_linear_in_error() {
        let single = first_output(10.0, 7.0);
        let double = first_output(10.0, 4.0);
        assert!((double - 2.0 * single).abs() < 1e-12);
    }

    #[test]
    fn test_integral_accumulates_without_bound() {
        let mut pid = PidController::new(PidGains { kp: 0.0, ki: 1.0, kd: 0.0 });
        pid.set_target(1.0);
        for _ in 0..1000 {
            pid.calculate();
        }
        assert_eq!(pid.integral(), 1000.0);
        assert_eq!(pid.calculate(), 1001.0);
    }

    #[test]
    fn test_derivative_uses_previous_error() {
        let mut pid = PidController::new(PidGains { kp: 0.0, ki: 0.0, kd: 1.0 });
        pid.set_target(4.0);
        assert_eq!(pid.calculate(), 4.0);
        pid.set_measured(1.0);
        // e went from 4 to 3
        assert_eq!(pid.calculate(), -1.0);
    }

    #[test]
    fn test_clear_matches_fresh_regulator() {
        let mut used = PidController::new(GAINS);
        used.set_target(12.0);
        used.set_measured(3.0);
        for _ in 0..5 {
            used.calculate();
        }
        used.clear();
        assert_eq!(used.target(), 0.0);
        assert_eq!(used.measured(), 0.0);

        used.set_target(6.0);
        used.set_measured(2.5);
        assert_eq!(used.calculate(), first_output(6.0, 2.5));
    }
}
