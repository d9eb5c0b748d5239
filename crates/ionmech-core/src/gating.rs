//! First-order gating kinetics
//!
//! Every gate obeys `dx/dt = (x_inf - x) / tau`. Over a step the kernels
//! freeze `x_inf` and `tau` at the current voltage, which makes the ODE linear
//! and its exponential solution exact.

use crate::error::*;

/// Smallest time constant a gate is ever integrated with (ms)
pub const TAU_FLOOR: f64 = 1e-9;

/// Replace a zero, negative or non-finite time constant with [`TAU_FLOOR`]
#[inline]
pub fn safe_tau(tau: f64) -> f64 {
    if tau.is_finite() && tau > 0.0 {
        tau
    } else {
        TAU_FLOOR
    }
}

/// Exact solution of the frozen linear ODE after `dt`
#[inline]
pub fn exponential_step(x: f64, x_inf: f64, tau: f64, dt: f64) -> f64 {
    x_inf + (x - x_inf) * (-dt / safe_tau(tau)).exp()
}

/// Right-hand side `(x_inf - x) / tau`
#[inline]
pub fn derivative(x: f64, x_inf: f64, tau: f64) -> f64 {
    (x_inf - x) / safe_tau(tau)
}

/// Implicit-solve correction of a derivative.
///
/// `d(dx/dt)/dx = -1/tau`, so a backward-Euler solve scales the derivative by
/// `1 / (1 - dt * (-1/tau))`.
#[inline]
pub fn implicit_step(d: f64, tau: f64, dt: f64) -> f64 {
    d / (1.0 - dt * (-1.0 / safe_tau(tau)))
}

/// Scalar gate state
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GatingVariable {
    /// Current value (dimensionless open probability)
    pub value: f64,
}

impl GatingVariable {
    /// Create a gate at `value`
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    /// Jump to the steady state
    pub fn settle(&mut self, x_inf: f64) {
        self.value = x_inf;
    }

    /// Advance by `dt` with `x_inf` and `tau` frozen.
    ///
    /// `site` names the gate in the failure diagnostic.
    pub fn advance(&mut self, x_inf: f64, tau: f64, dt: f64, mechanism: &str, site: &str) -> Result<()> {
        let next = exponential_step(self.value, x_inf, tau, dt);
        if !next.is_finite() {
            return Err(MechanismError::integration_failure(
                mechanism,
                site,
                format!(
                    "non-finite state (x={}, x_inf={}, tau={}, dt={})",
                    self.value, x_inf, tau, dt
                ),
            ));
        }
        self.value = next;
        Ok(())
    }

    /// Time derivative at the current value
    pub fn derivative(&self, x_inf: f64, tau: f64) -> f64 {
        derivative(self.value, x_inf, tau)
    }

    /// Derivative corrected for an implicit step of `dt`
    pub fn implicit_derivative(&self, x_inf: f64, tau: f64, dt: f64) -> f64 {
        implicit_step(self.derivative(x_inf, tau), tau, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_step_limits() {
        assert!((exponential_step(0.2, 0.8, 5.0, 0.0) - 0.2).abs() < 1e-15);
        assert!((exponential_step(0.2, 0.8, 5.0, 1e6) - 0.8).abs() < 1e-12);
        let half = exponential_step(0.0, 1.0, 1.0, std::f64::consts::LN_2);
        assert!((half - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_tau_is_floored() {
        assert_eq!(safe_tau(0.0), TAU_FLOOR);
        assert_eq!(safe_tau(-3.0), TAU_FLOOR);
        assert_eq!(safe_tau(f64::NAN), TAU_FLOOR);
        let x = exponential_step(0.1, 0.9, 0.0, 0.025);
        assert!((x - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_implicit_step_matches_backward_euler() {
        let (x, x_inf, tau, dt) = (0.3, 0.7, 2.0, 0.1);
        let d = implicit_step(derivative(x, x_inf, tau), tau, dt);
        // Backward Euler: x1 = x + dt * (x_inf - x1) / tau
        let x1 = (x + dt * x_inf / tau) / (1.0 + dt / tau);
        assert!((x + dt * d - x1).abs() < 1e-12);
    }

    #[test]
    fn test_advance_reports_non_finite_state() {
        let mut gate = GatingVariable::new(0.5);
        let err = gate
            .advance(f64::INFINITY, 1.0, 0.025, "KConductance", "states/n")
            .unwrap_err();
        assert!(matches!(err, MechanismError::IntegrationFailure { .. }));
        assert_eq!(gate.value, 0.5);

        gate.advance(1.0, 1.0, 0.025, "KConductance", "states/n").unwrap();
        assert!(gate.value > 0.5);
    }
}
