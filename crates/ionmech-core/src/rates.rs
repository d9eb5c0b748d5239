//! Voltage-dependent rate functions for Hodgkin-Huxley style gates

use crate::error::*;

/// Below this `|x/b|` the linear-exponential rate switches to its Taylor form
pub const VTRAP_THRESHOLD: f64 = 1e-6;

/// `(x/b) / (1 - exp(-x/b))` without the 0/0 at `x = 0`.
///
/// For `|x/b| < 1e-6` the first-order expansion `1 + x/b/2` is returned.
#[inline]
pub fn vtrap(x: f64, b: f64) -> f64 {
    let y = x / b;
    if y.abs() < VTRAP_THRESHOLD {
        1.0 + y / 2.0
    } else {
        // 1 - exp(-y) == -expm1(-y)
        y / -(-y).exp_m1()
    }
}

/// One opening or closing rate, `alpha(v)` or `beta(v)` (1/ms)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "form", rename_all = "snake_case"))]
pub enum RateForm {
    /// `rate * vtrap(v - midpoint, 1/scale)`
    ExpLinear {
        /// Rate coefficient (1/ms)
        rate: f64,
        /// Slope (1/mV)
        scale: f64,
        /// Half-activation voltage (mV)
        midpoint: f64,
    },
    /// `rate * exp((v - midpoint) * scale)`
    Exponential {
        /// Rate coefficient (1/ms)
        rate: f64,
        /// Slope (1/mV)
        scale: f64,
        /// Reference voltage (mV)
        midpoint: f64,
    },
    /// `rate / (exp((v - midpoint) * scale) + 1)`
    Sigmoid {
        /// Rate coefficient (1/ms)
        rate: f64,
        /// Slope (1/mV)
        scale: f64,
        /// Half-activation voltage (mV)
        midpoint: f64,
    },
}

impl RateForm {
    /// Evaluate at `v` (mV)
    pub fn eval(&self, v: f64) -> f64 {
        match *self {
            RateForm::ExpLinear { rate, scale, midpoint } => rate * vtrap(v - midpoint, 1.0 / scale),
            RateForm::Exponential { rate, scale, midpoint } => rate * ((v - midpoint) * scale).exp(),
            RateForm::Sigmoid { rate, scale, midpoint } => {
                rate / (((v - midpoint) * scale).exp() + 1.0)
            }
        }
    }

    fn validate(&self, gate: &str, which: &str) -> Result<()> {
        let (rate, scale, midpoint) = match *self {
            RateForm::ExpLinear { rate, scale, midpoint }
            | RateForm::Exponential { rate, scale, midpoint }
            | RateForm::Sigmoid { rate, scale, midpoint } => (rate, scale, midpoint),
        };
        if !(rate.is_finite() && rate > 0.0) {
            return Err(MechanismError::invalid_parameter(
                format!("{}.{}.rate", gate, which),
                rate.to_string(),
                "> 0.0",
            ));
        }
        if !scale.is_finite() || !midpoint.is_finite() {
            return Err(MechanismError::invalid_parameter(
                format!("{}.{}", gate, which),
                format!("scale={} midpoint={}", scale, midpoint),
                "finite",
            ));
        }
        if matches!(self, RateForm::ExpLinear { .. }) && scale == 0.0 {
            return Err(MechanismError::invalid_parameter(
                format!("{}.{}.scale", gate, which),
                scale.to_string(),
                "!= 0.0",
            ));
        }
        Ok(())
    }
}

/// Q10 temperature scaling of a gate's rates
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Q10 {
    /// Rate multiplier per 10 degC
    pub factor: f64,
    /// Temperature the rates were measured at (degC)
    pub reference_celsius: f64,
}

impl Q10 {
    /// Multiplier at `celsius`
    pub fn adjustment(&self, celsius: f64) -> f64 {
        self.factor.powf((celsius - self.reference_celsius) / 10.0)
    }
}

/// Kinetics of one gate: its rates, exponent and optional Q10
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GateKinetics {
    /// Gate name (`m`, `h`, `n`)
    pub name: String,
    /// Exponent in the conductance product
    pub power: i32,
    /// Opening rate
    pub alpha: RateForm,
    /// Closing rate
    pub beta: RateForm,
    /// Temperature scaling, none means `temp_adj = 1`
    pub q10: Option<Q10>,
}

impl GateKinetics {
    /// Gate without temperature scaling
    pub fn new(name: impl Into<String>, power: i32, alpha: RateForm, beta: RateForm) -> Self {
        Self {
            name: name.into(),
            power,
            alpha,
            beta,
            q10: None,
        }
    }

    /// Attach a Q10 scaling
    pub fn with_q10(mut self, factor: f64, reference_celsius: f64) -> Self {
        self.q10 = Some(Q10 {
            factor,
            reference_celsius,
        });
        self
    }

    /// Validate the rate coefficients and exponent
    pub fn validate(&self) -> Result<()> {
        if self.power < 1 {
            return Err(MechanismError::invalid_parameter(
                format!("{}.power", self.name),
                self.power.to_string(),
                ">= 1",
            ));
        }
        self.alpha.validate(&self.name, "alpha")?;
        self.beta.validate(&self.name, "beta")?;
        if let Some(q10) = &self.q10 {
            if !(q10.factor.is_finite() && q10.factor > 0.0) {
                return Err(MechanismError::invalid_parameter(
                    format!("{}.q10", self.name),
                    q10.factor.to_string(),
                    "> 0.0",
                ));
            }
        }
        Ok(())
    }

    /// Temperature multiplier at `celsius`
    pub fn temp_adj(&self, celsius: f64) -> f64 {
        self.q10.map_or(1.0, |q| q.adjustment(celsius))
    }

    /// `(x_inf, tau)` at voltage `v` and temperature `celsius`
    pub fn steady_state(&self, v: f64, celsius: f64) -> (f64, f64) {
        let alpha = self.alpha.eval(v);
        let beta = self.beta.eval(v);
        let tau = 1.0 / (self.temp_adj(celsius) * (alpha + beta));
        let inf = alpha / (alpha + beta);
        (inf, tau)
    }
}
