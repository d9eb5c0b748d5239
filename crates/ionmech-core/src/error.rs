//! Error types for mechanism kernels

use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, MechanismError>;

/// Errors that can occur while configuring or running mechanism kernels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MechanismError {
    /// Invalid kernel or driver configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Parameter name not declared by the mechanism schema
    #[error("Mechanism {mechanism} has no parameter named {name}")]
    UnknownParameter {
        /// Mechanism name
        mechanism: String,
        /// Requested parameter name
        name: String,
    },

    /// Event delivered earlier than the last event the instance processed
    #[error("{mechanism}: event at t={time} arrived out of order (last processed t={last})")]
    EventOutOfOrder {
        /// Mechanism name
        mechanism: String,
        /// Delivery time of the offending event (ms)
        time: f64,
        /// Last processed event time (ms)
        last: f64,
    },

    /// Mechanism received an event but does not accept events
    #[error("Mechanism {mechanism} does not receive events")]
    EventsNotSupported {
        /// Mechanism name
        mechanism: String,
    },

    /// State integration produced an invalid result
    #[error("Integration failed in {mechanism} at {provenance}: {reason}")]
    IntegrationFailure {
        /// Mechanism name
        mechanism: String,
        /// Solve site inside the mechanism (state or block name)
        provenance: String,
        /// Reason for failure
        reason: String,
    },

    /// Instance handle does not refer to a placed mechanism
    #[error("Instance {index} not found")]
    InstanceNotFound {
        /// Instance index
        index: usize,
    },
}

impl MechanismError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create an unknown parameter error
    pub fn unknown_parameter(mechanism: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownParameter {
            mechanism: mechanism.into(),
            name: name.into(),
        }
    }

    /// Create an out-of-order event error
    pub fn out_of_order(mechanism: impl Into<String>, time: f64, last: f64) -> Self {
        Self::EventOutOfOrder {
            mechanism: mechanism.into(),
            time,
            last,
        }
    }

    /// Create an events-not-supported error
    pub fn events_not_supported(mechanism: impl Into<String>) -> Self {
        Self::EventsNotSupported {
            mechanism: mechanism.into(),
        }
    }

    /// Create an integration failure error
    pub fn integration_failure(
        mechanism: impl Into<String>,
        provenance: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IntegrationFailure {
            mechanism: mechanism.into(),
            provenance: provenance.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error must abort the run rather than be corrected
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EventOutOfOrder { .. } | Self::IntegrationFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MechanismError::invalid_config("n_knots < 2");
        assert!(matches!(err, MechanismError::InvalidConfiguration { .. }));

        let err = MechanismError::invalid_parameter("dt", "0", "> 0.0");
        assert!(matches!(err, MechanismError::InvalidParameter { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = MechanismError::out_of_order("NMDA", 1.0, 2.5);
        let msg = format!("{}", err);
        assert!(msg.contains("NMDA"));
        assert!(msg.contains("out of order"));
        assert!(err.is_fatal());

        let err = MechanismError::integration_failure("KConductance", "states/n", "NaN");
        assert!(format!("{}", err).contains("states/n"));
        assert!(err.is_fatal());
    }
}
