use thiserror::Error;

/// Errors raised by voltage control, clock control, and the stress runner.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OcError {
    /// Requested voltage is not within tolerance of any supported VSEL step.
    #[error(
        "unsupported voltage {requested:.3}V: valid inputs are 0.85V to 1.30V \
         in 0.05V steps; voltage unchanged"
    )]
    InvalidVoltage {
        /// The rejected voltage in volts.
        requested: f64,
    },

    /// Requested frequency was rejected before or by the clock subsystem.
    #[error("can not change frequency to {mhz}MHz: {reason}")]
    InvalidFrequency {
        /// The rejected frequency in MHz.
        mhz: u32,
        /// Why it was rejected.
        reason: String,
    },

    /// A collaborator required by the entry point was not supplied.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(String),

    /// Register backend could not be opened, mapped, or accessed.
    #[error("register access error: {0}")]
    Register(String),

    /// The clock subsystem refused a transition during a run.
    #[error("clock error: {0}")]
    Clock(String),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic runtime fault, such as a unit panicking.
    #[error("runtime fault: {0}")]
    Fault(String),

    /// Invalid unit state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl OcError {
    /// Shorthand for an [`OcError::InvalidFrequency`].
    pub fn invalid_frequency(mhz: u32, reason: impl Into<String>) -> Self {
        Self::InvalidFrequency {
            mhz,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for rp-overclock operations.
pub type OcResult<T> = Result<T, OcError>;
