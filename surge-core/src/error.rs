use thiserror::Error;

/// Problems found while checking a run before it starts.
///
/// These are fatal to run setup, never to an individual user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{what} duration must not be negative, got {secs}s")]
    NegativeDuration { what: &'static str, secs: f64 },

    #[error("{what} duration must be finite")]
    NonFiniteDuration { what: &'static str },

    #[error("{what} rate must be a finite, non-negative number, got {rate}")]
    InvalidRate { what: &'static str, rate: f64 },

    #[error("{what} must not exceed {max:?}")]
    TooLong { what: &'static str, max: std::time::Duration },

    #[error("Worker pool size must be at least 1.")]
    EmptyPool,

    #[error("Start queue capacity must be at least 1 when bounded.")]
    EmptyQueue,

    #[error("Unknown charset `{0}`")]
    UnknownCharset(String),

    #[error("Scenario name must not be empty.")]
    EmptyScenarioName,

    #[error("No scenario has been given an injection profile.")]
    NoPopulations,
}

/// Convert signed seconds from a declarative source into a [`std::time::Duration`].
pub fn duration_from_secs(what: &'static str, secs: f64) -> Result<std::time::Duration, ValidationError> {
    if !secs.is_finite() {
        Err(ValidationError::NonFiniteDuration { what })
    } else if secs < 0. {
        Err(ValidationError::NegativeDuration { what, secs })
    } else {
        std::time::Duration::try_from_secs_f64(secs)
            .map_err(|_| ValidationError::NonFiniteDuration { what })
    }
}

/// Check that a rate is usable for arrival generation.
pub fn check_rate(what: &'static str, rate: f64) -> Result<f64, ValidationError> {
    if rate.is_finite() && rate >= 0. {
        Ok(rate)
    } else {
        Err(ValidationError::InvalidRate { what, rate })
    }
}
