//! Arrival profiles and the time-ordered schedule they merge into.
//!
//! A profile is a list of steps evaluated left to right, each step's offsets
//! relative to the summed durations of the steps before it. Profiles are
//! never expanded up front: [`ProfileCursor`] produces arrivals lazily and
//! [`Schedule`] merges any number of cursors with a min-heap, so memory stays
//! proportional to the number of populations, not to the number of users.
use std::time::Duration;
use surge_core::{check_rate, duration_from_secs, StepSpec, ValidationError, MAX_RUN_DURATION};

mod cursor;
mod injector;
mod schedule;

pub use cursor::{Arrival, ProfileCursor};
pub(crate) use injector::Injector;
pub use schedule::{Population, Schedule, StartEvent};

/// How a constant rate is turned into arrival instants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Arrivals {
    /// Evenly spaced, `1/rate` apart.
    #[default]
    Fixed,
    /// Exponential inter-arrival times, seeded from the run configuration.
    Poisson,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InjectionStep {
    AtOnce(u64),
    RampUsers {
        users: u64,
        during: Duration,
    },
    NothingFor(Duration),
    ConstantRate {
        rate: f64,
        during: Duration,
        arrivals: Arrivals,
    },
    /// Rate interpolated linearly from `from` to `to` users per second.
    RampRate {
        from: f64,
        to: f64,
        during: Duration,
    },
}

impl InjectionStep {
    /// How far the step moves the offset base of the next step.
    pub fn duration(&self) -> Duration {
        match *self {
            InjectionStep::AtOnce(_) => Duration::ZERO,
            InjectionStep::RampUsers { during, .. }
            | InjectionStep::ConstantRate { during, .. }
            | InjectionStep::RampRate { during, .. } => during,
            InjectionStep::NothingFor(during) => during,
        }
    }

    /// Number of users the step starts, when it is known in advance.
    pub fn users(&self) -> Option<u64> {
        match *self {
            InjectionStep::AtOnce(users) | InjectionStep::RampUsers { users, .. } => Some(users),
            InjectionStep::NothingFor(_) => Some(0),
            InjectionStep::ConstantRate {
                rate,
                during,
                arrivals: Arrivals::Fixed,
            } => Some(cursor::fixed_rate_total(rate, during)),
            InjectionStep::ConstantRate { .. } => None,
            InjectionStep::RampRate { from, to, during } => {
                Some(cursor::ramp_rate_total(from, to, during))
            }
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            InjectionStep::ConstantRate { rate, .. } => {
                check_rate("constant_rate", rate)?;
            }
            InjectionStep::RampRate { from, to, .. } => {
                check_rate("ramp_rate start", from)?;
                check_rate("ramp_rate end", to)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl TryFrom<&StepSpec> for InjectionStep {
    type Error = ValidationError;

    fn try_from(spec: &StepSpec) -> Result<Self, Self::Error> {
        let step = match *spec {
            StepSpec::AtOnce { users } => InjectionStep::AtOnce(users),
            StepSpec::RampUsers { users, during } => InjectionStep::RampUsers {
                users,
                during: duration_from_secs("ramp_users", during)?,
            },
            StepSpec::NothingFor { during } => {
                InjectionStep::NothingFor(duration_from_secs("nothing_for", during)?)
            }
            StepSpec::ConstantRate {
                rate,
                during,
                poisson,
            } => InjectionStep::ConstantRate {
                rate,
                during: duration_from_secs("constant_rate", during)?,
                arrivals: if poisson {
                    Arrivals::Poisson
                } else {
                    Arrivals::Fixed
                },
            },
            StepSpec::RampRate { from, to, during } => InjectionStep::RampRate {
                from,
                to,
                during: duration_from_secs("ramp_rate", during)?,
            },
        };
        step.validate()?;
        Ok(step)
    }
}

/// An ordered list of steps, built by chaining.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionProfile {
    steps: Vec<InjectionStep>,
}

impl InjectionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[StepSpec]) -> Result<Self, ValidationError> {
        let steps = specs
            .iter()
            .map(InjectionStep::try_from)
            .collect::<Result<_, _>>()?;
        let profile = Self { steps };
        profile.validate()?;
        Ok(profile)
    }

    pub fn step(mut self, step: InjectionStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn at_once(self, users: u64) -> Self {
        self.step(InjectionStep::AtOnce(users))
    }

    pub fn ramp_users(self, users: u64, during: Duration) -> Self {
        self.step(InjectionStep::RampUsers { users, during })
    }

    pub fn nothing_for(self, during: Duration) -> Self {
        self.step(InjectionStep::NothingFor(during))
    }

    pub fn constant_rate(self, rate: f64, during: Duration) -> Self {
        self.step(InjectionStep::ConstantRate {
            rate,
            during,
            arrivals: Arrivals::Fixed,
        })
    }

    pub fn poisson_rate(self, rate: f64, during: Duration) -> Self {
        self.step(InjectionStep::ConstantRate {
            rate,
            during,
            arrivals: Arrivals::Poisson,
        })
    }

    pub fn ramp_rate(self, from: f64, to: f64, during: Duration) -> Self {
        self.step(InjectionStep::RampRate { from, to, during })
    }

    pub fn steps(&self) -> &[InjectionStep] {
        &self.steps
    }

    /// Total length of the profile, saturating at [`Duration::MAX`].
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .fold(Duration::ZERO, |total, step| total.saturating_add(step.duration()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.steps.iter().try_for_each(InjectionStep::validate)?;
        if self.duration() > MAX_RUN_DURATION {
            return Err(ValidationError::TooLong {
                what: "injection profile",
                max: MAX_RUN_DURATION,
            });
        }
        Ok(())
    }

    pub fn cursor(&self, seed: Option<u64>) -> ProfileCursor {
        ProfileCursor::new(self.steps.clone(), seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_spec_duration_is_rejected() {
        let specs = vec![
            StepSpec::AtOnce { users: 1 },
            StepSpec::NothingFor { during: -1. },
        ];
        assert!(matches!(
            InjectionProfile::from_specs(&specs),
            Err(ValidationError::NegativeDuration { .. })
        ));
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let profile = InjectionProfile::new().constant_rate(f64::NAN, Duration::from_secs(1));
        assert!(matches!(
            profile.validate(),
            Err(ValidationError::InvalidRate { .. })
        ));

        let specs = vec![StepSpec::RampRate {
            from: 1.,
            to: -3.,
            during: 10.,
        }];
        assert!(InjectionProfile::from_specs(&specs).is_err());
    }

    #[test]
    fn overlong_profiles_are_rejected() {
        let specs = vec![StepSpec::NothingFor { during: 1e19 }];
        assert!(matches!(
            InjectionProfile::from_specs(&specs),
            Err(ValidationError::TooLong { .. })
        ));

        // Each step is representable, their sum is not.
        let profile = InjectionProfile::new()
            .nothing_for(Duration::MAX)
            .ramp_users(10, Duration::MAX);
        assert_eq!(profile.duration(), Duration::MAX);
        assert!(matches!(
            profile.validate(),
            Err(ValidationError::TooLong { .. })
        ));

        let profile = InjectionProfile::new()
            .nothing_for(MAX_RUN_DURATION)
            .at_once(1);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn specs_convert() {
        let specs = vec![
            StepSpec::NothingFor { during: 1.5 },
            StepSpec::RampUsers {
                users: 10,
                during: 2.,
            },
            StepSpec::ConstantRate {
                rate: 5.,
                during: 4.,
                poisson: true,
            },
        ];
        let profile = InjectionProfile::from_specs(&specs).unwrap();
        assert_eq!(
            profile,
            InjectionProfile::new()
                .nothing_for(Duration::from_millis(1500))
                .ramp_users(10, Duration::from_secs(2))
                .poisson_rate(5., Duration::from_secs(4))
        );
        assert_eq!(profile.duration(), Duration::from_millis(7500));
    }

    #[test]
    fn ramp_zero_users_is_valid() {
        let profile = InjectionProfile::new().ramp_users(0, Duration::from_secs(3));
        assert!(profile.validate().is_ok());
        assert_eq!(profile.steps()[0].users(), Some(0));
        assert_eq!(profile.duration(), Duration::from_secs(3));
    }

    #[test]
    fn expected_users() {
        assert_eq!(
            InjectionStep::ConstantRate {
                rate: 2.5,
                during: Duration::from_secs(4),
                arrivals: Arrivals::Fixed
            }
            .users(),
            Some(10)
        );
        assert_eq!(
            InjectionStep::RampRate {
                from: 0.,
                to: 10.,
                during: Duration::from_secs(10)
            }
            .users(),
            Some(50)
        );
    }
}
