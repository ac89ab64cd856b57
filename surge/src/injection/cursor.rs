use super::{Arrivals, InjectionStep};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use std::time::Duration;

/// `count` users due at `offset` from the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub offset: Duration,
    pub count: u64,
}

/// Lazily walks a profile's steps, one arrival at a time.
///
/// Offsets never decrease: each step only produces offsets inside
/// `[base, base + step.duration())` and `base` only grows.
#[derive(Debug)]
pub struct ProfileCursor {
    steps: Vec<InjectionStep>,
    index: usize,
    base: Duration,
    emitted: u64,
    // Seconds into the current step of the last Poisson arrival.
    clock: f64,
    rng: SmallRng,
}

impl ProfileCursor {
    pub(crate) fn new(steps: Vec<InjectionStep>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            steps,
            index: 0,
            base: Duration::ZERO,
            emitted: 0,
            clock: 0.,
            rng,
        }
    }

    fn arrival(&mut self, step: InjectionStep) -> Option<Arrival> {
        let offset = match step {
            InjectionStep::AtOnce(users) => {
                if self.emitted > 0 || users == 0 {
                    return None;
                }
                self.emitted = users;
                return Some(Arrival {
                    offset: self.base,
                    count: users,
                });
            }
            InjectionStep::NothingFor(_) => return None,
            InjectionStep::RampUsers { users, during } => {
                if self.emitted >= users {
                    return None;
                }
                scale(during, self.emitted, users)
            }
            InjectionStep::ConstantRate {
                rate,
                during,
                arrivals: Arrivals::Fixed,
            } => {
                if self.emitted >= fixed_rate_total(rate, during) {
                    return None;
                }
                secs(self.emitted as f64 / rate).min(during)
            }
            InjectionStep::ConstantRate {
                rate,
                during,
                arrivals: Arrivals::Poisson,
            } => {
                let exp = Exp::new(rate).ok()?;
                self.clock += exp.sample(&mut self.rng);
                if !self.clock.is_finite() || self.clock >= during.as_secs_f64() {
                    return None;
                }
                secs(self.clock)
            }
            InjectionStep::RampRate { from, to, during } => {
                if self.emitted >= ramp_rate_total(from, to, during) {
                    return None;
                }
                secs(ramp_rate_offset(from, to, during.as_secs_f64(), self.emitted)).min(during)
            }
        };
        self.emitted += 1;
        Some(Arrival {
            offset: self.base.saturating_add(offset),
            count: 1,
        })
    }
}

impl Iterator for ProfileCursor {
    type Item = Arrival;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = *self.steps.get(self.index)?;
            if let Some(arrival) = self.arrival(step) {
                return Some(arrival);
            }
            self.base = self.base.saturating_add(step.duration());
            self.index += 1;
            self.emitted = 0;
            self.clock = 0.;
        }
    }
}

/// `during * i / n`, exact to the nanosecond.
fn scale(during: Duration, i: u64, n: u64) -> Duration {
    let nanos = during.as_nanos() * i as u128 / n as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.)).unwrap_or(Duration::MAX)
}

pub(super) fn fixed_rate_total(rate: f64, during: Duration) -> u64 {
    (rate * during.as_secs_f64()).round() as u64
}

pub(super) fn ramp_rate_total(from: f64, to: f64, during: Duration) -> u64 {
    ((from + to) / 2. * during.as_secs_f64()).round() as u64
}

/// Time at which the cumulative arrival count `from*t + (to-from)*t²/(2d)`
/// reaches `i`.
fn ramp_rate_offset(from: f64, to: f64, during: f64, i: u64) -> f64 {
    if i == 0 {
        return 0.;
    }
    let i = i as f64;
    let a = (to - from) / (2. * during);
    let discriminant = (from * from + 4. * a * i).max(0.);
    let denominator = from + discriminant.sqrt();
    if denominator > 0. {
        2. * i / denominator
    } else {
        during
    }
}
