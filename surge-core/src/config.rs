use crate::{Charset, ValidationError, FALLBACK_POOL_SIZE, MAX_RUN_DURATION};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Global parameters of one run.
///
/// Deserializable so it can be embedded in whatever configuration format the
/// caller uses; durations are expressed in (fractional) seconds.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of workers executing actions. Independent of the user count.
    pub pool_size: usize,
    /// Stop a user's chain at the first failure. Scenarios may override.
    pub abort_on_failure: bool,
    pub start_queue: QueueConfig,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub request_timeout: Option<Duration>,
    /// Hard stop; users still running at that point are aborted.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub max_duration: Option<Duration>,
    pub default_charset: Charset,
    /// Seed for Poisson arrivals and random pauses.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            abort_on_failure: false,
            start_queue: QueueConfig::default(),
            request_timeout: None,
            max_duration: None,
            default_charset: Charset::Utf8,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    pub fn start_queue(mut self, queue: QueueConfig) -> Self {
        self.start_queue = queue;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn default_charset(mut self, charset: Charset) -> Self {
        self.default_charset = charset;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pool_size == 0 {
            return Err(ValidationError::EmptyPool);
        }
        if self.start_queue.capacity == Some(0) {
            return Err(ValidationError::EmptyQueue);
        }
        if self.max_duration.map_or(false, |max| max > MAX_RUN_DURATION) {
            return Err(ValidationError::TooLong {
                what: "max_duration",
                max: MAX_RUN_DURATION,
            });
        }
        Ok(())
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_POOL_SIZE)
}

/// Queue of user starts waiting for a worker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `None` queues without limit.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// What happens to a user start when the bounded start queue is full.
#[serde_as]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Hold the injector until room frees up.
    #[default]
    Wait,
    /// Fail the start immediately.
    Reject,
    /// Wait at most `timeout`, then fail the start.
    WaitFor {
        #[serde_as(as = "DurationSecondsWithFrac<f64>")]
        timeout: Duration,
    },
}

/// Declarative injection step, as produced by a configuration surface.
///
/// Durations are signed seconds so that bad input can be reported instead of
/// being impossible to express; they are checked when converted into a profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepSpec {
    AtOnce {
        users: u64,
    },
    RampUsers {
        users: u64,
        during: f64,
    },
    NothingFor {
        during: f64,
    },
    ConstantRate {
        rate: f64,
        during: f64,
        #[serde(default)]
        poisson: bool,
    },
    RampRate {
        from: f64,
        to: f64,
        during: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "pool_size": 2, "request_timeout": 1.5 }"#).unwrap();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_duration, None);
        assert_eq!(config.default_charset, Charset::Utf8);
        assert_eq!(config.start_queue, QueueConfig::unbounded());
    }

    #[test]
    fn overflow_policy_from_json() {
        let queue: QueueConfig = serde_json::from_str(
            r#"{ "capacity": 10, "overflow": { "policy": "wait_for", "timeout": 0.5 } }"#,
        )
        .unwrap();
        assert_eq!(
            queue,
            QueueConfig::bounded(
                10,
                OverflowPolicy::WaitFor {
                    timeout: Duration::from_millis(500)
                }
            )
        );
    }

    #[test]
    fn charset_by_name() {
        let config: RunConfig = serde_json::from_str(r#"{ "default_charset": "utf-16" }"#).unwrap();
        assert_eq!(config.default_charset, Charset::Utf16);
        assert!(serde_json::from_str::<RunConfig>(r#"{ "default_charset": "klingon" }"#).is_err());
    }

    #[test]
    fn validation() {
        assert_eq!(RunConfig::new().pool_size(0).validate(), Err(ValidationError::EmptyPool));
        let queue = QueueConfig::bounded(0, OverflowPolicy::Reject);
        assert_eq!(
            RunConfig::new().start_queue(queue).validate(),
            Err(ValidationError::EmptyQueue)
        );
        assert!(RunConfig::new().validate().is_ok());
    }

    #[test]
    fn huge_max_duration_is_rejected() {
        assert!(matches!(
            RunConfig::new().max_duration(Duration::MAX).validate(),
            Err(ValidationError::TooLong { what: "max_duration", .. })
        ));
        assert!(RunConfig::new().max_duration(MAX_RUN_DURATION).validate().is_ok());
    }

    #[test]
    fn step_specs() {
        let steps: Vec<StepSpec> = serde_json::from_str(
            r#"[
                { "step": "nothing_for", "during": 5 },
                { "step": "constant_rate", "rate": 2.5, "during": 10 }
            ]"#,
        )
        .unwrap();
        assert_eq!(steps[0], StepSpec::NothingFor { during: 5. });
        assert_eq!(
            steps[1],
            StepSpec::ConstantRate {
                rate: 2.5,
                during: 10.,
                poisson: false
            }
        );
    }
}
