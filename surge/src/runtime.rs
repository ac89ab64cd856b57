//! Command line overrides for run parameters. (requires `rt` feature)
use crate::simulation::Simulation;
use clap::Parser;
use std::str::FromStr;
use std::time::Duration;
use surge_core::{Charset, OverflowPolicy, QueueConfig, RunConfig};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Surge load generator")]
struct SurgeCli {
    /// Number of worker tasks running user actions.
    #[arg(long)]
    pool_size: Option<usize>,

    /// Stop a user's chain at its first failure.
    #[arg(long)]
    abort_on_failure: bool,

    /// Bound the queue of users waiting for a worker.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Reject new users instead of waiting when the bounded queue is full.
    #[arg(long, requires = "queue_capacity")]
    reject_when_full: bool,

    /// e.g. `5s`, `500ms`
    #[arg(long, value_parser = humantime::parse_duration)]
    request_timeout: Option<Duration>,

    /// Hard stop for the whole run, e.g. `10m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    max_duration: Option<Duration>,

    #[arg(long, value_parser = Charset::from_str)]
    default_charset: Option<Charset>,

    /// Seed for Poisson arrivals and random pauses.
    #[arg(long)]
    seed: Option<u64>,
}

impl SurgeCli {
    fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if self.abort_on_failure {
            config.abort_on_failure = true;
        }
        if let Some(capacity) = self.queue_capacity {
            let overflow = if self.reject_when_full {
                OverflowPolicy::Reject
            } else {
                config.start_queue.overflow
            };
            config.start_queue = QueueConfig::bounded(capacity, overflow);
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = Some(timeout);
        }
        if let Some(max) = self.max_duration {
            config.max_duration = Some(max);
        }
        if let Some(charset) = self.default_charset {
            config.default_charset = charset;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        debug!("Run configuration after CLI overrides: {config:?}");
        config
    }
}

/// Apply the default CLI arguments on top of programmatic configuration.
///
/// `--pool-size`, `--abort-on-failure`, `--queue-capacity`,
/// `--reject-when-full`, `--request-timeout`, `--max-duration`,
/// `--default-charset` and `--seed`.
///
/// # Example
/// ```ignore
/// $ ./my_load_test --pool-size 8 --max-duration 5m
/// $ ./my_load_test --queue-capacity 1000 --reject-when-full
/// ```
pub trait WithArgs: Sized {
    fn with_args(self) -> Self {
        match self.try_with_args_from(std::env::args_os()) {
            Ok(this) => this,
            Err(err) => err.exit(),
        }
    }

    fn try_with_args_from<I, T>(self, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone;
}

impl WithArgs for RunConfig {
    fn try_with_args_from<I, T>(self, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(SurgeCli::try_parse_from(args)?.apply(self))
    }
}

impl WithArgs for Simulation {
    fn try_with_args_from<I, T>(mut self, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = std::mem::take(self.config_mut());
        *self.config_mut() = config.try_with_args_from(args)?;
        Ok(self)
    }
}
