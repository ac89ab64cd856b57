//! Wiring a run together: validation, executor, injector and teardown.
use crate::error::SurgeError;
use crate::executor::{Executor, Reporter};
use crate::injection::{InjectionProfile, Injector, Population, Schedule};
use crate::scenario::Scenario;
use crate::sink::ReportSink;
use crate::transport::Transport;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use surge_core::{RunConfig, RunStatistics, ValidationError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// A set of populations and the run parameters they share.
///
/// ```no_run
/// # use surge::prelude::*;
/// # use std::time::Duration;
/// # async fn demo(transport: impl Transport) -> Result<(), SurgeError> {
/// let scenario = Scenario::new(
///     "browse",
///     Chain::new()
///         .request(get("home", "http://localhost:3000/"))
///         .pause(Duration::from_secs(2))
///         .request(get("search", "http://localhost:3000/search?q=rust")),
/// )?;
///
/// let stats = Simulation::new(RunConfig::new().pool_size(4))
///     .inject(scenario, InjectionProfile::new().ramp_users(100, Duration::from_secs(10)))
///     .run(transport, ())
///     .await?;
/// println!("{stats}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    config: RunConfig,
    populations: Vec<Population>,
}

impl Simulation {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            populations: vec![],
        }
    }

    pub fn inject(mut self, scenario: impl Into<Arc<Scenario>>, profile: InjectionProfile) -> Self {
        self.populations.push(Population {
            scenario: scenario.into(),
            profile,
        });
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RunConfig {
        &mut self.config
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.config.validate()?;
        if self.populations.is_empty() {
            return Err(ValidationError::NoPopulations);
        }
        for population in &self.populations {
            population.profile.validate()?;
        }
        Ok(())
    }

    pub async fn run<T, S>(self, transport: T, sink: S) -> Result<RunStatistics, SurgeError>
    where
        T: Transport,
        S: ReportSink,
    {
        self.start(transport, sink)?.wait().await
    }

    /// Starts the run in the background.
    pub fn start<T, S>(self, transport: T, sink: S) -> Result<RunHandle, SurgeError>
    where
        T: Transport,
        S: ReportSink,
    {
        self.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SurgeError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let reporter = Arc::new(Reporter::new(sink));
        let task = runtime.spawn(drive(
            self.config,
            self.populations,
            Arc::new(transport),
            reporter,
            cancel.clone(),
        ));
        Ok(RunHandle { cancel, task })
    }
}

#[instrument(name = "simulation", skip_all, fields(populations = populations.len()))]
async fn drive(
    config: RunConfig,
    populations: Vec<Population>,
    transport: Arc<dyn Transport>,
    reporter: Arc<Reporter>,
    cancel: CancellationToken,
) -> Result<RunStatistics, SurgeError> {
    let start = Instant::now();
    info!(
        "Running {} populations on {} workers.",
        populations.len(),
        config.pool_size
    );

    let executor = Executor::start(&config, transport, reporter.clone(), cancel.clone());
    let schedule = Schedule::new(&populations, start, config.seed);
    let mut injector = tokio::spawn(
        Injector::new(schedule, cancel.clone())
            .run(executor.starts())
            .in_current_span(),
    );

    // NOTE: The injector handle must not be polled again once `finished` saw it complete.
    let mut injected = None;
    let finished = async {
        injected = Some((&mut injector).await);
        reporter.wait_idle().await;
    };
    let deadline = async {
        match config.max_duration {
            Some(max) => tokio::time::sleep_until(start + max).await,
            None => std::future::pending().await,
        }
    };

    let stopped = tokio::select! {
        _ = finished => false,
        _ = cancel.cancelled() => {
            info!("Run stopped.");
            true
        }
        _ = deadline => {
            info!("Run reached its maximum duration.");
            true
        }
    };

    cancel.cancel();
    let injected = match injected {
        Some(injected) => injected,
        None => injector.await,
    };
    match injected {
        Ok(users) => debug!("Injected {users} users."),
        Err(err) => error!("Injector failed: {err}"),
    }
    executor.shutdown().await?;

    let stats = reporter.snapshot(start.elapsed(), stopped);
    if stats.users_rejected > 0 {
        warn!("{} users were rejected by a full start queue.", stats.users_rejected);
    }
    info!("Run complete: {stats}");
    Ok(stats)
}

/// A run in progress. Awaiting it yields the run's statistics.
#[pin_project::pin_project]
pub struct RunHandle {
    cancel: CancellationToken,
    #[pin]
    task: JoinHandle<Result<RunStatistics, SurgeError>>,
}

impl RunHandle {
    /// Cancels pending timers and in-flight requests. Users still running are
    /// reported as aborted.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<RunStatistics, SurgeError> {
        self.await
    }
}

impl Future for RunHandle {
    type Output = Result<RunStatistics, SurgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().task.poll(cx).map(|joined| {
            joined.map_err(|err| SurgeError::WorkerPool(err.to_string()))?
        })
    }
}
