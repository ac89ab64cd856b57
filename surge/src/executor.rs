//! The virtual user executor.
//!
//! A fixed pool of worker tasks runs every user's action chain. A worker runs
//! one user's actions back to back in a trampoline until the user suspends
//! or terminates, then picks up the next piece of work. Suspended users live
//! only as continuations parked on the [`TimerSource`] or the
//! [`CompletionSource`], so the number of in-flight users is bounded by
//! memory rather than by the pool size.
use crate::action::{ActionContext, ActionError, ActionId, Exchange, Outcome, Suspension};
use crate::error::SurgeError;
use crate::injection::StartEvent;
use crate::scenario::Scenario;
use crate::session::Session;
use crate::sink::{RequestRecord, UserOutcome};
use crate::transport::{Response, Transport};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use surge_core::{Charset, OverflowPolicy, RunConfig};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
#[allow(unused)]
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

mod completion;
mod reporter;
mod timer;

use completion::CompletionSource;
pub(crate) use reporter::Reporter;
use timer::TimerSource;

/// One user's state between two actions.
pub(crate) struct UserRun {
    pub scenario: Arc<Scenario>,
    pub session: Session,
    pub records: Vec<RequestRecord>,
}

pub(crate) enum Resume {
    At(ActionId),
    Exchange {
        exchange: Exchange,
        result: Result<Response, ActionError>,
    },
}

/// A suspended user and where it picks up again.
pub(crate) struct Continuation {
    pub run: UserRun,
    pub resume: Resume,
}

struct Shared {
    transport: Arc<dyn Transport>,
    default_charset: Charset,
    abort_on_failure: bool,
    reporter: Arc<Reporter>,
    timers: TimerSource,
    completions: CompletionSource,
    cancel: CancellationToken,
}

pub(crate) struct Executor {
    workers: Vec<JoinHandle<()>>,
    timer: JoinHandle<()>,
    tracker: TaskTracker,
    starts: StartQueue,
    queued_starts: async_channel::Receiver<StartEvent>,
    queued_resumes: async_channel::Receiver<Continuation>,
    reporter: Arc<Reporter>,
}

impl Executor {
    pub fn start(
        config: &RunConfig,
        transport: Arc<dyn Transport>,
        reporter: Arc<Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        let (start_tx, start_rx) = match config.start_queue.capacity {
            Some(capacity) => async_channel::bounded(capacity),
            None => async_channel::unbounded(),
        };
        let (resume_tx, resume_rx) = async_channel::unbounded();

        let tracker = TaskTracker::new();
        let (timers, timer) =
            TimerSource::spawn(resume_tx.clone(), reporter.clone(), cancel.clone());
        let completions = CompletionSource::new(
            tracker.clone(),
            resume_tx,
            reporter.clone(),
            cancel.clone(),
            config.request_timeout,
        );

        let shared = Arc::new(Shared {
            transport,
            default_charset: config.default_charset,
            abort_on_failure: config.abort_on_failure,
            reporter: reporter.clone(),
            timers,
            completions,
            cancel,
        });

        let workers = (0..config.pool_size)
            .map(|id| {
                let rng = match config.seed {
                    Some(seed) => SmallRng::seed_from_u64(seed ^ (id as u64 + 1).rotate_left(32)),
                    None => SmallRng::from_entropy(),
                };
                let worker = Worker {
                    id,
                    shared: shared.clone(),
                    rng,
                };
                tokio::spawn(
                    worker
                        .run(start_rx.clone(), resume_rx.clone())
                        .instrument(info_span!("worker", id)),
                )
            })
            .collect();
        debug!(
            "Started {} workers, start queue {:?}",
            config.pool_size, config.start_queue
        );

        Self {
            workers,
            timer,
            tracker,
            starts: StartQueue {
                tx: start_tx,
                overflow: config.start_queue.overflow,
                reporter: reporter.clone(),
            },
            queued_starts: start_rx,
            queued_resumes: resume_rx,
            reporter,
        }
    }

    pub fn starts(&self) -> StartQueue {
        self.starts.clone()
    }

    /// Joins the pool after the run's token was cancelled. Every user still
    /// held anywhere is reported as aborted.
    pub async fn shutdown(self) -> Result<(), SurgeError> {
        let mut failure = None;
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!("Worker failed: {err}");
                failure = Some(SurgeError::WorkerPool(err.to_string()));
            }
        }
        if let Err(err) = self.timer.await {
            error!("Timer source failed: {err}");
            failure = Some(SurgeError::WorkerPool(err.to_string()));
        }
        self.tracker.close();
        self.tracker.wait().await;

        let mut aborted = 0u64;
        while let Ok(continuation) = self.queued_resumes.try_recv() {
            self.reporter.abort(continuation.run);
            aborted += 1;
        }
        while let Ok(event) = self.queued_starts.try_recv() {
            self.reporter.refuse(event, UserOutcome::Aborted);
            aborted += 1;
        }
        if aborted > 0 {
            debug!("Aborted {aborted} queued users at shutdown.");
        }

        failure.map_or(Ok(()), Err)
    }
}

/// Entry point for new users, applying the configured overflow policy.
#[derive(Clone)]
pub(crate) struct StartQueue {
    tx: async_channel::Sender<StartEvent>,
    overflow: OverflowPolicy,
    reporter: Arc<Reporter>,
}

impl StartQueue {
    pub async fn submit(&self, event: StartEvent, cancel: &CancellationToken) {
        self.reporter.admit();
        let pending = event.clone();

        let refused = match self.overflow {
            OverflowPolicy::Reject => match self.tx.try_send(event) {
                Ok(()) => None,
                Err(async_channel::TrySendError::Full(_)) => Some(UserOutcome::Rejected),
                Err(async_channel::TrySendError::Closed(_)) => Some(UserOutcome::Aborted),
            },
            OverflowPolicy::Wait => tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(UserOutcome::Aborted),
                sent = self.tx.send(event) => sent.err().map(|_| UserOutcome::Aborted),
            },
            OverflowPolicy::WaitFor { timeout } => tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(UserOutcome::Aborted),
                sent = tokio::time::timeout(timeout, self.tx.send(event)) => match sent {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => Some(UserOutcome::Aborted),
                    Err(_) => Some(UserOutcome::Rejected),
                },
            },
        };

        if let Some(outcome) = refused {
            debug!("User {} not started: {}", pending.user_id, outcome.as_str());
            self.reporter.refuse(pending, outcome);
        }
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    rng: SmallRng,
}

impl Worker {
    async fn run(
        mut self,
        starts: async_channel::Receiver<StartEvent>,
        resumes: async_channel::Receiver<Continuation>,
    ) {
        let cancel = self.shared.cancel.clone();
        loop {
            // NOTE: Resumptions go first so in-flight users finish before new ones pile up.
            let continuation = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Ok(continuation) = resumes.recv() => continuation,
                Ok(event) = starts.recv() => begin(event),
                else => break,
            };
            self.drive(continuation);
        }
        trace!("Worker {} stopped.", self.id);
    }

    /// Trampoline: runs actions until the user suspends or terminates.
    fn drive(&mut self, continuation: Continuation) {
        let Continuation {
            mut run,
            mut resume,
        } = continuation;
        let scenario = run.scenario.clone();
        let abort_on_failure = scenario
            .abort_on_failure()
            .unwrap_or(self.shared.abort_on_failure);

        loop {
            if self.shared.cancel.is_cancelled() {
                self.shared.reporter.abort(run);
                return;
            }
            if abort_on_failure && run.session.is_failed() && matches!(resume, Resume::At(_)) {
                trace!("User {} failed; skipping the rest of its chain.", run.session.user_id());
                self.terminate(run);
                return;
            }

            let session = run.session.clone();
            let mut ctx = ActionContext {
                transport: self.shared.transport.as_ref(),
                default_charset: self.shared.default_charset,
                records: &mut run.records,
                rng: &mut self.rng,
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match resume {
                Resume::At(id) => scenario.action(id).run(id, session, &mut ctx),
                Resume::Exchange { exchange, result } => scenario
                    .action(exchange.action)
                    .complete(session, exchange, result, ctx.records),
            }));

            match outcome {
                Ok(Outcome::Continue(session, next)) => {
                    run.session = session;
                    resume = Resume::At(next);
                }
                Ok(Outcome::Suspend(session, suspension)) => {
                    run.session = session;
                    self.suspend(run, suspension);
                    return;
                }
                Ok(Outcome::Terminate(session)) => {
                    run.session = session;
                    self.terminate(run);
                    return;
                }
                Err(panic) => {
                    let err = ActionError::Panicked(panic_message(panic.as_ref()));
                    error!("User {} of {}: {err}", run.session.user_id(), scenario.name());
                    run.session = run.session.mark_failed();
                    self.terminate(run);
                    return;
                }
            }
        }
    }

    fn suspend(&self, run: UserRun, suspension: Suspension) {
        match suspension {
            Suspension::Until { deadline, next } => {
                trace!(
                    "User {} sleeping for {:?}",
                    run.session.user_id(),
                    deadline.saturating_duration_since(Instant::now())
                );
                self.shared.timers.register(
                    deadline,
                    Continuation {
                        run,
                        resume: Resume::At(next),
                    },
                );
            }
            Suspension::Io { handle, exchange } => {
                trace!("User {} waiting on {}", run.session.user_id(), exchange.name());
                self.shared.completions.register(run, handle, exchange);
            }
        }
    }

    fn terminate(&self, mut run: UserRun) {
        run.session = run.session.terminate();
        self.shared.reporter.finish(run, UserOutcome::Completed);
    }
}

fn begin(event: StartEvent) -> Continuation {
    let session = Session::new(event.user_id, event.scenario.name_arc(), Instant::now());
    let entry = event.scenario.entry();
    Continuation {
        run: UserRun {
            scenario: event.scenario,
            session,
            records: vec![],
        },
        resume: Resume::At(entry),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
