use super::{panic_message, UserRun};
use crate::injection::StartEvent;
use crate::session::{Session, Status};
use crate::sink::{ReportSink, UserOutcome, UserReport};
use metrics_util::AtomicBucket;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use surge_core::{LatencyDigest, RunStatistics};
use tokio::sync::Notify;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Funnels every finished user into the sink and keeps the run totals.
pub(crate) struct Reporter {
    sink: Box<dyn ReportSink>,
    counters: Counters,
    active: ActiveUsers,
}

impl Reporter {
    pub fn new(sink: impl ReportSink) -> Self {
        Self {
            sink: Box::new(sink),
            counters: Counters::new(),
            active: ActiveUsers::default(),
        }
    }

    /// A start event entered the executor.
    pub fn admit(&self) {
        self.counters.users_started.fetch_add(1, Ordering::Relaxed);
        self.active.enter();
    }

    pub fn finish(&self, run: UserRun, outcome: UserOutcome) {
        let report = UserReport {
            elapsed: run.session.started_at().elapsed(),
            session: run.session,
            requests: run.records,
            outcome,
        };
        self.deliver(report);
    }

    pub fn abort(&self, run: UserRun) {
        self.finish(run, UserOutcome::Aborted);
    }

    /// A start event that never reached a worker.
    pub fn refuse(&self, event: StartEvent, outcome: UserOutcome) {
        let session = Session::new(event.user_id, event.scenario.name_arc(), Instant::now());
        self.deliver(UserReport {
            session,
            requests: vec![],
            outcome,
            elapsed: Duration::ZERO,
        });
    }

    fn deliver(&self, report: UserReport) {
        let _leave = Leave(&self.active);
        self.counters.record(&report);
        #[cfg(feature = "metrics")]
        emit_metrics(&report);

        let user_id = report.session.user_id();
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.sink.report(report))) {
            error!(
                "Report sink panicked on user {user_id}: {}",
                panic_message(panic.as_ref())
            );
        }
    }

    pub fn active(&self) -> u64 {
        self.active.count.load(Ordering::Acquire)
    }

    pub async fn wait_idle(&self) {
        self.active.wait_idle().await
    }

    pub fn snapshot(&self, elapsed: Duration, stopped: bool) -> RunStatistics {
        self.counters.snapshot(elapsed, stopped)
    }
}

struct Counters {
    users_started: AtomicU64,
    users_ok: AtomicU64,
    users_ko: AtomicU64,
    users_aborted: AtomicU64,
    users_rejected: AtomicU64,
    requests_ok: AtomicU64,
    requests_ko: AtomicU64,
    latency: AtomicBucket<Duration>,
}

impl Counters {
    fn new() -> Self {
        Self {
            users_started: AtomicU64::new(0),
            users_ok: AtomicU64::new(0),
            users_ko: AtomicU64::new(0),
            users_aborted: AtomicU64::new(0),
            users_rejected: AtomicU64::new(0),
            requests_ok: AtomicU64::new(0),
            requests_ko: AtomicU64::new(0),
            latency: AtomicBucket::new(),
        }
    }

    fn record(&self, report: &UserReport) {
        let users = match (report.outcome, report.status()) {
            (UserOutcome::Completed, Status::Ok) => &self.users_ok,
            (UserOutcome::Completed, Status::Ko) => &self.users_ko,
            (UserOutcome::Aborted, _) => &self.users_aborted,
            (UserOutcome::Rejected, _) => &self.users_rejected,
        };
        users.fetch_add(1, Ordering::Relaxed);

        for request in &report.requests {
            match request.status {
                Status::Ok => self.requests_ok.fetch_add(1, Ordering::Relaxed),
                Status::Ko => self.requests_ko.fetch_add(1, Ordering::Relaxed),
            };
            self.latency.push(request.latency);
        }
    }

    fn snapshot(&self, elapsed: Duration, stopped: bool) -> RunStatistics {
        let mut latency = LatencyDigest::new();
        self.latency.clear_with(|chunk| latency.extend(chunk));
        RunStatistics {
            users_started: self.users_started.load(Ordering::Relaxed),
            users_ok: self.users_ok.load(Ordering::Relaxed),
            users_ko: self.users_ko.load(Ordering::Relaxed),
            users_aborted: self.users_aborted.load(Ordering::Relaxed),
            users_rejected: self.users_rejected.load(Ordering::Relaxed),
            requests_ok: self.requests_ok.load(Ordering::Relaxed),
            requests_ko: self.requests_ko.load(Ordering::Relaxed),
            latency,
            elapsed,
            stopped,
        }
    }
}

#[cfg(feature = "metrics")]
fn emit_metrics(report: &UserReport) {
    metrics::counter!(
        surge_core::METRIC_USERS,
        "scenario" => report.session.scenario().to_string(),
        "outcome" => report.outcome.as_str(),
        "status" => report.status().to_string()
    )
    .increment(1);

    for request in &report.requests {
        metrics::counter!(
            surge_core::METRIC_REQUESTS,
            "request" => request.name.to_string(),
            "status" => request.status.to_string()
        )
        .increment(1);
        metrics::histogram!(
            surge_core::METRIC_REQUEST_LATENCY,
            "request" => request.name.to_string()
        )
        .record(request.latency.as_secs_f64());
    }
}

/// Users admitted but not yet reported.
#[derive(Default)]
struct ActiveUsers {
    count: AtomicU64,
    idle: Notify,
}

impl ActiveUsers {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            // NOTE: Created before the check so a concurrent notify is not missed.
            let notified = self.idle.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks a user reported however delivery ends.
struct Leave<'a>(&'a ActiveUsers);

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}
