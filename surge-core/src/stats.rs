use crate::LatencyDigest;
use std::fmt;
use std::time::Duration;

/// Summary of a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunStatistics {
    /// Users handed to the executor, including ones later rejected.
    pub users_started: u64,
    pub users_ok: u64,
    pub users_ko: u64,
    /// Users cut short by a stop, or still queued when it happened.
    pub users_aborted: u64,
    /// User starts refused because the start queue was full.
    pub users_rejected: u64,
    pub requests_ok: u64,
    pub requests_ko: u64,
    pub latency: LatencyDigest,
    pub elapsed: Duration,
    /// Whether the run was stopped before every user finished.
    pub stopped: bool,
}

impl RunStatistics {
    pub fn users_finished(&self) -> u64 {
        self.users_ok + self.users_ko + self.users_aborted + self.users_rejected
    }

    pub fn requests(&self) -> u64 {
        self.requests_ok + self.requests_ko
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests() == 0 {
            0.
        } else {
            self.requests_ko as f64 / self.requests() as f64
        }
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "users: started={} ok={} ko={} aborted={} rejected={}; requests: ok={} ko={} ({:.2}% errors); latency: {}; elapsed {}",
            self.users_started,
            self.users_ok,
            self.users_ko,
            self.users_aborted,
            self.users_rejected,
            self.requests_ok,
            self.requests_ko,
            self.error_rate() * 100.,
            self.latency,
            humantime::format_duration(self.elapsed),
        )
    }
}
