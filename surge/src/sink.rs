//! Where finished users go.
use crate::action::ActionError;
use crate::session::{Session, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Receives one report per virtual user, fire and forget.
pub trait ReportSink: Send + Sync + 'static {
    fn report(&self, report: UserReport);
}

impl ReportSink for () {
    fn report(&self, _report: UserReport) {}
}

impl<F> ReportSink for F
where
    F: Fn(UserReport) + Send + Sync + 'static,
{
    fn report(&self, report: UserReport) {
        self(report)
    }
}

impl ReportSink for UnboundedSender<UserReport> {
    fn report(&self, report: UserReport) {
        // NOTE: A dropped receiver just means nobody is listening anymore.
        let _ = self.send(report);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserOutcome {
    /// The chain ran to its end.
    Completed,
    /// The run stopped while the user was in flight.
    Aborted,
    /// The start queue refused the user.
    Rejected,
}

impl UserOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserOutcome::Completed => "completed",
            UserOutcome::Aborted => "aborted",
            UserOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserReport {
    pub session: Session,
    pub requests: Vec<RequestRecord>,
    pub outcome: UserOutcome,
    pub elapsed: Duration,
}

impl UserReport {
    pub fn status(&self) -> Status {
        self.session.status()
    }
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub name: Arc<str>,
    pub status: Status,
    pub response_status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl RequestRecord {
    pub(crate) fn failed(
        name: Arc<str>,
        latency: Duration,
        response_status: Option<u16>,
        err: &ActionError,
    ) -> Self {
        Self {
            name,
            status: Status::Ko,
            response_status,
            latency,
            error: Some(err.to_string()),
        }
    }
}
