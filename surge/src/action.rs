//! Compiled action nodes and the single `run` contract the executor drives.
//!
//! A scenario compiles into a flat arena of [`Action`]s addressed by
//! [`ActionId`]. Nodes hold the ids of their successors, never the other way
//! round, so the chain is acyclic and can be shared read-only by every user
//! of the scenario.
use crate::body::BodyError;
use crate::session::Session;
use crate::sink::RequestRecord;
use crate::transport::{IoHandle, Response, Transport, TransportError};
use rand::rngs::SmallRng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use surge_core::Charset;
use thiserror::Error;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

mod conditional;
mod exec;
mod pause;
mod request;

pub use conditional::{Conditional, Predicate};
pub use exec::Exec;
pub use pause::Pause;
pub use request::{delete, get, post, put, RequestAction};

/// Index of an action in its scenario's arena.
pub type ActionId = usize;

/// Per-user failure. Never escapes the user it happened to.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("session attribute `{0}` is missing or has another type")]
    MissingAttribute(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("action panicked: {0}")]
    Panicked(String),
}

impl ActionError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub enum Action {
    Request { request: RequestAction, next: ActionId },
    Pause { pause: Pause, next: ActionId },
    Conditional(Conditional),
    Exec { exec: Exec, next: ActionId },
    Exit,
}

/// What a user does after running one action.
#[derive(Debug)]
pub enum Outcome {
    Continue(Session, ActionId),
    Suspend(Session, Suspension),
    Terminate(Session),
}

/// A user detached from its worker, waiting on a timer or an I/O completion.
pub enum Suspension {
    Until { deadline: Instant, next: ActionId },
    Io { handle: IoHandle, exchange: Exchange },
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspension::Until { deadline, next } => f
                .debug_struct("Until")
                .field("deadline", deadline)
                .field("next", next)
                .finish(),
            Suspension::Io { exchange, .. } => {
                f.debug_struct("Io").field("exchange", exchange).finish()
            }
        }
    }
}

/// An issued request waiting for its response.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub(crate) action: ActionId,
    pub(crate) name: Arc<str>,
    pub(crate) sent_at: Instant,
}

impl Exchange {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }
}

/// Everything an action may touch besides the session.
pub(crate) struct ActionContext<'a> {
    pub transport: &'a dyn Transport,
    pub default_charset: Charset,
    pub records: &'a mut Vec<RequestRecord>,
    pub rng: &'a mut SmallRng,
}

impl Action {
    pub(crate) fn run(&self, id: ActionId, session: Session, ctx: &mut ActionContext<'_>) -> Outcome {
        match self {
            Action::Request { request, next } => request.issue(id, *next, session, ctx),
            Action::Pause { pause, next } => {
                let dur = pause.duration(ctx.rng);
                if dur.is_zero() {
                    Outcome::Continue(session, *next)
                } else {
                    Outcome::Suspend(
                        session,
                        Suspension::Until {
                            deadline: Instant::now() + dur,
                            next: *next,
                        },
                    )
                }
            }
            Action::Conditional(conditional) => conditional.route(session),
            Action::Exec { exec, next } => match exec.apply(&session) {
                Ok(session) => Outcome::Continue(session, *next),
                Err(err) => {
                    debug!("User {} exec failed: {err}", session.user_id());
                    Outcome::Continue(session.mark_failed(), *next)
                }
            },
            Action::Exit => Outcome::Terminate(session),
        }
    }

    /// Resumes the request node that issued `exchange`.
    pub(crate) fn complete(
        &self,
        session: Session,
        exchange: Exchange,
        result: Result<Response, ActionError>,
        records: &mut Vec<RequestRecord>,
    ) -> Outcome {
        match self {
            Action::Request { request, next } => {
                request.complete(*next, session, exchange, result, records)
            }
            other => {
                error!("Exchange {} resumed on a {} node", exchange.name, other.kind());
                Outcome::Terminate(session.mark_failed())
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Request { .. } => "request",
            Action::Pause { .. } => "pause",
            Action::Conditional(_) => "conditional",
            Action::Exec { .. } => "exec",
            Action::Exit => "exit",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Request { request, next } => write!(f, "Request({}) -> {next}", request.name()),
            Action::Pause { pause, next } => write!(f, "{pause:?} -> {next}"),
            Action::Conditional(conditional) => write!(f, "{conditional:?}"),
            Action::Exec { next, .. } => write!(f, "Exec -> {next}"),
            Action::Exit => f.write_str("Exit"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::Request;
    use futures_util::FutureExt;
    use rand::SeedableRng;

    pub(crate) fn ok_transport() -> impl Transport {
        |_request: Request| -> IoHandle { async { Ok(Response::with_status(200)) }.boxed() }
    }

    pub(crate) fn session() -> Session {
        Session::new(7, Arc::from("test"), Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suspends_until_deadline() {
        let transport = ok_transport();
        let mut records = vec![];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = ActionContext {
            transport: &transport,
            default_charset: Charset::Utf8,
            records: &mut records,
            rng: &mut rng,
        };

        let action = Action::Pause {
            pause: Pause::Fixed(Duration::from_secs(2)),
            next: 3,
        };
        let before = Instant::now();
        let original = session();
        match action.run(1, original.clone(), &mut ctx) {
            Outcome::Suspend(session, Suspension::Until { deadline, next }) => {
                assert!(session.ptr_eq(&original));
                assert_eq!(next, 3);
                assert_eq!(deadline, before + Duration::from_secs(2));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_exec_marks_session() {
        let transport = ok_transport();
        let mut records = vec![];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = ActionContext {
            transport: &transport,
            default_charset: Charset::Utf8,
            records: &mut records,
            rng: &mut rng,
        };

        let action = Action::Exec {
            exec: Exec::new(|_session: &Session| Err(ActionError::msg("boom"))),
            next: 0,
        };
        match action.run(1, session(), &mut ctx) {
            Outcome::Continue(session, 0) => assert!(session.is_failed()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn exit_terminates() {
        let transport = ok_transport();
        let mut records = vec![];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = ActionContext {
            transport: &transport,
            default_charset: Charset::Utf8,
            records: &mut records,
            rng: &mut rng,
        };
        assert!(matches!(
            Action::Exit.run(0, session(), &mut ctx),
            Outcome::Terminate(_)
        ));
    }
}
