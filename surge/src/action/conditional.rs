use super::{ActionError, ActionId, Outcome};
use crate::session::Session;
use std::fmt;
use std::sync::Arc;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

type PredicateFn = dyn Fn(&Session) -> Result<bool, ActionError> + Send + Sync;

/// A user supplied test against the session.
#[derive(Clone)]
pub struct Predicate {
    func: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Session) -> Result<bool, ActionError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub fn is_failed() -> Self {
        Self::new(|session| Ok(session.is_failed()))
    }

    pub fn has_attribute(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |session| Ok(session.contains(&key)))
    }

    pub(crate) fn test(&self, session: &Session) -> Result<bool, ActionError> {
        (self.func)(session)
    }
}

/// Routes to the first branch whose predicate holds, else to `otherwise`.
pub struct Conditional {
    pub(crate) branches: Vec<(Predicate, ActionId)>,
    pub(crate) otherwise: ActionId,
}

impl Conditional {
    pub(crate) fn route(&self, session: Session) -> Outcome {
        for (predicate, target) in &self.branches {
            match predicate.test(&session) {
                Ok(true) => return Outcome::Continue(session, *target),
                Ok(false) => {}
                Err(err) => {
                    debug!("User {} predicate failed: {err}", session.user_id());
                    return Outcome::Continue(session.mark_failed(), self.otherwise);
                }
            }
        }
        Outcome::Continue(session, self.otherwise)
    }
}

impl fmt::Debug for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<_> = self.branches.iter().map(|(_, id)| *id).collect();
        write!(f, "Conditional({targets:?} else {})", self.otherwise)
    }
}
