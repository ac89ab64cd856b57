use super::ActionError;
use crate::session::Session;
use std::sync::Arc;

type ExecFn = dyn Fn(&Session) -> Result<Session, ActionError> + Send + Sync;

/// A synchronous, fallible session transformation.
#[derive(Clone)]
pub struct Exec {
    func: Arc<ExecFn>,
}

impl Exec {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Session) -> Result<Session, ActionError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) fn apply(&self, session: &Session) -> Result<Session, ActionError> {
        (self.func)(session)
    }
}
