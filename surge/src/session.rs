//! Per-user state threaded through an action chain.
//!
//! A [`Session`] is an immutable value. Every operation that changes something
//! hands back a new session and leaves the receiver untouched, so a session
//! captured in a suspended continuation can never be mutated from another
//! worker.
use crate::action::ActionError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome marker of a user run so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Ko,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::Ko => f.write_str("KO"),
        }
    }
}

type Attribute = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionData>,
}

#[derive(Clone)]
struct SessionData {
    user_id: u64,
    scenario: Arc<str>,
    started_at: Instant,
    attributes: HashMap<String, Attribute>,
    status: Status,
    terminated: bool,
}

impl Session {
    pub fn new(user_id: u64, scenario: Arc<str>, started_at: Instant) -> Self {
        Self {
            inner: Arc::new(SessionData {
                user_id,
                scenario,
                started_at,
                attributes: HashMap::new(),
                status: Status::Ok,
                terminated: false,
            }),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.inner.user_id
    }

    pub fn scenario(&self) -> &str {
        &self.inner.scenario
    }

    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    pub fn status(&self) -> Status {
        self.inner.status
    }

    pub fn is_failed(&self) -> bool {
        self.inner.status == Status::Ko
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.inner.attributes.get(key)?.downcast_ref()
    }

    /// Like [`Session::get`], but a missing or mistyped attribute is a user error.
    pub fn require<T: Any>(&self, key: &str) -> Result<&T, ActionError> {
        self.get(key)
            .ok_or_else(|| ActionError::MissingAttribute(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.attributes.contains_key(key)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.inner.attributes.keys().map(String::as_str)
    }

    #[must_use]
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Session {
        self.modify(|data| {
            data.attributes.insert(key.into(), Arc::new(value));
        })
    }

    #[must_use]
    pub fn remove(&self, key: &str) -> Session {
        if !self.contains(key) {
            return self.clone();
        }
        self.modify(|data| {
            data.attributes.remove(key);
        })
    }

    #[must_use]
    pub fn mark_failed(&self) -> Session {
        self.with_status(Status::Ko)
    }

    #[must_use]
    pub fn mark_succeeded(&self) -> Session {
        self.with_status(Status::Ok)
    }

    #[must_use]
    pub fn with_status(&self, status: Status) -> Session {
        if self.inner.status == status {
            return self.clone();
        }
        self.modify(|data| data.status = status)
    }

    #[must_use]
    pub(crate) fn terminate(&self) -> Session {
        if self.inner.terminated {
            return self.clone();
        }
        self.modify(|data| data.terminated = true)
    }

    /// Whether both handles point at the very same session value.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn modify(&self, f: impl FnOnce(&mut SessionData)) -> Session {
        let mut next = self.clone();
        // NOTE: `self` still holds a reference, so this always copies.
        f(Arc::make_mut(&mut next.inner));
        next
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.attribute_names().collect();
        keys.sort_unstable();
        f.debug_struct("Session")
            .field("user_id", &self.inner.user_id)
            .field("scenario", &self.inner.scenario)
            .field("status", &self.inner.status)
            .field("terminated", &self.inner.terminated)
            .field("attributes", &keys)
            .finish()
    }
}
