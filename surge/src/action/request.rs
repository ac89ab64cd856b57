use super::{ActionContext, ActionError, ActionId, Exchange, Outcome, Suspension};
use crate::body::RequestBodySource;
use crate::session::{Session, Status};
use crate::sink::RequestRecord;
use crate::transport::{Method, Request, Response};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{Charset, DEFAULT_OK_STATUS};
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

type UrlFn = dyn Fn(&Session) -> Result<String, ActionError> + Send + Sync;

#[derive(Clone)]
enum Url {
    Static(Arc<str>),
    Dynamic(Arc<UrlFn>),
}

/// A request issued through the transport. The user suspends until the
/// response arrives, then continues with its session marked OK or KO.
pub struct RequestAction {
    name: Arc<str>,
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<RequestBodySource>,
    content_type: Option<String>,
    charset: Option<Charset>,
    check: RangeInclusive<u16>,
    save_status_as: Option<String>,
}

pub fn get(name: &str, url: impl Into<String>) -> RequestAction {
    RequestAction::new(name, Method::Get, url)
}

pub fn post(name: &str, url: impl Into<String>) -> RequestAction {
    RequestAction::new(name, Method::Post, url)
}

pub fn put(name: &str, url: impl Into<String>) -> RequestAction {
    RequestAction::new(name, Method::Put, url)
}

pub fn delete(name: &str, url: impl Into<String>) -> RequestAction {
    RequestAction::new(name, Method::Delete, url)
}

impl RequestAction {
    pub fn new(name: &str, method: Method, url: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name),
            method,
            url: Url::Static(Arc::from(url.into())),
            headers: vec![],
            body: None,
            content_type: None,
            charset: None,
            check: DEFAULT_OK_STATUS,
            save_status_as: None,
        }
    }

    /// Resolves the url against the session on every run.
    pub fn url_fn<F>(mut self, func: F) -> Self
    where
        F: Fn(&Session) -> Result<String, ActionError> + Send + Sync + 'static,
    {
        self.url = Url::Dynamic(Arc::new(func));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBodySource) -> Self {
        self.body = Some(body);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    /// Statuses considered a success. Defaults to `200..=399`.
    pub fn check_status(mut self, statuses: RangeInclusive<u16>) -> Self {
        self.check = statuses;
        self
    }

    /// Stores the response status as a `u16` session attribute.
    pub fn save_status_as(mut self, key: impl Into<String>) -> Self {
        self.save_status_as = Some(key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Method {
        self.method
    }

    fn prepare(&self, session: &Session, default_charset: Charset) -> Result<Request, ActionError> {
        let url = match &self.url {
            Url::Static(url) => url.to_string(),
            Url::Dynamic(func) => func(session)?,
        };
        let body = self
            .body
            .as_ref()
            .map(|source| {
                source.build(self.content_type.as_deref(), self.charset, default_charset)
            })
            .transpose()?;

        Ok(Request {
            name: self.name.clone(),
            method: self.method,
            url,
            headers: self.headers.clone(),
            body,
        })
    }

    pub(crate) fn issue(
        &self,
        id: ActionId,
        next: ActionId,
        session: Session,
        ctx: &mut ActionContext<'_>,
    ) -> Outcome {
        let request = match self.prepare(&session, ctx.default_charset) {
            Ok(request) => request,
            Err(err) => {
                debug!("User {} could not build {}: {err}", session.user_id(), self.name);
                ctx.records.push(RequestRecord::failed(
                    self.name.clone(),
                    Duration::ZERO,
                    None,
                    &err,
                ));
                return Outcome::Continue(session.mark_failed(), next);
            }
        };

        trace!("User {} issuing {} {}", session.user_id(), request.method, request.url);
        let exchange = Exchange {
            action: id,
            name: self.name.clone(),
            sent_at: Instant::now(),
        };
        let handle = ctx.transport.issue(request);
        Outcome::Suspend(session, Suspension::Io { handle, exchange })
    }

    pub(crate) fn complete(
        &self,
        next: ActionId,
        session: Session,
        exchange: Exchange,
        result: Result<Response, ActionError>,
        records: &mut Vec<RequestRecord>,
    ) -> Outcome {
        let latency = exchange.sent_at.elapsed();
        let session = match (&self.save_status_as, &result) {
            (Some(key), Ok(response)) => session.set(key.clone(), response.status),
            _ => session,
        };

        let result = result.and_then(|response| {
            if self.check.contains(&response.status) {
                Ok(response)
            } else {
                Err(ActionError::UnexpectedStatus(response.status))
            }
        });

        match result {
            Ok(response) => {
                records.push(RequestRecord {
                    name: exchange.name,
                    status: Status::Ok,
                    response_status: Some(response.status),
                    latency,
                    error: None,
                });
                Outcome::Continue(session, next)
            }
            Err(err) => {
                debug!("User {} request {} failed: {err}", session.user_id(), exchange.name);
                let response_status = match &err {
                    ActionError::UnexpectedStatus(status) => Some(*status),
                    _ => None,
                };
                records.push(RequestRecord::failed(exchange.name, latency, response_status, &err));
                Outcome::Continue(session.mark_failed(), next)
            }
        }
    }
}

impl fmt::Debug for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = match &self.url {
            Url::Static(url) => url.as_ref(),
            Url::Dynamic(_) => "<dynamic>",
        };
        f.debug_struct("RequestAction")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("url", &url)
            .field("body", &self.body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::session;
    use crate::body::RequestBodySource;
    use crate::transport::{IoHandle, TransportError};
    use futures_util::FutureExt;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    #[tokio::test]
    async fn issue_suspends_on_io() {
        let seen = Arc::new(Mutex::new(vec![]));
        let transport = {
            let seen = seen.clone();
            move |request: Request| -> IoHandle {
                seen.lock().unwrap().push(request.url.clone());
                async { Ok(Response::with_status(200)) }.boxed()
            }
        };
        let mut records = vec![];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = ActionContext {
            transport: &transport,
            default_charset: Charset::Utf8,
            records: &mut records,
            rng: &mut rng,
        };

        let action = get("user", "unused").url_fn(|session| {
            Ok(format!("http://localhost/users/{}", session.user_id()))
        });
        match action.issue(4, 5, session(), &mut ctx) {
            Outcome::Suspend(_, Suspension::Io { handle, exchange }) => {
                assert_eq!(exchange.action, 4);
                assert_eq!(exchange.name(), "user");
                assert_eq!(handle.await.unwrap().status, 200);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["http://localhost/users/7"]);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unbuildable_body_fails_without_issuing() {
        let transport = |_request: Request| -> IoHandle {
            panic!("must not be issued");
        };
        let mut records = vec![];
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = ActionContext {
            transport: &transport,
            default_charset: Charset::Utf8,
            records: &mut records,
            rng: &mut rng,
        };

        let action = post("upload", "http://localhost/upload")
            .body(RequestBodySource::file("/surely/not/a/real/upload.bin"));
        match action.issue(0, 1, session(), &mut ctx) {
            Outcome::Continue(session, 1) => assert!(session.is_failed()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Ko);
        assert_eq!(records[0].response_status, None);
    }

    fn exchange() -> Exchange {
        Exchange {
            action: 0,
            name: Arc::from("home"),
            sent_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completion_records_latency_and_status() {
        let action = get("home", "http://localhost/").save_status_as("status");
        let exchange = exchange();
        tokio::time::advance(Duration::from_millis(30)).await;

        let mut records = vec![];
        let outcome = action.complete(
            9,
            session(),
            exchange,
            Ok(Response::with_status(204)),
            &mut records,
        );
        match outcome {
            Outcome::Continue(session, 9) => {
                assert!(!session.is_failed());
                assert_eq!(session.get::<u16>("status"), Some(&204));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(records[0].status, Status::Ok);
        assert_eq!(records[0].latency, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn unexpected_status_is_ko() {
        let action = get("home", "http://localhost/").check_status(200..=200);
        let mut records = vec![];
        match action.complete(1, session(), exchange(), Ok(Response::with_status(302)), &mut records) {
            Outcome::Continue(session, 1) => assert!(session.is_failed()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(records[0].status, Status::Ko);
        assert_eq!(records[0].response_status, Some(302));
    }

    #[tokio::test]
    async fn transport_error_is_ko() {
        let action = get("home", "http://localhost/");
        let mut records = vec![];
        let result = Err(ActionError::Transport(TransportError::new("connection refused")));
        match action.complete(1, session(), exchange(), result, &mut records) {
            Outcome::Continue(session, 1) => assert!(session.is_failed()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(records[0].error.as_deref(), Some("connection refused"));
    }
}
