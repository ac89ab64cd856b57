//! The seam to whatever actually puts requests on the wire.
//!
//! The engine only relies on [`Transport::issue`] handing back an
//! [`IoHandle`] that resolves once the exchange is over.
use crate::body::RequestBody;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Completion of one issued request.
pub type IoHandle = BoxFuture<'static, Result<Response, TransportError>>;

pub trait Transport: Send + Sync + 'static {
    fn issue(&self, request: Request) -> IoHandle;
}

impl<F> Transport for F
where
    F: Fn(Request) -> IoHandle + Send + Sync + 'static,
{
    fn issue(&self, request: Request) -> IoHandle {
        self(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Request {
    /// Name the request is reported under.
    pub name: Arc<str>,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body_length: u64,
}

impl Response {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The transport could not complete an exchange.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
