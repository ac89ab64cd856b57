use super::{BodyError, BodyStream};
use bytes::Bytes;
use std::io;
use std::sync::{Mutex, PoisonError};

/// Body content produced by a caller-supplied stream.
///
/// A stream built with [`StreamSource::once`] is handed out to the first
/// build only; any later build fails with [`BodyError::StreamConsumed`].
/// Retrying a request with such a body is the caller's concern. Use
/// [`StreamSource::from_fn`] when every build needs fresh content.
pub struct StreamSource {
    kind: Kind,
}

enum Kind {
    Once(Mutex<Option<BodyStream>>),
    Factory(Box<dyn Fn() -> BodyStream + Send + Sync>),
}

impl StreamSource {
    pub fn once<S>(stream: S, length: Option<u64>) -> Self
    where
        S: futures_util::Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Once(Mutex::new(Some(BodyStream::new(stream, length)))),
        }
    }

    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn() -> BodyStream + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Factory(Box::new(factory)),
        }
    }

    pub(crate) fn take(&self) -> Result<BodyStream, BodyError> {
        match &self.kind {
            Kind::Once(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(BodyError::StreamConsumed),
            Kind::Factory(factory) => Ok(factory()),
        }
    }
}
