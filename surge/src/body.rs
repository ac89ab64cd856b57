//! Outbound payload construction.
//!
//! A [`RequestBodySource`] is built once per request definition and shared by
//! every user running it. [`RequestBodySource::build`] turns it into a
//! [`RequestBody`] for one request: either fully buffered bytes, or a lazily
//! produced stream that is only read when the transport transmits it.
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, TryStreamExt};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use surge_core::{Charset, FILE_CHUNK_SIZE};
use thiserror::Error;
use tokio_util::io::ReaderStream;

mod multipart;
mod stream_source;

pub use multipart::{MultipartSource, Part};
pub use stream_source::StreamSource;

/// The body source could not be accessed while building a request.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Cannot read body source {origin}: {source}")]
    Unreadable {
        origin: String,
        #[source]
        source: io::Error,
    },

    #[error("Stream body was already consumed and cannot be replayed.")]
    StreamConsumed,
}

pub struct RequestBodySource {
    source: Source,
}

enum Source {
    Bytes(Bytes),
    /// Always valid UTF-8; kept as `Bytes` so UTF-8 builds share it.
    Text(Bytes),
    /// Probed at build time, read in chunks at transmission time.
    File(PathBuf),
    Stream(StreamSource),
    /// `application/x-www-form-urlencoded` parameters.
    Form(Vec<(String, String)>),
    Multipart(MultipartSource),
}

impl RequestBodySource {
    fn new(source: Source) -> Self {
        Self { source }
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Source::Bytes(bytes.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Source::Text(Bytes::from(text.into())))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Source::File(path.into()))
    }

    pub fn stream(stream: StreamSource) -> Self {
        Self::new(Source::Stream(stream))
    }

    pub fn form<K, V>(params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(Source::Form(
            params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn multipart(multipart: MultipartSource) -> Self {
        Self::new(Source::Multipart(multipart))
    }

    /// Build the body of one request.
    ///
    /// `charset` wins when given, otherwise `default_charset` is used.
    pub fn build(
        &self,
        content_type: Option<&str>,
        charset: Option<Charset>,
        default_charset: Charset,
    ) -> Result<RequestBody, BodyError> {
        let charset = charset.unwrap_or(default_charset);
        let content_type = content_type.map(str::to_string);

        let payload = match &self.source {
            Source::Bytes(bytes) => Payload::Buffered(bytes.clone()),
            Source::Text(text) => Payload::Buffered(encode_text(charset, text)),
            Source::File(path) => Payload::Streamed(file_stream(path)?),
            Source::Stream(source) => Payload::Streamed(source.take()?),
            Source::Form(params) => {
                let content_type = content_type
                    .unwrap_or_else(|| "application/x-www-form-urlencoded".to_string());
                return Ok(RequestBody {
                    content_type: Some(content_type),
                    charset,
                    payload: Payload::Buffered(encode_form(charset, params)),
                });
            }
            Source::Multipart(multipart) => {
                return multipart.build(content_type.as_deref(), charset, default_charset)
            }
        };

        Ok(RequestBody {
            content_type,
            charset,
            payload,
        })
    }

    pub(crate) fn is_text(&self) -> bool {
        matches!(self.source, Source::Text(_) | Source::Form(_))
    }
}

impl fmt::Debug for RequestBodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Source::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Source::File(path) => write!(f, "File({})", path.display()),
            Source::Stream(_) => f.write_str("Stream"),
            Source::Form(params) => write!(f, "Form({} params)", params.len()),
            Source::Multipart(multipart) => write!(f, "Multipart({} parts)", multipart.len()),
        }
    }
}

fn encode_text(charset: Charset, utf8: &Bytes) -> Bytes {
    if charset == Charset::Utf8 {
        return utf8.clone();
    }
    // NOTE: only ever constructed from a `String`.
    let text = std::str::from_utf8(utf8).unwrap_or_default();
    match charset.encode(text) {
        std::borrow::Cow::Borrowed(_) => utf8.clone(),
        std::borrow::Cow::Owned(bytes) => Bytes::from(bytes),
    }
}

fn encode_form(charset: Charset, params: &[(String, String)]) -> Bytes {
    let mut out = String::new();
    for (idx, (key, value)) in params.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.extend(url::form_urlencoded::byte_serialize(&charset.encode(key)));
        out.push('=');
        out.extend(url::form_urlencoded::byte_serialize(&charset.encode(value)));
    }
    Bytes::from(out)
}

fn file_stream(path: &Path) -> Result<BodyStream, BodyError> {
    let unreadable = |source| BodyError::Unreadable {
        origin: path.display().to_string(),
        source,
    };

    let file = std::fs::File::open(path).map_err(unreadable)?;
    let metadata = file.metadata().map_err(unreadable)?;
    if !metadata.is_file() {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    // NOTE: Opened now, read only once the transport polls the stream.
    let stream = ReaderStream::with_capacity(tokio::fs::File::from_std(file), FILE_CHUNK_SIZE);

    Ok(BodyStream::new(stream, Some(metadata.len())))
}

/// A wire-ready payload plus the metadata the transport needs to frame it.
#[derive(Debug)]
pub struct RequestBody {
    content_type: Option<String>,
    charset: Charset,
    payload: Payload,
}

pub enum Payload {
    /// Content resident in memory, length known.
    Buffered(Bytes),
    Streamed(BodyStream),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Payload::Streamed(stream) => write!(f, "Streamed({:?})", stream.length),
        }
    }
}

impl RequestBody {
    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: None,
            charset: Charset::default(),
            payload: Payload::Buffered(bytes.into()),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn content_length(&self) -> Option<u64> {
        match &self.payload {
            Payload::Buffered(bytes) => Some(bytes.len() as u64),
            Payload::Streamed(stream) => stream.length,
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self.payload, Payload::Streamed(_))
    }

    /// Buffered content, if resident.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Buffered(bytes) => Some(bytes),
            Payload::Streamed(_) => None,
        }
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Read the whole body into memory. Meant for tests and small bodies.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self.payload {
            Payload::Buffered(bytes) => Ok(bytes),
            Payload::Streamed(stream) => stream.collect().await,
        }
    }
}

/// Boxed chunk stream handed to transports. `Sync` so it can back a
/// `reqwest::Body`.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// A lazily produced body with an optional known length.
pub struct BodyStream {
    length: Option<u64>,
    stream: ByteStream,
}

impl BodyStream {
    pub fn new<S>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            length,
            stream: Box::pin(stream),
        }
    }

    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        let length = bytes.len() as u64;
        Self::new(stream::iter(Some(Ok(bytes))), Some(length))
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    pub async fn collect(self) -> io::Result<Bytes> {
        let capacity = self.length.unwrap_or(0).min(FILE_CHUNK_SIZE as u64 * 16) as usize;
        let buf = self
            .stream
            .try_fold(BytesMut::with_capacity(capacity), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
