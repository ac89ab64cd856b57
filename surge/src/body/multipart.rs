use super::{BodyError, BodyStream, ByteStream, Payload, RequestBody, RequestBodySource};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use surge_core::{Charset, MULTIPART_BOUNDARY_LEN, MULTIPART_INLINE_LIMIT};

const CRLF: &[u8] = b"\r\n";

/// `multipart/form-data` body composed of named parts.
#[derive(Debug, Default)]
pub struct MultipartSource {
    parts: Vec<Part>,
    boundary: Option<String>,
}

/// One named part; its content is any other body source.
#[derive(Debug)]
pub struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    charset: Option<Charset>,
    source: RequestBodySource,
}

impl Part {
    pub fn new(name: impl Into<String>, source: RequestBodySource) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            charset: None,
            source,
        }
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Overrides the charset resolved for the whole body.
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    fn header(&self, boundary: &str, content_type: Option<&str>, charset: Charset) -> Bytes {
        let mut header = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"",
            escape(&self.name)
        );
        if let Some(file_name) = &self.file_name {
            header.push_str(&format!("; filename=\"{}\"", escape(file_name)));
        }
        header.push_str("\r\n");

        let is_text = self.source.is_text();
        match content_type {
            Some(content_type) if is_text && !content_type.contains("charset=") => {
                header.push_str(&format!("Content-Type: {content_type}; charset={charset}\r\n"))
            }
            Some(content_type) => header.push_str(&format!("Content-Type: {content_type}\r\n")),
            None if is_text => {
                header.push_str(&format!("Content-Type: text/plain; charset={charset}\r\n"))
            }
            None => header.push_str("Content-Type: application/octet-stream\r\n"),
        }
        header.push_str("\r\n");
        Bytes::from(header)
    }
}

impl MultipartSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Use a fixed boundary instead of a generated one.
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(super) fn build(
        &self,
        content_type: Option<&str>,
        charset: Charset,
        default_charset: Charset,
    ) -> Result<RequestBody, BodyError> {
        let boundary = self.boundary.clone().unwrap_or_else(generate_boundary);

        let mut segments = Vec::with_capacity(self.parts.len() * 3 + 1);
        for part in &self.parts {
            let part_charset = part.charset.unwrap_or(charset);
            let body = part.source.build(
                part.content_type.as_deref(),
                Some(part_charset),
                default_charset,
            )?;

            segments.push(Segment::Bytes(part.header(
                &boundary,
                body.content_type(),
                part_charset,
            )));
            segments.push(match body.into_payload() {
                Payload::Buffered(bytes) => Segment::Bytes(bytes),
                Payload::Streamed(stream) => Segment::Stream(stream),
            });
            segments.push(Segment::Bytes(Bytes::from_static(CRLF)));
        }
        segments.push(Segment::Bytes(Bytes::from(format!("--{boundary}--\r\n"))));

        let content_type = format!(
            "{}; boundary={boundary}",
            content_type.unwrap_or("multipart/form-data")
        );

        // NOTE: the length is only known when every part's length is.
        let length: Option<u64> = segments.iter().map(Segment::len).sum();

        // NOTE: Large buffered parts are chained as they are instead of copied.
        let inline = segments.iter().all(Segment::is_buffered)
            && length.map_or(false, |length| length <= MULTIPART_INLINE_LIMIT as u64);
        let payload = if inline {
            let mut buf = BytesMut::with_capacity(length.unwrap_or(0) as usize);
            for segment in &segments {
                if let Segment::Bytes(bytes) = segment {
                    buf.extend_from_slice(bytes);
                }
            }
            Payload::Buffered(buf.freeze())
        } else {
            let stream = stream::iter(segments.into_iter().map(Segment::into_stream)).flatten();
            Payload::Streamed(BodyStream::new(stream, length))
        };

        Ok(RequestBody {
            content_type: Some(content_type),
            charset,
            payload,
        })
    }
}

enum Segment {
    Bytes(Bytes),
    Stream(BodyStream),
}

impl Segment {
    fn len(&self) -> Option<u64> {
        match self {
            Segment::Bytes(bytes) => Some(bytes.len() as u64),
            Segment::Stream(stream) => stream.length(),
        }
    }

    fn is_buffered(&self) -> bool {
        matches!(self, Segment::Bytes(_))
    }

    fn into_stream(self) -> ByteStream {
        match self {
            Segment::Bytes(bytes) => BodyStream::from_bytes(bytes).into_stream(),
            Segment::Stream(stream) => stream.into_stream(),
        }
    }
}

fn generate_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MULTIPART_BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

fn escape(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}
