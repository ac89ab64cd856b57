//! [`Transport`] over `reqwest`. (requires `http` feature)
use crate::body::Payload;
use crate::transport::{IoHandle, Method, Request, Response, Transport, TransportError};
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Issues requests through a shared connection pool.
///
/// Streamed bodies are handed to `reqwest` as streams, so file uploads are
/// read chunk by chunk while they are sent.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn issue(&self, request: Request) -> IoHandle {
        let client = self.client.clone();
        async move { send(client, request).await }.boxed()
    }
}

async fn send(client: reqwest::Client, request: Request) -> Result<Response, TransportError> {
    let mut builder = client.request(method(request.method), &request.url);
    let explicit_content_type = request
        .headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(body) = request.body {
        if let (Some(content_type), false) = (body.content_type(), explicit_content_type) {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder = match body.into_payload() {
            Payload::Buffered(bytes) => builder.body(bytes),
            Payload::Streamed(stream) => {
                if let Some(length) = stream.length() {
                    builder = builder.header(CONTENT_LENGTH, length);
                }
                builder.body(reqwest::Body::wrap_stream(stream.into_stream()))
            }
        };
    }

    let response = builder.send().await.map_err(transport_error)?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();

    // NOTE: Drain the body so the connection goes back to the pool.
    let mut body_length = 0;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        body_length += chunk.map_err(transport_error)?.len() as u64;
    }

    Ok(Response {
        status,
        headers,
        body_length,
    })
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    trace!("reqwest error: {err:?}");
    TransportError::new(err.to_string())
}
