//! HTTP stream client

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::FrameDecoder,
    error::{Error, Result},
    frame::StreamFrame,
    request::{GenerationRequest, GenerationTarget},
};

/// Supplies the bearer token attached to every stream request.
///
/// Read at request time, never mutated by this crate.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, e.g. one obtained at login
#[derive(Debug, Clone)]
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the token from an environment variable on every request
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

/// Endpoint paths relative to the API base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Path for free-form task requests
    pub task_path: String,
    /// Path template for instance requests; `{instance_id}` is substituted
    pub instance_path: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            task_path: "/api/agents/generate/stream".to_string(),
            instance_path: "/api/content-instances/{instance_id}/generate".to_string(),
        }
    }
}

/// Anything that can open a frame stream for a generation request
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open the stream. Failures before any body byte is read are returned
    /// as `Err`; failures after that arrive as a single `Error` frame.
    async fn connect(&self, request: &GenerationRequest) -> Result<FrameStream>;
}

/// An ordered stream of frames read from one response body.
///
/// Ends at end of input, after a terminal frame, or once cancelled. A read
/// failure is reported as exactly one `Error` frame.
pub struct FrameStream {
    inner: Pin<Box<dyn Stream<Item = StreamFrame> + Send>>,
    cancel: CancellationToken,
}

impl FrameStream {
    /// Decode frames from a byte stream with a fresh cancellation token
    pub fn new<S, B, E>(bytes: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        Self::from_bytes(bytes, CancellationToken::new())
    }

    /// Decode frames from a byte stream, stopping when `cancel` fires
    pub fn from_bytes<S, B, E>(bytes: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let token = cancel.clone();
        let inner = stream! {
            let mut bytes = Box::pin(bytes);
            let mut decoder = FrameDecoder::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!("Frame stream cancelled, closing transport");
                        return;
                    }
                    next = bytes.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        if token.is_cancelled() {
                            return;
                        }
                        for frame in decoder.push(chunk.as_ref()) {
                            yield frame;
                        }
                        if decoder.is_closed() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Generation stream read failed: {}", e);
                        yield StreamFrame::Error {
                            message: Error::Read(e.to_string()).to_string(),
                        };
                        return;
                    }
                    None => {
                        if decoder.pending() > 0 {
                            tracing::debug!("Flushing {} trailing bytes at end of stream", decoder.pending());
                        }
                        for frame in decoder.finish() {
                            yield frame;
                        }
                        return;
                    }
                }
            }
        };

        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// Build a stream that yields the given frames, for tests and replays
    pub fn from_frames(frames: Vec<StreamFrame>) -> Self {
        let bytes: Vec<std::result::Result<String, std::convert::Infallible>> =
            frames.iter().map(|f| Ok(f.to_sse_line())).collect();
        Self::new(futures::stream::iter(bytes))
    }

    /// Token that stops this stream
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop reading; no frame is yielded afterwards
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for FrameStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamFrame>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.inner.as_mut().poll_next(cx)
    }
}

/// HTTP client for the generation endpoints
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    endpoints: Endpoints,
    credentials: Arc<dyn CredentialProvider>,
}

impl StreamClient {
    /// Create a client for an API base URL (e.g. `https://cms.example.org`)
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints: Endpoints::default(),
            credentials,
        }
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots, ...)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Override the endpoint paths
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Full URL a request is sent to
    pub fn url_for(&self, request: &GenerationRequest) -> String {
        match &request.target {
            GenerationTarget::Instance { instance_id, .. } => format!(
                "{}{}",
                self.base_url,
                self.endpoints
                    .instance_path
                    .replace("{instance_id}", &urlencoding::encode(instance_id))
            ),
            GenerationTarget::Task { .. } => {
                format!("{}{}", self.base_url, self.endpoints.task_path)
            }
        }
    }

    /// Build the HTTP request for a generation request
    pub fn build_request(&self, request: &GenerationRequest) -> Result<reqwest::RequestBuilder> {
        let url = self.url_for(request);
        tracing::debug!("Generation stream URL: {}", url);

        let mut builder = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");

        match self.credentials.bearer_token() {
            Some(token) => builder = builder.bearer_auth(token),
            None => tracing::debug!("No bearer token available, sending unauthenticated request"),
        }

        builder = match &request.target {
            GenerationTarget::Task { .. } => {
                let body = request.task_body().ok_or_else(|| {
                    Error::InvalidRequest("task request body could not be encoded".to_string())
                })?;
                builder.json(&body)
            }
            GenerationTarget::Instance { instance_id, .. } => {
                if instance_id.is_empty() {
                    return Err(Error::InvalidRequest("instance id is empty".to_string()));
                }
                builder.query(&request.instance_query())
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl FrameSource for StreamClient {
    async fn connect(&self, request: &GenerationRequest) -> Result<FrameStream> {
        let response = self.build_request(request)?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), &body));
        }

        tracing::debug!(
            "Generation stream opened for field '{}' ({})",
            request.field_name(),
            status
        );
        Ok(FrameStream::new(response.bytes_stream()))
    }
}
