//! The network exchange the executor builds on.
//!
//! [`Transport`] performs exactly one HTTP exchange per call. Retries,
//! backoff and error classification live in the executor, so implementations
//! should report what happened and nothing more.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Method, Url};
use tokio::sync::mpsc::Sender;

use crate::Progress;

/// A fully built request, reused unchanged for every attempt of an execution.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Limit for this single exchange.
    pub timeout: Duration,
}

/// Response of one exchange. An absent body is represented as empty.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 2xx and 3xx responses go to the command's mapper.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Failure before any response arrived.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Receives intermediate progress for one attempt.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    sender: Sender<Progress>,
    attempt: u32,
}

impl ProgressSink {
    pub(crate) fn new(sender: Sender<Progress>, attempt: u32) -> Self {
        Self { sender, attempt }
    }

    /// Reports bytes received so far. Never waits: the value is dropped when
    /// the caller's buffer is full or nobody listens any more.
    pub fn report(&self, transferred: u64, expected: Option<u64>) {
        let _ = self.sender.try_send(Progress {
            attempt: self.attempt,
            transferred,
            expected,
        });
    }
}

/// Performs a single network exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(
        &self,
        request: &HttpRequest,
        progress: Option<&ProgressSink>,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(
        &self,
        request: &HttpRequest,
        progress: Option<&ProgressSink>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let expected = response.content_length();

        let mut body = Vec::with_capacity(expected.unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if let Some(sink) = progress {
                sink.report(body.len() as u64, expected);
            }
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
