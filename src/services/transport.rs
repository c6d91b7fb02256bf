use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method, StatusCode, Url,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outbound request description handed to the request transform and then to a [`Transport`].
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Status line and declared length of an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// `-1` when the server did not declare a length.
    pub expected_content_length: i64,
}

impl ResponseHead {
    pub const UNKNOWN_LENGTH: i64 = -1;

    pub fn new(status: StatusCode, content_length: Option<u64>) -> Self {
        let expected_content_length = content_length
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(Self::UNKNOWN_LENGTH);
        Self {
            status,
            expected_content_length,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("Request cancelled")]
    Cancelled,
}

/// Whatever the transport managed to observe. Any combination of the three may be present.
#[derive(Debug, Default)]
pub struct TransportReply {
    pub body: Option<Bytes>,
    pub head: Option<ResponseHead>,
    pub error: Option<TransportError>,
}

impl TransportReply {
    pub fn completed(head: ResponseHead, body: Bytes) -> Self {
        Self {
            body: Some(body),
            head: Some(head),
            error: None,
        }
    }

    pub fn failed(error: impl Into<TransportError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one exchange. `cancel` is a best-effort request to stop early;
    /// implementations may finish the exchange anyway.
    async fn send(&self, request: OutboundRequest, cancel: CancellationToken) -> TransportReply;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn exchange(&self, request: OutboundRequest) -> TransportReply {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return TransportReply::failed(e),
        };
        let head = ResponseHead::new(response.status(), response.content_length());
        match response.bytes().await {
            Ok(body) => TransportReply::completed(head, body),
            Err(e) => TransportReply {
                head: Some(head),
                ..TransportReply::failed(e)
            },
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest, cancel: CancellationToken) -> TransportReply {
        let url = request.url.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%url, "Transport exchange abandoned");
                TransportReply::failed(TransportError::Cancelled)
            }
            reply = self.exchange(request) => reply,
        }
    }
}
