use super::rewrite::PreparedRequest;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

/// The response shape handed back to the host.
#[derive(Debug)]
pub struct HostResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub streaming: bool,
    /// Endpoint label the winning (or last) attempt hit; empty for
    /// passthrough calls.
    pub endpoint: String,
    inner: reqwest::Response,
}

impl HostResponse {
    pub fn from_upstream(streaming: bool, endpoint: impl Into<String>, inner: reqwest::Response) -> Self {
        Self {
            status: inner.status(),
            headers: inner.headers().clone(),
            streaming,
            endpoint: endpoint.into(),
            inner,
        }
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.inner.text().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, reqwest::Error> {
        self.inner.json().await
    }

    /// The raw upstream response, for streaming bodies.
    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }
}

/// Converts upstream bodies back to the shape the host expects.
///
/// The wire shape is the host's business; the engine only promises to call
/// this exactly once per returned response.
pub trait ResponseTransformer: Send + Sync {
    fn transform(&self, prepared: &PreparedRequest, response: reqwest::Response) -> HostResponse;
}

/// Default transformer: streamed and non-streamed bodies pass through
/// untouched.
#[derive(Debug, Default)]
pub struct PassthroughTransformer;

impl ResponseTransformer for PassthroughTransformer {
    fn transform(&self, prepared: &PreparedRequest, response: reqwest::Response) -> HostResponse {
        HostResponse::from_upstream(prepared.streaming, prepared.endpoint.clone(), response)
    }
}
