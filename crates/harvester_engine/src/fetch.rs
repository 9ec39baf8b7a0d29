use std::time::Duration;

use futures_util::StreamExt;
use harvest_logging::harvest_debug;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Response;
use serde_json::Value;
use url::Url;

use crate::{FailureKind, FetchError, FetchResult, HarvestEvent, TransferProgress};

/// Bodies of failed responses are kept for diagnostics up to this many bytes.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Write granularity of streaming downloads.
    pub chunk_size: usize,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 64 * 1024 * 1024,
            chunk_size: 1024 * 1024,
            user_agent: format!("workflow-harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: HarvestEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: HarvestEvent) {}
}

/// One GET request. `auth` is sent as a bearer token when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub auth: Option<String>,
    pub streaming: bool,
    pub accept: Option<String>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            auth: None,
            streaming: false,
            accept: None,
        }
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.auth = token.map(str::to_owned);
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// Single network round trip per call; retries are the caller's business.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = build_client(&settings)?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Issue one GET and parse the body as JSON. No retry.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let url =
            Url::parse(url).map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let request = FetchRequest::get(url).accept("application/json");
        let result = self.fetch(&request, &crate::NoopProgressSink).await?;
        serde_json::from_slice(&result.bytes)
            .map_err(|err| FetchError::new(FailureKind::InvalidJson, err.to_string()))
    }

    pub(crate) async fn send(&self, request: &FetchRequest) -> Result<Response, FetchError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(token) = request.auth.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(accept) = request.accept.as_deref() {
            builder = builder.header(ACCEPT, accept);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.bytes().await.unwrap_or_default();
            let mut message = String::from_utf8_lossy(&body).into_owned();
            truncate_on_char_boundary(&mut message, ERROR_BODY_LIMIT);
            if message.is_empty() {
                message = status.to_string();
            }
            return Err(
                FetchError::new(FailureKind::HttpStatus(status.as_u16()), message)
                    .with_retry_after(retry_after),
            );
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(Some(content_len)));
            }
        }
        Ok(response)
    }

    fn too_large(&self, actual: Option<u64>) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual,
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, FetchError> {
        harvest_debug!("GET {}", request.url);
        let response = self.send(request).await?;

        let final_url = response.url().clone();
        let total = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let bytes = if request.streaming {
            let mut bytes = Vec::new();
            let mut stream = response.bytes_stream();
            sink.emit(progress(&final_url, 0, total));
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(map_reqwest_error)?;
                let next_len = bytes.len() as u64 + chunk.len() as u64;
                if next_len > self.settings.max_bytes {
                    return Err(self.too_large(Some(next_len)));
                }
                bytes.extend_from_slice(&chunk);
                sink.emit(progress(&final_url, next_len, total));
            }
            bytes
        } else {
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            if body.len() as u64 > self.settings.max_bytes {
                return Err(self.too_large(Some(body.len() as u64)));
            }
            body.to_vec()
        };

        let size_bytes = bytes.len() as u64;
        Ok(FetchResult {
            final_url,
            bytes,
            content_type,
            size_bytes,
        })
    }
}

pub(crate) fn progress(url: &Url, bytes_so_far: u64, total: Option<u64>) -> HarvestEvent {
    HarvestEvent::Transfer(TransferProgress {
        url: url.to_string(),
        bytes_so_far,
        total,
    })
}

fn build_client(settings: &FetchSettings) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
        .user_agent(settings.user_agent.clone())
        .build()
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate_on_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
