//! Stream byte transport.
//!
//! The seam between the download orchestration and the network: given a URL,
//! an optional resume offset and the session credentials, produce a byte
//! stream plus what the server told us about range support.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode, header};

use bili_client::Credentials;
use bili_client::client::{DEFAULT_UA, WEB_REFERER};

use crate::error::FetchError;

pub struct FetchRequest<'a> {
    pub url: &'a str,
    /// Resume offset; `None` or 0 fetches from the start.
    pub range_start: Option<u64>,
    pub credentials: Option<&'a Credentials>,
}

pub struct FetchResponse {
    pub stream: BoxStream<'static, Result<Bytes, FetchError>>,
    /// Whether the server honors byte ranges for this resource.
    pub resumable: bool,
    /// Offset the server actually granted (0 on a full restart).
    pub resumed_from: u64,
    /// Total resource length when known, including the skipped prefix.
    pub total_len: Option<u64>,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError>;
}

/// Real transport: plain GETs against the CDN with the platform's header
/// discipline (UA + Referer, Cookie only when credentials are present).
pub struct HttpTransport {
    client: Client,
    referer: String,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            referer: WEB_REFERER.to_string(),
        }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let mut builder = self
            .client
            .get(request.url)
            .header(header::USER_AGENT, DEFAULT_UA)
            .header(header::REFERER, &self.referer);

        if let Some(credentials) = request.credentials {
            builder = builder.header(header::COOKIE, credentials.cookie_header());
        }

        let wanted_offset = request.range_start.unwrap_or(0);
        if wanted_offset > 0 {
            builder = builder.header(header::RANGE, format!("bytes={wanted_offset}-"));
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AuthRejected { status });
        }
        if !status.is_success() {
            return Err(FetchError::http_status(status, request.url));
        }

        // 206 means the range was honored; a 200 with Accept-Ranges means a
        // future retry may resume even though this response starts at zero.
        let resumed_from = if status == StatusCode::PARTIAL_CONTENT {
            wanted_offset
        } else {
            0
        };
        let resumable = status == StatusCode::PARTIAL_CONTENT
            || response
                .headers()
                .get(header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let total_len = response.content_length().map(|len| len + resumed_from);

        let stream = response
            .bytes_stream()
            .map_err(FetchError::from)
            .boxed();

        Ok(FetchResponse {
            stream,
            resumable,
            resumed_from,
            total_len,
        })
    }
}
