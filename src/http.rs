//! HTTP transport used by the configuration fetchers.
use std::time::Duration;

use reqwest::{
    header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{Error, Result};

/// HTTP method of a [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Used for flag configuration and bandits.
    Get,
    /// Used for precomputed assignments.
    Post,
}

/// A request issued by a configuration fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// Path appended to `base_url`.
    pub resource_path: String,
    /// Query string parameters, in order.
    pub query_params: Vec<(String, String)>,
    /// HTTP method.
    pub method: HttpMethod,
    /// JSON body for `POST` requests.
    pub body: Option<Vec<u8>>,
    /// `ETag` of the last successful response. Sent as `If-None-Match`.
    pub last_version_id: Option<String>,
}

impl HttpRequest {
    /// Full request URL with query parameters.
    pub fn url(&self) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{}", self.base_url, self.resource_path),
            &self.query_params,
        )
        .map_err(Error::InvalidBaseUrl)
    }
}

/// Raw response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `ETag` header, if present.
    pub etag: Option<String>,
    /// Response body. Empty for `304 Not Modified`.
    pub body: Vec<u8>,
}

/// Executes HTTP requests. Implementations must be safe to call from background threads.
///
/// The default implementation is [`ReqwestHttpClient`]; tests and hosts with their own networking
/// stack can provide a different one.
pub trait HttpClient: Send + Sync {
    /// Send `request` and wait for the response. Non-success statuses are not errors.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Classified response from the server.
#[derive(Debug)]
pub(crate) enum ResponseOutcome {
    NotModified,
    Modified { body: Vec<u8>, etag: Option<String> },
}

/// Map a raw response onto the outcomes fetchers care about.
pub(crate) fn interpret(response: HttpResponse) -> Result<ResponseOutcome> {
    match StatusCode::from_u16(response.status) {
        Ok(StatusCode::NOT_MODIFIED) => Ok(ResponseOutcome::NotModified),
        Ok(status) if status.is_success() => Ok(ResponseOutcome::Modified {
            body: response.body,
            etag: response.etag,
        }),
        Ok(StatusCode::UNAUTHORIZED) => Err(Error::Unauthorized),
        _ => Err(Error::UnexpectedStatus(response.status)),
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`HttpClient`] backed by `reqwest`'s blocking client.
pub struct ReqwestHttpClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    /// Build a client with connect and request timeouts.
    pub fn new() -> Result<ReqwestHttpClient> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ReqwestHttpClient { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = request.url()?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.clone().unwrap_or_default()),
        };
        if let Some(etag) = &request.last_version_id {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        let response = builder.send()?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse { status, etag, body })
    }
}
