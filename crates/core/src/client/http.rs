//! Shared HTTP plumbing for the delivery and management clients.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{ApiError, ApiErrorKind, RequestInfo};

/// Connection settings for one API host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub host: String,
    pub port: Option<u16>,
    /// Use plain `http` instead of `https`.
    pub insecure: bool,
    /// `(host, port)` of an HTTP proxy.
    pub proxy: Option<(String, u16)>,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            insecure: false,
            proxy: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// `scheme://host[:port]` without a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        let host = self.host.trim_end_matches('/');
        match self.port {
            Some(port) => format!("{}://{}:{}", scheme, host, port),
            None => format!("{}://{}", scheme, host),
        }
    }

    pub(crate) fn build_http(
        &self,
        accept: &'static str,
    ) -> Result<reqwest::Client, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("space-sync/", env!("CARGO_PKG_VERSION"))),
        );
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout);
        if let Some((host, port)) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(format!("http://{}:{}", host, port))?);
        }
        builder.build()
    }
}

/// Send a request and map transport failures to [`ApiError`].
pub(crate) async fn send(
    request: RequestInfo,
    builder: reqwest::RequestBuilder,
) -> Result<(RequestInfo, reqwest::Response), ApiError> {
    debug!(method = %request.method, uri = %request.uri, "sending request");
    match builder.send().await {
        Ok(resp) => Ok((request, resp)),
        Err(e) => Err(ApiError::new(request, ApiErrorKind::Transport(e.to_string()))),
    }
}

/// Map a non-success response to an [`ApiError`]; pass successes through.
pub(crate) async fn check_response(
    request: RequestInfo,
    resp: reqwest::Response,
) -> Result<(RequestInfo, reqwest::Response), ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok((request, resp));
    }
    let code = status.as_u16();
    let retry_after = resp
        .headers()
        .get("x-contentful-ratelimit-reset")
        .or_else(|| resp.headers().get("retry-after"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    let kind = match code {
        401 | 403 => ApiErrorKind::Unauthorized(code),
        404 => ApiErrorKind::NotFound,
        409 => ApiErrorKind::VersionConflict,
        422 => ApiErrorKind::Validation(body),
        429 => ApiErrorKind::RateLimited { retry_after },
        500..=599 => ApiErrorKind::Server { status: code, body },
        _ => ApiErrorKind::Http { status: code, body },
    };
    Err(ApiError::new(request, kind))
}

/// Send, check, and decode a JSON response body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestInfo,
    builder: reqwest::RequestBuilder,
) -> Result<T, ApiError> {
    let (request, resp) = send(request, builder).await?;
    let (request, resp) = check_response(request, resp).await?;
    match resp.json::<T>().await {
        Ok(value) => Ok(value),
        Err(e) => Err(ApiError::new(request, ApiErrorKind::Parse(e.to_string()))),
    }
}

/// Send and check, discarding the body.
pub(crate) async fn send_empty(
    request: RequestInfo,
    builder: reqwest::RequestBuilder,
) -> Result<(), ApiError> {
    let (request, resp) = send(request, builder).await?;
    check_response(request, resp).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let mut settings = ClientSettings::new("api.example.com/");
        assert_eq!(settings.base_url(), "https://api.example.com");
        settings.insecure = true;
        settings.port = Some(8080);
        assert_eq!(settings.base_url(), "http://api.example.com:8080");
    }

    #[test]
    fn test_build_http_with_proxy() {
        let mut settings = ClientSettings::new("cdn.example.com");
        settings.proxy = Some(("proxy.local".into(), 3128));
        assert!(settings.build_http("application/json").is_ok());
    }
}
