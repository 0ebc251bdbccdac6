//! Results fetching with a fixed deadline.
//!
//! A fetch either yields a parsed [`RawResults`] or one of four
//! [`FetchError`] kinds. The request races a timer; when the timer wins the
//! request future is dropped and its eventual response never surfaces.

mod client;

pub use client::{BasicClient, HttpClient};

use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::parser::{RawResults, parse_results};

/// How long a single fetch may take, body included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const RESULTS_PATH: &str = "get_results";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(StatusCode),
    #[error("network error: {0}")]
    Network(#[source] BoxError),
    #[error("malformed results payload: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FetchError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Http(_) => "http",
            FetchError::Network(_) => "network",
            FetchError::Parse(_) => "parse",
        }
    }

    fn network(err: impl Into<BoxError>) -> Self {
        FetchError::Network(err.into())
    }
}

/// Builds `<base>/get_results`, tolerating a trailing slash on the base.
pub fn results_url(base_url: &str) -> String {
    format!("{}/{RESULTS_PATH}", base_url.trim_end_matches('/'))
}

/// Fetches and parses the results of `server_url` within [`FETCH_TIMEOUT`].
///
/// `server_url` is an `http(s)` base URL or a local results file path.
pub async fn fetch_results<C: HttpClient + ?Sized>(
    client: &C,
    server_url: &str,
) -> Result<RawResults, FetchError> {
    fetch_results_within(client, server_url, FETCH_TIMEOUT).await
}

#[tracing::instrument(skip(client), fields(source = %server_url))]
pub async fn fetch_results_within<C: HttpClient + ?Sized>(
    client: &C,
    server_url: &str,
    limit: Duration,
) -> Result<RawResults, FetchError> {
    let bytes = match tokio::time::timeout(limit, fetch_body(client, server_url)).await {
        Ok(body) => body?,
        Err(_) => return Err(FetchError::Timeout(limit)),
    };
    debug!(bytes = bytes.len(), "Results body received, parsing");
    Ok(parse_results(&bytes)?)
}

async fn fetch_body<C: HttpClient + ?Sized>(
    client: &C,
    server_url: &str,
) -> Result<Vec<u8>, FetchError> {
    if !server_url.starts_with("http") {
        return tokio::fs::read(server_url).await.map_err(FetchError::network);
    }

    let url: Url = results_url(server_url).parse().map_err(FetchError::network)?;
    let resp = client
        .execute(reqwest::Request::new(Method::GET, url))
        .await
        .map_err(FetchError::network)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Http(status));
    }

    let body = resp.bytes().await.map_err(FetchError::network)?;
    Ok(body.to_vec())
}
