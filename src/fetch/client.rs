use async_trait::async_trait;
use reqwest::{Request, Response};
use std::time::Duration;

/// Transport seam for result fetches; tests substitute scripted clients.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// A plain `reqwest` client.
///
/// Only the connect phase is bounded here; the overall deadline belongs to
/// [`fetch_results`](super::fetch_results).
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> reqwest::Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("latency_map/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self(inner))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}
