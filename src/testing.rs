//! Scripted [`HttpClient`] for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Request, Response};

use crate::fetch::HttpClient;

pub(crate) struct ScriptedClient {
    status: u16,
    body: &'static str,
    delay: Duration,
    requested: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(crate) fn status(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            delay: Duration::ZERO,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ok(body: &'static str) -> Self {
        Self::status(200, body)
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.requested.lock().unwrap().push(req.url().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let resp = http::Response::builder()
            .status(self.status)
            .body(self.body)
            .unwrap();
        Ok(Response::from(resp))
    }
}
