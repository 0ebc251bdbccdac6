//! HTTP endpoint exposing the latest probe round.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Results of the most recent round, shared between the prober and the server.
pub type LatestResults = Arc<RwLock<Map<String, Value>>>;

pub fn router(latest: LatestResults) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/get_results", get(get_results))
        .layer(CorsLayer::permissive())
        .with_state(latest)
}

/// Serves [`router`] on `listener` until the process exits.
pub async fn serve(listener: TcpListener, latest: LatestResults) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Serving probe results");
    axum::serve(listener, router(latest)).await?;
    Ok(())
}

async fn index() -> &'static str {
    "Probe server is running. Use /get_results to fetch data."
}

async fn get_results(State(latest): State<LatestResults>) -> Response {
    let latest = latest.read().await;
    if latest.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No results available yet." })),
        )
            .into_response();
    }

    (
        [(header::CACHE_CONTROL, "public, max-age=60")],
        Json(Value::Object(latest.clone())),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{BasicClient, FetchError, fetch_results};

    async fn spawn_server(latest: LatestResults) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, latest));
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_get_results_before_first_round_is_not_found() {
        let base = spawn_server(LatestResults::default()).await;

        let response = reqwest::get(format!("{base}/get_results")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(body, json!({ "error": "No results available yet." }));

        let client = BasicClient::new().unwrap();
        let err = fetch_results(&client, &base).await.unwrap_err();
        assert!(matches!(err, FetchError::Http(s) if s.as_u16() == 404));
    }

    #[tokio::test]
    async fn test_get_results_serves_latest_round() {
        let latest = LatestResults::default();
        let base = spawn_server(latest.clone()).await;

        {
            let mut guard = latest.write().await;
            guard.insert("浙江-杭州 (电信)".into(), json!({ "average_delay": 31.25 }));
            guard.insert("北京-北京 (移动)".into(), json!({ "average_delay": null }));
        }

        let response = reqwest::get(format!("{base}/get_results")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CACHE_CONTROL],
            "public, max-age=60"
        );

        let client = BasicClient::new().unwrap();
        let raw = fetch_results(&client, &base).await.unwrap();
        let keys: Vec<_> = raw.iter().map(|(k, r)| (k.to_string(), r.average_delay)).collect();
        assert_eq!(
            keys,
            [
                ("浙江-杭州 (电信)".to_string(), Some(31.25)),
                ("北京-北京 (移动)".to_string(), None),
            ]
        );
    }
}
