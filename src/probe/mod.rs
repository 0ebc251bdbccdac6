//! TCP-ping probe that produces `/get_results` payloads.
//!
//! Targets come from a nested [`ProbeConfig`]; each is resolved and pinged
//! concurrently, and the results are written as a flat JSON object keyed
//! `"<province>-<city> (<operator>)"`. A dashboard server entry can point
//! at the written file, or at the [`serve`] endpoint.

mod config;
mod ping;
mod serve;

pub use config::{ProbeConfig, Target};
pub use ping::{PingSettings, resolve, tcp_ping};
pub use serve::{LatestResults, router, serve};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, warn};

use crate::parser::RawRecord;

/// Upper bound on concurrent pings.
pub const MAX_CONCURRENCY: usize = 50;

/// Result key for a target, as the dashboard expects it.
pub fn result_key(target: &Target) -> String {
    format!("{}-{} ({})", target.province, target.city, target.operator)
}

/// Pings every target of `config` and returns results in config order.
/// Targets whose host cannot be resolved are left out.
#[tracing::instrument(skip_all, fields(targets = config.targets().len()))]
pub async fn probe_all(config: &ProbeConfig, settings: PingSettings) -> Vec<(String, RawRecord)> {
    let targets = config.targets();
    if targets.is_empty() {
        warn!("No targets configured, skipping round");
        return Vec::new();
    }

    let workers = targets.len().min(MAX_CONCURRENCY);
    info!(workers, "Pinging targets");
    let semaphore = Arc::new(Semaphore::new(workers));

    let tasks: Vec<_> = targets
        .iter()
        .cloned()
        .map(|target| {
            let sem = semaphore.clone();
            let span = tracing::info_span!("ping", key = %result_key(&target));
            tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok()?;
                    let Some(ip) = resolve(&target.host).await else {
                        warn!(host = %target.host, "Failed to resolve, skipping");
                        return None;
                    };
                    let delay = tcp_ping(SocketAddr::new(ip, target.port), settings).await;
                    match delay {
                        Some(ms) => info!(%ip, delay_ms = ms, "Ping result"),
                        None => info!(%ip, "Ping result: N/A"),
                    }
                    Some((result_key(&target), RawRecord::new(delay)))
                }
                .instrument(span),
            )
        })
        .collect();

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(Some(entry)) => results.push(entry),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Ping task failed"),
        }
    }
    results
}

/// Results as the `/get_results` payload object.
pub fn results_object(results: &[(String, RawRecord)]) -> Map<String, Value> {
    results
        .iter()
        .map(|(key, record)| (key.clone(), json!({ "average_delay": record.average_delay })))
        .collect()
}

/// Writes results as a JSON object, replacing `path` atomically.
pub fn write_results(path: &Path, results: &[(String, RawRecord)]) -> Result<()> {
    let object = results_object(results);

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    std::fs::write(tmp, serde_json::to_vec_pretty(&object)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(tmp, path).with_context(|| format!("replacing {}", path.display()))?;

    info!(path = %path.display(), entries = results.len(), "Saved probe results");
    Ok(())
}

/// Loads the config and probes every `interval`, `rounds` times
/// (0 = forever). A failed round is logged and retried next interval.
/// Each completed round also replaces `latest`, when given.
pub async fn run_probe(
    config_source: &str,
    output: &Path,
    interval: Duration,
    rounds: usize,
    settings: PingSettings,
    latest: Option<LatestResults>,
) -> Result<()> {
    let mut round = 0;

    loop {
        if rounds > 0 && round >= rounds {
            break;
        }
        round += 1;

        let round_span = tracing::info_span!("probe_round", round);
        async {
            match ProbeConfig::load(config_source).await {
                Ok(config) => {
                    let results = probe_all(&config, settings).await;
                    if let Some(latest) = &latest {
                        *latest.write().await = results_object(&results);
                    }
                    if let Err(e) = write_results(output, &results) {
                        error!(error = %e, "Failed to save probe results");
                    }
                }
                Err(e) => warn!(error = %e, "No valid probe config, skipping round"),
            }
        }
        .instrument(round_span)
        .await;

        if rounds == 0 || round < rounds {
            info!(interval_secs = interval.as_secs(), "Waiting before next round");
            tokio::time::sleep(interval).await;
        }
    }

    info!(rounds = round, "Probe finished");
    Ok(())
}
