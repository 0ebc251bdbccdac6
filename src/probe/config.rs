use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use tracing::{info, warn};

const REMOTE_ATTEMPTS: u32 = 3;
const REMOTE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// One measurement target from the probe config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub province: String,
    pub city: String,
    pub operator: String,
    pub host: String,
    pub port: u16,
}

/// Probe targets, flattened from the nested config file:
///
/// ```json
/// {
///   "北京": { "北京": { "电信": { "ip": "1.2.3.4", "port": 80 } } }
/// }
/// ```
///
/// Targets without a host or port are skipped with a warning.
#[derive(Debug, Clone, Default)]
pub struct ProbeConfig {
    targets: Vec<Target>,
}

impl ProbeConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let root: Map<String, Value> =
            serde_json::from_slice(bytes).context("probe config must be a JSON object")?;
        let mut targets = Vec::new();

        for (province, cities) in &root {
            for (city, operators) in objects(cities, province) {
                for (operator, target) in objects(operators, city) {
                    let label = format!("{province}-{city}-{operator}");
                    let host = target.get("ip").and_then(Value::as_str);
                    let port = target
                        .get("port")
                        .and_then(Value::as_u64)
                        .and_then(|p| u16::try_from(p).ok());

                    match (host, port) {
                        (Some(host), Some(port)) => targets.push(Target {
                            province: province.clone(),
                            city: city.clone(),
                            operator: operator.clone(),
                            host: host.to_string(),
                            port,
                        }),
                        (None, _) => warn!(target = %label, "Missing ip, skipping"),
                        (_, None) => warn!(target = %label, "Missing or invalid port, skipping"),
                    }
                }
            }
        }

        Ok(Self { targets })
    }

    /// Loads the config from a local path or an `http(s)` URL. Remote
    /// loads are retried a few times before giving up.
    pub async fn load(source: &str) -> Result<Self> {
        if !source.starts_with("http") {
            let bytes = tokio::fs::read(source)
                .await
                .with_context(|| format!("reading probe config '{source}'"))?;
            return Self::from_json(&bytes);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut last_error = anyhow!("no attempt made");
        for attempt in 1..=REMOTE_ATTEMPTS {
            match fetch_remote(&client, source).await {
                Ok(bytes) => {
                    info!(source, "Loaded remote probe config");
                    return Self::from_json(&bytes);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Remote probe config fetch failed");
                    last_error = e;
                }
            }
            if attempt < REMOTE_ATTEMPTS {
                tokio::time::sleep(REMOTE_RETRY_DELAY).await;
            }
        }
        Err(last_error.context(format!("loading probe config from {source}")))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
}

async fn fetch_remote(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("config server returned status {}", response.status()));
    }
    Ok(response.bytes().await?.to_vec())
}

/// Entries of `value` if it is an object; anything else is skipped.
fn objects<'a>(
    value: &'a Value,
    parent: &str,
) -> impl Iterator<Item = (&'a String, &'a Value)> + use<'a> {
    let map = value.as_object();
    if map.is_none() {
        warn!(parent, "Expected an object in probe config, skipping");
    }
    map.into_iter().flatten()
}
