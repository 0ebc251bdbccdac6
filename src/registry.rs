//! Measurement-server registry and the current-server selection.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// A named measurement server exposing `/get_results`.
///
/// `url` is either an `http(s)` base URL or a local path to a results
/// JSON file written by the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub url: String,
}

impl Server {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// The servers of the public deployment.
static DEFAULT_SERVERS: &[(&str, &str)] = &[
    (
        "ClawCloud HK CN-Opt",
        "https://clawcloud-hk-cnopt-tcpingmap.aunet.dpdns.org",
    ),
    (
        "ClawCloud JP INTL",
        "https://clawcloud-jp-intl-tcpingmap.aunet.dpdns.org",
    ),
    (
        "Sharon HK Premium",
        "https://hkg.pre.sharon.tcpingmap.aunet.dpdns.org",
    ),
    (
        "Sharon SG Premium",
        "https://sin.pre.sharon.tcpingmap.aunet.dpdns.org",
    ),
    (
        "Sharon JP Premium",
        "https://jpn.pre.sharon.tcpingmap.aunet.dpdns.org",
    ),
    (
        "Sharon KR Premium",
        "https://kor.pre.sharon.tcpingmap.aunet.dpdns.org",
    ),
];

/// Ordered server list plus the index of the selected entry.
///
/// The first server is selected on construction; an empty registry has no
/// selection and never yields a URL to fetch.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    servers: Vec<Server>,
    current: Option<usize>,
}

impl ServerRegistry {
    pub fn new(servers: Vec<Server>) -> Self {
        let current = if servers.is_empty() { None } else { Some(0) };
        Self { servers, current }
    }

    /// The compiled-in server list.
    pub fn builtin() -> Self {
        Self::new(
            DEFAULT_SERVERS
                .iter()
                .map(|(name, url)| Server::new(*name, *url))
                .collect(),
        )
    }

    /// Loads a server list from a JSON array of `{ "name", "url" }` objects.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading server list '{path}'"))?;
        let servers: Vec<Server> = serde_json::from_str(&content)
            .with_context(|| format!("parsing server list '{path}'"))?;
        Ok(Self::new(servers))
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn current(&self) -> Option<&Server> {
        self.current.and_then(|i| self.servers.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Makes `index` the current server. Out-of-range indices are rejected
    /// and leave the selection untouched.
    pub fn select(&mut self, index: usize) -> Result<&Server> {
        if index >= self.servers.len() {
            bail!(
                "no server at index {index} ({} configured)",
                self.servers.len()
            );
        }
        self.current = Some(index);
        Ok(&self.servers[index])
    }

    /// Renders the selector list, marking the active entry.
    pub fn render(&self) -> String {
        self.servers
            .iter()
            .enumerate()
            .map(|(i, server)| {
                let marker = if Some(i) == self.current { '*' } else { ' ' };
                format!("{marker} [{i}] {}", server.name)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
