//! Event loop driving a [`Dashboard`].
//!
//! All state lives in the loop's task. Fetches and grace timers run as
//! spawned tasks that report back over a channel, so the dashboard is only
//! ever touched from one place.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::chrome::REFRESH_INTERVAL;
use crate::dashboard::{Command, Dashboard, Effect, Settled};
use crate::fetch::{FetchError, HttpClient, fetch_results};
use crate::output::append_snapshot;
use crate::parser::RawResults;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub refresh: Duration,
    /// Stop after this many settled cycles (0 = run forever).
    pub cycles: usize,
    /// CSV file that receives every applied update.
    pub record: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            refresh: REFRESH_INTERVAL,
            cycles: 0,
            record: None,
        }
    }
}

enum Event {
    Fetched {
        generation: u64,
        result: Result<RawResults, FetchError>,
    },
    HideLoading {
        generation: u64,
    },
}

/// Runs until `quit`, or until `options.cycles` cycles have settled.
///
/// Commands are read line by line from `input`; when it reaches EOF the
/// dashboard keeps refreshing on its timer. Frames are written to `out`.
pub async fn run<R, W>(
    mut dashboard: Dashboard,
    client: Arc<dyn HttpClient>,
    input: R,
    mut out: W,
    options: RunOptions,
) -> Result<Dashboard>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if options.refresh.is_zero() {
        bail!("refresh interval must be greater than zero");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut lines = input.lines();
    let mut input_open = true;
    let mut settled = 0usize;

    let mut ticker = tokio::time::interval_at(Instant::now() + options.refresh, options.refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if dashboard.registry().is_empty() {
        warn!("No servers configured, nothing will be fetched");
    }
    let initial: Vec<Effect> = dashboard.begin_fetch().into_iter().collect();
    if apply(&initial, &client, &tx) {
        return Ok(dashboard);
    }
    draw(&dashboard, &mut out)?;

    loop {
        let effects = tokio::select! {
            _ = ticker.tick() => dashboard.begin_fetch().into_iter().collect(),
            Some(event) = rx.recv() => match event {
                Event::Fetched { generation, result } => {
                    match dashboard.complete_fetch(generation, result, Local::now()) {
                        Settled::Updated(hide) => {
                            settled += 1;
                            record(&dashboard, options.record.as_deref());
                            vec![hide]
                        }
                        Settled::Failed(hide) => {
                            settled += 1;
                            vec![hide]
                        }
                        Settled::Stale => vec![],
                    }
                }
                Event::HideLoading { generation } => {
                    dashboard.hide_loading(generation);
                    vec![]
                }
            },
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => vec![],
                Ok(Some(line)) => match line.parse::<Command>().and_then(|c| dashboard.handle(c)) {
                    Ok(effects) => effects,
                    Err(e) => {
                        warn!(error = %e, "Command rejected");
                        vec![]
                    }
                },
                Ok(None) => {
                    input_open = false;
                    vec![]
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %e, "Skipping unreadable input line");
                    vec![]
                }
                Err(e) => {
                    warn!(error = %e, "Input failed, commands disabled");
                    input_open = false;
                    vec![]
                }
            },
        };

        if apply(&effects, &client, &tx) {
            info!("Quit requested");
            break;
        }
        draw(&dashboard, &mut out)?;

        if options.cycles > 0 && settled >= options.cycles {
            info!(cycles = settled, "Cycle limit reached");
            break;
        }
    }

    Ok(dashboard)
}

/// Runs a single fetch cycle without timers or input. With no servers the
/// dashboard comes back untouched.
pub async fn run_once(mut dashboard: Dashboard, client: &dyn HttpClient) -> Result<Dashboard> {
    let Some(Effect::Fetch { generation, url }) = dashboard.begin_fetch() else {
        warn!("No servers configured, nothing fetched");
        return Ok(dashboard);
    };
    let raw = fetch_results(client, &url)
        .await
        .with_context(|| format!("fetching results from {url}"))?;
    dashboard.complete_fetch(generation, Ok(raw), Local::now());
    dashboard.hide_loading(generation);
    Ok(dashboard)
}

/// Spawns the work behind `effects`; returns `true` on quit.
fn apply(
    effects: &[Effect],
    client: &Arc<dyn HttpClient>,
    tx: &mpsc::UnboundedSender<Event>,
) -> bool {
    let mut quit = false;
    for effect in effects {
        match effect {
            Effect::Fetch { generation, url } => {
                let client = Arc::clone(client);
                let tx = tx.clone();
                let (generation, url) = (*generation, url.clone());
                tokio::spawn(async move {
                    let result = fetch_results(client.as_ref(), &url).await;
                    let _ = tx.send(Event::Fetched { generation, result });
                });
            }
            Effect::HideLoadingAfter { generation, delay } => {
                let tx = tx.clone();
                let (generation, delay) = (*generation, *delay);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::HideLoading { generation });
                });
            }
            Effect::Quit => quit = true,
        }
    }
    quit
}

fn record(dashboard: &Dashboard, path: Option<&str>) {
    let (Some(path), Some(server)) = (path, dashboard.registry().current()) else {
        return;
    };
    if let Err(e) = append_snapshot(path, &server.name, Utc::now(), dashboard.data()) {
        error!(path, error = %e, "Failed to record snapshot");
    }
}

fn draw<W: Write>(dashboard: &Dashboard, out: &mut W) -> Result<()> {
    writeln!(out, "{}", dashboard.render())?;
    out.flush()?;
    Ok(())
}
