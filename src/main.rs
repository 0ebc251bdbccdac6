//! CLI entry point for the latency map dashboard.
//!
//! Provides subcommands for watching a measurement server live, taking a
//! one-off snapshot, listing the configured servers, and running the TCP
//! probe that produces results payloads.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use latency_map::aggregate::MissingDelayPolicy;
use latency_map::dashboard::Dashboard;
use latency_map::fetch::{BasicClient, HttpClient};
use latency_map::map::ChoroplethMap;
use latency_map::output::{append_snapshot, to_json};
use latency_map::probe::{LatestResults, PingSettings, run_probe, serve};
use latency_map::registry::ServerRegistry;
use latency_map::runtime::{self, RunOptions};
use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "latency_map")]
#[command(about = "Per-province network latency dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// JSON file with a server list, replacing the built-in one
    #[arg(long)]
    servers: Option<String>,

    /// Index of the server to start on
    #[arg(short, long, default_value_t = 0)]
    server: usize,

    /// Leave missing delays out of province means instead of counting them as 0
    #[arg(long, default_value_t = false)]
    exclude_missing: bool,

    /// Terminal width used to lay out the map
    #[arg(short, long, default_value_t = 80)]
    width: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the selected server and redraw on every update
    Watch {
        #[command(flatten)]
        source: SourceArgs,

        /// Seconds between automatic refreshes
        #[arg(short = 'r', long, default_value_t = 90, value_parser = clap::value_parser!(u64).range(1..))]
        refresh_secs: u64,

        /// Number of fetch cycles to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        /// Optional: CSV file to append per-province means to
        #[arg(long)]
        record: Option<String>,
    },
    /// Fetch once, print the dashboard, and exit
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,

        /// Print the aggregation as JSON instead of the dashboard
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Optional: CSV file to append per-province means to
        #[arg(long)]
        record: Option<String>,
    },
    /// List the configured servers
    Servers {
        /// JSON file with a server list, replacing the built-in one
        #[arg(long)]
        servers: Option<String>,
    },
    /// Run the TCP probe, write a results file and optionally serve it
    Probe {
        /// Path or URL of the nested target config
        #[arg(short, long)]
        config: String,

        /// Results file to (re)write after every round
        #[arg(short, long, default_value = "result.json")]
        output: String,

        /// Seconds between probe rounds
        #[arg(short, long, default_value_t = 120)]
        interval: u64,

        /// Number of rounds to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        rounds: usize,

        /// Optional: address to serve the latest round on, e.g. 0.0.0.0:5000
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/latency_map.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("latency_map.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            source,
            refresh_secs,
            cycles,
            record,
        } => {
            let dashboard = build_dashboard(&source)?;
            let client: Arc<dyn HttpClient> = Arc::new(BasicClient::new()?);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let options = RunOptions {
                refresh: Duration::from_secs(refresh_secs),
                cycles,
                record,
            };

            runtime::run(dashboard, client, stdin, std::io::stdout(), options).await?;
        }
        Commands::Snapshot {
            source,
            json,
            record,
        } => {
            let dashboard = build_dashboard(&source)?;
            let client = BasicClient::new()?;
            let dashboard = runtime::run_once(dashboard, &client).await?;

            if json {
                println!("{}", to_json(dashboard.data())?);
            } else {
                println!("{}", dashboard.render());
            }

            if let (Some(path), Some(server)) = (record, dashboard.registry().current()) {
                append_snapshot(&path, &server.name, chrono::Utc::now(), dashboard.data())?;
            }
        }
        Commands::Servers { servers } => {
            let registry = load_registry(servers.as_deref())?;
            info!(total = registry.servers().len(), "Server list loaded");

            for (index, server) in registry.servers().iter().enumerate() {
                info!(index, name = %server.name, url = %server.url, "Server");
            }
        }
        Commands::Probe {
            config,
            output,
            interval,
            rounds,
            listen,
        } => {
            let latest = LatestResults::default();
            let server = match listen {
                Some(addr) => {
                    let listener = tokio::net::TcpListener::bind(addr).await?;
                    Some(tokio::spawn(serve(listener, latest.clone())))
                }
                None => None,
            };

            run_probe(
                &config,
                Path::new(&output),
                Duration::from_secs(interval),
                rounds,
                PingSettings::default(),
                server.is_some().then(|| latest.clone()),
            )
            .await?;

            // Keep answering with the last round once probing is done.
            if let Some(server) = server {
                server.await??;
            }
        }
    }

    Ok(())
}

fn load_registry(servers: Option<&str>) -> Result<ServerRegistry> {
    match servers {
        Some(path) => ServerRegistry::load(path),
        None => Ok(ServerRegistry::builtin()),
    }
}

/// Builds a dashboard on the chosen server list and starting server.
fn build_dashboard(source: &SourceArgs) -> Result<Dashboard> {
    let mut registry = load_registry(source.servers.as_deref())?;
    if !registry.is_empty() {
        registry.select(source.server)?;
    }

    let policy = if source.exclude_missing {
        MissingDelayPolicy::Exclude
    } else {
        MissingDelayPolicy::ZeroFill
    };

    Ok(Dashboard::new(
        registry,
        ChoroplethMap::china(source.width),
        policy,
    ))
}
