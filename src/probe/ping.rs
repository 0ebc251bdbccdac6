use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::debug;

/// TCP connect timing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSettings {
    pub attempts: u32,
    pub connect_timeout: Duration,
    /// Samples slower than this are dropped.
    pub max_delay: Duration,
    /// Pause between attempts.
    pub pause: Duration,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            connect_timeout: Duration::from_secs(1),
            max_delay: Duration::from_millis(500),
            pause: Duration::from_secs(1),
        }
    }
}

/// Mean TCP connect time to `addr` in milliseconds, rounded to two
/// decimals. `None` when no attempt produced a usable sample.
pub async fn tcp_ping(addr: SocketAddr, settings: PingSettings) -> Option<f64> {
    let mut samples = Vec::with_capacity(settings.attempts as usize);

    for attempt in 1..=settings.attempts {
        let started = Instant::now();
        match timeout(settings.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                let elapsed = started.elapsed();
                if elapsed <= settings.max_delay {
                    samples.push(elapsed.as_secs_f64() * 1000.0);
                } else {
                    debug!(
                        %addr,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Sample over limit, dropped"
                    );
                }
            }
            Ok(Err(e)) => debug!(%addr, attempt, error = %e, "TCP connect failed"),
            Err(_) => debug!(%addr, attempt, "TCP connect timed out"),
        }

        if attempt < settings.attempts && !settings.pause.is_zero() {
            tokio::time::sleep(settings.pause).await;
        }
    }

    if samples.is_empty() {
        return None;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}

/// Resolves `host` to an address, preferring IPv4. Literal addresses are
/// returned as-is.
pub async fn resolve(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
        }
        Err(e) => {
            debug!(host, error = %e, "DNS resolution failed");
            None
        }
    }
}
