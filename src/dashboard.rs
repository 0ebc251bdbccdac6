//! Application state and its transitions.
//!
//! [`Dashboard`] owns every piece of UI state. Inputs arrive through named
//! methods; anything that needs the runtime (network, timers) comes back as
//! an [`Effect`] for the event loop in [`crate::runtime`] to carry out.
//!
//! Each fetch cycle is tagged with a generation. Only the completion of the
//! newest cycle is applied; older ones are dropped so a slow response can
//! never overwrite fresher state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregation, MissingDelayPolicy, aggregate};
use crate::chrome::{Chrome, LOADING_GRACE, LoadingIndicator};
use crate::fetch::FetchError;
use crate::map::{ChoroplethMap, ProvinceClick};
use crate::panel::{DetailPanel, Selection};
use crate::parser::RawResults;
use crate::registry::ServerRegistry;

/// Work the event loop performs on the dashboard's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch { generation: u64, url: String },
    HideLoadingAfter { generation: u64, delay: Duration },
    Quit,
}

/// What became of a settled fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Updated(Effect),
    Failed(Effect),
    /// A newer cycle has started since; nothing changed.
    Stale,
}

/// A user command read from the terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Click(String),
    SwitchServer(usize),
    ToggleInfo,
    HideServers,
    ShowServers,
    Resize(usize),
    Filter(f64, f64),
    Refresh,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match verb {
            "click" if !rest.is_empty() => Command::Click(rest.to_string()),
            "server" => Command::SwitchServer(
                rest.parse()
                    .with_context(|| format!("invalid server index '{rest}'"))?,
            ),
            "info" => Command::ToggleInfo,
            "hide-servers" => Command::HideServers,
            "show-servers" => Command::ShowServers,
            "resize" => Command::Resize(
                rest.parse()
                    .with_context(|| format!("invalid width '{rest}'"))?,
            ),
            "filter" => {
                let (lo, hi) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("usage: filter <lo> <hi>"))?;
                Command::Filter(lo.trim().parse()?, hi.trim().parse()?)
            }
            "refresh" => Command::Refresh,
            "quit" | "exit" => Command::Quit,
            _ => bail!("unknown command '{line}'"),
        };
        Ok(command)
    }
}

pub struct Dashboard {
    registry: ServerRegistry,
    map: ChoroplethMap,
    panel: DetailPanel,
    chrome: Chrome,
    policy: MissingDelayPolicy,
    data: Aggregation,
    generation: u64,
}

impl fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("registry", &self.registry)
            .field("panel", &self.panel)
            .field("chrome", &self.chrome)
            .field("policy", &self.policy)
            .field("data", &self.data)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Dashboard {
    pub fn new(
        registry: ServerRegistry,
        mut map: ChoroplethMap,
        policy: MissingDelayPolicy,
    ) -> Self {
        map.on_click(Box::new(|region| ProvinceClick(region.to_string())));
        Self {
            registry,
            map,
            panel: DetailPanel::default(),
            chrome: Chrome::default(),
            policy,
            data: Aggregation::default(),
            generation: 0,
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn map(&self) -> &ChoroplethMap {
        &self.map
    }

    pub fn chrome(&self) -> &Chrome {
        &self.chrome
    }

    pub fn selection(&self) -> &Selection {
        self.panel.selection()
    }

    /// The last successfully fetched aggregation.
    pub fn data(&self) -> &Aggregation {
        &self.data
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a fetch cycle against the current server. With no servers
    /// configured this is a no-op.
    pub fn begin_fetch(&mut self) -> Option<Effect> {
        let url = self.registry.current()?.url.clone();
        self.generation += 1;
        self.chrome.loading = LoadingIndicator::Loading;
        debug!(generation = self.generation, url = %url, "Fetch cycle started");
        Some(Effect::Fetch {
            generation: self.generation,
            url,
        })
    }

    pub fn switch_server(&mut self, index: usize) -> Result<Option<Effect>> {
        let server = self.registry.select(index)?;
        info!(server = %server.name, "Switched server");
        Ok(self.begin_fetch())
    }

    /// Applies the outcome of cycle `generation`.
    ///
    /// On failure the previously rendered data stays as it was.
    pub fn complete_fetch(
        &mut self,
        generation: u64,
        result: Result<RawResults, FetchError>,
        now: DateTime<Local>,
    ) -> Settled {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "Discarding stale fetch result"
            );
            return Settled::Stale;
        }

        let hide = Effect::HideLoadingAfter {
            generation,
            delay: LOADING_GRACE,
        };

        match result {
            Ok(raw) => {
                self.data = aggregate(&raw, self.policy);
                self.map.set_data(self.data.map_data.clone());
                self.chrome.mark_updated(now);
                self.chrome.loading = LoadingIndicator::Done;
                info!(
                    records = raw.len(),
                    provinces = self.data.map_data.len(),
                    "Results updated"
                );
                Settled::Updated(hide)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Fetch failed, keeping previous data");
                self.chrome.loading =
                    LoadingIndicator::Failed(format!("load failed ({}), retry later", e.kind()));
                Settled::Failed(hide)
            }
        }
    }

    /// Ends the grace period of cycle `generation`, unless a newer cycle
    /// owns the indicator by now.
    pub fn hide_loading(&mut self, generation: u64) {
        if generation == self.generation {
            self.chrome.loading = LoadingIndicator::Hidden;
        }
    }

    /// Routes a region click through the map's handler to the panel.
    pub fn click_region(&mut self, region: &str) {
        let Some(ProvinceClick(province)) = self.map.click(region) else {
            return;
        };
        let selection = self.panel.click(&province, &self.data.detail);
        if selection.selected().is_some() && self.chrome.info.is_collapsed() {
            self.chrome.info.expand();
        }
    }

    pub fn handle(&mut self, command: Command) -> Result<Vec<Effect>> {
        let effects = match command {
            Command::Click(region) => {
                self.click_region(&region);
                vec![]
            }
            Command::SwitchServer(index) => self.switch_server(index)?.into_iter().collect(),
            Command::ToggleInfo => {
                self.chrome.info.toggle();
                vec![]
            }
            Command::HideServers => {
                self.chrome.servers.collapse();
                vec![]
            }
            Command::ShowServers => {
                self.chrome.servers.expand();
                vec![]
            }
            Command::Resize(width) => {
                self.map.resize(width);
                vec![]
            }
            Command::Filter(lo, hi) => {
                self.map.set_filter(lo, hi)?;
                vec![]
            }
            Command::Refresh => self.begin_fetch().into_iter().collect(),
            Command::Quit => vec![Effect::Quit],
        };
        Ok(effects)
    }

    /// The whole screen, ready to be written out.
    pub fn render(&self) -> DashboardView<'_> {
        DashboardView { dashboard: self }
    }
}

/// Text rendering of a [`Dashboard`].
pub struct DashboardView<'a> {
    dashboard: &'a Dashboard,
}

impl fmt::Display for DashboardView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.dashboard;
        writeln!(
            f,
            "last update {} | generation {}",
            d.chrome.update_time(),
            d.generation
        )?;
        if let Some(text) = d.chrome.loading.text() {
            writeln!(f, "[{text}]")?;
        }

        if d.chrome.servers.is_collapsed() {
            writeln!(f, "servers (hidden)")?;
        } else {
            writeln!(f, "servers:\n{}", d.registry.render())?;
        }

        write!(f, "\n{}", d.map.render())?;

        let view = d.panel.render(&d.data.detail);
        writeln!(f, "\n{} {}", d.chrome.info.icon(), view.title)?;
        if !d.chrome.info.is_collapsed() {
            write!(f, "{view}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{RawRecord, parse_results};
    use crate::registry::Server;

    fn dashboard() -> Dashboard {
        let registry = ServerRegistry::new(vec![
            Server::new("one", "https://one.example"),
            Server::new("two", "https://two.example"),
        ]);
        let map = ChoroplethMap::new(["Beijing", "Shanghai"], 60);
        Dashboard::new(registry, map, MissingDelayPolicy::ZeroFill)
    }

    fn payload(body: &str) -> RawResults {
        parse_results(body.as_bytes()).unwrap()
    }

    fn sample() -> RawResults {
        payload(
            r#"{"Beijing-CT": {"average_delay": 50}, "Beijing-CU": {"average_delay": 150},
                "Shanghai-CT": {"average_delay": null}}"#,
        )
    }

    fn loaded() -> Dashboard {
        let mut d = dashboard();
        let Some(Effect::Fetch { generation, .. }) = d.begin_fetch() else {
            panic!("expected a fetch");
        };
        d.complete_fetch(generation, Ok(sample()), Local::now());
        d
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "click 北京".parse::<Command>().unwrap(),
            Command::Click("北京".to_string())
        );
        assert_eq!(
            "server 1".parse::<Command>().unwrap(),
            Command::SwitchServer(1)
        );
        assert_eq!(
            " filter 10 200 ".parse::<Command>().unwrap(),
            Command::Filter(10.0, 200.0)
        );
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
        assert!("server x".parse::<Command>().is_err());
        assert!("click".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn test_empty_registry_never_fetches() {
        let mut d = Dashboard::new(
            ServerRegistry::new(vec![]),
            ChoroplethMap::china(80),
            MissingDelayPolicy::ZeroFill,
        );
        assert_eq!(d.begin_fetch(), None);
        assert_eq!(d.handle(Command::Refresh).unwrap(), vec![]);
        assert_eq!(d.generation(), 0);
    }

    #[test]
    fn test_begin_fetch_targets_current_server() {
        let mut d = dashboard();
        assert_eq!(
            d.begin_fetch(),
            Some(Effect::Fetch {
                generation: 1,
                url: "https://one.example".to_string()
            })
        );
        assert_eq!(d.chrome().loading, LoadingIndicator::Loading);
    }

    #[test]
    fn test_switch_server_starts_new_cycle() {
        let mut d = dashboard();
        d.begin_fetch();
        let effects = d.handle(Command::SwitchServer(1)).unwrap();
        assert_eq!(
            effects,
            vec![Effect::Fetch {
                generation: 2,
                url: "https://two.example".to_string()
            }]
        );
        assert!(d.registry().render().contains("* [1] two"));
    }

    #[test]
    fn test_switch_to_unknown_server_fails() {
        let mut d = dashboard();
        assert!(d.handle(Command::SwitchServer(9)).is_err());
        assert_eq!(d.generation(), 0);
    }

    #[test]
    fn test_successful_fetch_updates_map_and_timestamp() {
        let d = loaded();
        let values: Vec<_> = d
            .map()
            .data()
            .iter()
            .map(|m| (m.name.as_str(), m.value))
            .collect();
        assert_eq!(values, [("Beijing", Some(100.0)), ("Shanghai", Some(0.0))]);
        assert!(d.chrome().last_updated().is_some());
        assert_eq!(d.chrome().loading, LoadingIndicator::Done);
    }

    #[test]
    fn test_successful_fetch_hides_loading_after_grace() {
        let mut d = dashboard();
        let Some(Effect::Fetch { generation, .. }) = d.begin_fetch() else {
            panic!("expected a fetch");
        };
        assert_eq!(
            d.complete_fetch(generation, Ok(sample()), Local::now()),
            Settled::Updated(Effect::HideLoadingAfter {
                generation,
                delay: LOADING_GRACE
            })
        );
        assert_eq!(LOADING_GRACE, Duration::from_secs(2));
    }

    #[test]
    fn test_failed_fetch_keeps_previous_data() {
        let mut d = loaded();
        let before = d.data().clone();
        let stamp = d.chrome().last_updated();

        let Some(Effect::Fetch { generation, .. }) = d.begin_fetch() else {
            panic!("expected a fetch");
        };
        let settled = d.complete_fetch(
            generation,
            Err(FetchError::Timeout(Duration::from_secs(10))),
            Local::now(),
        );

        assert_eq!(
            settled,
            Settled::Failed(Effect::HideLoadingAfter {
                generation,
                delay: LOADING_GRACE
            })
        );
        assert_eq!(d.data(), &before);
        assert_eq!(d.chrome().last_updated(), stamp);
        assert!(matches!(d.chrome().loading, LoadingIndicator::Failed(_)));
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let mut d = dashboard();
        d.begin_fetch();
        d.handle(Command::SwitchServer(1)).unwrap();

        let late: RawResults = [("Tibet-CT", RawRecord::new(Some(999.0)))]
            .into_iter()
            .collect();
        assert_eq!(d.complete_fetch(1, Ok(late), Local::now()), Settled::Stale);
        assert!(d.data().map_data.is_empty());
        assert_eq!(d.chrome().loading, LoadingIndicator::Loading);
    }

    #[test]
    fn test_hide_loading_ignores_older_cycles() {
        let mut d = dashboard();
        d.begin_fetch();
        d.complete_fetch(1, Ok(sample()), Local::now());
        d.begin_fetch();

        d.hide_loading(1);
        assert_eq!(d.chrome().loading, LoadingIndicator::Loading);

        d.complete_fetch(2, Ok(sample()), Local::now());
        d.hide_loading(2);
        assert_eq!(d.chrome().loading, LoadingIndicator::Hidden);
    }

    #[test]
    fn test_click_selects_and_expands_info_panel() {
        let mut d = loaded();
        d.handle(Command::ToggleInfo).unwrap();
        assert!(d.chrome().info.is_collapsed());

        d.click_region("Beijing");
        assert_eq!(
            d.selection(),
            &Selection::ProvinceSelected("Beijing".to_string())
        );
        assert!(!d.chrome().info.is_collapsed());

        d.click_region("Beijing");
        assert_eq!(d.selection(), &Selection::AllProvinces);
    }

    #[test]
    fn test_refresh_keeps_selection() {
        let mut d = loaded();
        d.click_region("Beijing");

        let Some(Effect::Fetch { generation, .. }) = d.begin_fetch() else {
            panic!("expected a fetch");
        };
        d.complete_fetch(
            generation,
            Ok(payload(r#"{"Shanghai-CT": {"average_delay": 10}}"#)),
            Local::now(),
        );

        assert_eq!(d.selection().selected(), Some("Beijing"));
        assert!(d.render().to_string().contains("Beijing detail"));
    }

    #[test]
    fn test_resize_keeps_data_and_selection() {
        let mut d = loaded();
        d.click_region("Shanghai");
        d.handle(Command::Resize(120)).unwrap();

        assert_eq!(d.map().width(), 120);
        assert_eq!(d.map().data().len(), 2);
        assert_eq!(d.selection().selected(), Some("Shanghai"));
        assert_eq!(d.map().handler_count(), 1);
    }

    #[test]
    fn test_render_respects_collapsed_panels() {
        let mut d = loaded();
        let text = d.render().to_string();
        assert!(text.contains("* [0] one"));
        assert!(text.contains("  CU: 150 ms [medium]"));

        d.handle(Command::HideServers).unwrap();
        d.handle(Command::ToggleInfo).unwrap();
        let text = d.render().to_string();
        assert!(text.contains("servers (hidden)"));
        assert!(text.contains("▼ Nationwide detail"));
        assert!(!text.contains("CU: 150 ms"));
    }

    #[test]
    fn test_quit_command() {
        let mut d = dashboard();
        assert_eq!(d.handle(Command::Quit).unwrap(), vec![Effect::Quit]);
    }
}
