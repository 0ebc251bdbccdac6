//! Drill-down detail panel and its selection state machine.

use std::fmt;

use crate::aggregate::{DetailEntry, ProvinceDetail};

/// Which provinces the panel shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    AllProvinces,
    ProvinceSelected(String),
}

impl Selection {
    /// Next state after a click on `province`.
    ///
    /// Clicking the selected province again deselects it. Clicking a
    /// province with detail data selects it. Anything else resets.
    pub fn after_click(&self, province: &str, detail: &ProvinceDetail) -> Selection {
        match self {
            Selection::ProvinceSelected(current) if current == province => {
                Selection::AllProvinces
            }
            _ if detail.contains(province) => Selection::ProvinceSelected(province.to_string()),
            _ => Selection::AllProvinces,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        match self {
            Selection::AllProvinces => None,
            Selection::ProvinceSelected(p) => Some(p),
        }
    }
}

/// Display severity of a latency value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyBand {
    Good,
    Medium,
    High,
}

impl LatencyBand {
    pub fn classify(latency: f64) -> Self {
        if latency < 100.0 {
            LatencyBand::Good
        } else if latency < 200.0 {
            LatencyBand::Medium
        } else {
            LatencyBand::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyBand::Good => "good",
            LatencyBand::Medium => "medium",
            LatencyBand::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryView {
    pub name: String,
    pub latency: Option<f64>,
    pub band: Option<LatencyBand>,
}

impl EntryView {
    fn from_entry(entry: &DetailEntry) -> Self {
        Self {
            name: entry.name.clone().unwrap_or_else(|| "-".to_string()),
            latency: entry.average_delay,
            band: entry.average_delay.map(LatencyBand::classify),
        }
    }

    fn latency_text(&self) -> String {
        match (self.latency, self.band) {
            (Some(v), Some(band)) => format!("{v} ms [{}]", band.as_str()),
            _ => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelBody {
    /// Every province under its own heading.
    Grouped(Vec<(String, Vec<EntryView>)>),
    /// One province's entries without a heading.
    Flat(Vec<EntryView>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub title: String,
    pub body: PanelBody,
}

/// The info panel's selection plus its rendering.
#[derive(Debug, Default)]
pub struct DetailPanel {
    selection: Selection,
}

impl DetailPanel {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Applies a province click and returns the new selection.
    pub fn click(&mut self, province: &str, detail: &ProvinceDetail) -> &Selection {
        self.selection = self.selection.after_click(province, detail);
        &self.selection
    }

    /// Renders against `detail`. A selected province missing from `detail`
    /// renders an empty body and stays selected.
    pub fn render(&self, detail: &ProvinceDetail) -> PanelView {
        match &self.selection {
            Selection::AllProvinces => PanelView {
                title: "Nationwide detail".to_string(),
                body: PanelBody::Grouped(
                    detail
                        .iter()
                        .map(|(province, entries)| {
                            (
                                province.to_string(),
                                entries.iter().map(EntryView::from_entry).collect(),
                            )
                        })
                        .collect(),
                ),
            },
            Selection::ProvinceSelected(province) => PanelView {
                title: format!("{province} detail"),
                body: PanelBody::Flat(
                    detail
                        .get(province)
                        .unwrap_or_default()
                        .iter()
                        .map(EntryView::from_entry)
                        .collect(),
                ),
            },
        }
    }
}

impl fmt::Display for PanelView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.title)?;
        match &self.body {
            PanelBody::Grouped(groups) => {
                for (province, entries) in groups {
                    writeln!(f, "{province}")?;
                    for entry in entries {
                        writeln!(f, "  {}: {}", entry.name, entry.latency_text())?;
                    }
                }
            }
            PanelBody::Flat(entries) => {
                for entry in entries {
                    writeln!(f, "{}: {}", entry.name, entry.latency_text())?;
                }
            }
        }
        Ok(())
    }
}
