//! Choropleth map of per-province latency.
//!
//! The map owns its region set, the latest [`MapDatum`] values, a fixed
//! colour scale with an adjustable legend filter, and at most one click
//! handler. Rendering lays each region out as a labelled bar sized to the
//! current viewport width.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, bail};

use crate::aggregate::MapDatum;

/// Provincial-level divisions as named by the payload producers.
pub static CHINA_REGIONS: &[&str] = &[
    "北京", "天津", "上海", "重庆", "河北", "山西", "辽宁", "吉林", "黑龙江", "江苏", "浙江",
    "安徽", "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "海南", "四川", "贵州",
    "云南", "陕西", "甘肃", "青海", "台湾", "内蒙古", "广西", "西藏", "宁夏", "新疆", "香港",
    "澳门",
];

/// Linear colour ramp between evenly spaced hex stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
    pub stops: [[u8; 3]; 3],
}

/// 0–300 ms, green through yellow to red.
pub const LATENCY_SCALE: ColorScale = ColorScale {
    min: 0.0,
    max: 300.0,
    stops: [[0x31, 0xc2, 0x7c], [0xff, 0xeb, 0x3b], [0xf4, 0x43, 0x36]],
};

impl ColorScale {
    /// Position of `value` on the scale in `[0, 1]`, clamped at the ends.
    pub fn position(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn color_for(&self, value: f64) -> String {
        let segments = (self.stops.len() - 1) as f64;
        let scaled = self.position(value) * segments;
        let lower = (scaled.floor() as usize).min(self.stops.len() - 2);
        let t = scaled - lower as f64;

        let [r, g, b] = std::array::from_fn(|i| {
            let from = self.stops[lower][i] as f64;
            let to = self.stops[lower + 1][i] as f64;
            (from + (to - from) * t).round() as u8
        });
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

/// The sub-range of the scale currently shown; values outside are dimmed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegendFilter {
    pub lo: f64,
    pub hi: f64,
}

impl LegendFilter {
    pub fn full(scale: &ColorScale) -> Self {
        Self {
            lo: scale.min,
            hi: scale.max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }
}

/// A click on a map region, forwarded to the detail panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvinceClick(pub String);

pub type ClickHandler = Box<dyn Fn(&str) -> ProvinceClick + Send + Sync>;

/// Display state of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionView {
    pub name: String,
    pub value: Option<f64>,
    pub color: Option<String>,
    pub filtered_out: bool,
}

impl RegionView {
    pub fn tooltip(&self) -> String {
        match self.value {
            Some(v) => format!("{}: {v:.2} ms", self.name),
            None => format!("{}: no data", self.name),
        }
    }
}

/// A rendered frame of the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapView {
    pub regions: Vec<RegionView>,
    pub legend: LegendFilter,
    pub scale: ColorScale,
    pub width: usize,
}

const LABEL_COLUMNS: usize = 8;
const VALUE_COLUMNS: usize = 12;
const MIN_WIDTH: usize = LABEL_COLUMNS + VALUE_COLUMNS + 4;

pub struct ChoroplethMap {
    regions: Vec<String>,
    data: Vec<MapDatum>,
    scale: ColorScale,
    filter: LegendFilter,
    width: usize,
    click_handler: Option<ClickHandler>,
}

impl ChoroplethMap {
    pub fn new(regions: impl IntoIterator<Item = impl Into<String>>, width: usize) -> Self {
        Self {
            regions: regions.into_iter().map(Into::into).collect(),
            data: Vec::new(),
            scale: LATENCY_SCALE,
            filter: LegendFilter::full(&LATENCY_SCALE),
            width: width.max(MIN_WIDTH),
            click_handler: None,
        }
    }

    pub fn china(width: usize) -> Self {
        Self::new(CHINA_REGIONS.iter().copied(), width)
    }

    /// Replaces the displayed values wholesale.
    pub fn set_data(&mut self, data: Vec<MapDatum>) {
        self.data = data;
    }

    pub fn data(&self) -> &[MapDatum] {
        &self.data
    }

    /// Registers the click handler, replacing any previous one.
    pub fn on_click(&mut self, handler: ClickHandler) {
        self.off_click();
        self.click_handler = Some(handler);
    }

    pub fn off_click(&mut self) {
        self.click_handler = None;
    }

    pub fn handler_count(&self) -> usize {
        usize::from(self.click_handler.is_some())
    }

    /// Dispatches a click on `region` to the registered handler, if any.
    pub fn click(&self, region: &str) -> Option<ProvinceClick> {
        self.click_handler.as_ref().map(|handler| handler(region))
    }

    /// Narrows the legend to `[lo, hi]`, clamped to the scale.
    pub fn set_filter(&mut self, lo: f64, hi: f64) -> Result<()> {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            bail!("legend filter lower bound {lo} exceeds upper bound {hi}");
        }
        self.filter = LegendFilter {
            lo: lo.max(self.scale.min),
            hi: hi.min(self.scale.max),
        };
        Ok(())
    }

    pub fn filter(&self) -> LegendFilter {
        self.filter
    }

    /// Re-lays out for a new viewport width; data and handler are kept.
    pub fn resize(&mut self, width: usize) {
        self.width = width.max(MIN_WIDTH);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Known regions first, in map order, then any regions only the data
    /// mentions, in data order.
    pub fn render(&self) -> MapView {
        let values: HashMap<&str, Option<f64>> = self
            .data
            .iter()
            .map(|d| (d.name.as_str(), d.value))
            .collect();

        let extra = self
            .data
            .iter()
            .map(|d| d.name.as_str())
            .filter(|name| !self.regions.iter().any(|r| r.as_str() == *name));

        let regions = self
            .regions
            .iter()
            .map(String::as_str)
            .chain(extra)
            .map(|name| {
                let value = values.get(name).copied().flatten();
                RegionView {
                    name: name.to_string(),
                    value,
                    color: value.map(|v| self.scale.color_for(v)),
                    filtered_out: value.is_some_and(|v| !self.filter.contains(v)),
                }
            })
            .collect();

        MapView {
            regions,
            legend: self.filter,
            scale: self.scale,
            width: self.width,
        }
    }
}

impl MapView {
    fn bar_columns(&self) -> usize {
        self.width - LABEL_COLUMNS - VALUE_COLUMNS - 2
    }
}

impl fmt::Display for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "legend {:.0}–{:.0} ms (scale {:.0}–{:.0})",
            self.legend.lo, self.legend.hi, self.scale.min, self.scale.max
        )?;
        let columns = self.bar_columns();
        for region in &self.regions {
            let label = pad(&region.name, LABEL_COLUMNS);
            match (region.value, region.filtered_out) {
                (None, _) => writeln!(
                    f,
                    "{label} {:>width$}",
                    "no data",
                    width = columns + 1 + VALUE_COLUMNS
                )?,
                (Some(v), true) => writeln!(
                    f,
                    "{label} {:columns$} {:>VALUE_COLUMNS$}",
                    "",
                    format!("({v:.2} ms)")
                )?,
                (Some(v), false) => {
                    let filled = (self.scale.position(v) * columns as f64).round() as usize;
                    let bar = "█".repeat(filled.max(1));
                    let color = region.color.as_deref().unwrap_or("");
                    writeln!(
                        f,
                        "{label} {bar}{:fill$} {:>VALUE_COLUMNS$} {color}",
                        "",
                        format!("{v:.2} ms"),
                        fill = columns.saturating_sub(filled.max(1)),
                    )?
                }
            }
        }
        Ok(())
    }
}

/// Pads by character count; wide glyphs count as two columns.
fn pad(label: &str, columns: usize) -> String {
    let used: usize = label.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum();
    format!("{label}{}", " ".repeat(columns.saturating_sub(used)))
}
