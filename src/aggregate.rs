//! Per-province grouping of raw probe results.
//!
//! One pass over the payload buckets every record by the province prefix of
//! its key, sums delays, and keeps the per-city entries in encounter order.
//! Each call produces a fresh [`Aggregation`]; nothing carries over between
//! fetch cycles.

use std::collections::HashMap;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::parser::RawResults;

/// A composite result key split into its province and city/operator parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeKey<'a> {
    pub province: &'a str,
    pub city_operator: Option<&'a str>,
}

impl<'a> ProbeKey<'a> {
    /// Splits on the first `-`. Everything after it, further dashes
    /// included, is the city/operator label. A key without a separator is
    /// taken whole as the province.
    pub fn parse(key: &'a str) -> Self {
        match key.split_once('-') {
            Some((province, city_operator)) => ProbeKey {
                province,
                city_operator: Some(city_operator),
            },
            None => ProbeKey {
                province: key,
                city_operator: None,
            },
        }
    }
}

/// How records without a delay take part in a province's mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDelayPolicy {
    /// A missing delay adds 0 to the sum and 1 to the count.
    #[default]
    ZeroFill,
    /// A missing delay is left out of both sum and count.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailEntry {
    pub name: Option<String>,
    pub average_delay: Option<f64>,
}

/// One region's value for the map. `None` means "no data", never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapDatum {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ProvinceAggregate {
    total_delay: f64,
    total_count: usize,
}

impl ProvinceAggregate {
    fn add(&mut self, delay: Option<f64>, policy: MissingDelayPolicy) {
        match (delay, policy) {
            (Some(d), _) => {
                self.total_delay += d;
                self.total_count += 1;
            }
            (None, MissingDelayPolicy::ZeroFill) => self.total_count += 1,
            (None, MissingDelayPolicy::Exclude) => {}
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.total_count == 0 {
            None
        } else {
            Some(self.total_delay / self.total_count as f64)
        }
    }
}

/// Province → detail entries, iterated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvinceDetail {
    order: Vec<String>,
    entries: HashMap<String, Vec<DetailEntry>>,
}

impl ProvinceDetail {
    fn push(&mut self, province: &str, entry: DetailEntry) {
        match self.entries.get_mut(province) {
            Some(list) => list.push(entry),
            None => {
                self.order.push(province.to_string());
                self.entries.insert(province.to_string(), vec![entry]);
            }
        }
    }

    pub fn get(&self, province: &str) -> Option<&[DetailEntry]> {
        self.entries.get(province).map(Vec::as_slice)
    }

    pub fn contains(&self, province: &str) -> bool {
        self.entries.contains_key(province)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DetailEntry])> {
        self.order
            .iter()
            .map(|p| (p.as_str(), self.entries[p].as_slice()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Serialize for ProvinceDetail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for (province, entries) in self.iter() {
            map.serialize_entry(province, entries)?;
        }
        map.end()
    }
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub map_data: Vec<MapDatum>,
    pub detail: ProvinceDetail,
}

/// Groups `raw` by province and computes each province's mean delay.
///
/// Provinces absent from `raw` do not appear in the output.
pub fn aggregate(raw: &RawResults, policy: MissingDelayPolicy) -> Aggregation {
    let mut totals: HashMap<&str, ProvinceAggregate> = HashMap::new();
    let mut detail = ProvinceDetail::default();

    for (key, record) in raw.iter() {
        let key = ProbeKey::parse(key);

        totals
            .entry(key.province)
            .or_default()
            .add(record.average_delay, policy);

        detail.push(
            key.province,
            DetailEntry {
                name: key.city_operator.map(str::to_string),
                average_delay: record.average_delay,
            },
        );
    }

    let map_data = detail
        .order
        .iter()
        .map(|province| MapDatum {
            name: province.clone(),
            value: totals[province.as_str()].mean(),
        })
        .collect();

    Aggregation { map_data, detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RawRecord;

    fn raw(entries: &[(&str, Option<f64>)]) -> RawResults {
        entries
            .iter()
            .map(|(k, d)| (*k, RawRecord::new(*d)))
            .collect()
    }

    #[test]
    fn test_parse_key_splits_on_first_dash() {
        let key = ProbeKey::parse("Guangdong-Shenzhen (CT)");
        assert_eq!(key.province, "Guangdong");
        assert_eq!(key.city_operator, Some("Shenzhen (CT)"));

        let key = ProbeKey::parse("Inner-Mongolia-Hohhot");
        assert_eq!(key.province, "Inner");
        assert_eq!(key.city_operator, Some("Mongolia-Hohhot"));
    }

    #[test]
    fn test_parse_key_without_separator() {
        let key = ProbeKey::parse("Tibet");
        assert_eq!(key.province, "Tibet");
        assert_eq!(key.city_operator, None);
    }

    #[test]
    fn test_bucket_counts_match_prefix_counts() {
        let payload = raw(&[
            ("A-1", Some(1.0)),
            ("B-1", Some(2.0)),
            ("A-2", None),
            ("C", Some(3.0)),
            ("A-3", Some(4.0)),
        ]);
        let agg = aggregate(&payload, MissingDelayPolicy::ZeroFill);

        let counts: Vec<_> = agg.detail.iter().map(|(p, e)| (p, e.len())).collect();
        assert_eq!(counts, [("A", 3), ("B", 1), ("C", 1)]);
        let total: usize = agg.detail.iter().map(|(_, e)| e.len()).sum();
        assert_eq!(total, payload.len());
    }

    #[test]
    fn test_null_counts_as_zero_in_mean() {
        let payload = raw(&[("P-a", Some(100.0)), ("P-b", None), ("P-c", Some(200.0))]);
        let agg = aggregate(&payload, MissingDelayPolicy::ZeroFill);
        assert_eq!(agg.map_data[0].value, Some(100.0));
    }

    #[test]
    fn test_exclude_policy_skips_missing_delays() {
        let payload = raw(&[("P-a", Some(100.0)), ("P-b", None), ("P-c", Some(200.0))]);
        let agg = aggregate(&payload, MissingDelayPolicy::Exclude);
        assert_eq!(agg.map_data[0].value, Some(150.0));
        assert_eq!(agg.detail.get("P").unwrap().len(), 3);
    }

    #[test]
    fn test_exclude_policy_all_missing_yields_no_data() {
        let payload = raw(&[("Q-a", None), ("Q-b", None)]);
        let agg = aggregate(&payload, MissingDelayPolicy::Exclude);
        assert_eq!(agg.map_data[0].value, None);
    }

    #[test]
    fn test_seen_province_never_null_under_zero_fill() {
        let payload = raw(&[("X-a", None), ("Y-a", Some(0.0)), ("Z", None)]);
        let agg = aggregate(&payload, MissingDelayPolicy::ZeroFill);
        assert!(agg.map_data.iter().all(|d| d.value == Some(0.0)));
    }

    #[test]
    fn test_empty_payload() {
        let agg = aggregate(&RawResults::default(), MissingDelayPolicy::ZeroFill);
        assert!(agg.map_data.is_empty());
        assert!(agg.detail.is_empty());
    }

    #[test]
    fn test_malformed_key_keeps_whole_province() {
        let agg = aggregate(&raw(&[("Tibet", Some(42.0))]), MissingDelayPolicy::ZeroFill);
        assert_eq!(
            agg.detail.get("Tibet").unwrap(),
            &[DetailEntry {
                name: None,
                average_delay: Some(42.0)
            }]
        );
    }

    #[test]
    fn test_detail_serializes_in_encounter_order() {
        let agg = aggregate(
            &raw(&[("Zhejiang-a", Some(1.0)), ("Anhui-b", Some(2.0))]),
            MissingDelayPolicy::ZeroFill,
        );
        let json = serde_json::to_string(&agg.detail).unwrap();
        assert_eq!(
            json,
            r#"{"Zhejiang":[{"name":"a","average_delay":1.0}],"Anhui":[{"name":"b","average_delay":2.0}]}"#
        );
    }
}
