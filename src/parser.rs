//! JSON parser for `/get_results` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One probe target's measurement.
///
/// Fields other than `average_delay` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RecordShape")]
pub struct RawRecord {
    pub average_delay: Option<f64>,
}

impl RawRecord {
    pub fn new(average_delay: Option<f64>) -> Self {
        Self { average_delay }
    }
}

/// Older servers publish the bare delay instead of an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordShape {
    Object {
        #[serde(default)]
        average_delay: Option<f64>,
    },
    Bare(Option<f64>),
}

impl From<RecordShape> for RawRecord {
    fn from(shape: RecordShape) -> Self {
        match shape {
            RecordShape::Object { average_delay } | RecordShape::Bare(average_delay) => {
                RawRecord { average_delay }
            }
        }
    }
}

/// A full results payload in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResults {
    entries: Vec<(String, RawRecord)>,
}

impl RawResults {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawRecord)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, RawRecord)> for RawResults {
    fn from_iter<I: IntoIterator<Item = (K, RawRecord)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Decodes a results payload, keeping the object's key order.
///
/// # Errors
///
/// Returns an error if the body is not a JSON object or if any value is
/// neither a record object nor a bare number/null.
pub fn parse_results(bytes: &[u8]) -> serde_json::Result<RawResults> {
    let object: Map<String, Value> = serde_json::from_slice(bytes)?;
    object
        .into_iter()
        .map(|(key, value)| Ok((key, serde_json::from_value::<RawRecord>(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_object() {
        let results = parse_results(b"{}").unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        assert!(parse_results(&[0xFF, 0xFE, 0x00]).is_err());
        assert!(parse_results(b"[1, 2]").is_err());
    }

    #[test]
    fn test_parse_keeps_document_order() {
        let body = br#"{
            "Zhejiang-Hangzhou (CT)": {"average_delay": 31.5, "ip": "1.2.3.4"},
            "Anhui-Hefei (CU)": {"average_delay": null},
            "Beijing-Beijing (CM)": {}
        }"#;
        let results = parse_results(body).unwrap();
        let keys: Vec<_> = results.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            ["Zhejiang-Hangzhou (CT)", "Anhui-Hefei (CU)", "Beijing-Beijing (CM)"]
        );

        let delays: Vec<_> = results.iter().map(|(_, r)| r.average_delay).collect();
        assert_eq!(delays, [Some(31.5), None, None]);
    }

    #[test]
    fn test_parse_bare_delay_values() {
        let results = parse_results(br#"{"Beijing-CT": 12.0, "Beijing-CU": null}"#).unwrap();
        let delays: Vec<_> = results.iter().map(|(_, r)| r.average_delay).collect();
        assert_eq!(delays, [Some(12.0), None]);
    }

    #[test]
    fn test_parse_rejects_string_delay() {
        assert!(parse_results(br#"{"Beijing-CT": {"average_delay": "fast"}}"#).is_err());
    }
}
