//! Instrument configuration snapshots and the deployment sidecar mapping.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Instrument firmware version, compared major first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Firmware {
    pub major: u8,
    pub minor: u8,
}

impl Firmware {
    #[must_use]
    pub fn new(major: u8, minor: u8) -> Self {
        Firmware { major, minor }
    }

    /// Parse a version like `"3.40"` or `"51.41"`. Missing minor defaults to 0.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (major, minor) = match s.split_once('.') {
            Some((a, b)) => (a, b),
            None => (s, "0"),
        };
        Some(Firmware {
            major: major.trim().parse().ok()?,
            minor: minor.trim().parse().unwrap_or(0),
        })
    }
}

impl PartialOrd for Firmware {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Firmware {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Fixed, per-deployment instrument settings decoded from header records.
///
/// A snapshot is never modified once created. Header-like records that appear
/// later in a file produce a new snapshot through [Configuration::amend], so
/// anything holding an `Arc<Configuration>` sees a stable view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    values: Map<String, Value>,
}

impl Configuration {
    #[must_use]
    pub fn new() -> Self {
        Configuration::default()
    }

    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Configuration { values }
    }

    /// Return a new snapshot with `updates` merged over this one. Nested objects
    /// are merged recursively, everything else is replaced.
    #[must_use]
    pub fn amend(&self, updates: &Map<String, Value>) -> Configuration {
        let mut values = self.values.clone();
        merge(&mut values, updates);
        Configuration { values }
    }

    /// Like [Configuration::amend], but only allocates a new snapshot if
    /// something actually changes.
    #[must_use]
    pub fn amended(self: &Arc<Self>, updates: &Map<String, Value>) -> Arc<Configuration> {
        let next = self.amend(updates);
        if next == **self {
            Arc::clone(self)
        } else {
            Arc::new(next)
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Look up a `/` separated path, e.g. `"head/serial"`.
    #[must_use]
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('/');
        let mut cur = self.values.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_object()?.get(part)?;
        }
        Some(cur)
    }

    #[must_use]
    pub fn f64(&self, path: &str) -> Option<f64> {
        self.path(path).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn usize(&self, path: &str) -> Option<usize> {
        self.path(path)
            .and_then(Value::as_f64)
            .map(|v| v.max(0.0) as usize)
    }

    #[must_use]
    pub fn str(&self, path: &str) -> Option<&str> {
        self.path(path).and_then(Value::as_str)
    }

    #[must_use]
    pub fn firmware(&self) -> Option<Firmware> {
        match self.path("firmware")? {
            Value::String(s) => Firmware::parse(s),
            Value::Object(_) => serde_json::from_value(self.path("firmware")?.clone()).ok(),
            _ => None,
        }
    }

    /// Flat list of numeric values at `path`, e.g. a matrix stored as nested arrays.
    #[must_use]
    pub fn numbers(&self, path: &str) -> Option<Vec<f64>> {
        fn flatten(v: &Value, out: &mut Vec<f64>) -> bool {
            match v {
                Value::Array(items) => items.iter().all(|i| flatten(i, out)),
                Value::Number(n) => {
                    out.push(n.as_f64().unwrap_or(f64::NAN));
                    true
                }
                _ => false,
            }
        }
        let mut out = Vec::new();
        if flatten(self.path(path)?, &mut out) {
            Some(out)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

fn merge(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(key), value) {
            (Some(Value::Object(d)), Value::Object(s)) => merge(d, s),
            _ => {
                dst.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Deployment metadata supplied alongside a data file.
///
/// Only the keys below are understood; anything else in the source mapping is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Userdata {
    /// Rotation from the instrument body frame to a separately mounted head.
    pub inst2head_rotmat: Option<[[f64; 3]; 3]>,
    /// Position of the head relative to the instrument body, in meters.
    pub inst2head_vec: Option<[f64; 3]>,
    /// Magnetic declination in degrees, positive east.
    pub declination: Option<f64>,
    /// Start and end of the good data, in seconds since the Unix epoch.
    pub time_range: Option<(f64, f64)>,
}

impl Userdata {
    /// Build from a JSON-like key/value mapping.
    ///
    /// # Errors
    /// [Error::Config] if a known key has the wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn amend_merges_nested_and_keeps_original() {
        let base = Arc::new(Configuration::from_map(obj(json!({
            "n_cells": 20,
            "head": {"serial": "A", "freq": 6000},
        }))));
        let next = base.amended(&obj(json!({"head": {"serial": "B"}, "n_beams": 3})));

        assert_eq!(base.str("head/serial"), Some("A"));
        assert_eq!(next.str("head/serial"), Some("B"));
        assert_eq!(next.f64("head/freq"), Some(6000.0));
        assert_eq!(next.usize("n_beams"), Some(3));
        assert!(!Arc::ptr_eq(&base, &next));
    }

    #[test]
    fn amend_without_change_shares_snapshot() {
        let base = Arc::new(Configuration::from_map(obj(json!({"n_cells": 20}))));
        let next = base.amended(&obj(json!({"n_cells": 20})));
        assert!(Arc::ptr_eq(&base, &next));
    }

    #[test]
    fn firmware_ordering() {
        assert!(Firmware::parse("51.41").unwrap() > Firmware::new(16, 30));
        assert!(Firmware::parse("8.1").unwrap() < Firmware::new(8, 2));
        assert_eq!(Firmware::parse("3").unwrap(), Firmware::new(3, 0));
        assert!(Firmware::parse("x.1").is_none());
        assert_eq!(Firmware::new(16, 5).to_string(), "16.05");
    }

    #[test]
    fn numbers_flattens_matrix() {
        let cfg = Configuration::from_map(obj(json!({"m": [[1, 2], [3, 4.5]]})));
        assert_eq!(cfg.numbers("m").unwrap(), vec![1.0, 2.0, 3.0, 4.5]);
    }

    #[test]
    fn userdata_from_mapping() {
        let ud = Userdata::from_value(json!({
            "declination": 10.5,
            "inst2head_vec": [0.1, 0.0, -0.2],
            "time_range": [100.0, 200.0],
            "unrelated": "ignored",
        }))
        .unwrap();
        assert_eq!(ud.declination, Some(10.5));
        assert_eq!(ud.inst2head_vec, Some([0.1, 0.0, -0.2]));
        assert_eq!(ud.time_range, Some((100.0, 200.0)));
        assert!(ud.inst2head_rotmat.is_none());

        assert!(Userdata::from_value(json!({"declination": "east"})).is_err());
    }
}
