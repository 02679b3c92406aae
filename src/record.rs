//! Data structures shared by the decoders, the aggregator and the exposition layer.
//!
//! A [`Record`] is the unit every cache manager report is decoded into: a
//! normalized key plus either a scalar value or a list of string labels.

use serde::Serialize;
use std::fmt;

/// Value carried by labeled records; the labels are the payload.
pub const LABELED_VALUE: f64 = 1.0;

/// One of the cache manager reports the exporter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `counters`: `key = value` lines.
    Counters,
    /// `service_times`: percentile tables.
    ServiceTimes,
    /// `info`: the general runtime report.
    Info,
}

impl Endpoint {
    /// All endpoints, in scrape order.
    pub const ALL: [Endpoint; 3] = [Endpoint::Counters, Endpoint::ServiceTimes, Endpoint::Info];

    /// Path of the report under `cache_object://localhost/`.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Counters => "counters",
            Endpoint::ServiceTimes => "service_times",
            Endpoint::Info => "info",
        }
    }

    /// Position of this endpoint in [`Endpoint::ALL`].
    pub fn index(self) -> usize {
        match self {
            Endpoint::Counters => 0,
            Endpoint::ServiceTimes => 1,
            Endpoint::Info => 2,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.path())
    }
}

/// A string label attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A decoded metric.
///
/// Either `labels` is empty and `value` is the measurement, or `labels`
/// carries the payload and `value` is [`LABELED_VALUE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub key: String,
    pub value: f64,
    pub labels: Vec<Label>,
}

impl Record {
    /// Create a scalar record.
    pub fn scalar(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            labels: Vec::new(),
        }
    }

    /// Create a labeled record.
    pub fn labeled(key: impl Into<String>, labels: Vec<Label>) -> Self {
        Self {
            key: key.into(),
            value: LABELED_VALUE,
            labels,
        }
    }

    /// Whether this record carries labels rather than a measurement.
    pub fn is_labeled(&self) -> bool {
        !self.labels.is_empty()
    }

    /// Look up a label value by key.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, "{} {}", self.key, self.value);
        }
        write!(f, "{}{{", self.key)?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", label.key, label.value)?;
        }
        write!(f, "}} {}", self.value)
    }
}

/// Normalize a report field name into a record key.
///
/// Spaces become underscores; `(`, `)`, `,` and `/` are dropped. Case is kept,
/// and applying it twice gives the same result as applying it once.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '(' | ')' | ',' | '/'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}
