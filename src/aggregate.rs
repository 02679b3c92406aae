//! Folding decoded lines into the record set of one report.
//!
//! `counters` and `service_times` records pass straight through. The `info`
//! report needs two merge rules: dual-window averages are split into a
//! `_5min` and a `_60min` scalar, and identity fields (version, build info,
//! service name) are collected as labels on a single `squid_info` record.

use tracing::debug;

use crate::decoder::{WINDOW_5MIN, decode_line};
use crate::record::{Endpoint, Label, Record};

/// Key of the composite record that collects the info identity labels.
pub const INFO_COMPOSITE_KEY: &str = "squid_info";

/// Accumulates the records of a single report, one line at a time.
#[derive(Debug)]
pub struct Aggregator {
    endpoint: Endpoint,
    records: Vec<Record>,
    composite: Vec<Label>,
    lines: usize,
    skipped: usize,
}

impl Aggregator {
    /// Create an empty aggregator for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            records: Vec::new(),
            composite: Vec::new(),
            lines: 0,
            skipped: 0,
        }
    }

    /// Decode a raw line and fold the result in.
    ///
    /// Lines that fail to decode are logged and counted, never fatal.
    pub fn push_line(&mut self, line: &str) {
        self.lines += 1;
        match decode_line(self.endpoint, line) {
            Ok(Some(record)) => self.push_record(record),
            Ok(None) => {}
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping line: {}", e);
            }
        }
    }

    /// Fold an already decoded record in.
    pub fn push_record(&mut self, record: Record) {
        if self.endpoint != Endpoint::Info {
            self.records.push(record);
            return;
        }

        match record.labels.as_slice() {
            [five, sixty] if five.key == WINDOW_5MIN => {
                for window in [five, sixty] {
                    match window.value.parse::<f64>() {
                        Ok(value) => {
                            let key = format!("{}_{}", record.key, window.key);
                            self.records.push(Record::scalar(key, value));
                        }
                        Err(_) => {
                            debug!(
                                "Dropping {} window of {}: {:?} is not a number",
                                window.key, record.key, window.value
                            );
                        }
                    }
                }
            }
            // Label names must be unique within a series; the first value wins
            [identity] if self.composite.iter().any(|l| l.key == identity.key) => {
                debug!("Ignoring repeated {} = {:?}", identity.key, identity.value);
            }
            [identity] => self.composite.push(identity.clone()),
            _ => self.records.push(record),
        }
    }

    /// Number of lines fed in so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Number of lines that failed to decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finish the report and return its records in input order.
    ///
    /// For `info`, the composite record comes last if any identity field was seen.
    pub fn finish(mut self) -> Vec<Record> {
        if !self.composite.is_empty() {
            self.records
                .push(Record::labeled(INFO_COMPOSITE_KEY, self.composite));
        }
        self.records
    }
}

/// Decode and aggregate a complete report held in memory.
pub fn aggregate_lines<'a>(
    endpoint: Endpoint,
    lines: impl IntoIterator<Item = &'a str>,
) -> Vec<Record> {
    let mut aggregator = Aggregator::new(endpoint);
    for line in lines {
        aggregator.push_line(line);
    }
    aggregator.finish()
}
