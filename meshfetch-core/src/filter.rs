// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Record filters and transforms
//!
//! Filters are stateless: a filter must not remember what it has seen.
//! Writers and readers hold ordered lists of them and evaluate them in
//! order, stopping at the first rejection.

use crate::meta::MeasurementType;
use crate::record::{Record, PRB_ID_FIELD};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Decides whether a value is kept.
pub trait Predicate<T>: Send + Sync {
    fn keep(&self, value: &T) -> bool;
}

/// Maps a value to a new value.
pub trait Transform<T>: Send + Sync {
    fn apply(&self, value: T) -> T;
}

impl<T, F> Predicate<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn keep(&self, value: &T) -> bool {
        self(value)
    }
}

/// Shared record predicate
pub type RecordPredicate = Arc<dyn Predicate<Record>>;

/// Shared record transform
pub type RecordTransform = Arc<dyn Transform<Record>>;

/// True when every predicate keeps the value (short-circuits).
pub fn keep_all<T>(predicates: &[Arc<dyn Predicate<T>>], value: &T) -> bool {
    predicates.iter().all(|p| p.keep(value))
}

/// Apply transforms in order.
pub fn apply_all<T>(transforms: &[Arc<dyn Transform<T>>], value: T) -> T {
    transforms.iter().fold(value, |acc, t| t.apply(acc))
}

/// Keep only records from the given probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeIdFilter {
    pub probe_ids: HashSet<u64>,
}

impl ProbeIdFilter {
    pub fn new(probe_ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            probe_ids: probe_ids.into_iter().collect(),
        }
    }
}

impl Predicate<Record> for ProbeIdFilter {
    fn keep(&self, record: &Record) -> bool {
        record
            .get(PRB_ID_FIELD)
            .and_then(Value::as_u64)
            .map(|id| self.probe_ids.contains(&id))
            .unwrap_or(false)
    }
}

/// Drop records where the probe measured itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelfRecordFilter;

impl Predicate<Record> for SelfRecordFilter {
    fn keep(&self, record: &Record) -> bool {
        let dst = record.get("dst_addr");
        if dst.is_none() {
            return true;
        }
        record.get("from") != dst && record.get("src_addr") != dst
    }
}

/// Keep only records of a measurement type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTypeFilter {
    pub measurement_type: MeasurementType,
}

impl RecordTypeFilter {
    pub fn new(measurement_type: MeasurementType) -> Self {
        Self { measurement_type }
    }
}

impl Predicate<Record> for RecordTypeFilter {
    fn keep(&self, record: &Record) -> bool {
        record.get("type").and_then(Value::as_str) == Some(self.measurement_type.as_str())
    }
}

impl fmt::Display for RecordTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordTypeFilter({})", self.measurement_type)
    }
}

/// Reduce a ping result to its timestamp and minimum RTT
#[derive(Debug, Clone, Copy, Default)]
pub struct PingMinimumTransform;

impl Transform<Record> for PingMinimumTransform {
    fn apply(&self, record: Record) -> Record {
        json!({
            "timestamp": record.get("timestamp").cloned().unwrap_or(Value::Null),
            "min": record.get("min").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Flatten a traceroute result into the list of replying addresses per hop
#[derive(Debug, Clone, Copy, Default)]
pub struct TracerouteFlatIpTransform;

impl Transform<Record> for TracerouteFlatIpTransform {
    fn apply(&self, record: Record) -> Record {
        let hops: Vec<Value> = record
            .get("result")
            .and_then(Value::as_array)
            .map(|hops| {
                hops.iter()
                    .map(|hop| {
                        let replies = hop
                            .get("result")
                            .and_then(Value::as_array)
                            .map(|replies| {
                                replies
                                    .iter()
                                    .map(|r| r.get("from").cloned().unwrap_or(Value::Null))
                                    .collect()
                            })
                            .unwrap_or_default();
                        Value::Array(replies)
                    })
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "timestamp": record.get("timestamp").cloned().unwrap_or(Value::Null),
            "src_addr": record.get("src_addr").cloned().unwrap_or(Value::Null),
            "dst_addr": record.get("dst_addr").cloned().unwrap_or(Value::Null),
            "hops": hops,
        })
    }
}
