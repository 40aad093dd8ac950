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

//! Results file metadata
//!
//! A results file holds the results of a single measurement over a single
//! time window. Its name is the complete encoding of its metadata:
//!
//! ```text
//! <type>_v<af>_<start>_<stop>_<msm_id>.ndjson[.zst]
//! ```
//!
//! For example `ping_v4_1546300800_1546304400_1001.ndjson`.

use crate::error::{MeshfetchError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Extension of plain (uncompressed) results files
pub const PLAIN_EXTENSION: &str = "ndjson";

/// Extension of compressed results files
pub const COMPRESSED_EXTENSION: &str = "ndjson.zst";

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z]+)_v(\d)_(-?\d+)_(-?\d+)_(\d+)\.(ndjson(?:\.zst)?)$")
            .expect("results file name pattern is valid")
    })
}

/// Measurement IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeasurementAf {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl MeasurementAf {
    pub fn value(&self) -> u8 {
        match self {
            MeasurementAf::V4 => 4,
            MeasurementAf::V6 => 6,
        }
    }

    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            4 => Ok(MeasurementAf::V4),
            6 => Ok(MeasurementAf::V6),
            other => Err(MeshfetchError::UnknownAf(other)),
        }
    }
}

impl fmt::Display for MeasurementAf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementAf::V4 => write!(f, "IPv4"),
            MeasurementAf::V6 => write!(f, "IPv6"),
        }
    }
}

/// Measurement type, as named by the platform API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementType {
    Ping,
    Traceroute,
    Dns,
    #[serde(rename = "sslcert")]
    Ssl,
    Http,
    Ntp,
    Wifi,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 7] = [
        MeasurementType::Ping,
        MeasurementType::Traceroute,
        MeasurementType::Dns,
        MeasurementType::Ssl,
        MeasurementType::Http,
        MeasurementType::Ntp,
        MeasurementType::Wifi,
    ];

    /// API value of the type (also used in file names)
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::Ping => "ping",
            MeasurementType::Traceroute => "traceroute",
            MeasurementType::Dns => "dns",
            MeasurementType::Ssl => "sslcert",
            MeasurementType::Http => "http",
            MeasurementType::Ntp => "ntp",
            MeasurementType::Wifi => "wifi",
        }
    }
}

impl FromStr for MeasurementType {
    type Err = MeshfetchError;

    fn from_str(s: &str) -> Result<Self> {
        MeasurementType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MeshfetchError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one results file (one measurement, one time window).
///
/// Timestamps are kept as Unix seconds so that the file name encoding is
/// exact in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultsMeta {
    pub af: MeasurementAf,
    pub measurement_type: MeasurementType,
    pub msm_id: u64,
    start: i64,
    stop: i64,
    pub compressed: bool,
}

impl ResultsMeta {
    /// Create a new metadata value. `start` must be strictly before `stop`.
    pub fn new(
        af: MeasurementAf,
        measurement_type: MeasurementType,
        msm_id: u64,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        compressed: bool,
    ) -> Result<Self> {
        Self::from_timestamps(
            af,
            measurement_type,
            msm_id,
            start.timestamp(),
            stop.timestamp(),
            compressed,
        )
    }

    /// Create a new metadata value from Unix timestamps (seconds).
    pub fn from_timestamps(
        af: MeasurementAf,
        measurement_type: MeasurementType,
        msm_id: u64,
        start: i64,
        stop: i64,
        compressed: bool,
    ) -> Result<Self> {
        if start >= stop {
            return Err(MeshfetchError::InvalidTimeRange { start, stop });
        }
        // Both ends must be representable as dates
        to_datetime(start)?;
        to_datetime(stop)?;
        Ok(Self {
            af,
            measurement_type,
            msm_id,
            start,
            stop,
            compressed,
        })
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start
    }

    pub fn stop_timestamp(&self) -> i64 {
        self.stop
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.start, 0).single().unwrap_or_default()
    }

    pub fn stop_date(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.stop, 0).single().unwrap_or_default()
    }

    pub fn extension(&self) -> &'static str {
        if self.compressed {
            COMPRESSED_EXTENSION
        } else {
            PLAIN_EXTENSION
        }
    }

    /// Canonical file name of the results file
    pub fn filename(&self) -> String {
        format!(
            "{}_v{}_{}_{}_{}.{}",
            self.measurement_type,
            self.af.value(),
            self.start,
            self.stop,
            self.msm_id,
            self.extension()
        )
    }

    /// Parse metadata back from a file name (or a path ending in one).
    pub fn from_filename(name: impl AsRef<Path>) -> Result<Self> {
        let path = name.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MeshfetchError::InvalidFilename(path.display().to_string()))?;

        let invalid = || MeshfetchError::InvalidFilename(name.to_string());
        let caps = filename_pattern().captures(name).ok_or_else(invalid)?;

        let measurement_type = MeasurementType::from_str(&caps[1])?;
        let af = MeasurementAf::from_value(caps[2].parse().map_err(|_| invalid())?)?;
        let start = caps[3].parse().map_err(|_| invalid())?;
        let stop = caps[4].parse().map_err(|_| invalid())?;
        let msm_id = caps[5].parse().map_err(|_| invalid())?;
        let compressed = &caps[6] == COMPRESSED_EXTENSION;

        Self::from_timestamps(af, measurement_type, msm_id, start, stop, compressed)
    }

    /// Path of the results endpoint for this file, optionally restricted to
    /// a set of probes.
    pub fn remote_path(&self, probes: &[u64]) -> String {
        let mut path = format!(
            "/measurements/{}/results/?anchors-only=true&format=txt&start={}&stop={}",
            self.msm_id, self.start, self.stop
        );
        if !probes.is_empty() {
            let ids: Vec<String> = probes.iter().map(|p| p.to_string()).collect();
            // Commas are kept unescaped, the API accepts both forms
            path.push_str("&probe_ids=");
            path.push_str(&ids.join(","));
        }
        path
    }

    /// Split the time window into consecutive windows of at most `step`.
    pub fn split(&self, step: Duration) -> Result<Vec<ResultsMeta>> {
        let step = step.num_seconds();
        if step <= 0 {
            return Err(MeshfetchError::InvalidConfig(format!(
                "split step must be positive, got {}s",
                step
            )));
        }

        let mut windows = Vec::new();
        let mut current = self.start;
        while current < self.stop {
            let next = current.saturating_add(step).min(self.stop);
            windows.push(Self {
                start: current,
                stop: next,
                ..*self
            });
            current = next;
        }
        Ok(windows)
    }

    pub fn with_compression(self, compressed: bool) -> Self {
        Self { compressed, ..self }
    }
}

impl fmt::Display for ResultsMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {} #{} {} → {}{}>",
            self.af,
            self.measurement_type,
            self.msm_id,
            self.start_date().to_rfc3339(),
            self.stop_date().to_rfc3339(),
            if self.compressed { " (compressed)" } else { "" }
        )
    }
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or(MeshfetchError::InvalidTimestamp(timestamp))
}

/// One unit of fetch work: a results file, optionally restricted to probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchJob {
    pub meta: ResultsMeta,
    /// Probe selection; empty means all probes
    #[serde(default)]
    pub probes: Vec<u64>,
}

impl FetchJob {
    pub fn new(meta: ResultsMeta, probes: Vec<u64>) -> Self {
        Self { meta, probes }
    }

    pub fn remote_path(&self) -> String {
        self.meta.remote_path(&self.probes)
    }
}

/// Default output directory name for a fetch run
pub fn default_dir(
    af: MeasurementAf,
    measurement_type: MeasurementType,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> String {
    format!(
        "{}_v{}_{}_{}",
        measurement_type,
        af.value(),
        start.timestamp(),
        stop.timestamp()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_filename_example() {
        let meta = ResultsMeta::new(
            MeasurementAf::V4,
            MeasurementType::Ping,
            1001,
            date("2019-01-01T00:00:00Z"),
            date("2019-01-01T01:00:00Z"),
            false,
        )
        .unwrap();
        assert_eq!(meta.filename(), "ping_v4_1546300800_1546304400_1001.ndjson");
    }

    #[test]
    fn test_compressed_filename() {
        let meta = ResultsMeta::from_timestamps(
            MeasurementAf::V6,
            MeasurementType::Traceroute,
            5030,
            0,
            3600,
            true,
        )
        .unwrap();
        assert_eq!(meta.filename(), "traceroute_v6_0_3600_5030.ndjson.zst");
        assert_eq!(ResultsMeta::from_filename(meta.filename()).unwrap(), meta);
    }

    #[test]
    fn test_from_path() {
        let meta =
            ResultsMeta::from_filename("/data/run/ping_v4_1546300800_1546304400_1001.ndjson")
                .unwrap();
        assert_eq!(meta.msm_id, 1001);
        assert!(!meta.compressed);
    }

    #[test]
    fn test_invalid_filenames() {
        for name in [
            "ping_v4_1_2_3.csv",
            "ping_v5_1_2_3.ndjson",
            "unknown_v4_1_2_3.ndjson",
            "ping_v4_10_2_3.ndjson",
            "ping_v4_1_2_3.ndjson.zst.log",
            "1001_42.ndjson",
        ] {
            assert!(ResultsMeta::from_filename(name).is_err(), "{}", name);
        }
    }

    #[test]
    fn test_start_before_stop() {
        let err = ResultsMeta::from_timestamps(
            MeasurementAf::V4,
            MeasurementType::Ping,
            1,
            10,
            10,
            false,
        )
        .unwrap_err();
        assert_eq!(err, MeshfetchError::InvalidTimeRange { start: 10, stop: 10 });
    }

    #[test]
    fn test_remote_path() {
        let meta = ResultsMeta::from_timestamps(
            MeasurementAf::V4,
            MeasurementType::Ping,
            1001,
            100,
            200,
            false,
        )
        .unwrap();
        assert_eq!(
            meta.remote_path(&[]),
            "/measurements/1001/results/?anchors-only=true&format=txt&start=100&stop=200"
        );
        assert!(meta.remote_path(&[1, 2, 3]).ends_with("&probe_ids=1,2,3"));
    }

    #[test]
    fn test_split() {
        let meta = ResultsMeta::from_timestamps(
            MeasurementAf::V4,
            MeasurementType::Ping,
            1,
            0,
            10_000,
            false,
        )
        .unwrap();
        let windows = meta.split(Duration::hours(1)).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start_timestamp(), 0);
        assert_eq!(windows[0].stop_timestamp(), 3600);
        assert_eq!(windows[2].stop_timestamp(), 10_000);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].stop_timestamp(), pair[1].start_timestamp());
        }
        assert!(meta.split(Duration::zero()).is_err());
    }

    #[test]
    fn test_default_dir() {
        let dir = default_dir(
            MeasurementAf::V6,
            MeasurementType::Traceroute,
            date("2019-01-01T00:00:00Z"),
            date("2019-01-01T01:00:00Z"),
        );
        assert_eq!(dir, "traceroute_v6_1546300800_1546304400");
    }

    fn any_meta() -> impl Strategy<Value = ResultsMeta> {
        (
            prop::bool::ANY,
            0..MeasurementType::ALL.len(),
            any::<u64>(),
            -1_000_000_000i64..4_000_000_000i64,
            1i64..1_000_000,
            prop::bool::ANY,
        )
            .prop_map(|(v6, t, msm_id, start, len, compressed)| {
                let af = if v6 { MeasurementAf::V6 } else { MeasurementAf::V4 };
                ResultsMeta::from_timestamps(
                    af,
                    MeasurementType::ALL[t],
                    msm_id,
                    start,
                    start + len,
                    compressed,
                )
                .unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_filename_roundtrip(meta in any_meta()) {
            prop_assert_eq!(ResultsMeta::from_filename(meta.filename()).unwrap(), meta);
        }
    }
}
