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

//! Anchoring mesh selection
//!
//! Every anchor is the target of one anchoring mesh measurement per address
//! family and type, in which the other anchors take part as sources. A mesh
//! fetch plans one job per target measurement, restricted to the source
//! probes of the selected anchor pairs.

use crate::error::Result;
use crate::fetcher::{plan_jobs, MeasurementRef};
use chrono::{DateTime, Duration, TimeZone, Utc};
use meshfetch_atlas::{AnchoringMeasurement, RemoteClient};
use meshfetch_core::{FetchJob, MeasurementAf, MeasurementType};
use serde_json::Value;
use std::collections::BTreeMap;

const MESH_DESCRIPTION: &str = "Anchoring Mesh Measurement";

/// Measurement statuses that have no stop date yet (specified, scheduled, ongoing)
const RUNNING_STATUSES: [u64; 3] = [0, 1, 2];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub id: u64,
    pub probe_id: u64,
    pub fqdn: String,
}

impl Anchor {
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            id: value.get("id")?.as_u64()?,
            probe_id: value.get("probe")?.as_u64()?,
            fqdn: value.get("fqdn")?.as_str()?.to_string(),
        })
    }
}

/// An anchoring mesh measurement targeting one anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMeasurement {
    pub id: u64,
    pub af: MeasurementAf,
    pub measurement_type: MeasurementType,
    pub start_date: Option<DateTime<Utc>>,
    /// Set once the measurement is no longer running
    pub stop_date: Option<DateTime<Utc>>,
}

impl MeshMeasurement {
    pub fn from_value(value: &Value) -> Option<Self> {
        let af = u8::try_from(value.get("af")?.as_u64()?).ok()?;
        let status = value.get("status")?;
        let stop_date = match status.get("id")?.as_u64()? {
            id if RUNNING_STATUSES.contains(&id) => None,
            _ => status.get("when").and_then(timestamp),
        };
        Some(Self {
            id: value.get("id")?.as_u64()?,
            af: MeasurementAf::from_value(af).ok()?,
            measurement_type: value.get("type")?.as_str()?.parse().ok()?,
            start_date: value.get("start_time").and_then(timestamp),
            stop_date,
        })
    }

    /// Whether the measurement covers the whole of `[start, stop]`
    pub fn is_running(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
        self.start_date.is_some_and(|date| date <= start)
            && self.stop_date.map_or(true, |date| date >= stop)
    }
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(value.as_i64()?, 0).single()
}

/// What to do with pairs whose source and target are the same anchor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelfPairs {
    #[default]
    Include,
    Exclude,
    Only,
}

/// Selection of (target, source) anchor pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairFilter {
    pub self_pairs: SelfPairs,
    /// Keep one direction of each pair
    pub half: bool,
}

impl PairFilter {
    pub fn keep(&self, target: &Anchor, source: &Anchor) -> bool {
        let same = target.id == source.id;
        let by_self = match self.self_pairs {
            SelfPairs::Include => true,
            SelfPairs::Exclude => !same,
            SelfPairs::Only => same,
        };
        by_self && (!self.half || target.id <= source.id)
    }
}

/// Anchors and the mesh measurements that target them
#[derive(Debug, Clone, Default)]
pub struct AnchoringMesh {
    entries: Vec<(Anchor, MeshMeasurement)>,
}

impl AnchoringMesh {
    pub fn new(entries: Vec<(Anchor, MeshMeasurement)>) -> Self {
        Self { entries }
    }

    /// Parse joined API objects. Anchoring probe measurements and entries
    /// that cannot be parsed are dropped.
    pub fn from_joined(joined: &[AnchoringMeasurement]) -> Self {
        let mut entries = Vec::with_capacity(joined.len());
        for item in joined {
            let is_mesh = item
                .measurement
                .get("description")
                .and_then(Value::as_str)
                .is_some_and(|d| d.starts_with(MESH_DESCRIPTION));
            if !is_mesh {
                continue;
            }
            match (
                Anchor::from_value(&item.target),
                MeshMeasurement::from_value(&item.measurement),
            ) {
                (Some(anchor), Some(measurement)) => entries.push((anchor, measurement)),
                _ => tracing::debug!("Ignoring unparseable mesh entry {}", item.measurement),
            }
        }
        Self { entries }
    }

    pub async fn from_api(client: &RemoteClient) -> Result<Self> {
        let joined = client.fetch_anchoring_measurements().await?;
        let mesh = Self::from_joined(&joined);
        tracing::info!(
            "Anchoring mesh: {} anchors, {} measurements",
            mesh.anchors().len(),
            mesh.len()
        );
        Ok(mesh)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct anchors, by id
    pub fn anchors(&self) -> Vec<&Anchor> {
        let by_id: BTreeMap<u64, &Anchor> =
            self.entries.iter().map(|(a, _)| (a.id, a)).collect();
        by_id.into_values().collect()
    }

    /// Keep the measurements running over all of `[start, stop]`.
    pub fn running(self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        self.retain(|m| m.is_running(start, stop))
    }

    pub fn with_type(self, af: MeasurementAf, measurement_type: MeasurementType) -> Self {
        self.retain(|m| m.af == af && m.measurement_type == measurement_type)
    }

    fn retain(mut self, keep: impl Fn(&MeshMeasurement) -> bool) -> Self {
        self.entries.retain(|(_, m)| keep(m));
        self
    }

    pub fn find_measurement(
        &self,
        anchor_id: u64,
        af: MeasurementAf,
        measurement_type: MeasurementType,
    ) -> Option<&MeshMeasurement> {
        self.entries
            .iter()
            .find(|(a, m)| {
                a.id == anchor_id && m.af == af && m.measurement_type == measurement_type
            })
            .map(|(_, m)| m)
    }

    /// Source probe ids of the selected pairs, by target anchor
    pub fn sources_by_target(&self, filter: &PairFilter) -> Vec<(&Anchor, Vec<u64>)> {
        let anchors = self.anchors();
        anchors
            .iter()
            .map(|target| {
                let probes: Vec<u64> = anchors
                    .iter()
                    .filter(|source| filter.keep(target, source))
                    .map(|source| source.probe_id)
                    .collect();
                (*target, probes)
            })
            .filter(|(_, probes)| !probes.is_empty())
            .collect()
    }

    /// Plan the fetch of the mesh measurements of one address family and type.
    ///
    /// The mesh is narrowed to measurements of that kind running over the
    /// whole window, then each target measurement gets one job per window
    /// with its selected source probes.
    pub fn plan(
        &self,
        measurement: (MeasurementAf, MeasurementType),
        window: (DateTime<Utc>, DateTime<Utc>),
        split: Option<Duration>,
        filter: &PairFilter,
        compressed: bool,
    ) -> Result<Vec<FetchJob>> {
        let (af, measurement_type) = measurement;
        let (start, stop) = window;
        let mesh = self
            .clone()
            .running(start, stop)
            .with_type(af, measurement_type);

        let mut jobs = Vec::new();
        for (target, probes) in mesh.sources_by_target(filter) {
            let Some(found) = mesh.find_measurement(target.id, af, measurement_type) else {
                continue;
            };
            let reference = MeasurementRef::new(af, measurement_type, found.id);
            jobs.extend(plan_jobs(&[reference], start, stop, split, &probes, compressed)?);
        }
        tracing::debug!(
            "Planned {} jobs over {} of {} anchors",
            jobs.len(),
            mesh.anchors().len(),
            self.anchors().len()
        );
        Ok(jobs)
    }
}
