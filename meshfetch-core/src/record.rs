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

//! Measurement result records
//!
//! Records are kept as opaque JSON objects. Only the measurement id and the
//! probe id are relied upon, for indexing and partitioning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single measurement result, as returned by the platform.
pub type Record = serde_json::Value;

/// Field holding the measurement id
pub const MSM_ID_FIELD: &str = "msm_id";

/// Field holding the probe id
pub const PRB_ID_FIELD: &str = "prb_id";

/// The (measurement id, probe id) pair of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub msm_id: u64,
    pub prb_id: u64,
}

impl RecordKey {
    pub fn new(msm_id: u64, prb_id: u64) -> Self {
        Self { msm_id, prb_id }
    }

    /// Extract the key of a record, if both ids are present and integral.
    pub fn extract(record: &Record) -> Option<Self> {
        let msm_id = record.get(MSM_ID_FIELD)?.as_u64()?;
        let prb_id = record.get(PRB_ID_FIELD)?.as_u64()?;
        Some(Self { msm_id, prb_id })
    }

    /// Output file stem of the pair, `<msm_id>_<prb_id>`
    pub fn stem(&self) -> String {
        format!("{}_{}", self.msm_id, self.prb_id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.msm_id, self.prb_id)
    }
}

/// Id of a record in a paginated listing
pub fn record_id(record: &Record) -> Option<&serde_json::Value> {
    record.get("id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id() {
        assert_eq!(record_id(&json!({"id": 7, "type": "ping"})), Some(&json!(7)));
        assert_eq!(record_id(&json!({"type": "ping"})), None);
    }

    #[test]
    fn test_extract_key() {
        let record = json!({"msm_id": 1001, "prb_id": 6001, "min": 1.5});
        assert_eq!(RecordKey::extract(&record), Some(RecordKey::new(1001, 6001)));
    }

    #[test]
    fn test_extract_missing_or_invalid() {
        assert_eq!(RecordKey::extract(&json!({"msm_id": 1001})), None);
        assert_eq!(RecordKey::extract(&json!({"msm_id": "1001", "prb_id": 1})), None);
        assert_eq!(RecordKey::extract(&json!({"msm_id": -1, "prb_id": 1})), None);
        assert_eq!(RecordKey::extract(&json!([1, 2])), None);
    }

    #[test]
    fn test_stem() {
        assert_eq!(RecordKey::new(1001, 42).stem(), "1001_42");
    }
}
