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

//! Meshfetch Core
//!
//! Data model shared by the storage, client, and pipeline crates: results
//! file metadata, record keys, record filters and transforms, the streaming
//! partitioner, and the retry policy.

pub mod error;
pub mod filter;
pub mod meta;
pub mod partition;
pub mod record;
pub mod resilience;

pub use error::{error_chain, MeshfetchError, Result};
pub use filter::{
    apply_all, keep_all, PingMinimumTransform, Predicate, ProbeIdFilter, RecordPredicate,
    RecordTransform, RecordTypeFilter, SelfRecordFilter, Transform, TracerouteFlatIpTransform,
};
pub use meta::{
    default_dir, FetchJob, MeasurementAf, MeasurementType, ResultsMeta, COMPRESSED_EXTENSION,
    PLAIN_EXTENSION,
};
pub use partition::{partition, PartitionExt, StreamingPartitioner, DEFAULT_WINDOW_SIZE};
pub use record::{record_id, Record, RecordKey, MSM_ID_FIELD, PRB_ID_FIELD};
pub use resilience::RetryPolicy;
