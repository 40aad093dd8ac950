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

//! Meshfetch Pipeline
//!
//! Fetching results windows into store files, for given measurements or
//! across the anchoring mesh, and repartitioning them per probe. Both run
//! their jobs through a [`JobScheduler`].

pub mod config;
pub mod describe;
pub mod error;
pub mod fetcher;
pub mod mesh;
pub mod scheduler;
pub mod unpack;

pub use config::{AtlasSettings, FetchSettings, MeshfetchConfig, UnpackSettings};
pub use describe::{describe_file, describe_path, StoreSummary};
pub use error::{PipelineError, Result};
pub use fetcher::{plan_jobs, Fetcher, JobOutcome, MeasurementRef};
pub use mesh::{Anchor, AnchoringMesh, MeshMeasurement, PairFilter, SelfPairs};
pub use scheduler::{JobScheduler, RunSummary};
pub use unpack::{default_destination, CollisionMode, Repartitioner, UnpackFilter, UnpackStats};
