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

//! Meshfetch Atlas
//!
//! Async client for the RIPE Atlas API v2: cached, concurrently paginated
//! list endpoints and streamed measurement results.

pub mod cache;
pub mod client;
pub mod error;

pub use cache::{DiskCache, MemoryCache, NoCache, ResponseCache, CACHE_VERSION, DEFAULT_MAX_AGE};
pub use client::{AnchoringMeasurement, ClientConfig, RemoteClient, DEFAULT_BASE_URL};
pub use error::{AtlasError, Result};
