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

use meshfetch_atlas::AtlasError;
use meshfetch_core::MeshfetchError;
use meshfetch_storage::StoreError;
use thiserror::Error;

/// Fetch and unpack pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Meta(#[from] MeshfetchError),

    #[error("Store error")]
    Store(#[from] StoreError),

    #[error("Atlas error")]
    Atlas(#[from] AtlasError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the failure is a read timeout worth retrying
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Atlas(e) if e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
