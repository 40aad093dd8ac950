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

use std::path::PathBuf;
use thiserror::Error;

/// Record store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Encoding error")]
    Encode(#[from] serde_json::Error),

    #[error("Record in {path:?} has no integer msm_id/prb_id, cannot index it")]
    MissingKey { path: PathBuf },

    #[error("Index {path:?} is corrupted: length {len} is not a multiple of the entry size")]
    CorruptIndex { path: PathBuf, len: u64 },

    #[error("Index {path:?} covers {indexed} bytes but the data file has {actual}")]
    IndexMismatch {
        path: PathBuf,
        indexed: u64,
        actual: u64,
    },

    #[error("Dictionary error: {0}")]
    Dictionary(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
