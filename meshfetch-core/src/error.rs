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

use thiserror::Error;

/// Errors raised by the core data model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshfetchError {
    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Unknown measurement type: {0}")]
    UnknownType(String),

    #[error("Unknown address family: {0}")]
    UnknownAf(u8),

    #[error("Invalid time range: start {start} is not before stop {stop}")]
    InvalidTimeRange { start: i64, stop: i64 },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MeshfetchError>;

/// `error: cause: cause...`
///
/// Error types in this workspace name only their own layer in `Display`
/// and leave the details to their sources.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
