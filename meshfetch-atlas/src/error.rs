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

use std::time::Duration;
use thiserror::Error;

/// Remote API client errors
#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("API key is not a valid header value")]
    InvalidApiKey,

    #[error("Invalid URL")]
    Url(#[from] url::ParseError),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl AtlasError {
    /// Whether the error is an elapsed read timeout, the only error class
    /// worth retrying.
    pub fn is_timeout(&self) -> bool {
        match self {
            AtlasError::Timeout(_) => true,
            AtlasError::Request(e) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;
