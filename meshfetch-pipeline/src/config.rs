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

//! Meshfetch configuration
//!
//! Defaults, then an optional TOML file, then `MESHFETCH_*` environment
//! variables. Every field has a serde default, so a partial file is valid.
//!
//! ```toml
//! [atlas]
//! base_url = "https://atlas.ripe.net/api/v2"
//! page_size = 500
//!
//! [fetch]
//! jobs = 4
//!
//! [unpack]
//! mode = "overwrite"
//! ```

use crate::error::{PipelineError, Result};
use crate::unpack::CollisionMode;
use meshfetch_atlas::{ClientConfig, DEFAULT_BASE_URL};
use meshfetch_core::{RetryPolicy, DEFAULT_WINDOW_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MeshfetchConfig {
    #[serde(default)]
    pub atlas: AtlasSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub unpack: UnpackSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AtlasSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Items per page for list endpoints
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Concurrent page requests
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    pub api_key: Option<String>,

    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,

    /// Response cache directory (default: platform cache dir)
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FetchSettings {
    /// Concurrent fetch jobs
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// zstd dictionary for compressed output
    pub dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnpackSettings {
    /// Measurements processed concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default)]
    pub mode: CollisionMode,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_page_size() -> usize {
    500
}

fn default_max_workers() -> usize {
    4
}

fn default_read_timeout() -> u64 {
    15
}

fn default_cache_max_age() -> u64 {
    24 * 60 * 60
}

fn default_jobs() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            max_workers: default_max_workers(),
            read_timeout_secs: default_read_timeout(),
            api_key: None,
            cache_max_age_secs: default_cache_max_age(),
            cache_dir: None,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            max_attempts: default_max_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            dictionary: None,
        }
    }
}

impl Default for UnpackSettings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            window_size: default_window_size(),
            mode: CollisionMode::default(),
        }
    }
}

impl MeshfetchConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration: defaults, then `config_file` if it exists, then
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables
    ///
    /// Supported variables:
    /// - MESHFETCH_BASE_URL: API root
    /// - MESHFETCH_API_KEY: API key
    /// - MESHFETCH_PAGE_SIZE: items per page
    /// - MESHFETCH_MAX_WORKERS: concurrent page requests
    /// - MESHFETCH_READ_TIMEOUT: read timeout in seconds
    /// - MESHFETCH_CACHE_DIR: response cache directory
    /// - MESHFETCH_CACHE_MAX_AGE: cache max age in seconds
    /// - MESHFETCH_FETCH_JOBS / MESHFETCH_UNPACK_JOBS: job concurrency
    /// - MESHFETCH_DICTIONARY: zstd dictionary path
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            var: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            let value = var(name)?;
            match value.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid {}={:?}", name, value);
                    None
                }
            }
        }

        if let Some(url) = var("MESHFETCH_BASE_URL") {
            self.atlas.base_url = url;
        }
        if let Some(key) = var("MESHFETCH_API_KEY") {
            self.atlas.api_key = Some(key);
        }
        if let Some(v) = parsed(&var, "MESHFETCH_PAGE_SIZE") {
            self.atlas.page_size = v;
        }
        if let Some(v) = parsed(&var, "MESHFETCH_MAX_WORKERS") {
            self.atlas.max_workers = v;
        }
        if let Some(v) = parsed(&var, "MESHFETCH_READ_TIMEOUT") {
            self.atlas.read_timeout_secs = v;
        }
        if let Some(dir) = var("MESHFETCH_CACHE_DIR") {
            self.atlas.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = parsed(&var, "MESHFETCH_CACHE_MAX_AGE") {
            self.atlas.cache_max_age_secs = v;
        }
        if let Some(v) = parsed(&var, "MESHFETCH_FETCH_JOBS") {
            self.fetch.jobs = v;
        }
        if let Some(path) = var("MESHFETCH_DICTIONARY") {
            self.fetch.dictionary = Some(PathBuf::from(path));
        }
        if let Some(v) = parsed(&var, "MESHFETCH_UNPACK_JOBS") {
            self.unpack.jobs = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("atlas.page_size", self.atlas.page_size),
            ("atlas.max_workers", self.atlas.max_workers),
            ("atlas.read_timeout_secs", self.atlas.read_timeout_secs as usize),
            ("fetch.jobs", self.fetch.jobs),
            ("fetch.max_attempts", self.fetch.max_attempts as usize),
            ("unpack.jobs", self.unpack.jobs),
            ("unpack.window_size", self.unpack.window_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{} must be positive", name)));
            }
        }
        if self.fetch.backoff_min_ms > self.fetch.backoff_max_ms {
            return Err(PipelineError::Config(format!(
                "fetch.backoff_min_ms ({}) exceeds fetch.backoff_max_ms ({})",
                self.fetch.backoff_min_ms, self.fetch.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.atlas.base_url.clone())
            .with_page_size(self.atlas.page_size)
            .with_max_workers(self.atlas.max_workers)
            .with_read_timeout(Duration::from_secs(self.atlas.read_timeout_secs))
            .with_api_key(self.atlas.api_key.clone())
            .with_cache_max_age(Duration::from_secs(self.atlas.cache_max_age_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch.max_attempts,
            Duration::from_millis(self.fetch.backoff_min_ms),
            Duration::from_millis(self.fetch.backoff_max_ms),
        )
    }
}
