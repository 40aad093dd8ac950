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

//! Atlas API client
//!
//! Paginated JSON list endpoints are fetched concurrently and memoized
//! through the injected [`ResponseCache`]. Results endpoints are streamed
//! as newline-delimited JSON and never cached.
//!
//! Every network read carries a fixed timeout. An elapsed timeout surfaces
//! as [`AtlasError::Timeout`], which callers may retry.

use crate::cache::{ResponseCache, DEFAULT_MAX_AGE};
use crate::error::{AtlasError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use meshfetch_core::{record_id, Record, ResultsMeta};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use url::Url;

/// Public RIPE Atlas API
pub const DEFAULT_BASE_URL: &str = "https://atlas.ripe.net/api/v2";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Items per page for list endpoints (default: 500)
    pub page_size: usize,
    /// Concurrent page requests (default: 4)
    pub max_workers: usize,
    /// Timeout of every network read (default: 15 seconds)
    pub read_timeout: Duration,
    /// Sent as `Authorization: Key <key>`
    pub api_key: Option<String>,
    /// Maximum age of cached list responses (default: 1 day)
    pub cache_max_age: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 500,
            max_workers: 4,
            read_timeout: Duration::from_secs(15),
            api_key: None,
            cache_max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }
}

/// Anchoring measurement joined with its target anchor
#[derive(Debug, Clone, PartialEq)]
pub struct AnchoringMeasurement {
    pub measurement: Value,
    pub target: Value,
}

/// Atlas API client.
///
/// # Example
///
/// ```no_run
/// use meshfetch_atlas::{ClientConfig, MemoryCache, RemoteClient};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RemoteClient::new(ClientConfig::default(), Arc::new(MemoryCache::default()))?;
///     let anchors = client.fetch_anchors().await?;
///     println!("{} anchors", anchors.len());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RemoteClient {
    config: ClientConfig,
    http_client: HttpClient,
    cache: Arc<dyn ResponseCache>,
}

impl RemoteClient {
    pub fn new(config: ClientConfig, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Key {}", key))
                .map_err(|_| AtlasError::InvalidApiKey)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http_client = HttpClient::builder()
            .connect_timeout(config.read_timeout)
            .default_headers(headers)
            .pool_max_idle_per_host(config.max_workers.max(1))
            .build()?;

        Ok(Self {
            config,
            http_client,
            cache,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Url> {
        let base = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Ok(Url::parse_with_params(&base, params)?)
    }

    /// Run one network step under the read timeout.
    async fn timed<T, F>(&self, step: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, reqwest::Error>>,
    {
        match tokio::time::timeout(self.config.read_timeout, step).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AtlasError::Timeout(self.config.read_timeout)),
        }
    }

    async fn request_json(&self, url: Url) -> Result<Value> {
        tracing::debug!("GET {}", url);
        let response = self.timed(self.http_client.get(url.clone()).send()).await?;
        let status = response.status();
        let body = self.timed(response.bytes()).await?;

        if !status.is_success() {
            return Err(AtlasError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET a JSON document, through the response cache.
    pub async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint_url(endpoint, params)?;
        let key = url.to_string();
        self.cache
            .get(&key, || self.request_json(url), self.config.cache_max_age)
            .await
    }

    /// Fetch one page of a list endpoint. Returns the page and the total
    /// item count.
    pub async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<(Vec<Value>, u64)> {
        let mut params = params.to_vec();
        params.push(("page_size", self.config.page_size.to_string()));
        let mut body = self.get_json(endpoint, &params).await?;

        let results = match body.get_mut("results").map(Value::take) {
            Some(Value::Array(results)) => results,
            _ => {
                return Err(AtlasError::MalformedResponse {
                    url: endpoint.to_string(),
                    reason: "missing `results` array".to_string(),
                })
            }
        };
        let total = body
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(results.len() as u64);
        Ok((results, total))
    }

    /// Fetch every page of a list endpoint.
    ///
    /// Pages after the first are fetched concurrently and concatenated in
    /// completion order.
    pub async fn fetch_all(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<Value>> {
        let (mut results, total) = self.fetch_page(endpoint, params).await?;

        if !results.is_empty() && (results.len() as u64) < total {
            let per_page = results.len() as u64;
            let pages = total.div_ceil(per_page);
            let workers = self.config.max_workers.clamp(1, (pages - 1) as usize);
            tracing::debug!(
                "{}: {} items over {} pages, {} workers",
                endpoint,
                total,
                pages,
                workers
            );

            let mut pending = stream::iter(2..=pages)
                .map(|page| {
                    let mut page_params = params.to_vec();
                    page_params.push(("page", page.to_string()));
                    async move { self.fetch_page(endpoint, &page_params).await }
                })
                .buffer_unordered(workers);

            while let Some(page) = pending.next().await {
                let (items, _) = page?;
                results.extend(items);
            }
        }

        let distinct: HashSet<String> = results
            .iter()
            .filter_map(record_id)
            .map(Value::to_string)
            .collect();
        if distinct.len() != results.len() {
            tracing::warn!(
                "Unexpected number of results for {}: {} distinct vs {} total",
                endpoint,
                distinct.len(),
                results.len()
            );
        }

        Ok(results)
    }

    pub async fn fetch_anchors(&self) -> Result<Vec<Value>> {
        self.fetch_all("anchors", &[]).await
    }

    pub async fn fetch_measurements(&self, params: &[(&str, String)]) -> Result<Vec<Value>> {
        self.fetch_all("measurements", params).await
    }

    /// Anchoring mesh measurements with their target anchor.
    ///
    /// Measurements whose target is not a known anchor are dropped.
    pub async fn fetch_anchoring_measurements(&self) -> Result<Vec<AnchoringMeasurement>> {
        let anchors = self.fetch_anchors().await?;
        let measurements = self
            .fetch_measurements(&[(
                "description__startswith",
                "Anchoring Mesh Measurement:".to_string(),
            )])
            .await?;

        let targets: std::collections::HashMap<String, Value> = anchors
            .into_iter()
            .filter_map(|a| Some((a.get("fqdn")?.as_str()?.to_string(), a)))
            .collect();

        let mut missing = HashSet::new();
        let mut joined = Vec::new();
        for measurement in measurements {
            let target = measurement
                .get("target")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match targets.get(&target) {
                Some(anchor) => joined.push(AnchoringMeasurement {
                    measurement,
                    target: anchor.clone(),
                }),
                None => {
                    missing.insert(target);
                }
            }
        }
        if !missing.is_empty() {
            tracing::warn!("{} missing anchors", missing.len());
        }
        Ok(joined)
    }

    /// Stream the results of one measurement window.
    ///
    /// A non-200 response logs a warning and yields nothing. Empty lines
    /// are skipped and undecodable lines are dropped.
    pub async fn fetch_results(
        &self,
        meta: &ResultsMeta,
        probes: &[u64],
    ) -> Result<BoxStream<'static, Result<Record>>> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            meta.remote_path(probes)
        );
        self.stream_ndjson(&url).await
    }

    async fn stream_ndjson(&self, url: &str) -> Result<BoxStream<'static, Result<Record>>> {
        tracing::debug!("GET {} (stream)", url);
        let response = self.timed(self.http_client.get(url).send()).await?;
        if response.status() != StatusCode::OK {
            tracing::warn!("{} status for GET {}", response.status(), url);
            return Ok(stream::empty().boxed());
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let lines = LineStream {
            reader: Box::pin(StreamReader::new(body)),
            line: Vec::new(),
            timeout: self.config.read_timeout,
        };

        Ok(stream::unfold(Some(lines), |state| async move {
            let mut lines = state?;
            match lines.next_record().await {
                Ok(Some(record)) => Some((Ok(record), Some(lines))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed())
    }
}

struct LineStream {
    reader: Pin<Box<dyn AsyncBufRead + Send>>,
    line: Vec<u8>,
    timeout: Duration,
}

impl LineStream {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.line.clear();
            let line = self.reader.read_until(b'\n', &mut self.line);
            let read = tokio::time::timeout(self.timeout, line)
                .await
                .map_err(|_| AtlasError::Timeout(self.timeout))??;
            if read == 0 {
                return Ok(None);
            }

            let line = trim_line(&self.line);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => tracing::debug!("Dropping undecodable result line: {}", e),
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}
