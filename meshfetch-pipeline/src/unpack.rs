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

//! Repartition results files into per-(measurement, probe) files
//!
//! Source files are grouped by measurement id. Each measurement is read in
//! chronological order, partitioned by `(msm_id, prb_id)` with a bounded
//! window, and every batch is appended to `<msm_id>_<prb_id>.ndjson[.zst]`
//! in the destination directory. What happens to outputs left by an earlier
//! run is decided by the [`CollisionMode`].

use crate::error::{PipelineError, Result};
use crate::scheduler::JobScheduler;
use chrono::{DateTime, Utc};
use meshfetch_core::{
    MeasurementAf, MeasurementType, PartitionExt, Record, RecordKey, ResultsMeta,
    DEFAULT_WINDOW_SIZE,
};
use meshfetch_storage::index::INDEX_SUFFIX;
use meshfetch_storage::{
    glob_files, read_all, remove_store, Dictionary, ReaderOptions, RecordWriter, StoreError,
    WriteMode, WriterOptions,
};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How to treat an output file that exists before the run first writes to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionMode {
    /// Keep the existing content and append to it
    Append,
    /// Delete the existing file (and its index), then write
    Overwrite,
    /// Leave the existing file alone and drop the pair for this run
    #[default]
    Skip,
}

impl CollisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionMode::Append => "append",
            CollisionMode::Overwrite => "overwrite",
            CollisionMode::Skip => "skip",
        }
    }
}

impl FromStr for CollisionMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(CollisionMode::Append),
            "overwrite" => Ok(CollisionMode::Overwrite),
            "skip" => Ok(CollisionMode::Skip),
            other => Err(PipelineError::Config(format!(
                "unknown collision mode {:?} (expected append, overwrite or skip)",
                other
            ))),
        }
    }
}

impl fmt::Display for CollisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects which source files take part in an unpack run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackFilter {
    pub af: Option<MeasurementAf>,
    pub measurement_type: Option<MeasurementType>,
    /// Files starting at or after this date
    pub start_date: Option<DateTime<Utc>>,
    /// Files stopping at or before this date
    pub stop_date: Option<DateTime<Utc>>,
}

impl UnpackFilter {
    pub fn matches(&self, meta: &ResultsMeta) -> bool {
        self.af.map_or(true, |af| meta.af == af)
            && self.measurement_type.map_or(true, |t| meta.measurement_type == t)
            && self.start_date.map_or(true, |d| meta.start_date() >= d)
            && self.stop_date.map_or(true, |d| meta.stop_date() <= d)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub measurements: usize,
    /// Records appended to outputs
    pub records: u64,
    pub pairs_written: usize,
    pub pairs_skipped: usize,
    /// Measurements whose processing failed
    pub failed: usize,
}

impl UnpackStats {
    fn merge(&mut self, other: UnpackStats) {
        self.measurements += other.measurements;
        self.records += other.records;
        self.pairs_written += other.pairs_written;
        self.pairs_skipped += other.pairs_skipped;
        self.failed += other.failed;
    }
}

/// `<src>_pairs`, next to `src`
pub fn default_destination(src: &Path) -> PathBuf {
    let mut name = src
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "results".into());
    name.push("_pairs");
    match src.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Debug, Clone)]
pub struct Repartitioner {
    src: PathBuf,
    dst: PathBuf,
    mode: CollisionMode,
    window_size: usize,
    compressed: bool,
    filter: UnpackFilter,
    dictionary: Option<Dictionary>,
}

impl Repartitioner {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            mode: CollisionMode::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            compressed: false,
            filter: UnpackFilter::default(),
            dictionary: None,
        }
    }

    pub fn with_mode(mut self, mode: CollisionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    /// Write `.ndjson.zst` outputs instead of `.ndjson`
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_filter(mut self, filter: UnpackFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Dictionary used both to read compressed sources and write compressed outputs
    pub fn with_dictionary(mut self, dictionary: Option<Dictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.dst
    }

    /// Output file of a pair
    pub fn output_path(&self, key: RecordKey) -> PathBuf {
        let ext = if self.compressed { "ndjson.zst" } else { "ndjson" };
        self.dst.join(format!("{}.{}", key.stem(), ext))
    }

    /// Source files by measurement id, each list sorted by start time.
    pub fn index_sources(&self) -> Result<BTreeMap<u64, Vec<ResultsMeta>>> {
        let mut index: BTreeMap<u64, Vec<ResultsMeta>> = BTreeMap::new();
        for path in glob_files(&self.src, "*.ndjson*")? {
            if path.to_string_lossy().ends_with(INDEX_SUFFIX) {
                continue;
            }
            match ResultsMeta::from_filename(&path) {
                Ok(meta) if self.filter.matches(&meta) => {
                    index.entry(meta.msm_id).or_default().push(meta)
                }
                Ok(_) => tracing::debug!("Filtered out {:?}", path),
                Err(e) => tracing::warn!("Ignoring unknown file {:?}: {}", path, e),
            }
        }
        for metas in index.values_mut() {
            metas.sort_by_key(|m| m.start_timestamp());
        }
        Ok(index)
    }

    /// Repartition every indexed measurement, `scheduler` bounding how many
    /// run at once.
    pub async fn run(&self, scheduler: &JobScheduler) -> Result<UnpackStats> {
        std::fs::create_dir_all(&self.dst)?;
        let sources = self.index_sources()?;
        tracing::info!(
            "Unpacking {} measurements from {:?} into {:?} (mode {})",
            sources.len(),
            self.src,
            self.dst,
            self.mode
        );

        let jobs: Vec<(u64, Vec<ResultsMeta>)> = sources.into_iter().collect();
        let this = Arc::new(self.clone());
        let cancel = scheduler.cancellation_token();
        let outcomes = scheduler
            .execute(
                jobs,
                |(msm_id, _)| format!("msm {}", msm_id),
                move |(_, metas)| {
                    let this = this.clone();
                    let cancel = cancel.clone();
                    async move {
                        let job = move || this.unpack_measurement(&metas, &cancel);
                        tokio::task::spawn_blocking(job)
                            .await
                            .map_err(|e| PipelineError::Panicked(e.to_string()))?
                    }
                },
            )
            .await?;

        let mut stats = UnpackStats::default();
        for outcome in outcomes {
            match outcome {
                Ok(s) => stats.merge(s),
                Err(_) => stats.failed += 1,
            }
        }
        tracing::info!(
            "Done: {} records into {} pairs, {} pairs skipped, {} measurements failed",
            stats.records,
            stats.pairs_written,
            stats.pairs_skipped,
            stats.failed
        );
        Ok(stats)
    }

    /// Repartition the files of one measurement. Blocking.
    pub fn unpack_measurement(
        &self,
        metas: &[ResultsMeta],
        cancel: &CancellationToken,
    ) -> Result<UnpackStats> {
        let mut files: Vec<&ResultsMeta> = metas.iter().collect();
        files.sort_by_key(|m| m.start_timestamp());

        // Files are opened one at a time as the stream reaches them; the
        // first one that cannot be opened fails the measurement.
        let options = ReaderOptions::new().with_dictionary(self.dictionary.clone());
        let paths = files.iter().map(|meta| self.src.join(meta.filename()));
        let open_error: Cell<Option<StoreError>> = Cell::new(None);
        let keyed = read_all(paths, options)
            .map_while(|item| match item {
                Ok(record) => Some(record),
                Err(e) => {
                    open_error.set(Some(e));
                    None
                }
            })
            .filter_map(|record| RecordKey::extract(&record).map(|key| (key, record)));

        let mut seen: HashSet<RecordKey> = HashSet::new();
        let mut skipped: HashSet<RecordKey> = HashSet::new();
        let mut stats = UnpackStats {
            measurements: 1,
            ..Default::default()
        };

        let batches = keyed.partition_stream(|item: &(RecordKey, Record)| item.0, self.window_size);
        for (key, batch) in batches {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if let Some(e) = open_error.take() {
                return Err(e.into());
            }

            let path = self.output_path(key);
            if seen.insert(key) {
                match self.mode {
                    CollisionMode::Append => {}
                    CollisionMode::Overwrite => remove_store(&path)?,
                    CollisionMode::Skip => {
                        if path.exists() {
                            tracing::debug!("{:?} exists, skipping pair {}", path, key);
                            skipped.insert(key);
                        }
                    }
                }
            }
            if skipped.contains(&key) {
                continue;
            }

            let options = WriterOptions::new()
                .mode(WriteMode::Append)
                .compressed(self.compressed)
                .with_dictionary(self.dictionary.clone());
            let (written, _) = RecordWriter::scoped(&path, options, |writer| {
                writer.write_all(batch.iter().map(|(_, record)| record))
            })?;
            stats.records += written;
        }

        if let Some(e) = open_error.take() {
            return Err(e.into());
        }

        stats.pairs_written = seen.len() - skipped.len();
        stats.pairs_skipped = skipped.len();
        tracing::debug!(
            "Measurement {:?}: {} records, {} pairs",
            metas.first().map(|m| m.msm_id),
            stats.records,
            stats.pairs_written
        );
        Ok(stats)
    }
}
