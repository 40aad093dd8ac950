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

//! Per-job fetch and persist
//!
//! A job downloads one results window into one store file. Existing files
//! are considered done, so an interrupted run can simply be restarted.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use meshfetch_atlas::RemoteClient;
use meshfetch_core::{
    FetchJob, MeasurementAf, MeasurementType, ProbeIdFilter, Record, ResultsMeta, RetryPolicy,
};
use meshfetch_storage::{Dictionary, RecordWriter, WriterOptions, WriterStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What happened to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Fetched { path: PathBuf, stats: WriterStats },
    /// The target file already existed
    Skipped { path: PathBuf },
}

/// A measurement to fetch results for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementRef {
    pub af: MeasurementAf,
    pub measurement_type: MeasurementType,
    pub msm_id: u64,
}

impl MeasurementRef {
    pub fn new(af: MeasurementAf, measurement_type: MeasurementType, msm_id: u64) -> Self {
        Self {
            af,
            measurement_type,
            msm_id,
        }
    }
}

/// Build one job per measurement and time window.
///
/// Without `split`, each measurement gets a single window `[start, stop)`.
pub fn plan_jobs(
    measurements: &[MeasurementRef],
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    split: Option<Duration>,
    probes: &[u64],
    compressed: bool,
) -> Result<Vec<FetchJob>> {
    let mut jobs = Vec::new();
    for m in measurements {
        let meta = ResultsMeta::new(m.af, m.measurement_type, m.msm_id, start, stop, compressed)?;
        let windows = match split {
            Some(step) => meta.split(step)?,
            None => vec![meta],
        };
        jobs.extend(windows.into_iter().map(|w| FetchJob::new(w, probes.to_vec())));
    }
    Ok(jobs)
}

/// Fetches jobs into an output directory
#[derive(Clone)]
pub struct Fetcher {
    client: RemoteClient,
    dir: PathBuf,
    retry: RetryPolicy,
    dictionary: Option<Dictionary>,
}

impl Fetcher {
    pub fn new(client: RemoteClient, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
            retry: RetryPolicy::default(),
            dictionary: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dictionary(mut self, dictionary: Option<Dictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn target_path(&self, job: &FetchJob) -> PathBuf {
        self.dir.join(job.meta.filename())
    }

    /// Fetch one job, retrying read timeouts.
    pub async fn fetch(&self, job: &FetchJob) -> Result<JobOutcome> {
        let path = self.target_path(job);
        if path.exists() {
            tracing::debug!("{:?} already exists, skipping", path);
            return Ok(JobOutcome::Skipped { path });
        }

        let target = path.as_path();
        self.retry
            .execute(
                |attempt| {
                    if attempt > 1 {
                        tracing::info!("Retrying {} (attempt {})", job.meta, attempt);
                    }
                    self.fetch_once(job, target)
                },
                PipelineError::is_timeout,
            )
            .await
    }

    async fn fetch_once(&self, job: &FetchJob, path: &Path) -> Result<JobOutcome> {
        let mut options = WriterOptions::new()
            .compressed(job.meta.compressed)
            .with_dictionary(self.dictionary.clone());
        if !job.probes.is_empty() {
            let filter = ProbeIdFilter::new(job.probes.iter().copied());
            options = options.with_filter(Arc::new(filter));
        }

        let mut results = self.client.fetch_results(&job.meta, &job.probes).await?;

        // Encoding and file I/O run on a blocking thread fed by the download.
        let (tx, rx) = mpsc::channel(WRITE_QUEUE);
        let target = path.to_path_buf();
        let writer = tokio::task::spawn_blocking(move || write_records(target, options, rx));

        let mut streamed = Ok(());
        while let Some(record) = results.next().await {
            match record {
                Ok(record) => {
                    // A closed channel means the writer failed; its error is reported below.
                    if tx.send(WriteMsg::Record(record)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    streamed = Err(PipelineError::from(e));
                    break;
                }
            }
        }
        if streamed.is_ok() {
            let _ = tx.send(WriteMsg::Finish).await;
        }
        drop(tx);

        // The writer has removed any partial file by the time it returns.
        let written = writer
            .await
            .map_err(|e| PipelineError::Panicked(e.to_string()))?;
        streamed?;
        let stats = written?;

        tracing::debug!("Fetched {} ({} records)", job.meta, stats.written);
        Ok(JobOutcome::Fetched {
            path: path.to_path_buf(),
            stats,
        })
    }
}

/// Records queued between the download and the writer thread
const WRITE_QUEUE: usize = 1024;

enum WriteMsg {
    Record(Record),
    /// The download completed; commit the store.
    Finish,
}

/// Drain `rx` into a new store. Blocking.
///
/// If the channel closes without [`WriteMsg::Finish`], the writer is dropped
/// and the partial store removed.
fn write_records(
    path: PathBuf,
    options: WriterOptions,
    mut rx: mpsc::Receiver<WriteMsg>,
) -> Result<WriterStats> {
    let mut writer = RecordWriter::open(&path, options)?;
    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriteMsg::Record(record) => {
                writer.write(&record)?;
            }
            WriteMsg::Finish => return Ok(writer.finish()?),
        }
    }
    tracing::debug!("Download of {:?} ended early, discarding", path);
    Err(PipelineError::Cancelled)
}
