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

//! Job scheduler
//!
//! Runs independent jobs with bounded concurrency on a [`JoinSet`]. A failed
//! or panicked job is logged and counted; its siblings keep running and
//! every job is drained. Cancellation (the token, or Ctrl-C when enabled)
//! aborts every in-flight job and the run returns
//! [`PipelineError::Cancelled`].

use crate::error::{PipelineError, Result};
use crate::fetcher::{Fetcher, JobOutcome};
use meshfetch_core::{error_chain, FetchJob};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Counts of a fetch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.fetched + self.skipped + self.failed
    }
}

#[derive(Debug, Clone)]
pub struct JobScheduler {
    concurrency: usize,
    cancel: CancellationToken,
    ctrl_c: bool,
}

impl JobScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
            ctrl_c: false,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancel the run on Ctrl-C
    pub fn with_ctrl_c(mut self) -> Self {
        self.ctrl_c = true;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch every job and summarize the outcomes.
    pub async fn run(&self, fetcher: Arc<Fetcher>, jobs: Vec<FetchJob>) -> Result<RunSummary> {
        tracing::info!(
            "Fetching {} jobs into {:?} ({} workers)",
            jobs.len(),
            fetcher.dir(),
            self.concurrency
        );

        let outcomes = self
            .execute(
                jobs,
                |job| job.meta.to_string(),
                move |job| {
                    let fetcher = fetcher.clone();
                    async move { fetcher.fetch(&job).await }
                },
            )
            .await?;

        let mut summary = RunSummary::default();
        for outcome in outcomes {
            match outcome {
                Ok(JobOutcome::Fetched { .. }) => summary.fetched += 1,
                Ok(JobOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        tracing::info!(
            "Done: {} fetched, {} skipped, {} failed",
            summary.fetched,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    /// Run `work` on every item, at most `concurrency` at a time.
    ///
    /// Returns one result per item, in completion order. Only cancellation
    /// fails the whole run.
    pub async fn execute<T, O, L, F, Fut>(
        &self,
        items: Vec<T>,
        label: L,
        mut work: F,
    ) -> Result<Vec<Result<O>>>
    where
        L: Fn(&T) -> String,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for item in items {
            let name = label(&item);
            let job = work(item);
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => job.await,
                    Err(_) => Err(PipelineError::Cancelled),
                };
                (name, result)
            });
        }

        let ctrl_c = self.ctrl_c.then(|| {
            let token = self.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted");
                    token.cancel();
                }
            })
        });

        let mut outcomes = Vec::with_capacity(total);
        let mut completed = 0;
        let mut cancelled = false;
        loop {
            tokio::select! {
                joined = set.join_next() => {
                    let Some(joined) = joined else { break };
                    completed += 1;
                    match joined {
                        Ok((name, Ok(output))) => {
                            tracing::debug!("Job {} done", name);
                            outcomes.push(Ok(output));
                        }
                        Ok((name, Err(e))) => {
                            tracing::error!("Job {} failed: {}", name, error_chain(&e));
                            outcomes.push(Err(e));
                        }
                        Err(e) if e.is_cancelled() => outcomes.push(Err(PipelineError::Cancelled)),
                        Err(e) => {
                            tracing::error!("Job panicked: {}", e);
                            outcomes.push(Err(PipelineError::Panicked(e.to_string())));
                        }
                    }
                    tracing::info!("Progress: {}/{}", completed, total);
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    tracing::warn!("Cancelling {} in-flight jobs", set.len());
                    cancelled = true;
                    semaphore.close();
                    set.abort_all();
                }
            }
        }

        if let Some(listener) = ctrl_c {
            listener.abort();
        }
        if cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(outcomes)
    }
}
