//! Bounded concurrent execution of plugin jobs

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, PluginResult};

/// Runs jobs concurrently, at most `max_concurrent` at a time.
///
/// Cancelling the pool stops jobs that have not started yet; they report
/// [`PluginError::Cancelled`]. Jobs already running are left to finish.
#[derive(Debug, Clone)]
pub struct BuildPool {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl BuildPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            cancel: CancellationToken::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop handing out work
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every job and wait for all of them. Results are returned in job
    /// order.
    pub async fn run<F, Fut>(&self, step: &'static str, jobs: Vec<(String, F)>) -> Vec<PluginResult<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        let mut aliases = Vec::with_capacity(jobs.len());
        let mut handles = Vec::with_capacity(jobs.len());

        for (alias, job) in jobs {
            let semaphore = self.semaphore.clone();
            let cancel = self.cancel.clone();
            let task_alias = alias.clone();
            aliases.push(alias);

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let Some(_permit) = permit else {
                    tracing::debug!(target: "plugin_pool", alias = %task_alias, "Job cancelled before start");
                    return Err(PluginError::Cancelled {
                        alias: task_alias,
                        step,
                    });
                };

                // Cancelled while waiting for the permit
                if cancel.is_cancelled() {
                    return Err(PluginError::Cancelled {
                        alias: task_alias,
                        step,
                    });
                }

                tracing::debug!(target: "plugin_pool", alias = %task_alias, "Job started");
                job().await
            });

            handles.push(handle);
        }

        // Wait for all jobs to complete
        join_all(handles)
            .await
            .into_iter()
            .zip(aliases)
            .map(|(joined, alias)| match joined {
                Ok(result) => result,
                Err(join_error) => Err(PluginError::TaskFailed {
                    alias,
                    reason: join_error.to_string(),
                }),
            })
            .collect()
    }
}

impl Default for BuildPool {
    fn default() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}
