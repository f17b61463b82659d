//! Concurrent artifact downloads.
//!
//! The [`Fetcher`] pulls one or more URLs into a destination directory on a
//! bounded pool of tokio tasks, backing up any file it would overwrite and
//! reporting per-transfer progress. Cancellation is cooperative through a
//! [`CancelToken`] handed in at batch start; the first failing transfer
//! trips the same token so its siblings wind down before the batch returns.

mod backup;
mod cancel;

pub use backup::take_backup;
pub use cancel::CancelToken;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cli::ProgressManager;
use crate::http::HttpClient;
use crate::{Result, ShiprError};

/// Number of transfers allowed to run at once.
pub const DEFAULT_WORKERS: usize = 4;

/// Bytes written between progress updates and cancellation checks.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// State of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// One in-flight or finished transfer. Owned by the worker that runs it;
/// nothing else mutates it.
#[derive(Debug)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    /// Total size from the Content-Length header, unknown until (and unless)
    /// the response supplies one.
    pub total: Option<u64>,
    pub transferred: u64,
    pub state: TaskState,
}

impl DownloadTask {
    fn new(url: &str, dest: PathBuf) -> Self {
        Self {
            url: url.to_string(),
            dest,
            total: None,
            transferred: 0,
            state: TaskState::Running,
        }
    }
}

/// Downloads batches of URLs with bounded concurrency.
#[derive(Clone)]
pub struct Fetcher {
    http: Arc<HttpClient>,
    progress: Arc<ProgressManager>,
    workers: usize,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(http: Arc<HttpClient>, progress: Arc<ProgressManager>) -> Self {
        Self {
            http,
            progress,
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Download every URL into `dest_dir`, at most [`DEFAULT_WORKERS`] at a
    /// time. Existing destination files are backed up first.
    ///
    /// There is no completion order across URLs. The call returns once every
    /// submitted transfer has finished: on the first failure the batch trips
    /// `cancel` so the remaining workers stop at their next chunk boundary,
    /// waits for all of them, and then reports that first error.
    pub async fn download_batch(
        &self,
        urls: &[String],
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for url in urls {
            let fetcher = self.clone();
            let url = url.clone();
            let dest_dir = dest_dir.to_path_buf();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                // A closed semaphore is impossible here; treat it as cancellation.
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return Ok(()),
                };
                fetcher.fetch_one(&url, &dest_dir, &cancel).await.map(|_| ())
            });
        }

        let mut first_error: Option<ShiprError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ShiprError::DownloadFailed {
                    url: "<worker>".to_string(),
                    reason: e.to_string(),
                }),
            };
            if let Err(e) = result {
                log::error!("Download failed: {}", e);
                if first_error.is_none() {
                    // Stop the siblings, then keep joining so nothing leaks
                    // past this call.
                    cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Download a single URL into `dest_dir`, returning the finished task
    /// record. The destination filename is the last URL path segment.
    pub async fn fetch_one(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<DownloadTask> {
        let filename = remote_filename(url)?;
        let dest = take_backup(&dest_dir.join(&filename))?;

        let bar = self.progress.create_download_bar(&filename);
        let mut task = DownloadTask::new(url, dest);

        let outcome = self
            .http
            .download(url, &task.dest, self.chunk_size, cancel, |transferred, total| {
                if let Some(total) = total {
                    bar.set_length(total);
                }
                bar.set_position(transferred);
            })
            .await;

        match outcome {
            Ok(transferred) => {
                task.transferred = transferred;
                task.total = bar.length().filter(|len| *len > 0);
                if cancel.is_cancelled() {
                    task.state = TaskState::Cancelled;
                    bar.abandon();
                } else {
                    task.state = TaskState::Completed;
                    bar.finish();
                }
                Ok(task)
            }
            Err(e) => {
                task.state = TaskState::Failed;
                bar.abandon();
                Err(ShiprError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Last path segment of a URL, used as the local filename.
pub fn remote_filename(url: &str) -> Result<String> {
    let rest = url.splitn(2, "://").nth(1).unwrap_or(url);
    let name = match rest.find('/') {
        Some(idx) => rest[idx + 1..].rsplit('/').next().unwrap_or(""),
        None => "",
    };
    if name.is_empty() || name.contains('?') {
        return Err(ShiprError::DownloadFailed {
            url: url.to_string(),
            reason: "URL has no usable filename".to_string(),
        });
    }
    Ok(name.to_string())
}
