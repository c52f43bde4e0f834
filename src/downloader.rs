use std::io;
use std::path::Path;
use tokio::fs;
use tokio::task::JoinSet;

use crate::error::{DownloadError, FetchError};
use crate::fetch::Fetcher;
use crate::progress::{DownloadStatus, ProgressBoard};
use crate::providers::DownloadRequest;
use crate::segment::{
    existing_bytes, file_len, merge_segments, parts_dir, prepare_parts_dir, sidecar_path,
    PartsDir, TransferPlan,
};

/// How a logical download ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    AlreadyDownloaded,
}

/// Drives downloads one at a time: probe, then a single stream or a set of
/// concurrent segment fetches, then merge.
pub struct Downloader {
    fetcher: Fetcher,
    board: ProgressBoard,
    threads: u32,
}

fn display_name(destination: &Path) -> String {
    destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| destination.display().to_string())
}

async fn remove_stale_file(path: &Path) -> Result<(), DownloadError> {
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale sidecar");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::filesystem(path, e)),
    }
}

async fn remove_stale_dir(path: &Path) -> Result<(), DownloadError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale parts directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::filesystem(path, e)),
    }
}

impl Downloader {
    pub fn new(fetcher: Fetcher, board: ProgressBoard, threads: u32) -> Self {
        Self {
            fetcher,
            board,
            threads: threads.max(1),
        }
    }

    /// Attempts every request in order. A failed download is logged and marked
    /// as such; it never stops the queue.
    pub async fn run_queue(&self, requests: &[DownloadRequest]) {
        for request in requests {
            match self.download_file(request).await {
                Ok(outcome) => tracing::info!(
                    file = %request.destination.display(),
                    ?outcome,
                    "download finished"
                ),
                Err(e) => {
                    self.mark_failed(&request.destination);
                    tracing::error!(
                        "Failed to download {} ({}): {}",
                        request.destination.display(),
                        request.locator,
                        e
                    );
                }
            }
        }
    }

    fn mark_failed(&self, destination: &Path) {
        match self.board.get(destination) {
            Some(handle) => handle.set_status(DownloadStatus::Error),
            None => {
                self.board
                    .create(destination, display_name(destination), 0, 0, DownloadStatus::Error);
            }
        }
    }

    pub async fn download_file(&self, request: &DownloadRequest) -> Result<Outcome, DownloadError> {
        let url = request.locator.as_str();
        let destination = request.destination.as_path();
        let name = display_name(destination);

        tracing::debug!(%url, "probing");
        let probe = self.fetcher.probe(url).await?;

        if let Ok(metadata) = fs::metadata(destination).await {
            if metadata.is_file() && metadata.len() == probe.total_size {
                self.board.create(
                    destination,
                    name,
                    probe.total_size,
                    probe.total_size,
                    DownloadStatus::AlreadyDownloaded,
                );
                return Ok(Outcome::AlreadyDownloaded);
            }
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::filesystem(parent, e))?;
        }

        let plan = TransferPlan::new(probe.total_size, probe.range_supported, self.threads);
        tracing::debug!(?plan, "planned transfer");
        if plan.is_segmented() {
            self.download_segmented(url, destination, name, &plan).await
        } else {
            self.download_single(url, destination, name, &plan).await
        }
    }

    /// `<destination>.part` with append-resume, renamed into place at the end.
    async fn download_single(
        &self,
        url: &str,
        destination: &Path,
        name: String,
        plan: &TransferPlan,
    ) -> Result<Outcome, DownloadError> {
        remove_stale_dir(&parts_dir(destination)).await?;

        let sidecar = sidecar_path(destination);
        let mut existing = file_len(&sidecar).await;
        let resumable = plan.range_supported && plan.total_size > 0 && existing <= plan.total_size;
        if existing > 0 && !resumable {
            tracing::debug!(existing, "sidecar cannot be resumed, starting over");
            remove_stale_file(&sidecar).await?;
            existing = 0;
        }

        let handle = self.board.create(
            destination,
            name,
            plan.total_size,
            existing,
            DownloadStatus::Downloading,
        );

        if plan.total_size == 0 || existing < plan.total_size {
            self.fetcher
                .fetch_stream(url, &sidecar, existing, &handle)
                .await?;
        }

        let on_disk = file_len(&sidecar).await;
        if plan.total_size > 0 && on_disk != plan.total_size {
            return Err(FetchError::ShortBody {
                index: 0,
                expected: plan.total_size,
                received: on_disk,
            }
            .into());
        }

        fs::rename(&sidecar, destination)
            .await
            .map_err(|e| DownloadError::filesystem(destination, e))?;
        handle.set_status(DownloadStatus::Completed);
        Ok(Outcome::Completed)
    }

    /// One task per segment into `<destination>_parts/`, then merge.
    async fn download_segmented(
        &self,
        url: &str,
        destination: &Path,
        name: String,
        plan: &TransferPlan,
    ) -> Result<Outcome, DownloadError> {
        remove_stale_file(&sidecar_path(destination)).await?;

        let dir = parts_dir(destination);
        let parts = prepare_parts_dir(&dir, plan.segment_count)
            .await
            .map_err(|e| DownloadError::filesystem(&dir, e))?;
        let segments = plan.segments(&dir);
        let initial = existing_bytes(&segments).await;

        let handle = match parts {
            PartsDir::Invalidated { previous } => {
                tracing::warn!(
                    "Threads changed for {} ({:?} -> {}), cleared partial segments",
                    name,
                    previous,
                    plan.segment_count
                );
                self.board.create(
                    destination,
                    name,
                    plan.total_size,
                    initial,
                    DownloadStatus::ThreadsChanged,
                )
            }
            PartsDir::Fresh | PartsDir::Reused => self.board.create(
                destination,
                name,
                plan.total_size,
                initial,
                DownloadStatus::Downloading,
            ),
        };

        let mut tasks = JoinSet::new();
        for segment in segments.iter().cloned() {
            let fetcher = self.fetcher.clone();
            let url = url.to_string();
            let handle = handle.clone();
            tasks.spawn(async move { fetcher.fetch_segment(&url, &segment, &handle).await });
        }
        // Returning early drops the set, which aborts the segments still running.
        while let Some(joined) = tasks.join_next().await {
            joined??;
        }

        handle.set_status(DownloadStatus::Merging);
        merge_segments(&segments, destination, &dir).await?;
        handle.set_status(DownloadStatus::Completed);
        Ok(Outcome::Completed)
    }
}
