//! Shared progress accounting for logical downloads.
//!
//! Every download owns one [`ProgressRecord`] behind a mutex. Segment fetchers
//! push byte deltas, the orchestrator moves the status forward and the console
//! reads [`ProgressSnapshot`]s. Each mutation wakes the renderer through a
//! shared [`Notify`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Minimum gap between two throughput samples.
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Merging,
    Completed,
    AlreadyDownloaded,
    Error,
    ThreadsChanged,
}

impl DownloadStatus {
    pub fn label(self) -> &'static str {
        match self {
            DownloadStatus::Downloading => "Downloading",
            DownloadStatus::Merging => "Merging",
            DownloadStatus::Completed => "Completed",
            DownloadStatus::AlreadyDownloaded => "Already done",
            DownloadStatus::Error => "Error",
            DownloadStatus::ThreadsChanged => "Threads changed",
        }
    }

    /// Finished successfully; these rows sink to the bottom of the display.
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::AlreadyDownloaded
        )
    }

    /// Still doing work, so the row gets a spinner.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DownloadStatus::Downloading | DownloadStatus::Merging | DownloadStatus::ThreadsChanged
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct ProgressRecord {
    filename: String,
    status: DownloadStatus,
    total_bytes: u64,
    current_bytes: u64,
    speed: f64,
    start_time: Instant,
    last_sample_time: Instant,
    last_sample_bytes: u64,
}

impl ProgressRecord {
    fn new(filename: String, total: u64, initial: u64, status: DownloadStatus, now: Instant) -> Self {
        Self {
            filename,
            status,
            total_bytes: total,
            current_bytes: initial,
            speed: 0.0,
            start_time: now,
            last_sample_time: now,
            last_sample_bytes: initial,
        }
    }

    fn add_bytes_at(&mut self, delta: u64, now: Instant) {
        self.current_bytes = self.current_bytes.saturating_add(delta);
        if self.status == DownloadStatus::ThreadsChanged {
            self.status = DownloadStatus::Downloading;
        }
        self.sample_speed_at(now);
    }

    fn sample_speed_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed < SPEED_SAMPLE_INTERVAL {
            return;
        }
        let transferred = self.current_bytes - self.last_sample_bytes;
        self.speed = transferred as f64 / elapsed.as_secs_f64();
        self.last_sample_bytes = self.current_bytes;
        self.last_sample_time = now;
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            filename: self.filename.clone(),
            status: self.status,
            total_bytes: self.total_bytes,
            current_bytes: self.current_bytes,
            speed: self.speed,
            elapsed: self.start_time.elapsed(),
        }
    }
}

/// Read-only copy of a record, taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub filename: String,
    pub status: DownloadStatus,
    pub total_bytes: u64,
    pub current_bytes: u64,
    pub speed: f64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.status.is_completed() { 1.0 } else { 0.0 };
        }
        (self.current_bytes as f64 / self.total_bytes as f64).min(1.0)
    }
}

/// Cloneable handle to one record. All mutations on a record are serialized.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    record: Arc<Mutex<ProgressRecord>>,
    notify: Arc<Notify>,
}

impl ProgressHandle {
    fn lock(&self) -> MutexGuard<'_, ProgressRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_bytes(&self, delta: u64) {
        self.add_bytes_at(delta, Instant::now());
    }

    pub fn add_bytes_at(&self, delta: u64, now: Instant) {
        if delta == 0 {
            return;
        }
        self.lock().add_bytes_at(delta, now);
        self.notify.notify_one();
    }

    pub fn set_status(&self, status: DownloadStatus) {
        {
            let mut record = self.lock();
            if record.status == status {
                return;
            }
            record.status = status;
        }
        self.notify.notify_one();
    }

    pub fn sample_speed(&self) {
        self.sample_speed_at(Instant::now());
    }

    pub fn sample_speed_at(&self, now: Instant) {
        self.lock().sample_speed_at(now);
    }

    pub fn status(&self) -> DownloadStatus {
        self.lock().status
    }

    pub fn current_bytes(&self) -> u64 {
        self.lock().current_bytes
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }
}

/// Totals over every record on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardSummary {
    pub completed: usize,
    pub already_downloaded: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub bytes: u64,
}

/// Registry of every logical download started in this process.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    records: Arc<Mutex<Vec<(PathBuf, ProgressHandle)>>>,
    notify: Arc<Notify>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a download keyed by its destination. A second `create` for the
    /// same destination replaces the earlier record.
    pub fn create(
        &self,
        destination: &Path,
        name: impl Into<String>,
        total: u64,
        initial: u64,
        status: DownloadStatus,
    ) -> ProgressHandle {
        let handle = ProgressHandle {
            record: Arc::new(Mutex::new(ProgressRecord::new(
                name.into(),
                total,
                initial,
                status,
                Instant::now(),
            ))),
            notify: self.notify.clone(),
        };
        {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            match records.iter_mut().find(|(key, _)| key == destination) {
                Some(slot) => slot.1 = handle.clone(),
                None => records.push((destination.to_path_buf(), handle.clone())),
            }
        }
        self.notify.notify_one();
        handle
    }

    pub fn get(&self, destination: &Path) -> Option<ProgressHandle> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .find(|(key, _)| key == destination)
            .map(|(_, handle)| handle.clone())
    }

    fn handles(&self) -> Vec<ProgressHandle> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().map(|(_, handle)| handle.clone()).collect()
    }

    /// Takes the record list lock only long enough to clone the handles, so a
    /// snapshot never holds two locks at once.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.handles().iter().map(ProgressHandle::snapshot).collect()
    }

    /// Renderer tick: lets a stalled transfer's speed decay towards zero.
    pub fn sample_all(&self) {
        for handle in self.handles() {
            handle.sample_speed();
        }
    }

    pub fn summary(&self) -> BoardSummary {
        let mut summary = BoardSummary::default();
        for snapshot in self.snapshots() {
            match snapshot.status {
                DownloadStatus::Completed => {
                    summary.completed += 1;
                    summary.bytes += snapshot.current_bytes;
                }
                DownloadStatus::AlreadyDownloaded => summary.already_downloaded += 1,
                DownloadStatus::Error => summary.failed += 1,
                _ => summary.in_progress += 1,
            }
        }
        summary
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(board: &ProgressBoard, name: &str, total: u64) -> ProgressHandle {
        board.create(Path::new(name), name, total, 0, DownloadStatus::Downloading)
    }

    #[test]
    fn concurrent_updates_sum_exactly() {
        let board = ProgressBoard::new();
        let handle = record(&board, "big.bin", 4000);

        let threads: Vec<_> = (0..4u64)
            .map(|worker| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    let mut remaining = 1000u64;
                    let mut step = worker + 1;
                    while remaining > 0 {
                        let chunk = (step % 37 + 1).min(remaining);
                        handle.add_bytes(chunk);
                        remaining -= chunk;
                        step = (step * 7 + 3) % 1009;
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(handle.current_bytes(), 4000);
        assert_eq!(board.snapshots()[0].current_bytes, 4000);
    }

    fn fresh(total: u64, initial: u64, start: Instant) -> ProgressRecord {
        ProgressRecord::new("r".into(), total, initial, DownloadStatus::Downloading, start)
    }

    #[test]
    fn speed_waits_for_half_a_second() {
        let start = Instant::now();
        let mut record = fresh(10_000, 0, start);

        record.add_bytes_at(1000, start + Duration::from_millis(200));
        assert_eq!(record.speed, 0.0);

        record.add_bytes_at(1000, start + Duration::from_millis(500));
        // 2000 bytes over 0.5 s
        assert!((record.speed - 4000.0).abs() < 1e-6);

        record.add_bytes_at(500, start + Duration::from_millis(700));
        assert!((record.speed - 4000.0).abs() < 1e-6);

        record.sample_speed_at(start + Duration::from_millis(1500));
        assert!((record.speed - 500.0).abs() < 1e-6);
    }

    #[test]
    fn stalled_transfer_decays_to_zero() {
        let start = Instant::now();
        let mut record = fresh(10_000, 0, start);

        record.add_bytes_at(5000, start + Duration::from_secs(1));
        assert!((record.speed - 5000.0).abs() < 1e-6);

        record.sample_speed_at(start + Duration::from_secs(2));
        assert_eq!(record.speed, 0.0);
    }

    #[test]
    fn initial_bytes_do_not_count_towards_speed() {
        let start = Instant::now();
        let mut record = fresh(10_000, 6000, start);
        record.sample_speed_at(start + Duration::from_secs(1));
        assert_eq!(record.speed, 0.0);
        assert_eq!(record.current_bytes, 6000);
    }

    #[test]
    fn threads_changed_clears_on_first_bytes() {
        let board = ProgressBoard::new();
        let handle = board.create(
            Path::new("restart"),
            "restart",
            100,
            0,
            DownloadStatus::ThreadsChanged,
        );
        handle.add_bytes(0);
        assert_eq!(handle.status(), DownloadStatus::ThreadsChanged);

        handle.add_bytes(10);
        assert_eq!(handle.status(), DownloadStatus::Downloading);
    }

    #[test]
    fn create_replaces_record_for_same_destination() {
        let board = ProgressBoard::new();
        let first = record(&board, "same", 10);
        first.set_status(DownloadStatus::ThreadsChanged);
        let second = record(&board, "same", 10);

        assert_eq!(board.snapshots().len(), 1);
        assert_eq!(second.status(), DownloadStatus::Downloading);
        assert_eq!(
            board.get(Path::new("same")).unwrap().status(),
            DownloadStatus::Downloading
        );
    }

    #[test]
    fn summary_counts_by_status() {
        let board = ProgressBoard::new();
        let done = record(&board, "done", 100);
        done.add_bytes(100);
        done.set_status(DownloadStatus::Completed);
        record(&board, "skip", 5).set_status(DownloadStatus::AlreadyDownloaded);
        record(&board, "bad", 5).set_status(DownloadStatus::Error);
        record(&board, "busy", 5);

        let summary = board.summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.already_downloaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.bytes, 100);
    }

    #[test]
    fn fraction_handles_unknown_size() {
        let board = ProgressBoard::new();
        let handle = record(&board, "zero", 0);
        assert_eq!(handle.snapshot().fraction(), 0.0);
        handle.set_status(DownloadStatus::Completed);
        assert_eq!(handle.snapshot().fraction(), 1.0);
    }

    #[tokio::test]
    async fn updates_wake_the_renderer() {
        let board = ProgressBoard::new();
        let notify = board.notifier();
        let handle = record(&board, "n", 10);
        // Drain the permit stored by `create`.
        notify.notified().await;

        handle.add_bytes(3);
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("byte update should notify");
    }
}
