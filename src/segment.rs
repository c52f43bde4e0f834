//! Range planning, partial-state reconciliation and segment merging.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::MergeError;
use crate::state::PartialState;

pub const SIDECAR_SUFFIX: &str = ".part";
pub const PARTS_DIR_SUFFIX: &str = "_parts";

fn with_suffix(destination: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<destination>.part`, the single-stream working file.
pub fn sidecar_path(destination: &Path) -> PathBuf {
    with_suffix(destination, SIDECAR_SUFFIX)
}

/// `<destination>_parts/`, the multi-segment working directory.
pub fn parts_dir(destination: &Path) -> PathBuf {
    with_suffix(destination, PARTS_DIR_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub total_size: u64,
    pub range_supported: bool,
    pub segment_count: u32,
}

impl TransferPlan {
    pub fn new(total_size: u64, range_supported: bool, requested_threads: u32) -> Self {
        let segment_count = if range_supported && total_size > 0 {
            requested_threads.max(1)
        } else {
            1
        };
        Self {
            total_size,
            range_supported,
            segment_count,
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_count > 1
    }

    /// `ceil(total_size / segment_count)`
    pub fn segment_size(&self) -> u64 {
        self.total_size.div_ceil(u64::from(self.segment_count))
    }

    /// Cuts `[0, total_size)` into `segment_count` contiguous ranges. Trailing
    /// segments are empty when there are more segments than bytes.
    pub fn segments(&self, parts_dir: &Path) -> Vec<Segment> {
        let size = self.segment_size();
        (0..self.segment_count)
            .map(|index| {
                let start = (u64::from(index) * size).min(self.total_size);
                let end = (start + size).min(self.total_size);
                Segment {
                    index,
                    start,
                    len: end - start,
                    path: parts_dir.join(format!("part_{}", index)),
                }
            })
            .collect()
    }
}

/// One contiguous byte range downloaded into its own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u32,
    pub start: u64,
    pub len: u64,
    pub path: PathBuf,
}

impl Segment {
    /// Inclusive last byte. Meaningless for an empty segment.
    pub fn end(&self) -> u64 {
        (self.start + self.len).saturating_sub(1)
    }

    /// Range still missing when the segment file already holds `existing`
    /// bytes, or `None` if the segment is complete.
    pub fn remaining(&self, existing: u64) -> Option<(u64, u64)> {
        if existing >= self.len {
            return None;
        }
        Some((self.start + existing, self.end()))
    }

    pub async fn existing_len(&self) -> u64 {
        file_len(&self.path).await
    }
}

pub async fn file_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Bytes already on disk across all segments, capped per segment.
pub async fn existing_bytes(segments: &[Segment]) -> u64 {
    let mut total = 0;
    for segment in segments {
        total += segment.existing_len().await.min(segment.len);
    }
    total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartsDir {
    Fresh,
    Reused,
    /// An earlier run used a different thread count; its files were deleted.
    Invalidated { previous: Option<u32> },
}

/// Makes `dir` ready for a plan with `threads` segments. Existing segment files
/// survive only when the recorded thread count matches.
pub async fn prepare_parts_dir(dir: &Path, threads: u32) -> io::Result<PartsDir> {
    let mut outcome = PartsDir::Fresh;
    if fs::try_exists(dir).await? {
        let previous = PartialState::load(dir).await.map(|state| state.threads);
        if previous == Some(threads) {
            return Ok(PartsDir::Reused);
        }
        fs::remove_dir_all(dir).await?;
        outcome = PartsDir::Invalidated { previous };
    }
    fs::create_dir_all(dir).await?;
    PartialState { threads }.store(dir).await?;
    Ok(outcome)
}

/// Concatenates every segment into `destination` in index order, deleting each
/// segment file once copied and finally the parts directory. Refuses to touch
/// anything while a segment is incomplete.
pub async fn merge_segments(
    segments: &[Segment],
    destination: &Path,
    parts_dir: &Path,
) -> Result<u64, MergeError> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|segment| segment.index);

    for segment in &ordered {
        let actual = segment.existing_len().await;
        if actual != segment.len {
            return Err(MergeError::Incomplete {
                index: segment.index,
                expected: segment.len,
                actual,
            });
        }
    }

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| MergeError::Io { path, source }
    };

    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(destination)
        .await
        .map_err(io_err(destination))?;

    let mut written = 0;
    for segment in ordered {
        if segment.len > 0 {
            let mut input = File::open(&segment.path)
                .await
                .map_err(io_err(&segment.path))?;
            written += tokio::io::copy(&mut input, &mut output)
                .await
                .map_err(io_err(destination))?;
        }
        match fs::remove_file(&segment.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(io_err(&segment.path)(e));
            }
            _ => {}
        }
    }
    output.flush().await.map_err(io_err(destination))?;
    output.sync_all().await.map_err(io_err(destination))?;
    drop(output);

    fs::remove_dir_all(parts_dir)
        .await
        .map_err(io_err(parts_dir))?;
    Ok(written)
}
