//! Error taxonomy for the download engine.
//!
//! Every per-download failure is one of [`ProbeError`], [`FetchError`],
//! [`MergeError`] or a filesystem error, wrapped in [`DownloadError`] at the
//! orchestrator boundary. [`ConfigError`] is fatal and stops the process before
//! the first download starts.

use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Metadata request for a locator failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata request returned HTTP {0}")]
    Status(StatusCode),
}

/// A ranged or full-body transfer failed. Temp files keep whatever was flushed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(StatusCode),

    #[error("reading response body: {0}")]
    Body(#[source] std::io::Error),

    /// Asked for a byte range, got the whole resource back.
    #[error("server ignored range request for segment {index} (HTTP 200 instead of 206)")]
    RangeIgnored { index: u32 },

    /// Body ended before the requested range was delivered.
    #[error("short body for segment {index}: expected {expected} bytes, received {received}")]
    ShortBody {
        index: u32,
        expected: u64,
        received: u64,
    },

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Segments could not be concatenated into the destination.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("segment {index} is incomplete: {actual} of {expected} bytes on disk")]
    Incomplete {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("merging into {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one logical download. Never propagates past a single queue item.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DownloadError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Invalid command-line input. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    Exclude {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("unrecognised download target {0:?}: expected a gofile.io/d/ URL, a content id or an http(s) URL")]
    Target(String),

    #[error("failed to create base output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
