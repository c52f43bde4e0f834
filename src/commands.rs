use anyhow::{Context, Result};
use indicatif::{HumanBytes, HumanDuration};
use std::time::Duration;
use tokio::fs;

use crate::config::Settings;
use crate::console::Console;
use crate::downloader::Downloader;
use crate::error::ConfigError;
use crate::fetch::Fetcher;
use crate::progress::{BoardSummary, ProgressBoard};
use crate::providers::gofile::GoFile;
use crate::providers::{direct_request, DownloadRequest, ExcludeFilter, Target};

/// Everything the user asked for, already validated.
#[derive(Debug, Clone)]
pub struct Session {
    pub target: Target,
    pub password: Option<String>,
    pub excludes: ExcludeFilter,
    /// Account token to reuse instead of creating a guest account.
    pub token: Option<String>,
}

/// Resolves the target into a queue and downloads it. Per-file failures end
/// up on the board; only setup and resolver failures are returned.
pub async fn run(
    settings: &Settings,
    session: &Session,
    board: &ProgressBoard,
    console: &Console,
) -> Result<()> {
    fs::create_dir_all(&settings.download_dir)
        .await
        .map_err(|source| ConfigError::OutputDir {
            path: settings.download_dir.clone(),
            source,
        })?;

    let client = settings.http_client();
    let (requests, token): (Vec<DownloadRequest>, Option<String>) = match &session.target {
        Target::GoFile(id) => {
            let mut gofile = GoFile::new(
                client.clone(),
                session.token.clone(),
                settings.api_base.as_str(),
                settings.site_base.as_str(),
            );
            let resolved = gofile
                .resolve(
                    id,
                    &settings.download_dir,
                    session.password.as_deref(),
                    &session.excludes,
                )
                .await;
            console.set_tokens(gofile.token(), gofile.website_token());
            let requests = resolved.with_context(|| format!("Failed to list content {}", id))?;
            (requests, gofile.token().map(str::to_string))
        }
        // The account cookie only means something to gofile's own servers.
        Target::Direct(url) => (vec![direct_request(url, &settings.download_dir)], None),
    };

    if requests.is_empty() {
        console.set_notice("No files found");
        return Ok(());
    }
    tracing::info!(
        "{} file(s) queued into {}",
        requests.len(),
        settings.download_dir.display()
    );

    let fetcher = Fetcher::new(client, token, settings.chunk_size);
    let downloader = Downloader::new(fetcher, board.clone(), settings.threads);
    downloader.run_queue(&requests).await;

    console.set_notice("All downloads completed");
    Ok(())
}

pub fn summary_line(summary: &BoardSummary, elapsed: Duration) -> String {
    let mut line = format!(
        "{} downloaded ({}), {} already present, {} failed in {}",
        summary.completed,
        HumanBytes(summary.bytes),
        summary.already_downloaded,
        summary.failed,
        HumanDuration(elapsed)
    );
    if summary.in_progress > 0 {
        line.push_str(&format!(", {} unfinished", summary.in_progress));
    }
    line
}
