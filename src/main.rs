mod cli;
mod commands;
mod config;
mod console;
mod downloader;
mod error;
mod fetch;
mod hashing;
mod logging;
mod progress;
mod providers;
mod segment;
mod state;
mod utils;

#[cfg(test)]
mod test_helpers;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use crate::cli::DisplayMode;
use crate::commands::Session;
use crate::config::Settings;
use crate::console::Console;
use crate::logging::LogPane;
use crate::progress::ProgressBoard;
use crate::providers::{ExcludeFilter, Target};

/// Exit status after Ctrl-C or SIGTERM.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// gofile.io/d/<id> link, bare content id, or any http(s) URL
    #[arg(index = 1)]
    target: String,

    /// Number of concurrent byte-range segments per file
    #[arg(short = 't', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    threads: u32,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "./output")]
    download_dir: PathBuf,

    /// Password for protected content
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Skip files whose name matches this wildcard pattern (repeatable)
    #[arg(short = 'e', long = "exclude")]
    excludes: Vec<String>,

    /// Existing account token; a guest account is created when absent
    #[arg(long, env = "GOFILE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Live progress display or plain log lines
    #[arg(long, value_enum, default_value = "auto")]
    display: DisplayMode,

    /// Debug logging for this program
    #[arg(short = 'v', long)]
    verbose: bool,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = &mut ctrl_c => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => tracing::warn!("failed to install SIGTERM handler: {}", e),
        }
    }

    if ctrl_c.await.is_err() {
        // No way to be interrupted; let the downloads run to the end.
        std::future::pending::<()>().await;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Bad arguments stop us before the terminal is touched.
    let target = Target::parse(&args.target)?;
    let excludes = ExcludeFilter::new(&args.excludes)?;

    let settings = Settings {
        download_dir: args.download_dir,
        threads: args.threads,
        display: args.display,
        verbose: args.verbose,
        ..Settings::default()
    };
    let session = Session {
        target,
        password: args.password,
        excludes,
        token: args.token,
    };

    let board = ProgressBoard::new();
    let interactive = settings.display.is_interactive();
    let pane = interactive.then(|| LogPane::new(settings.log_lines, board.notifier()));
    logging::init_logging(pane.clone(), settings.verbose)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let started = Instant::now();
        let console = match pane {
            Some(pane) => Console::interactive(board.clone(), pane, &settings)
                .context("Failed to initialise the terminal")?,
            None => Console::plain(&board),
        };

        let outcome = tokio::select! {
            result = commands::run(&settings, &session, &board, &console) => Some(result),
            _ = shutdown_signal() => None,
        };

        let Some(result) = outcome else {
            console::restore_terminal();
            eprintln!("Interrupted; run again with the same options to resume.");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        };

        console.shutdown().await;
        println!(
            "{}",
            commands::summary_line(&board.summary(), started.elapsed())
        );
        result
    })
}
