use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// `YYYY-MM-DD HH:MM:SS` in local time.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// The most recent log lines, shown under the download rows.
#[derive(Debug, Clone)]
pub struct LogPane {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    notify: Arc<Notify>,
}

impl LogPane {
    /// `notify` is woken on every new line so the renderer picks it up.
    pub fn new(capacity: usize, notify: Arc<Notify>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            notify,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.into());
        }
        self.notify.notify_one();
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect()
    }
}

/// Buffers one formatted event and hands it to the pane when dropped.
pub struct PaneWriter {
    pane: LogPane,
    buf: Vec<u8>,
}

impl io::Write for PaneWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PaneWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.pane.push(line);
        }
    }
}

impl<'a> MakeWriter<'a> for LogPane {
    type Writer = PaneWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PaneWriter {
            pane: self.clone(),
            buf: Vec::new(),
        }
    }
}

fn default_directives(interactive: bool, verbose: bool) -> &'static str {
    match (interactive, verbose) {
        (_, true) => "warn,gofile_dl=debug",
        (true, false) => "warn",
        (false, false) => "warn,gofile_dl=info",
    }
}

/// Installs the global subscriber. With a pane, events go to the console's
/// log area; otherwise to stderr. `RUST_LOG` wins over the defaults.
pub fn init_logging(pane: Option<LogPane>, verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(pane.is_some(), verbose)));

    let ansi = pane.is_none() && io::stderr().is_terminal();
    let writer = match pane {
        Some(pane) => BoxMakeWriter::new(pane),
        None => BoxMakeWriter::new(io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_timer(LocalTime)
        .with_target(false)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_keeps_only_the_newest_lines() {
        let pane = LogPane::new(2, Arc::new(Notify::new()));
        pane.push("one");
        pane.push("two");
        pane.push("three");
        assert_eq!(pane.lines(), vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn events_land_in_the_pane() {
        let pane = LogPane::new(4, Arc::new(Notify::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(pane.clone())
            .with_timer(LocalTime)
            .with_target(false)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Failed to download movie.mkv");
        });

        let lines = pane.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("ERROR"));
        assert!(lines[0].ends_with("Failed to download movie.mkv"));
        // Leading timestamp: "YYYY-MM-DD HH:MM:SS"
        let stamp = &lines[0][..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn new_lines_wake_the_renderer() {
        let notify = Arc::new(Notify::new());
        let pane = LogPane::new(4, notify.clone());
        pane.push("hello");
        tokio::time::timeout(std::time::Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }

    #[test]
    fn verbose_raises_crate_level() {
        assert_eq!(default_directives(true, true), "warn,gofile_dl=debug");
        assert_eq!(default_directives(true, false), "warn");
        assert_eq!(default_directives(false, false), "warn,gofile_dl=info");
    }
}
