//! Full-screen progress display.
//!
//! One renderer task owns the terminal while downloads run. It wakes on a
//! fixed tick and whenever a record, the header or the log pane changes, takes
//! snapshots, and repaints header, rows and log pane top to bottom. A second
//! task polls the terminal size and forces a full clear when it changes.

use crossterm::{cursor, queue, terminal};
use indicatif::HumanBytes;
use std::cmp::Ordering as CmpOrdering;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::logging::LogPane;
use crate::progress::{DownloadStatus, ProgressBoard, ProgressSnapshot};
use crate::utils::format_speed;

/// Serialises every write to the terminal.
static TERMINAL_LOCK: Mutex<()> = Mutex::new(());

pub const TITLE: &str = "GoFile-DL";
const NAME_WIDTH: usize = 30;
const STATUS_WIDTH: usize = 12;
const BAR_CELLS: usize = 20;
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
/// Wakeups closer together than this wait for the next tick.
const MIN_REDRAW: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub token: Option<String>,
    pub website_token: Option<String>,
    /// Last session-level message, e.g. "All downloads completed".
    pub notice: Option<String>,
}

struct Live {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    board: ProgressBoard,
    pane: LogPane,
}

pub struct Console {
    header: Arc<Mutex<HeaderInfo>>,
    notify: Arc<Notify>,
    live: Option<Live>,
}

impl Console {
    /// No renderer; notices are printed as plain lines.
    pub fn plain(board: &ProgressBoard) -> Self {
        Self {
            header: Arc::new(Mutex::new(HeaderInfo::default())),
            notify: board.notifier(),
            live: None,
        }
    }

    /// Takes over the terminal and starts the renderer and resize monitor.
    pub fn interactive(board: ProgressBoard, pane: LogPane, settings: &Settings) -> io::Result<Self> {
        {
            let _guard = TERMINAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            let mut out = io::stdout();
            queue!(
                out,
                cursor::Hide,
                terminal::Clear(terminal::ClearType::All),
                cursor::MoveTo(0, 0)
            )?;
            out.flush()?;
        }

        let header = Arc::new(Mutex::new(HeaderInfo::default()));
        let notify = board.notifier();
        let cancel = CancellationToken::new();
        let force_clear = Arc::new(AtomicBool::new(false));

        let renderer = tokio::spawn(render_loop(
            board.clone(),
            header.clone(),
            pane.clone(),
            notify.clone(),
            cancel.clone(),
            force_clear.clone(),
            settings.render_tick,
        ));
        let monitor = tokio::spawn(resize_monitor(
            notify.clone(),
            cancel.clone(),
            force_clear,
            settings.resize_poll,
        ));

        Ok(Self {
            header,
            notify,
            live: Some(Live {
                cancel,
                tasks: vec![renderer, monitor],
                board,
                pane,
            }),
        })
    }

    pub fn set_tokens(&self, token: Option<&str>, website_token: Option<&str>) {
        {
            let mut header = self.header.lock().unwrap_or_else(PoisonError::into_inner);
            header.token = token.map(str::to_string);
            header.website_token = website_token.map(str::to_string);
        }
        self.notify.notify_one();
    }

    pub fn set_notice(&self, notice: impl Into<String>) {
        let notice = notice.into();
        if self.live.is_none() {
            println!("{}", notice);
        }
        self.header
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notice = Some(notice);
        self.notify.notify_one();
    }

    /// Stops both tasks, paints the final state once and gives the terminal back.
    pub async fn shutdown(mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        live.cancel.cancel();
        for task in live.tasks {
            let _ = task.await;
        }
        let header = self.header.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Err(e) = paint(&live.board, &header, &live.pane, 0, false) {
            tracing::debug!("final repaint failed: {}", e);
        }
        let _guard = TERMINAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = io::stdout();
        let _ = queue!(out, cursor::Show);
        let _ = writeln!(out);
        let _ = out.flush();
    }
}

/// Emergency teardown on a signal: cursor back, screen cleared.
pub fn restore_terminal() {
    let _guard = TERMINAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let mut out = io::stdout();
    let _ = queue!(
        out,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0),
        cursor::Show
    );
    let _ = out.flush();
}

async fn render_loop(
    board: ProgressBoard,
    header: Arc<Mutex<HeaderInfo>>,
    pane: LogPane,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    force_clear: Arc<AtomicBool>,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame: usize = 0;
    let mut last_draw = Instant::now() - MIN_REDRAW;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                frame = frame.wrapping_add(1);
                board.sample_all();
            }
            _ = notify.notified() => {
                if last_draw.elapsed() < MIN_REDRAW {
                    continue;
                }
            }
        }

        let snapshot = header.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let clear = force_clear.swap(false, Ordering::AcqRel);
        if let Err(e) = paint(&board, &snapshot, &pane, frame, clear) {
            // Nowhere to show it; stop painting rather than spin on a dead tty.
            tracing::debug!("terminal write failed: {}", e);
            break;
        }
        last_draw = Instant::now();
    }
}

async fn resize_monitor(
    notify: Arc<Notify>,
    cancel: CancellationToken,
    force_clear: Arc<AtomicBool>,
    period: Duration,
) {
    let mut poll = tokio::time::interval(period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = terminal::size().ok();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => {
                let current = terminal::size().ok();
                if current != last {
                    last = current;
                    force_clear.store(true, Ordering::Release);
                    notify.notify_one();
                }
            }
        }
    }
}

fn paint(
    board: &ProgressBoard,
    header: &HeaderInfo,
    pane: &LogPane,
    frame: usize,
    clear: bool,
) -> io::Result<()> {
    let (width, height) = terminal::size().unwrap_or((80, 24));
    let lines = layout(
        header,
        board.snapshots(),
        &pane.lines(),
        frame,
        width as usize,
        height as usize,
    );

    let _guard = TERMINAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let mut out = io::stdout().lock();
    if clear {
        queue!(out, terminal::Clear(terminal::ClearType::All))?;
    }
    queue!(out, cursor::MoveTo(0, 0))?;
    for line in &lines {
        write!(out, "{}", line)?;
        queue!(out, terminal::Clear(terminal::ClearType::UntilNewLine))?;
        write!(out, "\r\n")?;
    }
    queue!(out, terminal::Clear(terminal::ClearType::FromCursorDown))?;
    out.flush()
}

/// Non-completed first, `Downloading` ahead of other non-completed, then name.
pub fn sort_rows(rows: &mut [ProgressSnapshot]) {
    rows.sort_by(|a, b| {
        let rank = |s: &ProgressSnapshot| {
            (
                s.status.is_completed(),
                s.status != DownloadStatus::Downloading,
            )
        };
        match rank(a).cmp(&rank(b)) {
            CmpOrdering::Equal => a.filename.cmp(&b.filename),
            other => other,
        }
    });
}

/// Names over 30 characters keep their first 12 and last 15.
pub fn elide_middle(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= NAME_WIDTH {
        return name.to_string();
    }
    let head: String = chars[..12].iter().collect();
    let tail: String = chars[chars.len() - 15..].iter().collect();
    format!("{}...{}", head, tail)
}

fn progress_bar(fraction: f64) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * BAR_CELLS as f64).round() as usize).min(BAR_CELLS);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(BAR_CELLS - filled))
}

fn truncate_to_width(line: String, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    // Leave the last column free so the terminal never wraps.
    let limit = width.saturating_sub(1).max(1);
    if line.chars().count() <= limit {
        line
    } else {
        line.chars().take(limit).collect()
    }
}

pub fn format_row(row: &ProgressSnapshot, frame: usize, width: usize) -> String {
    let spinner = if row.status.is_active() {
        SPINNER[frame % SPINNER.len()]
    } else {
        ' '
    };
    let line = format!(
        "Filename: {:<name_w$} | Status: {:<status_w$} | Progress: {:6.2}% {} | {}/{} | Speed: {} {}",
        elide_middle(&row.filename),
        row.status.label(),
        row.fraction() * 100.0,
        progress_bar(row.fraction()),
        HumanBytes(row.current_bytes),
        HumanBytes(row.total_bytes),
        format_speed(row.speed),
        spinner,
        name_w = NAME_WIDTH,
        status_w = STATUS_WIDTH,
    );
    truncate_to_width(line.trim_end().to_string(), width)
}

fn centered(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

/// Every line of one frame, top to bottom, already fitted to the terminal.
pub fn layout(
    header: &HeaderInfo,
    mut rows: Vec<ProgressSnapshot>,
    logs: &[String],
    frame: usize,
    width: usize,
    height: usize,
) -> Vec<String> {
    let rule = "═".repeat(width.saturating_sub(1).max(1));
    let mut tokens = format!(
        "Token: {}  WebsiteToken: {}",
        header.token.as_deref().unwrap_or("-"),
        header.website_token.as_deref().unwrap_or("-"),
    );
    if let Some(notice) = &header.notice {
        tokens.push_str("  | ");
        tokens.push_str(notice);
    }

    let mut lines = vec![
        truncate_to_width(centered(TITLE, width), width),
        truncate_to_width(tokens, width),
        rule.clone(),
    ];

    sort_rows(&mut rows);
    // Rows get whatever the header and log pane leave over.
    let log_room = if logs.is_empty() { 0 } else { logs.len() + 1 };
    let row_room = height.saturating_sub(lines.len() + log_room + 1);
    lines.extend(rows.iter().take(row_room).map(|r| format_row(r, frame, width)));

    if !logs.is_empty() {
        lines.push(rule);
        lines.extend(logs.iter().map(|l| truncate_to_width(l.clone(), width)));
    }
    lines
}
