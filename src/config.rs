use std::path::PathBuf;
use std::time::Duration;

use crate::cli::DisplayMode;
use crate::providers::gofile::{API_BASE, SITE_BASE};

pub const USER_AGENT: &str = concat!("gofile-dl/", env!("CARGO_PKG_VERSION"));

/// Runtime knobs shared by the resolver, the engine and the console.
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_dir: PathBuf,
    /// Requested segment count per download. 1 means single stream.
    pub threads: u32,
    /// Read size for response bodies; every chunk is flushed before it is counted.
    pub chunk_size: usize,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub render_tick: Duration,
    pub resize_poll: Duration,
    /// Number of recent log lines kept below the download rows.
    pub log_lines: usize,
    pub display: DisplayMode,
    pub verbose: bool,
    pub api_base: String,
    pub site_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./output"),
            threads: 1,
            chunk_size: 8 * 1024,
            user_agent: USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            render_tick: Duration::from_millis(125),
            resize_poll: Duration::from_millis(500),
            log_lines: 4,
            display: DisplayMode::Auto,
            verbose: false,
            api_base: API_BASE.to_string(),
            site_base: SITE_BASE.to_string(),
        }
    }
}

impl Settings {
    pub fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }
}
