pub mod gofile;

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;
use crate::utils::{get_filename_from_url, sanitize_filename};

/// One file to fetch: where it comes from and where it lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    pub locator: String,
    pub destination: PathBuf,
}

/// What the user asked for on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A gofile content id, taken from a `gofile.io/d/<id>` link or given bare.
    GoFile(String),
    /// Any other http(s) URL, downloaded as-is.
    Direct(Url),
}

fn is_content_id(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if let Ok(url) = Url::parse(raw) {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Target(raw.to_string()));
            }
            let is_gofile = matches!(url.host_str(), Some("gofile.io" | "www.gofile.io"));
            if is_gofile {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.filter(|p| !p.is_empty()).collect())
                    .unwrap_or_default();
                return match segments.as_slice() {
                    ["d", id] if is_content_id(id) => Ok(Target::GoFile(id.to_string())),
                    _ => Err(ConfigError::Target(raw.to_string())),
                };
            }
            return Ok(Target::Direct(url));
        }
        if is_content_id(raw) {
            return Ok(Target::GoFile(raw.to_string()));
        }
        Err(ConfigError::Target(raw.to_string()))
    }
}

/// Queue entry for a plain URL target.
pub fn direct_request(url: &Url, output_dir: &Path) -> DownloadRequest {
    let name = get_filename_from_url(url.as_str())
        .unwrap_or_else(|_| format!("download_{}", uuid::Uuid::new_v4()));
    DownloadRequest {
        locator: url.to_string(),
        destination: output_dir.join(sanitize_filename(&name)),
    }
}

/// Case-insensitive `*` / `?` patterns matched against remote file names.
/// Every other character, brackets included, matches itself.
#[derive(Clone, Debug, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
}

const EXCLUDE_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Rewrites a wildcard into glob syntax: brackets become one-character
/// classes and runs of `*` collapse, since glob reserves `**` for whole path
/// components.
fn wildcard_pattern(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '*' if out.ends_with('*') => {}
            '[' => out.push_str("[[]"),
            ']' => out.push_str("[]]"),
            c => out.push(c),
        }
    }
    out
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(&wildcard_pattern(p)).map_err(|source| ConfigError::Exclude {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, filename: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(filename, EXCLUDE_MATCH))
    }
}
