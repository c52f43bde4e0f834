//! Resolves a gofile content id into a queue of download requests.

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{DownloadRequest, ExcludeFilter};
use crate::hashing::sha256_hex;
use crate::utils::sanitize_filename;

pub const API_BASE: &str = "https://api.gofile.io";
pub const SITE_BASE: &str = "https://gofile.io";

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct AccountData {
    token: String,
}

/// Wire shape of the contents API. Everything is optional because error
/// replies carry an empty `data` object. `children` keeps the listing order.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct WireContent {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    link: Option<String>,
    password_status: Option<String>,
    children: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    File { name: String, link: String },
    Folder { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    File { name: String, link: String },
    Folder { name: String, children: Vec<Child> },
}

fn file_link(name: &str, link: Option<String>) -> Result<String> {
    link.filter(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("file {:?} has no download link", name))
}

impl TryFrom<WireContent> for Content {
    type Error = anyhow::Error;

    fn try_from(wire: WireContent) -> Result<Self> {
        match wire.kind.as_str() {
            "file" => Ok(Content::File {
                link: file_link(&wire.name, wire.link)?,
                name: wire.name,
            }),
            "folder" => {
                let mut children = Vec::with_capacity(wire.children.len());
                for (id, value) in wire.children {
                    let child: WireContent = match serde_json::from_value(value) {
                        Ok(child) => child,
                        Err(e) => {
                            tracing::warn!("skipping unreadable entry {}: {}", id, e);
                            continue;
                        }
                    };
                    match child.kind.as_str() {
                        "folder" => children.push(Child::Folder { id }),
                        "file" => children.push(Child::File {
                            link: file_link(&child.name, child.link)?,
                            name: child.name,
                        }),
                        other => tracing::warn!("skipping {} of unknown type {:?}", id, other),
                    }
                }
                Ok(Content::Folder {
                    name: wire.name,
                    children,
                })
            }
            other => bail!("unknown content type {:?}", other),
        }
    }
}

/// Account and website tokens for one session, fetched lazily.
pub struct GoFile {
    client: Client,
    api_base: String,
    site_base: String,
    token: Option<String>,
    website_token: Option<String>,
}

impl GoFile {
    /// `api_base` serves the account and contents APIs, `site_base` the
    /// script holding the website token.
    pub fn new(
        client: Client,
        token: Option<String>,
        api_base: impl Into<String>,
        site_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            site_base: site_base.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            website_token: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn website_token(&self) -> Option<&str> {
        self.website_token.as_deref()
    }

    async fn account_token(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let url = format!("{}/accounts", self.api_base);
        let envelope: Envelope<AccountData> = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to request a guest account")?
            .error_for_status()
            .context("Guest account request was rejected")?
            .json()
            .await
            .context("Failed to parse account response")?;
        let token = match (envelope.status.as_str(), envelope.data) {
            ("ok", Some(data)) if !data.token.is_empty() => data.token,
            (status, _) => bail!("Cannot get token from GoFile API (status {:?})", status),
        };
        tracing::info!("created guest account");
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn site_token(&mut self) -> Result<String> {
        if let Some(wt) = &self.website_token {
            return Ok(wt.clone());
        }
        let url = format!("{}/dist/js/global.js", self.site_base);
        let script = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch global.js")?
            .error_for_status()
            .context("global.js request was rejected")?
            .text()
            .await
            .context("Failed to read global.js")?;
        let pattern = Regex::new(r#"appdata\.wt = "(?P<wt>[^"]+)""#)?;
        let wt = pattern
            .captures(&script)
            .and_then(|c| c.name("wt"))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| anyhow!("Cannot get website token from global.js"))?;
        self.website_token = Some(wt.clone());
        Ok(wt)
    }

    /// `Ok(None)` when the API answered but refused the content; that is
    /// logged and the node is skipped.
    async fn fetch_content(
        &self,
        id: &str,
        token: &str,
        wt: &str,
        password_hash: &str,
    ) -> Result<Option<Content>> {
        let url = format!("{}/contents/{}", self.api_base, id);
        let envelope: Envelope<WireContent> = self
            .client
            .get(&url)
            .query(&[("wt", wt), ("cache", "true"), ("password", password_hash)])
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to request content {}", id))?
            .error_for_status()
            .with_context(|| format!("Content request for {} was rejected", id))?
            .json()
            .await
            .with_context(|| format!("Failed to parse content {}", id))?;

        if envelope.status != "ok" {
            tracing::error!("GoFile API error for {}: {}", id, envelope.status);
            return Ok(None);
        }
        let wire = envelope.data.unwrap_or_default();
        let password_status = wire.password_status.as_deref().unwrap_or("passwordOk");
        if password_status != "passwordOk" {
            tracing::error!("Invalid password for {}: {}", id, password_status);
            return Ok(None);
        }
        Content::try_from(wire)
            .map(Some)
            .with_context(|| format!("Unexpected content for {}", id))
    }

    /// Walks `content_id` and every nested folder depth-first, in listing
    /// order. Each folder becomes a sub-directory named after it; excluded
    /// file names are left out. Token failures are fatal, a folder that cannot
    /// be listed is logged and skipped.
    pub async fn resolve(
        &mut self,
        content_id: &str,
        output_dir: &Path,
        password: Option<&str>,
        excludes: &ExcludeFilter,
    ) -> Result<Vec<DownloadRequest>> {
        let token = self.account_token().await?;
        let wt = self.site_token().await?;
        let password_hash = password
            .filter(|p| !p.is_empty())
            .map(sha256_hex)
            .unwrap_or_default();

        let mut requests = Vec::new();
        let mut pending = vec![Pending::Listing {
            id: content_id.to_string(),
            dir: output_dir.to_path_buf(),
        }];
        while let Some(item) = pending.pop() {
            let (id, dir) = match item {
                Pending::File { name, link, dir } => {
                    push_file(&mut requests, excludes, &dir, name, link);
                    continue;
                }
                Pending::Listing { id, dir } => (id, dir),
            };
            let content = match self.fetch_content(&id, &token, &wt, &password_hash).await {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Error getting files for content {}: {:#}", id, e);
                    continue;
                }
            };
            match content {
                Content::File { name, link } => {
                    push_file(&mut requests, excludes, &dir, name, link)
                }
                Content::Folder { name, children } => {
                    let folder_dir = dir.join(sanitize_filename(&name));
                    tracing::debug!(
                        folder = %folder_dir.display(),
                        entries = children.len(),
                        "listing folder"
                    );
                    // Pushed back to front so the first child is popped first.
                    for child in children.into_iter().rev() {
                        pending.push(match child {
                            Child::File { name, link } => Pending::File {
                                name,
                                link,
                                dir: folder_dir.clone(),
                            },
                            Child::Folder { id } => Pending::Listing {
                                id,
                                dir: folder_dir.clone(),
                            },
                        });
                    }
                }
            }
        }
        Ok(requests)
    }
}

enum Pending {
    Listing { id: String, dir: PathBuf },
    File { name: String, link: String, dir: PathBuf },
}

fn push_file(
    requests: &mut Vec<DownloadRequest>,
    excludes: &ExcludeFilter,
    dir: &Path,
    name: String,
    link: String,
) {
    if excludes.is_excluded(&name) {
        tracing::info!("excluded {}", name);
        return;
    }
    requests.push(DownloadRequest {
        locator: link,
        destination: dir.join(sanitize_filename(&name)),
    });
}
