use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::error::SqlStreamError;

const REMOTE_FORMAT: &str = "best[height<=360]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Remote(Url),
    Local(String),
}

impl SourceRef {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            _ => Self::Local(value.to_owned()),
        }
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => path.clone(),
        }
    }
}

/// Maps a source to something the decoder can open directly.
///
/// Local paths pass through. Remote pages are resolved with `yt-dlp` to a
/// direct media URL at 360p or below.
pub fn resolve_source(source: &SourceRef) -> Result<String> {
    match source {
        SourceRef::Local(path) => Ok(path.clone()),
        SourceRef::Remote(url) => resolve_remote(url).map_err(|error| {
            anyhow::Error::new(SqlStreamError::SourceUnavailable {
                source_label: url.to_string(),
                reason: format!("{error:#}"),
            })
        }),
    }
}

fn resolve_remote(url: &Url) -> Result<String> {
    let output = Command::new("yt-dlp")
        .arg("--quiet")
        .arg("--no-warnings")
        .arg("-f")
        .arg(REMOTE_FORMAT)
        .arg("-g")
        .arg(url.as_str())
        .stdin(Stdio::null())
        .output()
        .context("failed to run yt-dlp")?;
    if !output.status.success() {
        bail!(
            "yt-dlp exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    first_stream_url(&String::from_utf8_lossy(&output.stdout))
}

fn first_stream_url(stdout: &str) -> Result<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("yt-dlp returned no stream url"))
}
