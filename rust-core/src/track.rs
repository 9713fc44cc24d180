//! Track acquisition: turning what the admin typed into something every
//! listener can download.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use url::Url;

use crate::error::{Result, SyncError};

/// What a listener needs to fetch and label the current track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    pub resource_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackReference {
    /// 11-character YouTube video id.
    YouTube(String),
    /// Plain audio file URL.
    Direct(Url),
}

impl TrackReference {
    pub fn watch_url(&self) -> String {
        match self {
            TrackReference::YouTube(id) => format!("https://www.youtube.com/watch?v={id}"),
            TrackReference::Direct(url) => url.to_string(),
        }
    }
}

impl FromStr for TrackReference {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(id) = extract_youtube_id(raw) {
            return Ok(TrackReference::YouTube(id));
        }
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(TrackReference::Direct(url)),
            _ => Err(SyncError::InvalidTrackReference(raw.to_string())),
        }
    }
}

fn bare_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"))
}

fn embedded_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})(?:[?&]|$)").expect("static regex"))
}

/// Pulls a video id out of the usual YouTube link shapes: bare ids,
/// `youtu.be/<id>`, `watch?v=<id>`, `/embed/<id>` and `/shorts/<id>`.
pub fn extract_youtube_id(input: &str) -> Option<String> {
    if bare_id().is_match(input) {
        return Some(input.to_string());
    }

    let url = Url::parse(input).ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = host.strip_prefix("m.").unwrap_or(host);

    let candidate = if host == "youtu.be" {
        url.path_segments().and_then(|mut s| s.next()).map(str::to_string)
    } else if host.contains("youtube") {
        if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
            Some(v.into_owned())
        } else {
            let path = url.path();
            path.strip_prefix("/embed/")
                .or_else(|| path.strip_prefix("/shorts/"))
                .map(|rest| rest.split('/').next().unwrap_or_default().to_string())
        }
    } else {
        None
    };

    candidate
        .filter(|id| bare_id().is_match(id))
        .or_else(|| {
            embedded_id()
                .captures(input)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
}

#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, reference: &TrackReference) -> Result<TrackInfo>;
}

#[async_trait]
pub trait TrackFetcher: Send + Sync {
    /// Raw audio bytes of `track`. Errors are always [`SyncError::FetchFailed`].
    async fn fetch(&self, track: &TrackInfo) -> Result<Bytes>;
}

/// Resolves YouTube references through a local `yt-dlp`; direct URLs pass
/// through untouched.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: PathBuf,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
        }
    }
}

impl YtDlpResolver {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, url: &str) -> anyhow::Result<TrackInfo> {
        let output = Command::new(&self.binary)
            .arg("--format")
            .arg("bestaudio")
            .arg("--print")
            .arg("title")
            .arg("--print")
            .arg("urls")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?
            .wait_with_output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", stderr.trim())
        }

        let stdout = String::from_utf8(output.stdout)?;
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        let title = lines.next().unwrap_or_default().to_string();
        // Take ONLY the first URL in case yt-dlp returns several
        let resource_url = lines.next().unwrap_or_default().to_string();
        if resource_url.is_empty() {
            anyhow::bail!("yt-dlp returned empty URL")
        }
        Ok(TrackInfo {
            title,
            resource_url,
        })
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, reference: &TrackReference) -> Result<TrackInfo> {
        match reference {
            TrackReference::Direct(url) => Ok(direct_track(url)),
            TrackReference::YouTube(_) => {
                let track = self
                    .run(&reference.watch_url())
                    .await
                    .map_err(|e| SyncError::Resolve(format!("{e:#}")))?;
                tracing::info!(title = %track.title, "resolved track");
                Ok(track)
            }
        }
    }
}

fn direct_track(url: &Url) -> TrackInfo {
    let title = url
        .path_segments()
        .and_then(|s| s.filter(|seg| !seg.is_empty()).last())
        .unwrap_or("Untitled")
        .to_string();
    TrackInfo {
        title,
        resource_url: url.to_string(),
    }
}

/// Downloads track audio over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrackFetcher for HttpFetcher {
    async fn fetch(&self, track: &TrackInfo) -> Result<Bytes> {
        let response = self
            .client
            .get(&track.resource_url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(SyncError::FetchFailed(format!(
                "{} returned no audio",
                track.resource_url
            )));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_ids_from_common_link_shapes() {
        let cases = [
            ("dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://youtu.be/dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42", "dQw4w9WgXcQ"),
            ("https://m.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/embed/dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://youtube.com/shorts/dQw4w9WgXcQ?feature=share", "dQw4w9WgXcQ"),
            ("https://music.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
        ];
        for (input, expected) in cases {
            assert_eq!(extract_youtube_id(input).as_deref(), Some(expected), "{input}");
        }
    }

    #[test]
    fn non_youtube_input_has_no_id() {
        assert_eq!(extract_youtube_id("https://example.com/song.mp3"), None);
        assert_eq!(extract_youtube_id("not a link"), None);
        assert_eq!(extract_youtube_id(""), None);
    }

    #[test]
    fn references_parse_to_youtube_or_direct() {
        assert_eq!(
            "https://youtu.be/dQw4w9WgXcQ".parse::<TrackReference>().unwrap(),
            TrackReference::YouTube("dQw4w9WgXcQ".into())
        );
        let direct = "https://cdn.example/audio/song.mp3"
            .parse::<TrackReference>()
            .unwrap();
        assert!(matches!(direct, TrackReference::Direct(_)));
        assert!("ftp://host/file".parse::<TrackReference>().is_err());
        assert!("hello world".parse::<TrackReference>().is_err());
    }

    #[tokio::test]
    async fn direct_urls_resolve_without_yt_dlp() {
        let resolver = YtDlpResolver::with_binary("/nonexistent/yt-dlp");
        let reference: TrackReference = "https://cdn.example/audio/song.mp3".parse().unwrap();
        let track = resolver.resolve(&reference).await.unwrap();
        assert_eq!(track.title, "song.mp3");
        assert_eq!(track.resource_url, "https://cdn.example/audio/song.mp3");
    }

    #[tokio::test]
    async fn missing_yt_dlp_is_a_resolve_error() {
        let resolver = YtDlpResolver::with_binary("/nonexistent/yt-dlp");
        let reference = TrackReference::YouTube("dQw4w9WgXcQ".into());
        assert!(matches!(
            resolver.resolve(&reference).await,
            Err(SyncError::Resolve(_))
        ));
    }
}
