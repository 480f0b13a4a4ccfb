use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::{format_duration, Format, PlaylistInfo, SearchResult, Thumbnail, VideoInfo};
use crate::{ExtractorError, Result};

/// Per-call options for the extraction library
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryOptions {
    pub format: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub proxy: Option<String>,
    pub cookie_file: Option<PathBuf>,
    /// YouTube player clients, in preference order
    pub player_clients: Vec<String>,
    pub skip_streaming_manifests: bool,
    pub socket_timeout: Option<u64>,
    /// List playlist, channel and search entries without resolving each one
    pub flat_playlist: bool,
    pub playlist_end: Option<usize>,
    pub geo_country: Option<String>,
}

/// Third-party extraction library: page URL in, raw metadata record out.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn extract_info(&self, url: &str, options: &LibraryOptions) -> Result<RawInfo>;
}

/// The `yt-dlp` executable, driven with `--dump-single-json`.
pub struct YtDlp {
    binary: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn build_args(url: &str, options: &LibraryOptions) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--skip-download".to_string(),
        ];

        if options.flat_playlist {
            args.push("--flat-playlist".to_string());
            if let Some(end) = options.playlist_end {
                args.push("--playlist-end".to_string());
                args.push(end.to_string());
            }
        } else {
            args.push("--no-playlist".to_string());
        }
        if let Some(country) = &options.geo_country {
            args.push("--geo-bypass-country".to_string());
            args.push(country.clone());
        }

        if let Some(timeout) = options.socket_timeout {
            args.push("--socket-timeout".to_string());
            args.push(timeout.to_string());
        }
        if let Some(format) = &options.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        if let Some(user_agent) = &options.user_agent {
            args.push("--user-agent".to_string());
            args.push(user_agent.clone());
        }
        if let Some(referer) = &options.referer {
            args.push("--referer".to_string());
            args.push(referer.clone());
        }

        let mut youtube_args = Vec::new();
        if !options.player_clients.is_empty() {
            youtube_args.push(format!("player_client={}", options.player_clients.join(",")));
        }
        if options.skip_streaming_manifests {
            youtube_args.push("skip=hls,dash".to_string());
        }
        if !youtube_args.is_empty() {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:{}", youtube_args.join(";")));
        }

        if let Some(cookie_file) = &options.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.display().to_string());
        }
        if let Some(proxy) = &options.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl MediaLibrary for YtDlp {
    async fn extract_info(&self, url: &str, options: &LibraryOptions) -> Result<RawInfo> {
        let args = Self::build_args(url, options);
        tracing::debug!("Running {} for {}", self.binary, url);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractorError::Timeout(self.timeout.as_secs()))?
        .map_err(|e| ExtractorError::Library(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Map library stderr onto the error taxonomy.
pub fn classify_failure(stderr: &str) -> ExtractorError {
    let lower = stderr.to_lowercase();

    if lower.contains("sign in to confirm") || lower.contains("login required") {
        return ExtractorError::Forbidden(
            "The platform requires valid cookies for this video".to_string(),
        );
    }
    if lower.contains("http error 429") || lower.contains("too many requests") {
        return ExtractorError::RateLimited;
    }
    if lower.contains("private video") || lower.contains("video unavailable") {
        return ExtractorError::NotFound(last_error_line(stderr).to_string());
    }

    ExtractorError::Library(last_error_line(stderr).to_string())
}

fn last_error_line(stderr: &str) -> &str {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .unwrap_or_else(|| stderr.trim());

    line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line)
}

/// Metadata record as emitted by the library
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawInfo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub upload_date: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub age_limit: Option<u32>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnails: Vec<RawThumbnail>,
    pub formats: Vec<RawFormat>,
    pub requested_formats: Vec<RawFormat>,
    /// Direct URL of the selected format, when it is a single stream
    pub url: Option<String>,
    pub ext: Option<String>,
    pub format_id: Option<String>,
    pub filesize: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub channel_url: Option<String>,
    /// Playlist, channel or search entries; flat ones carry only summary fields
    pub entries: Vec<RawInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawThumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub tbr: Option<f64>,
    pub url: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub protocol: Option<String>,
}

impl From<RawFormat> for Format {
    fn from(raw: RawFormat) -> Self {
        Format {
            format_id: raw.format_id,
            ext: raw.ext.unwrap_or_else(|| "unknown".to_string()),
            resolution: raw.resolution,
            height: raw.height,
            fps: raw.fps,
            vcodec: raw.vcodec,
            acodec: raw.acodec,
            tbr: raw.tbr,
            url: raw.url.unwrap_or_default(),
            filesize: raw.filesize.or(raw.filesize_approx),
            protocol: raw.protocol,
        }
    }
}

impl RawInfo {
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64)
    }

    /// URL the library picked for the requested format selector.
    pub fn selected_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| self.requested_formats.iter().find_map(|f| f.url.as_deref()))
            .filter(|u| !u.trim().is_empty())
    }

    /// First plain HTTP(S) stream among the listed formats.
    pub fn first_http_format_url(&self) -> Option<&str> {
        self.formats
            .iter()
            .filter(|f| matches!(f.protocol.as_deref(), Some("http") | Some("https")))
            .find_map(|f| f.url.as_deref())
            .filter(|u| !u.is_empty())
    }

    pub fn best_thumbnail(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .or_else(|| self.thumbnails.last().map(|t| t.url.as_str()))
    }

    /// Listing entry; flat entries often lack a page URL, so one is built from the id.
    pub fn to_search_result(&self) -> SearchResult {
        let duration = self.duration_secs();
        let thumbnail = self
            .thumbnails
            .iter()
            .find(|t| t.width.is_some_and(|w| (320..=480).contains(&w)))
            .or_else(|| self.thumbnails.first())
            .map(|t| t.url.clone())
            .or_else(|| self.thumbnail.clone());

        let url = self
            .webpage_url
            .clone()
            .or_else(|| self.url.clone().filter(|u| u.starts_with("http")))
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id));

        SearchResult {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_default(),
            uploader: self
                .uploader
                .clone()
                .or_else(|| self.channel.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            duration,
            duration_string: duration.map(format_duration),
            view_count: self.view_count,
            thumbnail,
            url,
            upload_date: self.upload_date.clone(),
        }
    }

    /// Entries with an id, as listing results
    pub fn entry_results(&self) -> Vec<SearchResult> {
        self.entries
            .iter()
            .filter(|entry| !entry.id.is_empty())
            .map(RawInfo::to_search_result)
            .collect()
    }

    pub fn into_playlist_info(self, requested_url: &str) -> PlaylistInfo {
        let entries = self.entry_results();
        PlaylistInfo {
            playlist_count: entries.len(),
            entries,
            id: self.id,
            title: self.title.unwrap_or_else(|| "Unknown Playlist".to_string()),
            description: self.description,
            uploader: self.uploader,
            uploader_id: self.uploader_id,
            webpage_url: self.webpage_url.unwrap_or_else(|| requested_url.to_string()),
            extracted_at: Utc::now(),
        }
    }

    pub fn into_video_info(self) -> VideoInfo {
        let duration = self.duration_secs();
        let best_video_url = self.selected_url().map(str::to_string);

        let formats: Vec<Format> = self
            .formats
            .into_iter()
            .filter(|f| f.url.as_deref().is_some_and(|u| !u.is_empty()))
            .map(Format::from)
            .collect();

        let best_video_url = best_video_url.or_else(|| {
            formats
                .iter()
                .rev()
                .find(|f| f.has_video())
                .map(|f| f.url.clone())
        });
        let best_audio_url = formats
            .iter()
            .find(|f| f.vcodec.as_deref() == Some("none"))
            .map(|f| f.url.clone());

        let thumbnails = self
            .thumbnails
            .into_iter()
            .filter(|t| !t.url.is_empty())
            .map(|t| Thumbnail {
                url: t.url,
                width: t.width,
                height: t.height,
                resolution: t.resolution,
            })
            .collect();

        VideoInfo {
            id: self.id,
            title: self.title.unwrap_or_default(),
            description: self.description,
            uploader: self.uploader,
            uploader_id: self.uploader_id,
            upload_date: self.upload_date,
            duration,
            duration_string: duration.map(format_duration),
            view_count: self.view_count,
            like_count: self.like_count,
            age_limit: self.age_limit,
            webpage_url: self.webpage_url,
            original_url: self.original_url,
            thumbnails,
            formats,
            best_video_url,
            best_audio_url,
            tags: self.tags,
            categories: self.categories,
            channel: self.channel,
            channel_id: self.channel_id,
            channel_url: self.channel_url,
            extracted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "dQw4w9WgXcQ",
        "title": "Never Gonna Give You Up",
        "uploader": "Rick Astley",
        "duration": 212.0,
        "view_count": 1500000000,
        "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "thumbnails": [
            {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/default.jpg", "width": 120, "height": 90},
            {"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"}
        ],
        "formats": [
            {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "tbr": 129.5,
             "url": "https://rr1.googlevideo.com/audio", "protocol": "https"},
            {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1", "acodec": "mp4a",
             "url": "https://rr1.googlevideo.com/360", "protocol": "https"},
            {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none", "protocol": "mhtml"}
        ],
        "url": "https://rr1.googlevideo.com/360",
        "unknown_field": {"nested": true}
    }"#;

    #[test]
    fn test_raw_info_into_video_info() {
        let raw: RawInfo = serde_json::from_str(SAMPLE).unwrap();
        let info = raw.into_video_info();

        assert_eq!(info.id, "dQw4w9WgXcQ");
        assert_eq!(info.duration, Some(212));
        assert_eq!(info.duration_string.as_deref(), Some("03:32"));
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.thumbnails.len(), 2);
        assert_eq!(info.best_video_url.as_deref(), Some("https://rr1.googlevideo.com/360"));
        assert_eq!(info.best_audio_url.as_deref(), Some("https://rr1.googlevideo.com/audio"));
    }

    #[test]
    fn test_build_args() {
        let options = LibraryOptions {
            format: Some("best".to_string()),
            proxy: Some("http://10.0.0.1:8080".to_string()),
            cookie_file: Some(PathBuf::from("/tmp/cookies.txt")),
            player_clients: vec!["android".to_string(), "web".to_string()],
            skip_streaming_manifests: true,
            socket_timeout: Some(30),
            ..Default::default()
        };

        let args = YtDlp::build_args("https://youtu.be/dQw4w9WgXcQ", &options);
        let joined = args.join(" ");

        assert!(joined.contains("-f best"));
        assert!(joined.contains("--extractor-args youtube:player_client=android,web;skip=hls,dash"));
        assert!(joined.contains("--cookies /tmp/cookies.txt"));
        assert!(joined.contains("--proxy http://10.0.0.1:8080"));
        assert!(joined.contains("--socket-timeout 30"));
        assert!(joined.contains("--no-playlist"));
        assert!(!joined.contains("--flat-playlist"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_build_args_flat_listing() {
        let options = LibraryOptions {
            flat_playlist: true,
            playlist_end: Some(20),
            geo_country: Some("DE".to_string()),
            ..Default::default()
        };

        let args = YtDlp::build_args("ytsearch5:rust", &options);
        let joined = args.join(" ");

        assert!(joined.contains("--flat-playlist --playlist-end 20"));
        assert!(joined.contains("--geo-bypass-country DE"));
        assert!(!joined.contains("--no-playlist"));
        assert_eq!(args.last().map(String::as_str), Some("ytsearch5:rust"));
    }

    #[test]
    fn test_flat_entries_deserialize() {
        let raw: RawInfo = serde_json::from_str(
            r#"{"id": "PL1", "title": "Mix", "_type": "playlist",
                "entries": [{"id": "a1", "title": "First", "url": "https://www.youtube.com/watch?v=a1"},
                            {"id": "b2", "duration": 61.0}]}"#,
        )
        .unwrap();

        assert_eq!(raw.entries.len(), 2);
        assert_eq!(raw.entries[0].title.as_deref(), Some("First"));
        assert_eq!(raw.entries[1].duration_secs(), Some(61));

        let results = raw.entry_results();
        assert_eq!(results[0].url, "https://www.youtube.com/watch?v=a1");
        assert_eq!(results[1].url, "https://www.youtube.com/watch?v=b2");
        assert_eq!(results[1].duration_string.as_deref(), Some("01:01"));
        assert_eq!(results[1].uploader, "Unknown");

        let playlist = raw.into_playlist_info("https://www.youtube.com/playlist?list=PL1");
        assert_eq!(playlist.playlist_count, 2);
        assert_eq!(playlist.webpage_url, "https://www.youtube.com/playlist?list=PL1");
    }

    #[test]
    fn test_failure_classification() {
        let bot_check = "ERROR: [youtube] abc: Sign in to confirm you're not a bot.";
        assert!(matches!(classify_failure(bot_check), ExtractorError::Forbidden(_)));

        let missing = "WARNING: x\nERROR: [youtube] abc: Video unavailable";
        assert!(matches!(classify_failure(missing), ExtractorError::NotFound(_)));

        let throttled = "ERROR: [youtube] abc: HTTP Error 429: Too Many Requests";
        assert!(matches!(classify_failure(throttled), ExtractorError::RateLimited));

        match classify_failure("ERROR: Unable to connect to proxy") {
            ExtractorError::Library(message) => assert_eq!(message, "Unable to connect to proxy"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
