use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Video hosting platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    TikTok,
    Facebook,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Facebook => "facebook",
        }
    }

    /// Hosts a direct media URL is expected to live on.
    pub fn media_domains(&self) -> &'static [&'static str] {
        match self {
            Platform::YouTube => &["youtube.com", "googlevideo.com"],
            Platform::TikTok => &["tiktokcdn.com", "tiktokv.com", "muscdn.com"],
            Platform::Facebook => &["facebook.com", "fbcdn.net"],
        }
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube video",
            Platform::TikTok => "TikTok video",
            Platform::Facebook => "Facebook video",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of a social extraction: one direct media URL plus
/// the metadata every platform can supply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedMedia {
    pub status: String,
    pub platform: Platform,
    pub title: String,
    pub thumbnail: String,
    pub duration: u64,
    pub video_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub uploader: String,
    pub view_count: u64,
    /// Strategy that produced the URL
    pub method: String,
}

impl ExtractedMedia {
    pub fn new(platform: Platform, video_url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            platform,
            title: platform.default_title().to_string(),
            thumbnail: String::new(),
            duration: 0,
            video_url: video_url.into(),
            width: None,
            height: None,
            uploader: String::new(),
            view_count: 0,
            method: method.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.video_url.trim().is_empty()
    }
}

/// Full metadata record built from the extraction library's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub upload_date: Option<String>,

    /// Duration in seconds
    pub duration: Option<u64>,
    pub duration_string: Option<String>,

    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub age_limit: Option<u32>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,

    /// Ordered as reported by the library
    pub thumbnails: Vec<Thumbnail>,
    pub formats: Vec<Format>,

    pub best_video_url: Option<String>,
    pub best_audio_url: Option<String>,

    pub tags: Vec<String>,
    pub categories: Vec<String>,

    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub channel_url: Option<String>,

    pub extracted_at: DateTime<Utc>,
}

/// One selectable encoding variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Format {
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// Total bitrate in KBit/s
    pub tbr: Option<f64>,
    pub url: String,
    pub filesize: Option<u64>,
    pub protocol: Option<String>,
}

impl Format {
    pub fn has_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(codec) if codec != "none")
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(codec) if codec != "none")
    }

    pub fn is_audio_only(&self) -> bool {
        !self.has_video() && self.has_audio()
    }

    /// Height from the explicit field, falling back to a `WxH` resolution.
    pub fn video_height(&self) -> Option<u32> {
        self.height.or_else(|| {
            self.resolution
                .as_deref()
                .and_then(|r| r.split_once('x'))
                .and_then(|(_, h)| h.parse().ok())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resolution: Option<String>,
}

/// Formats bucketed by height for the formats endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatGroups {
    pub high_quality: Vec<Format>,
    pub medium_quality: Vec<Format>,
    pub low_quality: Vec<Format>,
    pub mobile: Vec<Format>,
    pub audio: Vec<Format>,
}

impl FormatGroups {
    pub fn from_formats(formats: &[Format]) -> Self {
        let mut groups = Self::default();

        for format in formats {
            if format.is_audio_only() {
                groups.audio.push(format.clone());
                continue;
            }
            if !format.has_video() {
                continue;
            }

            match format.video_height().unwrap_or(0) {
                h if h >= 720 => groups.high_quality.push(format.clone()),
                h if h >= 480 => groups.medium_quality.push(format.clone()),
                h if h >= 360 => groups.low_quality.push(format.clone()),
                _ => groups.mobile.push(format.clone()),
            }
        }

        groups
    }
}

/// Requested quality for full extractions and downloads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    pub fn target_height(&self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }

    /// Format selector handed to the extraction library
    pub fn format_selector(&self, audio_only: bool) -> String {
        if audio_only {
            return "bestaudio/best".to_string();
        }
        match self.target_height() {
            Some(height) => format!("best[height<={}]/best", height),
            None => "best".to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "best" => Ok(Quality::Best),
            "1080p" | "1080" => Ok(Quality::P1080),
            "720p" | "720" => Ok(Quality::P720),
            "480p" | "480" => Ok(Quality::P480),
            "360p" | "360" => Ok(Quality::P360),
            other => Err(format!("Unsupported quality: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    #[default]
    Video,
    Audio,
}

/// Resolved download link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub download_url: String,
    pub title: String,
    pub format: String,
    pub format_id: Option<String>,
    pub quality: Quality,
    #[serde(rename = "type")]
    pub format_type: FormatType,
    pub filesize: Option<u64>,
    /// Exact when the library reports a size, otherwise estimated from duration
    pub filesize_mb: Option<f64>,
    pub duration: Option<u64>,
    pub video_id: String,
}

/// One entry of the download menu for a video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadOption {
    #[serde(rename = "type")]
    pub format_type: FormatType,
    pub quality: String,
    pub format: String,
    pub size_estimate: String,
    pub recommended: bool,
    pub format_id: Option<String>,
    pub actual_filesize: Option<u64>,
}

/// Lightweight listing entry for search, trending, playlists and channels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration: Option<u64>,
    pub duration_string: Option<String>,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    pub url: String,
    pub upload_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub webpage_url: String,
    pub entries: Vec<SearchResult>,
    pub playlist_count: usize,
    pub extracted_at: DateTime<Utc>,
}

/// Batch extraction response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExtractionResponse {
    pub successful: Vec<ExtractedMedia>,
    pub failed: Vec<ExtractionFailure>,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// `MM:SS` below an hour, `HH:MM:SS` otherwise
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// `720p`, with the frame rate appended above 30 fps.
pub fn quality_label(height: u32, fps: Option<f64>) -> String {
    match fps {
        Some(fps) if fps > 30.0 => format!("{}p {}fps", height, fps as u32),
        _ => format!("{}p", height),
    }
}

/// Rough size in MB from typical bitrates per minute of media.
pub fn estimate_filesize_mb(duration_secs: u64, quality: &str, format_type: FormatType) -> f64 {
    let minutes = duration_secs as f64 / 60.0;
    let label = quality.trim().to_lowercase();

    let rate = match format_type {
        FormatType::Video => {
            let height: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
            match height.as_str() {
                "2160" => 15.0,
                "1440" => 10.0,
                "1080" => 8.0,
                "720" => 5.0,
                "480" => 3.0,
                "360" => 2.0,
                "240" => 1.0,
                "144" => 0.5,
                _ => 3.0,
            }
        }
        FormatType::Audio => match label.split_whitespace().next() {
            Some("high") => 1.5,
            Some("low") => 0.6,
            _ => 1.0,
        },
    };

    minutes * rate
}

/// `~512KB`, `~42MB` or `~1.5GB`
pub fn format_size_mb(mb: f64) -> String {
    if mb < 1.0 {
        format!("~{}KB", (mb * 1024.0) as u64)
    } else if mb < 1024.0 {
        format!("~{}MB", mb as u64)
    } else {
        format!("~{:.1}GB", mb / 1024.0)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

fn audio_tier(tbr: Option<f64>) -> &'static str {
    match tbr.unwrap_or(0.0) {
        r if r >= 160.0 => "High Quality",
        r if r >= 112.0 => "Standard",
        _ => "Low Quality",
    }
}

/// Download menu: one entry per distinct video quality, tallest first,
/// then one per audio bitrate tier.
pub fn download_options(info: &VideoInfo) -> Vec<DownloadOption> {
    let size_estimate = |filesize: Option<u64>, quality: &str, format_type| match (filesize, info.duration) {
        (Some(bytes), _) => format_size_mb(bytes_to_mb(bytes)),
        (None, Some(duration)) => format_size_mb(estimate_filesize_mb(duration, quality, format_type)),
        (None, None) => "Unknown".to_string(),
    };

    let mut video: Vec<&Format> = info.formats.iter().filter(|f| f.has_video()).collect();
    video.sort_by(|a, b| {
        b.video_height()
            .cmp(&a.video_height())
            .then_with(|| b.tbr.partial_cmp(&a.tbr).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut options = Vec::new();
    let mut seen = Vec::new();

    for format in video {
        let Some(height) = format.video_height() else {
            continue;
        };
        let label = quality_label(height, format.fps);
        if seen.contains(&label) {
            continue;
        }

        options.push(DownloadOption {
            format_type: FormatType::Video,
            size_estimate: size_estimate(format.filesize, &label, FormatType::Video),
            recommended: height == 720,
            quality: label.clone(),
            format: format.ext.clone(),
            format_id: Some(format.format_id.clone()),
            actual_filesize: format.filesize,
        });
        seen.push(label);
    }

    let mut audio: Vec<&Format> = info.formats.iter().filter(|f| f.is_audio_only()).collect();
    audio.sort_by(|a, b| b.tbr.partial_cmp(&a.tbr).unwrap_or(std::cmp::Ordering::Equal));

    for format in audio {
        let tier = audio_tier(format.tbr);
        if seen.iter().any(|s| s == tier) {
            continue;
        }

        options.push(DownloadOption {
            format_type: FormatType::Audio,
            quality: tier.to_string(),
            format: format.ext.clone(),
            size_estimate: size_estimate(format.filesize, tier, FormatType::Audio),
            recommended: tier == "Standard",
            format_id: Some(format.format_id.clone()),
            actual_filesize: format.filesize,
        });
        seen.push(tier.to_string());
    }

    options
}
