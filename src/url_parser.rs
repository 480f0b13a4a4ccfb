use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::{ExtractorError, Platform, Result};

static TIKTOK_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"/video/(\d+)").unwrap(),
        Regex::new(r"tiktok\.com.*?/(\d{19})").unwrap(),
        Regex::new(r"vm\.tiktok\.com/([A-Za-z0-9]+)").unwrap(),
    ]
});

static YOUTUBE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/)([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/live/([a-zA-Z0-9_-]{11})").unwrap(),
    ]
});

/// A URL that passed validation, with its platform resolved.
#[derive(Debug, Clone)]
pub struct ParsedUrl {
    pub original: String,
    pub platform: Platform,
    pub host: String,
}

/// Validate a URL and resolve its platform without touching the network.
pub fn parse(url: &str) -> Result<ParsedUrl> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ExtractorError::InvalidUrl("URL is empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| ExtractorError::InvalidUrl(format!("Failed to parse URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ExtractorError::InvalidUrl(format!(
            "Unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ExtractorError::InvalidUrl(format!("URL has no host: {}", trimmed)))?
        .to_lowercase();

    let platform = platform_for_host(&host)
        .ok_or_else(|| ExtractorError::UnsupportedPlatform(host.clone()))?;

    Ok(ParsedUrl {
        original: trimmed.to_string(),
        platform,
        host,
    })
}

impl ParsedUrl {
    /// Cache identity: YouTube links collapse to their watch URL.
    pub fn canonical(&self) -> String {
        match self.platform {
            Platform::YouTube => extract_youtube_id(&self.original)
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                .unwrap_or_else(|| self.original.clone()),
            _ => self.original.clone(),
        }
    }
}

fn platform_for_host(host: &str) -> Option<Platform> {
    let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

    if matches("youtube.com") || matches("youtu.be") {
        Some(Platform::YouTube)
    } else if matches("tiktok.com") {
        Some(Platform::TikTok)
    } else if matches("facebook.com") || matches("fb.watch") || matches("fb.com") {
        Some(Platform::Facebook)
    } else {
        None
    }
}

pub fn extract_tiktok_id(url: &str) -> Option<String> {
    first_capture(&TIKTOK_ID_PATTERNS, url)
}

pub fn extract_youtube_id(url: &str) -> Option<String> {
    first_capture(&YOUTUBE_ID_PATTERNS, url)
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|p| p.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// True when the media URL is served from one of the given domains.
pub fn is_on_domains(media_url: &str, domains: &[&str]) -> bool {
    let host = match Url::parse(media_url) {
        Ok(parsed) => parsed.host_str().map(str::to_lowercase),
        Err(_) => None,
    };

    match host {
        Some(host) => domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d))),
        None => false,
    }
}
