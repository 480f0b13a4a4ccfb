use async_trait::async_trait;
use std::sync::Arc;

use super::{media_from_raw, AttemptContext, ExtractionStrategy};
use crate::headers;
use crate::library::{LibraryOptions, MediaLibrary, RawInfo};
use crate::{ExtractedMedia, ExtractorError, Platform, Result};

pub const DEFAULT_FORMAT: &str = "bestvideo[height<=720]+bestaudio/best[height<=720]";

/// Player clients tried in order when the default pass yields nothing.
pub const FORCED_CLIENTS: &[(&str, &str)] = &[
    ("android", "best[height<=480]"),
    ("tv_embedded", "best[height<=720]"),
    ("web", "best[height<=360]"),
];

pub struct YouTubeLibrary {
    library: Arc<dyn MediaLibrary>,
}

impl YouTubeLibrary {
    pub fn new(library: Arc<dyn MediaLibrary>) -> Self {
        Self { library }
    }

    fn base_options(ctx: &AttemptContext) -> LibraryOptions {
        LibraryOptions {
            format: Some(DEFAULT_FORMAT.to_string()),
            user_agent: Some(headers::random_user_agent().to_string()),
            referer: Some("https://www.youtube.com/".to_string()),
            proxy: ctx.proxy.clone(),
            cookie_file: ctx.cookie_file.clone(),
            player_clients: vec!["android".to_string(), "web".to_string()],
            skip_streaming_manifests: true,
            socket_timeout: Some(30),
            ..Default::default()
        }
    }

    async fn extract_with_forced_clients(
        &self,
        ctx: &AttemptContext,
        base: &LibraryOptions,
    ) -> Result<ExtractedMedia> {
        for (client, format) in FORCED_CLIENTS {
            let options = LibraryOptions {
                format: Some(format.to_string()),
                player_clients: vec![client.to_string()],
                ..base.clone()
            };

            match self.library.extract_info(&ctx.url, &options).await {
                Ok(info) => {
                    if let Some(url) = info.url.as_deref().filter(|u| !u.is_empty()) {
                        let method = format!("youtube_forced_{}", client);
                        return Ok(media_from_raw(Platform::YouTube, &info, url, method));
                    }
                    tracing::debug!("Player client {} returned no URL", client);
                }
                // Hand proxy failures back so the chain can rotate
                Err(e) if e.is_transient() && ctx.proxy.is_some() => return Err(e),
                Err(e) => tracing::warn!("Player client {} failed: {}", client, e),
            }
        }

        Err(ExtractorError::Forbidden(
            "YouTube blocked the extraction; provide cookies".to_string(),
        ))
    }
}

#[async_trait]
impl ExtractionStrategy for YouTubeLibrary {
    fn name(&self) -> &'static str {
        "youtube_library"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        let options = Self::base_options(ctx);
        let info = self.library.extract_info(&ctx.url, &options).await?;

        if let Some(url) = playable_url(&info) {
            let method = if options.cookie_file.is_some() {
                "youtube_library_with_cookies"
            } else {
                self.name()
            };
            return Ok(media_from_raw(Platform::YouTube, &info, url, method));
        }

        if ctx.force_alternate {
            return self.extract_with_forced_clients(ctx, &options).await;
        }

        Err(ExtractorError::Parsing(format!(
            "No playable URL for {}",
            ctx.url
        )))
    }
}

/// The selected stream, else the tallest then highest-bitrate HTTP(S) format.
fn playable_url(info: &RawInfo) -> Option<&str> {
    if let Some(url) = info.url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url);
    }

    let mut candidates: Vec<_> = info
        .formats
        .iter()
        .filter(|f| matches!(f.protocol.as_deref(), Some("http") | Some("https")))
        .filter(|f| f.url.as_deref().is_some_and(|u| !u.is_empty()))
        .collect();

    candidates.sort_by(|a, b| {
        let key = |f: &crate::library::RawFormat| (f.height.unwrap_or(0), f.tbr.unwrap_or(0.0));
        key(*b).partial_cmp(&key(*a)).unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates.first().and_then(|f| f.url.as_deref())
}
