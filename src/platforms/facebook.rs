use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use super::{media_from_raw, AttemptContext, ExtractionStrategy, PageFetcher};
use crate::headers;
use crate::library::{LibraryOptions, MediaLibrary};
use crate::{ExtractedMedia, ExtractorError, Platform, Result};

static INLINE_VIDEO_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""browser_native_hd_url":"([^"]+)""#).unwrap(),
        Regex::new(r#""browser_native_sd_url":"([^"]+)""#).unwrap(),
        Regex::new(r#"src:\\"([^"]+\.mp4[^\\]*)\\""#).unwrap(),
        Regex::new(r#"video_src":"([^"]+)""#).unwrap(),
    ]
});

pub struct FacebookLibrary {
    library: Arc<dyn MediaLibrary>,
}

impl FacebookLibrary {
    pub fn new(library: Arc<dyn MediaLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl ExtractionStrategy for FacebookLibrary {
    fn name(&self) -> &'static str {
        "facebook_library"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        let header_set = headers::facebook_headers(ctx.prefer_mobile);
        let header = |name: &str| {
            header_set
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let options = LibraryOptions {
            format: Some("best".to_string()),
            user_agent: header("user-agent"),
            referer: header("referer"),
            proxy: ctx.proxy.clone(),
            socket_timeout: Some(30),
            ..Default::default()
        };

        let info = self.library.extract_info(&ctx.url, &options).await?;
        let video_url = info
            .selected_url()
            .or_else(|| info.first_http_format_url())
            .ok_or_else(|| ExtractorError::Parsing("No media URL in library output".to_string()))?;

        Ok(media_from_raw(Platform::Facebook, &info, video_url, self.name()))
    }
}

pub struct FacebookPageScrape {
    fetcher: PageFetcher,
}

impl FacebookPageScrape {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ExtractionStrategy for FacebookPageScrape {
    fn name(&self) -> &'static str {
        "facebook_page_scrape"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        let html = self
            .fetcher
            .get_text(
                &ctx.url,
                headers::facebook_headers(ctx.prefer_mobile),
                ctx.proxy.as_deref(),
            )
            .await?;

        parse_page(&html, self.name())
            .ok_or_else(|| ExtractorError::Parsing("No video URL in Facebook page".to_string()))
    }
}

/// Look for a video URL in, in order: Open Graph tags, JSON-LD, inline
/// player config, then a plain `<video><source>` element.
pub fn parse_page(html: &str, method: &str) -> Option<ExtractedMedia> {
    let document = Html::parse_document(html);

    let video_url = meta_content(&document, "og:video")
        .or_else(|| meta_content(&document, "og:video:url"))
        .or_else(|| json_ld_content_url(&document))
        .or_else(|| inline_script_url(&document))
        .or_else(|| video_source(&document))?;

    let mut media = ExtractedMedia::new(Platform::Facebook, video_url, method);
    if let Some(title) = meta_content(&document, "og:title").or_else(|| page_title(&document)) {
        media.title = title;
    }
    media.thumbnail = meta_content(&document, "og:image").unwrap_or_default();

    Some(media)
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    select_first(document, &format!(r#"meta[property="{}"]"#, property))?
        .value()
        .attr("content")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn page_title(document: &Html) -> Option<String> {
    let title = select_first(document, "title")?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn json_ld_content_url(document: &Html) -> Option<String> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    document.select(&selector).find_map(|script| {
        let data: Value = serde_json::from_str(&script.text().collect::<String>()).ok()?;
        let content_url = |item: &Value| {
            item.get("contentUrl")
                .and_then(Value::as_str)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
        };

        match &data {
            Value::Array(items) => items.iter().find_map(content_url),
            item => content_url(item),
        }
    })
}

fn inline_script_url(document: &Html) -> Option<String> {
    let selector = Selector::parse("script").ok()?;

    document.select(&selector).find_map(|script| {
        let text = script.text().collect::<String>();
        INLINE_VIDEO_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(&text))
            .map(|captures| captures[1].replace("\\/", "/"))
    })
}

fn video_source(document: &Html) -> Option<String> {
    let selector = Selector::parse("video source[src]").ok()?;
    document
        .select(&selector)
        .filter_map(|source| source.value().attr("src"))
        .find(|src| !src.is_empty())
        .map(str::to_string)
}
