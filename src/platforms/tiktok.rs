use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use super::{media_from_raw, AttemptContext, ExtractionStrategy, PageFetcher};
use crate::headers::{self, MOBILE_SAFARI_UA};
use crate::library::{LibraryOptions, MediaLibrary};
use crate::url_parser::{extract_tiktok_id, is_on_domains};
use crate::{ExtractedMedia, ExtractorError, Platform, Result};

pub const LOOKUP_API_ENDPOINT: &str = "https://www.tikwm.com/api/";

static SIGI_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)window\['SIGI_STATE'\]=(\{.*?\});window\[").unwrap());

static UNIVERSAL_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)__UNIVERSAL_DATA_FOR_REHYDRATION__=(\{.*?\});").unwrap());

/// yt-dlp posing as mobile Safari; only CDN-hosted results count.
pub struct TikTokLibrary {
    library: Arc<dyn MediaLibrary>,
}

impl TikTokLibrary {
    pub fn new(library: Arc<dyn MediaLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl ExtractionStrategy for TikTokLibrary {
    fn name(&self) -> &'static str {
        "tiktok_library"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        let options = LibraryOptions {
            format: Some("bestvideo+bestaudio/best".to_string()),
            user_agent: Some(MOBILE_SAFARI_UA.to_string()),
            referer: Some("https://www.tiktok.com/".to_string()),
            proxy: ctx.proxy.clone(),
            socket_timeout: Some(30),
            ..Default::default()
        };

        let info = self.library.extract_info(&ctx.url, &options).await?;
        let video_url = info
            .selected_url()
            .or_else(|| info.first_http_format_url())
            .ok_or_else(|| ExtractorError::Parsing("No media URL in library output".to_string()))?;

        if !is_on_domains(video_url, Platform::TikTok.media_domains()) {
            return Err(ExtractorError::Parsing(format!(
                "Media URL is not on a TikTok CDN: {}",
                video_url
            )));
        }

        Ok(media_from_raw(Platform::TikTok, &info, video_url, self.name()))
    }
}

/// Reads the state blob TikTok embeds in the video page.
pub struct TikTokPageScrape {
    fetcher: PageFetcher,
}

impl TikTokPageScrape {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ExtractionStrategy for TikTokPageScrape {
    fn name(&self) -> &'static str {
        "tiktok_page_scrape"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        let html = self
            .fetcher
            .get_text(&ctx.url, headers::tiktok_headers(), ctx.proxy.as_deref())
            .await?;

        parse_page(&html, self.name())
            .ok_or_else(|| ExtractorError::Parsing("No video data in TikTok page".to_string()))
    }
}

/// Public lookup service keyed by the page URL.
pub struct TikTokLookupApi {
    fetcher: PageFetcher,
    endpoint: String,
}

impl TikTokLookupApi {
    pub fn new(fetcher: PageFetcher, endpoint: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for TikTokLookupApi {
    fn name(&self) -> &'static str {
        "tiktok_lookup_api"
    }

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
        if extract_tiktok_id(&ctx.url).is_none() {
            return Err(ExtractorError::InvalidUrl(format!(
                "No TikTok video id in {}",
                ctx.url
            )));
        }

        let lookup = url::Url::parse_with_params(&self.endpoint, &[("url", ctx.url.as_str())])
            .map_err(|e| ExtractorError::InvalidUrl(format!("Bad lookup endpoint: {}", e)))?;

        let body = self
            .fetcher
            .get_json(lookup.as_str(), headers::api_headers(), ctx.proxy.as_deref())
            .await?;

        parse_lookup_response(&body, self.name())
    }
}

/// Video record from `SIGI_STATE`, falling back to the rehydration blob.
pub fn parse_page(html: &str, method: &str) -> Option<ExtractedMedia> {
    let document = Html::parse_document(html);

    let item = state_blob(html, &document, &SIGI_STATE, "SIGI_STATE")
        .and_then(|state| item_from_sigi_state(&state))
        .or_else(|| {
            state_blob(
                html,
                &document,
                &UNIVERSAL_DATA,
                "__UNIVERSAL_DATA_FOR_REHYDRATION__",
            )
            .and_then(|data| item_from_universal_data(&data))
        })?;

    media_from_item(&item, method)
}

/// A state object assigned in an inline script or carried as a JSON script by id.
fn state_blob(html: &str, document: &Html, assignment: &Regex, script_id: &str) -> Option<Value> {
    if let Some(captures) = assignment.captures(html) {
        if let Ok(value) = serde_json::from_str(&captures[1]) {
            return Some(value);
        }
    }

    let selector = Selector::parse(&format!("script#{}", script_id)).ok()?;
    let script = document.select(&selector).next()?;
    serde_json::from_str(&script.text().collect::<String>()).ok()
}

fn item_from_sigi_state(state: &Value) -> Option<Value> {
    state
        .get("ItemModule")?
        .as_object()?
        .values()
        .find(|item| item.get("video").is_some())
        .cloned()
}

fn item_from_universal_data(data: &Value) -> Option<Value> {
    data.get("__DEFAULT_SCOPE__")?
        .get("webapp.video-detail")?
        .get("itemInfo")?
        .get("itemStruct")
        .cloned()
}

fn media_from_item(item: &Value, method: &str) -> Option<ExtractedMedia> {
    let video = item.get("video")?;
    let video_url = ["downloadAddr", "playAddr"]
        .iter()
        .filter_map(|key| video.get(*key).and_then(Value::as_str))
        .find(|u| !u.is_empty())?;

    let mut media = ExtractedMedia::new(Platform::TikTok, video_url, method);
    if let Some(desc) = item.get("desc").and_then(Value::as_str).filter(|d| !d.is_empty()) {
        media.title = desc.to_string();
    }
    media.thumbnail = str_field(video, "cover");
    media.duration = u64_field(video, "duration").unwrap_or(0);
    media.width = u64_field(video, "width").map(|w| w as u32);
    media.height = u64_field(video, "height").map(|h| h as u32);
    media.uploader = match item.get("author") {
        Some(Value::String(name)) => name.clone(),
        Some(author) => str_field(author, "uniqueId"),
        None => String::new(),
    };
    media.view_count = item
        .get("stats")
        .and_then(|stats| u64_field(stats, "playCount"))
        .unwrap_or(0);

    Some(media)
}

/// Normalized record from a lookup API body; a non-zero `code` is a failure.
pub fn parse_lookup_response(body: &Value, method: &str) -> Result<ExtractedMedia> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 {
        let message = body.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ExtractorError::Parsing(format!(
            "Lookup API returned code {}: {}",
            code, message
        )));
    }

    let data = body
        .get("data")
        .ok_or_else(|| ExtractorError::Parsing("Lookup API response has no data".to_string()))?;

    let mut media = ExtractedMedia::new(Platform::TikTok, str_field(data, "play"), method);
    if let Some(title) = data.get("title").and_then(Value::as_str).filter(|t| !t.is_empty()) {
        media.title = title.to_string();
    }
    media.thumbnail = str_field(data, "cover");
    media.duration = u64_field(data, "duration").unwrap_or(0);
    media.uploader = data
        .get("author")
        .map(|author| str_field(author, "unique_id"))
        .unwrap_or_default();
    media.view_count = u64_field(data, "play_count").unwrap_or(0);

    Ok(media)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// TikTok mixes numeric and string encodings for counters.
fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::RawInfo;
    use serde_json::json;

    const SIGI_PAGE: &str = r#"<html><head></head><body>
        <script>window['SIGI_STATE']={"ItemModule":{"7234567890123456789":{"id":"7234567890123456789","desc":"dance clip","author":"dancer","video":{"playAddr":"https://v16-webapp.tiktokcdn.com/play.mp4","downloadAddr":"https://v16-webapp.tiktokcdn.com/download.mp4","cover":"https://p16.tiktokcdn.com/cover.jpg","duration":15,"width":576,"height":1024},"stats":{"playCount":1200}}}};window['SIGI_RETRY']={}</script>
        </body></html>"#;

    const UNIVERSAL_PAGE: &str = r#"<html><body>
        <script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">{"__DEFAULT_SCOPE__":{"webapp.video-detail":{"itemInfo":{"itemStruct":{"desc":"","author":{"uniqueId":"creator"},"video":{"downloadAddr":"","playAddr":"https://v19.tiktokcdn.com/play.mp4","duration":"31"},"stats":{"playCount":"4500"}}}}}}</script>
        </body></html>"#;

    #[test]
    fn test_parse_sigi_state_page() {
        let media = parse_page(SIGI_PAGE, "tiktok_page_scrape").unwrap();
        assert_eq!(media.video_url, "https://v16-webapp.tiktokcdn.com/download.mp4");
        assert_eq!(media.title, "dance clip");
        assert_eq!(media.uploader, "dancer");
        assert_eq!(media.duration, 15);
        assert_eq!(media.height, Some(1024));
        assert_eq!(media.view_count, 1200);
    }

    #[test]
    fn test_parse_rehydration_page() {
        let media = parse_page(UNIVERSAL_PAGE, "tiktok_page_scrape").unwrap();
        assert_eq!(media.video_url, "https://v19.tiktokcdn.com/play.mp4");
        assert_eq!(media.title, "TikTok video");
        assert_eq!(media.uploader, "creator");
        assert_eq!(media.duration, 31);
        assert_eq!(media.view_count, 4500);
    }

    #[test]
    fn test_page_without_state() {
        assert!(parse_page("<html><body><p>login</p></body></html>", "x").is_none());
    }

    #[test]
    fn test_parse_lookup_response() {
        let body = json!({
            "code": 0,
            "msg": "success",
            "data": {
                "title": "api clip",
                "play": "https://v16m.tiktokcdn.com/api.mp4",
                "cover": "https://p16.tiktokcdn.com/c.jpg",
                "duration": 12,
                "play_count": 99,
                "author": {"unique_id": "apiuser"}
            }
        });

        let media = parse_lookup_response(&body, "tiktok_lookup_api").unwrap();
        assert_eq!(media.video_url, "https://v16m.tiktokcdn.com/api.mp4");
        assert_eq!(media.uploader, "apiuser");
        assert_eq!(media.method, "tiktok_lookup_api");

        let failed = json!({"code": -1, "msg": "Url parsing is failed!"});
        assert!(parse_lookup_response(&failed, "tiktok_lookup_api").is_err());
    }

    struct FixedLibrary(&'static str);

    #[async_trait]
    impl MediaLibrary for FixedLibrary {
        async fn extract_info(&self, _url: &str, options: &LibraryOptions) -> Result<RawInfo> {
            assert_eq!(options.user_agent.as_deref(), Some(MOBILE_SAFARI_UA));
            Ok(RawInfo {
                id: "1".to_string(),
                title: Some("clip".to_string()),
                url: Some(self.0.to_string()),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_library_result_must_be_on_cdn() {
        let ctx = AttemptContext::new("https://www.tiktok.com/@user/video/7234567890123456789");

        let good = TikTokLibrary::new(Arc::new(FixedLibrary("https://v16.tiktokcdn.com/a.mp4")));
        let media = good.extract(&ctx).await.unwrap();
        assert_eq!(media.method, "tiktok_library");
        assert_eq!(media.title, "clip");

        let bad = TikTokLibrary::new(Arc::new(FixedLibrary("https://www.tiktok.com/watermark.mp4")));
        assert!(matches!(bad.extract(&ctx).await, Err(ExtractorError::Parsing(_))));
    }
}
