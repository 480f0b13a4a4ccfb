use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::extractor::MediaExtractor;
use crate::models::{FormatType, Quality};
use crate::ExtractorError;

pub const API_VERSION: &str = "2.0.0";

const RETRY_AFTER_SECS: u64 = 60;
const MAX_BATCH_URLS: usize = 20;

type ClientRateLimiter = DefaultKeyedRateLimiter<IpAddr>;

#[derive(Clone)]
pub struct AppState {
    extractor: Arc<MediaExtractor>,
    rate_limiter: Option<Arc<ClientRateLimiter>>,
    max_requests_per_minute: u32,
    handler_timeout: Duration,
}

impl AppState {
    pub fn new(extractor: MediaExtractor, config: &AppConfig) -> Self {
        let per_minute = NonZeroU32::new(config.max_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = config
            .enable_rate_limiting
            .then(|| Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))));

        Self {
            extractor: Arc::new(extractor),
            rate_limiter,
            max_requests_per_minute: config.max_requests_per_minute,
            // Library calls may retry through several proxies
            handler_timeout: config.ytdlp_timeout * 2 + config.request_timeout,
        }
    }

    pub fn extractor(&self) -> Arc<MediaExtractor> {
        Arc::clone(&self.extractor)
    }
}

pub fn router(state: AppState) -> Router {
    let handler_timeout = state.handler_timeout;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/api/v1/video", get(extract_social))
        .route("/api/v1/video/info", get(video_info))
        .route("/api/v1/video/formats", get(video_formats))
        .route("/api/v1/video/download-options", get(download_options))
        .route("/api/v1/search", get(search))
        .route("/api/v1/trending", get(trending))
        .route("/api/v1/playlist", get(playlist))
        .route("/api/v1/channel", get(channel))
        .route("/api/v1/download", post(download))
        .route("/api/v1/batch", post(batch))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn(process_time))
        .layer(TimeoutLayer::new(handler_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };

    let ip = client_ip(&request);
    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!("Rate limit exceeded for {}", ip);
            let body = json!({
                "success": false,
                "message": "Rate limit exceeded",
                "error": format!(
                    "Too many requests. Limit: {} per minute",
                    state.max_requests_per_minute
                ),
                "retry_after": RETRY_AFTER_SECS,
                "timestamp": Utc::now(),
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
            response
        }
    }
}

async fn process_time(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;

    let elapsed = format!("{:.4}", start.elapsed().as_secs_f64());
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        headers.insert("x-process-time", value);
    }
    headers.insert("x-api-version", HeaderValue::from_static(API_VERSION));
    response
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "video-link-extractor",
        "version": API_VERSION,
        "platforms": ["youtube", "tiktok", "facebook"],
        "endpoints": {
            "health": "GET /health",
            "stats": "GET /stats",
            "social_extract": "GET /api/v1/video?url=",
            "video_info": "GET /api/v1/video/info?url=&quality=",
            "formats": "GET /api/v1/video/formats?url=",
            "download_options": "GET /api/v1/video/download-options?url=",
            "search": "GET /api/v1/search?q=&max_results=",
            "trending": "GET /api/v1/trending?region=",
            "playlist": "GET /api/v1/playlist?url=&max_videos=",
            "channel": "GET /api/v1/channel?url=&max_videos=",
            "download": "POST /api/v1/download",
            "batch": "POST /api/v1/batch",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.extractor.stats().await;
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": API_VERSION,
        "uptime_seconds": stats.uptime_secs,
        "total_requests": stats.total_requests,
        "failed_requests": stats.failed_requests,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let expired = state.extractor.cleanup_cache();
    let stats = state.extractor.stats().await;
    Json(json!({
        "success": true,
        "extractor": stats,
        "expired_entries_removed": expired,
        "rate_limit": {
            "enabled": state.rate_limiter.is_some(),
            "max_requests_per_minute": state.max_requests_per_minute,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct SocialQuery {
    pub url: String,
    #[serde(default)]
    pub prefer_mobile: bool,
    #[serde(default)]
    pub force_ytdlp: bool,
}

async fn extract_social(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SocialQuery>,
) -> Result<Response, ApiError> {
    // Header values cannot carry newlines, so jars arrive with escaped ones
    let cookies = headers
        .get("cookies")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.replace("\\n", "\n").replace("\\t", "\t"));

    let media = state
        .extractor
        .extract_social(
            &query.url,
            cookies.as_deref(),
            query.prefer_mobile,
            query.force_ytdlp,
        )
        .await?;

    Ok(Json(media).into_response())
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub url: String,
    pub quality: Option<String>,
}

fn parse_quality(raw: Option<&str>) -> Result<Quality, ApiError> {
    raw.unwrap_or("best").parse().map_err(ApiError::BadRequest)
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Response, ApiError> {
    let quality = parse_quality(query.quality.as_deref())?;
    let info = state
        .extractor
        .extract_video_info(&query.url, quality, false)
        .await?;

    Ok(Json(json!({ "success": true, "data": info })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    pub url: String,
}

async fn video_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> Result<Response, ApiError> {
    let (info, groups) = state.extractor.format_groups(&query.url).await?;

    Ok(Json(json!({
        "success": true,
        "video_id": info.id,
        "title": info.title,
        "duration": info.duration,
        "total_formats": info.formats.len(),
        "formats": groups,
    }))
    .into_response())
}

async fn download_options(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> Result<Response, ApiError> {
    let (info, options) = state.extractor.download_options(&query.url).await?;

    Ok(Json(json!({
        "success": true,
        "video_id": info.id,
        "title": info.title,
        "duration": info.duration,
        "duration_string": info.duration_string,
        "download_options": options,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
}

fn default_search_results() -> usize {
    10
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let results = state.extractor.search(&query.q, query.max_results).await?;

    Ok(Json(json!({
        "success": true,
        "query": query.q,
        "total_results": results.len(),
        "results": results,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "US".to_string()
}

async fn trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> Result<Response, ApiError> {
    let videos = state.extractor.trending(&query.region).await?;

    Ok(Json(json!({
        "success": true,
        "region": query.region.to_uppercase(),
        "total_results": videos.len(),
        "trending_videos": videos,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub url: String,
    pub max_videos: Option<usize>,
}

async fn playlist(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Response, ApiError> {
    let playlist = state
        .extractor
        .playlist(&query.url, query.max_videos.unwrap_or(50))
        .await?;

    Ok(Json(json!({ "success": true, "data": playlist })).into_response())
}

async fn channel(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Response, ApiError> {
    let videos = state
        .extractor
        .channel_videos(&query.url, query.max_videos.unwrap_or(20))
        .await?;

    Ok(Json(json!({
        "success": true,
        "channel_url": query.url,
        "total_videos": videos.len(),
        "videos": videos,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format_type: FormatType,
    pub quality: Option<String>,
    pub format_id: Option<String>,
}

async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let quality = parse_quality(request.quality.as_deref())?;
    let link = state
        .extractor
        .download_link(
            &request.url,
            request.format_type,
            quality,
            request.format_id.as_deref(),
        )
        .await?;

    Ok(Json(json!({ "success": true, "data": link })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub urls: Vec<String>,
}

async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Response, ApiError> {
    if request.urls.is_empty() {
        return Err(ApiError::BadRequest("urls must not be empty".to_string()));
    }
    if request.urls.len() > MAX_BATCH_URLS {
        return Err(ApiError::BadRequest(format!(
            "At most {} URLs per batch",
            MAX_BATCH_URLS
        )));
    }

    let response = state.extractor.extract_batch(request.urls).await;
    Ok(Json(json!({ "success": true, "data": response })).into_response())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    error: String,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Extraction(#[from] ExtractorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error) = match &self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message.clone(), "bad_request")
            }
            ApiError::Extraction(e) => {
                let status = e.status_code();
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Extraction failed: {}", e);
                    (status, "Internal server error".to_string(), e.kind())
                } else {
                    (status, e.to_string(), e.kind())
                }
            }
        };

        let body = ErrorBody {
            success: false,
            message,
            error: error.to_string(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieStore;
    use crate::extractor::ExtractorOptions;
    use crate::library::{LibraryOptions, MediaLibrary, RawInfo};
    use crate::platforms::test_support::ScriptedStrategy;
    use crate::platforms::{AttemptContext, PageFetcher, StrategyChain};
    use crate::proxy_manager::ProxyPool;
    use crate::{ExtractedMedia, Platform};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use tower::ServiceExt;

    struct UnreachableLibrary;

    #[async_trait]
    impl MediaLibrary for UnreachableLibrary {
        async fn extract_info(&self, url: &str, _options: &LibraryOptions) -> crate::Result<RawInfo> {
            Err(ExtractorError::Library(format!("no network in tests: {}", url)))
        }
    }

    fn tiktok_success(_ctx: &AttemptContext) -> crate::Result<ExtractedMedia> {
        Ok(ExtractedMedia::new(
            Platform::TikTok,
            "https://v16.tiktokcdn.com/video.mp4",
            "scripted",
        ))
    }

    struct SearchLibrary;

    #[async_trait]
    impl MediaLibrary for SearchLibrary {
        async fn extract_info(&self, url: &str, options: &LibraryOptions) -> crate::Result<RawInfo> {
            assert!(options.flat_playlist);
            let entry = RawInfo {
                id: "aaaaaaaaaaa".to_string(),
                title: Some(format!("Result for {}", url)),
                ..Default::default()
            };
            Ok(RawInfo {
                entries: vec![entry],
                ..Default::default()
            })
        }
    }

    fn app(config: AppConfig) -> Router {
        app_with(Arc::new(UnreachableLibrary), config)
    }

    fn app_with(library: Arc<dyn MediaLibrary>, config: AppConfig) -> Router {
        let dir = std::env::temp_dir();
        let extractor = MediaExtractor::new(
            library,
            PageFetcher::new(Duration::from_secs(5)).unwrap(),
            Arc::new(ProxyPool::disabled()),
            CookieStore::new(dir.join("missing-cookies.txt")),
            ExtractorOptions::default(),
        )
        .with_chain(StrategyChain::new(
            Platform::TikTok,
            vec![ScriptedStrategy::new("scripted", tiktok_success)],
        ));

        router(AppState::new(extractor, &config))
    }

    async fn send(app: Router, request: axum::http::Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_social_extraction_endpoint() {
        let (status, headers, body) = send(
            app(AppConfig::default()),
            get("/api/v1/video?url=https%3A%2F%2Fwww.tiktok.com%2F%40user%2Fvideo%2F7234567890123456789"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["video_url"], "https://v16.tiktokcdn.com/video.mp4");
        assert_eq!(body["platform"], "tiktok");
        assert_eq!(headers["x-api-version"], API_VERSION);
        assert!(headers.contains_key("x-process-time"));
    }

    #[tokio::test]
    async fn test_unsupported_platform_is_bad_request() {
        let (status, _, body) = send(
            app(AppConfig::default()),
            get("/api/v1/video?url=https%3A%2F%2Fvimeo.com%2F1"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unsupported_platform");
    }

    #[tokio::test]
    async fn test_library_failure_is_generic_500() {
        let (status, _, body) = send(
            app(AppConfig::default()),
            get("/api/v1/video/info?url=https%3A%2F%2Fyoutu.be%2FdQw4w9WgXcQ"),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_invalid_quality_rejected() {
        let (status, _, body) = send(
            app(AppConfig::default()),
            get("/api/v1/video/info?url=https%3A%2F%2Fyoutu.be%2FdQw4w9WgXcQ&quality=8k"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_search_endpoint() {
        let (status, _, body) = send(
            app_with(Arc::new(SearchLibrary), AppConfig::default()),
            get("/api/v1/search?q=lofi&max_results=3"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], "lofi");
        assert_eq!(body["total_results"], 1);
        assert_eq!(body["results"][0]["title"], "Result for ytsearch3:lofi");
        assert_eq!(body["results"][0]["url"], "https://www.youtube.com/watch?v=aaaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_search_bounds_rejected() {
        for uri in ["/api/v1/search?q=lofi&max_results=0", "/api/v1/search?q=lofi&max_results=51"] {
            let (status, _, body) = send(app(AppConfig::default()), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "invalid_request");
        }
    }

    #[tokio::test]
    async fn test_trending_endpoint() {
        let (status, _, body) = send(
            app_with(Arc::new(SearchLibrary), AppConfig::default()),
            get("/api/v1/trending?region=de"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["region"], "DE");
        assert_eq!(body["total_results"], 1);
    }

    #[tokio::test]
    async fn test_playlist_requires_youtube() {
        let (status, _, body) = send(
            app(AppConfig::default()),
            get("/api/v1/playlist?url=https%3A%2F%2Fwww.facebook.com%2Fwatch%2F%3Fv%3D1"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/batch")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"urls": ["https://www.tiktok.com/@user/video/7234567890123456789", "https://vimeo.com/1"]}"#,
            ))
            .unwrap();

        let (status, _, body) = send(app(AppConfig::default()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["successful"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["failed"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let config = AppConfig {
            max_requests_per_minute: 2,
            ..AppConfig::default()
        };
        let app = app(config);

        for _ in 0..2 {
            let (status, _, _) = send(app.clone(), get("/health")).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, headers, body) = send(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["retry_after"], 60);
        assert_eq!(body["message"], "Rate limit exceeded");
        assert_eq!(headers[header::RETRY_AFTER], "60");

        let mut other_client = get("/health");
        other_client
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 40000))));
        let (status, _, _) = send(app, other_client).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let config = AppConfig {
            enable_rate_limiting: false,
            max_requests_per_minute: 1,
            ..AppConfig::default()
        };
        let app = app(config);

        for _ in 0..3 {
            let (status, _, _) = send(app.clone(), get("/")).await;
            assert_eq!(status, StatusCode::OK);
        }
    }
}
