use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::cache::{CacheStats, TtlCache};
use crate::config::AppConfig;
use crate::cookies::{CookieSource, CookieStore};
use crate::library::{LibraryOptions, MediaLibrary, YtDlp};
use crate::library::RawInfo;
use crate::models::{
    bytes_to_mb, download_options, estimate_filesize_mb, quality_label, BatchExtractionResponse,
    DownloadLink, DownloadOption, ExtractionFailure, Format, FormatGroups, FormatType,
    PlaylistInfo, Quality, SearchResult, VideoInfo,
};
use crate::platforms::{
    facebook::{FacebookLibrary, FacebookPageScrape},
    tiktok::{TikTokLibrary, TikTokLookupApi, TikTokPageScrape, LOOKUP_API_ENDPOINT},
    youtube::YouTubeLibrary,
    AttemptContext, PageFetcher, StrategyChain, MAX_PROXY_ATTEMPTS,
};
use crate::proxy_manager::{self, HttpProbe, ProxyPool, ProxyStats, DEFAULT_PROBE_URL};
use crate::{url_parser, ExtractedMedia, ExtractorError, Platform, Result};

const SOCIAL_OPERATION: &str = "social_extract";
const INFO_OPERATION: &str = "video_info";
const LISTING_OPERATION: &str = "listing";

pub const MAX_SEARCH_RESULTS: usize = 50;
pub const MAX_LISTING_VIDEOS: usize = 200;
pub const TRENDING_LIMIT: usize = 20;

/// Popular searches standing in for a trending feed
const TRENDING_QUERIES: &[&str] = &["trending music", "viral videos"];
const TRENDING_PER_QUERY: usize = 10;

/// Tunables that do not come from the collaborators themselves
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub cache_ttl: Duration,
    pub batch_concurrency: usize,
    pub max_video_duration: u64,
    pub user_agent: Option<String>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            batch_concurrency: 3,
            max_video_duration: 7200,
            user_agent: None,
        }
    }
}

/// Extraction orchestrator: platform dispatch, fallback chains, proxies,
/// cookies and result caching.
pub struct MediaExtractor {
    chains: HashMap<Platform, StrategyChain>,
    library: Arc<dyn MediaLibrary>,
    proxies: Arc<ProxyPool>,
    cookies: CookieStore,
    social_cache: TtlCache<ExtractedMedia>,
    info_cache: TtlCache<VideoInfo>,
    listing_cache: TtlCache<RawInfo>,
    options: ExtractorOptions,
    requests: AtomicU64,
    failures: AtomicU64,
    started_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractorStats {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub social_cache: CacheStats,
    pub info_cache: CacheStats,
    pub listing_cache: CacheStats,
    pub proxies: ProxyStats,
    pub strategies: HashMap<Platform, Vec<&'static str>>,
}

impl MediaExtractor {
    /// Build every collaborator from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let library: Arc<dyn MediaLibrary> =
            Arc::new(YtDlp::new(config.ytdlp_path.clone(), config.ytdlp_timeout));
        let fetcher = PageFetcher::new(config.request_timeout)?;

        let proxies = if config.use_proxies {
            let mut candidates = config.proxy_list.clone();
            if let Some(path) = &config.proxy_file {
                match proxy_manager::load_from_file(path).await {
                    Ok(from_file) => candidates.extend(from_file),
                    Err(e) => tracing::warn!("Failed to read proxy file {}: {}", path, e),
                }
            }
            let probe = Arc::new(HttpProbe::new(DEFAULT_PROBE_URL, config.proxy_timeout));
            ProxyPool::new(candidates, probe, config.proxy_rotation_interval)
        } else {
            ProxyPool::disabled()
        };

        let cookies = CookieStore::new(&config.cookies_path);

        let options = ExtractorOptions {
            cache_ttl: config.cache_ttl,
            batch_concurrency: config.batch_concurrency,
            max_video_duration: config.max_video_duration,
            user_agent: config.user_agent.clone(),
        };

        Ok(Self::new(library, fetcher, Arc::new(proxies), cookies, options))
    }

    /// Orchestrator with the default strategy chain for every platform.
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        fetcher: PageFetcher,
        proxies: Arc<ProxyPool>,
        cookies: CookieStore,
        options: ExtractorOptions,
    ) -> Self {
        let mut chains = HashMap::new();

        chains.insert(
            Platform::TikTok,
            StrategyChain::new(
                Platform::TikTok,
                vec![
                    Arc::new(TikTokLibrary::new(Arc::clone(&library))),
                    Arc::new(TikTokPageScrape::new(fetcher.clone())),
                    Arc::new(TikTokLookupApi::new(fetcher.clone(), LOOKUP_API_ENDPOINT)),
                ],
            ),
        );
        chains.insert(
            Platform::Facebook,
            StrategyChain::new(
                Platform::Facebook,
                vec![
                    Arc::new(FacebookLibrary::new(Arc::clone(&library))),
                    Arc::new(FacebookPageScrape::new(fetcher)),
                ],
            ),
        );
        chains.insert(
            Platform::YouTube,
            StrategyChain::new(
                Platform::YouTube,
                vec![Arc::new(YouTubeLibrary::new(Arc::clone(&library)))],
            ),
        );

        Self {
            chains,
            library,
            proxies,
            cookies,
            social_cache: TtlCache::new(options.cache_ttl),
            info_cache: TtlCache::new(options.cache_ttl),
            listing_cache: TtlCache::new(options.cache_ttl),
            options,
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Replace the chain registered for the chain's platform.
    pub fn with_chain(mut self, chain: StrategyChain) -> Self {
        self.chains.insert(chain.platform(), chain);
        self
    }

    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    /// Direct media URL for a social video through the platform's fallback chain.
    pub async fn extract_social(
        &self,
        url: &str,
        request_cookies: Option<&str>,
        prefer_mobile: bool,
        force_alternate: bool,
    ) -> Result<ExtractedMedia> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let parsed = url_parser::parse(url)?;

        let chain = self
            .chains
            .get(&parsed.platform)
            .ok_or_else(|| ExtractorError::UnsupportedPlatform(parsed.host.clone()))?;

        let mobile = prefer_mobile.to_string();
        let force = force_alternate.to_string();
        let canonical = parsed.canonical();
        let params = [
            ("url", canonical.as_str()),
            ("prefer_mobile", mobile.as_str()),
            ("force_alternate", force.as_str()),
        ];
        let cacheable = request_cookies.is_none();

        if cacheable {
            if let Some(cached) = self.social_cache.get(SOCIAL_OPERATION, &params) {
                return Ok(cached);
            }
        }

        // Only the YouTube library consumes a cookie jar
        let cookie_source = match parsed.platform {
            Platform::YouTube => self.cookies.resolve(request_cookies).await?,
            _ => CookieSource::None,
        };

        let ctx = AttemptContext {
            url: parsed.original.clone(),
            proxy: None,
            cookie_file: cookie_source.path().map(|p| p.to_path_buf()),
            prefer_mobile,
            force_alternate,
        };

        let result = chain.run(&ctx, &self.proxies).await;
        drop(cookie_source);

        match result {
            Ok(media) => {
                if cacheable {
                    self.social_cache.insert(SOCIAL_OPERATION, &params, media.clone());
                }
                Ok(media)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Full metadata record from the extraction library.
    pub async fn extract_video_info(
        &self,
        url: &str,
        quality: Quality,
        audio_only: bool,
    ) -> Result<VideoInfo> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let parsed = url_parser::parse(url)?;

        let audio = audio_only.to_string();
        let canonical = parsed.canonical();
        let params = [
            ("url", canonical.as_str()),
            ("quality", quality.as_str()),
            ("audio", audio.as_str()),
        ];
        if let Some(cached) = self.info_cache.get(INFO_OPERATION, &params) {
            return Ok(cached);
        }

        let result = self.fetch_video_info(&parsed, quality, audio_only).await;
        match result {
            Ok(info) => {
                self.info_cache.insert(INFO_OPERATION, &params, info.clone());
                Ok(info)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn fetch_video_info(
        &self,
        parsed: &url_parser::ParsedUrl,
        quality: Quality,
        audio_only: bool,
    ) -> Result<VideoInfo> {
        let cookie_source = match parsed.platform {
            Platform::YouTube => self.cookies.resolve(None).await?,
            _ => CookieSource::None,
        };

        let base = LibraryOptions {
            format: Some(quality.format_selector(audio_only)),
            user_agent: self.options.user_agent.clone(),
            cookie_file: cookie_source.path().map(|p| p.to_path_buf()),
            socket_timeout: Some(30),
            ..Default::default()
        };

        let raw = self.library_with_proxies(&parsed.original, base).await?;
        let info = raw.into_video_info();

        if info.id.is_empty() || info.title.is_empty() {
            return Err(ExtractorError::Parsing(
                "Library returned an incomplete record".to_string(),
            ));
        }
        if let Some(duration) = info.duration {
            if duration > self.options.max_video_duration {
                return Err(ExtractorError::InvalidUrl(format!(
                    "Video is too long: {}s exceeds the {}s limit",
                    duration, self.options.max_video_duration
                )));
            }
        }

        Ok(info)
    }

    async fn library_with_proxies(
        &self,
        url: &str,
        base: LibraryOptions,
    ) -> Result<RawInfo> {
        let mut attempt = 1;

        loop {
            let proxy = self.proxies.next_proxy().await;
            let options = LibraryOptions {
                proxy: proxy.clone(),
                ..base.clone()
            };

            match (self.library.extract_info(url, &options).await, proxy) {
                (Err(e), Some(proxy)) if e.is_transient() && attempt < MAX_PROXY_ATTEMPTS => {
                    tracing::warn!("Library call through {} failed: {}", proxy, e);
                    self.proxies.mark_failed(&proxy).await;
                    attempt += 1;
                }
                (Err(e), Some(proxy)) if e.is_transient() => {
                    self.proxies.mark_failed(&proxy).await;
                    return Err(e);
                }
                (result, _) => return result,
            }
        }
    }

    /// Formats bucketed by height, alongside the record they came from.
    pub async fn format_groups(&self, url: &str) -> Result<(VideoInfo, FormatGroups)> {
        let info = self.extract_video_info(url, Quality::Best, false).await?;
        let groups = FormatGroups::from_formats(&info.formats);
        Ok((info, groups))
    }

    /// Pick a direct download URL by explicit format id, or by type and quality.
    pub async fn download_link(
        &self,
        url: &str,
        format_type: FormatType,
        quality: Quality,
        format_id: Option<&str>,
    ) -> Result<DownloadLink> {
        let audio_only = format_type == FormatType::Audio;
        let info = self.extract_video_info(url, quality, audio_only).await?;

        let selected = match format_id {
            Some(id) => Some(
                info.formats
                    .iter()
                    .find(|f| f.format_id == id)
                    .ok_or_else(|| ExtractorError::NotFound(format!("Format not found: {}", id)))?,
            ),
            None if audio_only => select_audio_format(&info.formats),
            None => select_video_format(&info.formats, quality),
        };

        let fallback = if audio_only {
            info.best_audio_url.clone()
        } else {
            info.best_video_url.clone()
        };

        let download_url = selected
            .map(|f| f.url.clone())
            .or(fallback)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ExtractorError::NotFound(format!("No download URL for {}", url)))?;

        let default_ext = if audio_only { "mp3" } else { "mp4" };

        let filesize = selected.and_then(|f| f.filesize);
        let size_label = match (format_type, selected.and_then(|f| f.video_height())) {
            (FormatType::Audio, _) => "standard".to_string(),
            (FormatType::Video, Some(height)) => quality_label(height, None),
            (FormatType::Video, None) => quality.as_str().to_string(),
        };
        let filesize_mb = filesize
            .map(bytes_to_mb)
            .or_else(|| {
                info.duration
                    .map(|d| estimate_filesize_mb(d, &size_label, format_type))
            })
            .map(|mb| (mb * 100.0).round() / 100.0);

        Ok(DownloadLink {
            download_url,
            title: info.title.clone(),
            format: selected.map_or_else(|| default_ext.to_string(), |f| f.ext.clone()),
            format_id: selected.map(|f| f.format_id.clone()),
            quality,
            format_type,
            filesize,
            filesize_mb,
            duration: info.duration,
            video_id: info.id.clone(),
        })
    }

    /// Download menu with per-option size estimates.
    pub async fn download_options(&self, url: &str) -> Result<(VideoInfo, Vec<DownloadOption>)> {
        let info = self.extract_video_info(url, Quality::Best, false).await?;
        let options = download_options(&info);
        Ok((info, options))
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Flat listing of a playlist-like target (search, playlist or channel).
    async fn listing(&self, target: &str, end: usize, region: Option<&str>) -> Result<RawInfo> {
        let end_param = end.to_string();
        let params = [
            ("target", target),
            ("end", end_param.as_str()),
            ("region", region.unwrap_or_default()),
        ];
        if let Some(cached) = self.listing_cache.get(LISTING_OPERATION, &params) {
            return Ok(cached);
        }

        let base = LibraryOptions {
            user_agent: self.options.user_agent.clone(),
            socket_timeout: Some(30),
            flat_playlist: true,
            playlist_end: Some(end),
            geo_country: region.map(str::to_string),
            ..Default::default()
        };
        let raw = self.library_with_proxies(target, base).await?;
        self.listing_cache.insert(LISTING_OPERATION, &params, raw.clone());
        Ok(raw)
    }

    /// YouTube search through the library's `ytsearchN:` pseudo-URL.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let query = query.trim();
        if query.is_empty() {
            return Err(ExtractorError::InvalidRequest(
                "Search query must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_SEARCH_RESULTS).contains(&max_results) {
            return Err(ExtractorError::InvalidRequest(format!(
                "max_results must be between 1 and {}",
                MAX_SEARCH_RESULTS
            )));
        }

        let target = format!("ytsearch{}:{}", max_results, query);
        let result = self.listing(&target, max_results, None).await;
        let results: Vec<SearchResult> = self
            .track(result)?
            .entry_results()
            .into_iter()
            .take(max_results)
            .collect();

        tracing::info!("Search for '{}' returned {} videos", query, results.len());
        Ok(results)
    }

    /// Popular videos for a region, assembled from a few broad searches.
    pub async fn trending(&self, region: &str) -> Result<Vec<SearchResult>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let region = region.trim().to_uppercase();
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ExtractorError::InvalidRequest(format!(
                "Region must be a two-letter country code: {}",
                region
            )));
        }

        let searches = TRENDING_QUERIES.iter().map(|query| {
            let target = format!("ytsearch{}:{}", TRENDING_PER_QUERY, query);
            let region = region.as_str();
            async move { self.listing(&target, TRENDING_PER_QUERY, Some(region)).await }
        });

        let mut videos: Vec<SearchResult> = Vec::new();
        let mut last_error = None;
        for result in futures::future::join_all(searches).await {
            match result {
                Ok(raw) => {
                    for entry in raw.entry_results() {
                        if !videos.iter().any(|v| v.id == entry.id) {
                            videos.push(entry);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Trending search failed for {}: {}", region, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if videos.is_empty() => self.track(Err(e)),
            _ => {
                videos.truncate(TRENDING_LIMIT);
                Ok(videos)
            }
        }
    }

    fn youtube_listing_url(url: &str, max_videos: usize) -> Result<url_parser::ParsedUrl> {
        let parsed = url_parser::parse(url)?;
        if parsed.platform != Platform::YouTube {
            return Err(ExtractorError::InvalidRequest(format!(
                "Listings are only available for YouTube, not {}",
                parsed.platform
            )));
        }
        if !(1..=MAX_LISTING_VIDEOS).contains(&max_videos) {
            return Err(ExtractorError::InvalidRequest(format!(
                "max_videos must be between 1 and {}",
                MAX_LISTING_VIDEOS
            )));
        }
        Ok(parsed)
    }

    /// Playlist metadata with its first `max_videos` entries.
    pub async fn playlist(&self, url: &str, max_videos: usize) -> Result<PlaylistInfo> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let parsed = Self::youtube_listing_url(url, max_videos)?;

        let result = self.listing(&parsed.original, max_videos, None).await;
        let raw = self.track(result)?;
        if raw.entries.is_empty() {
            return self.track(Err(ExtractorError::NotFound(format!(
                "No videos in playlist {}",
                parsed.original
            ))));
        }

        let mut playlist = raw.into_playlist_info(&parsed.original);
        playlist.entries.truncate(max_videos);
        playlist.playlist_count = playlist.entries.len();
        tracing::info!("Playlist {} listed {} videos", playlist.title, playlist.playlist_count);
        Ok(playlist)
    }

    /// Latest uploads of a channel, from its `/videos` tab.
    pub async fn channel_videos(&self, url: &str, max_videos: usize) -> Result<Vec<SearchResult>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let parsed = Self::youtube_listing_url(url, max_videos)?;

        let base = parsed.original.trim_end_matches('/');
        let target = if base.ends_with("/videos") {
            base.to_string()
        } else {
            format!("{}/videos", base)
        };

        let result = self.listing(&target, max_videos, None).await;
        let mut videos = self.track(result)?.entry_results();
        videos.truncate(max_videos);
        Ok(videos)
    }

    /// Social extraction over many URLs with bounded concurrency.
    pub async fn extract_batch(&self, urls: Vec<String>) -> BatchExtractionResponse {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.batch_concurrency.max(1)));

        let tasks = urls.into_iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                let result = self.extract_social(&url, None, false, false).await;
                (url, result)
            }
        });

        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for (url, result) in futures::future::join_all(tasks).await {
            match result {
                Ok(media) => successful.push(media),
                Err(e) => failed.push(ExtractionFailure {
                    url,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                }),
            }
        }

        BatchExtractionResponse {
            successful,
            failed,
            total_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Drop expired entries from both caches.
    pub fn cleanup_cache(&self) -> usize {
        self.social_cache.cleanup() + self.info_cache.cleanup() + self.listing_cache.cleanup()
    }

    pub async fn stats(&self) -> ExtractorStats {
        ExtractorStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            total_requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failures.load(Ordering::Relaxed),
            social_cache: self.social_cache.stats(),
            info_cache: self.info_cache.stats(),
            listing_cache: self.listing_cache.stats(),
            proxies: self.proxies.stats().await,
            strategies: self
                .chains
                .iter()
                .map(|(platform, chain)| (*platform, chain.strategy_names()))
                .collect(),
        }
    }
}

fn audio_codec_priority(acodec: Option<&str>) -> u8 {
    match acodec.unwrap_or_default() {
        c if c.starts_with("mp4a") || c.starts_with("aac") => 3,
        c if c.starts_with("opus") => 2,
        c if c.starts_with("mp3") => 1,
        _ => 0,
    }
}

fn compare_f64(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    a.unwrap_or(0.0)
        .partial_cmp(&b.unwrap_or(0.0))
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Best audio-only track: AAC over Opus over MP3, then bitrate.
pub fn select_audio_format(formats: &[Format]) -> Option<&Format> {
    formats
        .iter()
        .filter(|f| f.is_audio_only() && !f.url.is_empty())
        .max_by(|a, b| {
            audio_codec_priority(a.acodec.as_deref())
                .cmp(&audio_codec_priority(b.acodec.as_deref()))
                .then_with(|| compare_f64(a.tbr, b.tbr))
        })
}

/// Tallest video stream, capped at the quality's height when it has one.
pub fn select_video_format(formats: &[Format], quality: Quality) -> Option<&Format> {
    let target = quality.target_height();

    formats
        .iter()
        .filter(|f| f.has_video() && !f.url.is_empty())
        .filter(|f| match target {
            Some(max) => f.video_height().is_some_and(|h| h <= max),
            None => true,
        })
        .max_by(|a, b| {
            a.video_height()
                .unwrap_or(0)
                .cmp(&b.video_height().unwrap_or(0))
                .then_with(|| compare_f64(a.tbr, b.tbr))
        })
}
