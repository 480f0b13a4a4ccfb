pub mod facebook;
pub mod tiktok;
pub mod youtube;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::library::RawInfo;
use crate::proxy_manager::{self, ProxyPool};
use crate::{ExtractedMedia, ExtractorError, Platform, Result};

/// Attempts per strategy when failures look proxy-related
pub const MAX_PROXY_ATTEMPTS: usize = 3;

/// Inputs of one strategy attempt
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    pub url: String,
    pub proxy: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub prefer_mobile: bool,
    pub force_alternate: bool,
}

impl AttemptContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    fn with_proxy(&self, proxy: Option<String>) -> Self {
        Self {
            proxy,
            ..self.clone()
        }
    }
}

/// One way of turning a page URL into a direct media URL
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Reported as `method` on success
    fn name(&self) -> &'static str;

    async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia>;
}

/// Ordered fallback chain for one platform; the first usable result wins.
pub struct StrategyChain {
    platform: Platform,
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
}

impl StrategyChain {
    pub fn new(platform: Platform, strategies: Vec<Arc<dyn ExtractionStrategy>>) -> Self {
        Self {
            platform,
            strategies,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &AttemptContext, proxies: &ProxyPool) -> Result<ExtractedMedia> {
        let mut denied: Option<String> = None;

        for strategy in &self.strategies {
            match run_with_proxies(strategy.as_ref(), ctx, proxies).await {
                Ok(media) if media.is_usable() => {
                    tracing::info!(
                        "Extracted {} media via {} for {}",
                        self.platform,
                        strategy.name(),
                        ctx.url
                    );
                    return Ok(media);
                }
                Ok(_) => {
                    tracing::warn!("{} returned no media URL for {}", strategy.name(), ctx.url);
                }
                Err(ExtractorError::Forbidden(reason)) => {
                    tracing::warn!("{} was denied for {}: {}", strategy.name(), ctx.url, reason);
                    denied = Some(reason);
                }
                Err(e) => {
                    tracing::warn!("{} failed for {}: {}", strategy.name(), ctx.url, e);
                }
            }
        }

        Err(match denied {
            Some(reason) => ExtractorError::Forbidden(reason),
            None => ExtractorError::NotFound(format!(
                "Could not extract {} video after {} attempts",
                self.platform,
                self.strategies.len()
            )),
        })
    }
}

/// Run one strategy, moving to the next proxy on transient failures.
async fn run_with_proxies(
    strategy: &dyn ExtractionStrategy,
    base: &AttemptContext,
    proxies: &ProxyPool,
) -> Result<ExtractedMedia> {
    let mut attempt = 1;

    loop {
        let proxy = proxies.next_proxy().await;
        let ctx = base.with_proxy(proxy.clone());

        match (strategy.extract(&ctx).await, proxy) {
            (Err(e), Some(proxy)) if e.is_transient() => {
                proxies.mark_failed(&proxy).await;
                if attempt >= MAX_PROXY_ATTEMPTS {
                    return Err(e);
                }
                tracing::warn!(
                    "{} attempt {} through {} failed: {}",
                    strategy.name(),
                    attempt,
                    proxy,
                    e
                );
                attempt += 1;
            }
            (result, _) => return result,
        }
    }
}

/// Shared HTTP access for scraping strategies
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        match proxy {
            Some(proxy) => proxy_manager::build_client(proxy, self.timeout),
            None => Ok(self.client.clone()),
        }
    }

    async fn get(&self, url: &str, headers: HeaderMap, proxy: Option<&str>) -> Result<reqwest::Response> {
        let response = self
            .client_for(proxy)?
            .get(url)
            .headers(headers)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(ExtractorError::NotFound(format!("Page not found: {}", url)))
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(ExtractorError::RateLimited),
            _ => {}
        }
        Ok(response.error_for_status()?)
    }

    pub async fn get_text(&self, url: &str, headers: HeaderMap, proxy: Option<&str>) -> Result<String> {
        Ok(self.get(url, headers, proxy).await?.text().await?)
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: HeaderMap,
        proxy: Option<&str>,
    ) -> Result<serde_json::Value> {
        Ok(self.get(url, headers, proxy).await?.json().await?)
    }
}

/// Normalized record from a library result and the chosen media URL
pub fn media_from_raw(
    platform: Platform,
    info: &RawInfo,
    video_url: &str,
    method: impl Into<String>,
) -> ExtractedMedia {
    let mut media = ExtractedMedia::new(platform, video_url, method);
    if let Some(title) = info.title.as_deref().filter(|t| !t.is_empty()) {
        media.title = title.to_string();
    }
    media.thumbnail = info.best_thumbnail().unwrap_or_default().to_string();
    media.duration = info.duration_secs().unwrap_or(0);
    media.width = info.width;
    media.height = info.height;
    media.uploader = info.uploader.clone().unwrap_or_default();
    media.view_count = info.view_count.unwrap_or(0);
    media
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strategy with a scripted outcome that counts its calls
    pub struct ScriptedStrategy {
        pub name: &'static str,
        pub outcome: fn(&AttemptContext) -> Result<ExtractedMedia>,
        pub calls: AtomicUsize,
    }

    impl ScriptedStrategy {
        pub fn new(
            name: &'static str,
            outcome: fn(&AttemptContext) -> Result<ExtractedMedia>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, ctx: &AttemptContext) -> Result<ExtractedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(ctx)
        }
    }
}
