use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_address: String,

    pub use_proxies: bool,
    pub proxy_list: Vec<String>,
    pub proxy_file: Option<String>,
    pub proxy_timeout: Duration,
    pub proxy_rotation_interval: Duration,

    pub cookies_path: String,
    pub use_browser_cookies: bool,
    pub browser_name: String,

    pub enable_rate_limiting: bool,
    pub max_requests_per_minute: u32,

    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub ytdlp_path: String,
    pub ytdlp_timeout: Duration,
    pub batch_concurrency: usize,
    pub max_video_duration: u64,
    pub user_agent: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            use_proxies: false,
            proxy_list: Vec::new(),
            proxy_file: None,
            proxy_timeout: Duration::from_secs(10),
            proxy_rotation_interval: Duration::from_secs(300),
            cookies_path: "cookies.txt".to_string(),
            use_browser_cookies: false,
            browser_name: "chrome".to_string(),
            enable_rate_limiting: true,
            max_requests_per_minute: 30,
            cache_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(20),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_timeout: Duration::from_secs(120),
            batch_concurrency: 3,
            max_video_duration: 7200,
            user_agent: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let proxy_list = lookup("PROXY_LIST")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            use_proxies: parse_or(&lookup, "USE_PROXIES", defaults.use_proxies)?,
            proxy_list,
            proxy_file: lookup("PROXY_FILE").filter(|p| !p.is_empty()),
            proxy_timeout: secs_or(&lookup, "PROXY_TIMEOUT", defaults.proxy_timeout)?,
            proxy_rotation_interval: secs_or(
                &lookup,
                "PROXY_ROTATION_INTERVAL",
                defaults.proxy_rotation_interval,
            )?,
            cookies_path: lookup("COOKIES_PATH").unwrap_or(defaults.cookies_path),
            use_browser_cookies: parse_or(&lookup, "USE_BROWSER_COOKIES", defaults.use_browser_cookies)?,
            browser_name: lookup("BROWSER_NAME").unwrap_or(defaults.browser_name),
            enable_rate_limiting: parse_or(
                &lookup,
                "ENABLE_RATE_LIMITING",
                defaults.enable_rate_limiting,
            )?,
            max_requests_per_minute: parse_or(
                &lookup,
                "MAX_REQUESTS_PER_MINUTE",
                defaults.max_requests_per_minute,
            )?,
            cache_ttl: secs_or(&lookup, "CACHE_TTL", defaults.cache_ttl)?,
            request_timeout: secs_or(&lookup, "REQUEST_TIMEOUT", defaults.request_timeout)?,
            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ytdlp_timeout: secs_or(&lookup, "YTDLP_TIMEOUT", defaults.ytdlp_timeout)?,
            batch_concurrency: parse_or(&lookup, "BATCH_CONCURRENCY", defaults.batch_concurrency)?,
            max_video_duration: parse_or(&lookup, "MAX_VIDEO_DURATION", defaults.max_video_duration)?,
            user_agent: lookup("USER_AGENT").filter(|ua| !ua.is_empty()),
        };

        if config.batch_concurrency == 0 {
            return Err(anyhow!("BATCH_CONCURRENCY must be at least 1"));
        }
        if config.max_requests_per_minute == 0 {
            return Err(anyhow!("MAX_REQUESTS_PER_MINUTE must be at least 1"));
        }

        Ok(config)
    }

    /// Inconsistent but non-fatal settings
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.use_proxies && self.proxy_list.is_empty() && self.proxy_file.is_none() {
            warnings.push("USE_PROXIES is enabled but PROXY_LIST is empty".to_string());
        }
        if self.use_browser_cookies && self.browser_name.trim().is_empty() {
            warnings.push("USE_BROWSER_COOKIES is enabled but BROWSER_NAME is empty".to_string());
        }
        warnings
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
