use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Linux; Android 10; SM-G960U) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.105 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Mobile Safari/604.1",
];

pub const MOBILE_SAFARI_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FACEBOOK_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const FACEBOOK_MOBILE_UA: &str = "Mozilla/5.0 (Linux; Android 10; SM-G960U) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.72 Mobile Safari/537.36";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DESKTOP_CHROME_UA)
}

pub fn facebook_headers(prefer_mobile: bool) -> HeaderMap {
    if prefer_mobile {
        build(&[
            ("user-agent", FACEBOOK_MOBILE_UA),
            ("accept-language", "en-US,en;q=0.9"),
        ])
    } else {
        build(&[
            ("user-agent", FACEBOOK_UA),
            ("accept-language", "en-US,en;q=0.9"),
            ("referer", "https://www.google.com/"),
        ])
    }
}

pub fn tiktok_headers() -> HeaderMap {
    build(&[
        ("user-agent", DESKTOP_CHROME_UA),
        ("accept", BROWSER_ACCEPT),
        ("accept-language", "en-US,en;q=0.9"),
        ("dnt", "1"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("sec-fetch-user", "?1"),
        ("referer", "https://www.tiktok.com/"),
    ])
}

pub fn api_headers() -> HeaderMap {
    build(&[
        ("user-agent", random_user_agent()),
        ("accept", "application/json"),
    ])
}

fn build(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facebook_header_sets() {
        let desktop = facebook_headers(false);
        assert!(desktop["user-agent"].to_str().unwrap().contains("Chrome/91"));
        assert_eq!(desktop["referer"], "https://www.google.com/");

        let mobile = facebook_headers(true);
        assert!(mobile["user-agent"].to_str().unwrap().contains("Android"));
        assert!(mobile.get("referer").is_none());
    }

    #[test]
    fn test_random_user_agent_from_pool() {
        let ua = random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }
}
