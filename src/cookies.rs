use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

use crate::Result;

pub const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Seconds between 1601-01-01 and the Unix epoch
const WINDOWS_EPOCH_OFFSET: i64 = 11_644_473_600;

const SAMPLE_COOKIES: &str = "# Netscape HTTP Cookie File
# Put your YouTube cookies here in Netscape format.
# Browser extensions such as \"Get cookies.txt\" can export them.
#
# Format: domain\tdomain_specified\tpath\tsecure\texpires\tname\tvalue
#
# Example:
# .youtube.com\tTRUE\t/\tFALSE\t1735689600\tVISITOR_INFO1_LIVE\texample_value
# .youtube.com\tTRUE\t/\tTRUE\t1735689600\tLOGIN_INFO\texample_login
";

/// One entry of a Netscape cookie jar
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub domain: String,
    pub domain_specified: bool,
    pub path: String,
    pub secure: bool,
    pub expires: i64,
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.domain_specified),
            self.path,
            flag(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}

/// Parse a well-formed cookie line; comments, blanks and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Cookie> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = match line.strip_prefix(HTTP_ONLY_PREFIX) {
        Some(rest) => rest,
        None if line.starts_with('#') => return None,
        None => line,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }

    let (domain, path, name) = (fields[0].trim(), fields[2].trim(), fields[5].trim());
    if domain.is_empty() || path.is_empty() || name.is_empty() {
        return None;
    }

    Some(Cookie {
        domain: domain.to_string(),
        domain_specified: parse_flag(fields[1].trim())?,
        path: path.to_string(),
        secure: parse_flag(fields[3].trim())?,
        expires: fields[4].trim().parse().ok()?,
        name: name.to_string(),
        value: fields[6].to_string(),
    })
}

pub fn count_valid_lines(content: &str) -> usize {
    content.lines().filter_map(parse_line).count()
}

pub fn is_usable(content: &str) -> bool {
    count_valid_lines(content) > 0
}

/// A cookie file on disk counts only if it holds at least one well-formed line.
pub async fn is_usable_file(path: &Path) -> bool {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let valid = count_valid_lines(&content);
            tracing::debug!("Found {} valid cookie lines in {}", valid, path.display());
            valid > 0
        }
        Err(_) => false,
    }
}

pub fn to_netscape(cookies: &[Cookie]) -> String {
    let mut out = String::from(NETSCAPE_HEADER);
    out.push_str("\n# This file contains the http cookies needed for YouTube\n\n");
    for cookie in cookies {
        out.push_str(&cookie.to_line());
        out.push('\n');
    }
    out
}

/// Cookie text written to disk for the lifetime of one extraction.
#[derive(Debug)]
pub struct TempCookieFile {
    path: PathBuf,
}

impl TempCookieFile {
    pub async fn write(dir: &Path, content: &str) -> Result<Self> {
        let path = dir.join(format!("cookies-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, content).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempCookieFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Failed to remove temp cookie file {}: {}", self.path.display(), e);
        }
    }
}

/// Where the cookies for one extraction come from
#[derive(Debug)]
pub enum CookieSource {
    Request(TempCookieFile),
    Stored(PathBuf),
    None,
}

impl CookieSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            CookieSource::Request(file) => Some(file.path()),
            CookieSource::Stored(path) => Some(path.as_path()),
            CookieSource::None => None,
        }
    }
}

/// Resolves cookies for outbound calls: request text first, then the stored jar.
#[derive(Debug, Clone)]
pub struct CookieStore {
    stored_path: PathBuf,
    temp_dir: PathBuf,
}

impl CookieStore {
    pub fn new(stored_path: impl Into<PathBuf>) -> Self {
        Self {
            stored_path: stored_path.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn stored_path(&self) -> &Path {
        &self.stored_path
    }

    pub async fn resolve(&self, request_cookies: Option<&str>) -> Result<CookieSource> {
        if let Some(text) = request_cookies {
            if is_usable(text) {
                let file = TempCookieFile::write(&self.temp_dir, text).await?;
                return Ok(CookieSource::Request(file));
            }
            tracing::warn!("Ignoring request cookies with no well-formed lines");
        }

        if is_usable_file(&self.stored_path).await {
            return Ok(CookieSource::Stored(self.stored_path.clone()));
        }

        Ok(CookieSource::None)
    }

    /// Write the commented sample jar when nothing exists at the stored path.
    pub async fn ensure_sample(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.stored_path).await? {
            return Ok(false);
        }
        if let Some(parent) = self.stored_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.stored_path, SAMPLE_COOKIES).await?;
        tracing::info!("Sample cookie file created: {}", self.stored_path.display());
        Ok(true)
    }

    /// Export YouTube/Google cookies from a local browser into the stored jar.
    pub async fn export_from_browser(&self, browser: &str) -> bool {
        let store = match browser_cookie_path(browser) {
            Some(path) if path.exists() => path,
            _ => {
                tracing::warn!("No cookie store found for browser {}", browser);
                return false;
            }
        };

        match export_chromium_store(&store, &self.stored_path).await {
            Ok(0) => {
                tracing::warn!("No YouTube cookies found in {}", browser);
                false
            }
            Ok(count) => {
                tracing::info!("Exported {} cookies from {}", count, browser);
                true
            }
            Err(e) => {
                tracing::error!("Failed to export cookies from {}: {}", browser, e);
                false
            }
        }
    }
}

/// Location of a Chromium-family cookie database for the running OS.
pub fn browser_cookie_path(browser: &str) -> Option<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)?;

    let relative = match (std::env::consts::OS, browser.to_lowercase().as_str()) {
        ("windows", "chrome") => "AppData/Local/Google/Chrome/User Data/Default/Cookies",
        ("windows", "edge") => "AppData/Local/Microsoft/Edge/User Data/Default/Cookies",
        ("macos", "chrome") => "Library/Application Support/Google/Chrome/Default/Cookies",
        ("macos", "edge") => "Library/Application Support/Microsoft Edge/Default/Cookies",
        ("linux", "chrome") => ".config/google-chrome/Default/Cookies",
        ("linux", "chromium") => ".config/chromium/Default/Cookies",
        ("linux", "edge") => ".config/microsoft-edge/Default/Cookies",
        _ => return None,
    };

    Some(home.join(relative))
}

#[derive(Debug, sqlx::FromRow)]
struct BrowserCookieRow {
    host_key: String,
    name: String,
    value: String,
    path: String,
    expires_utc: i64,
    is_secure: i64,
}

impl From<BrowserCookieRow> for Cookie {
    fn from(row: BrowserCookieRow) -> Self {
        let expires = if row.expires_utc > 0 {
            (row.expires_utc / 1_000_000 - WINDOWS_EPOCH_OFFSET).max(0)
        } else {
            0
        };

        Cookie {
            domain_specified: row.host_key.starts_with('.'),
            domain: row.host_key,
            path: row.path,
            secure: row.is_secure != 0,
            expires,
            name: row.name,
            value: row.value,
        }
    }
}

/// Read a Chromium `Cookies` database and write the YouTube/Google rows as
/// a Netscape jar. Returns the number of cookies written.
pub async fn export_chromium_store(store: &Path, output: &Path) -> Result<usize> {
    // The browser keeps the live database locked
    let snapshot_dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let snapshot = snapshot_dir.join(format!("cookie-store-{}.db", uuid::Uuid::new_v4()));
    tokio::fs::copy(store, &snapshot).await?;

    let result = read_cookie_rows(&snapshot).await;
    for suffix in ["", "-wal", "-shm"] {
        let mut path = snapshot.clone().into_os_string();
        path.push(suffix);
        let path = PathBuf::from(path);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::debug!("Failed to remove cookie store snapshot {}: {}", path.display(), e);
            }
            _ => {}
        }
    }
    let cookies = result?;

    if cookies.is_empty() {
        return Ok(0);
    }

    tokio::fs::write(output, to_netscape(&cookies)).await?;
    Ok(cookies.len())
}

async fn read_cookie_rows(db: &Path) -> Result<Vec<Cookie>> {
    let options = SqliteConnectOptions::new().filename(db).read_only(true);
    let pool = SqlitePool::connect_with(options).await?;

    let rows: Vec<BrowserCookieRow> = sqlx::query_as(
        "SELECT host_key, name, value, path, expires_utc, is_secure \
         FROM cookies \
         WHERE host_key LIKE '%youtube%' OR host_key LIKE '%google%'",
    )
    .fetch_all(&pool)
    .await?;

    pool.close().await;
    Ok(rows.into_iter().map(Cookie::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_LINE: &str = ".youtube.com\tTRUE\t/\tTRUE\t1735689600\tLOGIN_INFO\tabc";

    #[test]
    fn test_parse_line() {
        let cookie = parse_line(VALID_LINE).unwrap();
        assert_eq!(cookie.domain, ".youtube.com");
        assert!(cookie.domain_specified);
        assert!(cookie.secure);
        assert_eq!(cookie.expires, 1735689600);
        assert_eq!(cookie.to_line(), VALID_LINE);

        let http_only = format!("#HttpOnly_{}", VALID_LINE);
        assert!(parse_line(&http_only).is_some());
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(parse_line("# .youtube.com\tTRUE\t/\tFALSE\t0\tA\tb").is_none());
        assert!(parse_line(".youtube.com\tTRUE\t/\tFALSE\t0\tA").is_none());
        assert!(parse_line(".youtube.com\tyes\t/\tFALSE\t0\tA\tb").is_none());
        assert!(parse_line(".youtube.com\tTRUE\t/\tFALSE\tsoon\tA\tb").is_none());
        assert!(parse_line("\tTRUE\t/\tFALSE\t0\tA\tb").is_none());
    }

    #[test]
    fn test_sample_file_has_no_valid_lines() {
        assert_eq!(count_valid_lines(SAMPLE_COOKIES), 0);
        assert!(!is_usable(SAMPLE_COOKIES));
    }

    #[tokio::test]
    async fn test_file_without_valid_lines_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        let store = CookieStore::new(&path).with_temp_dir(dir.path());

        assert!(store.ensure_sample().await.unwrap());
        assert!(!store.ensure_sample().await.unwrap());
        assert!(matches!(store.resolve(None).await.unwrap(), CookieSource::None));

        std::fs::write(&path, format!("{}\n{}\n", NETSCAPE_HEADER, VALID_LINE)).unwrap();
        assert!(matches!(store.resolve(None).await.unwrap(), CookieSource::Stored(_)));
    }

    #[tokio::test]
    async fn test_request_cookies_take_precedence_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let stored = dir.path().join("cookies.txt");
        std::fs::write(&stored, VALID_LINE).unwrap();
        let store = CookieStore::new(&stored).with_temp_dir(dir.path());

        let source = store.resolve(Some(VALID_LINE)).await.unwrap();
        let temp_path = match &source {
            CookieSource::Request(file) => file.path().to_path_buf(),
            other => panic!("expected request cookies, got {:?}", other),
        };
        assert!(temp_path.exists());
        drop(source);
        assert!(!temp_path.exists());

        let fallback = store.resolve(Some("garbage")).await.unwrap();
        assert_eq!(fallback.path(), Some(stored.as_path()));
    }

    #[tokio::test]
    async fn test_export_chromium_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("Cookies");
        let output = dir.path().join("cookies.txt");

        let options = SqliteConnectOptions::new().filename(&db).create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            "CREATE TABLE cookies (host_key TEXT, name TEXT, value TEXT, path TEXT, \
             expires_utc INTEGER, is_secure INTEGER, is_httponly INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO cookies VALUES \
             ('.youtube.com', 'SID', 'v1', '/', 13380163200000000, 1, 1), \
             ('accounts.google.com', 'HSID', 'v2', '/', 0, 0, 1), \
             ('.example.com', 'other', 'v3', '/', 0, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let written = export_chromium_store(&db, &output).await.unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.starts_with(NETSCAPE_HEADER));
        assert!(content.contains(".youtube.com\tTRUE\t/\tTRUE\t1735689600\tSID\tv1"));
        assert!(content.contains("accounts.google.com\tFALSE\t/\tFALSE\t0\tHSID\tv2"));
        assert!(!content.contains("example.com"));
        assert_eq!(count_valid_lines(&content), 2);
        assert!(!has_snapshot(dir.path()));
    }

    fn has_snapshot(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .unwrap()
            .any(|e| e.unwrap().file_name().to_string_lossy().starts_with("cookie-store-"))
    }

    #[tokio::test]
    async fn test_export_snapshot_removed_on_unreadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("Cookies");
        std::fs::write(&db, "not a database").unwrap();

        let result = export_chromium_store(&db, &dir.path().join("cookies.txt")).await;
        assert!(result.is_err());

        assert!(!has_snapshot(dir.path()));
    }
}
