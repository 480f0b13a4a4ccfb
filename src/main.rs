use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use video_link_extractor::api::{self, AppState};
use video_link_extractor::config::AppConfig;
use video_link_extractor::cookies::CookieStore;
use video_link_extractor::proxy_manager::{self, HttpProbe, ProxyPool, DEFAULT_PROBE_URL};
use video_link_extractor::MediaExtractor;

#[derive(Parser)]
#[command(name = "video-link-extractor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Probe every configured proxy and print the pool state
    Proxies,
    /// Export browser cookies into the stored jar, or write a sample jar
    Cookies {
        #[arg(long)]
        browser: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Proxies => check_proxies(&config).await,
        Command::Cookies { browser } => prepare_cookies(&config, browser).await,
    }
}

async fn serve(mut config: AppConfig, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    let extractor = MediaExtractor::from_config(&config).await?;

    let cookies = extractor.cookies();
    if config.use_browser_cookies && !cookies.export_from_browser(&config.browser_name).await {
        tracing::warn!("Browser cookie export from {} failed", config.browser_name);
    }
    cookies.ensure_sample().await?;
    if !extractor.proxies().is_empty() {
        extractor.proxies().revalidate().await;
    }

    let state = AppState::new(extractor, &config);
    spawn_cache_cleanup(state.extractor(), config.cache_ttl);
    let app = api::router(state);

    let addr: SocketAddr = config.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn spawn_cache_cleanup(extractor: Arc<MediaExtractor>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = extractor.cleanup_cache();
            if removed > 0 {
                tracing::debug!("Removed {} expired cache entries", removed);
            }
        }
    });
}

async fn check_proxies(config: &AppConfig) -> Result<()> {
    let mut candidates = config.proxy_list.clone();
    if let Some(path) = &config.proxy_file {
        candidates.extend(proxy_manager::load_from_file(path).await?);
    }
    if candidates.is_empty() {
        println!("No proxies configured");
        return Ok(());
    }

    let probe = Arc::new(HttpProbe::new(DEFAULT_PROBE_URL, config.proxy_timeout));
    let pool = ProxyPool::new(candidates, probe, config.proxy_rotation_interval);
    pool.revalidate().await;

    let stats = pool.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn prepare_cookies(config: &AppConfig, browser: Option<String>) -> Result<()> {
    let store = CookieStore::new(&config.cookies_path);
    let browser = browser.unwrap_or_else(|| config.browser_name.clone());

    if store.export_from_browser(&browser).await {
        println!("Exported {} cookies to {}", browser, store.stored_path().display());
    } else if store.ensure_sample().await? {
        println!(
            "Export from {} failed; wrote sample jar to {}",
            browser,
            store.stored_path().display()
        );
    } else {
        println!(
            "Export from {} failed; keeping existing jar at {}",
            browser,
            store.stored_path().display()
        );
    }
    Ok(())
}
