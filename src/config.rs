use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::model::StoreInfo;

/// How the feed reaches its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Served from the feed route, cached in memory with a TTL.
    Cached,
    /// Written to the upload directory and served as a plain file.
    Static,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Static => "static",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cached" | "cache" => Ok(Self::Cached),
            "static" | "file" => Ok(Self::Static),
            other => bail!("unknown delivery mode {other:?}; expected `cached` or `static`"),
        }
    }
}

/// Where product data comes from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// A JSON snapshot on disk.
    Snapshot(PathBuf),
    /// A WooCommerce REST v3 endpoint.
    Rest(RestCatalogConfig),
}

#[derive(Debug, Clone)]
pub struct RestCatalogConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub timeout: Duration,
}

pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub mode: DeliveryMode,
    pub settings_path: PathBuf,
    pub catalog: CatalogSource,
    pub upload_dir: PathBuf,
    pub upload_url: String,
    pub store: StoreInfo,
    pub admin_key: Option<String>,
    pub nonce_secret: String,
    pub generation_timeout: Duration,
    pub janitor_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = env::var("MERCHANT_FEED_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .context("invalid MERCHANT_FEED_ADDR")?;

        let mode: DeliveryMode = env::var("MERCHANT_FEED_MODE")
            .unwrap_or_else(|_| "cached".to_string())
            .parse()
            .context("invalid MERCHANT_FEED_MODE")?;

        let settings_path = PathBuf::from(
            env::var("MERCHANT_FEED_SETTINGS").unwrap_or_else(|_| "settings.json".to_string()),
        );

        let home_url = env::var("MERCHANT_FEED_HOME_URL")
            .unwrap_or_else(|_| format!("http://{listen_addr}"));
        let home_url = home_url.trim_end_matches('/').to_string();

        let catalog = catalog_source_from_env()?;

        let upload_dir = PathBuf::from(
            env::var("MERCHANT_FEED_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
        );
        let upload_url = env::var("MERCHANT_FEED_UPLOAD_URL")
            .unwrap_or_else(|_| format!("{home_url}/uploads"))
            .trim_end_matches('/')
            .to_string();

        let site_id: u64 = env::var("MERCHANT_FEED_SITE_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("MERCHANT_FEED_SITE_ID must be an integer")?;

        let store = StoreInfo {
            site_id,
            name: env::var("MERCHANT_FEED_SITE_NAME").unwrap_or_else(|_| "Store".to_string()),
            home_url,
            currency: env::var("MERCHANT_FEED_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            default_country: env::var("MERCHANT_FEED_DEFAULT_COUNTRY")
                .unwrap_or_else(|_| "US".to_string()),
        };

        let admin_key = env::var("MERCHANT_FEED_ADMIN_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let nonce_secret = match env::var("MERCHANT_FEED_NONCE_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => match &admin_key {
                Some(key) => key.clone(),
                None => String::new(),
            },
        };

        let generation_timeout = parse_duration("MERCHANT_FEED_GENERATION_TIMEOUT", 120)?;
        let janitor_interval = parse_duration("MERCHANT_FEED_JANITOR_SECONDS", 60)?;

        Ok(Self {
            listen_addr,
            mode,
            settings_path,
            catalog,
            upload_dir,
            upload_url,
            store,
            admin_key,
            nonce_secret,
            generation_timeout,
            janitor_interval,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn janitor_interval(&self) -> Duration {
        self.janitor_interval
    }
}

fn catalog_source_from_env() -> Result<CatalogSource> {
    if let Ok(base_url) = env::var("MERCHANT_FEED_WC_URL") {
        let consumer_key =
            env::var("MERCHANT_FEED_WC_KEY").context("MERCHANT_FEED_WC_KEY is required with MERCHANT_FEED_WC_URL")?;
        let consumer_secret = env::var("MERCHANT_FEED_WC_SECRET")
            .context("MERCHANT_FEED_WC_SECRET is required with MERCHANT_FEED_WC_URL")?;
        let timeout = parse_duration("MERCHANT_FEED_CATALOG_TIMEOUT", 30)?;

        return Ok(CatalogSource::Rest(RestCatalogConfig {
            base_url,
            consumer_key,
            consumer_secret,
            timeout,
        }));
    }

    let path = env::var("MERCHANT_FEED_CATALOG").unwrap_or_else(|_| "catalog.json".to_string());
    Ok(CatalogSource::Snapshot(PathBuf::from(path)))
}

fn parse_duration(env_key: &str, default_secs: u64) -> Result<Duration> {
    let raw = env::var(env_key).unwrap_or_else(|_| default_secs.to_string());
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{env_key} must be an integer number of seconds"))?;

    Ok(Duration::from_secs(secs))
}
