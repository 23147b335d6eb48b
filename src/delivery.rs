// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Feed delivery strategies.
//!
//! [`CachedDelivery`] keeps the document in a TTL cache keyed by the settings
//! fingerprint and answers conditional requests from cached validators.
//! [`StaticFileDelivery`] writes the document to the upload directory and
//! keeps it until it is regenerated or deleted.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::DeliveryMode;
use crate::error::FeedError;
use crate::generator::FeedGenerator;
use crate::metrics::Metrics;
use crate::state::TtlCache;

/// How long the catalog's last-modified marker is reused.
pub const LAST_MODIFIED_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const FEED_DIR: &str = "merchant-feed";
pub const FEED_FILE: &str = "facebook.xml";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
pub enum FeedArtifact {
    Inline {
        body: Arc<str>,
        last_modified: DateTime<Utc>,
        etag: String,
    },
    File {
        path: PathBuf,
        url: String,
        generated_at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait FeedDelivery: Send + Sync {
    fn mode(&self) -> DeliveryMode;
    /// Public URL of the feed.
    fn feed_url(&self) -> String;
    /// Drop the current artifact. Dropping nothing is not an error.
    async fn invalidate(&self) -> Result<(), FeedError>;
    /// Return the current artifact, generating it only if there is none.
    async fn ensure_fresh(&self) -> Result<FeedArtifact, FeedError>;
    /// Generate a new artifact unconditionally.
    async fn regenerate(&self) -> Result<FeedArtifact, FeedError>;
    /// Remove expired cache entries. Strategies without a cache have none.
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// Per-key async locks so that at most one generation per key is in flight.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Locks nobody holds or waits on are dropped.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// HTTP cache validators for the cached feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    pub last_modified: DateTime<Utc>,
    /// Unquoted entity tag.
    pub etag: String,
}

impl Validators {
    pub fn new(last_modified: DateTime<Utc>, fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}", last_modified.timestamp(), fingerprint).as_bytes());
        Self {
            last_modified,
            etag: hex::encode(hasher.finalize()),
        }
    }

    pub fn etag_header(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    pub fn last_modified_header(&self) -> String {
        self.last_modified.format(HTTP_DATE_FORMAT).to_string()
    }

    /// Whether a conditional request can be answered with 304.
    pub fn matches(&self, if_modified_since: Option<&str>, if_none_match: Option<&str>) -> bool {
        let modified_match = if_modified_since
            .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
            .is_some_and(|since| since.timestamp() >= self.last_modified.timestamp());

        let etag_match = if_none_match.is_some_and(|value| {
            value.split(',').any(|candidate| {
                let candidate = candidate.trim();
                if candidate == "*" {
                    return true;
                }
                let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
                candidate.trim_matches('"') == self.etag
            })
        });

        modified_match || etag_match
    }
}

#[derive(Debug, Clone)]
enum FeedCacheValue {
    Document(Arc<str>),
    LastModified(DateTime<Utc>),
}

/// Lazily generated feed held in a TTL cache.
pub struct CachedDelivery {
    generator: FeedGenerator,
    cache: TtlCache<FeedCacheValue>,
    locks: KeyedLocks,
    feed_url: String,
    metrics: Option<Metrics>,
}

impl CachedDelivery {
    pub fn new(generator: FeedGenerator, feed_url: impl Into<String>) -> Self {
        Self {
            generator,
            cache: TtlCache::new(),
            locks: KeyedLocks::new(),
            feed_url: feed_url.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn fingerprint(&self) -> &str {
        self.generator.settings().fingerprint()
    }

    fn document_key(&self) -> String {
        format!("feed:{}", self.fingerprint())
    }

    fn marker_key(&self) -> String {
        format!("feed:{}:last_mod", self.fingerprint())
    }

    /// Validators for the current catalog state.
    pub async fn validators(&self) -> Validators {
        let last_modified = self.last_modified().await;
        Validators::new(last_modified, self.fingerprint())
    }

    /// Whether a document is cached right now.
    pub async fn is_cached(&self) -> bool {
        self.cached_document().await.is_some()
    }

    /// When the cached document was generated, if there is one.
    pub async fn generated_at(&self) -> Option<DateTime<Utc>> {
        let cached = self.cache.get(&self.document_key()).await?;
        matches!(cached.value, FeedCacheValue::Document(_)).then_some(cached.stored_at)
    }

    async fn last_modified(&self) -> DateTime<Utc> {
        let key = self.marker_key();
        if let Some(cached) = self.cache.get(&key).await {
            if let FeedCacheValue::LastModified(at) = cached.value {
                return at;
            }
        }

        match self.generator.catalog().last_modified().await {
            Ok(at) => {
                let at = at.unwrap_or_else(Utc::now);
                self.cache
                    .set(key, FeedCacheValue::LastModified(at), LAST_MODIFIED_TTL)
                    .await;
                at
            }
            Err(err) => {
                tracing::warn!(error = %err, "catalog last-modified lookup failed; using now");
                Utc::now()
            }
        }
    }

    async fn cached_document(&self) -> Option<Arc<str>> {
        match self.cache.get(&self.document_key()).await?.value {
            FeedCacheValue::Document(body) => Some(body),
            FeedCacheValue::LastModified(_) => None,
        }
    }

    async fn inline(&self, body: Arc<str>) -> FeedArtifact {
        let validators = self.validators().await;
        FeedArtifact::Inline {
            body,
            last_modified: validators.last_modified,
            etag: validators.etag,
        }
    }

    async fn generate_and_store(&self) -> Result<Arc<str>, FeedError> {
        let feed = self.generator.generate().await?;
        let body: Arc<str> = Arc::from(feed.body);
        let ttl = self.generator.settings().cache_ttl;
        self.cache
            .set(self.document_key(), FeedCacheValue::Document(Arc::clone(&body)), ttl)
            .await;
        self.update_size().await;
        Ok(body)
    }

    async fn update_size(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_cache_size(self.cache.len().await);
        }
    }
}

#[async_trait]
impl FeedDelivery for CachedDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Cached
    }

    fn feed_url(&self) -> String {
        self.feed_url.clone()
    }

    async fn invalidate(&self) -> Result<(), FeedError> {
        let removed = self
            .cache
            .purge(&[self.document_key(), self.marker_key()])
            .await;
        tracing::info!(removed, fingerprint = %self.fingerprint(), "feed cache flushed");
        if let Some(metrics) = &self.metrics {
            metrics.record_invalidation();
        }
        self.update_size().await;
        Ok(())
    }

    async fn ensure_fresh(&self) -> Result<FeedArtifact, FeedError> {
        if let Some(body) = self.cached_document().await {
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit();
            }
            return Ok(self.inline(body).await);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }

        let key = self.document_key();
        let _guard = self.locks.acquire(&key).await;

        // Another request may have filled the entry while we waited.
        if let Some(body) = self.cached_document().await {
            return Ok(self.inline(body).await);
        }

        tracing::debug!(%key, "feed cache miss; generating");
        let body = self.generate_and_store().await?;
        Ok(self.inline(body).await)
    }

    async fn regenerate(&self) -> Result<FeedArtifact, FeedError> {
        let key = self.document_key();
        let _guard = self.locks.acquire(&key).await;

        self.cache.purge(&[self.marker_key()]).await;
        let body = self.generate_and_store().await?;
        Ok(self.inline(body).await)
    }

    async fn purge_expired(&self) -> usize {
        let purged = self.cache.purge_expired().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_purge(purged);
        }
        self.update_size().await;
        purged
    }
}

/// State of the static feed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFileStatus {
    pub path: PathBuf,
    pub url: String,
    pub exists: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// Eagerly generated feed written to the upload directory.
pub struct StaticFileDelivery {
    generator: FeedGenerator,
    dir: PathBuf,
    path: PathBuf,
    url: String,
    write_lock: Mutex<()>,
    metrics: Option<Metrics>,
}

impl StaticFileDelivery {
    pub fn new(generator: FeedGenerator, upload_dir: &Path, upload_url: &str) -> Self {
        let dir = upload_dir.join(FEED_DIR);
        let path = dir.join(FEED_FILE);
        let url = format!("{}/{}/{}", upload_url.trim_end_matches('/'), FEED_DIR, FEED_FILE);

        Self {
            generator,
            dir,
            path,
            url,
            write_lock: Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &str {
        self.generator.settings().fingerprint()
    }

    pub async fn status(&self) -> FeedFileStatus {
        let (exists, modified) = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => (true, meta.modified().ok().map(DateTime::<Utc>::from)),
            Err(_) => (false, None),
        };

        FeedFileStatus {
            path: self.path.clone(),
            url: self.url.clone(),
            exists,
            modified,
        }
    }

    fn artifact(&self, generated_at: DateTime<Utc>) -> FeedArtifact {
        FeedArtifact::File {
            path: self.path.clone(),
            url: self.url.clone(),
            generated_at,
        }
    }

    async fn existing(&self) -> Option<FeedArtifact> {
        let meta = tokio::fs::metadata(&self.path).await.ok()?;
        let generated_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Some(self.artifact(generated_at))
    }

    /// Generate and write the feed. Callers hold `write_lock`.
    async fn write_feed(&self) -> Result<FeedArtifact, FeedError> {
        let feed = self.generator.generate().await?;
        let dir = self.dir.clone();
        let path = self.path.clone();
        let body = feed.body;

        tokio::task::spawn_blocking(move || {
            prepare_dir(&dir)?;
            write_atomic(&path, body.as_bytes())
        })
        .await
        .map_err(|e| FeedError::io(&self.path, std::io::Error::other(e)))??;

        tracing::info!(path = %self.path.display(), url = %self.url, items = feed.items, "feed file written");
        Ok(self.artifact(Utc::now()))
    }
}

#[async_trait]
impl FeedDelivery for StaticFileDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Static
    }

    fn feed_url(&self) -> String {
        self.url.clone()
    }

    async fn invalidate(&self) -> Result<(), FeedError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "feed file deleted"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "feed file already absent");
            }
            Err(err) => return Err(FeedError::io(&self.path, err)),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_invalidation();
        }
        Ok(())
    }

    async fn ensure_fresh(&self) -> Result<FeedArtifact, FeedError> {
        if let Some(artifact) = self.existing().await {
            return Ok(artifact);
        }

        let _guard = self.write_lock.lock().await;

        // Another request may have written the file while we waited.
        if let Some(artifact) = self.existing().await {
            return Ok(artifact);
        }

        self.write_feed().await
    }

    async fn regenerate(&self) -> Result<FeedArtifact, FeedError> {
        let _guard = self.write_lock.lock().await;
        self.write_feed().await
    }
}

/// Create the feed directory with a blank `index.html` against listing.
fn prepare_dir(dir: &Path) -> Result<(), FeedError> {
    std::fs::create_dir_all(dir).map_err(|e| FeedError::io(dir, e))?;

    let index = dir.join("index.html");
    if !index.exists() {
        std::fs::write(&index, b"").map_err(|e| FeedError::io(&index, e))?;
    }
    Ok(())
}

/// Write `content` next to `path`, sync it, then rename it into place. The
/// target is never observed half-written; the temp file is removed on any
/// failure.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), FeedError> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(format!(".tmp.{nanos}"));
    let temp_path = PathBuf::from(temp_name);

    let result = (|| {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, path)
    })();

    result.map_err(|err| {
        let _ = std::fs::remove_file(&temp_path);
        FeedError::io(path, err)
    })
}

/// The configured delivery strategy.
#[derive(Clone)]
pub enum Delivery {
    Cached(Arc<CachedDelivery>),
    Static(Arc<StaticFileDelivery>),
}

impl Delivery {
    pub fn as_dyn(&self) -> &dyn FeedDelivery {
        match self {
            Delivery::Cached(cached) => cached.as_ref(),
            Delivery::Static(file) => file.as_ref(),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.as_dyn().mode()
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            Delivery::Cached(cached) => cached.fingerprint(),
            Delivery::Static(file) => file.fingerprint(),
        }
    }
}
