use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portico_mcp::ServerConfig;
use serde::Serialize;

use crate::catalog::LocalCatalog;
use crate::convert;
use crate::entry::{self, RegistryEntry};
use crate::error::RegistryError;
use crate::remote::{CatalogFetcher, DEFAULT_REGISTRY_URL, HttpCatalogFetcher, RemotePage};
use crate::search::{ResultSource, SearchMode, SearchRequest, SearchResult};

const PREFETCH_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub base_url: String,
    pub remote_enabled: bool,
    pub catalog_path: PathBuf,
    pub cache_ttl: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_owned(),
            remote_enabled: true,
            catalog_path: PathBuf::from("config/catalog.json"),
            cache_ttl: Duration::from_secs(300),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Sleep before retrying after the zero-based `attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub searches: u64,
    pub cache_hits: u64,
    pub remote_successes: u64,
    pub remote_failures: u64,
    pub fallbacks: u64,
    pub consecutive_remote_errors: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_background_sync: Option<DateTime<Utc>>,
    pub cached_entries: usize,
}

#[derive(Default)]
struct Counters {
    searches: AtomicU64,
    cache_hits: AtomicU64,
    remote_successes: AtomicU64,
    remote_failures: AtomicU64,
    fallbacks: AtomicU64,
    consecutive_remote_errors: AtomicU64,
    last_error: Mutex<Option<(String, DateTime<Utc>)>>,
    last_background_sync: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, err: &RegistryError) {
        Self::bump(&self.remote_failures);
        Self::bump(&self.consecutive_remote_errors);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((format!("{}: {err}", err.code()), Utc::now()));
    }

    fn record_success(&self) {
        Self::bump(&self.remote_successes);
        self.consecutive_remote_errors.store(0, Ordering::Relaxed);
    }
}

struct CachedPage {
    key: String,
    result: SearchResult,
    fetched_at: Instant,
}

/// Discovers installable server templates.
///
/// `search` never fails: remote problems degrade to the cache, then the local catalog,
/// then an empty result.
pub struct RegistryService {
    config: RegistryConfig,
    fetcher: Arc<dyn CatalogFetcher>,
    catalog: LocalCatalog,
    cache: RwLock<Option<Arc<CachedPage>>>,
    counters: Counters,
}

impl std::fmt::Debug for RegistryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryService")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl RegistryService {
    /// Service backed by the HTTP registry at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Http` if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let fetcher = HttpCatalogFetcher::new(config.base_url.clone(), config.attempt_timeout)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    #[must_use]
    pub fn with_fetcher(config: RegistryConfig, fetcher: Arc<dyn CatalogFetcher>) -> Self {
        let catalog = LocalCatalog::new(config.catalog_path.clone());
        Self {
            config,
            fetcher,
            catalog,
            cache: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub async fn search(&self, request: SearchRequest) -> SearchResult {
        let request = request.normalized();
        Counters::bump(&self.counters.searches);

        if request.mode == SearchMode::Offline {
            tracing::debug!("offline search requested, reading local catalog");
            return self.catalog_result(&request).await;
        }
        if !self.config.remote_enabled {
            return self.catalog_result(&request).await;
        }

        let key = request.cache_key();
        let cached = self.cached(&key);
        if let Some(page) = &cached
            && page.fetched_at.elapsed() < self.config.cache_ttl
        {
            Counters::bump(&self.counters.cache_hits);
            return page.result.clone().with_source(ResultSource::Cache);
        }

        match self.fetch_with_retry(&request).await {
            Ok(page) => {
                let result = SearchResult::from_remote_page(
                    page.entries,
                    page.total,
                    page.has_more,
                    &request,
                );
                self.store(key, result.clone());
                result
            }
            Err(e) => {
                if let Some(page) = cached {
                    tracing::warn!(
                        age_secs = page.fetched_at.elapsed().as_secs(),
                        "remote registry unavailable, serving stale cache: {e}"
                    );
                    Counters::bump(&self.counters.fallbacks);
                    return page.result.clone().with_source(ResultSource::StaleCache);
                }
                tracing::warn!("remote registry unavailable, using local catalog: {e}");
                self.catalog_result(&request).await
            }
        }
    }

    /// Warm the cache with the first page of an unfiltered search.
    ///
    /// A later `search` for the same page is then served from the cache. With the remote
    /// registry disabled this only reports the current counters.
    ///
    /// # Errors
    ///
    /// Returns the last remote failure once retries are exhausted. The cache is left as
    /// it was.
    pub async fn prefetch(&self) -> Result<RegistryStats, RegistryError> {
        if !self.config.remote_enabled {
            return Ok(self.stats());
        }

        let request = SearchRequest::new().limit(PREFETCH_PAGE_SIZE).normalized();
        let page = self.fetch_with_retry(&request).await?;
        let result =
            SearchResult::from_remote_page(page.entries, page.total, page.has_more, &request);
        tracing::info!(entries = result.entries.len(), "registry cache prefetched");
        self.store(request.cache_key(), result);
        *self
            .counters
            .last_background_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        Ok(self.stats())
    }

    async fn fetch_with_retry(&self, request: &SearchRequest) -> Result<RemotePage, RegistryError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let outcome =
                match tokio::time::timeout(self.config.attempt_timeout, self.fetcher.fetch(request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RegistryError::Timeout(self.config.attempt_timeout)),
                };

            match outcome {
                Ok(page) => {
                    self.counters.record_success();
                    tracing::debug!(
                        attempt,
                        entries = page.entries.len(),
                        "remote registry page fetched"
                    );
                    return Ok(page);
                }
                Err(e) => {
                    self.counters.record_failure(&e);
                    attempt += 1;
                    if matches!(e, RegistryError::Empty) || attempt >= attempts {
                        return Err(e);
                    }
                    let delay = self.config.backoff(attempt - 1);
                    tracing::debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        code = %e.code(),
                        "remote registry attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn catalog_result(&self, request: &SearchRequest) -> SearchResult {
        Counters::bump(&self.counters.fallbacks);
        match self.catalog.load().await {
            Ok(entries) => SearchResult::filtered(&entries, request, ResultSource::Catalog),
            Err(e) => {
                tracing::warn!("local catalog unavailable: {e}");
                SearchResult::empty()
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<CachedPage>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|page| page.key == key)
            .cloned()
    }

    fn store(&self, key: String, result: SearchResult) {
        let page = Arc::new(CachedPage {
            key,
            result,
            fetched_at: Instant::now(),
        });
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(page);
    }

    #[must_use]
    pub fn is_server_installable(&self, entry: &RegistryEntry) -> bool {
        entry::is_server_installable(entry)
    }

    /// # Errors
    ///
    /// See [`convert::convert_to_server_config`].
    pub fn convert_to_server_config(
        &self,
        entry: &RegistryEntry,
    ) -> Result<ServerConfig, RegistryError> {
        convert::convert_to_server_config(entry)
    }

    /// Find an entry by id or package name, case-insensitively.
    ///
    /// The cached remote page is consulted before the local catalog.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::EntryNotFound` when neither source knows the entry.
    pub async fn entry_details(&self, id: &str) -> Result<RegistryEntry, RegistryError> {
        fn find<'a>(entries: &'a [RegistryEntry], id: &str) -> Option<&'a RegistryEntry> {
            entries
                .iter()
                .find(|e| e.id.eq_ignore_ascii_case(id))
                .or_else(|| {
                    entries.iter().find(|e| {
                        e.package_name
                            .as_deref()
                            .is_some_and(|p| p.eq_ignore_ascii_case(id))
                    })
                })
        }

        let id = id.trim();
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(page) = cached
            && let Some(entry) = find(&page.result.entries, id)
        {
            return Ok(entry.clone());
        }

        match self.catalog.load().await {
            Ok(entries) => find(&entries, id)
                .cloned()
                .ok_or_else(|| RegistryError::EntryNotFound(id.to_owned())),
            Err(e) => {
                tracing::debug!("catalog unavailable for details lookup: {e}");
                Err(RegistryError::EntryNotFound(id.to_owned()))
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let last_error = self
            .counters
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let last_background_sync = *self
            .counters
            .last_background_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cached_entries = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |page| page.result.entries.len());
        RegistryStats {
            searches: load(&self.counters.searches),
            cache_hits: load(&self.counters.cache_hits),
            remote_successes: load(&self.counters.remote_successes),
            remote_failures: load(&self.counters.remote_failures),
            fallbacks: load(&self.counters.fallbacks),
            consecutive_remote_errors: load(&self.counters.consecutive_remote_errors),
            last_error_at: last_error.as_ref().map(|(_, at)| *at),
            last_error: last_error.map(|(message, _)| message),
            last_background_sync,
            cached_entries,
        }
    }

    pub fn clear_cache(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("registry cache cleared");
    }
}
