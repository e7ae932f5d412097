//! The coordinator: cache, storage and network behind one request API.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::domain::entities::{
    CallerHandle, ImageSource, LoadedImage, ResourceModel, ResourcePriority, ResourceState,
    ResourceUrl, StorageMode,
};
use crate::domain::errors::ResourceResult;
use crate::domain::ports::{ByteFetcher, ResourceObserver};
use crate::infrastructure::cache::{CacheStats, EvictionDelegate, PriorityMemoryCache};
use crate::infrastructure::config::ManagerConfig;
use crate::infrastructure::net::{
    DownloadCallback, DownloadEvents, Downloader, Fetched, HttpFetcher,
};
use crate::infrastructure::storage::DiskStore;

use super::observers::ObserverRegistry;

/// Shared progress callback handed to `request`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;
/// One-shot completion callback handed to `request`.
pub type CompletionFn = Box<dyn FnOnce(ResourceResult<LoadedImage>) + Send>;

static GLOBAL_MANAGER: OnceCell<Arc<ResourceManager>> = OnceCell::new();

/// Registers the process-wide manager instance. Fails if one is already
/// registered, returning the rejected instance.
///
/// # Errors
/// Returns the passed manager when a global is already set.
pub fn init_global(manager: Arc<ResourceManager>) -> Result<(), Arc<ResourceManager>> {
    GLOBAL_MANAGER.set(manager)
}

/// The process-wide manager instance, when one has been registered.
#[must_use]
pub fn global() -> Option<Arc<ResourceManager>> {
    GLOBAL_MANAGER.get().cloned()
}

/// Coordinates the memory cache, the disk store and the download
/// scheduler behind a single request API.
///
/// Lookup runs cache, then storage, then network. Concurrent requests for
/// one URL share a single download; per-URL observers see
/// `image_will_start_downloading`, progress, then exactly one terminal
/// event. High-priority cache evictions spill to the disk store.
///
/// Construct with [`ResourceManager::new`] inside a tokio runtime. Any
/// number of instances may coexist; [`init_global`] optionally publishes
/// one for process-wide use.
pub struct ResourceManager {
    cache: Arc<PriorityMemoryCache>,
    storage: Arc<DiskStore>,
    downloader: Arc<Downloader>,
    observers: ObserverRegistry,
    models: Mutex<HashMap<ResourceUrl, ResourceModel>>,
    runtime: Handle,
}

impl ResourceManager {
    /// Creates a manager over the given transport.
    ///
    /// # Errors
    /// Returns a storage error when the store directory cannot be created.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new(config: &ManagerConfig, fetcher: Arc<dyn ByteFetcher>) -> ResourceResult<Arc<Self>> {
        let dir = config
            .storage_dir
            .clone()
            .unwrap_or_else(DiskStore::default_dir);
        let storage = Arc::new(DiskStore::new(dir, config.storage_limit_bytes)?);
        let cache = Arc::new(PriorityMemoryCache::new(
            config.high_cache_limit,
            config.low_cache_limit,
        ));
        let downloader = Arc::new(Downloader::new(fetcher, config.max_concurrent));

        let manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            cache.set_delegate(weak.clone() as Weak<dyn EvictionDelegate>);
            downloader.set_events(weak.clone() as Weak<dyn DownloadEvents>);
            Self {
                cache: Arc::clone(&cache),
                storage: Arc::clone(&storage),
                downloader: Arc::clone(&downloader),
                observers: ObserverRegistry::new(),
                models: Mutex::new(HashMap::new()),
                runtime: Handle::current(),
            }
        });

        info!(
            max_concurrent = config.max_concurrent,
            high = config.high_cache_limit,
            low = config.low_cache_limit,
            store = %manager.storage.dir().display(),
            "resource manager ready"
        );
        Ok(manager)
    }

    /// Creates a manager with the HTTP transport configured from `config`.
    ///
    /// # Errors
    /// Returns an error when the store or HTTP client cannot be created.
    pub fn with_default_fetcher(config: &ManagerConfig) -> ResourceResult<Arc<Self>> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.timeout_secs))?;
        Self::new(config, Arc::new(fetcher))
    }

    /// Requests an image for `url`.
    ///
    /// A memory-cache hit invokes `completion` synchronously on the
    /// calling thread; storage and network results are delivered on a
    /// worker. Pass `caller` to be able to cancel this request later;
    /// cancelled requests receive `ResourceError::Cancelled`.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` before any I/O; `completion` is
    /// not invoked in that case. All later failures arrive through
    /// `completion`.
    pub fn request(
        self: &Arc<Self>,
        url: &str,
        priority: ResourcePriority,
        save: bool,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
    ) -> ResourceResult<()> {
        self.request_inner(url, priority, save, None, progress, completion, caller, false)
    }

    /// Like [`Self::request`], additionally pinning progress and completion
    /// invocations to `context`. Cache hits are posted to `context` too.
    #[allow(clippy::too_many_arguments)]
    pub fn request_with_context(
        self: &Arc<Self>,
        url: &str,
        priority: ResourcePriority,
        save: bool,
        context: Handle,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
    ) -> ResourceResult<()> {
        self.request_inner(
            url,
            priority,
            save,
            Some(context),
            progress,
            completion,
            caller,
            false,
        )
    }

    /// Low-priority persisted request with just a completion.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` before any I/O.
    pub fn request_simple(
        self: &Arc<Self>,
        url: &str,
        completion: Option<CompletionFn>,
    ) -> ResourceResult<()> {
        self.request(url, ResourcePriority::Low, true, None, completion, None)
    }

    /// Requests under a [`StorageMode`] preset.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` before any I/O.
    pub fn request_with_mode(
        self: &Arc<Self>,
        url: &str,
        mode: StorageMode,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
    ) -> ResourceResult<()> {
        self.request(
            url,
            mode.priority(),
            mode.should_save(),
            progress,
            completion,
            caller,
        )
    }

    /// Bypasses cache and storage, evicts any stale copies of `url` from
    /// both, and fetches from the network.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` before any I/O.
    pub fn force_reload(
        self: &Arc<Self>,
        url: &str,
        priority: ResourcePriority,
        save: bool,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
    ) -> ResourceResult<()> {
        self.request_inner(url, priority, save, None, progress, completion, caller, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn request_inner(
        self: &Arc<Self>,
        raw_url: &str,
        priority: ResourcePriority,
        save: bool,
        context: Option<Handle>,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
        force: bool,
    ) -> ResourceResult<()> {
        let url = ResourceUrl::parse(raw_url)?;

        {
            let mut models = self.models.lock();
            let model = models
                .entry(url.clone())
                .or_insert_with(|| ResourceModel::new(url.clone(), priority));
            model.set_priority(priority);
            if model.state() == ResourceState::Downloading {
                // keep the save request of any coalesced caller
                let save = model.save_to_storage() || save;
                model.set_save_to_storage(save);
            } else {
                model.set_save_to_storage(save);
            }
        }

        if !force && let Some(image) = self.cache.get(&url) {
            debug!(url = %url, "served from memory cache");
            self.mark_model_available(&url, &image);
            self.observers.notify_did_load(&url, ImageSource::Memory);
            let loaded = LoadedImage {
                url,
                image,
                source: ImageSource::Memory,
            };
            deliver_user_completion(context, completion, Ok(loaded));
            return Ok(());
        }

        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.lookup_and_download(url, priority, context, progress, completion, caller, force)
                .await;
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn lookup_and_download(
        self: &Arc<Self>,
        url: ResourceUrl,
        priority: ResourcePriority,
        context: Option<Handle>,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
        caller: Option<CallerHandle>,
        force: bool,
    ) {
        if force {
            self.cache.remove(&url);
            if let Err(e) = self.storage.remove(&url).await {
                warn!(url = %url, error = %e, "failed to drop stored copy for reload");
            }
        } else if let Some(image) = self.storage.get(&url).await {
            debug!(url = %url, "served from disk store");
            self.cache.put(url.clone(), Arc::clone(&image), priority);
            self.mark_model_available(&url, &image);
            self.observers.notify_did_load(&url, ImageSource::Storage);
            let loaded = LoadedImage {
                url,
                image,
                source: ImageSource::Storage,
            };
            deliver_user_completion(context, completion, Ok(loaded));
            return;
        }

        let completion_url = url.clone();
        let callback = DownloadCallback {
            context,
            progress,
            completion: completion.map(|completion| -> Box<dyn FnOnce(ResourceResult<Fetched>) + Send> {
                Box::new(move |result| {
                    completion(result.map(|fetched| LoadedImage {
                        url: completion_url,
                        image: fetched.image,
                        source: ImageSource::Network,
                    }));
                })
            }),
            caller,
        };
        self.downloader.download(&url, priority, callback);
    }

    /// Cancels the callbacks `caller` registered for `url`. Other callers
    /// of the same download are unaffected.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` for unparsable input.
    pub fn cancel(self: &Arc<Self>, url: &str, caller: CallerHandle) -> ResourceResult<()> {
        let url = ResourceUrl::parse(url)?;
        self.downloader.cancel(&url, caller);
        Ok(())
    }

    /// Cancels every caller's request for `url`.
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidUrl` for unparsable input.
    pub fn cancel_all(self: &Arc<Self>, url: &str) -> ResourceResult<()> {
        let url = ResourceUrl::parse(url)?;
        self.downloader.cancel_all(&url);
        Ok(())
    }

    /// Drops the low-priority cache bucket.
    pub fn clear_low_cache(&self) {
        self.cache.clear_low();
    }

    /// Drops both cache buckets.
    pub fn clear_all_cache(&self) {
        self.cache.clear_all();
    }

    /// The memory-pressure response: drops the low-priority bucket and
    /// nothing else. Wire this to the platform's low-memory signal.
    pub fn handle_memory_pressure(&self) {
        info!("memory pressure: clearing low-priority cache");
        self.cache.clear_low();
    }

    /// Removes every image from the disk store.
    ///
    /// # Errors
    /// Unlike opportunistic writes, explicit clearing reports failures.
    pub async fn clear_storage(&self) -> ResourceResult<()> {
        self.storage.clear_all().await
    }

    /// Returns the manager to a freshly-configured state: cancels all
    /// downloads, drops caches, stats, models and stored images. The
    /// store location and any global registration are untouched.
    ///
    /// # Errors
    /// Reports disk-store clearing failures.
    pub async fn hard_reset(self: &Arc<Self>) -> ResourceResult<()> {
        info!("hard reset");
        self.downloader.cancel_everything();
        self.cache.hard_reset();
        self.models.lock().clear();
        self.storage.clear_all().await
    }

    /// Updates cache budgets and the download concurrency cap. The store
    /// location never moves after construction.
    pub fn reconfigure(&self, max_concurrent: usize, high_limit: usize, low_limit: usize) {
        self.downloader.set_max_concurrent(max_concurrent);
        self.cache.set_limits(high_limit, low_limit);
    }

    /// Registers a lifecycle observer (weakly held).
    pub fn add_observer(&self, observer: &Arc<dyn ResourceObserver>) {
        self.observers.add(observer);
    }

    /// Unregisters a lifecycle observer.
    pub fn remove_observer(&self, observer: &Arc<dyn ResourceObserver>) {
        self.observers.remove(observer);
    }

    /// Entries in the high-priority cache bucket.
    #[must_use]
    pub fn cache_high(&self) -> usize {
        self.cache.high_count()
    }

    /// Entries in the low-priority cache bucket.
    #[must_use]
    pub fn cache_low(&self) -> usize {
        self.cache.low_count()
    }

    /// Cache hit/miss counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Bytes currently held by the disk store.
    pub async fn storage_bytes(&self) -> u64 {
        self.storage.current_size().await
    }

    /// Downloads currently in flight.
    #[must_use]
    pub fn active_downloads(&self) -> usize {
        self.downloader.active_count()
    }

    /// Downloads waiting in the queue.
    #[must_use]
    pub fn queued_downloads(&self) -> usize {
        self.downloader.queued_count()
    }

    /// Snapshot of the per-URL record, if one is currently tracked.
    #[must_use]
    pub fn resource(&self, url: &str) -> Option<ResourceModel> {
        let url = ResourceUrl::parse(url).ok()?;
        self.models.lock().get(&url).cloned()
    }

    fn mark_model_available(&self, url: &ResourceUrl, image: &Arc<image::DynamicImage>) {
        let mut models = self.models.lock();
        if let Some(model) = models.get_mut(url) {
            model.mark_available(Arc::clone(image));
            model.touch();
        }
    }

    /// Drops the model once nothing references the URL anymore.
    fn prune_model(&self, url: &ResourceUrl) {
        if self.cache.contains(url) || self.storage.has(url) || self.downloader.is_known(url) {
            return;
        }
        self.models.lock().remove(url);
    }
}

impl DownloadEvents for ResourceManager {
    fn download_started(&self, url: &ResourceUrl) {
        {
            let mut models = self.models.lock();
            if let Some(model) = models.get_mut(url) {
                model.mark_downloading();
            }
        }
        self.observers.notify_will_start(url);
    }

    fn download_progress(&self, url: &ResourceUrl, progress: f64) {
        {
            let mut models = self.models.lock();
            if let Some(model) = models.get_mut(url) {
                model.update_progress(progress);
            }
        }
        self.observers.notify_progress(url, progress);
    }

    fn download_completed(&self, url: &ResourceUrl, result: &ResourceResult<Fetched>) {
        match result {
            Ok(fetched) => {
                let (priority, save) = {
                    let models = self.models.lock();
                    models
                        .get(url)
                        .map_or((ResourcePriority::Low, false), |model| {
                            (model.priority(), model.save_to_storage())
                        })
                };

                self.cache
                    .put(url.clone(), Arc::clone(&fetched.image), priority);
                self.mark_model_available(url, &fetched.image);

                if save {
                    let storage = Arc::clone(&self.storage);
                    let url = url.clone();
                    let bytes = fetched.bytes.clone();
                    self.runtime.spawn(async move {
                        if let Err(e) = storage.put_bytes(&url, bytes).await {
                            warn!(url = %url, error = %e, "failed to persist downloaded image");
                        }
                    });
                }

                self.observers.notify_did_load(url, ImageSource::Network);
            }
            Err(error) => {
                {
                    let mut models = self.models.lock();
                    if let Some(model) = models.get_mut(url) {
                        model.mark_failed(error.clone());
                    }
                }
                self.observers.notify_did_fail(url, error);
                self.prune_model(url);
            }
        }
    }

    fn download_cancelled(&self, url: &ResourceUrl) {
        self.prune_model(url);
    }
}

impl EvictionDelegate for ResourceManager {
    fn cache_did_evict(
        &self,
        url: &ResourceUrl,
        image: Arc<image::DynamicImage>,
        priority: ResourcePriority,
    ) {
        if priority != ResourcePriority::High {
            return;
        }
        if self.storage.has(url) {
            return;
        }
        debug!(url = %url, "spilling evicted high-priority entry to disk");
        let storage = Arc::clone(&self.storage);
        let url = url.clone();
        self.runtime.spawn(async move {
            if let Err(e) = storage.put(&url, image).await {
                warn!(url = %url, error = %e, "failed to spill evicted image");
            }
        });
    }
}

fn deliver_user_completion(
    context: Option<Handle>,
    completion: Option<CompletionFn>,
    result: ResourceResult<LoadedImage>,
) {
    let Some(completion) = completion else {
        return;
    };
    match context {
        Some(handle) => {
            handle.spawn(async move { completion(result) });
        }
        None => completion(result),
    }
}
