//! Bounded-concurrency download scheduler with coalescing and cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::domain::entities::{CallerHandle, ResourcePriority, ResourceUrl};
use crate::domain::errors::{ResourceError, ResourceResult};
use crate::domain::ports::{ByteFetcher, ProgressSink};

use super::queue::DownloadQueue;
use super::task::{
    DownloadCallback, DownloadTask, Fetched, TaskState, deliver_completion, deliver_progress,
};

/// Default cap on simultaneous transports.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Task-level lifecycle hook, fired once per task regardless of how many
/// callers coalesced onto it.
///
/// `download_completed` fires before any per-caller completion, so a
/// receiver can populate caches first. All hooks run outside the
/// scheduler's locks.
pub trait DownloadEvents: Send + Sync {
    /// A new task was created and enqueued.
    fn download_started(&self, _url: &ResourceUrl) {}
    /// Clamped task progress in `[0, 1]`.
    fn download_progress(&self, _url: &ResourceUrl, _progress: f64) {}
    /// The task resolved with an image or a terminal error.
    fn download_completed(&self, _url: &ResourceUrl, _result: &ResourceResult<Fetched>) {}
    /// The task was cancelled before resolving.
    fn download_cancelled(&self, _url: &ResourceUrl) {}
}

struct SchedState {
    queue: DownloadQueue,
    known: HashMap<ResourceUrl, Arc<DownloadTask>>,
    active: HashSet<ResourceUrl>,
    max_concurrent: usize,
}

/// Admission control and dispatch for image downloads.
///
/// Requests for a URL already pending or in flight coalesce onto the
/// existing task. Pending tasks start in priority order (High FIFO before
/// Low FIFO) while fewer than `max_concurrent` transports are active.
/// Cancellation is per caller; the transport is torn down only when a
/// task's last callback is gone.
pub struct Downloader {
    state: Mutex<SchedState>,
    fetcher: Arc<dyn ByteFetcher>,
    events: Mutex<Option<Weak<dyn DownloadEvents>>>,
    runtime: Handle,
}

impl Downloader {
    /// Creates a scheduler dispatching onto the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ByteFetcher>, max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(SchedState {
                queue: DownloadQueue::new(),
                known: HashMap::new(),
                active: HashSet::new(),
                max_concurrent: max_concurrent.max(1),
            }),
            fetcher,
            events: Mutex::new(None),
            runtime: Handle::current(),
        }
    }

    /// Registers the task-level event hook.
    pub fn set_events(&self, events: Weak<dyn DownloadEvents>) {
        *self.events.lock() = Some(events);
    }

    fn events(&self) -> Option<Arc<dyn DownloadEvents>> {
        self.events.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Requests a download, coalescing onto an existing task when one is
    /// pending or active for the URL.
    ///
    /// A High request against a still-pending Low task promotes it to the
    /// tail of the High queue. Returns whether a new task was created.
    pub fn download(
        self: &Arc<Self>,
        url: &ResourceUrl,
        priority: ResourcePriority,
        callback: DownloadCallback,
    ) -> bool {
        let is_new = {
            let mut st = self.state.lock();
            if let Some(task) = st.known.get(url).cloned() {
                task.add_callback(callback);
                if priority == ResourcePriority::High
                    && task.priority() == ResourcePriority::Low
                {
                    task.set_priority(ResourcePriority::High);
                    if !st.active.contains(url) {
                        st.queue.promote(url);
                        trace!(url = %url, "promoted pending download to high priority");
                    }
                }
                false
            } else {
                let task = Arc::new(DownloadTask::new(url.clone(), priority));
                task.add_callback(callback);
                st.known.insert(url.clone(), task);
                st.queue.enqueue(url.clone(), priority);
                true
            }
        };

        if is_new {
            debug!(url = %url, ?priority, "download enqueued");
            if let Some(events) = self.events() {
                events.download_started(url);
            }
        }
        self.try_dispatch();
        is_new
    }

    /// Removes one caller's callbacks from a URL's task, signalling
    /// `Cancelled` to each. The task itself is torn down only when no
    /// callbacks remain. Unknown URLs and unknown callers are no-ops.
    pub fn cancel(self: &Arc<Self>, url: &ResourceUrl, caller: CallerHandle) {
        let (removed, killed, freed_slot, transport) = {
            let mut st = self.state.lock();
            let Some(task) = st.known.get(url).cloned() else {
                return;
            };
            let removed = task.remove_for_caller(caller);
            if removed.is_empty() {
                return;
            }
            if task.callback_count() == 0 {
                if let Some((_, transport)) = task.resolve(TaskState::Cancelled) {
                    let freed_slot = st.active.remove(url);
                    st.queue.remove(url);
                    st.known.remove(url);
                    (removed, true, freed_slot, transport)
                } else {
                    (removed, false, false, None)
                }
            } else {
                (removed, false, false, None)
            }
        };

        if let Some(handle) = transport {
            handle.abort();
        }
        if killed {
            debug!(url = %url, "download cancelled, no callers remain");
            if let Some(events) = self.events() {
                events.download_cancelled(url);
            }
        }
        for cb in removed {
            deliver_completion(cb, Err(ResourceError::Cancelled));
        }
        if freed_slot {
            self.try_dispatch();
        }
    }

    /// Cancels a URL's task outright, signalling `Cancelled` to every
    /// remaining callback.
    pub fn cancel_all(self: &Arc<Self>, url: &ResourceUrl) {
        let resolved = {
            let mut st = self.state.lock();
            let Some(task) = st.known.get(url).cloned() else {
                return;
            };
            match task.resolve(TaskState::Cancelled) {
                Some((callbacks, transport)) => {
                    let freed_slot = st.active.remove(url);
                    st.queue.remove(url);
                    st.known.remove(url);
                    Some((callbacks, transport, freed_slot))
                }
                None => None,
            }
        };

        let Some((callbacks, transport, freed_slot)) = resolved else {
            return;
        };
        if let Some(handle) = transport {
            handle.abort();
        }
        debug!(url = %url, "download cancelled for all callers");
        if let Some(events) = self.events() {
            events.download_cancelled(url);
        }
        for cb in callbacks {
            deliver_completion(cb, Err(ResourceError::Cancelled));
        }
        if freed_slot {
            self.try_dispatch();
        }
    }

    /// Cancels every pending and active task.
    pub fn cancel_everything(self: &Arc<Self>) {
        let urls: Vec<ResourceUrl> = self.state.lock().known.keys().cloned().collect();
        for url in urls {
            self.cancel_all(&url);
        }
    }

    /// Updates the concurrency cap. Raising it dispatches immediately;
    /// lowering it never aborts in-flight transports, it only suppresses
    /// new starts until the active set drains below the new cap.
    pub fn set_max_concurrent(self: &Arc<Self>, max_concurrent: usize) {
        let raised = {
            let mut st = self.state.lock();
            let old = st.max_concurrent;
            st.max_concurrent = max_concurrent.max(1);
            st.max_concurrent > old
        };
        if raised {
            self.try_dispatch();
        }
    }

    /// The current concurrency cap.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_concurrent
    }

    /// Transports currently in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.total_count()
    }

    /// Whether a pending or active task exists for the URL.
    #[must_use]
    pub fn is_known(&self, url: &ResourceUrl) -> bool {
        self.state.lock().known.contains_key(url)
    }

    /// Callbacks registered on the URL's task, zero when unknown.
    #[must_use]
    pub fn callback_count(&self, url: &ResourceUrl) -> usize {
        self.state
            .lock()
            .known
            .get(url)
            .map_or(0, |task| task.callback_count())
    }

    /// Starts pending tasks while capacity allows, High before Low.
    fn try_dispatch(self: &Arc<Self>) {
        enum Next {
            Start(ResourceUrl, Arc<DownloadTask>),
            Stale,
            Done,
        }

        loop {
            let next = {
                let mut st = self.state.lock();
                if st.active.len() >= st.max_concurrent {
                    Next::Done
                } else if let Some(url) = st.queue.dequeue() {
                    match st.known.get(&url).cloned() {
                        Some(task) => {
                            st.active.insert(url.clone());
                            task.begin_downloading();
                            Next::Start(url, task)
                        }
                        None => Next::Stale,
                    }
                } else {
                    Next::Done
                }
            };

            match next {
                Next::Done => return,
                Next::Stale => {}
                Next::Start(url, task) => self.start_transport(url, task),
            }
        }
    }

    fn start_transport(self: &Arc<Self>, url: ResourceUrl, task: Arc<DownloadTask>) {
        trace!(url = %url, "starting transport");
        let weak = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);

        let progress_weak = weak.clone();
        let progress_task = Arc::clone(&task);
        let handle = self.runtime.spawn(async move {
            let sink = move |p: f64| {
                if let Some(downloader) = progress_weak.upgrade() {
                    downloader.transport_progress(&progress_task, p);
                }
            };
            let outcome = fetch_and_decode(fetcher.as_ref(), &url, &sink).await;
            if let Some(downloader) = weak.upgrade() {
                downloader.finish_task(&url, outcome);
            }
        });
        task.attach_transport(handle);
    }

    fn transport_progress(&self, task: &Arc<DownloadTask>, progress: f64) {
        let Some((clamped, listeners)) = task.update_progress(progress) else {
            return;
        };
        if let Some(events) = self.events() {
            events.download_progress(task.url(), clamped);
        }
        for (context, listener) in listeners {
            deliver_progress(context, &listener, clamped);
        }
    }

    fn finish_task(self: &Arc<Self>, url: &ResourceUrl, outcome: ResourceResult<Fetched>) {
        let callbacks = {
            let mut st = self.state.lock();
            let Some(task) = st.known.get(url).cloned() else {
                return;
            };
            let terminal = if outcome.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            match task.resolve(terminal) {
                Some((callbacks, _)) => {
                    st.active.remove(url);
                    st.known.remove(url);
                    callbacks
                }
                None => return,
            }
        };

        match &outcome {
            Ok(_) => debug!(url = %url, "download completed"),
            Err(e) => debug!(url = %url, error = %e, "download failed"),
        }
        if let Some(events) = self.events() {
            events.download_completed(url, &outcome);
        }
        for cb in callbacks {
            deliver_completion(cb, outcome.clone());
        }
        self.try_dispatch();
    }
}

async fn fetch_and_decode<'a>(
    fetcher: &'a (dyn ByteFetcher + 'a),
    url: &'a ResourceUrl,
    sink: &'a ProgressSink,
) -> ResourceResult<Fetched> {
    let bytes = fetcher.fetch(url, sink).await?;
    if bytes.is_empty() {
        return Err(ResourceError::network("empty response body"));
    }

    let raw = bytes.clone();
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&raw))
        .await
        .map_err(|e| ResourceError::decode(format!("decode task panicked: {e}")))?
        .map_err(|e| ResourceError::decode(format!("failed to decode image: {e}")))?;

    Ok(Fetched {
        image: Arc::new(image),
        bytes,
    })
}
