//! Download task: coalesced per-caller callbacks and single-shot resolution.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::domain::entities::{CallerHandle, ResourcePriority, ResourceUrl};
use crate::domain::errors::ResourceResult;

/// A successfully fetched and decoded resource.
///
/// Carries both the decoded image and the raw bytes so persistence can
/// write what came off the wire instead of re-encoding.
#[derive(Clone)]
pub struct Fetched {
    /// The decoded image.
    pub image: Arc<image::DynamicImage>,
    /// The bytes as received.
    pub bytes: Bytes,
}

/// Shared progress callback.
pub type TaskProgressFn = Arc<dyn Fn(f64) + Send + Sync>;
/// One-shot completion callback.
pub type TaskCompletionFn = Box<dyn FnOnce(ResourceResult<Fetched>) + Send>;

/// One caller's stake in a download task.
pub struct DownloadCallback {
    /// Runtime the user-visible invocations are posted onto; `None` runs
    /// them on the delivering worker.
    pub context: Option<Handle>,
    /// Progress notifications, monotonic per task attempt.
    pub progress: Option<TaskProgressFn>,
    /// Fired exactly once with the terminal outcome.
    pub completion: Option<TaskCompletionFn>,
    /// Identity for targeted cancellation.
    pub caller: Option<CallerHandle>,
}

/// Lifecycle of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, waiting in the queue.
    New,
    /// Transport in flight.
    Downloading,
    /// Finished with an image.
    Completed,
    /// Finished with an error.
    Failed,
    /// Aborted before completion.
    Cancelled,
}

impl TaskState {
    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct TaskInner {
    priority: ResourcePriority,
    state: TaskState,
    progress: f64,
    callbacks: Vec<DownloadCallback>,
    transport: Option<JoinHandle<()>>,
}

/// A single coalesced download for one URL.
///
/// Any number of callbacks share the task; it resolves through exactly one
/// transition out of `Downloading`/`New`, so a transport finishing
/// concurrently with a cancel produces one outcome.
pub struct DownloadTask {
    url: ResourceUrl,
    inner: Mutex<TaskInner>,
}

impl DownloadTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(url: ResourceUrl, priority: ResourcePriority) -> Self {
        Self {
            url,
            inner: Mutex::new(TaskInner {
                priority,
                state: TaskState::New,
                progress: 0.0,
                callbacks: Vec::new(),
                transport: None,
            }),
        }
    }

    /// The task's URL.
    #[must_use]
    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> ResourcePriority {
        self.inner.lock().priority
    }

    /// Raises or lowers the priority.
    pub fn set_priority(&self, priority: ResourcePriority) {
        self.inner.lock().priority = priority;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Latest clamped progress.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.inner.lock().progress
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    /// Appends a callback; it will be invoked after all earlier ones.
    pub fn add_callback(&self, callback: DownloadCallback) {
        self.inner.lock().callbacks.push(callback);
    }

    /// Removes every callback registered under `caller`, returning them so
    /// the scheduler can signal cancellation. Callbacks registered without
    /// a caller cannot be removed this way.
    pub fn remove_for_caller(&self, caller: CallerHandle) -> Vec<DownloadCallback> {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        let mut kept = Vec::new();
        for cb in inner.callbacks.drain(..) {
            if cb.caller == Some(caller) {
                removed.push(cb);
            } else {
                kept.push(cb);
            }
        }
        inner.callbacks = kept;
        removed
    }

    /// Marks the transport as started, resetting progress for the attempt.
    pub fn begin_downloading(&self) {
        let mut inner = self.inner.lock();
        inner.state = TaskState::Downloading;
        inner.progress = 0.0;
    }

    /// Stores the transport handle. If the task already resolved while the
    /// transport was being spawned, the handle is aborted instead.
    pub fn attach_transport(&self, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        if inner.state == TaskState::Downloading {
            inner.transport = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Clamps and records progress while downloading.
    ///
    /// Returns the clamped value and the progress listeners to notify, or
    /// `None` once the task is no longer downloading (no progress is ever
    /// initiated after resolution).
    pub fn update_progress(&self, progress: f64) -> Option<(f64, Vec<(Option<Handle>, TaskProgressFn)>)> {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Downloading {
            return None;
        }
        let clamped = progress.clamp(inner.progress, 1.0);
        inner.progress = clamped;
        let listeners = inner
            .callbacks
            .iter()
            .filter_map(|cb| {
                cb.progress
                    .as_ref()
                    .map(|f| (cb.context.clone(), Arc::clone(f)))
            })
            .collect();
        Some((clamped, listeners))
    }

    /// Performs the task's single terminal transition.
    ///
    /// Returns the drained callbacks and the transport handle (for the
    /// scheduler to abort on cancellation), or `None` when the task has
    /// already resolved.
    pub fn resolve(&self, state: TaskState) -> Option<(Vec<DownloadCallback>, Option<JoinHandle<()>>)> {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return None;
        }
        inner.state = state;
        if state == TaskState::Completed {
            inner.progress = 1.0;
        }
        let callbacks = std::mem::take(&mut inner.callbacks);
        let transport = inner.transport.take();
        Some((callbacks, transport))
    }
}

/// Invokes a callback's completion with the outcome, honoring its context.
pub fn deliver_completion(callback: DownloadCallback, result: ResourceResult<Fetched>) {
    let Some(completion) = callback.completion else {
        return;
    };
    match callback.context {
        Some(handle) => {
            handle.spawn(async move { completion(result) });
        }
        None => completion(result),
    }
}

/// Invokes one progress listener, honoring its context.
pub fn deliver_progress(context: Option<Handle>, listener: &TaskProgressFn, progress: f64) {
    match context {
        Some(handle) => {
            let listener = Arc::clone(listener);
            handle.spawn(async move { listener(progress) });
        }
        None => listener(progress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ResourceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(s: &str) -> ResourceUrl {
        ResourceUrl::parse(s).unwrap()
    }

    fn callback(caller: Option<CallerHandle>) -> DownloadCallback {
        DownloadCallback {
            context: None,
            progress: None,
            completion: None,
            caller,
        }
    }

    #[test]
    fn resolve_happens_exactly_once() {
        let task = DownloadTask::new(url("https://a/1"), ResourcePriority::Low);
        task.add_callback(callback(None));
        task.begin_downloading();

        let first = task.resolve(TaskState::Completed);
        assert!(first.is_some());
        assert_eq!(first.unwrap().0.len(), 1);

        assert!(task.resolve(TaskState::Cancelled).is_none());
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn progress_is_clamped_and_stops_after_resolution() {
        let task = DownloadTask::new(url("https://a/1"), ResourcePriority::Low);
        task.begin_downloading();

        let (p, _) = task.update_progress(0.5).unwrap();
        assert!((p - 0.5).abs() < f64::EPSILON);
        let (p, _) = task.update_progress(0.2).unwrap();
        assert!((p - 0.5).abs() < f64::EPSILON);
        let (p, _) = task.update_progress(2.0).unwrap();
        assert!((p - 1.0).abs() < f64::EPSILON);

        task.resolve(TaskState::Failed);
        assert!(task.update_progress(0.9).is_none());
    }

    #[test]
    fn remove_for_caller_only_touches_that_caller() {
        let task = DownloadTask::new(url("https://a/1"), ResourcePriority::Low);
        let a = CallerHandle::new();
        let b = CallerHandle::new();
        task.add_callback(callback(Some(a)));
        task.add_callback(callback(Some(b)));
        task.add_callback(callback(None));

        let removed = task.remove_for_caller(a);
        assert_eq!(removed.len(), 1);
        assert_eq!(task.callback_count(), 2);

        assert!(task.remove_for_caller(CallerHandle::new()).is_empty());
    }

    #[test]
    fn completion_without_context_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = Arc::clone(&hits);
        let cb = DownloadCallback {
            context: None,
            progress: None,
            completion: Some(Box::new(move |result| {
                assert!(result.is_err());
                hits_in.fetch_add(1, Ordering::SeqCst);
            })),
            caller: None,
        };
        deliver_completion(cb, Err(ResourceError::Cancelled));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_with_context_runs_on_that_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ctx-worker")
            .enable_all()
            .build()
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let cb = DownloadCallback {
            context: Some(runtime.handle().clone()),
            progress: None,
            completion: Some(Box::new(move |_result| {
                let name = std::thread::current().name().unwrap_or("").to_owned();
                let _ = tx.send(name);
            })),
            caller: None,
        };
        deliver_completion(cb, Err(ResourceError::Cancelled));

        let name = rx.await.unwrap();
        assert_eq!(name, "ctx-worker");
        runtime.shutdown_background();
    }
}
