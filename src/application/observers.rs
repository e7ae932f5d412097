//! Weak-reference observer registry with snapshot notification.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::domain::entities::{ImageSource, ResourceUrl};
use crate::domain::errors::ResourceError;
use crate::domain::ports::ResourceObserver;

/// Thread-safe set of weakly-held observers.
///
/// Notification snapshots the live observers under the lock and invokes
/// them outside it, so an observer may remove itself (or others) while
/// being notified. Dropped observers are pruned as they are encountered.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn ResourceObserver>>>,
}

fn same_observer(weak: &Weak<dyn ResourceObserver>, arc: &Arc<dyn ResourceObserver>) -> bool {
    std::ptr::eq(weak.as_ptr().cast::<()>(), Arc::as_ptr(arc).cast::<()>())
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Re-adding the same observer is a no-op.
    pub fn add(&self, observer: &Arc<dyn ResourceObserver>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|w| same_observer(w, observer)) {
            observers.push(Arc::downgrade(observer));
        }
    }

    /// Unregisters an observer. Unknown observers are ignored.
    pub fn remove(&self, observer: &Arc<dyn ResourceObserver>) {
        self.observers.lock().retain(|w| !same_observer(w, observer));
    }

    /// Number of live registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Whether no live observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn ResourceObserver>> {
        let mut observers = self.observers.lock();
        observers.retain(|w| w.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Notifies `image_did_load`.
    pub fn notify_did_load(&self, url: &ResourceUrl, source: ImageSource) {
        trace!(url = %url, ?source, "notifying observers: did load");
        for observer in self.snapshot() {
            observer.image_did_load(url, source);
        }
    }

    /// Notifies `image_did_fail`.
    pub fn notify_did_fail(&self, url: &ResourceUrl, error: &ResourceError) {
        trace!(url = %url, error = %error, "notifying observers: did fail");
        for observer in self.snapshot() {
            observer.image_did_fail(url, error);
        }
    }

    /// Notifies `image_download_progress`.
    pub fn notify_progress(&self, url: &ResourceUrl, progress: f64) {
        for observer in self.snapshot() {
            observer.image_download_progress(url, progress);
        }
    }

    /// Notifies `image_will_start_downloading`.
    pub fn notify_will_start(&self, url: &ResourceUrl) {
        trace!(url = %url, "notifying observers: will start downloading");
        for observer in self.snapshot() {
            observer.image_will_start_downloading(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{ObservedEvent, RecordingObserver};

    fn url(s: &str) -> ResourceUrl {
        ResourceUrl::parse(s).unwrap()
    }

    #[test]
    fn add_notify_remove() {
        let registry = ObserverRegistry::new();
        let recorder = RecordingObserver::new();
        let as_observer: Arc<dyn ResourceObserver> = recorder.clone();

        registry.add(&as_observer);
        registry.add(&as_observer);
        assert_eq!(registry.len(), 1);

        registry.notify_will_start(&url("https://a/1"));
        assert_eq!(recorder.events().len(), 1);

        registry.remove(&as_observer);
        registry.notify_will_start(&url("https://a/1"));
        assert_eq!(recorder.events().len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let registry = ObserverRegistry::new();
        let recorder = RecordingObserver::new();
        let as_observer: Arc<dyn ResourceObserver> = recorder;
        registry.add(&as_observer);
        drop(as_observer);

        assert_eq!(registry.len(), 0);
        registry.notify_did_load(&url("https://a/1"), ImageSource::Memory);
        assert!(registry.observers.lock().is_empty());
    }

    #[test]
    fn observer_may_remove_itself_during_notification() {
        struct SelfRemoving {
            registry: Arc<ObserverRegistry>,
            this: Mutex<Option<Arc<dyn ResourceObserver>>>,
        }

        impl ResourceObserver for SelfRemoving {
            fn image_will_start_downloading(&self, _url: &ResourceUrl) {
                if let Some(this) = self.this.lock().take() {
                    self.registry.remove(&this);
                }
            }
        }

        let registry = Arc::new(ObserverRegistry::new());
        let observer = Arc::new(SelfRemoving {
            registry: Arc::clone(&registry),
            this: Mutex::new(None),
        });
        let as_observer: Arc<dyn ResourceObserver> = observer.clone();
        *observer.this.lock() = Some(as_observer.clone());

        let recorder = RecordingObserver::new();
        let recorder_observer: Arc<dyn ResourceObserver> = recorder.clone();

        registry.add(&as_observer);
        registry.add(&recorder_observer);

        registry.notify_will_start(&url("https://a/1"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            recorder.events(),
            vec![ObservedEvent::WillStart("https://a/1".to_owned())]
        );
    }
}
