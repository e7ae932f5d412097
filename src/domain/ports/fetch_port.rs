//! Transport port: how raw image bytes are fetched.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::ResourceUrl;
use crate::domain::errors::ResourceResult;

/// Progress sink passed to a fetcher; values are in `[0, 1]`.
pub type ProgressSink = dyn Fn(f64) + Send + Sync;

/// Port for fetching the raw bytes of a resource.
///
/// Implementations report progress through the sink when the total size is
/// known and must treat an empty body as a failure. The scheduler is the
/// only caller; cancellation happens by dropping the in-flight future.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    /// Fetches the full body of `url`, reporting progress along the way.
    async fn fetch(&self, url: &ResourceUrl, progress: &ProgressSink) -> ResourceResult<Bytes>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::domain::errors::ResourceError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Clone)]
    struct Plan {
        outcome: Result<Bytes, ResourceError>,
        progress_steps: Vec<f64>,
        gate: Option<Arc<Notify>>,
    }

    /// Deterministic fetcher for scheduler and coordinator tests.
    ///
    /// Outcomes are planned per URL; a URL can be gated so the transfer
    /// stays in flight until the test releases it. Start order is recorded.
    pub struct ManualFetcher {
        plans: Mutex<HashMap<String, Plan>>,
        starts: Mutex<Vec<String>>,
    }

    impl ManualFetcher {
        /// Creates an empty fetcher; unplanned URLs resolve to a 1x1 image.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                plans: Mutex::new(HashMap::new()),
                starts: Mutex::new(Vec::new()),
            })
        }

        /// Encodes a solid-color PNG for use as a planned body.
        pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Bytes {
            let mut buf = image::RgbImage::new(width, height);
            for pixel in buf.pixels_mut() {
                *pixel = image::Rgb(rgb);
            }
            let mut out = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(buf)
                .write_to(&mut out, image::ImageFormat::Png)
                .expect("png encode");
            Bytes::from(out.into_inner())
        }

        fn plan_entry(&self, url: &str) -> Plan {
            self.plans.lock().get(url).cloned().unwrap_or(Plan {
                outcome: Ok(Self::png_bytes(1, 1, [0, 0, 0])),
                progress_steps: Vec::new(),
                gate: None,
            })
        }

        fn upsert(&self, url: &str, f: impl FnOnce(&mut Plan)) {
            let mut plans = self.plans.lock();
            let plan = plans.entry(url.to_owned()).or_insert(Plan {
                outcome: Ok(Self::png_bytes(1, 1, [0, 0, 0])),
                progress_steps: Vec::new(),
                gate: None,
            });
            f(plan);
        }

        /// Plans a successful fetch returning `bytes`.
        pub fn plan_ok(&self, url: &str, bytes: Bytes) {
            self.upsert(url, |p| p.outcome = Ok(bytes));
        }

        /// Plans a failing fetch.
        pub fn plan_err(&self, url: &str, err: ResourceError) {
            self.upsert(url, |p| p.outcome = Err(err));
        }

        /// Plans the progress values emitted before the body is returned.
        pub fn plan_progress(&self, url: &str, steps: Vec<f64>) {
            self.upsert(url, |p| p.progress_steps = steps);
        }

        /// Gates the URL: its transfer blocks until [`Self::release`].
        pub fn gate(&self, url: &str) {
            self.upsert(url, |p| p.gate = Some(Arc::new(Notify::new())));
        }

        /// Releases one gated transfer of the URL.
        pub fn release(&self, url: &str) {
            let gate = self.plans.lock().get(url).and_then(|p| p.gate.clone());
            if let Some(gate) = gate {
                gate.notify_one();
            }
        }

        /// Snapshot of transfer start order.
        pub fn started(&self) -> Vec<String> {
            self.starts.lock().clone()
        }

        /// Waits until a transfer for the URL has started.
        ///
        /// # Panics
        /// Panics after five seconds without a start.
        pub async fn wait_for_start(&self, url: &str) {
            for _ in 0..1000 {
                if self.starts.lock().iter().any(|s| s == url) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("transfer for {url} never started");
        }

        /// Waits until `n` transfers have started in total.
        ///
        /// # Panics
        /// Panics after five seconds.
        pub async fn wait_for_start_count(&self, n: usize) {
            for _ in 0..1000 {
                if self.starts.lock().len() >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("expected {n} transfer starts, saw {:?}", self.started());
        }
    }

    #[async_trait]
    impl ByteFetcher for ManualFetcher {
        async fn fetch(&self, url: &ResourceUrl, progress: &ProgressSink) -> ResourceResult<Bytes> {
            self.starts.lock().push(url.as_str().to_owned());
            let plan = self.plan_entry(url.as_str());
            for step in &plan.progress_steps {
                progress(*step);
            }
            if let Some(gate) = plan.gate {
                gate.notified().await;
            }
            plan.outcome
        }
    }
}
