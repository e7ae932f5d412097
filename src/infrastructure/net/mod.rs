//! Network scheduling and transport.

mod downloader;
mod http;
mod queue;
mod task;

pub use downloader::{DEFAULT_MAX_CONCURRENT, DownloadEvents, Downloader};
pub use http::{DEFAULT_TIMEOUT_SECS, HttpFetcher};
pub use queue::DownloadQueue;
pub use task::{
    DownloadCallback, DownloadTask, Fetched, TaskCompletionFn, TaskProgressFn, TaskState,
};
