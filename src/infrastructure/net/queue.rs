//! Two-class FIFO queue for pending downloads.

use std::collections::VecDeque;

use crate::domain::entities::{ResourcePriority, ResourceUrl};

/// Pending-download queue: strict FIFO within each priority class, High
/// drained before Low. A URL appears at most once.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    high: VecDeque<ResourceUrl>,
    low: VecDeque<ResourceUrl>,
}

impl DownloadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a URL at the tail of its priority class.
    pub fn enqueue(&mut self, url: ResourceUrl, priority: ResourcePriority) {
        match priority {
            ResourcePriority::High => self.high.push_back(url),
            ResourcePriority::Low => self.low.push_back(url),
        }
    }

    /// Pops the next URL to start: head of High, else head of Low.
    pub fn dequeue(&mut self) -> Option<ResourceUrl> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }

    /// The URL `dequeue` would return, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&ResourceUrl> {
        self.high.front().or_else(|| self.low.front())
    }

    /// Removes a URL from whichever class holds it.
    pub fn remove(&mut self, url: &ResourceUrl) {
        self.high.retain(|u| u != url);
        self.low.retain(|u| u != url);
    }

    /// Moves a URL from the Low class to the tail of the High class,
    /// keeping fairness among already-promoted High entries.
    pub fn promote(&mut self, url: &ResourceUrl) {
        let before = self.low.len();
        self.low.retain(|u| u != url);
        if self.low.len() != before {
            self.high.push_back(url.clone());
        }
    }

    /// Pending URLs in the High class.
    #[must_use]
    pub fn high_count(&self) -> usize {
        self.high.len()
    }

    /// Pending URLs in the Low class.
    #[must_use]
    pub fn low_count(&self) -> usize {
        self.low.len()
    }

    /// Pending URLs in total.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.high.len() + self.low.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    /// Drops every pending URL.
    pub fn clear(&mut self) {
        self.high.clear();
        self.low.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> ResourceUrl {
        ResourceUrl::parse(s).unwrap()
    }

    #[test]
    fn high_drains_before_low() {
        let mut q = DownloadQueue::new();
        q.enqueue(url("https://a/l1"), ResourcePriority::Low);
        q.enqueue(url("https://a/h1"), ResourcePriority::High);
        q.enqueue(url("https://a/l2"), ResourcePriority::Low);
        q.enqueue(url("https://a/h2"), ResourcePriority::High);

        let order: Vec<_> = std::iter::from_fn(|| q.dequeue())
            .map(|u| u.as_str().to_owned())
            .collect();
        assert_eq!(
            order,
            vec!["https://a/h1", "https://a/h2", "https://a/l1", "https://a/l2"]
        );
    }

    #[test]
    fn fifo_within_a_class() {
        let mut q = DownloadQueue::new();
        for i in 0..4 {
            q.enqueue(url(&format!("https://a/{i}")), ResourcePriority::Low);
        }
        for i in 0..4 {
            assert_eq!(q.dequeue().unwrap().as_str(), format!("https://a/{i}"));
        }
    }

    #[test]
    fn promote_appends_to_high_tail() {
        let mut q = DownloadQueue::new();
        q.enqueue(url("https://a/h1"), ResourcePriority::High);
        q.enqueue(url("https://a/l1"), ResourcePriority::Low);
        q.enqueue(url("https://a/l2"), ResourcePriority::Low);

        q.promote(&url("https://a/l2"));

        assert_eq!(q.high_count(), 2);
        assert_eq!(q.low_count(), 1);
        assert_eq!(q.dequeue().unwrap().as_str(), "https://a/h1");
        assert_eq!(q.dequeue().unwrap().as_str(), "https://a/l2");
        assert_eq!(q.dequeue().unwrap().as_str(), "https://a/l1");
    }

    #[test]
    fn promote_unknown_url_is_a_noop() {
        let mut q = DownloadQueue::new();
        q.enqueue(url("https://a/l1"), ResourcePriority::Low);
        q.promote(&url("https://a/other"));
        assert_eq!(q.high_count(), 0);
        assert_eq!(q.low_count(), 1);
    }

    #[test]
    fn remove_and_counts() {
        let mut q = DownloadQueue::new();
        q.enqueue(url("https://a/h1"), ResourcePriority::High);
        q.enqueue(url("https://a/l1"), ResourcePriority::Low);
        assert_eq!(q.total_count(), 2);
        assert!(!q.is_empty());

        q.remove(&url("https://a/h1"));
        assert_eq!(q.total_count(), 1);
        assert_eq!(q.peek().unwrap().as_str(), "https://a/l1");

        q.clear();
        assert!(q.is_empty());
    }
}
