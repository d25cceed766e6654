//! Ordered buffer of outbound lines.
//!
//! The sender task drains this queue one line per pacing interval. Normal
//! sends append; priority sends prepend. An optional compaction pass removes
//! later duplicates of a line already queued nearer the head. Compaction is
//! not linearized with concurrent enqueues; a duplicate slipping through one
//! pass is picked up by the next.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{BotError, Result};

#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line to the tail of the queue.
    pub fn add(&self, line: &str) -> Result<()> {
        self.insert(line, false)
    }

    /// Prepend a line, moving it ahead of every non-priority line queued.
    pub fn add_front(&self, line: &str) -> Result<()> {
        self.insert(line, true)
    }

    fn insert(&self, line: &str, front: bool) -> Result<()> {
        if line.is_empty() {
            return Err(BotError::InvalidArgument(
                "cannot queue an empty line".to_string(),
            ));
        }
        {
            let mut queue = self.inner.lock().unwrap();
            if front {
                queue.push_front(line.to_string());
            } else {
                queue.push_back(line.to_string());
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Best-effort count of queued lines.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Wake the sender with the shutdown sentinel. Lines still queued are
    /// drained first.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take the next line, waiting for one to arrive. Returns `None` once
    /// the queue has been closed and emptied.
    pub async fn next(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut queue = self.inner.lock().unwrap();
                if let Some(line) = queue.pop_front() {
                    return Some(line);
                }
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// One deduplication pass: scan head to tail and drop every line equal
    /// to one already seen, so the head-nearest copy survives.
    pub fn compact(&self) {
        let mut queue = self.inner.lock().unwrap();
        let mut seen = HashSet::with_capacity(queue.len());
        queue.retain(|line| seen.insert(line.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = OutboundQueue::new();
        q.add("one").unwrap();
        q.add("two").unwrap();
        q.add("three").unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(q.next().await.as_deref(), Some("one"));
            assert_eq!(q.next().await.as_deref(), Some("two"));
            assert_eq!(q.next().await.as_deref(), Some("three"));
        });
    }

    #[test]
    fn test_priority_prepend() {
        let q = OutboundQueue::new();
        q.add("normal").unwrap();
        q.add_front("urgent").unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(q.next().await.as_deref(), Some("urgent"));
            assert_eq!(q.next().await.as_deref(), Some("normal"));
        });
    }

    #[test]
    fn test_empty_line_rejected() {
        let q = OutboundQueue::new();
        assert!(matches!(q.add(""), Err(BotError::InvalidArgument(_))));
        assert!(matches!(q.add_front(""), Err(BotError::InvalidArgument(_))));
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_compaction_keeps_earliest() {
        let q = OutboundQueue::new();
        q.add("a").unwrap();
        q.add("b").unwrap();
        q.add("a").unwrap();
        q.add("c").unwrap();
        q.add("b").unwrap();
        q.add("a").unwrap();

        q.compact();

        assert_eq!(q.size(), 3);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(q.next().await.as_deref(), Some("a"));
            assert_eq!(q.next().await.as_deref(), Some("b"));
            assert_eq!(q.next().await.as_deref(), Some("c"));
        });
    }

    #[test]
    fn test_compaction_idempotent() {
        let q = OutboundQueue::new();
        q.add("x").unwrap();
        q.add("x").unwrap();
        q.compact();
        q.compact();
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn test_close_yields_sentinel() {
        let q = OutboundQueue::new();
        q.add("last").unwrap();
        q.close();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(q.next().await.as_deref(), Some("last"));
            assert_eq!(q.next().await, None);
        });
    }

    #[tokio::test]
    async fn test_next_wakes_on_add() {
        use std::sync::Arc;
        let q = Arc::new(OutboundQueue::new());
        let q2 = q.clone();

        let taker = tokio::spawn(async move { q2.next().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.add("wake").unwrap();

        assert_eq!(taker.await.unwrap().as_deref(), Some("wake"));
    }
}
