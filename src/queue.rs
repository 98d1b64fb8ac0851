//! Bounded outbound queue between generation and delivery.
//!
//! The single resource shared between the two execution contexts. FIFO of
//! capacity C with a drop-oldest overflow policy: the producer never
//! blocks, and sustained disconnection sheds the stalest telemetry first.
//! Overflow is an expected condition, surfaced only through the dropped
//! counter.

use crate::core::QueueEntry;
use crate::stats::SimCounters;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub struct OutboundQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    capacity: usize,
    notify: Notify,
    /// Next sequence number; monotonically increasing for loss accounting.
    seq: AtomicU64,
    counters: Arc<SimCounters>,
}

impl OutboundQueue {
    pub fn new(capacity: usize, counters: Arc<SimCounters>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            counters,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a new entry, assigning it the next sequence number. When the
    /// queue is full the head (oldest) entry is evicted first and counted
    /// dropped; the producer never blocks.
    pub fn push(&self, topic: String, payload: Vec<u8>, qos: u8) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = QueueEntry {
            seq,
            topic,
            payload,
            qos,
            enqueued_at: Utc::now(),
            retry_count: 0,
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.len() >= self.capacity {
                entries.pop_front();
                self.counters.queue_dropped.fetch_add(1, Ordering::Relaxed);
            }
            entries.push_back(entry);
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        seq
    }

    /// Requeue an entry at the head for prompt retry. If the queue is full
    /// the back (newest) entry gives way so capacity C still holds.
    pub fn push_front(&self, entry: QueueEntry) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.len() >= self.capacity {
                entries.pop_back();
                self.counters.queue_dropped.fetch_add(1, Ordering::Relaxed);
            }
            entries.push_front(entry);
        }
        self.notify.notify_one();
    }

    /// Pop the head entry without waiting.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Pop the head entry, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // Deadline hit; one last check races a concurrent push.
                return self.try_pop();
            }
        }
    }

    /// Current queue length. O(1).
    pub fn depth(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Sequence numbers currently resident, head first. Test/observability
    /// helper.
    pub fn resident_seqs(&self) -> Vec<u64> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|entry| entry.seq)
            .collect()
    }
}
