//! In-memory detection history.
//!
//! The session is the only writer.  Readers get snapshots, or a
//! `watch::Receiver` to re-render on change.  Nothing is persisted.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::types::{DetectionEvent, HistoryEntry};

/// Append-only log of confirmed detections, in insertion order.
///
/// With a capacity the store is a ring: appending to a full store evicts
/// the oldest entry.  Entries are never edited.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: Option<usize>,
    tx: watch::Sender<VecDeque<HistoryEntry>>,
}

impl HistoryStore {
    /// `capacity: None` keeps every entry for the life of the process.
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, _) = watch::channel(VecDeque::new());
        Self {
            capacity: capacity.filter(|&c| c > 0),
            tx,
        }
    }

    /// Record a confirmed detection and return the stored entry.
    pub fn append(&self, event: &DetectionEvent) -> HistoryEntry {
        let entry = HistoryEntry::from(event);
        let capacity = self.capacity;
        self.tx.send_modify(|entries| {
            if let Some(cap) = capacity {
                while entries.len() >= cap {
                    entries.pop_front();
                }
            }
            entries.push_back(entry.clone());
        });
        entry
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view for display code.
    pub fn view(&self) -> HistoryView {
        HistoryView {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a [`HistoryStore`].  Cheap to clone.
#[derive(Debug, Clone)]
pub struct HistoryView {
    rx: watch::Receiver<VecDeque<HistoryEntry>>,
}

impl HistoryView {
    /// Entries oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.rx.borrow().iter().cloned().collect()
    }

    /// Entries newest first, as a history list is usually shown.
    pub fn newest_first(&self) -> Vec<HistoryEntry> {
        self.rx.borrow().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that is notified on every append.
    pub fn watch(&self) -> watch::Receiver<VecDeque<HistoryEntry>> {
        self.rx.clone()
    }
}
