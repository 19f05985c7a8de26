use std::collections::{HashSet, VecDeque};

use crate::types::{MessageType, WebhookMessage};

/// Newest-first list of recent messages, deduplicated by id and bounded by `capacity`.
#[derive(Debug, Clone)]
pub struct MessageFeed {
    entries: VecDeque<WebhookMessage>,
    ids: HashSet<String>,
    capacity: usize,
}

impl MessageFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Replaces the contents with a freshly loaded page (expected newest first).
    pub fn replace_all(&mut self, rows: Vec<WebhookMessage>) {
        self.entries.clear();
        self.ids.clear();
        for row in rows {
            if self.entries.len() >= self.capacity {
                break;
            }
            if self.ids.insert(row.id.clone()) {
                self.entries.push_back(row);
            }
        }
    }

    /// Prepends a newly inserted row unless its id is already present.
    ///
    /// Returns `false` for duplicate deliveries, which leave the feed untouched.
    pub fn merge_insert(&mut self, row: WebhookMessage) -> bool {
        if self.ids.contains(&row.id) {
            return false;
        }
        self.ids.insert(row.id.clone());
        self.entries.push_front(row);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &WebhookMessage> {
        self.entries.iter()
    }

    /// Returns the entries matching `filter`, newest first.
    pub fn filtered(&self, filter: &FeedFilter) -> Vec<WebhookMessage> {
        let needle = filter
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        let limit = filter.limit.unwrap_or(usize::MAX);

        self.entries
            .iter()
            .filter(|row| {
                filter
                    .message_type
                    .map(|kind| row.message_type == kind)
                    .unwrap_or(true)
            })
            .filter(|row| match &needle {
                Some(needle) => {
                    row.title.to_lowercase().contains(needle.as_str())
                        || row.message.to_lowercase().contains(needle.as_str())
                }
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

/// View-layer filter applied to a [`MessageFeed`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub message_type: Option<MessageType>,
    pub query: Option<String>,
    pub limit: Option<usize>,
}
