//! In-process fakes shared by the app crate's tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;

use hookboard_core::{MessageType, NewMessage, RequestContext, ValidatedMessage, WebhookMessage};
use hookboard_storage::{InsertNotifier, InsertSubscription, MessageStore, StoreError};

use crate::dashboard::shared_feed;
use crate::router::AppState;
use crate::telemetry;
use crate::webhook::IngestSettings;

pub fn state(store: Arc<dyn MessageStore>, ingest: IngestSettings) -> AppState {
    let metrics = telemetry::init_metrics().expect("metrics init");
    AppState::new(
        metrics,
        store,
        ingest,
        shared_feed(50),
        25,
        Duration::from_secs(10),
    )
}

pub fn new_message(title: &str) -> NewMessage {
    NewMessage::new(
        ValidatedMessage {
            message_type: MessageType::Info,
            title: title.to_string(),
            message: format!("{title} body"),
            metadata: Map::new(),
            source: None,
            reported_at: None,
        },
        RequestContext::default(),
        Utc::now(),
    )
}

/// Memory-backed [`MessageStore`] with switchable failures.
pub struct FakeStore {
    rows: Mutex<Vec<WebhookMessage>>,
    notifier: InsertNotifier,
    fail_inserts: AtomicBool,
    fail_lists: AtomicBool,
    insert_attempts: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::with_notifier(InsertNotifier::default())
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self::with_notifier(InsertNotifier::new(buffer))
    }

    pub fn failing_inserts() -> Self {
        let store = Self::new();
        store.fail_inserts.store(true, Ordering::SeqCst);
        store
    }

    fn with_notifier(notifier: InsertNotifier) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            notifier,
            fail_inserts: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
            insert_attempts: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn notifier(&self) -> &InsertNotifier {
        &self.notifier
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn insert(&self, record: NewMessage) -> Result<WebhookMessage, StoreError> {
        let attempt = self.insert_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert disabled".to_string()));
        }
        let message = record.into_message(format!("fake-{attempt}"));
        self.rows.lock().expect("rows lock").push(message.clone());
        self.notifier.publish(&message);
        Ok(message)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookMessage>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("list disabled".to_string()));
        }
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .expect("rows lock")
            .iter()
            .rev()
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|row| row.id != id);
        Ok(rows.len() != before)
    }

    fn subscribe_inserts(&self) -> InsertSubscription {
        self.notifier.subscribe()
    }
}
