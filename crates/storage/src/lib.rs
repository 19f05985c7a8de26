pub mod notify;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use hookboard_core::{MessageType, NewMessage, WebhookMessage};

pub use notify::{InsertEvent, InsertNotifier, InsertSubscription};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    notifier: InsertNotifier,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self {
            pool,
            notifier: InsertNotifier::default(),
        })
    }

    /// Opens a private in-memory database held on a single long-lived connection.
    pub async fn connect_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(StorageError::Connect)?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(StorageError::Pragma)?;

        Ok(Self {
            pool,
            notifier: InsertNotifier::default(),
        })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the `webhook_messages` table.
    pub fn messages(&self) -> MessageRepository {
        MessageRepository {
            pool: self.pool.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Errors surfaced by a [`MessageStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode or decode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence and change-notification contract consumed by the app.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message, assigning its id, and notifies insert subscribers.
    async fn insert(&self, record: NewMessage) -> Result<WebhookMessage, StoreError>;

    /// Most recent rows ordered by `created_at` descending.
    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookMessage>, StoreError>;

    /// Administrative removal; returns whether a row existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    fn subscribe_inserts(&self) -> InsertSubscription;
}

/// Repository responsible for interacting with the `webhook_messages` table.
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
    notifier: InsertNotifier,
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn insert(&self, record: NewMessage) -> Result<WebhookMessage, StoreError> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&record.message.metadata)?;

        sqlx::query(
            "INSERT INTO webhook_messages \
             (id, type, title, message, metadata_json, source, reported_at, origin_ip, user_agent, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(record.message.message_type.as_str())
        .bind(&record.message.title)
        .bind(&record.message.message)
        .bind(&metadata_json)
        .bind(&record.message.source)
        .bind(&record.message.reported_at)
        .bind(&record.context.origin_ip)
        .bind(&record.context.user_agent)
        .bind(to_rfc3339(record.created_at))
        .execute(&self.pool)
        .await?;

        let message = record.into_message(id);
        self.notifier.publish(&message);
        Ok(message)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, type, title, message, metadata_json, source, reported_at, origin_ip, user_agent, created_at \
               FROM webhook_messages \
              ORDER BY created_at DESC, rowid DESC \
              LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageRow::into_domain).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn subscribe_inserts(&self) -> InsertSubscription {
        self.notifier.subscribe()
    }
}

/// Raw row as stored in `webhook_messages`.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: String,
    #[sqlx(rename = "type")]
    message_type: String,
    title: String,
    message: String,
    metadata_json: String,
    source: Option<String>,
    reported_at: Option<String>,
    origin_ip: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_domain(self) -> Result<WebhookMessage, StoreError> {
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata_json)?;
        Ok(WebhookMessage {
            id: self.id,
            message_type: MessageType::from_label(&self.message_type),
            title: self.title,
            message: self.message,
            metadata,
            source: self.source,
            reported_at: self.reported_at,
            origin_ip: self.origin_ip,
            user_agent: self.user_agent,
            created_at: self.created_at,
        })
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hookboard_core::{RequestContext, ValidatedMessage};
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use tokio_stream::StreamExt;

    async fn setup_db() -> Database {
        let db = Database::connect_in_memory().await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn new_message(title: &str, kind: MessageType, at: DateTime<Utc>) -> NewMessage {
        let mut metadata = Map::new();
        metadata.insert("build".to_string(), json!(42));
        NewMessage::new(
            ValidatedMessage {
                message_type: kind,
                title: title.to_string(),
                message: format!("{title} body"),
                metadata,
                source: Some("ci".to_string()),
                reported_at: Some("2023-12-31T23:59:59Z".to_string()),
            },
            RequestContext {
                origin_ip: Some("203.0.113.7".to_string()),
                user_agent: Some("curl/8.0".to_string()),
            },
            at,
        )
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;
        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'webhook_messages'",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 1);
    }

    #[tokio::test]
    async fn insert_assigns_id_and_round_trips() {
        let db = setup_db().await;
        let repo = db.messages();

        let inserted = repo
            .insert(new_message("Deploy", MessageType::Success, base_time()))
            .await
            .expect("insert succeeds");
        assert!(!inserted.id.is_empty());
        assert_eq!(inserted.message_type, MessageType::Success);

        let rows = repo.list_recent(10).await.expect("list");
        assert_eq!(rows, vec![inserted]);
        assert_eq!(rows[0].metadata.get("build"), Some(&json!(42)));
        assert_eq!(rows[0].origin_ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let db = setup_db().await;
        let repo = db.messages();
        let first = repo
            .insert(new_message("A", MessageType::Info, base_time()))
            .await
            .expect("insert");
        let second = repo
            .insert(new_message("A", MessageType::Info, base_time()))
            .await
            .expect("insert");
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first_and_limits() {
        let db = setup_db().await;
        let repo = db.messages();
        for (offset, title) in [(0, "oldest"), (2, "newest"), (1, "middle")] {
            repo.insert(new_message(
                title,
                MessageType::Info,
                base_time() + Duration::seconds(offset),
            ))
            .await
            .expect("insert");
        }

        let rows = repo.list_recent(2).await.expect("list");
        let titles: Vec<_> = rows.iter().map(|row| row.title.as_str()).collect();
        assert_eq!(titles, vec!["newest", "middle"]);
    }

    #[tokio::test]
    async fn same_timestamp_falls_back_to_insertion_order() {
        let db = setup_db().await;
        let repo = db.messages();
        repo.insert(new_message("first", MessageType::Info, base_time()))
            .await
            .expect("insert");
        repo.insert(new_message("second", MessageType::Info, base_time()))
            .await
            .expect("insert");

        let rows = repo.list_recent(10).await.expect("list");
        assert_eq!(rows[0].title, "second");
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let db = setup_db().await;
        let repo = db.messages();
        let inserted = repo
            .insert(new_message("gone", MessageType::Error, base_time()))
            .await
            .expect("insert");

        assert!(repo.delete(&inserted.id).await.expect("delete"));
        assert!(!repo.delete(&inserted.id).await.expect("delete again"));
        assert!(repo.list_recent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn insert_notifies_subscribers() {
        let db = setup_db().await;
        let repo = db.messages();
        let mut subscription = repo.subscribe_inserts();

        let inserted = repo
            .insert(new_message("live", MessageType::Warning, base_time()))
            .await
            .expect("insert");

        let event = tokio::time::timeout(StdDuration::from_millis(200), subscription.next())
            .await
            .expect("event available")
            .expect("stream open");
        assert_eq!(event, InsertEvent::Inserted(inserted));
    }

    #[tokio::test]
    async fn rejected_insert_does_not_notify() {
        let db = setup_db().await;
        let repo = db.messages();
        let mut subscription = repo.subscribe_inserts();

        let err = repo
            .insert(new_message("", MessageType::Info, base_time()))
            .await
            .expect_err("empty title violates check constraint");
        assert!(matches!(err, StoreError::Database(_)));

        let pending =
            tokio::time::timeout(StdDuration::from_millis(50), subscription.next()).await;
        assert!(pending.is_err(), "no notification for a failed insert");
    }

    #[tokio::test]
    async fn repositories_share_one_notifier() {
        let db = setup_db().await;
        let mut subscription = db.messages().subscribe_inserts();
        db.messages()
            .insert(new_message("shared", MessageType::Info, base_time()))
            .await
            .expect("insert");

        let event = tokio::time::timeout(StdDuration::from_millis(200), subscription.next())
            .await
            .expect("event available")
            .expect("stream open");
        assert!(matches!(event, InsertEvent::Inserted(row) if row.title == "shared"));
    }
}
